//! Query engine
//!
//! Queries are memoized derivations over state cells and other queries. A
//! query instance (one per argument) is evaluated lazily on first read,
//! cached, and marked dirty when something it read changes. A dirty
//! instance first re-validates its dependencies in read order and only
//! re-runs its computation if one of them actually changed.
//!
//! ```rust
//! use domus_core::{DomainDef, Store};
//!
//! let counter = DomainDef::new("Counter", |d, _: &()| {
//!     let count = d.state("Count", 2i32);
//!     let doubled = d.query("Doubled", move |ctx, _: &()| Ok(ctx.get(count)? * 2));
//!     Ok(doubled)
//! });
//!
//! let store = Store::new();
//! let doubled = store.get_domain(&counter, ()).unwrap();
//! assert_eq!(store.query(doubled, ()).unwrap(), 4);
//! ```

use rustc_hash::{FxHashMap, FxHashSet};
use slotmap::new_key_type;
use smallvec::SmallVec;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::domain::DomainId;
use crate::error::{Result, StoreError};
use crate::graph::{DependencySet, Node};
use crate::inspector::{InspectorRecord, QueryPhase, QueryRecord};
use crate::key::{ArgKey, Argument, Key};
use crate::runtime::{Listener, QueryCallback, Runtime};
use crate::state::State;
use crate::value::{value_as, SharedValue};

new_key_type! {
    /// Unique identifier for a query definition
    pub struct QueryDefId;
    /// Unique identifier for a query instance (definition + argument)
    pub struct QueryId;
}

/// Evaluation state of a query instance
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum QueryStatus {
    Clean,
    Dirty,
    /// Being evaluated or re-validated; reading it again is a cycle
    Evaluating,
}

pub(crate) type ComputeFn =
    dyn Fn(&mut QueryContext<'_>, &ArgKey) -> Result<SharedValue> + Send + Sync;

/// A query declared by a domain instance
pub(crate) struct QueryDef {
    pub(crate) key: Key,
    pub(crate) domain: DomainId,
    pub(crate) compute: Arc<ComputeFn>,
    pub(crate) instances: FxHashMap<ArgKey, QueryId>,
}

/// A cached evaluation of a query for one argument
pub(crate) struct QueryInstance {
    pub(crate) key: Key,
    pub(crate) def: QueryDefId,
    pub(crate) arg: ArgKey,
    pub(crate) value: Option<SharedValue>,
    pub(crate) status: QueryStatus,
    pub(crate) deps: DependencySet,
    pub(crate) dependents: FxHashSet<QueryId>,
    pub(crate) listeners: SmallVec<[Listener<QueryCallback>; 2]>,
    /// Revision at which the value last changed
    pub(crate) changed_at: u64,
    /// Revision at which the value was last known to be up to date
    pub(crate) verified_at: u64,
    /// Value of `changed_at` that listeners were last told about
    pub(crate) notified_at: u64,
}

impl QueryInstance {
    fn new(key: Key, def: QueryDefId, arg: ArgKey, revision: u64) -> Self {
        Self {
            key,
            def,
            arg,
            value: None,
            status: QueryStatus::Dirty,
            deps: DependencySet::default(),
            dependents: FxHashSet::default(),
            listeners: SmallVec::new(),
            changed_at: revision,
            verified_at: revision,
            notified_at: revision,
        }
    }
}

/// Typed handle to a query declared by a domain
pub struct Query<A, T> {
    def: QueryDefId,
    _marker: PhantomData<fn(A) -> T>,
}

impl<A, T> Query<A, T> {
    pub(crate) fn from_def(def: QueryDefId) -> Self {
        Self {
            def,
            _marker: PhantomData,
        }
    }

    pub fn id(&self) -> QueryDefId {
        self.def
    }
}

impl<A, T> Clone for Query<A, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<A, T> Copy for Query<A, T> {}

impl<A, T> std::fmt::Debug for Query<A, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Query").field(&self.def).finish()
    }
}

/// Read access handed to query computations.
///
/// When tracking, every state or query read is recorded as a dependency of
/// the query being evaluated.
pub struct QueryContext<'rt> {
    runtime: &'rt mut Runtime,
    deps: Option<DependencySet>,
}

impl<'rt> QueryContext<'rt> {
    pub(crate) fn tracked(runtime: &'rt mut Runtime) -> Self {
        Self {
            runtime,
            deps: Some(DependencySet::default()),
        }
    }

    pub(crate) fn untracked(runtime: &'rt mut Runtime) -> Self {
        Self {
            runtime,
            deps: None,
        }
    }

    /// Read the current value of a state cell
    pub fn get<T: Clone + 'static>(&mut self, state: State<T>) -> Result<T> {
        let cell = self
            .runtime
            .states
            .get(state.id())
            .ok_or_else(|| StoreError::unknown(format!("{state:?}")))?;
        let value = value_as::<T>(&*cell.value, &cell.key)?;
        if let Some(deps) = self.deps.as_mut() {
            deps.insert(Node::State(state.id()));
        }
        Ok(value)
    }

    /// Read the up-to-date value of a query instance
    pub fn query<A: Argument, T: Clone + 'static>(
        &mut self,
        query: Query<A, T>,
        arg: A,
    ) -> Result<T> {
        let read = self.runtime.read_query(query.id(), ArgKey::new(arg))?;
        if let Some(deps) = self.deps.as_mut() {
            deps.insert(Node::Query(read.id));
        }
        value_as::<T>(&*read.value, &read.key)
    }

    pub(crate) fn into_dependencies(self) -> DependencySet {
        self.deps.unwrap_or_default()
    }
}

/// Result of reading a query instance
pub(crate) struct QueryRead {
    pub(crate) id: QueryId,
    pub(crate) key: Key,
    pub(crate) value: SharedValue,
}

impl Runtime {
    /// Resolve (creating if needed) and bring up to date the instance of
    /// `def` for `arg`
    pub(crate) fn read_query(&mut self, def: QueryDefId, arg: ArgKey) -> Result<QueryRead> {
        let existing = self
            .query_defs
            .get(def)
            .ok_or_else(|| StoreError::unknown(format!("{def:?}")))?
            .instances
            .get(&arg)
            .copied();
        let id = match existing {
            Some(id) => id,
            None => self.create_query(def, arg)?,
        };

        self.refresh(id)?;

        let query = self
            .queries
            .get(id)
            .ok_or_else(|| StoreError::unknown(format!("{id:?}")))?;
        let value = query
            .value
            .clone()
            .ok_or_else(|| StoreError::unknown(&query.key))?;
        Ok(QueryRead {
            id,
            key: query.key.clone(),
            value,
        })
    }

    fn create_query(&mut self, def: QueryDefId, arg: ArgKey) -> Result<QueryId> {
        let def_key = &self
            .query_defs
            .get(def)
            .ok_or_else(|| StoreError::unknown(format!("{def:?}")))?
            .key;
        let key = if arg.is_unit() {
            def_key.clone()
        } else {
            def_key.with_arg(arg.clone())
        };

        let revision = self.revision;
        let id = self
            .queries
            .insert(QueryInstance::new(key.clone(), def, arg.clone(), revision));
        if let Some(def) = self.query_defs.get_mut(def) {
            def.instances.insert(arg, id);
        }

        self.record(|| {
            InspectorRecord::Query(QueryRecord {
                phase: QueryPhase::Created,
                key,
                value: None,
            })
        });
        Ok(id)
    }

    /// Make sure the instance holds an up-to-date value
    pub(crate) fn refresh(&mut self, id: QueryId) -> Result<()> {
        let query = self
            .queries
            .get_mut(id)
            .ok_or_else(|| StoreError::unknown(format!("{id:?}")))?;
        match query.status {
            QueryStatus::Clean => return Ok(()),
            QueryStatus::Evaluating => {
                return Err(StoreError::ReentrantEvaluation {
                    key: query.key.clone(),
                })
            }
            QueryStatus::Dirty => {}
        }

        if query.value.is_none() {
            return self.evaluate(id);
        }

        query.status = QueryStatus::Evaluating;
        let changed = match self.dependencies_changed(id) {
            Ok(changed) => changed,
            Err(err) => {
                self.set_status(id, QueryStatus::Dirty);
                return Err(err);
            }
        };
        if changed {
            return self.evaluate(id);
        }

        let revision = self.revision;
        let Some(query) = self.queries.get_mut(id) else {
            return Ok(());
        };
        query.status = QueryStatus::Clean;
        query.verified_at = revision;
        let key = query.key.clone();
        let value = query.value.clone();
        self.record(|| {
            InspectorRecord::Query(QueryRecord {
                phase: QueryPhase::Clean,
                key,
                value,
            })
        });
        Ok(())
    }

    /// Whether any recorded dependency changed after the instance was last
    /// verified. Dependency queries are refreshed along the way.
    fn dependencies_changed(&mut self, id: QueryId) -> Result<bool> {
        let Some(query) = self.queries.get(id) else {
            return Ok(true);
        };
        let verified_at = query.verified_at;
        let deps: SmallVec<[Node; 8]> = query.deps.iter().copied().collect();

        for dep in deps {
            let changed_at = match dep {
                Node::State(state) => match self.states.get(state) {
                    Some(cell) => cell.changed_at,
                    None => return Ok(true),
                },
                Node::Query(dep) => {
                    if !self.queries.contains_key(dep) {
                        return Ok(true);
                    }
                    self.refresh(dep)?;
                    match self.queries.get(dep) {
                        Some(query) => query.changed_at,
                        None => return Ok(true),
                    }
                }
            };
            if changed_at > verified_at {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Run the computation and store the result
    fn evaluate(&mut self, id: QueryId) -> Result<()> {
        let query = self
            .queries
            .get_mut(id)
            .ok_or_else(|| StoreError::unknown(format!("{id:?}")))?;
        query.status = QueryStatus::Evaluating;
        let def = query.def;
        let arg = query.arg.clone();

        let Some(compute) = self.query_defs.get(def).map(|def| Arc::clone(&def.compute)) else {
            self.set_status(id, QueryStatus::Dirty);
            return Err(StoreError::unknown(format!("{def:?}")));
        };

        let mut ctx = QueryContext::tracked(self);
        let result = compute(&mut ctx, &arg);
        let deps = ctx.into_dependencies();

        // a failed run still tracks what it read so a later write retries it
        self.set_dependencies(id, deps);
        let value = match result {
            Ok(value) => value,
            Err(err) => {
                self.set_status(id, QueryStatus::Dirty);
                return Err(err);
            }
        };

        let revision = self.revision;
        let query = self
            .queries
            .get_mut(id)
            .ok_or_else(|| StoreError::unknown(format!("{id:?}")))?;
        let changed = query
            .value
            .as_ref()
            .map_or(true, |old| !old.dyn_eq(&*value));
        if changed {
            query.value = Some(Arc::clone(&value));
            query.changed_at = revision;
        }
        query.status = QueryStatus::Clean;
        query.verified_at = revision;
        let key = query.key.clone();

        self.record(|| {
            InspectorRecord::Query(QueryRecord {
                phase: QueryPhase::Evaluated { changed },
                key,
                value: Some(value),
            })
        });
        Ok(())
    }

    fn set_status(&mut self, id: QueryId, status: QueryStatus) {
        if let Some(query) = self.queries.get_mut(id) {
            query.status = status;
        }
    }

    /// Destroy an instance nobody observes or depends on, then retry its
    /// dependencies
    pub(crate) fn collect_query(&mut self, id: QueryId) {
        let Some(query) = self.queries.get(id) else {
            return;
        };
        if !query.listeners.is_empty() || !query.dependents.is_empty() {
            return;
        }

        let orphans: SmallVec<[QueryId; 4]> = query
            .deps
            .iter()
            .filter_map(|node| match node {
                Node::Query(dep) => Some(*dep),
                Node::State(_) => None,
            })
            .collect();
        self.remove_query(id);
        for dep in orphans {
            self.collect_query(dep);
        }
    }

    /// Unconditionally remove an instance
    pub(crate) fn remove_query(&mut self, id: QueryId) {
        let Some(query) = self.queries.remove(id) else {
            return;
        };
        if let Some(def) = self.query_defs.get_mut(query.def) {
            if def.instances.get(&query.arg) == Some(&id) {
                def.instances.remove(&query.arg);
            }
        }
        self.detach(id, &query.deps);
        for listener in query.listeners.iter() {
            listener.deactivate();
        }

        let QueryInstance { key, value, .. } = query;
        self.record(|| {
            InspectorRecord::Query(QueryRecord {
                phase: QueryPhase::Destroyed,
                key,
                value,
            })
        });
    }
}
