//! Domain registry
//!
//! A [`DomainDef`] is a named, optionally argument-parameterized bundle of
//! state/query/command/event declarations. The registry instantiates it at
//! most once per `(name, argument)` key and owns every entity the instance
//! declares. Instances are reference counted by subscriptions and parent
//! domains; when the count drops to zero the instance and everything it
//! owns is torn down, unless a plain store lookup pinned it.
//!
//! ```rust
//! use domus_core::{Command, DomainDef, Query, Store};
//!
//! #[derive(Clone)]
//! struct Counter {
//!     value: Query<(), i32>,
//!     increment: Command<()>,
//! }
//!
//! let counter = DomainDef::new("Counter", |d, _: &()| {
//!     let count = d.state("Count", 0);
//!     Ok(Counter {
//!         value: d.query("Value", move |ctx, _: &()| ctx.get(count)),
//!         increment: d.command("Increment", move |ctx, ()| {
//!             Ok(vec![count.set(ctx.get(count)? + 1)])
//!         }),
//!     })
//! });
//!
//! let store = Store::new();
//! let output = store.get_domain(&counter, ()).unwrap();
//! store.send(output.increment, ()).unwrap();
//! assert_eq!(store.query(output.value, ()).unwrap(), 1);
//! ```

use rustc_hash::{FxHashMap, FxHashSet};
use slotmap::{new_key_type, SlotMap};
use smallvec::SmallVec;
use std::any::Any;
use std::sync::Arc;

use crate::capability::Extern;
use crate::command::{Command, CommandContext, CommandDef, CommandId, Effect, EffectFn};
use crate::error::{Result, StoreError};
use crate::event::{Event, EventDef, EventId};
use crate::inspector::{
    DomainPhase, DomainRecord, InspectorRecord, StatePhase, StateRecord,
};
use crate::key::{key_of, ArgKey, Argument, EntityKind, Key};
use crate::query::{ComputeFn, Query, QueryContext, QueryDef, QueryDefId};
use crate::runtime::Runtime;
use crate::state::{State, StateCell, StateId};
use crate::value::{Data, SharedValue, Value};

new_key_type! {
    /// Unique identifier for a domain instance
    pub struct DomainId;
}

pub type BuildFn<A, O> = dyn Fn(&mut DomainBuilder<'_>, &A) -> Result<O> + Send + Sync;

/// Declaration of a domain
pub struct DomainDef<A, O> {
    name: Arc<str>,
    build: Arc<BuildFn<A, O>>,
}

impl<A, O> Clone for DomainDef<A, O> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            build: Arc::clone(&self.build),
        }
    }
}

impl<A, O> DomainDef<A, O>
where
    A: Argument,
    O: Clone + Send + Sync + 'static,
{
    pub fn new<F>(name: &str, build: F) -> Self
    where
        F: Fn(&mut DomainBuilder<'_>, &A) -> Result<O> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            build: Arc::new(build),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The identity of this domain's instance for `arg`
    pub fn key(&self, arg: A) -> Key {
        key_of(EntityKind::Domain, &self.name, arg)
    }
}

impl<A, O> std::fmt::Debug for DomainDef<A, O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DomainDef").field("name", &self.name).finish()
    }
}

/// A live domain instance
pub(crate) struct DomainInstance {
    pub(crate) key: Key,
    /// `None` while the build function is still running
    output: Option<Arc<dyn Any + Send + Sync>>,
    states: Vec<StateId>,
    queries: Vec<QueryDefId>,
    commands: Vec<CommandId>,
    events: Vec<EventId>,
    children: SmallVec<[DomainId; 4]>,
    names: FxHashSet<Key>,
    pub(crate) ref_count: usize,
    /// Resolved by a plain store lookup; kept until the store is destroyed
    pinned: bool,
}

impl DomainInstance {
    fn new(key: Key) -> Self {
        Self {
            key,
            output: None,
            states: Vec::new(),
            queries: Vec::new(),
            commands: Vec::new(),
            events: Vec::new(),
            children: SmallVec::new(),
            names: FxHashSet::default(),
            ref_count: 0,
            pinned: false,
        }
    }
}

/// All live domain instances, indexed by key
#[derive(Default)]
pub(crate) struct DomainRegistry {
    pub(crate) instances: SlotMap<DomainId, DomainInstance>,
    index: FxHashMap<Key, DomainId>,
}

impl DomainRegistry {
    pub(crate) fn len(&self) -> usize {
        self.instances.len()
    }
}

/// Declaration surface handed to a domain's build function
pub struct DomainBuilder<'rt> {
    runtime: &'rt mut Runtime,
    domain: DomainId,
    name: Arc<str>,
    arg: ArgKey,
}

impl<'rt> DomainBuilder<'rt> {
    /// Name of the domain being built
    pub fn name(&self) -> &str {
        &self.name
    }

    fn entity_key(&mut self, kind: EntityKind, name: &str) -> Key {
        let key = Key::new(kind, format!("{}.{}", self.name, name), self.arg.clone());
        if let Some(instance) = self.runtime.domains.instances.get_mut(self.domain) {
            if !instance.names.insert(key.clone()) {
                tracing::warn!(entity = %key, "entity declared twice in the same domain");
            }
        }
        key
    }

    fn instance(&mut self) -> Option<&mut DomainInstance> {
        self.runtime.domains.instances.get_mut(self.domain)
    }

    /// Declare a state cell with a default value
    pub fn state<T: Value + Clone>(&mut self, name: &str, default: T) -> State<T> {
        let key = self.entity_key(EntityKind::State, name);
        let value: SharedValue = Arc::new(default);
        let revision = self.runtime.revision;
        let id = self
            .runtime
            .states
            .insert(StateCell::new(key.clone(), Arc::clone(&value), revision));
        if let Some(instance) = self.instance() {
            instance.states.push(id);
        }

        self.runtime.record(|| {
            InspectorRecord::State(StateRecord {
                phase: StatePhase::Created,
                key,
                value,
                version: 0,
            })
        });
        State::from_id(id)
    }

    /// Declare a query computed from states and other queries
    pub fn query<A, T, F>(&mut self, name: &str, compute: F) -> Query<A, T>
    where
        A: Argument,
        T: Value + Clone,
        F: Fn(&mut QueryContext<'_>, &A) -> Result<T> + Send + Sync + 'static,
    {
        let key = self.entity_key(EntityKind::Query, name);
        let mismatch = key.clone();
        let erased: Arc<ComputeFn> = Arc::new(
            move |ctx: &mut QueryContext<'_>, arg: &ArgKey| -> Result<SharedValue> {
                let arg = arg
                    .downcast_ref::<A>()
                    .ok_or_else(|| StoreError::TypeMismatch {
                        key: mismatch.clone(),
                    })?;
                let value: SharedValue = Arc::new(compute(ctx, arg)?);
                Ok(value)
            },
        );

        let id = self.runtime.query_defs.insert(QueryDef {
            key,
            domain: self.domain,
            compute: erased,
            instances: FxHashMap::default(),
        });
        if let Some(instance) = self.instance() {
            instance.queries.push(id);
        }
        Query::from_def(id)
    }

    /// Declare a command producing effects from a snapshot and an input
    pub fn command<I, F>(&mut self, name: &str, run: F) -> Command<I>
    where
        I: Data + Clone,
        F: Fn(&mut CommandContext<'_>, I) -> anyhow::Result<Vec<Effect>> + Send + Sync + 'static,
    {
        let key = self.entity_key(EntityKind::Command, name);
        let mismatch = key.clone();
        let erased: Arc<EffectFn> = Arc::new(
            move |ctx: &mut CommandContext<'_>, input: &dyn Data| -> anyhow::Result<Vec<Effect>> {
                let input = input
                    .as_any()
                    .downcast_ref::<I>()
                    .cloned()
                    .ok_or_else(|| StoreError::TypeMismatch {
                        key: mismatch.clone(),
                    })?;
                run(ctx, input)
            },
        );

        let id = self
            .runtime
            .commands
            .insert(CommandDef { key, run: erased });
        if let Some(instance) = self.instance() {
            instance.commands.push(id);
        }
        Command::from_id(id)
    }

    /// Declare an event
    pub fn event<P: Data>(&mut self, name: &str) -> Event<P> {
        let key = self.entity_key(EntityKind::Event, name);
        let id = self.runtime.events.insert(EventDef::new(key, self.domain));
        if let Some(instance) = self.instance() {
            instance.events.push(id);
        }
        Event::from_id(id)
    }

    /// Resolve an external capability, falling back to its default
    pub fn get_extern<T: Clone + Send + Sync + 'static>(&mut self, ext: &Extern<T>) -> T {
        self.runtime.resolve_extern(ext)
    }

    /// Depend on another domain; it stays alive at least as long as this one
    pub fn use_domain<B, P>(&mut self, def: &DomainDef<B, P>, arg: B) -> Result<P>
    where
        B: Argument,
        P: Clone + Send + Sync + 'static,
    {
        let (child, output) = self.runtime.get_domain(def, arg)?;
        self.runtime.retain_domain(child);
        if let Some(instance) = self.instance() {
            instance.children.push(child);
        }
        Ok(output)
    }
}

impl Runtime {
    /// Return the cached instance for `(def, arg)`, building it on first use
    pub(crate) fn get_domain<A, O>(&mut self, def: &DomainDef<A, O>, arg: A) -> Result<(DomainId, O)>
    where
        A: Argument,
        O: Clone + Send + Sync + 'static,
    {
        let key = def.key(arg);
        if let Some(&id) = self.domains.index.get(&key) {
            let output = self
                .domains
                .instances
                .get(id)
                .and_then(|instance| instance.output.as_ref())
                .ok_or_else(|| StoreError::CyclicDomain { key: key.clone() })?;
            let output = output
                .downcast_ref::<O>()
                .cloned()
                .ok_or(StoreError::TypeMismatch { key })?;
            return Ok((id, output));
        }

        let id = self.domains.instances.insert(DomainInstance::new(key.clone()));
        self.domains.index.insert(key.clone(), id);

        let arg = key.arg().clone();
        let result = match arg.downcast_ref::<A>() {
            Some(typed) => {
                let mut builder = DomainBuilder {
                    runtime: &mut *self,
                    domain: id,
                    name: Arc::clone(&def.name),
                    arg: arg.clone(),
                };
                (def.build)(&mut builder, typed)
            }
            None => Err(StoreError::TypeMismatch { key: key.clone() }),
        };

        match result {
            Ok(output) => {
                if let Some(instance) = self.domains.instances.get_mut(id) {
                    instance.output = Some(Arc::new(output.clone()));
                }
                tracing::debug!(domain = %key, "domain created");
                self.record(|| {
                    InspectorRecord::Domain(DomainRecord {
                        phase: DomainPhase::Created,
                        key,
                    })
                });
                Ok((id, output))
            }
            Err(err) => {
                tracing::debug!(domain = %key, error = %err, "domain build failed");
                self.teardown_domain(id);
                Err(err)
            }
        }
    }

    /// Keep an instance alive until `destroy` regardless of its count
    pub(crate) fn pin_domain(&mut self, id: DomainId) {
        if let Some(instance) = self.domains.instances.get_mut(id) {
            instance.pinned = true;
        }
    }

    pub(crate) fn retain_domain(&mut self, id: DomainId) {
        if let Some(instance) = self.domains.instances.get_mut(id) {
            instance.ref_count += 1;
        }
    }

    /// Drop one reference; the last one tears the instance down
    pub(crate) fn release_domain(&mut self, id: DomainId) {
        let Some(instance) = self.domains.instances.get_mut(id) else {
            return;
        };
        instance.ref_count = instance.ref_count.saturating_sub(1);
        if instance.ref_count == 0 && !instance.pinned {
            self.teardown_domain(id);
        }
    }

    /// Remove an instance and everything it owns, then release its children
    pub(crate) fn teardown_domain(&mut self, id: DomainId) {
        let Some(instance) = self.domains.instances.remove(id) else {
            return;
        };
        if self.domains.index.get(&instance.key) == Some(&id) {
            self.domains.index.remove(&instance.key);
        }

        for def in instance.queries {
            if let Some(def) = self.query_defs.remove(def) {
                for (_, query) in def.instances {
                    self.remove_query(query);
                }
            }
        }
        for state in instance.states {
            if let Some(cell) = self.states.remove(state) {
                self.record(|| {
                    InspectorRecord::State(StateRecord {
                        phase: StatePhase::Destroyed,
                        key: cell.key,
                        value: cell.value,
                        version: cell.version,
                    })
                });
            }
        }
        for command in instance.commands {
            self.commands.remove(command);
        }
        for event in instance.events {
            if let Some(event) = self.events.remove(event) {
                for listener in event.listeners.iter() {
                    listener.deactivate();
                }
            }
        }

        tracing::debug!(domain = %instance.key, "domain torn down");
        let key = instance.key;
        self.record(|| {
            InspectorRecord::Domain(DomainRecord {
                phase: DomainPhase::Destroyed,
                key,
            })
        });

        for child in instance.children {
            self.release_domain(child);
        }
    }
}
