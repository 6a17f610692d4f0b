//! Dependency graph
//!
//! Edges run from a query instance to the state cells and query instances it
//! read during its last evaluation (`deps`), mirrored by reverse `dependents`
//! sets on the read side. Dependencies are replaced wholesale after every
//! evaluation.

use indexmap::IndexSet;
use rustc_hash::{FxBuildHasher, FxHashSet};
use std::collections::VecDeque;

use crate::inspector::{InspectorRecord, QueryPhase, QueryRecord};
use crate::query::{QueryId, QueryStatus};
use crate::runtime::Runtime;
use crate::state::StateId;

/// A node that a query can depend on
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) enum Node {
    State(StateId),
    Query(QueryId),
}

/// Dependencies in the order they were first read
pub(crate) type DependencySet = IndexSet<Node, FxBuildHasher>;

impl Runtime {
    /// Mark every transitive dependent of `root` dirty, breadth-first.
    ///
    /// Newly dirtied instances are appended to the pending settle list in
    /// the order they were reached. An observed instance that is still dirty
    /// because its last refresh failed is queued again.
    pub(crate) fn invalidate(&mut self, root: Node) {
        let mut queue: VecDeque<QueryId> = self.dependents_of(root).into();
        let mut seen = FxHashSet::default();
        while let Some(id) = queue.pop_front() {
            if !seen.insert(id) {
                continue;
            }
            let Some(query) = self.queries.get_mut(id) else {
                continue;
            };
            queue.extend(query.dependents.iter().copied());
            match query.status {
                QueryStatus::Clean => {
                    query.status = QueryStatus::Dirty;
                    let key = query.key.clone();
                    self.dirty.push(id);
                    self.record(|| {
                        InspectorRecord::Query(QueryRecord {
                            phase: QueryPhase::Dirty,
                            key,
                            value: None,
                        })
                    });
                }
                QueryStatus::Dirty if !query.listeners.is_empty() => {
                    if !self.dirty.contains(&id) {
                        self.dirty.push(id);
                    }
                }
                _ => {}
            }
        }
    }

    /// Replace the dependencies of `id`, relinking reverse edges
    pub(crate) fn set_dependencies(&mut self, id: QueryId, deps: DependencySet) {
        let Some(query) = self.queries.get_mut(id) else {
            return;
        };
        let old = std::mem::replace(&mut query.deps, deps);
        let new: Vec<Node> = query.deps.iter().copied().collect();

        for node in old.iter() {
            if !new.contains(node) {
                self.unlink(*node, id);
            }
        }
        for node in new {
            if !old.contains(&node) {
                self.link(node, id);
            }
        }
    }

    /// Drop the reverse edges of a query that is going away
    pub(crate) fn detach(&mut self, id: QueryId, deps: &DependencySet) {
        for node in deps.iter() {
            self.unlink(*node, id);
        }
    }

    fn dependents_of(&self, node: Node) -> Vec<QueryId> {
        match node {
            Node::State(id) => self
                .states
                .get(id)
                .map(|cell| cell.dependents.iter().copied().collect())
                .unwrap_or_default(),
            Node::Query(id) => self
                .queries
                .get(id)
                .map(|query| query.dependents.iter().copied().collect())
                .unwrap_or_default(),
        }
    }

    fn link(&mut self, node: Node, dependent: QueryId) {
        match node {
            Node::State(id) => {
                if let Some(cell) = self.states.get_mut(id) {
                    cell.dependents.insert(dependent);
                }
            }
            Node::Query(id) => {
                if let Some(query) = self.queries.get_mut(id) {
                    query.dependents.insert(dependent);
                }
            }
        }
    }

    fn unlink(&mut self, node: Node, dependent: QueryId) {
        match node {
            Node::State(id) => {
                if let Some(cell) = self.states.get_mut(id) {
                    cell.dependents.remove(&dependent);
                }
            }
            Node::Query(id) => {
                if let Some(query) = self.queries.get_mut(id) {
                    query.dependents.remove(&dependent);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::config::StoreConfig;
    use crate::domain::DomainDef;
    use crate::key::ArgKey;
    use crate::query::QueryId;
    use crate::runtime::Runtime;
    use std::sync::Arc;

    #[test]
    fn test_invalidation_reaches_producers_before_consumers() {
        let mut runtime = Runtime::new(StoreConfig::default(), false);
        let def = DomainDef::new("Chain", |d, _: &()| {
            let source = d.state("Source", 1i32);
            let first = d.query("First", move |ctx, _: &()| ctx.get(source));
            let second = d.query("Second", move |ctx, _: &()| Ok(ctx.query(first, ())? + 1));
            let sibling = d.query("Sibling", move |ctx, _: &()| Ok(ctx.get(source)? * 10));
            Ok((source, first, second, sibling))
        });
        let (_, (source, first, second, sibling)) = runtime.get_domain(&def, ()).unwrap();

        let second = runtime.read_query(second.id(), ArgKey::unit()).unwrap().id;
        let sibling = runtime.read_query(sibling.id(), ArgKey::unit()).unwrap().id;
        let first = runtime.read_query(first.id(), ArgKey::unit()).unwrap().id;

        runtime.write_state(source.id(), Arc::new(2i32)).unwrap();
        let dirty = runtime.dirty.clone();
        assert_eq!(dirty.len(), 3);
        assert!(dirty.contains(&sibling));
        let position = |id: QueryId| dirty.iter().position(|d| *d == id).unwrap();
        assert!(position(first) < position(second));
    }

    #[test]
    fn test_stale_edges_are_dropped() {
        let mut runtime = Runtime::new(StoreConfig::default(), false);
        let def = DomainDef::new("Branch", |d, _: &()| {
            let flag = d.state("Flag", true);
            let left = d.state("Left", 1i32);
            let right = d.state("Right", 2i32);
            let picked = d.query("Picked", move |ctx, _: &()| {
                if ctx.get(flag)? {
                    ctx.get(left)
                } else {
                    ctx.get(right)
                }
            });
            Ok((flag, left, right, picked))
        });
        let (_, (flag, left, right, picked)) = runtime.get_domain(&def, ()).unwrap();
        let picked = runtime.read_query(picked.id(), ArgKey::unit()).unwrap().id;
        assert!(runtime.states[left.id()].dependents.contains(&picked));
        assert!(!runtime.states[right.id()].dependents.contains(&picked));

        runtime.write_state(flag.id(), Arc::new(false)).unwrap();
        runtime.refresh(picked).unwrap();
        assert!(!runtime.states[left.id()].dependents.contains(&picked));
        assert!(runtime.states[right.id()].dependents.contains(&picked));
        assert_eq!(runtime.queries[picked].deps.len(), 2);
    }
}
