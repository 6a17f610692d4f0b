//! State cells
//!
//! A state cell is a versioned value owned by one domain instance. Readers
//! go through a [`QueryContext`](crate::query::QueryContext) or
//! [`CommandContext`](crate::command::CommandContext); the only writer is the
//! effect interpreter, fed by [`State::set`] effects.

use rustc_hash::FxHashSet;
use slotmap::new_key_type;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::command::{Effect, StateWrite};
use crate::key::Key;
use crate::query::QueryId;
use crate::value::{SharedValue, Value};

new_key_type! {
    /// Unique identifier for a state cell
    pub struct StateId;
}

/// Storage for a single state cell
pub(crate) struct StateCell {
    pub(crate) key: Key,
    pub(crate) value: SharedValue,
    /// Bumped on every applied write
    pub(crate) version: u64,
    /// Store revision of the last write that changed the value
    pub(crate) changed_at: u64,
    /// Query instances that read this cell during their last evaluation
    pub(crate) dependents: FxHashSet<QueryId>,
}

impl StateCell {
    pub(crate) fn new(key: Key, value: SharedValue, revision: u64) -> Self {
        Self {
            key,
            value,
            version: 0,
            changed_at: revision,
            dependents: FxHashSet::default(),
        }
    }
}

/// Typed handle to a state cell
pub struct State<T> {
    id: StateId,
    _marker: PhantomData<fn() -> T>,
}

impl<T> State<T> {
    pub(crate) fn from_id(id: StateId) -> Self {
        Self {
            id,
            _marker: PhantomData,
        }
    }

    pub fn id(&self) -> StateId {
        self.id
    }
}

impl<T: Value> State<T> {
    /// An effect replacing the cell's value
    pub fn set(self, value: T) -> Effect {
        Effect::StateWrite(StateWrite {
            state: self.id,
            value: Arc::new(value),
        })
    }
}

impl<T> Clone for State<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for State<T> {}

impl<T> std::fmt::Debug for State<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("State").field(&self.id).finish()
    }
}
