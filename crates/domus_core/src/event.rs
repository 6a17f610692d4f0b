//! Event bus
//!
//! Events are stateless broadcast channels. An emission is delivered
//! synchronously to the listeners registered at that moment, in
//! registration order; nothing is buffered or replayed.

use slotmap::new_key_type;
use smallvec::SmallVec;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::command::{Effect, EventEmission};
use crate::domain::DomainId;
use crate::error::{Result, StoreError};
use crate::inspector::{EventRecord, InspectorRecord};
use crate::key::Key;
use crate::runtime::{EventCallback, Listener, Notification, Runtime};
use crate::value::Data;

new_key_type! {
    /// Unique identifier for an event
    pub struct EventId;
}

/// An event declared by a domain instance
pub(crate) struct EventDef {
    pub(crate) key: Key,
    pub(crate) domain: DomainId,
    pub(crate) listeners: SmallVec<[Listener<EventCallback>; 2]>,
}

impl EventDef {
    pub(crate) fn new(key: Key, domain: DomainId) -> Self {
        Self {
            key,
            domain,
            listeners: SmallVec::new(),
        }
    }
}

/// Typed handle to an event
pub struct Event<P> {
    id: EventId,
    _marker: PhantomData<fn(P)>,
}

impl<P> Event<P> {
    pub(crate) fn from_id(id: EventId) -> Self {
        Self {
            id,
            _marker: PhantomData,
        }
    }

    pub fn id(&self) -> EventId {
        self.id
    }
}

impl<P: Data> Event<P> {
    /// An effect emitting `payload` once the batch's state writes are applied
    pub fn emit(self, payload: P) -> Effect {
        Effect::EventEmission(EventEmission::new(self.id, Arc::new(payload)))
    }
}

impl<P> Clone for Event<P> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<P> Copy for Event<P> {}

impl<P> std::fmt::Debug for Event<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Event").field(&self.id).finish()
    }
}

impl Runtime {
    /// Snapshot the listeners of an emission for delivery
    pub(crate) fn dispatch_event(&mut self, emission: EventEmission) -> Result<Notification> {
        let def = self
            .events
            .get(emission.event)
            .ok_or_else(|| StoreError::unknown(format!("{:?}", emission.event)))?;
        let listeners: Vec<_> = def.listeners.iter().cloned().collect();
        let key = def.key.clone();

        tracing::trace!(event = %key, listeners = listeners.len(), "event emitted");
        let payload = emission.payload;
        self.record(|| {
            InspectorRecord::Event(EventRecord {
                key,
                payload: Arc::clone(&payload),
            })
        });
        Ok(Notification::Event { listeners, payload })
    }
}
