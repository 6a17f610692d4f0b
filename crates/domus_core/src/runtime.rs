//! Store runtime
//!
//! Everything mutable in a store lives in one [`Runtime`], guarded by the
//! store's lock. Listener callbacks never run while the runtime is borrowed:
//! operations return [`Notification`]s and buffered inspector records, and
//! the store delivers them after releasing the lock.

use rustc_hash::FxHashMap;
use slotmap::SlotMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::command::{CommandDef, CommandId, EventEmission};
use crate::config::StoreConfig;
use crate::domain::{DomainId, DomainRegistry};
use crate::error::{Result, StoreError};
use crate::event::{EventDef, EventId};
use crate::graph::Node;
use crate::inspector::{InspectorRecord, QueryPhase, QueryRecord, StatePhase, StateRecord};
use crate::key::{ArgKey, Key};
use crate::query::{QueryDef, QueryDefId, QueryId, QueryInstance};
use crate::state::{StateCell, StateId};
use crate::value::{Data, SharedData, SharedValue, Value};

pub(crate) type ListenerId = u64;
pub(crate) type QueryCallback = dyn Fn(&dyn Value) + Send + Sync;
pub(crate) type EventCallback = dyn Fn(&dyn Data) + Send + Sync;

/// A registered callback plus the flag its subscription flips on cancel
pub(crate) struct Listener<F: ?Sized> {
    pub(crate) id: ListenerId,
    pub(crate) active: Arc<AtomicBool>,
    pub(crate) callback: Arc<F>,
}

impl<F: ?Sized> Listener<F> {
    pub(crate) fn new(id: ListenerId, callback: Arc<F>) -> Self {
        Self {
            id,
            active: Arc::new(AtomicBool::new(true)),
            callback,
        }
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub(crate) fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }
}

impl<F: ?Sized> Clone for Listener<F> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            active: Arc::clone(&self.active),
            callback: Arc::clone(&self.callback),
        }
    }
}

/// Callbacks to run once the runtime lock is released
pub(crate) enum Notification {
    Query {
        listeners: Vec<Listener<QueryCallback>>,
        value: SharedValue,
    },
    Event {
        listeners: Vec<Listener<EventCallback>>,
        payload: SharedData,
    },
}

impl Notification {
    pub(crate) fn deliver(self) {
        match self {
            Notification::Query { listeners, value } => {
                for listener in listeners {
                    if listener.is_active() {
                        (listener.callback)(&*value);
                    }
                }
            }
            Notification::Event { listeners, payload } => {
                for listener in listeners {
                    if listener.is_active() {
                        (listener.callback)(&*payload);
                    }
                }
            }
        }
    }
}

/// What a subscription holds on to
#[derive(Debug)]
pub(crate) enum Target {
    Query {
        query: QueryId,
        listener: ListenerId,
        domain: DomainId,
    },
    Event {
        event: EventId,
        listener: ListenerId,
        domain: DomainId,
    },
    Domain(DomainId),
}

/// Effects of one external call waiting for the settle step
#[derive(Default)]
pub(crate) struct Batch {
    pub(crate) events: Vec<EventEmission>,
}

pub(crate) struct Runtime {
    pub(crate) config: StoreConfig,
    pub(crate) states: SlotMap<StateId, StateCell>,
    pub(crate) query_defs: SlotMap<QueryDefId, QueryDef>,
    pub(crate) queries: SlotMap<QueryId, QueryInstance>,
    pub(crate) commands: SlotMap<CommandId, CommandDef>,
    pub(crate) events: SlotMap<EventId, EventDef>,
    pub(crate) domains: DomainRegistry,
    pub(crate) externs: FxHashMap<Key, Arc<dyn std::any::Any + Send + Sync>>,
    /// Bumped by every write that changes a value
    pub(crate) revision: u64,
    /// Instances dirtied since the last settle, in invalidation order
    pub(crate) dirty: Vec<QueryId>,
    records: Vec<InspectorRecord>,
    inspecting: bool,
    next_listener: ListenerId,
}

impl Runtime {
    pub(crate) fn new(config: StoreConfig, inspecting: bool) -> Self {
        Self {
            config,
            states: SlotMap::with_key(),
            query_defs: SlotMap::with_key(),
            queries: SlotMap::with_key(),
            commands: SlotMap::with_key(),
            events: SlotMap::with_key(),
            domains: DomainRegistry::default(),
            externs: FxHashMap::default(),
            revision: 0,
            dirty: Vec::new(),
            records: Vec::new(),
            inspecting,
            next_listener: 0,
        }
    }

    /// Buffer an inspector record; skipped entirely without inspectors
    pub(crate) fn record(&mut self, record: impl FnOnce() -> InspectorRecord) {
        if self.inspecting {
            self.records.push(record());
        }
    }

    pub(crate) fn take_records(&mut self) -> Vec<InspectorRecord> {
        std::mem::take(&mut self.records)
    }

    pub(crate) fn stop_inspecting(&mut self) {
        self.inspecting = false;
    }

    fn next_listener_id(&mut self) -> ListenerId {
        self.next_listener += 1;
        self.next_listener
    }

    /// Apply a state write; equal values are ignored
    pub(crate) fn write_state(&mut self, id: StateId, value: SharedValue) -> Result<()> {
        let revision = self.revision + 1;
        let cell = self
            .states
            .get_mut(id)
            .ok_or_else(|| StoreError::unknown(format!("{id:?}")))?;
        if cell.value.dyn_eq(&*value) {
            return Ok(());
        }

        self.revision = revision;
        cell.value = value;
        cell.version += 1;
        cell.changed_at = revision;

        let key = cell.key.clone();
        let value = Arc::clone(&cell.value);
        let version = cell.version;
        self.record(|| {
            InspectorRecord::State(StateRecord {
                phase: StatePhase::Updated,
                key,
                value,
                version,
            })
        });

        self.invalidate(Node::State(id));
        Ok(())
    }

    /// Deliver held-back events, then recompute every dirty instance that
    /// has listeners and collect a notification for each one whose value
    /// changed.
    ///
    /// Failures do not stop the settle; the first one is returned.
    pub(crate) fn settle(&mut self, batch: Batch) -> (Vec<Notification>, Result<()>) {
        let mut notifications = Vec::new();
        let mut failure = None;

        for emission in batch.events {
            match self.dispatch_event(emission) {
                Ok(notification) => notifications.push(notification),
                Err(err) => {
                    failure.get_or_insert(err);
                }
            }
        }

        let dirty = std::mem::take(&mut self.dirty);
        for id in dirty {
            let observed = self
                .queries
                .get(id)
                .is_some_and(|query| !query.listeners.is_empty());
            if !observed {
                continue;
            }
            if let Err(err) = self.refresh(id) {
                failure.get_or_insert(err);
                continue;
            }

            let Some(query) = self.queries.get_mut(id) else {
                continue;
            };
            if query.changed_at <= query.notified_at {
                continue;
            }
            query.notified_at = query.changed_at;
            if let Some(value) = query.value.clone() {
                notifications.push(Notification::Query {
                    listeners: query.listeners.iter().cloned().collect(),
                    value,
                });
            }
        }

        (notifications, failure.map_or(Ok(()), Err))
    }

    /// Register a query listener, evaluating the instance first
    pub(crate) fn subscribe_query(
        &mut self,
        def: QueryDefId,
        arg: ArgKey,
        callback: Arc<QueryCallback>,
    ) -> Result<(Target, Arc<AtomicBool>)> {
        let read = self.read_query(def, arg)?;
        let domain = self
            .query_defs
            .get(def)
            .map(|def| def.domain)
            .ok_or_else(|| StoreError::unknown(&read.key))?;

        let listener = Listener::new(self.next_listener_id(), callback);
        let target = Target::Query {
            query: read.id,
            listener: listener.id,
            domain,
        };
        let active = Arc::clone(&listener.active);
        if let Some(query) = self.queries.get_mut(read.id) {
            query.notified_at = query.changed_at;
            query.listeners.push(listener);
        }
        self.retain_domain(domain);

        self.record(|| {
            InspectorRecord::Query(QueryRecord {
                phase: QueryPhase::Subscribed,
                key: read.key,
                value: Some(read.value),
            })
        });
        Ok((target, active))
    }

    /// Register an event listener
    pub(crate) fn subscribe_event(
        &mut self,
        event: EventId,
        callback: Arc<EventCallback>,
    ) -> Result<(Target, Arc<AtomicBool>)> {
        let id = self.next_listener_id();
        let def = self
            .events
            .get_mut(event)
            .ok_or_else(|| StoreError::unknown(format!("{event:?}")))?;

        let listener = Listener::new(id, callback);
        let active = Arc::clone(&listener.active);
        let domain = def.domain;
        def.listeners.push(listener);
        self.retain_domain(domain);

        Ok((
            Target::Event {
                event,
                listener: id,
                domain,
            },
            active,
        ))
    }

    /// Undo whatever a subscription acquired
    pub(crate) fn release(&mut self, target: Target) {
        match target {
            Target::Query {
                query,
                listener,
                domain,
            } => {
                if let Some(instance) = self.queries.get_mut(query) {
                    instance.listeners.retain(|l| l.id != listener);
                    let key = instance.key.clone();
                    let value = instance.value.clone();
                    self.record(|| {
                        InspectorRecord::Query(QueryRecord {
                            phase: QueryPhase::Unsubscribed,
                            key,
                            value,
                        })
                    });
                    self.collect_query(query);
                }
                self.release_domain(domain);
            }
            Target::Event {
                event,
                listener,
                domain,
            } => {
                if let Some(def) = self.events.get_mut(event) {
                    def.listeners.retain(|l| l.id != listener);
                }
                self.release_domain(domain);
            }
            Target::Domain(domain) => self.release_domain(domain),
        }
    }

    /// Tear down every domain regardless of reference counts
    pub(crate) fn destroy(&mut self) {
        let ids: Vec<DomainId> = self.domains.instances.keys().collect();
        for id in ids {
            self.teardown_domain(id);
        }
        self.dirty.clear();
        self.externs.clear();
    }
}
