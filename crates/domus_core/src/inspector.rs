//! Inspector hooks
//!
//! Inspectors are passive observers registered at store construction. They
//! receive one [`InspectorRecord`] per lifecycle step, in the order the steps
//! happened, before any subscriber of the same operation is notified.
//! Inspectors must not mutate the store.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::key::Key;
use crate::value::{SharedData, SharedValue};

/// Which part of the store produced a record
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    State,
    Query,
    Domain,
    Event,
    Command,
}

impl Source {
    pub const ALL: [Source; 5] = [
        Source::State,
        Source::Query,
        Source::Domain,
        Source::Event,
        Source::Command,
    ];
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Source::State => "state",
            Source::Query => "query",
            Source::Domain => "domain",
            Source::Event => "event",
            Source::Command => "command",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatePhase {
    Created,
    Updated,
    Destroyed,
}

#[derive(Clone, Debug)]
pub struct StateRecord {
    pub phase: StatePhase,
    pub key: Key,
    pub value: SharedValue,
    pub version: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueryPhase {
    Created,
    /// A dependency changed; the value will be recomputed on next read
    Dirty,
    /// Verified up to date without recomputation
    Clean,
    /// Recomputed
    Evaluated { changed: bool },
    Subscribed,
    Unsubscribed,
    Destroyed,
}

#[derive(Clone, Debug)]
pub struct QueryRecord {
    pub phase: QueryPhase,
    pub key: Key,
    pub value: Option<SharedValue>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DomainPhase {
    Created,
    Destroyed,
}

#[derive(Clone, Debug)]
pub struct DomainRecord {
    pub phase: DomainPhase,
    pub key: Key,
}

#[derive(Clone, Debug)]
pub struct EventRecord {
    pub key: Key,
    pub payload: SharedData,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommandPhase {
    /// Before the effect function runs
    Dispatched,
    /// After every effect of the invocation was applied
    Applied { effects: usize },
    Failed { reason: String },
}

#[derive(Clone, Debug)]
pub struct CommandRecord {
    pub phase: CommandPhase,
    pub key: Key,
    pub input: SharedData,
}

/// A single lifecycle notification
#[derive(Clone, Debug)]
pub enum InspectorRecord {
    State(StateRecord),
    Query(QueryRecord),
    Domain(DomainRecord),
    Event(EventRecord),
    Command(CommandRecord),
}

impl InspectorRecord {
    pub fn source(&self) -> Source {
        match self {
            InspectorRecord::State(_) => Source::State,
            InspectorRecord::Query(_) => Source::Query,
            InspectorRecord::Domain(_) => Source::Domain,
            InspectorRecord::Event(_) => Source::Event,
            InspectorRecord::Command(_) => Source::Command,
        }
    }

    pub fn key(&self) -> &Key {
        match self {
            InspectorRecord::State(record) => &record.key,
            InspectorRecord::Query(record) => &record.key,
            InspectorRecord::Domain(record) => &record.key,
            InspectorRecord::Event(record) => &record.key,
            InspectorRecord::Command(record) => &record.key,
        }
    }
}

/// A passive store observer
pub trait Inspector: Send + Sync {
    fn inspect(&self, record: &InspectorRecord);
}

impl<F> Inspector for F
where
    F: Fn(&InspectorRecord) + Send + Sync,
{
    fn inspect(&self, record: &InspectorRecord) {
        self(record)
    }
}
