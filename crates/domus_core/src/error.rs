//! Store error types

use thiserror::Error;

use crate::key::Key;

/// Errors surfaced by store operations
#[derive(Error, Debug)]
pub enum StoreError {
    /// An entity was referenced that its domain does not (or no longer) declare
    #[error("Unknown key: {0}")]
    UnknownKey(String),

    /// A query computation transitively read itself
    #[error("Re-entrant evaluation of {key}")]
    ReentrantEvaluation { key: Key },

    /// A command's effect function failed; none of its effects were applied
    #[error("Effect function of {key} failed: {source}")]
    EffectFunctionFailure {
        key: Key,
        #[source]
        source: anyhow::Error,
    },

    /// A capability was used without an implementation being provided
    #[error("Capability not implemented: {0}")]
    CapabilityNotImplemented(String),

    /// A stored value did not have the type its handle expects
    #[error("Type mismatch for {key}")]
    TypeMismatch { key: Key },

    /// A domain requested itself while being built
    #[error("Cyclic domain dependency on {key}")]
    CyclicDomain { key: Key },

    /// Nested commands went deeper than the configured limit
    #[error("Command nesting exceeded {limit} levels at {key}")]
    CommandDepthExceeded { key: Key, limit: usize },

    /// The store was destroyed
    #[error("Store has been destroyed")]
    Destroyed,
}

impl StoreError {
    pub(crate) fn unknown(what: impl std::fmt::Display) -> Self {
        StoreError::UnknownKey(what.to_string())
    }
}

/// Result type for store operations
pub type Result<T> = std::result::Result<T, StoreError>;
