//! External capabilities
//!
//! An [`Extern`] names an injected implementation of some outward-facing
//! interface (storage, clocks, transports) together with a default. Domains
//! resolve it at build time; the store can override the default at
//! construction with [`Extern::provide`].

use std::any::Any;
use std::sync::Arc;

use crate::key::{key_of, EntityKind, Key};
use crate::runtime::Runtime;

/// Declaration of an external capability
#[derive(Clone)]
pub struct Extern<T> {
    key: Key,
    default: T,
}

impl<T: Clone + Send + Sync + 'static> Extern<T> {
    pub fn new(name: &str, default: T) -> Self {
        Self {
            key: key_of(EntityKind::Extern, name, ()),
            default,
        }
    }

    pub fn key(&self) -> &Key {
        &self.key
    }

    /// Pair this capability with a real implementation for a store
    pub fn provide(&self, implementation: T) -> ExternImpl {
        ExternImpl {
            key: self.key.clone(),
            value: Arc::new(implementation),
        }
    }
}

/// An override registered on a store
pub struct ExternImpl {
    pub(crate) key: Key,
    pub(crate) value: Arc<dyn Any + Send + Sync>,
}

impl std::fmt::Debug for ExternImpl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExternImpl").field("key", &self.key).finish()
    }
}

impl Runtime {
    pub(crate) fn resolve_extern<T: Clone + Send + Sync + 'static>(&self, ext: &Extern<T>) -> T {
        let Some(provided) = self.externs.get(&ext.key) else {
            return ext.default.clone();
        };
        match provided.downcast_ref::<T>() {
            Some(value) => value.clone(),
            None => {
                tracing::warn!(capability = %ext.key, "provided implementation has the wrong type, using default");
                ext.default.clone()
            }
        }
    }
}
