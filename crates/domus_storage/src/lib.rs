//! Domus Storage
//!
//! The storage capability: an asynchronous key/value interface that
//! domains resolve through [`storage_extern`]. Without an override every
//! call fails with [`StoreError::CapabilityNotImplemented`]; hosts provide a
//! real backend at store construction.
//!
//! ```rust
//! use domus_core::{DomainDef, Store};
//! use domus_storage::{storage_extern, MemoryStorage, SharedStorage};
//! use std::sync::Arc;
//!
//! let def = DomainDef::new("Prefs", |d, _: &()| Ok(d.get_extern(&storage_extern())));
//!
//! let backend: SharedStorage = Arc::new(MemoryStorage::new());
//! let store = Store::builder()
//!     .provide(storage_extern().provide(backend))
//!     .build();
//!
//! let storage = store.get_domain(&def, ()).unwrap();
//! pollster::block_on(storage.set("theme", "dark".to_string())).unwrap();
//! assert_eq!(
//!     pollster::block_on(storage.get("theme")).unwrap().as_deref(),
//!     Some("dark")
//! );
//! ```

mod memory;

use async_trait::async_trait;
use domus_core::{Extern, Result, StoreError};
use std::sync::Arc;

pub use memory::MemoryStorage;

/// Name the storage capability is registered under
pub const STORAGE: &str = "Storage";

/// Asynchronous string key/value storage
#[async_trait]
pub trait Storage: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: String) -> Result<()>;

    async fn clear(&self, key: &str) -> Result<()>;
}

pub type SharedStorage = Arc<dyn Storage>;

/// The default backend: every call fails
#[derive(Debug, Clone, Copy, Default)]
pub struct Unimplemented;

fn unimplemented<T>(op: &str, key: &str) -> Result<T> {
    tracing::warn!(op, key, "storage used without an implementation");
    Err(StoreError::CapabilityNotImplemented(STORAGE.to_string()))
}

#[async_trait]
impl Storage for Unimplemented {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        unimplemented("get", key)
    }

    async fn set(&self, key: &str, _value: String) -> Result<()> {
        unimplemented("set", key)
    }

    async fn clear(&self, key: &str) -> Result<()> {
        unimplemented("clear", key)
    }
}

/// Declaration of the storage capability
pub fn storage_extern() -> Extern<SharedStorage> {
    let default: SharedStorage = Arc::new(Unimplemented);
    Extern::new(STORAGE, default)
}
