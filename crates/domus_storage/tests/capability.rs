//! Integration tests for resolving storage through a store

use domus_core::{DomainDef, Store, StoreError};
use domus_storage::{storage_extern, MemoryStorage, SharedStorage, Storage};
use pollster::block_on;
use pretty_assertions::assert_eq;
use std::sync::Arc;

fn prefs() -> DomainDef<(), (SharedStorage, domus_core::Query<(), String>)> {
    DomainDef::new("Prefs", |d, _: &()| {
        let storage = d.get_extern(&storage_extern());
        // hydrate from storage at build time; a missing backend means defaults
        let theme = match block_on(storage.get("theme")) {
            Ok(value) => value.unwrap_or_else(|| "light".to_string()),
            Err(StoreError::CapabilityNotImplemented(_)) => "light".to_string(),
            Err(err) => return Err(err),
        };
        let theme = d.state("Theme", theme);
        Ok((storage, d.query("Theme", move |ctx, _: &()| ctx.get(theme))))
    })
}

/// Test that domains see the failing default without an override
#[test]
fn test_default_capability() {
    let store = Store::new();
    let (storage, theme) = store.get_domain(&prefs(), ()).unwrap();
    assert_eq!(store.query(theme, ()).unwrap(), "light");

    let err = block_on(storage.set("theme", "dark".to_string())).unwrap_err();
    assert!(matches!(err, StoreError::CapabilityNotImplemented(_)), "{err}");
}

/// Test that a provided backend is shared with the domains of the store
#[test]
fn test_provided_capability() {
    let backend = Arc::new(MemoryStorage::new());
    block_on(backend.set("theme", "dark".to_string())).unwrap();

    let shared: SharedStorage = backend.clone();
    let store = Store::builder()
        .provide(storage_extern().provide(shared))
        .build();
    let (storage, theme) = store.get_domain(&prefs(), ()).unwrap();
    assert_eq!(store.query(theme, ()).unwrap(), "dark");

    block_on(storage.clear("theme")).unwrap();
    assert!(backend.is_empty());
}
