//! Domus Core Runtime
//!
//! A domain-scoped reactive state engine:
//!
//! - **Domains**: named, argument-parameterized bundles of state, queries,
//!   commands and events, instantiated once per key and reference counted
//! - **Queries**: memoized derivations with dynamic dependency tracking and
//!   early cutoff
//! - **Commands**: pure effect functions; the store applies their effects as
//!   one batch and settles subscribers once
//! - **Events**: stateless broadcast channels
//!
//! # Example
//!
//! ```rust
//! use domus_core::{DomainDef, Store};
//! use std::sync::{Arc, Mutex};
//!
//! let counter = DomainDef::new("Counter", |d, _: &()| {
//!     let count = d.state("Count", 0i32);
//!     let doubled = d.query("Doubled", move |ctx, _: &()| Ok(ctx.get(count)? * 2));
//!     let increment = d.command("Increment", move |ctx, by: i32| {
//!         Ok(vec![count.set(ctx.get(count)? + by)])
//!     });
//!     Ok((doubled, increment))
//! });
//!
//! let store = Store::new();
//! let (doubled, increment) = store.get_domain(&counter, ()).unwrap();
//!
//! let seen = Arc::new(Mutex::new(Vec::new()));
//! let sink = Arc::clone(&seen);
//! let _subscription = store
//!     .subscribe_query(doubled, (), move |value: &i32| sink.lock().unwrap().push(*value))
//!     .unwrap();
//!
//! store.send(increment, 5).unwrap();
//! assert_eq!(*seen.lock().unwrap(), vec![10]);
//! ```

pub mod capability;
pub mod command;
pub mod config;
pub mod domain;
pub mod error;
pub mod event;
mod graph;
pub mod inspector;
pub mod key;
pub mod query;
mod runtime;
pub mod state;
pub mod store;
pub mod value;

pub use capability::{Extern, ExternImpl};
pub use command::{Command, CommandContext, CommandId, Effect};
pub use config::StoreConfig;
pub use domain::{DomainBuilder, DomainDef, DomainId};
pub use error::{Result, StoreError};
pub use event::{Event, EventId};
pub use inspector::{Inspector, InspectorRecord, Source};
pub use key::{key_of, Argument, EntityKind, Key};
pub use query::{Query, QueryContext};
pub use state::State;
pub use store::{Store, StoreBuilder, Subscription};
pub use value::{Data, Value};
