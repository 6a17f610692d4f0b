//! Domus Modules
//!
//! Reusable fragments for domain build functions. They are plain
//! compositions of [`DomainBuilder`](domus_core::DomainBuilder) calls and
//! can be declared several times in one domain under different names.
//!
//! ```rust
//! use domus_core::{DomainDef, Store};
//! use domus_modules::switch_module;
//!
//! let theme = DomainDef::new("Theme", |d, _: &()| Ok(switch_module(d, "Mode", "light")));
//!
//! let store = Store::new();
//! let mode = store.get_domain(&theme, ()).unwrap();
//! store.send(mode.switch_to, "dark").unwrap();
//! assert_eq!(store.query(mode.current, ()).unwrap(), "dark");
//! ```

pub mod list;
pub mod switch;

pub use list::{list_module, ListModule};
pub use switch::{switch_module, SwitchModule, Switched};
