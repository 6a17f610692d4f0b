//! Domus Logger
//!
//! An [`Inspector`](domus_core::Inspector) that reports store activity
//! through `tracing`. Records are emitted at debug level under the `domus`
//! target, one line each, filtered by [`LoggerConfig`].
//!
//! ```rust
//! use domus_core::Store;
//! use domus_logger::{LoggerConfig, TracingInspector};
//!
//! let config = LoggerConfig::from_toml(r#"include = ["command", "event"]"#).unwrap();
//! let store = Store::builder()
//!     .inspector(TracingInspector::new(config))
//!     .build();
//! # let _ = store;
//! ```

pub mod config;
pub mod error;
pub mod inspector;

pub use config::LoggerConfig;
pub use error::{LoggerError, Result};
pub use inspector::{describe, TracingInspector};
