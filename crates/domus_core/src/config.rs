//! Store configuration

use serde::{Deserialize, Serialize};

/// Default bound on nested command invocations
pub const DEFAULT_MAX_COMMAND_DEPTH: usize = 64;

/// Settings fixed at store construction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Name used in log output
    pub name: String,
    /// Maximum depth of nested commands within one batch
    pub max_command_depth: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            name: "store".to_string(),
            max_command_depth: DEFAULT_MAX_COMMAND_DEPTH,
        }
    }
}
