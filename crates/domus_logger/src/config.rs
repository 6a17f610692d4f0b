//! Logger configuration file handling

use domus_core::Source;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::{LoggerError, Result};

/// Which records to log and how much of them
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct LoggerConfig {
    /// Record sources to report
    #[serde(default = "default_include")]
    pub include: Vec<Source>,
    /// Include values and payloads in the output
    #[serde(default = "default_true")]
    pub values: bool,
}

fn default_include() -> Vec<Source> {
    Source::ALL.to_vec()
}

fn default_true() -> bool {
    true
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            include: default_include(),
            values: default_true(),
        }
    }
}

impl LoggerConfig {
    /// Parse a configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|source| LoggerError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Serialize to TOML string
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn includes(&self, source: Source) -> bool {
        self.include.contains(&source)
    }
}
