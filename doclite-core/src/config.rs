// src/config.rs
// Engine-wide settings shared by every collection of a database

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Default bound on nested filters and aggregation expressions
pub const DEFAULT_MAX_EXPRESSION_DEPTH: usize = 32;

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum nesting of `$and`/`$or`/`$nor` filters and pipeline expressions
    pub max_expression_depth: usize,

    /// Separator used when generating index names (`author_1_published_year_-1`)
    pub index_name_separator: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            max_expression_depth: DEFAULT_MAX_EXPRESSION_DEPTH,
            index_name_separator: "_".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a config from JSON; missing keys fall back to defaults
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn with_max_expression_depth(mut self, depth: usize) -> Self {
        self.max_expression_depth = depth;
        self
    }

    pub fn with_index_name_separator(mut self, separator: impl Into<String>) -> Self {
        self.index_name_separator = separator.into();
        self
    }
}
