use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::utils::error::AnalyzerResult;

/// Default number of conversations kept in the top talkers table
pub const DEFAULT_TOP_CONVERSATIONS: usize = 20;

/// Default number of DNS query names reported
pub const DEFAULT_TOP_DNS: usize = 50;

/// Analyzer configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Maximum number of conversations in the report
    pub top_conversations_limit: usize,

    /// Maximum number of DNS query names in the report
    pub top_dns_limit: usize,

    /// Fail with `UnsupportedLinkType` instead of counting undecodable frames as "Other"
    pub strict_link_type: bool,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            top_conversations_limit: DEFAULT_TOP_CONVERSATIONS,
            top_dns_limit: DEFAULT_TOP_DNS,
            strict_link_type: false,
        }
    }
}

impl AnalyzerConfig {
    /// Load a configuration from a JSON file; missing fields take their defaults
    pub fn from_file<P: AsRef<Path>>(path: P) -> AnalyzerResult<Self> {
        let contents = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    pub fn with_top_conversations(mut self, limit: usize) -> Self {
        self.top_conversations_limit = limit;
        self
    }

    pub fn with_top_dns(mut self, limit: usize) -> Self {
        self.top_dns_limit = limit;
        self
    }

    pub fn with_strict_link_type(mut self, strict: bool) -> Self {
        self.strict_link_type = strict;
        self
    }
}
