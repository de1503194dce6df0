//! Runtime configuration.
//!
//! Every field has a default, so partial configuration files are valid.
//! The `splitflow-data` crate loads this from RON, TOML or JSON.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitflowConfig {
    pub features: FeatureConfig,
    pub upgrade: UpgradeConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Weigh terminal consumers by their potential instead of one share each.
    pub respect_overclocking: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpgradeConfig {
    /// Log dropped save records at warn level instead of debug.
    pub show_warning_messages: bool,
}

impl Default for UpgradeConfig {
    fn default() -> Self {
        Self {
            show_warning_messages: true,
        }
    }
}
