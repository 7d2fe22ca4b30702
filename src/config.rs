//! Runtime configuration loaded from ~/.voltage/runtime.yaml.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::jit::BackendKind;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Frames per second handed to units through `sampleRate()`.
    #[serde(default = "RuntimeConfig::default_sample_rate")]
    pub sample_rate: f32,
    /// Code generator backend. `jit` falls back to the interpreter when the
    /// host is not supported.
    #[serde(default)]
    pub backend: BackendKind,
    /// Capacity of the command ring from the editor to the processor.
    #[serde(default = "RuntimeConfig::default_capacity")]
    pub command_capacity: usize,
    /// Capacity of the update ring from the processor to the editor.
    #[serde(default = "RuntimeConfig::default_capacity")]
    pub update_capacity: usize,
    /// Filter used when `RUST_LOG` is not set.
    #[serde(default = "RuntimeConfig::default_log_filter")]
    pub log_filter: String,
}

impl RuntimeConfig {
    /// Load config from the standard path (~/.voltage/runtime.yaml).
    /// Returns None if the file doesn't exist or doesn't parse.
    pub fn load() -> Option<Self> {
        let home = dirs::home_dir()?;
        Self::load_from(home.join(".voltage").join("runtime.yaml"))
    }

    pub fn load_from(path: impl AsRef<Path>) -> Option<Self> {
        let content = std::fs::read_to_string(path).ok()?;
        serde_yaml::from_str(&content).ok()
    }

    pub fn load_or_default() -> Self {
        Self::load().unwrap_or_default()
    }

    fn default_sample_rate() -> f32 {
        44100.0
    }

    fn default_capacity() -> usize {
        1024
    }

    fn default_log_filter() -> String {
        "info".to_string()
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            sample_rate: Self::default_sample_rate(),
            backend: BackendKind::default(),
            command_capacity: Self::default_capacity(),
            update_capacity: Self::default_capacity(),
            log_filter: Self::default_log_filter(),
        }
    }
}
