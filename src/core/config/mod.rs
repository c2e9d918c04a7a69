use crate::core::dynarec::DEFAULT_ARENA_CAPACITY;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    Interpreter,
    Jit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub mode: ExecutionMode,
    pub log_level: String,
    /// Compiled-step capacity of the append-only code arena.
    pub arena_capacity: usize,
    /// Harness watchdog: a subtest running longer than this is killed.
    pub max_harness_cycles: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            mode: ExecutionMode::Jit,
            log_level: String::from("info"),
            arena_capacity: DEFAULT_ARENA_CAPACITY,
            max_harness_cycles: 100_000,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Config, String> {
        let text =
            fs::read_to_string(path).map_err(|e| format!("cannot read {:?}: {}", path, e))?;
        let config: Config =
            serde_yaml::from_str(&text).map_err(|e| format!("cannot parse {:?}: {}", path, e))?;
        info!("Loaded configuration from {:?}", path);
        Ok(config)
    }
}
