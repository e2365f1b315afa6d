use std::path::PathBuf;

use log::warn;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use toml::*;

use crate::timeq::Tick;

pub trait Config: DeserializeOwned + Default {
    fn from_section(section: Option<&Value>) -> Self {
        match section {
            Some(value) => value.clone().try_into().expect("cannot deserialize config"),
            None => {
                warn!("config section not found");
                Self::default()
            }
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SimConfig {
    /// Give up after this many ticks.
    pub timeout: Tick,
    pub tick_step: Tick,
    /// Wire delay added on every hop between components.
    pub link_latency: Tick,
    pub log_level: u64,
    pub report_json: Option<PathBuf>,
}

impl Config for SimConfig {}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            timeout: 100_000_000,
            tick_step: 500,
            link_latency: 0,
            log_level: 0,
            report_json: None,
        }
    }
}

impl SimConfig {
    pub fn ensure_valid(&self) {
        assert!(self.tick_step > 0, "tick_step must be > 0");
        assert!(self.timeout > 0, "timeout must be > 0");
    }
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct MemoryConfig {
    pub latency: Tick,
    /// Responses the endpoint can hold before it pushes back.
    pub queue_capacity: usize,
}

impl Config for MemoryConfig {}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            latency: 30_000,
            queue_capacity: 32,
        }
    }
}
