//! Configuration for the host and worker processes.
//!
//! Both read an optional TOML file. Every field has a default, so an absent
//! file (or an empty one) yields a working configuration.

use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::Result;

/// Extension of the template documents the worker tracks.
pub const DEFAULT_TEMPLATE_EXTENSION: &str = "cshtml";

/// Protocol version announced to every new connection.
pub const PROTOCOL_VERSION: i32 = 1;

const DEFAULT_MAX_FRAME_LEN: usize = 64 * 1024 * 1024;
const DEFAULT_TICK_INTERVAL_MS: u64 = 5000;
const DEFAULT_DEBOUNCE_MS: u64 = 200;

/// Worker-side settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Extension (without the dot) used when enumerating documents.
    pub template_extension: String,
    /// External template generator; empty means documents pass through verbatim.
    pub generator_command: Vec<String>,
    /// External compiler; empty means no diagnostics are ever reported.
    pub compiler_command: Vec<String>,
    pub max_frame_len: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            template_extension: DEFAULT_TEMPLATE_EXTENSION.to_string(),
            generator_command: Vec::new(),
            compiler_command: Vec::new(),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}

/// Host-side settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub tick_interval_ms: u64,
    /// Loopback port to bind; 0 lets the OS pick one.
    pub port: u16,
    pub protocol_version: i32,
    /// Command run once per project to produce metadata bytes on stdout.
    /// The project file path is appended as the last argument.
    pub metadata_command: Vec<String>,
    pub debounce_ms: u64,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
            port: 0,
            protocol_version: PROTOCOL_VERSION,
            metadata_command: Vec::new(),
            debounce_ms: DEFAULT_DEBOUNCE_MS,
        }
    }
}

impl HostConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

/// Load a config file, falling back to defaults when no path is given.
pub fn load<T>(path: Option<&Path>) -> Result<T>
where
    T: for<'de> Deserialize<'de> + Default,
{
    match path {
        Some(path) => {
            let text = fs::read_to_string(path)?;
            Ok(toml::from_str(&text)?)
        }
        None => Ok(T::default()),
    }
}
