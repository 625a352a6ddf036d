// src/config.rs
//! Engine settings resolved once at startup: environment first, then any
//! command-line overrides on top.

use std::{
    str::FromStr,
    thread
};
use tracing::warn;

pub const ENV_THREADS: &str = "AUTOLOAD_ENGINE_THREADS";
pub const ENV_MAX_FILE_BYTES: &str = "AUTOLOAD_ENGINE_MAX_FILE_BYTES";
pub const ENV_CACHE_FILE: &str = "AUTOLOAD_ENGINE_CACHE_FILE";

/// Files larger than this are not scanned.
pub const DEFAULT_MAX_FILE_BYTES: u64 = 4 * 1024 * 1024;
/// Cache file name inside the target directory.
pub const DEFAULT_CACHE_FILE: &str = ".autoload-cache.json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Worker pool size.
    pub threads: usize,
    pub max_file_bytes: u64,
    pub cache_file_name: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            threads: default_threads(),
            max_file_bytes: DEFAULT_MAX_FILE_BYTES,
            cache_file_name: DEFAULT_CACHE_FILE.to_string(),
        }
    }
}

fn default_threads() -> usize {
    thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source. Unparseable or zero values
    /// fall back to the default with a warning.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();
        if let Some(n) = parse_positive::<usize>(&lookup, ENV_THREADS) {
            cfg.threads = n;
        }
        if let Some(n) = parse_positive::<u64>(&lookup, ENV_MAX_FILE_BYTES) {
            cfg.max_file_bytes = n;
        }
        if let Some(name) = lookup(ENV_CACHE_FILE).map(|v| v.trim().to_string()) {
            if name.is_empty() || name.contains(['/', '\\']) {
                warn!(var = ENV_CACHE_FILE, value = %name, "expected a bare file name, using default");
            } else {
                cfg.cache_file_name = name;
            }
        }
        cfg
    }

    /// Apply a `--threads` override; zero means keep the current value.
    pub fn with_threads(mut self, threads: Option<usize>) -> Self {
        if let Some(n) = threads.filter(|n| *n > 0) {
            self.threads = n;
        }
        self
    }
}

fn parse_positive<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T>
where
    T: FromStr + PartialOrd + Default,
{
    let raw = lookup(key)?;
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    match raw.parse::<T>() {
        Ok(v) if v > T::default() => Some(v),
        _ => {
            warn!(var = key, value = raw, "invalid value, using default");
            None
        }
    }
}
