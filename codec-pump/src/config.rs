use std::str::FromStr;
use std::sync::LazyLock;

use crate::pool::DEFAULT_POOL_SLACK;

const DEFAULT_NAME: &str = "codec-pump";
const DEFAULT_STREAM_CAPACITY: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PumpConfig {
    name: String,
    pool_slack: usize,
    stream_capacity: usize,
}

impl PumpConfig {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    /// Reads `CODEC_PUMP_NAME`, `CODEC_PUMP_POOL_SLACK` and
    /// `CODEC_PUMP_STREAM_CAPACITY`, keeping defaults for anything unset.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(name) = std::env::var("CODEC_PUMP_NAME") {
            if !name.is_empty() {
                config.name = name;
            }
        }
        config.pool_slack = env_or("CODEC_PUMP_POOL_SLACK", config.pool_slack);
        config.stream_capacity =
            env_or("CODEC_PUMP_STREAM_CAPACITY", config.stream_capacity).max(1);
        config
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn with_pool_slack(mut self, pool_slack: usize) -> Self {
        self.pool_slack = pool_slack;
        self
    }

    /// Capacity of the channels behind `Session::frames` and friends. Zero is
    /// bumped to one since tokio channels cannot be unbuffered.
    pub fn with_stream_capacity(mut self, stream_capacity: usize) -> Self {
        self.stream_capacity = stream_capacity.max(1);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pool_slack(&self) -> usize {
        self.pool_slack
    }

    pub fn stream_capacity(&self) -> usize {
        self.stream_capacity
    }

    pub(crate) fn worker_thread_name(&self) -> String {
        format!("{}-pump", self.name)
    }

    pub(crate) fn dispatch_thread_name(&self) -> String {
        format!("{}-dispatch", self.name)
    }
}

impl Default for PumpConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_NAME.to_string(),
            pool_slack: DEFAULT_POOL_SLACK,
            stream_capacity: DEFAULT_STREAM_CAPACITY,
        }
    }
}

fn env_or<T: FromStr + Copy + std::fmt::Debug>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => parse_or(key, &raw, default),
        Err(_) => default,
    }
}

fn parse_or<T: FromStr + Copy + std::fmt::Debug>(key: &str, raw: &str, default: T) -> T {
    match raw.trim().parse() {
        Ok(value) => value,
        Err(_) => {
            log::warn!("ignoring {}={:?}, using default {:?}", key, raw, default);
            default
        }
    }
}

/// Process-wide defaults, read from the environment on first use.
pub fn config() -> &'static PumpConfig {
    static CONFIG: LazyLock<PumpConfig> = LazyLock::new(PumpConfig::from_env);
    &CONFIG
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PumpConfig::default();
        assert_eq!(config.name(), "codec-pump");
        assert_eq!(config.pool_slack(), 4);
        assert_eq!(config.stream_capacity(), 8);
        assert_eq!(config.worker_thread_name(), "codec-pump-pump");
    }

    #[test]
    fn test_builder_overrides() {
        let config = PumpConfig::new("cam1")
            .with_pool_slack(2)
            .with_stream_capacity(0);
        assert_eq!(config.dispatch_thread_name(), "cam1-dispatch");
        assert_eq!(config.pool_slack(), 2);
        assert_eq!(config.stream_capacity(), 1);
    }

    #[test]
    fn test_parse_or_falls_back() {
        assert_eq!(parse_or("K", " 7 ", 4usize), 7);
        assert_eq!(parse_or("K", "seven", 4usize), 4);
    }
}
