//! Daemon configuration loading.

use std::path::Path;

use serde::Deserialize;
use smol_str::SmolStr;
use thiserror::Error;

/// Default listen address for the daemon.
pub const DEFAULT_LISTEN: &str = "127.0.0.1:5005";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),

    /// The file is not valid TOML or has wrong field types.
    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Daemon configuration, from TOML with environment overrides.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DebugConfig {
    /// Listen address, `host:port`.
    pub listen: SmolStr,
    /// Display-length bound for rendered values.
    pub render_max_length: usize,
    /// Per-thread bootstrap wait bound, in milliseconds.
    pub bootstrap_timeout_ms: u64,
    /// Suspend every thread as soon as a client connects.
    pub suspend_on_connect: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            listen: SmolStr::new_static(DEFAULT_LISTEN),
            render_max_length: crate::render::DEFAULT_MAX_LENGTH,
            bootstrap_timeout_ms: 500,
            suspend_on_connect: false,
        }
    }
}

impl DebugConfig {
    /// Load from a TOML file, then apply environment overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let mut config: Self = toml::from_str(&text)?;
        config.apply_env();
        Ok(config)
    }

    /// Defaults plus environment overrides.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// `VIGIL_LISTEN` overrides the listen address.
    fn apply_env(&mut self) {
        if let Ok(listen) = std::env::var("VIGIL_LISTEN") {
            if !listen.is_empty() {
                self.listen = listen.into();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let config: DebugConfig = toml::from_str("listen = \"0.0.0.0:9000\"").unwrap();
        assert_eq!(config.listen, "0.0.0.0:9000");
        assert_eq!(config.render_max_length, crate::render::DEFAULT_MAX_LENGTH);
        assert!(!config.suspend_on_connect);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(toml::from_str::<DebugConfig>("nonsense = 1").is_err());
    }
}
