//! # Configuration
//!
//! `MixerConfig` is read from a TOML file, then overridden by `MIXER_*`
//! environment variables, then validated.
//!
//! | Variable | Field |
//! |---|---|
//! | `MIXER_SERVER_HOST` | `server.host` |
//! | `MIXER_SERVER_PORT` | `server.port` |
//! | `MIXER_LOG_FORMAT` | `logging.format` |
//! | `MIXER_BASE_PATH` | `stores.base_path` |
//! | `MIXER_BRANCH_PATH` | `stores.branch_path` |
//! | `MIXER_OVERRIDE_PATH` | `stores.override_path` |
//! | `MIXER_ENGINE_SOURCE_PATH` | `stores.engine_source_path` |
//! | `MIXER_USE_OVERRIDE_STORE` | `mixer.use_override_store` |
//! | `MIXER_OVERRIDE_REQUIRED` | `mixer.override_required` |
//! | `MIXER_OVERRIDE_ONLY` | `mixer.override_only` |
//! | `MIXER_USE_WARM_CACHE` | `mixer.use_warm_cache` |
//! | `MIXER_DEADLINE_MS` | `mixer.per_request_deadline_ms` |
//! | `MIXER_FAN_OUT_LIMIT` | `mixer.fan_out_limit` |

use crate::orchestrator::MixerOptions;
use mixer_core::MixerError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct MixerConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub stores: StoresConfig,
    #[serde(default)]
    pub mixer: MixerSection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// "text" or "json".
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: default_log_format(),
        }
    }
}

fn default_log_format() -> String {
    "text".to_string()
}

/// Where each origin's data lives. An absent path disables that origin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct StoresConfig {
    #[serde(default)]
    pub base_path: Option<PathBuf>,
    #[serde(default)]
    pub branch_path: Option<PathBuf>,
    #[serde(default)]
    pub override_path: Option<PathBuf>,
    #[serde(default)]
    pub engine_source_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MixerSection {
    #[serde(default)]
    pub use_override_store: bool,
    #[serde(default)]
    pub override_required: bool,
    #[serde(default)]
    pub override_only: bool,
    #[serde(default = "default_true")]
    pub use_warm_cache: bool,
    #[serde(default = "default_deadline_ms")]
    pub per_request_deadline_ms: u64,
    #[serde(default = "default_fan_out_limit")]
    pub fan_out_limit: usize,
}

impl Default for MixerSection {
    fn default() -> Self {
        Self {
            use_override_store: false,
            override_required: false,
            override_only: false,
            use_warm_cache: default_true(),
            per_request_deadline_ms: default_deadline_ms(),
            fan_out_limit: default_fan_out_limit(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_deadline_ms() -> u64 {
    5000
}

fn default_fan_out_limit() -> usize {
    16
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl MixerConfig {
    /// Read, override and validate a config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, MixerError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            MixerError::Config(format!("failed to read '{}': {}", path.display(), e))
        })?;
        Self::parse_toml(&contents)
    }

    /// Parse TOML, apply env overrides, then validate.
    pub fn parse_toml(toml_str: &str) -> Result<Self, MixerError> {
        let mut config: MixerConfig = toml::from_str(toml_str)
            .map_err(|e| MixerError::Config(format!("failed to parse TOML: {}", e)))?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Config from `path` if given, otherwise defaults plus env overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, MixerError> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let mut config = Self::default();
                config.apply_env_overrides();
                config.validate()?;
                Ok(config)
            }
        }
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("MIXER_SERVER_HOST") {
            self.server.host = v;
        }
        if let Ok(v) = std::env::var("MIXER_SERVER_PORT")
            && let Ok(port) = v.parse::<u16>()
        {
            self.server.port = port;
        }
        if let Ok(v) = std::env::var("MIXER_LOG_FORMAT") {
            self.logging.format = v;
        }

        for (var, slot) in [
            ("MIXER_BASE_PATH", &mut self.stores.base_path),
            ("MIXER_BRANCH_PATH", &mut self.stores.branch_path),
            ("MIXER_OVERRIDE_PATH", &mut self.stores.override_path),
            ("MIXER_ENGINE_SOURCE_PATH", &mut self.stores.engine_source_path),
        ] {
            if let Ok(v) = std::env::var(var) {
                *slot = (!v.is_empty()).then(|| PathBuf::from(v));
            }
        }

        for (var, slot) in [
            ("MIXER_USE_OVERRIDE_STORE", &mut self.mixer.use_override_store),
            ("MIXER_OVERRIDE_REQUIRED", &mut self.mixer.override_required),
            ("MIXER_OVERRIDE_ONLY", &mut self.mixer.override_only),
            ("MIXER_USE_WARM_CACHE", &mut self.mixer.use_warm_cache),
        ] {
            if let Some(flag) = std::env::var(var).ok().as_deref().and_then(parse_bool) {
                *slot = flag;
            }
        }

        if let Ok(v) = std::env::var("MIXER_DEADLINE_MS")
            && let Ok(ms) = v.parse::<u64>()
        {
            self.mixer.per_request_deadline_ms = ms;
        }
        if let Ok(v) = std::env::var("MIXER_FAN_OUT_LIMIT")
            && let Ok(limit) = v.parse::<usize>()
        {
            self.mixer.fan_out_limit = limit;
        }
    }

    pub fn validate(&self) -> Result<(), MixerError> {
        if self.server.port == 0 {
            return Err(MixerError::Config("server.port must be > 0".to_string()));
        }
        if !["text", "json"].contains(&self.logging.format.as_str()) {
            return Err(MixerError::Config(format!(
                "logging.format must be 'text' or 'json' (got '{}')",
                self.logging.format
            )));
        }
        if self.mixer.fan_out_limit == 0 {
            return Err(MixerError::Config("mixer.fan_out_limit must be > 0".to_string()));
        }
        if self.mixer.per_request_deadline_ms == 0 {
            return Err(MixerError::Config(
                "mixer.per_request_deadline_ms must be > 0".to_string(),
            ));
        }
        let override_dependent = self.mixer.override_only || self.mixer.override_required;
        if override_dependent && !self.mixer.use_override_store {
            return Err(MixerError::Config(
                "mixer.override_only and mixer.override_required need mixer.use_override_store"
                    .to_string(),
            ));
        }
        if self.mixer.use_override_store && self.stores.override_path.is_none() {
            return Err(MixerError::Config(
                "mixer.use_override_store needs stores.override_path".to_string(),
            ));
        }
        Ok(())
    }

    /// Orchestrator options derived from the `[mixer]` section.
    #[must_use]
    pub fn options(&self) -> MixerOptions {
        MixerOptions {
            use_override_store: self.mixer.use_override_store,
            override_required: self.mixer.override_required,
            override_only: self.mixer.override_only,
            use_warm_cache: self.mixer.use_warm_cache,
            deadline: Duration::from_millis(self.mixer.per_request_deadline_ms),
            fan_out_limit: self.mixer.fan_out_limit,
        }
    }

    /// A commented example file, printed by `mixer init-config`.
    #[must_use]
    pub fn example_toml() -> String {
        let defaults = Self::default();
        format!(
            r#"# =============================================================================
# Mixer Configuration File
# =============================================================================
# Environment variables override these values (MIXER_SERVER_PORT=9000, ...).

[server]
host = "{host}"
port = {port}

[logging]
# "text" or "json"
format = "{format}"

[stores]
# redb snapshot files written by `mixer load`
# base_path = "base.redb"
# branch_path = "branch.redb"
# JSON Lines exports
# override_path = "override.jsonl"
# engine_source_path = "source.jsonl"

[mixer]
use_override_store = {use_override_store}
override_required = {override_required}
override_only = {override_only}
use_warm_cache = {use_warm_cache}
per_request_deadline_ms = {deadline}
fan_out_limit = {fan_out}
"#,
            host = defaults.server.host,
            port = defaults.server.port,
            format = defaults.logging.format,
            use_override_store = defaults.mixer.use_override_store,
            override_required = defaults.mixer.override_required,
            override_only = defaults.mixer.override_only,
            use_warm_cache = defaults.mixer.use_warm_cache,
            deadline = defaults.mixer.per_request_deadline_ms,
            fan_out = defaults.mixer.fan_out_limit,
        )
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Serializes tests that touch `MIXER_*` variables.
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    #[test]
    fn defaults_are_valid() {
        let config = MixerConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.mixer.use_warm_cache);
        assert_eq!(config.mixer.fan_out_limit, 16);
        assert_eq!(config.options().deadline, Duration::from_millis(5000));
    }

    #[test]
    fn example_parses_back() {
        let _guard = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
        let config = MixerConfig::parse_toml(&MixerConfig::example_toml()).expect("parse");
        assert_eq!(config, MixerConfig::default());
    }

    #[test]
    fn partial_sections_use_defaults() {
        let _guard = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
        let config = MixerConfig::parse_toml(
            r#"
[stores]
base_path = "base.redb"

[mixer]
fan_out_limit = 4
"#,
        )
        .expect("parse");
        assert_eq!(config.stores.base_path, Some(PathBuf::from("base.redb")));
        assert_eq!(config.mixer.fan_out_limit, 4);
        assert_eq!(config.mixer.per_request_deadline_ms, 5000);
        assert_eq!(config.server.port, 8080);
    }

    #[test]
    fn env_overrides_file_values() {
        let _guard = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
        // SAFETY: env access is serialized by ENV_MUTEX.
        unsafe {
            std::env::set_var("MIXER_SERVER_PORT", "9099");
            std::env::set_var("MIXER_USE_WARM_CACHE", "false");
        }
        let config = MixerConfig::parse_toml("[server]\nport = 8081\n");
        // SAFETY: env access is serialized by ENV_MUTEX.
        unsafe {
            std::env::remove_var("MIXER_SERVER_PORT");
            std::env::remove_var("MIXER_USE_WARM_CACHE");
        }
        let config = config.expect("parse");
        assert_eq!(config.server.port, 9099);
        assert!(!config.mixer.use_warm_cache);
    }

    #[test]
    fn override_only_needs_override_store() {
        let mut config = MixerConfig::default();
        config.mixer.override_only = true;
        assert!(matches!(config.validate(), Err(MixerError::Config(_))));

        config.mixer.use_override_store = true;
        assert!(config.validate().is_err());

        config.stores.override_path = Some(PathBuf::from("override.jsonl"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_limits_rejected() {
        let mut config = MixerConfig::default();
        config.mixer.fan_out_limit = 0;
        assert!(config.validate().is_err());

        let mut config = MixerConfig::default();
        config.mixer.per_request_deadline_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn bad_log_format_rejected() {
        let mut config = MixerConfig::default();
        config.logging.format = "xml".to_string();
        assert!(config.validate().is_err());
    }
}
