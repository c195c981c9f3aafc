use std::env;
use std::path::PathBuf;
use std::time::Duration;

use humantime::parse_duration;

use crate::profiler::EmonSettings;

/// Settings read once from the environment at startup.
#[derive(Debug, Clone)]
pub struct EnvConfig {
    pub emon_enabled: bool,
    pub emon_binary: String,
    pub emon_output: PathBuf,
    pub emon_label: String,
    pub emon_hardware_tag: String,
    pub emon_stop_timeout: Duration,
    pub index_cache_dir: PathBuf,
}

impl EnvConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let cfg = Self {
            emon_enabled: parse_bool("EMON_ENABLE", false),
            emon_binary: env::var("EMON_BINARY").unwrap_or_else(|_| "emon".to_string()),
            emon_output: PathBuf::from(
                env::var("EMON_OUTPUT").unwrap_or_else(|_| "emon.dat".to_string()),
            ),
            emon_label: env::var("EMON_LABEL").unwrap_or_else(|_| "gnr_flat".to_string()),
            emon_hardware_tag: env::var("EMON_HARDWARE_TAG")
                .unwrap_or_else(|_| "avx512_sncon_c6off_1s43c".to_string()),
            emon_stop_timeout: parse_duration_fallback("EMON_STOP_TIMEOUT", Duration::from_secs(30)),
            index_cache_dir: PathBuf::from(
                env::var("INDEX_CACHE_DIR").unwrap_or_else(|_| ".".to_string()),
            ),
        };

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.emon_enabled && self.emon_binary.trim().is_empty() {
            return Err(ConfigError::Missing("EMON_BINARY"));
        }
        if self.emon_label.contains('/') || self.emon_hardware_tag.contains('/') {
            return Err(ConfigError::Invalid {
                key: "EMON_LABEL / EMON_HARDWARE_TAG",
                reason: "must not contain path separators".to_string(),
            });
        }
        Ok(())
    }

    pub fn emon_settings(&self) -> EmonSettings {
        EmonSettings {
            binary: self.emon_binary.clone(),
            intermediate: self.emon_output.clone(),
            label: self.emon_label.clone(),
            hardware_tag: self.emon_hardware_tag.clone(),
            stop_timeout: self.emon_stop_timeout,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required configuration: {0}")]
    Missing(&'static str),
    #[error("invalid configuration {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

fn parse_duration_fallback(key: &str, default: Duration) -> Duration {
    match env::var(key) {
        Ok(raw) if !raw.is_empty() => parse_duration(&raw).unwrap_or(default),
        _ => default,
    }
}

fn parse_bool(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(raw) if !raw.is_empty() => parse_bool_value(&raw).unwrap_or(default),
        _ => default,
    }
}

fn parse_bool_value(raw: &str) -> Option<bool> {
    match raw.to_lowercase().as_str() {
        "1" | "true" | "yes" | "y" | "on" => Some(true),
        "0" | "false" | "no" | "n" | "off" => Some(false),
        _ => None,
    }
}
