//! Shared configuration for motionlink tools.
//!
//! TOML profiles with environment overrides, and translation to
//! `motionlink_core::SessionConfig`. The CLI adds flag-aware wrappers on
//! top; embedding hosts can construct a `SessionConfig` directly and
//! skip this crate entirely.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use motionlink_core::SessionConfig;
use motionlink_device::DEFAULT_BAUD;

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no profile named '{profile}'")]
    UnknownProfile { profile: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Which link family to use for a profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportChoice {
    Serial,
    Gatt,
}

/// Top-level TOML configuration.
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    /// Default profile name.
    pub default_profile: Option<String>,

    /// Global defaults.
    #[serde(default)]
    pub defaults: Defaults,

    /// Named device profiles.
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: HashMap::new(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_transport")]
    pub transport: TransportChoice,

    #[serde(default = "default_baud")]
    pub baud: u32,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            transport: default_transport(),
            baud: default_baud(),
        }
    }
}

fn default_transport() -> TransportChoice {
    TransportChoice::Serial
}
fn default_baud() -> u32 {
    DEFAULT_BAUD
}

/// A named device profile. Every field is optional; unset fields fall
/// back to `defaults` or `SessionConfig::default()`.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Profile {
    /// Link family override.
    pub transport: Option<TransportChoice>,

    /// Serial port path (e.g. `/dev/ttyACM0`). Discovery is used when
    /// unset.
    pub port: Option<String>,

    /// Advertised device name filter for wireless discovery.
    pub device_name: Option<String>,

    /// Serial baud rate override.
    pub baud: Option<u32>,

    pub connect_timeout_secs: Option<u64>,
    pub response_timeout_ms: Option<u64>,
    pub liveness_timeout_ms: Option<u64>,
    pub reconnect_attempts: Option<u32>,
    pub reconnect_delay_ms: Option<u64>,
    pub ring_capacity: Option<usize>,
}

/// A profile resolved against defaults, ready to hand to the session
/// and transport constructors.
#[derive(Debug, Clone)]
pub struct ResolvedProfile {
    pub name: String,
    pub transport: TransportChoice,
    pub port: Option<String>,
    pub baud: u32,
    pub session: SessionConfig,
}

// ── Paths ───────────────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("com", "motionlink", "motionlink").map_or_else(
        || dirs_fallback().join("config.toml"),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

/// Default location for the session's resume marker.
pub fn resume_marker_path() -> PathBuf {
    ProjectDirs::from("com", "motionlink", "motionlink").map_or_else(
        || dirs_fallback().join("resume.json"),
        |dirs| dirs.data_dir().join("resume.json"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("motionlink");
    p
}

// ── Loading / saving ────────────────────────────────────────────────

/// Load the full Config from file + environment.
///
/// Environment variables use the `MOTIONLINK_` prefix with `__` as the
/// section separator, e.g. `MOTIONLINK_DEFAULTS__BAUD=9600`.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from an explicit path (used by `--config` and tests).
pub fn load_config_from(path: &std::path::Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("MOTIONLINK_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Load config, returning a default if the file doesn't exist.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    let path = config_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(&path, toml_str)?;
    Ok(())
}

// ── Profile resolution ──────────────────────────────────────────────

impl Config {
    /// Resolve a profile by name into session + transport settings.
    ///
    /// An explicitly requested profile must exist; otherwise the default
    /// profile is used when present, falling back to bare defaults.
    pub fn resolve(&self, name: Option<&str>) -> Result<ResolvedProfile, ConfigError> {
        let (profile_name, profile) = match name {
            Some(name) => {
                let profile =
                    self.profiles
                        .get(name)
                        .ok_or_else(|| ConfigError::UnknownProfile {
                            profile: name.to_owned(),
                        })?;
                (name.to_owned(), Some(profile))
            }
            None => {
                let name = self
                    .default_profile
                    .clone()
                    .unwrap_or_else(|| "default".into());
                (name.clone(), self.profiles.get(&name))
            }
        };

        let empty = Profile::default();
        let profile = profile.unwrap_or(&empty);
        let base = SessionConfig::default();

        let ring_capacity = profile.ring_capacity.unwrap_or(base.ring_capacity);
        if ring_capacity == 0 {
            return Err(ConfigError::Validation {
                field: "ring_capacity".into(),
                reason: "must be nonzero".into(),
            });
        }

        let session = SessionConfig {
            device_name: profile.device_name.clone(),
            response_timeout: profile
                .response_timeout_ms
                .map_or(base.response_timeout, Duration::from_millis),
            connect_timeout: profile
                .connect_timeout_secs
                .map_or(base.connect_timeout, Duration::from_secs),
            liveness_timeout: profile
                .liveness_timeout_ms
                .map_or(base.liveness_timeout, Duration::from_millis),
            reconnect_attempts: profile.reconnect_attempts.unwrap_or(base.reconnect_attempts),
            reconnect_delay: profile
                .reconnect_delay_ms
                .map_or(base.reconnect_delay, Duration::from_millis),
            ring_capacity,
            write_queue_capacity: base.write_queue_capacity,
            resume_marker: Some(resume_marker_path()),
        };

        Ok(ResolvedProfile {
            name: profile_name,
            transport: profile.transport.unwrap_or(self.defaults.transport),
            port: profile.port.clone(),
            baud: profile.baud.unwrap_or(self.defaults.baud),
            session,
        })
    }
}

// ── Tests ───────────────────────────────────────────────────────────
