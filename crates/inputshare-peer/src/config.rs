//! TOML configuration for the peer application.
//!
//! The file lives under the user's config base directory
//! (`$XDG_CONFIG_HOME`/`~/.config` on Linux, `~/Library/Application
//! Support` on macOS, `%APPDATA%` on Windows) as
//! `inputshare/config.toml`. Every field carries a serde default so a
//! partial or absent file works on first run and across upgrades. CLI flags
//! override file values; the file is never written implicitly.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Neither a home directory nor a config base directory is available.
    #[error("no home directory to resolve a config path from")]
    NoHome,

    /// The file exists but could not be read.
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file or its parent directory could not be written.
    #[error("cannot write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file content is not valid config TOML.
    #[error("{path} is not valid config TOML: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// The in-memory config could not be rendered as TOML.
    #[error("config could not be rendered as TOML: {0}")]
    Encode(#[from] toml::ser::Error),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level application configuration stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub peer: PeerConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub edge: EdgeConfig,
}

/// General peer behaviour settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PeerConfig {
    /// Friendly name advertised over discovery and carried in `Hello`.
    /// Defaults to the machine hostname when empty.
    #[serde(default)]
    pub device_name: String,
    /// `tracing` log level: `"error"`, `"warn"`, `"info"`, `"debug"`, `"trace"`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Network port and bind-address settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkConfig {
    /// TCP port for the TLS session channel.
    #[serde(default = "default_port")]
    pub port: u16,
    /// IP address to bind the listener to. `"0.0.0.0"` binds all interfaces.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Whether to advertise `_inputshare._tcp` over mDNS while receiving.
    #[serde(default = "default_true")]
    pub advertise: bool,
}

/// Edge-detector and forwarding-path tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EdgeConfig {
    /// Pixels from the boundary at which the cursor counts as in-zone.
    #[serde(default = "default_enter_threshold")]
    pub enter_threshold: f64,
    /// Pixels from the boundary at which the cursor counts as out-of-zone.
    #[serde(default = "default_exit_threshold")]
    pub exit_threshold: f64,
    /// How long the cursor must dwell in zone before the handoff fires.
    #[serde(default = "default_dwell_ms")]
    pub dwell_ms: u64,
    /// How long the sender waits for the peer to acknowledge activation.
    #[serde(default = "default_activation_timeout_ms")]
    pub activation_timeout_ms: u64,
    /// Coalescer drain interval while forwarding.
    #[serde(default = "default_coalesce_interval_ms")]
    pub coalesce_interval_ms: u64,
}

impl EdgeConfig {
    pub fn dwell(&self) -> Duration {
        Duration::from_millis(self.dwell_ms)
    }

    pub fn activation_timeout(&self) -> Duration {
        Duration::from_millis(self.activation_timeout_ms)
    }

    pub fn coalesce_interval(&self) -> Duration {
        Duration::from_millis(self.coalesce_interval_ms.max(1))
    }
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_log_level() -> String {
    "info".to_string()
}
fn default_port() -> u16 {
    4242
}
fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}
fn default_true() -> bool {
    true
}
fn default_enter_threshold() -> f64 {
    2.0
}
fn default_exit_threshold() -> f64 {
    16.0
}
fn default_dwell_ms() -> u64 {
    100
}
fn default_activation_timeout_ms() -> u64 {
    2_000
}
fn default_coalesce_interval_ms() -> u64 {
    4
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            device_name: String::new(),
            log_level: default_log_level(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind_address: default_bind_address(),
            advertise: default_true(),
        }
    }
}

impl Default for EdgeConfig {
    fn default() -> Self {
        Self {
            enter_threshold: default_enter_threshold(),
            exit_threshold: default_exit_threshold(),
            dwell_ms: default_dwell_ms(),
            activation_timeout_ms: default_activation_timeout_ms(),
            coalesce_interval_ms: default_coalesce_interval_ms(),
        }
    }
}

// ── File resolution, load, save ───────────────────────────────────────────────

/// Where the config file lives when no `--config` override is given.
///
/// All branches compile on every platform; `cfg!` picks the convention at
/// runtime so the resolution logic stays one testable function.
///
/// # Errors
///
/// Returns [`ConfigError::NoHome`] when no base directory can be derived
/// from the environment.
pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    let base = if cfg!(target_os = "windows") {
        std::env::var_os("APPDATA").map(PathBuf::from)
    } else if cfg!(target_os = "macos") {
        std::env::var_os("HOME")
            .map(|home| PathBuf::from(home).join("Library").join("Application Support"))
    } else {
        std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config")))
    };
    base.map(|dir| dir.join("inputshare").join("config.toml"))
        .ok_or(ConfigError::NoHome)
}

fn resolve_path(override_path: Option<PathBuf>) -> Result<PathBuf, ConfigError> {
    match override_path {
        Some(path) => Ok(path),
        None => default_config_path(),
    }
}

/// Loads [`AppConfig`] from `override_path` or the default location. A
/// missing file is not an error: defaults apply on first run.
///
/// # Errors
///
/// Returns [`ConfigError::Read`] for I/O failures other than "not found"
/// and [`ConfigError::Malformed`] when the TOML does not parse.
pub fn load_config(override_path: Option<PathBuf>) -> Result<AppConfig, ConfigError> {
    let path = resolve_path(override_path)?;
    let text = match std::fs::read_to_string(&path) {
        Ok(text) => text,
        Err(source) if source.kind() == std::io::ErrorKind::NotFound => {
            return Ok(AppConfig::default());
        }
        Err(source) => return Err(ConfigError::Read { path, source }),
    };
    toml::from_str(&text).map_err(|source| ConfigError::Malformed { path, source })
}

/// Writes `config` to `override_path` or the default location, creating
/// parent directories as needed.
///
/// # Errors
///
/// Returns [`ConfigError::Encode`] when rendering fails and
/// [`ConfigError::Write`] for I/O failures.
pub fn save_config(config: &AppConfig, override_path: Option<PathBuf>) -> Result<(), ConfigError> {
    let path = resolve_path(override_path)?;
    let text = toml::to_string_pretty(config)?;
    let dir = path.parent().map(PathBuf::from).unwrap_or_default();
    std::fs::create_dir_all(&dir)
        .and_then(|()| std::fs::write(&path, text))
        .map_err(|source| ConfigError::Write { path, source })
}

/// The friendly name to announce: configured value, else hostname, else a
/// fixed fallback.
pub fn resolve_device_name(cfg: &AppConfig) -> String {
    if !cfg.peer.device_name.is_empty() {
        return cfg.peer.device_name.clone();
    }
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "inputshare-peer".to_string())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_has_expected_port_and_thresholds() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.network.port, 4242);
        assert_eq!(cfg.edge.enter_threshold, 2.0);
        assert_eq!(cfg.edge.exit_threshold, 16.0);
        assert_eq!(cfg.edge.dwell_ms, 100);
        assert_eq!(cfg.edge.activation_timeout_ms, 2_000);
        assert_eq!(cfg.edge.coalesce_interval_ms, 4);
    }

    #[test]
    fn test_config_round_trips_through_toml() {
        let mut cfg = AppConfig::default();
        cfg.network.port = 9000;
        cfg.peer.device_name = "desk-left".to_string();
        cfg.edge.dwell_ms = 250;

        let text = toml::to_string_pretty(&cfg).expect("serialize");
        let restored: AppConfig = toml::from_str(&text).expect("deserialize");

        assert_eq!(cfg, restored);
    }

    #[test]
    fn test_minimal_toml_uses_defaults() {
        let cfg: AppConfig = toml::from_str("").expect("empty config is valid");
        assert_eq!(cfg, AppConfig::default());
    }

    #[test]
    fn test_partial_section_overrides_only_named_fields() {
        let cfg: AppConfig = toml::from_str("[edge]\ndwell_ms = 40\n").unwrap();
        assert_eq!(cfg.edge.dwell_ms, 40);
        assert_eq!(cfg.edge.coalesce_interval_ms, 4);
        assert_eq!(cfg.network.port, 4242);
    }

    #[test]
    fn test_coalesce_interval_never_zero() {
        let cfg: AppConfig = toml::from_str("[edge]\ncoalesce_interval_ms = 0\n").unwrap();
        assert_eq!(cfg.edge.coalesce_interval(), Duration::from_millis(1));
    }

    #[test]
    fn test_save_and_load_round_trip_via_temp_dir() {
        let dir = std::env::temp_dir().join(format!("inputshare_test_{}", uuid::Uuid::new_v4()));
        let path = dir.join("config.toml");

        let mut cfg = AppConfig::default();
        cfg.network.port = 12345;

        save_config(&cfg, Some(path.clone())).expect("save");
        let loaded = load_config(Some(path)).expect("load");

        assert_eq!(loaded.network.port, 12345);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_load_missing_file_returns_defaults() {
        let path = std::env::temp_dir().join("inputshare_definitely_missing/config.toml");
        let cfg = load_config(Some(path)).expect("missing file is not an error");
        assert_eq!(cfg, AppConfig::default());
    }

    #[test]
    fn test_load_malformed_toml_names_the_file() {
        let dir = std::env::temp_dir().join(format!("inputshare_bad_{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, "[[[ not valid").unwrap();

        match load_config(Some(path.clone())) {
            Err(ConfigError::Malformed { path: reported, .. }) => assert_eq!(reported, path),
            other => panic!("expected Malformed, got {other:?}"),
        }
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_default_config_path_ends_with_crate_dir_and_file() {
        // Skipped silently in stripped environments with no home at all.
        if let Ok(path) = default_config_path() {
            assert!(path.ends_with("inputshare/config.toml"), "got {path:?}");
        }
    }

    #[test]
    fn test_resolve_device_name_prefers_configured_value() {
        let mut cfg = AppConfig::default();
        cfg.peer.device_name = "named".to_string();
        assert_eq!(resolve_device_name(&cfg), "named");
    }

    #[test]
    fn test_resolve_device_name_falls_back_to_non_empty_string() {
        let cfg = AppConfig::default();
        assert!(!resolve_device_name(&cfg).is_empty());
    }
}
