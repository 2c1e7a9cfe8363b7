//! TOML-based daemon configuration.
//!
//! Read from `$XDG_CONFIG_HOME/coopd/config.toml` (falling back to
//! `~/.config/coopd/config.toml`). Every field has a serde default so the
//! daemon works on first run with no file at all; `load_or_init` writes the
//! defaults back in that case so the generated device UUID stays stable
//! across restarts.
//!
//! ```toml
//! [device]
//! name = "desk-left"
//!
//! [network]
//! tcp_port = 24810
//! discovery_port = 24811
//!
//! [storage]
//! receive_dir = "/home/user/Downloads"
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Neither `XDG_CONFIG_HOME` nor `HOME` is set.
    #[error("could not determine the config directory (no XDG_CONFIG_HOME or HOME)")]
    NoConfigDir,

    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

// ── Config schema ─────────────────────────────────────────────────────────────

/// Top-level daemon configuration stored on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub helpers: HelperConfig,
}

/// Local device identity advertised to peers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceConfig {
    /// Human-readable name shown in peers' device lists.
    #[serde(default = "default_device_name")]
    pub name: String,
    /// Stable identity. Generated on first run and persisted.
    #[serde(default = "default_uuid")]
    pub uuid: Uuid,
}

/// Listen ports and bind address.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkConfig {
    /// TCP port accepting pair connections.
    #[serde(default = "default_tcp_port")]
    pub tcp_port: u16,
    /// UDP port for discovery beacons.
    #[serde(default = "default_discovery_port")]
    pub discovery_port: u16,
    /// Address all sockets bind to; `0.0.0.0` binds every interface.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

/// Filesystem locations the daemon writes to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageConfig {
    /// Daemon state directory; the remote mountpoint lives at `<data_dir>/mp`.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Where received files are copied to.
    #[serde(default = "default_receive_dir")]
    pub receive_dir: PathBuf,
}

/// Behaviour switches.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DaemonConfig {
    /// `tracing` level used when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Whether an incoming device-sharing start request is accepted.
    #[serde(default = "default_true")]
    pub accept_device_sharing: bool,
    /// Whether the local clipboard is offered to paired peers.
    #[serde(default = "default_true")]
    pub share_clipboard: bool,
    /// Whether local input devices are offered to paired peers.
    #[serde(default = "default_true")]
    pub share_devices: bool,
}

/// External helper binaries the daemon spawns.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HelperConfig {
    /// Input injector; reads 12-byte `(type, code, value)` triples on stdin.
    #[serde(default = "default_injector_bin")]
    pub injector: PathBuf,
    /// Pair confirmation dialog; writes one verdict byte to stdout.
    #[serde(default = "default_confirm_bin")]
    pub confirm_dialog: PathBuf,
    /// Copy command used for received files.
    #[serde(default = "default_copy_bin")]
    pub copy: PathBuf,
    /// Desktop notification command.
    #[serde(default = "default_notify_bin")]
    pub notify: PathBuf,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_device_name() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "coopd-device".to_string())
}
fn default_uuid() -> Uuid {
    Uuid::new_v4()
}
fn default_tcp_port() -> u16 {
    24810
}
fn default_discovery_port() -> u16 {
    24811
}
fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}
fn default_data_dir() -> PathBuf {
    let base = std::env::var_os("XDG_DATA_HOME")
        .map(PathBuf::from)
        .or_else(|| {
            std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".local").join("share"))
        })
        .unwrap_or_else(|| PathBuf::from("/var/lib"));
    base.join("coopd")
}
fn default_receive_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(|h| PathBuf::from(h).join("Downloads"))
        .unwrap_or_else(|| default_data_dir().join("received"))
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_injector_bin() -> PathBuf {
    PathBuf::from("coop-injector")
}
fn default_confirm_bin() -> PathBuf {
    PathBuf::from("coop-confirm-dialog")
}
fn default_copy_bin() -> PathBuf {
    PathBuf::from("/bin/cp")
}
fn default_notify_bin() -> PathBuf {
    PathBuf::from("notify-send")
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name: default_device_name(),
            uuid: default_uuid(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            tcp_port: default_tcp_port(),
            discovery_port: default_discovery_port(),
            bind_address: default_bind_address(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            receive_dir: default_receive_dir(),
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            accept_device_sharing: true,
            share_clipboard: true,
            share_devices: true,
        }
    }
}

impl Default for HelperConfig {
    fn default() -> Self {
        Self {
            injector: default_injector_bin(),
            confirm_dialog: default_confirm_bin(),
            copy: default_copy_bin(),
            notify: default_notify_bin(),
        }
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Resolves the config directory (`$XDG_CONFIG_HOME/coopd` or
/// `~/.config/coopd`).
///
/// # Errors
///
/// Returns [`ConfigError::NoConfigDir`] when neither environment variable is
/// available.
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))
        .map(|base| base.join("coopd"))
        .ok_or(ConfigError::NoConfigDir)
}

/// Full path of the config file.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.toml"))
}

/// Loads the config from `path`, returning defaults when the file is absent.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found"
/// and [`ConfigError::Parse`] for malformed TOML.
pub fn load_config(path: &std::path::Path) -> Result<Config, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Config::default()),
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Persists `config` to `path`, creating parent directories as needed.
pub fn save_config(config: &Config, path: &std::path::Path) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Loads the config at the default location, writing the generated defaults
/// back when no file existed yet so the device UUID survives restarts.
pub fn load_or_init() -> Result<Config, ConfigError> {
    let path = config_file_path()?;
    let existed = path.exists();
    let config = load_config(&path)?;
    if !existed {
        save_config(&config, &path)?;
    }
    Ok(config)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_has_expected_ports() {
        let cfg = Config::default();
        assert_eq!(cfg.network.tcp_port, 24810);
        assert_eq!(cfg.network.discovery_port, 24811);
        assert_eq!(cfg.network.bind_address, "0.0.0.0");
    }

    #[test]
    fn test_default_policy_flags_are_on() {
        let cfg = Config::default();
        assert!(cfg.daemon.accept_device_sharing);
        assert!(cfg.daemon.share_clipboard);
        assert!(cfg.daemon.share_devices);
    }

    #[test]
    fn test_config_round_trips_through_toml() {
        let mut cfg = Config::default();
        cfg.network.tcp_port = 9000;
        cfg.device.name = "desk-right".to_string();
        cfg.daemon.accept_device_sharing = false;

        let text = toml::to_string_pretty(&cfg).expect("serialize");
        let restored: Config = toml::from_str(&text).expect("deserialize");
        assert_eq!(restored, cfg);
    }

    #[test]
    fn test_minimal_toml_uses_defaults() {
        let cfg: Config = toml::from_str("[device]\nname = \"x\"\n").expect("parse");
        assert_eq!(cfg.device.name, "x");
        assert_eq!(cfg.network.tcp_port, 24810);
        assert_eq!(cfg.daemon.log_level, "info");
    }

    #[test]
    fn test_empty_toml_generates_a_uuid() {
        let a: Config = toml::from_str("").expect("parse");
        let b: Config = toml::from_str("").expect("parse");
        assert_ne!(a.device.uuid, b.device.uuid, "each init generates a fresh uuid");
    }

    #[test]
    fn test_invalid_toml_is_a_parse_error() {
        let result: Result<Config, _> = toml::from_str("[[[ nope");
        assert!(result.is_err());
    }

    #[test]
    fn test_load_config_returns_defaults_for_missing_file() {
        let path = std::path::Path::new("/nonexistent/coopd/config.toml");
        let cfg = load_config(path).expect("missing file is not an error");
        assert_eq!(cfg.network.tcp_port, 24810);
    }

    #[test]
    fn test_save_and_load_round_trip_via_temp_dir() {
        let dir = std::env::temp_dir().join(format!("coopd-test-{}", Uuid::new_v4()));
        let path = dir.join("config.toml");

        let mut cfg = Config::default();
        cfg.network.tcp_port = 12345;
        save_config(&cfg, &path).expect("save");

        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);

        std::fs::remove_dir_all(&dir).ok();
    }
}
