//! Configuration management for the ubterm daemon.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/ubterm/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ipc::{get_pid_file_path, get_socket_path};
use crate::session::{SessionOptions, TermSize};

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("max_sessions must be between 1 and 1000, got {0}")]
    InvalidMaxSessions(usize),

    #[error("poll_interval_ms must be between 1 and 1000, got {0}")]
    InvalidPollInterval(u64),

    #[error("close_grace_ms must be at most 10000, got {0}")]
    InvalidCloseGrace(u64),

    #[error("cleanup_interval_secs must be greater than 0")]
    InvalidCleanupInterval,

    #[error("terminal size must be at least 1x1, got {rows}x{cols}")]
    InvalidTerminalSize { rows: u16, cols: u16 },

    #[error("adb_path does not exist: {0}")]
    InvalidBridgePath(String),

    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),
}

/// Valid log level values for tracing configuration.
pub const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Main configuration structure for the ubterm daemon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// General daemon configuration.
    pub daemon: DaemonConfig,

    /// Device bridge configuration.
    pub bridge: BridgeConfig,

    /// Session management configuration.
    pub session: SessionConfig,
}

/// General daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DaemonConfig {
    /// Directory for daemon state (PID file).
    pub data_dir: PathBuf,

    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Write logs to this file instead of stderr.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,

    /// Control socket location. Derived from `$XDG_RUNTIME_DIR` when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub socket_path: Option<PathBuf>,
}

/// Device bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct BridgeConfig {
    /// Explicit path to `adb`. Discovered automatically when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adb_path: Option<PathBuf>,

    /// Device used when a session is created without one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_device: Option<String>,
}

/// Session management configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// Maximum number of concurrent sessions.
    pub max_sessions: usize,

    /// Longest the output pump waits before checking process liveness.
    pub poll_interval_ms: u64,

    /// Grace period between SIGTERM and kill when closing.
    pub close_grace_ms: u64,

    /// How often inactive sessions are removed.
    pub cleanup_interval_secs: u64,

    /// Initial terminal rows.
    pub rows: u16,

    /// Initial terminal columns.
    pub cols: u16,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            log_level: "info".to_string(),
            log_file: None,
            socket_path: None,
        }
    }
}

impl DaemonConfig {
    /// The configured socket path, or the per-user default.
    pub fn resolved_socket_path(&self) -> PathBuf {
        self.socket_path.clone().unwrap_or_else(get_socket_path)
    }

    pub fn pid_file(&self) -> PathBuf {
        get_pid_file_path(&self.data_dir)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_sessions: 10,
            poll_interval_ms: 50,
            close_grace_ms: 500,
            cleanup_interval_secs: 60,
            rows: 24,
            cols: 80,
        }
    }
}

impl SessionConfig {
    /// Per-session tunables derived from this section.
    pub fn options(&self) -> SessionOptions {
        SessionOptions {
            size: TermSize::new(self.rows, self.cols),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            close_grace: Duration::from_millis(self.close_grace_ms),
        }
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ubterm")
        .join("config.toml")
}

/// Returns the default data directory path.
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ubterm")
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values.
    /// Supported variables:
    /// - UBTERM_ADB_PATH: Override the bridge executable
    /// - UBTERM_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    pub fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("UBTERM_ADB_PATH") {
            if !path.is_empty() {
                tracing::info!("Overriding adb_path from environment: {}", path);
                self.bridge.adb_path = Some(PathBuf::from(path));
            }
        }

        if let Ok(level) = std::env::var("UBTERM_LOG_LEVEL") {
            if !level.is_empty() {
                tracing::info!("Overriding log_level from environment: {}", level);
                self.daemon.log_level = level;
            }
        }
    }

    /// Validate the configuration values.
    ///
    /// Returns an error if any configuration value is outside the valid range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let session = &self.session;

        if session.max_sessions < 1 || session.max_sessions > 1000 {
            return Err(ConfigError::InvalidMaxSessions(session.max_sessions));
        }

        if session.poll_interval_ms < 1 || session.poll_interval_ms > 1000 {
            return Err(ConfigError::InvalidPollInterval(session.poll_interval_ms));
        }

        if session.close_grace_ms > 10_000 {
            return Err(ConfigError::InvalidCloseGrace(session.close_grace_ms));
        }

        if session.cleanup_interval_secs == 0 {
            return Err(ConfigError::InvalidCleanupInterval);
        }

        if session.rows == 0 || session.cols == 0 {
            return Err(ConfigError::InvalidTerminalSize {
                rows: session.rows,
                cols: session.cols,
            });
        }

        // A relative adb_path is looked up on PATH; an absolute one must exist.
        if let Some(adb) = &self.bridge.adb_path {
            let found = if adb.is_absolute() {
                adb.exists()
            } else {
                which::which(adb).is_ok()
            };
            if !found {
                return Err(ConfigError::InvalidBridgePath(adb.display().to_string()));
            }
        }

        let level = self.daemon.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.daemon.log_level.clone()));
        }

        Ok(())
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration.
    /// If the file exists but is invalid TOML, returns an error with
    /// a helpful message.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self> {
        Self::load(default_config_path())
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("Invalid TOML configuration: {}", format_toml_error(&e)))
    }

    /// Save configuration to a file.
    ///
    /// Creates parent directories if they don't exist.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = self.to_toml()?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::debug!("Configuration saved to {:?}", path);
        Ok(())
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }
}

/// Format a TOML deserialization error for user-friendly display.
fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.daemon.log_level, "info");
        assert!(config.daemon.log_file.is_none());
        assert!(config.bridge.adb_path.is_none());
        assert!(config.bridge.default_device.is_none());
        assert_eq!(config.session.max_sessions, 10);
        assert_eq!(config.session.poll_interval_ms, 50);
        assert_eq!(config.session.close_grace_ms, 500);
        assert_eq!(config.session.cleanup_interval_secs, 60);
        assert_eq!((config.session.rows, config.session.cols), (24, 80));
    }

    #[test]
    fn test_default_daemon_config() {
        let config = DaemonConfig::default();
        assert_eq!(config.log_level, "info");
        assert!(config.data_dir.to_string_lossy().contains("ubterm"));
    }

    #[test]
    fn test_daemon_paths() {
        let mut config = DaemonConfig::default();
        config.data_dir = PathBuf::from("/srv/ubterm");
        assert_eq!(config.pid_file(), PathBuf::from("/srv/ubterm/daemon.pid"));

        config.socket_path = Some(PathBuf::from("/tmp/custom.sock"));
        assert_eq!(config.resolved_socket_path(), PathBuf::from("/tmp/custom.sock"));
    }

    #[test]
    fn test_session_options() {
        let mut config = SessionConfig::default();
        config.rows = 40;
        config.cols = 100;
        config.poll_interval_ms = 25;

        let options = config.options();
        assert_eq!(options.size, TermSize::new(40, 100));
        assert_eq!(options.poll_interval, Duration::from_millis(25));
        assert_eq!(options.close_grace, Duration::from_millis(500));
        assert_eq!(config.cleanup_interval(), Duration::from_secs(60));
    }

    #[test]
    fn test_from_toml_empty() {
        // Empty TOML should use all defaults
        let config = Config::from_toml("").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_from_toml_partial() {
        let toml = r#"
[daemon]
log_level = "debug"

[session]
max_sessions = 5
"#;
        let config = Config::from_toml(toml).unwrap();

        assert_eq!(config.daemon.log_level, "debug");
        assert_eq!(config.session.max_sessions, 5);
        assert_eq!(config.session.poll_interval_ms, 50);
        assert!(config.bridge.adb_path.is_none());
    }

    #[test]
    fn test_from_toml_full() {
        let toml = r#"
[daemon]
data_dir = "/custom/data"
log_level = "trace"
log_file = "/var/log/ubterm.log"
socket_path = "/run/ubterm.sock"

[bridge]
adb_path = "/opt/platform-tools/adb"
default_device = "emulator-5554"

[session]
max_sessions = 20
poll_interval_ms = 20
close_grace_ms = 1000
cleanup_interval_secs = 30
rows = 50
cols = 132
"#;
        let config = Config::from_toml(toml).unwrap();

        assert_eq!(config.daemon.data_dir, PathBuf::from("/custom/data"));
        assert_eq!(config.daemon.log_level, "trace");
        assert_eq!(
            config.daemon.log_file,
            Some(PathBuf::from("/var/log/ubterm.log"))
        );
        assert_eq!(config.daemon.socket_path, Some(PathBuf::from("/run/ubterm.sock")));
        assert_eq!(
            config.bridge.adb_path,
            Some(PathBuf::from("/opt/platform-tools/adb"))
        );
        assert_eq!(config.bridge.default_device.as_deref(), Some("emulator-5554"));
        assert_eq!(config.session.max_sessions, 20);
        assert_eq!(config.session.poll_interval_ms, 20);
        assert_eq!(config.session.close_grace_ms, 1000);
        assert_eq!(config.session.cleanup_interval_secs, 30);
        assert_eq!((config.session.rows, config.session.cols), (50, 132));
    }

    #[test]
    fn test_from_toml_invalid_syntax() {
        let toml = r#"
[daemon
log_level = "debug"
"#;
        let result = Config::from_toml(toml);
        assert!(result.is_err());
        let err = result.unwrap_err().to_string();
        assert!(err.contains("Invalid TOML"));
    }

    #[test]
    fn test_from_toml_wrong_type() {
        let toml = r#"
[session]
max_sessions = "not a number"
"#;
        assert!(Config::from_toml(toml).is_err());
    }

    #[test]
    fn test_to_toml() {
        let config = Config::default();
        let toml = config.to_toml().unwrap();

        assert!(toml.contains("[daemon]"));
        assert!(toml.contains("[bridge]"));
        assert!(toml.contains("[session]"));
        // Unset optional values are omitted.
        assert!(!toml.contains("adb_path"));
    }

    #[test]
    fn test_roundtrip_custom() {
        let mut original = Config::default();
        original.daemon.log_level = "warn".to_string();
        original.bridge.adb_path = Some(PathBuf::from("/usr/bin/adb"));
        original.bridge.default_device = Some("ubports".to_string());
        original.session.max_sessions = 42;

        let toml = original.to_toml().unwrap();
        let loaded = Config::from_toml(&toml).unwrap();

        assert_eq!(original, loaded);
    }

    #[test]
    fn test_load_missing_file() {
        let config = Config::load("/nonexistent/path/config.toml").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nested").join("config.toml");

        let mut original = Config::default();
        original.daemon.log_level = "debug".to_string();
        original.session.close_grace_ms = 250;

        original.save(&config_path).unwrap();
        assert!(config_path.exists());

        let loaded = Config::load(&config_path).unwrap();
        assert_eq!(original, loaded);
    }

    #[test]
    fn test_load_invalid_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        fs::write(&config_path, "[session]\nrows = -1\n").unwrap();

        let err = Config::load(&config_path).unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to parse config file"));
    }

    #[test]
    fn test_default_config_path() {
        let path = default_config_path();
        assert!(path.ends_with("ubterm/config.toml"));
    }

    #[test]
    fn test_unknown_fields_ignored() {
        let toml = r#"
[daemon]
log_level = "info"
unknown_field = "ignored"

[unknown_section]
foo = "bar"
"#;
        let config = Config::from_toml(toml).unwrap();
        assert_eq!(config.daemon.log_level, "info");
    }

    #[test]
    #[serial]
    fn test_env_override_adb_path() {
        std::env::set_var("UBTERM_ADB_PATH", "/custom/adb");

        let mut config = Config::default();
        config.apply_env_overrides();

        std::env::remove_var("UBTERM_ADB_PATH");

        assert_eq!(config.bridge.adb_path, Some(PathBuf::from("/custom/adb")));
    }

    #[test]
    #[serial]
    fn test_env_override_log_level() {
        std::env::set_var("UBTERM_LOG_LEVEL", "trace");

        let mut config = Config::default();
        config.apply_env_overrides();

        std::env::remove_var("UBTERM_LOG_LEVEL");

        assert_eq!(config.daemon.log_level, "trace");
    }

    #[test]
    #[serial]
    fn test_env_override_empty_does_not_override() {
        std::env::set_var("UBTERM_ADB_PATH", "");
        std::env::set_var("UBTERM_LOG_LEVEL", "");

        let mut config = Config::default();
        config.apply_env_overrides();

        std::env::remove_var("UBTERM_ADB_PATH");
        std::env::remove_var("UBTERM_LOG_LEVEL");

        assert_eq!(config, Config::default());
    }

    #[test]
    #[serial]
    fn test_env_override_unset_does_not_override() {
        std::env::remove_var("UBTERM_ADB_PATH");
        std::env::remove_var("UBTERM_LOG_LEVEL");

        let mut config = Config::default();
        config.apply_env_overrides();

        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_validate_default_config() {
        assert_eq!(Config::default().validate(), Ok(()));
    }

    #[test]
    fn test_validate_max_sessions() {
        let mut config = Config::default();

        config.session.max_sessions = 0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidMaxSessions(0)));

        config.session.max_sessions = 1001;
        assert_eq!(config.validate(), Err(ConfigError::InvalidMaxSessions(1001)));

        config.session.max_sessions = 1000;
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn test_validate_poll_interval() {
        let mut config = Config::default();

        config.session.poll_interval_ms = 0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidPollInterval(0)));

        config.session.poll_interval_ms = 1001;
        assert_eq!(config.validate(), Err(ConfigError::InvalidPollInterval(1001)));

        config.session.poll_interval_ms = 1;
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn test_validate_close_grace() {
        let mut config = Config::default();

        config.session.close_grace_ms = 10_001;
        assert_eq!(config.validate(), Err(ConfigError::InvalidCloseGrace(10_001)));

        config.session.close_grace_ms = 0;
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn test_validate_cleanup_interval() {
        let mut config = Config::default();
        config.session.cleanup_interval_secs = 0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidCleanupInterval));
    }

    #[test]
    fn test_validate_terminal_size() {
        let mut config = Config::default();
        config.session.cols = 0;
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidTerminalSize { rows: 24, cols: 0 })
        );
    }

    #[test]
    fn test_validate_bridge_path() {
        let temp_dir = TempDir::new().unwrap();
        let existing = temp_dir.path().join("adb");
        fs::write(&existing, "").unwrap();

        let mut config = Config::default();
        config.bridge.adb_path = Some(existing);
        assert_eq!(config.validate(), Ok(()));

        let missing = temp_dir.path().join("missing-adb");
        config.bridge.adb_path = Some(missing.clone());
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidBridgePath(missing.display().to_string()))
        );

        config.bridge.adb_path = Some(PathBuf::from("definitely-not-a-real-binary-xyz123"));
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidBridgePath(_))
        ));
    }

    #[test]
    fn test_validate_log_level() {
        let mut config = Config::default();

        for level in VALID_LOG_LEVELS {
            config.daemon.log_level = level.to_string();
            assert_eq!(config.validate(), Ok(()));
        }

        config.daemon.log_level = "DEBUG".to_string();
        assert_eq!(config.validate(), Ok(()));

        config.daemon.log_level = "verbose".to_string();
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidLogLevel("verbose".to_string()))
        );

        config.daemon.log_level = String::new();
        assert!(config.validate().is_err());
    }
}
