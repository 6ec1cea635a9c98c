//! Configuration for vtrec.
//!
//! Settings are read from `~/.vtrec/config.toml`; every field is optional and
//! falls back to its default. Command-line flags override file values.
//!
//! ```toml
//! width = 100
//! height = 30
//! shell = "/bin/bash"
//!
//! [session]
//! term = "xterm-256color"
//! poll_interval_ms = 50
//! stop_grace_ms = 1000
//! force_pipe = false
//!
//! [recording]
//! frame_interval_ms = 100
//! typing_delay_ms = 50
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not determine home directory")]
    NoHome,
}

/// Main configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Terminal columns
    pub width: u16,
    /// Terminal rows
    pub height: u16,
    /// Shell used to run commands (platform default when unset)
    pub shell: Option<String>,
    pub session: SessionConfig,
    pub recording: RecordingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            width: 80,
            height: 24,
            shell: None,
            session: SessionConfig::default(),
            recording: RecordingConfig::default(),
        }
    }
}

/// Session and reader-thread settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// `TERM` for the spawned command
    pub term: String,
    /// Console codepage (Windows only)
    pub codepage: Option<u32>,
    /// Upper bound on one readiness wait in the reader
    pub poll_interval_ms: u64,
    /// Time between the graceful terminate and the forced kill
    pub stop_grace_ms: u64,
    /// Upper bound on joining the reader thread
    pub drain_timeout_ms: u64,
    pub read_buffer_size: usize,
    /// Characters of raw output kept for content probing
    pub raw_buffer_limit: usize,
    /// Reply to device status and attribute queries
    pub answer_queries: bool,
    /// Capture through pipes even when a pseudo-terminal is available
    pub force_pipe: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            term: "xterm-256color".to_string(),
            codepage: if cfg!(windows) { Some(65001) } else { None },
            poll_interval_ms: 50,
            stop_grace_ms: 1000,
            drain_timeout_ms: 500,
            read_buffer_size: 4096,
            raw_buffer_limit: 65536,
            answer_queries: true,
            force_pipe: false,
        }
    }
}

impl SessionConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

/// Frame sampling and input pacing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    pub frame_interval_ms: u64,
    /// Pause between typed characters
    pub typing_delay_ms: u64,
    /// Pause after a key press before the next action
    pub key_settle_ms: u64,
    /// How long to wait for a started program to draw something
    pub first_paint_timeout_ms: u64,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            frame_interval_ms: 100,
            typing_delay_ms: 50,
            key_settle_ms: 100,
            first_paint_timeout_ms: 3000,
        }
    }
}

impl Config {
    /// Load configuration from `~/.vtrec/config.toml`, or defaults
    pub fn load() -> Self {
        let Some(path) = Self::config_path() else {
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }
        match Self::load_from(&path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("{}; using defaults", e);
                Self::default()
            }
        }
    }

    /// Load configuration from a specific file
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Save configuration to a specific file
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }
        fs::write(path, content).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Save configuration to `~/.vtrec/config.toml`
    pub fn save(&self) -> Result<(), ConfigError> {
        let path = Self::config_path().ok_or(ConfigError::NoHome)?;
        self.save_to(&path)
    }

    /// Get config file path
    pub fn config_path() -> Option<PathBuf> {
        home_dir().map(|home| home.join(".vtrec").join("config.toml"))
    }
}

// Get home directory
fn home_dir() -> Option<PathBuf> {
    std::env::var_os("USERPROFILE")
        .or_else(|| std::env::var_os("HOME"))
        .map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config = toml::from_str("width = 120\n[session]\nforce_pipe = true\n").unwrap();
        assert_eq!(config.width, 120);
        assert_eq!(config.height, 24);
        assert!(config.session.force_pipe);
        assert_eq!(config.session.poll_interval_ms, 50);
        assert_eq!(config.recording, RecordingConfig::default());
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.shell = Some("/bin/bash".to_string());
        config.recording.typing_delay_ms = 10;
        config.save_to(&path).unwrap();

        assert_eq!(Config::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_parse_error_names_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        fs::write(&path, "width = \"wide\"").unwrap();

        let err = Config::load_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("bad.toml"));
    }

    #[test]
    fn test_missing_file() {
        let err = Config::load_from(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
