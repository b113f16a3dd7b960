use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Validation(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub camera: CameraConfig,
    pub recognition: RecognitionConfig,
    pub attendance: AttendanceConfig,
    pub storage: StorageConfig,
    pub debug: DebugConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraConfig {
    /// Device index to open when none is given on the command line
    pub index: Option<usize>,
    pub width: u32,
    pub height: u32,

    // Indices 0..max_index are probed when listing cameras
    #[serde(default = "default_max_index")]
    pub max_index: usize,
}

/// Longest cooldown accepted by [`Config::validate`], one day
pub const MAX_COOLDOWN_SECS: u64 = 24 * 60 * 60;

fn default_max_index() -> usize {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognitionConfig {
    /// Helper program that turns a PNG frame on stdin into JSON face encodings
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,

    /// Maximum Euclidean distance at which two encodings are the same person
    #[serde(default = "default_match_threshold")]
    pub threshold: f32,
}

fn default_match_threshold() -> f32 {
    0.6
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttendanceConfig {
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,

    /// Keep the last-status table in memory instead of rescanning the log per decision
    #[serde(default = "default_cache_status")]
    pub cache_status: bool,
}

fn default_cooldown_secs() -> u64 {
    60
}

fn default_cache_status() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub log_path: PathBuf,
    pub database_path: PathBuf,
    pub blob_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebugConfig {
    pub save_frames: bool,
    pub output_dir: PathBuf,
}

impl Config {
    /// Load configuration with fallback chain:
    /// 1. /etc/rollcall/rollcall.toml (system-wide)
    /// 2. ~/.config/rollcall/rollcall.toml (user)
    /// 3. Compiled defaults
    pub fn load() -> Result<Self, ConfigError> {
        if let Ok(config) = Self::load_from_path("/etc/rollcall/rollcall.toml") {
            config.validate()?;
            return Ok(config);
        }

        if let Some(home) = std::env::var_os("HOME") {
            let user_config = PathBuf::from(home)
                .join(".config")
                .join("rollcall")
                .join("rollcall.toml");
            if let Ok(config) = Self::load_from_path(&user_config) {
                config.validate()?;
                return Ok(config);
            }
        }

        let config = Self::default();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(ConfigError::Validation(
                "Camera dimensions must be non-zero".to_string(),
            ));
        }

        if self.camera.max_index == 0 {
            return Err(ConfigError::Validation(
                "Camera max_index must be greater than 0".to_string(),
            ));
        }

        if self.recognition.command.trim().is_empty() {
            return Err(ConfigError::Validation(
                "Recognition command cannot be empty".to_string(),
            ));
        }

        if !(self.recognition.threshold > 0.0) {
            return Err(ConfigError::Validation(
                "Match threshold must be greater than 0.0".to_string(),
            ));
        }

        if self.attendance.cooldown_secs == 0 {
            return Err(ConfigError::Validation(
                "Cooldown must be greater than 0".to_string(),
            ));
        }

        if self.attendance.cooldown_secs > MAX_COOLDOWN_SECS {
            return Err(ConfigError::Validation(format!(
                "Cooldown must be at most {} seconds",
                MAX_COOLDOWN_SECS
            )));
        }

        for (label, path) in [
            ("Attendance log path", &self.storage.log_path),
            ("Database path", &self.storage.database_path),
            ("Blob directory", &self.storage.blob_dir),
            ("Debug output directory", &self.debug.output_dir),
        ] {
            if path.as_os_str().is_empty() {
                return Err(ConfigError::Validation(format!("{} cannot be empty", label)));
            }
        }

        Ok(())
    }

    /// Cooldown window between two accepted events for the same person
    pub fn cooldown(&self) -> Result<chrono::Duration, ConfigError> {
        i64::try_from(self.attendance.cooldown_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .ok_or_else(|| {
                ConfigError::Validation(format!(
                    "Cooldown of {} seconds is out of range",
                    self.attendance.cooldown_secs
                ))
            })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            camera: CameraConfig {
                index: None,
                width: 640,
                height: 480,
                max_index: 5,
            },
            recognition: RecognitionConfig {
                command: "rollcall-encoder".to_string(),
                args: Vec::new(),
                threshold: 0.6,
            },
            attendance: AttendanceConfig {
                cooldown_secs: 60,
                cache_status: true,
            },
            storage: StorageConfig {
                log_path: PathBuf::from("/var/lib/rollcall/attendance.csv"),
                database_path: PathBuf::from("/var/lib/rollcall/rollcall.db"),
                blob_dir: PathBuf::from("/var/lib/rollcall/blobs"),
            },
            debug: DebugConfig {
                save_frames: false,
                output_dir: PathBuf::from("/var/lib/rollcall/frames"),
            },
        }
    }
}
