//! Configuration management for CrabCapture
//!
//! Provides loading, saving and validation of session tuning, recording
//! defaults and storage preferences.

use crate::errors::CaptureError;
use crate::types::ContainerType;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrabCaptureConfig {
    pub session: SessionConfig,
    pub recording: RecordingDefaults,
    pub storage: StorageConfig,
}

/// Capture session tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Output buffers the filter pool keeps around after a format change
    pub retained_buffer_hint: usize,
    /// Frame rate ceiling applied under serious or critical system pressure
    pub pressure_max_fps: u32,
    /// Frame rate floor applied under serious or critical system pressure
    pub pressure_min_fps: u32,
    /// Bounded queue depth between a native device and its delivery lane
    pub device_queue_depth: usize,
}

/// Defaults for new recordings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingDefaults {
    /// Output container
    pub container: ContainerType,
    /// Video codec four-character code (e.g. "avc1")
    pub video_codec: String,
    /// Target video bitrate in bits per second
    pub bitrate: u32,
    /// Nominal frames per second used when a track has no frame duration
    pub fps: f64,
    /// Move the index to the front of the file for progressive playback
    pub fast_start: bool,
    /// Optional title written into the container metadata
    pub title: Option<String>,
    /// Audio bitrate in bits per second
    pub audio_bitrate: u32,
}

/// Storage and file management configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory recordings are written to
    pub output_directory: String,
    /// File name prefix for generated recording paths
    pub file_prefix: String,
}

impl Default for RecordingDefaults {
    fn default() -> Self {
        Self {
            container: ContainerType::Mp4,
            video_codec: "avc1".to_string(),
            bitrate: 5_000_000,
            fps: 30.0,
            fast_start: true,
            title: None,
            audio_bitrate: 128_000,
        }
    }
}

impl Default for CrabCaptureConfig {
    fn default() -> Self {
        Self {
            session: SessionConfig {
                retained_buffer_hint: 3,
                pressure_max_fps: 20,
                pressure_min_fps: 15,
                device_queue_depth: 4,
            },
            recording: RecordingDefaults::default(),
            storage: StorageConfig {
                output_directory: "./recordings".to_string(),
                file_prefix: "capture".to_string(),
            },
        }
    }
}

impl CrabCaptureConfig {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, CaptureError> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path).map_err(|e| {
            CaptureError::ConfigFile(format!("Failed to read config file: {}", e))
        })?;

        let config: CrabCaptureConfig = toml::from_str(&contents).map_err(|e| {
            CaptureError::ConfigFile(format!("Failed to parse config file: {}", e))
        })?;

        log::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), CaptureError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                CaptureError::ConfigFile(format!("Failed to create config directory: {}", e))
            })?;
        }

        let toml_string = toml::to_string_pretty(self).map_err(|e| {
            CaptureError::ConfigFile(format!("Failed to serialize config: {}", e))
        })?;

        fs::write(path, toml_string).map_err(|e| {
            CaptureError::ConfigFile(format!("Failed to write config file: {}", e))
        })?;

        log::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Get default config file path
    pub fn default_path() -> PathBuf {
        PathBuf::from("crabcapture.toml")
    }

    /// Load from default location or fall back to defaults
    pub fn load_or_default() -> Self {
        Self::load_from_file(Self::default_path()).unwrap_or_else(|e| {
            log::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), String> {
        if self.session.retained_buffer_hint == 0 {
            return Err("Retained buffer hint must be at least 1".to_string());
        }
        if self.session.pressure_min_fps == 0
            || self.session.pressure_min_fps > self.session.pressure_max_fps
        {
            return Err("Pressure frame rates must satisfy 0 < min <= max".to_string());
        }
        if self.session.device_queue_depth == 0 {
            return Err("Device queue depth must be at least 1".to_string());
        }

        if self.recording.video_codec.len() != 4 || !self.recording.video_codec.is_ascii() {
            return Err("Video codec must be a four-character code".to_string());
        }
        if self.recording.bitrate == 0 {
            return Err("Bitrate must be positive".to_string());
        }
        if !(self.recording.fps > 0.0 && self.recording.fps <= 240.0) {
            return Err("Invalid FPS (must be within 0-240)".to_string());
        }
        if !matches!(
            self.recording.container,
            ContainerType::Mp4 | ContainerType::QuickTime
        ) {
            return Err("Recording container must be mp4 or mov".to_string());
        }

        if self.storage.output_directory.trim().is_empty() {
            return Err("Output directory must not be empty".to_string());
        }

        Ok(())
    }
}

impl StorageConfig {
    /// Fresh destination for a recording, e.g. `capture_20260101_120000_1a2b3c4d.mp4`
    pub fn next_recording_path(&self, container: ContainerType) -> PathBuf {
        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        let name = format!(
            "{}_{}_{}.{}",
            self.file_prefix,
            stamp,
            &suffix[..8],
            container.extension()
        );
        Path::new(&self.output_directory).join(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CrabCaptureConfig::default();
        assert_eq!(config.session.retained_buffer_hint, 3);
        assert_eq!(config.recording.container, ContainerType::Mp4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_recording_defaults_seed_config() {
        let defaults = RecordingDefaults::default();
        assert_eq!(defaults.video_codec, "avc1");
        assert_eq!(defaults.bitrate, 5_000_000);
        assert_eq!(defaults.audio_bitrate, 128_000);
        assert!(defaults.fast_start);
        assert_eq!(CrabCaptureConfig::default().recording, defaults);
    }

    #[test]
    fn test_config_validation() {
        let mut bad = CrabCaptureConfig::default();
        bad.session.pressure_min_fps = 30;
        assert!(bad.validate().is_err());

        let mut bad_codec = CrabCaptureConfig::default();
        bad_codec.recording.video_codec = "h264x".to_string();
        assert!(bad_codec.validate().is_err());

        let mut bad_container = CrabCaptureConfig::default();
        bad_container.recording.container = ContainerType::Jpeg;
        assert!(bad_container.validate().is_err());
    }

    #[test]
    fn test_config_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("nested").join("crabcapture.toml");

        let mut config = CrabCaptureConfig::default();
        config.recording.title = Some("Holiday".to_string());
        config.save_to_file(&config_path).unwrap();

        let loaded = CrabCaptureConfig::load_from_file(&config_path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_config_toml_format() {
        let config = CrabCaptureConfig::default();
        let toml_string = toml::to_string_pretty(&config).unwrap();

        assert!(toml_string.contains("[session]"));
        assert!(toml_string.contains("[recording]"));
        assert!(toml_string.contains("[storage]"));
        assert!(toml_string.contains("retained_buffer_hint"));
    }

    #[test]
    fn test_load_nonexistent_file() {
        let result = CrabCaptureConfig::load_from_file("nonexistent_file.toml");
        assert_eq!(result.unwrap(), CrabCaptureConfig::default());
    }

    #[test]
    fn test_load_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        fs::write(&path, "[session\nretained_buffer_hint = ").unwrap();
        assert!(matches!(
            CrabCaptureConfig::load_from_file(&path),
            Err(CaptureError::ConfigFile(_))
        ));
    }

    #[test]
    fn test_next_recording_path() {
        let storage = CrabCaptureConfig::default().storage;
        let a = storage.next_recording_path(ContainerType::Mp4);
        let b = storage.next_recording_path(ContainerType::Mp4);
        assert_ne!(a, b);
        assert_eq!(a.extension().and_then(|e| e.to_str()), Some("mp4"));
        assert!(a.starts_with("./recordings"));
        let name = a.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("capture_"));
    }
}
