//! Recording configuration types

use serde::{Deserialize, Serialize};

use crate::config::RecordingDefaults;
use crate::types::{ContainerType, FourCharCode};

use super::writer::{AudioTrackSettings, VideoTrackSettings};

/// Quality presets for video recording
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum RecordingQuality {
    /// Lower bitrate, good for previews
    Low,
    /// Balanced quality
    Medium,
    #[default]
    High,
    /// Whatever bitrate the config carries
    Custom,
}

impl RecordingQuality {
    /// Recommended bitrate in bits per second
    pub fn bitrate(&self) -> u32 {
        match self {
            RecordingQuality::Low => 2_500_000,
            RecordingQuality::Medium => 5_000_000,
            RecordingQuality::High => 10_000_000,
            RecordingQuality::Custom => 5_000_000,
        }
    }
}

/// Compression and container settings applied to each new recording
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingConfig {
    pub container: ContainerType,
    pub video_codec: FourCharCode,
    /// Target video bitrate in bits per second
    pub bitrate: u32,
    /// Frame rate used when the source format has no frame duration
    pub fps: f64,
    pub quality: RecordingQuality,
    /// Enable fast-start for web streaming (moov before mdat)
    pub fast_start: bool,
    /// Optional title metadata
    pub title: Option<String>,
    pub audio_codec: FourCharCode,
    pub audio_bitrate: u32,
}

impl RecordingConfig {
    /// Create configuration from a quality preset
    pub fn from_quality(quality: RecordingQuality) -> Self {
        Self {
            bitrate: quality.bitrate(),
            quality,
            ..Self::from_defaults(&RecordingDefaults::default())
        }
    }

    /// Configuration matching the `[recording]` section of the config file
    pub fn from_defaults(defaults: &RecordingDefaults) -> Self {
        let video_codec = FourCharCode::from_bytes(
            defaults
                .video_codec
                .as_bytes()
                .try_into()
                .unwrap_or(*b"avc1"),
        );
        Self {
            container: defaults.container,
            video_codec,
            bitrate: defaults.bitrate,
            fps: defaults.fps,
            quality: RecordingQuality::Custom,
            fast_start: defaults.fast_start,
            title: defaults.title.clone(),
            audio_codec: FourCharCode::OPUS,
            audio_bitrate: defaults.audio_bitrate,
        }
    }

    /// Set the title metadata
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Set fast-start mode
    pub fn with_fast_start(mut self, enabled: bool) -> Self {
        self.fast_start = enabled;
        self
    }

    /// Set custom bitrate
    pub fn with_bitrate(mut self, bitrate: u32) -> Self {
        self.bitrate = bitrate;
        self.quality = RecordingQuality::Custom;
        self
    }

    pub fn with_container(mut self, container: ContainerType) -> Self {
        self.container = container;
        self
    }

    pub fn video_settings(&self) -> VideoTrackSettings {
        VideoTrackSettings {
            codec: self.video_codec,
            bitrate: self.bitrate,
            fallback_fps: self.fps,
        }
    }

    pub fn audio_settings(&self) -> AudioTrackSettings {
        AudioTrackSettings {
            codec: self.audio_codec,
            bitrate: self.audio_bitrate,
        }
    }
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self::from_defaults(&RecordingDefaults::default())
    }
}

/// Statistics reported by a writer once its container is finalized
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordingStats {
    /// Total number of video frames written
    pub video_frames: u64,
    /// Total number of audio frames written
    pub audio_frames: u64,
    /// Duration in seconds, when the writer knows it
    pub duration_secs: Option<f64>,
    /// Total bytes written to file
    pub bytes_written: u64,
    /// Frames the writer refused (non-increasing timestamps, empty encodes)
    pub dropped_frames: u64,
}

impl RecordingStats {
    /// Calculate the average bitrate achieved
    pub fn avg_bitrate(&self) -> f64 {
        match self.duration_secs {
            Some(duration) if duration > 0.0 => (self.bytes_written as f64 * 8.0) / duration,
            _ => 0.0,
        }
    }

    /// Average frames per second achieved
    pub fn actual_fps(&self) -> f64 {
        match self.duration_secs {
            Some(duration) if duration > 0.0 => self.video_frames as f64 / duration,
            _ => 0.0,
        }
    }
}
