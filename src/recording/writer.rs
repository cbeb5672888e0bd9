//! The multiplexed-writer seam
//!
//! A [`MediaWriter`] turns raw frames into one container file with a video
//! track and an optional audio track. The recorder drives it strictly from
//! its own lane, so implementations need `Send` but not `Sync`.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::errors::CaptureError;
use crate::timing::MediaTime;
use crate::types::{
    AudioBuffer, AudioFormat, ContainerType, FourCharCode, MediaKind, PixelBuffer, VideoFormat,
    VideoOrientation,
};

use super::config::RecordingStats;

/// Where a recording goes and in which container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputFile {
    pub path: PathBuf,
    pub container: ContainerType,
}

impl OutputFile {
    pub fn new(path: impl Into<PathBuf>, container: ContainerType) -> Self {
        Self {
            path: path.into(),
            container,
        }
    }

    pub fn mp4(path: impl Into<PathBuf>) -> Self {
        Self::new(path, ContainerType::Mp4)
    }
}

/// Compression settings for the video track
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoTrackSettings {
    pub codec: FourCharCode,
    /// Target bits per second
    pub bitrate: u32,
    /// Used when the source format carries no frame duration
    pub fallback_fps: f64,
}

impl Default for VideoTrackSettings {
    fn default() -> Self {
        Self {
            codec: FourCharCode::H264,
            bitrate: 5_000_000,
            fallback_fps: 30.0,
        }
    }
}

impl VideoTrackSettings {
    /// Frame rate for `format`, falling back when it has no frame duration
    pub fn fps_for(&self, format: &VideoFormat) -> f64 {
        let fps = format.fps();
        if fps > 0.0 {
            fps
        } else {
            self.fallback_fps
        }
    }
}

/// Compression settings for the audio track
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioTrackSettings {
    pub codec: FourCharCode,
    pub bitrate: u32,
}

impl Default for AudioTrackSettings {
    fn default() -> Self {
        Self {
            codec: FourCharCode::OPUS,
            bitrate: 128_000,
        }
    }
}

/// Writes timestamped frames into one container file
///
/// Timestamps passed to `start_session` and the `append_*` calls share one
/// source timeline; the writer places `start_session`'s time at zero.
pub trait MediaWriter: Send {
    fn can_apply_video(&self, format: &VideoFormat, settings: &VideoTrackSettings) -> bool;
    fn can_apply_audio(&self, format: &AudioFormat, settings: &AudioTrackSettings) -> bool;

    fn add_video_track(
        &mut self,
        format: &VideoFormat,
        orientation: VideoOrientation,
        settings: &VideoTrackSettings,
    ) -> Result<(), CaptureError>;
    fn add_audio_track(
        &mut self,
        format: &AudioFormat,
        settings: &AudioTrackSettings,
    ) -> Result<(), CaptureError>;

    fn has_track(&self, kind: MediaKind) -> bool;

    fn start_writing(&mut self) -> Result<(), CaptureError>;
    fn start_session(&mut self, at: MediaTime);

    /// Backpressure: a track that is not ready drops the sample.
    fn is_ready_for_more(&self, kind: MediaKind) -> bool;

    fn append_video(&mut self, pixels: &PixelBuffer, pts: MediaTime) -> Result<(), CaptureError>;
    fn append_audio(&mut self, buffer: &AudioBuffer, pts: MediaTime) -> Result<(), CaptureError>;

    fn mark_tracks_finished(&mut self);

    /// Finalize the container.
    fn finish(&mut self) -> Result<RecordingStats, CaptureError>;
}

/// Opens a writer for each new recording
pub trait WriterFactory: Send + Sync {
    fn create(&self, destination: &OutputFile) -> Result<Box<dyn MediaWriter>, CaptureError>;
}
