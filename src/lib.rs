//! CrabCapture: capture-and-record pipeline for camera applications
//!
//! This crate takes a continuous stream of video and audio samples from a
//! capture device, routes video through an optional filter to a preview
//! renderer, and records both into a file with pause/resume and device
//! hot-swap, without dropping, duplicating or misordering frames.
//!
//! # Features
//! - Serialized session configuration with begin/commit brackets
//! - Device controllers with locked, clamped focus/exposure/zoom/torch changes
//! - Frame router with format-change detection and a pluggable filter
//! - Pausable recorder with continuous presentation timestamps
//! - MP4 output through openh264 + muxide (`recording`), Opus audio (`audio`)
//! - nokhwa/cpal hardware devices (`native`)
//!
//! # Usage
//! Add this to your `Cargo.toml`:
//! ```toml
//! [dependencies]
//! crabcapture = { version = "0.1", features = ["recording", "audio"] }
//! ```
//!
//! Then:
//! ```rust,ignore
//! use std::sync::Arc;
//! use crabcapture::{CameraManager, CrabCaptureConfig, StreamingBackend};
//! use crabcapture::device::native::NativeDiscovery;
//! use crabcapture::recording::{Mp4WriterFactory, RecordingConfig};
//!
//! crabcapture::init_logging();
//! let config = CrabCaptureConfig::load_or_default();
//! let manager = CameraManager::new(
//!     Arc::new(StreamingBackend::new()),
//!     Arc::new(NativeDiscovery::new(config.session.device_queue_depth)),
//!     Arc::new(Mp4WriterFactory::from_config(&RecordingConfig::from_defaults(&config.recording))),
//!     config,
//! )?;
//! manager.setup_default_devices().await?;
//! manager.start_session();
//! let path = manager.start_recording()?;
//! ```
pub mod config;
pub mod device;
pub mod dispatch;
pub mod errors;
pub mod filter;
pub mod manager;
pub mod models;
pub mod observe;
pub mod output;
pub mod recording;
pub mod render;
pub mod session;
pub mod timing;
pub mod types;

// Testing utilities - synthetic devices and data for offline testing
pub mod testing;

// Re-exports for convenience
pub use config::CrabCaptureConfig;
pub use device::{
    discover, AudioDeviceController, CaptureDevice, DeviceDiscovery, DevicePosition, DeviceType,
    StaticDiscovery, VideoDeviceController,
};
pub use dispatch::{CallbackQueue, SerialQueue};
pub use errors::CaptureError;
pub use filter::{Filter, SepiaFilter, SharedFilter};
pub use manager::CameraManager;
pub use models::{LivePhoto, Photo, RecordedVideo};
pub use output::{VideoDataOutput, VideoOutputDelegate};
pub use recording::{OutputFile, Recorder, RecorderDelegate, RecordingConfig, RecordingStatus};
pub use render::{PreviewRenderer, Renderer};
pub use session::{
    CaptureBackend, CaptureSession, InterruptionReason, SessionDelegate, StreamingBackend,
};
pub use timing::{MediaClock, MediaTime, PTSClock};
pub use types::{
    AudioBuffer, AudioFormat, ContainerType, FourCharCode, MediaKind, PixelBuffer, Sample,
    VideoFormat, VideoFrame, VideoOrientation,
};

/// Initialize logging for the capture pipeline
pub fn init_logging() {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "crabcapture=info");
    }
    let _ = env_logger::try_init();
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

/// Get crate information
pub fn get_info() -> CrateInfo {
    CrateInfo {
        name: NAME.to_string(),
        version: VERSION.to_string(),
        description: DESCRIPTION.to_string(),
        features: enabled_features(),
    }
}

fn enabled_features() -> Vec<String> {
    let mut features = Vec::new();
    if cfg!(feature = "recording") {
        features.push("recording".to_string());
    }
    if cfg!(feature = "audio") {
        features.push("audio".to_string());
    }
    if cfg!(feature = "native") {
        features.push("native".to_string());
    }
    features
}

/// Crate information structure
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CrateInfo {
    pub name: String,
    pub version: String,
    pub description: String,
    pub features: Vec<String>,
}
