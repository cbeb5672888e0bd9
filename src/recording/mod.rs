//! Recording: the pausable recorder state machine and the writers behind it
//!
//! A [`Recorder`] owns one output file for one recording. It is fed samples
//! by the frame router, keeps presentation timestamps continuous across
//! pauses, and hands a [`RecordedVideo`](crate::models::RecordedVideo) back
//! through its [`RecorderDelegate`] once the file is finalized.
//!
//! Containers are written through the [`MediaWriter`] seam. With the
//! `recording` feature the crate ships [`Mp4Writer`]:
//! - openh264 for H.264 encoding
//! - muxide for MP4 muxing
//! - libopus for the audio track (feature `audio`)
//!
//! # Example
//! ```rust,ignore
//! use crabcapture::recording::{Mp4WriterFactory, OutputFile, Recorder, RecordingConfig};
//!
//! let config = RecordingConfig::default();
//! let recorder = Recorder::new(
//!     OutputFile::mp4("output.mp4"),
//!     Arc::new(Mp4WriterFactory::from_config(&config)),
//!     delegate,
//!     callbacks,
//!     clock,
//! )?;
//! recorder.add_video_track(format, VideoOrientation::Portrait, config.video_settings());
//! recorder.prepare_to_record();
//!
//! // From the delivery lane:
//! recorder.append_video(frame);
//!
//! // When done; the delegate receives the RecordedVideo:
//! recorder.finish_recording();
//! ```

mod config;
mod recorder;
mod status;
mod timeline;
mod writer;

#[cfg(feature = "recording")]
mod encoder;
#[cfg(feature = "recording")]
mod mp4;
#[cfg(feature = "audio")]
mod opus;

pub use config::{RecordingConfig, RecordingQuality, RecordingStats};
pub use recorder::{Recorder, RecorderDelegate};
pub use status::RecordingStatus;
pub use timeline::PauseTimeline;
pub use writer::{AudioTrackSettings, MediaWriter, OutputFile, VideoTrackSettings, WriterFactory};

#[cfg(feature = "recording")]
pub use encoder::{EncodedFrame, H264Encoder};
#[cfg(feature = "recording")]
pub use mp4::{Mp4Options, Mp4Writer, Mp4WriterFactory};
#[cfg(feature = "audio")]
pub use opus::{EncodedAudio, OpusEncoder, OPUS_FRAME_SAMPLES};
