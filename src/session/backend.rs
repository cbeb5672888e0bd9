use std::sync::Arc;

use crate::device::DeviceInput;
use crate::errors::CaptureError;
use crate::observe::Observers;
use crate::types::{MediaKind, Sample, VideoOrientation};

use super::InterruptionReason;

/// Outputs a session can carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputKind {
    VideoData,
    AudioData,
    Photo,
}

impl OutputKind {
    pub fn media_kind(&self) -> MediaKind {
        match self {
            OutputKind::VideoData | OutputKind::Photo => MediaKind::Video,
            OutputKind::AudioData => MediaKind::Audio,
        }
    }
}

/// Receives samples from a delivery lane
pub trait SampleSink: Send + Sync {
    fn deliver(&self, sample: Sample, connection: &Connection);
}

/// An output attached to the session
#[derive(Clone)]
pub enum SessionOutput {
    VideoData(Arc<dyn SampleSink>),
    AudioData(Arc<dyn SampleSink>),
    Photo,
}

impl SessionOutput {
    pub fn kind(&self) -> OutputKind {
        match self {
            SessionOutput::VideoData(_) => OutputKind::VideoData,
            SessionOutput::AudioData(_) => OutputKind::AudioData,
            SessionOutput::Photo => OutputKind::Photo,
        }
    }

    pub fn sink(&self) -> Option<&Arc<dyn SampleSink>> {
        match self {
            SessionOutput::VideoData(sink) | SessionOutput::AudioData(sink) => Some(sink),
            SessionOutput::Photo => None,
        }
    }
}

/// Link between one input and one data output
///
/// A new connection (with a new id) forms whenever the input or output on
/// either end is replaced.
#[derive(Debug, Clone, PartialEq)]
pub struct Connection {
    pub id: uuid::Uuid,
    pub media_kind: MediaKind,
    pub input_id: uuid::Uuid,
    pub video_orientation: VideoOrientation,
}

/// Notifications raised by the hardware pipeline
#[derive(Debug, Clone)]
pub enum BackendEvent {
    RunningChanged(bool),
    RuntimeError(Arc<CaptureError>),
    InterruptionBegan(InterruptionReason),
    InterruptionEnded,
}

/// The hardware pipeline behind a [`super::CaptureSession`]
///
/// Graph mutations are bracketed by `begin_configuration` and
/// `commit_configuration`; the session guarantees they all happen on its
/// configuration lane.
pub trait CaptureBackend: Send + Sync {
    fn begin_configuration(&self);
    fn commit_configuration(&self);

    fn can_add_input(&self, input: &DeviceInput) -> bool;
    fn add_input(&self, input: DeviceInput) -> Result<(), CaptureError>;
    fn remove_input(&self, input: &DeviceInput);
    fn inputs(&self) -> Vec<DeviceInput>;

    fn can_add_output(&self, kind: OutputKind) -> bool;
    fn add_output(&self, output: SessionOutput) -> Result<(), CaptureError>;

    fn connection(&self, media_kind: MediaKind) -> Option<Connection>;
    fn set_video_orientation(&self, orientation: VideoOrientation);

    fn start_running(&self) -> Result<(), CaptureError>;
    fn stop_running(&self);
    fn is_running(&self) -> bool;

    fn events(&self) -> &Observers<BackendEvent>;
}
