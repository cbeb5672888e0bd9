//! Delegates that remember what they were told

use std::sync::Mutex;
use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::errors::CaptureError;
use crate::models::RecordedVideo;
use crate::output::VideoOutputDelegate;
use crate::recording::RecorderDelegate;
use crate::session::{InterruptionReason, SessionDelegate};

/// One session lifecycle notification
#[derive(Debug, Clone, PartialEq)]
pub enum SessionCall {
    RunningChanged(bool),
    RuntimeError(String),
    Interrupted(InterruptionReason),
    InterruptionEnded,
}

#[derive(Default)]
pub struct RecordingSessionDelegate {
    calls: Mutex<Vec<SessionCall>>,
}

impl RecordingSessionDelegate {
    pub fn calls(&self) -> Vec<SessionCall> {
        self.calls.lock().expect("lock poisoned").clone()
    }

    fn push(&self, call: SessionCall) {
        self.calls.lock().expect("lock poisoned").push(call);
    }
}

impl SessionDelegate for RecordingSessionDelegate {
    fn session_running_changed(&self, running: bool) {
        self.push(SessionCall::RunningChanged(running));
    }

    fn session_runtime_error(&self, error: &CaptureError) {
        self.push(SessionCall::RuntimeError(error.to_string()));
    }

    fn session_interrupted(&self, reason: InterruptionReason) {
        self.push(SessionCall::Interrupted(reason));
    }

    fn session_interruption_ended(&self) {
        self.push(SessionCall::InterruptionEnded);
    }
}

/// One recorder callback
#[derive(Debug, Clone, PartialEq)]
pub enum RecorderEvent {
    Started(Uuid),
    Finished(Uuid, RecordedVideo),
    Failed(Uuid, String),
}

#[derive(Default)]
pub struct CollectingRecorderDelegate {
    events: Mutex<Vec<RecorderEvent>>,
}

impl CollectingRecorderDelegate {
    pub fn events(&self) -> Vec<RecorderEvent> {
        self.events.lock().expect("lock poisoned").clone()
    }

    fn push(&self, event: RecorderEvent) {
        self.events.lock().expect("lock poisoned").push(event);
    }
}

impl RecorderDelegate for CollectingRecorderDelegate {
    fn recorder_started(&self, recorder: Uuid) {
        self.push(RecorderEvent::Started(recorder));
    }

    fn recorder_finished(&self, recorder: Uuid, video: RecordedVideo) {
        self.push(RecorderEvent::Finished(recorder, video));
    }

    fn recorder_failed(&self, recorder: Uuid, error: CaptureError) {
        self.push(RecorderEvent::Failed(recorder, error.to_string()));
    }
}

/// One recording callback from the frame router
#[derive(Debug, Clone, PartialEq)]
pub enum OutputEvent {
    Started,
    Finished(RecordedVideo),
    Failed(String),
}

#[derive(Default)]
pub struct CollectingOutputDelegate {
    events: Mutex<Vec<OutputEvent>>,
}

impl CollectingOutputDelegate {
    pub fn events(&self) -> Vec<OutputEvent> {
        self.events.lock().expect("lock poisoned").clone()
    }

    /// Poll until at least `count` events arrived or `timeout` passed.
    pub fn wait_for(&self, count: usize, timeout: Duration) -> Vec<OutputEvent> {
        let deadline = Instant::now() + timeout;
        loop {
            let events = self.events();
            if events.len() >= count || Instant::now() >= deadline {
                return events;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    fn push(&self, event: OutputEvent) {
        self.events.lock().expect("lock poisoned").push(event);
    }
}

impl VideoOutputDelegate for CollectingOutputDelegate {
    fn recording_started(&self) {
        self.push(OutputEvent::Started);
    }

    fn recording_finished(&self, video: RecordedVideo) {
        self.push(OutputEvent::Finished(video));
    }

    fn recording_failed(&self, error: CaptureError) {
        self.push(OutputEvent::Failed(error.to_string()));
    }
}
