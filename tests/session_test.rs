//! Capture session integration tests
//!
//! Interruptions, runtime errors and device swaps observed through the
//! session delegate and the backend's graph.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crabcapture::device::{CaptureDevice, DeviceEvent, PressureLevel, VideoDeviceController};
use crabcapture::session::{
    CaptureBackend, CaptureSession, Connection, SampleSink, SessionDelegate, SessionOutput,
    StreamingBackend,
};
use crabcapture::testing::{
    synthetic_video_frame, RecordingSessionDelegate, SessionCall, SyntheticCamera,
};
use crabcapture::{CallbackQueue, CaptureError, InterruptionReason, Sample, VideoFormat};

/// Video output that drops everything it is handed
struct Discard;

impl SampleSink for Discard {
    fn deliver(&self, _sample: Sample, _connection: &Connection) {}
}

fn wait_until<F: Fn() -> bool>(condition: F) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

struct Rig {
    session: CaptureSession,
    backend: Arc<StreamingBackend>,
    controller: VideoDeviceController,
    camera: Arc<SyntheticCamera>,
    delegate: Arc<RecordingSessionDelegate>,
}

impl Rig {
    async fn running() -> Self {
        let backend = Arc::new(StreamingBackend::with_poll_interval(Duration::from_millis(5)));
        let callbacks = CallbackQueue::new("session_test.callbacks").unwrap();
        let delegate = Arc::new(RecordingSessionDelegate::default());
        let as_delegate: Arc<dyn SessionDelegate> = delegate.clone();
        let session = CaptureSession::new(backend.clone(), callbacks)
            .unwrap()
            .with_delegate(Arc::downgrade(&as_delegate));

        let camera = Arc::new(SyntheticCamera::builder("cam").build());
        let controller = VideoDeviceController::new();
        let bound = controller.clone();
        let device: Arc<dyn CaptureDevice> = camera.clone();
        session
            .configure_async(move |backend| {
                bound.setup_input(backend, device)?;
                backend.add_output(SessionOutput::VideoData(Arc::new(Discard)))
            })
            .await
            .unwrap();

        session.start();
        session.flush();
        assert!(session.is_running());

        Self {
            session,
            backend,
            controller,
            camera,
            delegate,
        }
    }

    fn saw(&self, call: &SessionCall) -> bool {
        wait_until(|| self.delegate.calls().contains(call))
    }
}

#[tokio::test]
async fn test_start_and_stop_notify_delegate() {
    let rig = Rig::running().await;
    assert!(rig.saw(&SessionCall::RunningChanged(true)));

    rig.session.stop();
    rig.session.flush();
    assert!(!rig.session.is_running());
    assert!(rig.saw(&SessionCall::RunningChanged(false)));
}

#[tokio::test]
async fn test_device_in_use_interrupts_until_samples_return() {
    let rig = Rig::running().await;
    rig.camera
        .push_error(CaptureError::DeviceInUse("another client".into()));
    assert!(rig.saw(&SessionCall::Interrupted(
        InterruptionReason::VideoDeviceInUseByAnotherClient
    )));
    assert!(rig.session.is_running());

    rig.camera
        .push_frame(synthetic_video_frame(0, VideoFormat::bgra(4, 4, 30.0)));
    assert!(rig.saw(&SessionCall::InterruptionEnded));
    rig.session.stop();
}

#[tokio::test]
async fn test_system_pressure_shutdown_interrupts() {
    let rig = Rig::running().await;
    // The delivery lane subscribes when it starts.
    assert!(wait_until(|| !rig.camera.events().is_empty()));

    rig.camera
        .emit(DeviceEvent::SystemPressureChanged(PressureLevel::Shutdown));
    assert!(rig.saw(&SessionCall::Interrupted(
        InterruptionReason::VideoDeviceNotAvailableDueToSystemPressure
    )));

    rig.camera
        .emit(DeviceEvent::SystemPressureChanged(PressureLevel::Nominal));
    assert!(rig.saw(&SessionCall::InterruptionEnded));
    rig.session.stop();
}

#[tokio::test]
async fn test_stream_failure_stops_session() {
    let rig = Rig::running().await;
    rig.camera.push_error(CaptureError::Stream("usb reset".into()));

    assert!(wait_until(|| {
        rig.delegate
            .calls()
            .iter()
            .any(|c| matches!(c, SessionCall::RuntimeError(_)))
    }));
    assert!(rig.saw(&SessionCall::RunningChanged(false)));
    assert!(!rig.session.is_running());

    rig.session.resume();
    rig.session.flush();
    assert!(rig.session.is_running());
}

#[tokio::test]
async fn test_media_services_reset_resumes_automatically() {
    let rig = Rig::running().await;
    rig.camera.push_error(CaptureError::MediaServicesReset);

    assert!(wait_until(|| {
        let calls = rig.delegate.calls();
        let failed = calls
            .iter()
            .position(|c| matches!(c, SessionCall::RuntimeError(_)));
        let restarted = calls
            .iter()
            .rposition(|c| *c == SessionCall::RunningChanged(true));
        matches!((failed, restarted), (Some(f), Some(r)) if r > f)
    }));
    assert!(wait_until(|| rig.session.is_running()));
    rig.session.stop();
}

#[tokio::test]
async fn test_refused_swap_keeps_previous_device() {
    let rig = Rig::running().await;
    let unplugged = Arc::new(SyntheticCamera::builder("unplugged").build());
    unplugged.set_connected(false);

    let controller = rig.controller.clone();
    let device: Arc<dyn CaptureDevice> = unplugged.clone();
    let result = rig
        .session
        .configure_async(move |backend| controller.change_device(backend, device))
        .await;

    assert!(matches!(result, Err(CaptureError::DeviceBind(_))));
    assert_eq!(rig.controller.device().unwrap().unique_id(), "cam");
    let inputs = rig.backend.inputs();
    assert_eq!(inputs.len(), 1);
    assert_eq!(inputs[0].device().unique_id(), "cam");
    assert!(!unplugged.is_streaming());
    rig.session.stop();
}

#[tokio::test]
async fn test_swap_moves_delivery_to_new_device() {
    let rig = Rig::running().await;
    assert!(wait_until(|| rig.camera.is_streaming()));
    let before = rig.backend.connections();

    let next = Arc::new(SyntheticCamera::builder("next").build());
    let controller = rig.controller.clone();
    let device: Arc<dyn CaptureDevice> = next.clone();
    rig.session
        .configure_async(move |backend| controller.change_device(backend, device))
        .await
        .unwrap();

    assert_eq!(rig.controller.device().unwrap().unique_id(), "next");
    assert_eq!(rig.backend.inputs().len(), 1);
    assert_ne!(before, rig.backend.connections());
    rig.session.stop();
    rig.session.flush();
    assert!(!next.is_streaming());
}
