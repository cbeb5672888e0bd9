//! Scriptable capture devices
//!
//! Samples and stream errors are pushed by the test and handed out by
//! `read_sample` in order. Every hardware change is recorded so tests can
//! assert on exactly what the controller did.

use std::marker::PhantomData;
use std::sync::Mutex;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};

use crate::device::{
    CaptureDevice, DeviceCapabilities, DeviceChange, DeviceEvent, DevicePosition, DeviceSettings,
    DeviceType, ExposureMode, FocusMode, TorchMode, ValueRange,
};
use crate::errors::CaptureError;
use crate::observe::Observers;
use crate::timing::MediaTime;
use crate::types::{AudioBuffer, MediaKind, Sample, VideoFrame};

/// Distinguishes the synthetic camera from the synthetic microphone
pub trait SyntheticKind: Send + Sync + 'static {
    const MEDIA_KIND: MediaKind;
    const DEVICE_TYPE: DeviceType;
    const POSITION: DevicePosition;

    fn capabilities() -> DeviceCapabilities;
}

pub struct Camera;
pub struct Microphone;

impl SyntheticKind for Camera {
    const MEDIA_KIND: MediaKind = MediaKind::Video;
    const DEVICE_TYPE: DeviceType = DeviceType::WideAngleCamera;
    const POSITION: DevicePosition = DevicePosition::Back;

    /// A well-equipped back camera
    fn capabilities() -> DeviceCapabilities {
        DeviceCapabilities {
            focus_modes: vec![
                FocusMode::Locked,
                FocusMode::AutoFocus,
                FocusMode::ContinuousAutoFocus,
            ],
            focus_point_of_interest: true,
            lens_position_locking: true,
            autofocus_range_restriction: true,
            smooth_autofocus: true,
            exposure_modes: vec![
                ExposureMode::Locked,
                ExposureMode::AutoExpose,
                ExposureMode::ContinuousAutoExposure,
                ExposureMode::Custom,
            ],
            exposure_point_of_interest: true,
            exposure_bias: Some(ValueRange::new(-8.0, 8.0)),
            exposure_duration: Some(ValueRange::new(
                MediaTime::from_ratio(1, 8000),
                MediaTime::from_ratio(1, 2),
            )),
            iso: Some(ValueRange::new(50.0, 3200.0)),
            zoom: Some(ValueRange::new(1.0, 10.0)),
            torch_modes: vec![TorchMode::Off, TorchMode::On, TorchMode::Auto],
            has_torch: true,
            has_flash: true,
            frame_duration_limits: true,
            subject_area_monitoring: true,
        }
    }
}

impl SyntheticKind for Microphone {
    const MEDIA_KIND: MediaKind = MediaKind::Audio;
    const DEVICE_TYPE: DeviceType = DeviceType::Microphone;
    const POSITION: DevicePosition = DevicePosition::Unspecified;

    fn capabilities() -> DeviceCapabilities {
        DeviceCapabilities::default()
    }
}

#[derive(Default)]
struct DeviceState {
    settings: DeviceSettings,
    lock_depth: u32,
    fail_next_lock: bool,
    applied: Vec<DeviceChange>,
    disconnected: bool,
    streaming: bool,
}

/// A capture device driven entirely by the test
pub struct SyntheticDevice<K: SyntheticKind> {
    unique_id: String,
    name: String,
    device_type: DeviceType,
    position: DevicePosition,
    capabilities: DeviceCapabilities,
    state: Mutex<DeviceState>,
    sender: Sender<Result<Sample, CaptureError>>,
    receiver: Receiver<Result<Sample, CaptureError>>,
    events: Observers<DeviceEvent>,
    _kind: PhantomData<K>,
}

pub type SyntheticCamera = SyntheticDevice<Camera>;
pub type SyntheticMicrophone = SyntheticDevice<Microphone>;

impl SyntheticDevice<Camera> {
    pub fn builder(unique_id: impl Into<String>) -> SyntheticDeviceBuilder<Camera> {
        SyntheticDeviceBuilder::new(unique_id)
    }
}

impl SyntheticDevice<Microphone> {
    pub fn builder(unique_id: impl Into<String>) -> SyntheticDeviceBuilder<Microphone> {
        SyntheticDeviceBuilder::new(unique_id)
    }
}

pub struct SyntheticDeviceBuilder<K: SyntheticKind> {
    unique_id: String,
    name: Option<String>,
    device_type: DeviceType,
    position: DevicePosition,
    capabilities: DeviceCapabilities,
    _kind: PhantomData<K>,
}

impl<K: SyntheticKind> SyntheticDeviceBuilder<K> {
    fn new(unique_id: impl Into<String>) -> Self {
        Self {
            unique_id: unique_id.into(),
            name: None,
            device_type: K::DEVICE_TYPE,
            position: K::POSITION,
            capabilities: K::capabilities(),
            _kind: PhantomData,
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn device_type(mut self, device_type: DeviceType) -> Self {
        self.device_type = device_type;
        self
    }

    pub fn position(mut self, position: DevicePosition) -> Self {
        self.position = position;
        self
    }

    pub fn capabilities(mut self, capabilities: DeviceCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn without_torch(mut self) -> Self {
        self.capabilities.has_torch = false;
        self.capabilities.has_flash = false;
        self.capabilities.torch_modes.clear();
        self
    }

    pub fn build(self) -> SyntheticDevice<K> {
        let (sender, receiver) = unbounded();
        SyntheticDevice {
            name: self
                .name
                .unwrap_or_else(|| format!("Synthetic {}", self.unique_id)),
            unique_id: self.unique_id,
            device_type: self.device_type,
            position: self.position,
            capabilities: self.capabilities,
            state: Mutex::new(DeviceState::default()),
            sender,
            receiver,
            events: Observers::new(),
            _kind: PhantomData,
        }
    }
}

impl<K: SyntheticKind> SyntheticDevice<K> {
    fn state(&self) -> std::sync::MutexGuard<'_, DeviceState> {
        self.state.lock().expect("lock poisoned")
    }

    pub fn push_sample(&self, sample: Sample) {
        let _ = self.sender.send(Ok(sample));
    }

    pub fn push_frame(&self, frame: VideoFrame) {
        self.push_sample(Sample::Video(frame));
    }

    pub fn push_buffer(&self, buffer: AudioBuffer) {
        self.push_sample(Sample::Audio(buffer));
    }

    /// The next `read_sample` fails with `error`.
    pub fn push_error(&self, error: CaptureError) {
        let _ = self.sender.send(Err(error));
    }

    /// Raise a hardware notification on the calling thread.
    pub fn emit(&self, event: DeviceEvent) {
        self.events.notify(&event);
    }

    pub fn set_connected(&self, connected: bool) {
        self.state().disconnected = !connected;
    }

    pub fn fail_next_lock(&self) {
        self.state().fail_next_lock = true;
    }

    pub fn is_locked(&self) -> bool {
        self.state().lock_depth > 0
    }

    pub fn is_streaming(&self) -> bool {
        self.state().streaming
    }

    /// Number of changes applied so far
    pub fn applied_changes(&self) -> usize {
        self.state().applied.len()
    }

    pub fn changes(&self) -> Vec<DeviceChange> {
        self.state().applied.clone()
    }

    pub fn settings(&self) -> DeviceSettings {
        self.state().settings.clone()
    }
}

impl<K: SyntheticKind> CaptureDevice for SyntheticDevice<K> {
    fn unique_id(&self) -> &str {
        &self.unique_id
    }

    fn localized_name(&self) -> &str {
        &self.name
    }

    fn media_kind(&self) -> MediaKind {
        K::MEDIA_KIND
    }

    fn position(&self) -> DevicePosition {
        self.position
    }

    fn device_type(&self) -> DeviceType {
        self.device_type
    }

    fn is_connected(&self) -> bool {
        !self.state().disconnected
    }

    fn lock_for_configuration(&self) -> Result<(), CaptureError> {
        let mut state = self.state();
        if std::mem::take(&mut state.fail_next_lock) {
            return Err(CaptureError::DeviceLock(format!(
                "{} is locked by another client",
                self.unique_id
            )));
        }
        state.lock_depth += 1;
        Ok(())
    }

    fn unlock_for_configuration(&self) {
        let mut state = self.state();
        state.lock_depth = state.lock_depth.saturating_sub(1);
    }

    fn capabilities(&self) -> DeviceCapabilities {
        self.capabilities.clone()
    }

    fn settings(&self) -> DeviceSettings {
        self.state().settings.clone()
    }

    fn apply(&self, change: DeviceChange) -> Result<(), CaptureError> {
        let mut state = self.state();
        if state.lock_depth == 0 {
            return Err(CaptureError::Configuration(format!(
                "{:?} applied to {} without the configuration lock",
                change, self.unique_id
            )));
        }
        state.settings.record(change);
        state.applied.push(change);
        Ok(())
    }

    fn start_stream(&self) -> Result<(), CaptureError> {
        let mut state = self.state();
        if state.disconnected {
            return Err(CaptureError::DeviceUnavailable(self.unique_id.clone()));
        }
        state.streaming = true;
        Ok(())
    }

    fn stop_stream(&self) {
        self.state().streaming = false;
    }

    fn read_sample(&self, timeout: Duration) -> Result<Option<Sample>, CaptureError> {
        match self.receiver.recv_timeout(timeout) {
            Ok(Ok(sample)) => Ok(Some(sample)),
            Ok(Err(error)) => Err(error),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => Ok(None),
        }
    }

    fn events(&self) -> &Observers<DeviceEvent> {
        &self.events
    }
}
