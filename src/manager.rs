//! High-level camera façade
//!
//! [`CameraManager`] wires one [`CaptureSession`], the video and audio device
//! controllers and the [`VideoDataOutput`] router together, and is what an
//! application layer talks to.
//!
//! # Example
//! ```rust,ignore
//! use crabcapture::{CameraManager, CrabCaptureConfig};
//!
//! let manager = CameraManager::new(backend, discovery, writer_factory, CrabCaptureConfig::default())?;
//! manager.setup_default_devices().await?;
//! manager.start_session();
//!
//! let path = manager.start_recording()?;
//! // ...
//! manager.stop_recording();
//! ```

use std::path::PathBuf;
use std::sync::{Arc, Mutex, Weak};

use crate::config::CrabCaptureConfig;
use crate::device::{
    discover, AudioDeviceController, CaptureDevice, DeviceDiscovery, DevicePosition, DeviceType,
    ExposureMode, FocusMode, LightMode, ValueRange, VideoDeviceController,
};
use crate::dispatch::CallbackQueue;
use crate::errors::CaptureError;
use crate::filter::SharedFilter;
use crate::output::{VideoDataOutput, VideoOutputDelegate};
use crate::recording::{OutputFile, RecordingConfig, WriterFactory};
use crate::render::Renderer;
use crate::session::{CaptureBackend, CaptureSession, SessionDelegate};
use crate::timing::{MediaClock, MediaTime};
use crate::types::{MediaKind, Point, VideoOrientation};

/// Camera session, devices and recording behind one handle
pub struct CameraManager {
    session: CaptureSession,
    video: VideoDeviceController,
    audio: AudioDeviceController,
    output: VideoDataOutput,
    discovery: Arc<dyn DeviceDiscovery>,
    config: CrabCaptureConfig,
    light_mode: Mutex<LightMode>,
}

impl CameraManager {
    pub fn new(
        backend: Arc<dyn CaptureBackend>,
        discovery: Arc<dyn DeviceDiscovery>,
        factory: Arc<dyn WriterFactory>,
        config: CrabCaptureConfig,
    ) -> Result<Self, CaptureError> {
        let callbacks = CallbackQueue::new("crabcapture.callbacks")?;
        let output = VideoDataOutput::builder(factory, callbacks.clone())
            .recording_config(RecordingConfig::from_defaults(&config.recording))
            .retained_buffer_hint(config.session.retained_buffer_hint)
            .build();
        Self::with_output(backend, discovery, output, callbacks, config)
    }

    /// Like [`new`](Self::new), timing pauses with `clock`.
    pub fn with_clock(
        backend: Arc<dyn CaptureBackend>,
        discovery: Arc<dyn DeviceDiscovery>,
        factory: Arc<dyn WriterFactory>,
        clock: Arc<dyn MediaClock>,
        config: CrabCaptureConfig,
    ) -> Result<Self, CaptureError> {
        let callbacks = CallbackQueue::new("crabcapture.callbacks")?;
        let output = VideoDataOutput::builder(factory, callbacks.clone())
            .clock(clock)
            .recording_config(RecordingConfig::from_defaults(&config.recording))
            .retained_buffer_hint(config.session.retained_buffer_hint)
            .build();
        Self::with_output(backend, discovery, output, callbacks, config)
    }

    fn with_output(
        backend: Arc<dyn CaptureBackend>,
        discovery: Arc<dyn DeviceDiscovery>,
        output: VideoDataOutput,
        callbacks: CallbackQueue,
        config: CrabCaptureConfig,
    ) -> Result<Self, CaptureError> {
        config.validate().map_err(CaptureError::Configuration)?;
        Ok(Self {
            session: CaptureSession::new(backend, callbacks)?,
            video: VideoDeviceController::from_config(&config.session),
            audio: AudioDeviceController::new(),
            output,
            discovery,
            config,
            light_mode: Mutex::new(LightMode::default()),
        })
    }

    pub fn session(&self) -> &CaptureSession {
        &self.session
    }

    pub fn video_controller(&self) -> &VideoDeviceController {
        &self.video
    }

    pub fn audio_controller(&self) -> &AudioDeviceController {
        &self.audio
    }

    pub fn output(&self) -> &VideoDataOutput {
        &self.output
    }

    pub fn config(&self) -> &CrabCaptureConfig {
        &self.config
    }

    pub fn set_session_delegate(&self, delegate: Weak<dyn SessionDelegate>) {
        self.session.set_delegate(delegate);
    }

    pub fn set_recording_delegate(&self, delegate: Weak<dyn VideoOutputDelegate>) {
        self.output.set_delegate(delegate);
    }

    pub fn set_filter(&self, filter: Option<SharedFilter>) {
        self.output.set_filter(filter);
    }

    pub fn set_renderer(&self, renderer: Option<Arc<dyn Renderer>>) {
        self.output.set_renderer(renderer);
    }

    // Session graph

    /// Bind `device` as the video input and attach the router as video output.
    pub async fn setup_video_device(&self, device: Arc<dyn CaptureDevice>) -> Result<(), CaptureError> {
        let video = self.video.clone();
        let output = self.output.clone();
        let front = device.position() == DevicePosition::Front;
        self.session
            .configure_async(move |backend| {
                video.setup_input(backend, device)?;
                output.setup_video_output(backend)
            })
            .await?;
        self.mirror_preview(front);
        Ok(())
    }

    /// Bind `device` as the audio input and attach the router as audio output.
    pub async fn setup_audio_device(&self, device: Arc<dyn CaptureDevice>) -> Result<(), CaptureError> {
        let audio = self.audio.clone();
        let output = self.output.clone();
        self.session
            .configure_async(move |backend| {
                audio.setup_input(backend, device)?;
                output.setup_audio_output(backend)
            })
            .await
    }

    /// Discover and bind a back camera (any camera if there is none) and a microphone.
    ///
    /// A missing microphone is logged; the session then records video only.
    pub async fn setup_default_devices(&self) -> Result<(), CaptureError> {
        let camera = self
            .discover_video(DevicePosition::Back)
            .or_else(|| self.discover_video(DevicePosition::Unspecified))
            .ok_or_else(|| CaptureError::DeviceUnavailable("no video device".to_string()))?;
        self.setup_video_device(camera).await?;

        match discover(
            self.discovery.as_ref(),
            Some(DeviceType::Microphone),
            MediaKind::Audio,
            DevicePosition::Unspecified,
        ) {
            Some(microphone) => self.setup_audio_device(microphone).await?,
            None => log::warn!("no microphone found, recordings will have no audio"),
        }
        Ok(())
    }

    fn discover_video(&self, position: DevicePosition) -> Option<Arc<dyn CaptureDevice>> {
        discover(
            self.discovery.as_ref(),
            Some(DeviceType::WideAngleCamera),
            MediaKind::Video,
            position,
        )
    }

    /// Swap the video input without losing a running recording.
    ///
    /// The recording is paused, the device is swapped and the router follows
    /// the new connection, then the recording resumes. On failure the
    /// previous device stays bound and the error is returned.
    pub async fn change_video_device(&self, device: Arc<dyn CaptureDevice>) -> Result<(), CaptureError> {
        let recording = self.output.is_recording();
        if recording {
            self.output.pause_recording();
        }

        let video = self.video.clone();
        let output = self.output.clone();
        let front = device.position() == DevicePosition::Front;
        let result = self
            .session
            .configure_async(move |backend| {
                let result = video.change_device(backend, device);
                output.change_connection(backend);
                result
            })
            .await;

        if result.is_ok() {
            self.mirror_preview(front);
        }
        if recording {
            self.output.resume_recording();
        }
        result
    }

    /// Switch between the back and front cameras.
    pub async fn toggle_camera_position(&self) -> Result<(), CaptureError> {
        let current = self
            .video
            .device()
            .map(|d| d.position())
            .unwrap_or(DevicePosition::Unspecified);
        let wanted = match current {
            DevicePosition::Front => DevicePosition::Back,
            _ => DevicePosition::Front,
        };
        let device = self.discover_video(wanted).ok_or_else(|| {
            CaptureError::DeviceUnavailable(format!("no {:?} camera", wanted).to_lowercase())
        })?;
        self.change_video_device(device).await
    }

    pub async fn set_video_orientation(&self, orientation: VideoOrientation) -> Result<(), CaptureError> {
        let output = self.output.clone();
        self.session
            .configure_async(move |backend| {
                backend.set_video_orientation(orientation);
                output.change_connection(backend);
                Ok(())
            })
            .await
    }

    fn mirror_preview(&self, mirrored: bool) {
        if let Some(renderer) = self.output.renderer() {
            renderer.set_mirroring(mirrored);
        }
    }

    pub fn start_session(&self) {
        self.session.start();
    }

    pub fn stop_session(&self) {
        self.session.stop();
    }

    pub fn resume_session(&self) {
        self.session.resume();
    }

    pub fn is_session_running(&self) -> bool {
        self.session.is_running()
    }

    // Recording

    /// Start recording to a fresh path in the configured output directory.
    pub fn start_recording(&self) -> Result<PathBuf, CaptureError> {
        let container = self.output.recording_config().container;
        let path = self.config.storage.next_recording_path(container);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        self.start_recording_to(OutputFile::new(path.clone(), container))?;
        Ok(path)
    }

    pub fn start_recording_to(&self, destination: OutputFile) -> Result<(), CaptureError> {
        self.output.start_recording(destination)
    }

    pub fn stop_recording(&self) {
        self.output.stop_recording();
    }

    pub fn pause_recording(&self) {
        self.output.pause_recording();
    }

    pub fn resume_recording(&self) {
        self.output.resume_recording();
    }

    pub fn is_recording(&self) -> bool {
        self.output.is_recording()
    }

    // Device controls

    /// Tap-to-focus: focus and expose once at `point`.
    pub fn focus_at(&self, point: Point) -> Result<(), CaptureError> {
        self.video.focus(FocusMode::AutoFocus, point)?;
        self.video.exposure_at(ExposureMode::AutoExpose, point)
    }

    /// Back to continuous focus and exposure at the center.
    pub fn reset_focus(&self) -> Result<(), CaptureError> {
        self.video.focus(FocusMode::ContinuousAutoFocus, Point::CENTER)?;
        self.video
            .exposure_at(ExposureMode::ContinuousAutoExposure, Point::CENTER)
    }

    pub fn zoom(&self, factor: f64) -> Result<(), CaptureError> {
        self.video.zoom(factor)
    }

    pub fn exposure_bias(&self, bias: f32) -> Result<(), CaptureError> {
        self.video.exposure_bias(ExposureMode::ContinuousAutoExposure, bias)
    }

    pub fn light_mode(&self) -> LightMode {
        *self.light_mode.lock().expect("lock poisoned")
    }

    /// Advance auto → on → off and apply it to the torch.
    pub fn cycle_light_mode(&self) -> Result<LightMode, CaptureError> {
        let next = self.light_mode().next();
        self.video.torch(next.torch())?;
        *self.light_mode.lock().expect("lock poisoned") = next;
        Ok(next)
    }

    pub fn is_torch_available(&self) -> bool {
        self.video.is_torch_available()
    }

    pub fn is_flash_available(&self) -> bool {
        self.video.is_flash_available()
    }

    pub fn exposure_bias_range(&self) -> Option<ValueRange<f32>> {
        self.video.exposure_bias_range()
    }

    pub fn exposure_duration_range(&self) -> Option<ValueRange<MediaTime>> {
        self.video.exposure_duration_range()
    }

    pub fn iso_range(&self) -> Option<ValueRange<f32>> {
        self.video.iso_range()
    }

    pub fn zoom_range(&self) -> Option<ValueRange<f64>> {
        self.video.zoom_range()
    }
}
