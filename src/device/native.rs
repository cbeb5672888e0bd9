//! Hardware devices backed by nokhwa (cameras) and cpal (microphones)
//!
//! Neither library hands out thread-safe handles on every platform, so each
//! device opens its hardware on a dedicated owner thread once streaming
//! starts. Samples are stamped with a shared [`PTSClock`] and pushed into a
//! bounded channel that the session's delivery lane drains through
//! `read_sample`; when the lane falls behind, new samples are dropped.
//!
//! Focus, exposure, zoom and torch are not reachable through either library:
//! both devices advertise no such capabilities, so the controllers treat
//! every such request as unsupported.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{ApiBackend, CameraIndex, RequestedFormat, RequestedFormatType};

use crate::errors::CaptureError;
use crate::observe::Observers;
use crate::timing::{MediaClock, PTSClock};
use crate::types::{AudioBuffer, AudioFormat, FourCharCode, MediaKind, PixelBuffer, Sample, VideoFormat, VideoFrame};

use super::{
    CaptureDevice, DeviceCapabilities, DeviceChange, DeviceDiscovery, DeviceEvent, DevicePosition,
    DeviceSettings, DeviceType,
};

type SampleResult = Result<Sample, CaptureError>;

/// Owner thread plus the flag that ends it
struct Worker {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl Worker {
    fn join(self) {
        self.stop.store(true, Ordering::SeqCst);
        if self.handle.join().is_err() {
            log::error!("device owner thread panicked");
        }
    }
}

/// State every native device shares
struct Plumbing {
    sender: Sender<SampleResult>,
    receiver: Receiver<SampleResult>,
    worker: Mutex<Option<Worker>>,
    settings: Mutex<DeviceSettings>,
    events: Observers<DeviceEvent>,
    clock: PTSClock,
}

impl Plumbing {
    fn new(queue_depth: usize, clock: PTSClock) -> Self {
        let (sender, receiver) = bounded(queue_depth.max(1));
        Self {
            sender,
            receiver,
            worker: Mutex::new(None),
            settings: Mutex::new(DeviceSettings::default()),
            events: Observers::new(),
            clock,
        }
    }

    fn spawn<F>(&self, name: &str, body: F) -> Result<(), CaptureError>
    where
        F: FnOnce(Sender<SampleResult>, PTSClock, Arc<AtomicBool>) + Send + 'static,
    {
        let mut worker = self.worker.lock().expect("lock poisoned");
        if worker.is_some() {
            return Ok(());
        }
        // Leftovers from the previous run would arrive out of order.
        while self.receiver.try_recv().is_ok() {}

        let stop = Arc::new(AtomicBool::new(false));
        let (sender, clock, flag) = (self.sender.clone(), self.clock.clone(), stop.clone());
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || body(sender, clock, flag))
            .map_err(|e| CaptureError::Stream(format!("spawn failed: {e}")))?;
        *worker = Some(Worker { stop, handle });
        Ok(())
    }

    fn stop(&self) {
        let worker = self.worker.lock().expect("lock poisoned").take();
        if let Some(worker) = worker {
            worker.join();
        }
    }

    fn read(&self, timeout: Duration) -> Result<Option<Sample>, CaptureError> {
        match self.receiver.recv_timeout(timeout) {
            Ok(Ok(sample)) => Ok(Some(sample)),
            Ok(Err(error)) => Err(error),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => Ok(None),
        }
    }

    fn apply(&self, change: DeviceChange) {
        log::debug!("native device has no hardware control for {:?}", change);
        self.settings.lock().expect("lock poisoned").record(change);
    }
}

/// Non-blocking send; a full queue drops the sample.
fn offer(sender: &Sender<SampleResult>, sample: SampleResult) -> bool {
    match sender.try_send(sample) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            log::trace!("device queue full, dropping sample");
            true
        }
        Err(TrySendError::Disconnected(_)) => false,
    }
}

/// A camera opened through nokhwa, delivering RGB24 frames
pub struct NativeCamera {
    index: u32,
    unique_id: String,
    name: String,
    plumbing: Plumbing,
}

impl NativeCamera {
    pub fn new(index: u32, name: impl Into<String>, queue_depth: usize, clock: PTSClock) -> Self {
        Self {
            index,
            unique_id: format!("camera_{}", index),
            name: name.into(),
            plumbing: Plumbing::new(queue_depth, clock),
        }
    }

    pub fn index(&self) -> u32 {
        self.index
    }
}

fn camera_loop(index: u32, sender: Sender<SampleResult>, clock: PTSClock, stop: Arc<AtomicBool>) {
    let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestFrameRate);
    let mut camera = match nokhwa::Camera::new(CameraIndex::Index(index), requested) {
        Ok(camera) => camera,
        Err(e) => {
            offer(&sender, Err(CaptureError::DeviceUnavailable(format!("camera {}: {}", index, e))));
            return;
        }
    };
    if let Err(e) = camera.open_stream() {
        offer(&sender, Err(CaptureError::Stream(format!("camera {} stream: {}", index, e))));
        return;
    }

    let fps = camera.camera_format().frame_rate().max(1) as f64;
    log::info!("camera {} streaming at {} fps", index, fps);

    while !stop.load(Ordering::SeqCst) {
        let sample = camera
            .frame()
            .and_then(|buffer| buffer.decode_image::<RgbFormat>())
            .map_err(|e| CaptureError::Stream(format!("camera {} frame: {}", index, e)))
            .map(|image| {
                let (width, height) = image.dimensions();
                let format = VideoFormat::new(FourCharCode::RGB24, width, height, fps);
                let pixels = PixelBuffer::new(
                    width,
                    height,
                    FourCharCode::RGB24,
                    width as usize * 3,
                    image.into_raw().into(),
                );
                Sample::Video(VideoFrame::new(pixels, clock.now(), format))
            });
        let failed = sample.is_err();
        if !offer(&sender, sample) || failed {
            break;
        }
    }

    if let Err(e) = camera.stop_stream() {
        log::warn!("camera {} did not stop cleanly: {}", index, e);
    }
}

impl CaptureDevice for NativeCamera {
    fn unique_id(&self) -> &str {
        &self.unique_id
    }

    fn localized_name(&self) -> &str {
        &self.name
    }

    fn media_kind(&self) -> MediaKind {
        MediaKind::Video
    }

    fn position(&self) -> DevicePosition {
        DevicePosition::Unspecified
    }

    fn device_type(&self) -> DeviceType {
        DeviceType::ExternalCamera
    }

    fn lock_for_configuration(&self) -> Result<(), CaptureError> {
        Ok(())
    }

    fn unlock_for_configuration(&self) {}

    fn capabilities(&self) -> DeviceCapabilities {
        DeviceCapabilities::default()
    }

    fn settings(&self) -> DeviceSettings {
        self.plumbing.settings.lock().expect("lock poisoned").clone()
    }

    fn apply(&self, change: DeviceChange) -> Result<(), CaptureError> {
        self.plumbing.apply(change);
        Ok(())
    }

    fn start_stream(&self) -> Result<(), CaptureError> {
        let index = self.index;
        self.plumbing
            .spawn(&format!("crabcapture.camera.{}", index), move |sender, clock, stop| {
                camera_loop(index, sender, clock, stop)
            })
    }

    fn stop_stream(&self) {
        self.plumbing.stop();
    }

    fn read_sample(&self, timeout: Duration) -> Result<Option<Sample>, CaptureError> {
        self.plumbing.read(timeout)
    }

    fn events(&self) -> &Observers<DeviceEvent> {
        &self.plumbing.events
    }
}

impl Drop for NativeCamera {
    fn drop(&mut self) {
        self.plumbing.stop();
    }
}

/// A microphone opened through cpal, delivering interleaved f32 PCM
pub struct NativeMicrophone {
    unique_id: String,
    name: String,
    plumbing: Plumbing,
}

impl NativeMicrophone {
    /// `name` is the cpal device name; an empty name means the default input.
    pub fn new(name: impl Into<String>, queue_depth: usize, clock: PTSClock) -> Self {
        let name = name.into();
        Self {
            unique_id: format!("audio_{}", name.to_lowercase().replace(' ', "_")),
            name,
            plumbing: Plumbing::new(queue_depth, clock),
        }
    }
}

fn find_input(name: &str) -> Result<cpal::Device, CaptureError> {
    let host = cpal::default_host();
    if name.is_empty() {
        return host
            .default_input_device()
            .ok_or_else(|| CaptureError::DeviceUnavailable("no default audio input".to_string()));
    }
    host.input_devices()
        .map_err(|e| CaptureError::DeviceUnavailable(format!("audio enumeration: {}", e)))?
        .find(|d| d.name().ok().as_deref() == Some(name))
        .ok_or_else(|| CaptureError::DeviceUnavailable(name.to_string()))
}

fn microphone_loop(name: String, sender: Sender<SampleResult>, clock: PTSClock, stop: Arc<AtomicBool>) {
    let stream = find_input(&name).and_then(|device| {
        let config = device
            .default_input_config()
            .map_err(|e| CaptureError::DeviceUnavailable(format!("{}: {}", name, e)))?;
        let config = config.config();
        let format = AudioFormat::pcm_f32(config.sample_rate.0, config.channels);

        let data_sender = sender.clone();
        let error_sender = sender.clone();
        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let buffer = AudioBuffer::new(data.to_vec(), clock.now(), format);
                    offer(&data_sender, Ok(Sample::Audio(buffer)));
                },
                move |err| {
                    log::error!("audio capture error: {}", err);
                    offer(&error_sender, Err(CaptureError::Stream(err.to_string())));
                },
                None,
            )
            .map_err(|e| CaptureError::Stream(format!("{}: {}", name, e)))?;
        stream
            .play()
            .map_err(|e| CaptureError::Stream(format!("{}: {}", name, e)))?;
        log::info!(
            "microphone {} streaming at {} Hz, {} channels",
            name,
            format.sample_rate,
            format.channels
        );
        Ok(stream)
    });

    let stream = match stream {
        Ok(stream) => stream,
        Err(e) => {
            offer(&sender, Err(e));
            return;
        }
    };

    // The stream only lives as long as this thread holds it.
    while !stop.load(Ordering::SeqCst) {
        thread::park_timeout(Duration::from_millis(20));
    }
    drop(stream);
}

impl CaptureDevice for NativeMicrophone {
    fn unique_id(&self) -> &str {
        &self.unique_id
    }

    fn localized_name(&self) -> &str {
        &self.name
    }

    fn media_kind(&self) -> MediaKind {
        MediaKind::Audio
    }

    fn position(&self) -> DevicePosition {
        DevicePosition::Unspecified
    }

    fn device_type(&self) -> DeviceType {
        DeviceType::Microphone
    }

    fn lock_for_configuration(&self) -> Result<(), CaptureError> {
        Ok(())
    }

    fn unlock_for_configuration(&self) {}

    fn capabilities(&self) -> DeviceCapabilities {
        DeviceCapabilities::default()
    }

    fn settings(&self) -> DeviceSettings {
        self.plumbing.settings.lock().expect("lock poisoned").clone()
    }

    fn apply(&self, change: DeviceChange) -> Result<(), CaptureError> {
        self.plumbing.apply(change);
        Ok(())
    }

    fn start_stream(&self) -> Result<(), CaptureError> {
        let name = self.name.clone();
        self.plumbing.spawn("crabcapture.microphone", move |sender, clock, stop| {
            microphone_loop(name, sender, clock, stop)
        })
    }

    fn stop_stream(&self) {
        self.plumbing.stop();
    }

    fn read_sample(&self, timeout: Duration) -> Result<Option<Sample>, CaptureError> {
        self.plumbing.read(timeout)
    }

    fn events(&self) -> &Observers<DeviceEvent> {
        &self.plumbing.events
    }
}

impl Drop for NativeMicrophone {
    fn drop(&mut self) {
        self.plumbing.stop();
    }
}

/// Enumerates nokhwa cameras and cpal inputs on every call
///
/// Devices share one [`PTSClock`] so audio and video timestamps line up.
#[derive(Clone)]
pub struct NativeDiscovery {
    queue_depth: usize,
    clock: PTSClock,
}

impl NativeDiscovery {
    pub fn new(queue_depth: usize) -> Self {
        Self::with_clock(queue_depth, PTSClock::new())
    }

    pub fn with_clock(queue_depth: usize, clock: PTSClock) -> Self {
        Self { queue_depth, clock }
    }

    pub fn clock(&self) -> &PTSClock {
        &self.clock
    }

    fn cameras(&self) -> Vec<Arc<dyn CaptureDevice>> {
        let cameras = match nokhwa::query(ApiBackend::Auto) {
            Ok(cameras) => cameras,
            Err(e) => {
                log::warn!("camera enumeration failed: {}", e);
                return Vec::new();
            }
        };
        cameras
            .into_iter()
            .filter_map(|info| match info.index() {
                CameraIndex::Index(index) => Some(Arc::new(NativeCamera::new(
                    *index,
                    info.human_name(),
                    self.queue_depth,
                    self.clock.clone(),
                )) as Arc<dyn CaptureDevice>),
                CameraIndex::String(id) => {
                    log::debug!("skipping camera with non-numeric index {}", id);
                    None
                }
            })
            .collect()
    }

    fn microphones(&self) -> Vec<Arc<dyn CaptureDevice>> {
        let host = cpal::default_host();
        let default_name = host.default_input_device().and_then(|d| d.name().ok());
        let mut names: Vec<String> = match host.input_devices() {
            Ok(devices) => devices.filter_map(|d| d.name().ok()).collect(),
            Err(e) => {
                log::warn!("audio enumeration failed: {}", e);
                return Vec::new();
            }
        };
        // Default input first, then alphabetical.
        names.sort_by(|a, b| {
            let a_default = default_name.as_ref() == Some(a);
            let b_default = default_name.as_ref() == Some(b);
            b_default.cmp(&a_default).then_with(|| a.cmp(b))
        });
        names.dedup();
        names
            .into_iter()
            .map(|name| {
                Arc::new(NativeMicrophone::new(name, self.queue_depth, self.clock.clone()))
                    as Arc<dyn CaptureDevice>
            })
            .collect()
    }
}

impl DeviceDiscovery for NativeDiscovery {
    fn devices(&self) -> Vec<Arc<dyn CaptureDevice>> {
        let mut devices = self.cameras();
        devices.extend(self.microphones());
        devices
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_camera_has_no_controls() {
        let camera = NativeCamera::new(0, "Test", 2, PTSClock::new());
        assert_eq!(camera.unique_id(), "camera_0");
        assert_eq!(camera.capabilities(), DeviceCapabilities::default());
        camera.apply(DeviceChange::ZoomFactor(3.0)).unwrap();
        assert_eq!(camera.settings().zoom_factor, 3.0);
    }

    #[test]
    fn test_read_times_out_without_stream() {
        let mic = NativeMicrophone::new("Built-in Mic", 2, PTSClock::new());
        assert_eq!(mic.unique_id(), "audio_built-in_mic");
        assert!(mic.read_sample(Duration::from_millis(5)).unwrap().is_none());
    }

    #[test]
    fn test_full_queue_drops() {
        let (sender, receiver) = bounded::<SampleResult>(1);
        assert!(offer(&sender, Err(CaptureError::Stream("a".into()))));
        assert!(offer(&sender, Err(CaptureError::Stream("b".into()))));
        assert_eq!(receiver.len(), 1);
        drop(receiver);
        assert!(!offer(&sender, Err(CaptureError::Stream("c".into()))));
    }
}
