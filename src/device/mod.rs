//! Capture devices and the controllers that configure them
//!
//! A [`CaptureDevice`] is the raw hardware surface: identity, capabilities,
//! a configuration lock, a stream of samples and a channel of hardware
//! events. Controllers ([`VideoDeviceController`], [`AudioDeviceController`])
//! bind devices into a session and apply configuration changes under the
//! device's lock, clamping every numeric value to the advertised range.

mod audio;
mod controller;
#[cfg(feature = "native")]
pub mod native;

pub use audio::AudioDeviceController;
pub use controller::VideoDeviceController;

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::CaptureError;
use crate::observe::Observers;
use crate::timing::MediaTime;
use crate::types::{MediaKind, Point, Sample};

/// Physical placement of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DevicePosition {
    Unspecified,
    Back,
    Front,
}

/// Kind of hardware behind a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceType {
    WideAngleCamera,
    UltraWideCamera,
    TelephotoCamera,
    DualCamera,
    DualWideCamera,
    TripleCamera,
    TrueDepthCamera,
    ExternalCamera,
    Microphone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FocusMode {
    Locked,
    AutoFocus,
    ContinuousAutoFocus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExposureMode {
    Locked,
    AutoExpose,
    ContinuousAutoExposure,
    Custom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TorchMode {
    Off,
    On,
    Auto,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AutoFocusRangeRestriction {
    None,
    Near,
    Far,
}

/// Thermal / power pressure reported by the hardware
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PressureLevel {
    Nominal,
    Fair,
    Serious,
    Critical,
    Shutdown,
}

impl PressureLevel {
    /// Levels at which the frame rate gets throttled
    pub fn requires_throttling(&self) -> bool {
        matches!(self, PressureLevel::Serious | PressureLevel::Critical)
    }
}

/// Flash/torch selection cycled by a single control
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum LightMode {
    #[default]
    Auto,
    On,
    Off,
}

impl LightMode {
    /// auto → on → off → auto
    pub fn next(self) -> LightMode {
        match self {
            LightMode::Auto => LightMode::On,
            LightMode::On => LightMode::Off,
            LightMode::Off => LightMode::Auto,
        }
    }

    pub fn torch(self) -> TorchMode {
        match self {
            LightMode::Auto => TorchMode::Auto,
            LightMode::On => TorchMode::On,
            LightMode::Off => TorchMode::Off,
        }
    }
}

/// Inclusive range advertised by a device
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValueRange<T> {
    pub min: T,
    pub max: T,
}

impl<T: PartialOrd + Copy> ValueRange<T> {
    pub fn new(min: T, max: T) -> Self {
        Self { min, max }
    }

    /// `max(min, min(value, max))`
    pub fn clamp(&self, value: T) -> T {
        let upper = if value > self.max { self.max } else { value };
        if upper < self.min {
            self.min
        } else {
            upper
        }
    }

    pub fn contains(&self, value: T) -> bool {
        value >= self.min && value <= self.max
    }
}

/// What a device can do; `None` ranges mean the control is absent
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceCapabilities {
    pub focus_modes: Vec<FocusMode>,
    pub focus_point_of_interest: bool,
    pub lens_position_locking: bool,
    pub autofocus_range_restriction: bool,
    pub smooth_autofocus: bool,
    pub exposure_modes: Vec<ExposureMode>,
    pub exposure_point_of_interest: bool,
    pub exposure_bias: Option<ValueRange<f32>>,
    pub exposure_duration: Option<ValueRange<MediaTime>>,
    pub iso: Option<ValueRange<f32>>,
    pub zoom: Option<ValueRange<f64>>,
    pub torch_modes: Vec<TorchMode>,
    pub has_torch: bool,
    pub has_flash: bool,
    pub frame_duration_limits: bool,
    pub subject_area_monitoring: bool,
}

impl DeviceCapabilities {
    pub fn supports_focus_mode(&self, mode: FocusMode) -> bool {
        self.focus_modes.contains(&mode)
    }

    pub fn supports_exposure_mode(&self, mode: ExposureMode) -> bool {
        self.exposure_modes.contains(&mode)
    }

    pub fn supports_torch_mode(&self, mode: TorchMode) -> bool {
        self.has_torch && self.torch_modes.contains(&mode)
    }
}

/// A single hardware mutation, applied while the configuration lock is held
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DeviceChange {
    FocusMode(FocusMode),
    FocusPointOfInterest(Point),
    LensPosition(f32),
    AutoFocusRangeRestriction(AutoFocusRangeRestriction),
    SmoothAutoFocus(bool),
    ExposureMode(ExposureMode),
    ExposurePointOfInterest(Point),
    ExposureTargetBias(f32),
    CustomExposure { duration: MediaTime, iso: f32 },
    ZoomFactor(f64),
    RampZoom { factor: f64, rate: f32 },
    CancelZoomRamp,
    Torch(TorchMode),
    SubjectAreaChangeMonitoring(bool),
    FrameDurationLimits { min: MediaTime, max: MediaTime },
}

/// Current hardware state as last applied
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSettings {
    pub focus_mode: Option<FocusMode>,
    pub focus_point: Option<Point>,
    pub lens_position: Option<f32>,
    pub autofocus_range_restriction: AutoFocusRangeRestriction,
    pub smooth_autofocus: bool,
    pub exposure_mode: Option<ExposureMode>,
    pub exposure_point: Option<Point>,
    pub exposure_bias: f32,
    pub exposure_duration: Option<MediaTime>,
    pub iso: Option<f32>,
    pub zoom_factor: f64,
    pub zoom_ramp: Option<(f64, f32)>,
    pub torch_mode: TorchMode,
    pub subject_area_monitoring: bool,
    pub min_frame_duration: Option<MediaTime>,
    pub max_frame_duration: Option<MediaTime>,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            focus_mode: None,
            focus_point: None,
            lens_position: None,
            autofocus_range_restriction: AutoFocusRangeRestriction::None,
            smooth_autofocus: false,
            exposure_mode: None,
            exposure_point: None,
            exposure_bias: 0.0,
            exposure_duration: None,
            iso: None,
            zoom_factor: 1.0,
            zoom_ramp: None,
            torch_mode: TorchMode::Off,
            subject_area_monitoring: false,
            min_frame_duration: None,
            max_frame_duration: None,
        }
    }
}

impl DeviceSettings {
    /// Record `change` the way a device reports it back
    pub fn record(&mut self, change: DeviceChange) {
        match change {
            DeviceChange::FocusMode(mode) => {
                self.focus_mode = Some(mode);
                if mode != FocusMode::Locked {
                    self.lens_position = None;
                }
            }
            DeviceChange::FocusPointOfInterest(point) => self.focus_point = Some(point),
            DeviceChange::LensPosition(position) => {
                self.focus_mode = Some(FocusMode::Locked);
                self.lens_position = Some(position);
            }
            DeviceChange::AutoFocusRangeRestriction(r) => self.autofocus_range_restriction = r,
            DeviceChange::SmoothAutoFocus(enabled) => self.smooth_autofocus = enabled,
            DeviceChange::ExposureMode(mode) => self.exposure_mode = Some(mode),
            DeviceChange::ExposurePointOfInterest(point) => self.exposure_point = Some(point),
            DeviceChange::ExposureTargetBias(bias) => self.exposure_bias = bias,
            DeviceChange::CustomExposure { duration, iso } => {
                self.exposure_mode = Some(ExposureMode::Custom);
                self.exposure_duration = Some(duration);
                self.iso = Some(iso);
            }
            DeviceChange::ZoomFactor(factor) => {
                self.zoom_ramp = None;
                self.zoom_factor = factor;
            }
            DeviceChange::RampZoom { factor, rate } => self.zoom_ramp = Some((factor, rate)),
            DeviceChange::CancelZoomRamp => self.zoom_ramp = None,
            DeviceChange::Torch(mode) => self.torch_mode = mode,
            DeviceChange::SubjectAreaChangeMonitoring(enabled) => {
                self.subject_area_monitoring = enabled
            }
            DeviceChange::FrameDurationLimits { min, max } => {
                self.min_frame_duration = Some(min);
                self.max_frame_duration = Some(max);
            }
        }
    }
}

/// Hardware notifications a device can raise
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DeviceEvent {
    /// The scene under the focus/exposure point changed substantially
    SubjectAreaChanged,
    SystemPressureChanged(PressureLevel),
}

/// A physical (or simulated) capture device
///
/// Implementations are shared between the controller, the session backend
/// and its delivery lanes, so every method takes `&self`.
pub trait CaptureDevice: Send + Sync {
    fn unique_id(&self) -> &str;
    fn localized_name(&self) -> &str;
    fn media_kind(&self) -> MediaKind;
    fn position(&self) -> DevicePosition;
    fn device_type(&self) -> DeviceType;

    /// Whether the device can currently be opened as an input
    fn is_connected(&self) -> bool {
        true
    }

    /// Acquire exclusive access to the hardware configuration.
    fn lock_for_configuration(&self) -> Result<(), CaptureError>;
    fn unlock_for_configuration(&self);

    fn capabilities(&self) -> DeviceCapabilities;
    fn settings(&self) -> DeviceSettings;

    /// Apply one change. Callers hold the configuration lock.
    fn apply(&self, change: DeviceChange) -> Result<(), CaptureError>;

    fn start_stream(&self) -> Result<(), CaptureError>;
    fn stop_stream(&self);

    /// Next sample, or `None` when nothing arrived within `timeout`.
    fn read_sample(&self, timeout: Duration) -> Result<Option<Sample>, CaptureError>;

    /// Subject-area and pressure notifications
    fn events(&self) -> &Observers<DeviceEvent>;
}

/// A device opened as a session input
#[derive(Clone)]
pub struct DeviceInput {
    id: uuid::Uuid,
    device: Arc<dyn CaptureDevice>,
}

impl DeviceInput {
    pub fn new(device: Arc<dyn CaptureDevice>) -> Result<Self, CaptureError> {
        if !device.is_connected() {
            return Err(CaptureError::DeviceUnavailable(device.unique_id().to_string()));
        }
        Ok(Self {
            id: uuid::Uuid::new_v4(),
            device,
        })
    }

    pub fn id(&self) -> uuid::Uuid {
        self.id
    }

    pub fn device(&self) -> &Arc<dyn CaptureDevice> {
        &self.device
    }

    pub fn media_kind(&self) -> MediaKind {
        self.device.media_kind()
    }
}

impl PartialEq for DeviceInput {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl std::fmt::Debug for DeviceInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceInput")
            .field("id", &self.id)
            .field("device", &self.device.unique_id())
            .field("kind", &self.device.media_kind())
            .finish()
    }
}

/// Enumerates the devices available to the session
pub trait DeviceDiscovery: Send + Sync {
    fn devices(&self) -> Vec<Arc<dyn CaptureDevice>>;
}

/// Fixed device list, handy for tests and for hosts that enumerate elsewhere
#[derive(Clone, Default)]
pub struct StaticDiscovery {
    devices: Vec<Arc<dyn CaptureDevice>>,
}

impl StaticDiscovery {
    pub fn new(devices: Vec<Arc<dyn CaptureDevice>>) -> Self {
        Self { devices }
    }

    pub fn push(&mut self, device: Arc<dyn CaptureDevice>) {
        self.devices.push(device);
    }
}

impl DeviceDiscovery for StaticDiscovery {
    fn devices(&self) -> Vec<Arc<dyn CaptureDevice>> {
        self.devices.clone()
    }
}

/// Pick a device: the preferred type if present, else the first match, else none.
///
/// `DevicePosition::Unspecified` matches devices at any position.
pub fn discover(
    discovery: &dyn DeviceDiscovery,
    preferred_type: Option<DeviceType>,
    media_kind: MediaKind,
    position: DevicePosition,
) -> Option<Arc<dyn CaptureDevice>> {
    let candidates: Vec<Arc<dyn CaptureDevice>> = discovery
        .devices()
        .into_iter()
        .filter(|d| d.media_kind() == media_kind)
        .filter(|d| position == DevicePosition::Unspecified || d.position() == position)
        .collect();

    let preferred = preferred_type
        .and_then(|t| candidates.iter().find(|d| d.device_type() == t).cloned());

    let picked = preferred.or_else(|| candidates.first().cloned());
    if let Some(device) = &picked {
        log::debug!(
            "discovered {} device {} ({:?}, {:?})",
            media_kind.as_str(),
            device.unique_id(),
            device.device_type(),
            device.position()
        );
    }
    picked
}
