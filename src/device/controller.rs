use std::sync::{Arc, Mutex, Weak};

use crate::config::SessionConfig;
use crate::errors::CaptureError;
use crate::observe::Subscription;
use crate::session::CaptureBackend;
use crate::timing::MediaTime;
use crate::types::{MediaKind, Point};

use super::{
    AutoFocusRangeRestriction, CaptureDevice, DeviceCapabilities, DeviceChange, DeviceEvent,
    DeviceInput, DeviceSettings, ExposureMode, FocusMode, PressureLevel, TorchMode, ValueRange,
};

/// Holds a device's configuration lock for the lifetime of the guard
struct ConfigurationLock<'a> {
    device: &'a dyn CaptureDevice,
}

impl<'a> ConfigurationLock<'a> {
    fn acquire(device: &'a dyn CaptureDevice) -> Result<Self, CaptureError> {
        device.lock_for_configuration()?;
        Ok(Self { device })
    }
}

impl Drop for ConfigurationLock<'_> {
    fn drop(&mut self) {
        self.device.unlock_for_configuration();
    }
}

#[derive(Default)]
struct Monitoring {
    subject_area: Option<Subscription>,
    pressure: Option<Subscription>,
}

struct Inner {
    input: Mutex<Option<DeviceInput>>,
    monitoring: Mutex<Monitoring>,
    pressure_min_frame_duration: MediaTime,
    pressure_max_frame_duration: MediaTime,
}

/// Owns the session's single video input and applies configuration to it
///
/// Every operation locks the device for configuration, applies, and
/// unlocks. Operations the hardware does not support are silent no-ops and
/// numeric values are clamped to the advertised range before applying.
/// With no input bound every operation does nothing.
#[derive(Clone)]
pub struct VideoDeviceController {
    inner: Arc<Inner>,
}

impl Default for VideoDeviceController {
    fn default() -> Self {
        Self::new()
    }
}

impl VideoDeviceController {
    pub fn new() -> Self {
        Self::with_pressure_limits(20, 15)
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self::with_pressure_limits(config.pressure_max_fps, config.pressure_min_fps)
    }

    /// Frame rates enforced under serious or critical system pressure
    pub fn with_pressure_limits(max_fps: u32, min_fps: u32) -> Self {
        Self {
            inner: Arc::new(Inner {
                input: Mutex::new(None),
                monitoring: Mutex::new(Monitoring::default()),
                pressure_min_frame_duration: MediaTime::from_ratio(1, max_fps as i32),
                pressure_max_frame_duration: MediaTime::from_ratio(1, min_fps as i32),
            }),
        }
    }

    pub fn input(&self) -> Option<DeviceInput> {
        self.inner.input.lock().expect("lock poisoned").clone()
    }

    pub fn device(&self) -> Option<Arc<dyn CaptureDevice>> {
        self.input().map(|input| input.device().clone())
    }

    /// Bind `device` as the session's video input.
    pub fn setup_input(
        &self,
        backend: &dyn CaptureBackend,
        device: Arc<dyn CaptureDevice>,
    ) -> Result<(), CaptureError> {
        if device.media_kind() != MediaKind::Video {
            return Err(CaptureError::DeviceBind(format!(
                "{} is not a video device",
                device.unique_id()
            )));
        }
        let input = DeviceInput::new(device)?;
        if !backend.can_add_input(&input) {
            return Err(CaptureError::DeviceBind(format!(
                "session cannot add video input {}",
                input.device().unique_id()
            )));
        }
        backend.add_input(input.clone())?;
        log::info!("video input bound: {}", input.device().localized_name());
        *self.inner.input.lock().expect("lock poisoned") = Some(input);
        Ok(())
    }

    /// Replace the bound input with `new_device`.
    ///
    /// The old input is removed first; if the backend then refuses the new
    /// one, the old input is put back and `DeviceBind` is returned. A device
    /// that cannot be opened at all is refused the same way.
    pub fn change_device(
        &self,
        backend: &dyn CaptureBackend,
        new_device: Arc<dyn CaptureDevice>,
    ) -> Result<(), CaptureError> {
        let Some(old_input) = self.input() else {
            return Ok(());
        };
        let new_input = DeviceInput::new(new_device).map_err(|e| {
            log::warn!(
                "could not open replacement device, keeping {}: {}",
                old_input.device().unique_id(),
                e
            );
            CaptureError::DeviceBind(format!("session cannot add video input: {}", e))
        })?;

        backend.remove_input(&old_input);
        if new_input.media_kind() == MediaKind::Video && backend.can_add_input(&new_input) {
            backend.add_input(new_input.clone())?;
            log::info!(
                "video input changed: {} -> {}",
                old_input.device().unique_id(),
                new_input.device().unique_id()
            );
            *self.inner.input.lock().expect("lock poisoned") = Some(new_input);
            self.rearm_monitoring();
            Ok(())
        } else {
            backend.add_input(old_input.clone())?;
            log::warn!(
                "could not add {}, keeping {}",
                new_input.device().unique_id(),
                old_input.device().unique_id()
            );
            Err(CaptureError::DeviceBind(format!(
                "session cannot add video input {}",
                new_input.device().unique_id()
            )))
        }
    }

    fn try_action<F>(&self, action: F) -> Result<(), CaptureError>
    where
        F: FnOnce(&dyn CaptureDevice, &DeviceCapabilities) -> Result<(), CaptureError>,
    {
        try_action(&self.inner, action)
    }

    pub fn torch(&self, mode: TorchMode) -> Result<(), CaptureError> {
        self.try_action(|device, caps| {
            if caps.supports_torch_mode(mode) {
                device.apply(DeviceChange::Torch(mode))?;
            }
            Ok(())
        })
    }

    pub fn zoom(&self, factor: f64) -> Result<(), CaptureError> {
        self.try_action(|device, caps| {
            if let Some(range) = caps.zoom {
                device.apply(DeviceChange::ZoomFactor(range.clamp(factor)))?;
            }
            Ok(())
        })
    }

    pub fn ramp_zoom(&self, factor: f64, rate: f32) -> Result<(), CaptureError> {
        self.try_action(|device, caps| {
            if let Some(range) = caps.zoom {
                device.apply(DeviceChange::RampZoom {
                    factor: range.clamp(factor),
                    rate,
                })?;
            }
            Ok(())
        })
    }

    pub fn cancel_ramp_zoom(&self) -> Result<(), CaptureError> {
        self.try_action(|device, caps| {
            if caps.zoom.is_some() {
                device.apply(DeviceChange::CancelZoomRamp)?;
            }
            Ok(())
        })
    }

    pub fn focus(&self, mode: FocusMode, point: Point) -> Result<(), CaptureError> {
        focus(&self.inner, mode, point)
    }

    /// Lock focus at a lens position in `[0, 1]`.
    pub fn lock_focus(&self, lens_position: f32) -> Result<(), CaptureError> {
        self.try_action(|device, caps| {
            if caps.lens_position_locking {
                let position = ValueRange::new(0.0f32, 1.0).clamp(lens_position);
                device.apply(DeviceChange::LensPosition(position))?;
            }
            Ok(())
        })
    }

    pub fn autofocus_range_restriction(
        &self,
        restriction: AutoFocusRangeRestriction,
    ) -> Result<(), CaptureError> {
        self.try_action(|device, caps| {
            if caps.autofocus_range_restriction {
                device.apply(DeviceChange::AutoFocusRangeRestriction(restriction))?;
            }
            Ok(())
        })
    }

    pub fn smooth_autofocus(&self, enabled: bool) -> Result<(), CaptureError> {
        self.try_action(|device, caps| {
            if caps.smooth_autofocus {
                device.apply(DeviceChange::SmoothAutoFocus(enabled))?;
            }
            Ok(())
        })
    }

    pub fn exposure_at(&self, mode: ExposureMode, point: Point) -> Result<(), CaptureError> {
        exposure_at(&self.inner, mode, point)
    }

    /// Set the exposure mode and a target bias clamped to the device range.
    pub fn exposure_bias(&self, mode: ExposureMode, bias: f32) -> Result<(), CaptureError> {
        self.try_action(|device, caps| {
            if caps.supports_exposure_mode(mode) {
                device.apply(DeviceChange::ExposureMode(mode))?;
            }
            if let Some(range) = caps.exposure_bias {
                device.apply(DeviceChange::ExposureTargetBias(range.clamp(bias)))?;
            }
            Ok(())
        })
    }

    /// Switch to custom exposure with duration and ISO clamped to the active format.
    pub fn custom_exposure(&self, duration: MediaTime, iso: f32) -> Result<(), CaptureError> {
        self.try_action(|device, caps| {
            if !caps.supports_exposure_mode(ExposureMode::Custom) {
                return Ok(());
            }
            if let (Some(durations), Some(isos)) = (caps.exposure_duration, caps.iso) {
                device.apply(DeviceChange::CustomExposure {
                    duration: durations.clamp(duration),
                    iso: isos.clamp(iso),
                })?;
            }
            Ok(())
        })
    }

    /// Reset focus and exposure to continuous auto at the center whenever
    /// the device reports a subject area change.
    pub fn set_subject_area_monitoring(&self, enabled: bool) -> Result<(), CaptureError> {
        let Some(device) = self.device() else {
            return Ok(());
        };

        let previous = {
            let mut monitoring = self.inner.monitoring.lock().expect("lock poisoned");
            let previous = monitoring.subject_area.take();
            if enabled {
                monitoring.subject_area = Some(subscribe_subject_area(&self.inner, device.as_ref()));
            }
            previous
        };
        drop(previous);

        let _lock = ConfigurationLock::acquire(device.as_ref())?;
        if device.capabilities().subject_area_monitoring {
            device.apply(DeviceChange::SubjectAreaChangeMonitoring(enabled))?;
        }
        Ok(())
    }

    /// Throttle the frame rate when the device reports serious or critical pressure.
    pub fn set_system_pressure_monitoring(&self, enabled: bool) {
        let Some(device) = self.device() else {
            return;
        };

        let previous = {
            let mut monitoring = self.inner.monitoring.lock().expect("lock poisoned");
            let previous = monitoring.pressure.take();
            if enabled {
                monitoring.pressure = Some(subscribe_pressure(&self.inner, device.as_ref()));
            }
            previous
        };
        drop(previous);
    }

    pub fn is_subject_area_monitoring(&self) -> bool {
        self.inner
            .monitoring
            .lock()
            .expect("lock poisoned")
            .subject_area
            .is_some()
    }

    pub fn is_system_pressure_monitoring(&self) -> bool {
        self.inner
            .monitoring
            .lock()
            .expect("lock poisoned")
            .pressure
            .is_some()
    }

    /// Move active observations over to the current device.
    fn rearm_monitoring(&self) {
        let Some(device) = self.device() else {
            return;
        };

        let (subject_area, pressure) = {
            let monitoring = self.inner.monitoring.lock().expect("lock poisoned");
            (monitoring.subject_area.is_some(), monitoring.pressure.is_some())
        };

        if subject_area {
            if let Err(e) = self.set_subject_area_monitoring(true) {
                log::warn!("could not re-enable subject area monitoring: {}", e);
            }
        }
        if pressure {
            self.set_system_pressure_monitoring(true);
        }
        log::debug!("monitoring moved to {}", device.unique_id());
    }

    pub fn settings(&self) -> Option<DeviceSettings> {
        self.device().map(|d| d.settings())
    }

    pub fn capabilities(&self) -> Option<DeviceCapabilities> {
        self.device().map(|d| d.capabilities())
    }

    pub fn is_torch_available(&self) -> bool {
        self.capabilities().map(|c| c.has_torch).unwrap_or(false)
    }

    pub fn is_flash_available(&self) -> bool {
        self.capabilities().map(|c| c.has_flash).unwrap_or(false)
    }

    pub fn exposure_bias_range(&self) -> Option<ValueRange<f32>> {
        self.capabilities().and_then(|c| c.exposure_bias)
    }

    pub fn exposure_duration_range(&self) -> Option<ValueRange<MediaTime>> {
        self.capabilities().and_then(|c| c.exposure_duration)
    }

    pub fn iso_range(&self) -> Option<ValueRange<f32>> {
        self.capabilities().and_then(|c| c.iso)
    }

    pub fn zoom_range(&self) -> Option<ValueRange<f64>> {
        self.capabilities().and_then(|c| c.zoom)
    }
}

fn try_action<F>(inner: &Inner, action: F) -> Result<(), CaptureError>
where
    F: FnOnce(&dyn CaptureDevice, &DeviceCapabilities) -> Result<(), CaptureError>,
{
    let device = match inner.input.lock().expect("lock poisoned").as_ref() {
        Some(input) => input.device().clone(),
        None => return Ok(()),
    };
    let _lock = ConfigurationLock::acquire(device.as_ref())?;
    let caps = device.capabilities();
    action(device.as_ref(), &caps)
}

fn focus(inner: &Inner, mode: FocusMode, point: Point) -> Result<(), CaptureError> {
    try_action(inner, |device, caps| {
        if caps.focus_point_of_interest {
            device.apply(DeviceChange::FocusPointOfInterest(point))?;
        }
        if caps.supports_focus_mode(mode) {
            device.apply(DeviceChange::FocusMode(mode))?;
        }
        Ok(())
    })
}

fn exposure_at(inner: &Inner, mode: ExposureMode, point: Point) -> Result<(), CaptureError> {
    try_action(inner, |device, caps| {
        if caps.exposure_point_of_interest {
            device.apply(DeviceChange::ExposurePointOfInterest(point))?;
        }
        if caps.supports_exposure_mode(mode) {
            device.apply(DeviceChange::ExposureMode(mode))?;
        }
        Ok(())
    })
}

fn subscribe_subject_area(inner: &Arc<Inner>, device: &dyn CaptureDevice) -> Subscription {
    let weak: Weak<Inner> = Arc::downgrade(inner);
    device.events().subscribe(move |event| {
        if *event != DeviceEvent::SubjectAreaChanged {
            return;
        }
        let Some(inner) = weak.upgrade() else {
            return;
        };
        if let Err(e) = focus(&inner, FocusMode::ContinuousAutoFocus, Point::CENTER) {
            log::warn!("subject area refocus failed: {}", e);
        }
        if let Err(e) = exposure_at(&inner, ExposureMode::ContinuousAutoExposure, Point::CENTER) {
            log::warn!("subject area re-exposure failed: {}", e);
        }
    })
}

fn subscribe_pressure(inner: &Arc<Inner>, device: &dyn CaptureDevice) -> Subscription {
    let weak: Weak<Inner> = Arc::downgrade(inner);
    device.events().subscribe(move |event| {
        let DeviceEvent::SystemPressureChanged(level) = *event else {
            return;
        };
        let Some(inner) = weak.upgrade() else {
            return;
        };
        throttle_for_pressure(&inner, level);
    })
}

fn throttle_for_pressure(inner: &Inner, level: PressureLevel) {
    log::warn!("video device reached system pressure level {:?}", level);
    if !level.requires_throttling() {
        return;
    }
    let (min, max) = (
        inner.pressure_min_frame_duration,
        inner.pressure_max_frame_duration,
    );
    let result = try_action(inner, |device, caps| {
        if caps.frame_duration_limits {
            device.apply(DeviceChange::FrameDurationLimits { min, max })?;
        }
        Ok(())
    });
    if let Err(e) = result {
        log::warn!("could not throttle frame rate: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceEvent;
    use crate::session::StreamingBackend;
    use crate::testing::SyntheticCamera;

    fn bound(camera: SyntheticCamera) -> (VideoDeviceController, Arc<SyntheticCamera>, StreamingBackend) {
        let camera = Arc::new(camera);
        let backend = StreamingBackend::new();
        let controller = VideoDeviceController::new();
        controller.setup_input(&backend, camera.clone()).unwrap();
        (controller, camera, backend)
    }

    #[test]
    fn test_swap_to_disconnected_device_is_refused() {
        let (controller, _camera, backend) = bound(SyntheticCamera::builder("cam").build());
        let unplugged = SyntheticCamera::builder("unplugged").build();
        unplugged.set_connected(false);

        let err = controller
            .change_device(&backend, Arc::new(unplugged))
            .unwrap_err();
        assert!(matches!(err, CaptureError::DeviceBind(_)));
        assert_eq!(controller.device().unwrap().unique_id(), "cam");
        assert_eq!(backend.inputs().len(), 1);
    }

    #[test]
    fn test_swap_to_audio_device_restores_previous_input() {
        let (controller, _camera, backend) = bound(SyntheticCamera::builder("cam").build());
        let mic = crate::testing::SyntheticMicrophone::builder("mic").build();

        let err = controller.change_device(&backend, Arc::new(mic)).unwrap_err();
        assert!(matches!(err, CaptureError::DeviceBind(_)));
        let inputs = backend.inputs();
        assert_eq!(inputs.len(), 1);
        assert_eq!(inputs[0].device().unique_id(), "cam");
    }

    #[test]
    fn test_unbound_controller_is_noop() {
        let controller = VideoDeviceController::new();
        assert!(controller.zoom(4.0).is_ok());
        assert!(controller.torch(TorchMode::On).is_ok());
        assert!(controller.set_subject_area_monitoring(true).is_ok());
        assert!(controller.settings().is_none());
        assert!(!controller.is_subject_area_monitoring());
    }

    #[test]
    fn test_zoom_is_clamped() {
        let (controller, camera, _backend) = bound(SyntheticCamera::builder("cam").build());
        controller.zoom(100.0).unwrap();
        assert_eq!(camera.settings().zoom_factor, 10.0);
        controller.zoom(0.1).unwrap();
        assert_eq!(camera.settings().zoom_factor, 1.0);
        controller.ramp_zoom(50.0, 2.0).unwrap();
        assert_eq!(camera.settings().zoom_ramp, Some((10.0, 2.0)));
        controller.cancel_ramp_zoom().unwrap();
        assert_eq!(camera.settings().zoom_ramp, None);
    }

    #[test]
    fn test_unsupported_torch_is_silent() {
        let (controller, camera, _backend) =
            bound(SyntheticCamera::builder("cam").without_torch().build());
        controller.torch(TorchMode::On).unwrap();
        assert_eq!(camera.settings().torch_mode, TorchMode::Off);
        assert_eq!(camera.applied_changes(), 0);
        assert!(!controller.is_torch_available());
    }

    #[test]
    fn test_custom_exposure_clamps_both_values() {
        let (controller, camera, _backend) = bound(SyntheticCamera::builder("cam").build());
        controller
            .custom_exposure(MediaTime::from_secs_f64(10.0), 1.0)
            .unwrap();
        let settings = camera.settings();
        assert_eq!(settings.exposure_mode, Some(ExposureMode::Custom));
        assert_eq!(
            settings.exposure_duration,
            Some(controller.exposure_duration_range().unwrap().max)
        );
        assert_eq!(settings.iso, Some(controller.iso_range().unwrap().min));
    }

    #[test]
    fn test_lock_failure_propagates() {
        let (controller, camera, _backend) = bound(SyntheticCamera::builder("cam").build());
        camera.fail_next_lock();
        let err = controller.zoom(2.0).unwrap_err();
        assert!(matches!(err, CaptureError::DeviceLock(_)));
        assert!(!camera.is_locked());
    }

    #[test]
    fn test_subject_area_change_recenters() {
        let (controller, camera, _backend) = bound(SyntheticCamera::builder("cam").build());
        controller.focus(FocusMode::Locked, Point::new(0.1, 0.9)).unwrap();
        controller.set_subject_area_monitoring(true).unwrap();
        assert!(camera.settings().subject_area_monitoring);

        camera.emit(DeviceEvent::SubjectAreaChanged);
        let settings = camera.settings();
        assert_eq!(settings.focus_mode, Some(FocusMode::ContinuousAutoFocus));
        assert_eq!(settings.focus_point, Some(Point::CENTER));
        assert_eq!(settings.exposure_mode, Some(ExposureMode::ContinuousAutoExposure));
        assert_eq!(settings.exposure_point, Some(Point::CENTER));

        controller.set_subject_area_monitoring(false).unwrap();
        controller.focus(FocusMode::Locked, Point::new(0.1, 0.9)).unwrap();
        camera.emit(DeviceEvent::SubjectAreaChanged);
        assert_eq!(camera.settings().focus_mode, Some(FocusMode::Locked));
    }

    #[test]
    fn test_pressure_throttles_frame_rate() {
        let (controller, camera, _backend) = bound(SyntheticCamera::builder("cam").build());
        controller.set_system_pressure_monitoring(true);

        camera.emit(DeviceEvent::SystemPressureChanged(PressureLevel::Fair));
        assert_eq!(camera.settings().min_frame_duration, None);

        camera.emit(DeviceEvent::SystemPressureChanged(PressureLevel::Serious));
        let settings = camera.settings();
        assert_eq!(settings.min_frame_duration, Some(MediaTime::from_ratio(1, 20)));
        assert_eq!(settings.max_frame_duration, Some(MediaTime::from_ratio(1, 15)));
    }

    #[test]
    fn test_change_device_moves_monitoring() {
        let (controller, old, backend) = bound(SyntheticCamera::builder("old").build());
        controller.set_subject_area_monitoring(true).unwrap();

        let new = Arc::new(SyntheticCamera::builder("new").build());
        controller.change_device(&backend, new.clone()).unwrap();
        assert_eq!(controller.device().unwrap().unique_id(), "new");
        assert!(new.settings().subject_area_monitoring);

        controller.focus(FocusMode::Locked, Point::new(0.2, 0.2)).unwrap();
        old.emit(DeviceEvent::SubjectAreaChanged);
        assert_eq!(new.settings().focus_mode, Some(FocusMode::Locked));
        new.emit(DeviceEvent::SubjectAreaChanged);
        assert_eq!(new.settings().focus_mode, Some(FocusMode::ContinuousAutoFocus));
    }

    #[test]
    fn test_change_to_unavailable_device_keeps_old() {
        let (controller, _old, backend) = bound(SyntheticCamera::builder("old").build());
        let mic = Arc::new(crate::testing::SyntheticMicrophone::builder("mic").build());
        let err = controller.change_device(&backend, mic).unwrap_err();
        assert!(matches!(err, CaptureError::DeviceBind(_)));
        assert_eq!(controller.device().unwrap().unique_id(), "old");
        assert_eq!(backend.inputs().len(), 1);
    }
}
