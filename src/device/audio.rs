use std::sync::{Arc, Mutex};

use crate::errors::CaptureError;
use crate::session::CaptureBackend;
use crate::types::MediaKind;

use super::{CaptureDevice, DeviceInput};

/// Owns the session's audio input
#[derive(Clone, Default)]
pub struct AudioDeviceController {
    input: Arc<Mutex<Option<DeviceInput>>>,
}

impl AudioDeviceController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn input(&self) -> Option<DeviceInput> {
        self.input.lock().expect("lock poisoned").clone()
    }

    pub fn device(&self) -> Option<Arc<dyn CaptureDevice>> {
        self.input().map(|input| input.device().clone())
    }

    pub fn setup_input(
        &self,
        backend: &dyn CaptureBackend,
        device: Arc<dyn CaptureDevice>,
    ) -> Result<(), CaptureError> {
        if device.media_kind() != MediaKind::Audio {
            return Err(CaptureError::DeviceBind(format!(
                "{} is not an audio device",
                device.unique_id()
            )));
        }
        let input = DeviceInput::new(device)?;
        if !backend.can_add_input(&input) {
            return Err(CaptureError::DeviceBind(format!(
                "session cannot add audio input {}",
                input.device().unique_id()
            )));
        }
        backend.add_input(input.clone())?;
        log::info!("audio input bound: {}", input.device().localized_name());
        *self.input.lock().expect("lock poisoned") = Some(input);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::StreamingBackend;
    use crate::testing::{SyntheticCamera, SyntheticMicrophone};

    #[test]
    fn test_setup_binds_microphone() {
        let backend = StreamingBackend::new();
        let controller = AudioDeviceController::new();
        controller
            .setup_input(&backend, Arc::new(SyntheticMicrophone::builder("mic").build()))
            .unwrap();
        assert_eq!(controller.device().unwrap().unique_id(), "mic");
    }

    #[test]
    fn test_second_microphone_is_rejected() {
        let backend = StreamingBackend::new();
        let controller = AudioDeviceController::new();
        controller
            .setup_input(&backend, Arc::new(SyntheticMicrophone::builder("a").build()))
            .unwrap();
        let err = controller
            .setup_input(&backend, Arc::new(SyntheticMicrophone::builder("b").build()))
            .unwrap_err();
        assert!(matches!(err, CaptureError::DeviceBind(_)));
        assert_eq!(controller.device().unwrap().unique_id(), "a");
    }

    #[test]
    fn test_camera_is_not_an_audio_input() {
        let backend = StreamingBackend::new();
        let controller = AudioDeviceController::new();
        let err = controller
            .setup_input(&backend, Arc::new(SyntheticCamera::builder("cam").build()))
            .unwrap_err();
        assert!(matches!(err, CaptureError::DeviceBind(_)));
    }
}
