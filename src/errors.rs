use thiserror::Error;

/// Errors produced anywhere in the capture-and-record pipeline.
///
/// Unsupported hardware capabilities are never reported through this type;
/// those calls are silent no-ops.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("Device bind error: {0}")]
    DeviceBind(String),
    #[error("Device lock error: {0}")]
    DeviceLock(String),
    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),
    #[error("Device in use by another client: {0}")]
    DeviceInUse(String),
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Media services were reset")]
    MediaServicesReset,
    #[error("Stream error: {0}")]
    Stream(String),
    #[error("No format description for {0} track")]
    MissingFormat(&'static str),
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
    #[error("Writer error: {0}")]
    Writer(String),
    #[error("Encoding error: {0}")]
    Encoding(String),
    #[error("Muxing error: {0}")]
    Muxing(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Config file error: {0}")]
    ConfigFile(String),
    #[error("Session lane is closed")]
    LaneClosed,
}

impl CaptureError {
    /// Whether the session recovers from this error on its own by resuming.
    pub fn is_media_services_reset(&self) -> bool {
        matches!(self, CaptureError::MediaServicesReset)
    }

    /// Whether this error came out of the recording path (writer, codec, file).
    pub fn is_recording_error(&self) -> bool {
        matches!(
            self,
            CaptureError::MissingFormat(_)
                | CaptureError::UnsupportedFormat(_)
                | CaptureError::Writer(_)
                | CaptureError::Encoding(_)
                | CaptureError::Muxing(_)
                | CaptureError::Io(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_display_includes_message() {
        let error = CaptureError::DeviceBind("video input already configured".to_string());
        assert_eq!(
            error.to_string(),
            "Device bind error: video input already configured"
        );
    }

    #[test]
    fn test_io_error_conversion_keeps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only");
        let error: CaptureError = io.into();
        assert!(error.to_string().contains("read-only"));
        assert!(error.source().is_some());
        assert!(error.is_recording_error());
    }

    #[test]
    fn test_media_services_reset_classification() {
        assert!(CaptureError::MediaServicesReset.is_media_services_reset());
        assert!(!CaptureError::Stream("x".into()).is_media_services_reset());
        assert!(!CaptureError::DeviceLock("busy".into()).is_recording_error());
    }
}
