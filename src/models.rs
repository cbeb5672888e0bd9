//! Artifacts handed back to callers once capture work completes

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::ContainerType;

/// A finished recording on disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedVideo {
    pub path: PathBuf,
    pub container: ContainerType,
    /// Four-character codec tag, when it resolves to printable text
    pub codec: Option<String>,
    pub width: u32,
    pub height: u32,
    pub created: DateTime<Utc>,
    /// `None` when the writer could not report a duration
    pub duration_secs: Option<f64>,
}

impl RecordedVideo {
    pub fn file_name(&self) -> Option<String> {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
    }
}

/// Motion clip paired with a still
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LivePhoto {
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub duration_secs: f64,
}

/// A captured still image
#[derive(Debug, Clone)]
pub struct Photo {
    pub image: image::DynamicImage,
    pub is_raw: bool,
    pub container: ContainerType,
    pub width: u32,
    pub height: u32,
    pub created: DateTime<Utc>,
    pub live_photo: Option<LivePhoto>,
}

impl Photo {
    /// Wrap a decoded image; dimensions are taken from the image itself.
    pub fn new(image: image::DynamicImage, container: ContainerType) -> Self {
        Self {
            width: image.width(),
            height: image.height(),
            image,
            is_raw: container == ContainerType::Dng,
            container,
            created: Utc::now(),
            live_photo: None,
        }
    }

    pub fn with_live_photo(mut self, live_photo: LivePhoto) -> Self {
        self.live_photo = Some(live_photo);
        self
    }

    /// Encode to the file at `path` in the format its extension implies.
    pub fn save(&self, path: impl AsRef<std::path::Path>) -> Result<(), crate::errors::CaptureError> {
        self.image
            .save(path.as_ref())
            .map_err(|e| crate::errors::CaptureError::Writer(format!("Failed to save photo: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_photo_dimensions_follow_image() {
        let image = image::DynamicImage::new_rgb8(8, 6);
        let photo = Photo::new(image, ContainerType::Jpeg);
        assert_eq!((photo.width, photo.height), (8, 6));
        assert!(!photo.is_raw);
        assert!(photo.live_photo.is_none());
        assert!(Photo::new(image::DynamicImage::new_rgb8(1, 1), ContainerType::Dng).is_raw);
    }

    #[test]
    fn test_photo_save_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("still.png");
        Photo::new(image::DynamicImage::new_rgb8(4, 4), ContainerType::Jpeg)
            .save(&path)
            .unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_recorded_video_file_name() {
        let video = RecordedVideo {
            path: PathBuf::from("/tmp/clip.mp4"),
            container: ContainerType::Mp4,
            codec: Some("avc1".to_string()),
            width: 1920,
            height: 1080,
            created: Utc::now(),
            duration_secs: Some(1.5),
        };
        assert_eq!(video.file_name().as_deref(), Some("clip.mp4"));
    }
}
