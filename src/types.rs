//! Frames, format descriptions and the small value types shared by every stage

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::timing::MediaTime;

/// Which kind of media a device, connection or track carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaKind {
    Video,
    Audio,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Video => "video",
            MediaKind::Audio => "audio",
        }
    }
}

/// Four-character code identifying a pixel format or codec, e.g. `BGRA`, `avc1`
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FourCharCode(pub u32);

impl FourCharCode {
    pub const BGRA: FourCharCode = FourCharCode::from_bytes(*b"BGRA");
    pub const RGB24: FourCharCode = FourCharCode::from_bytes(*b"RGB3");
    pub const H264: FourCharCode = FourCharCode::from_bytes(*b"avc1");
    pub const HEVC: FourCharCode = FourCharCode::from_bytes(*b"hvc1");
    pub const LPCM_F32: FourCharCode = FourCharCode::from_bytes(*b"lpcm");
    pub const OPUS: FourCharCode = FourCharCode::from_bytes(*b"Opus");

    pub const fn from_bytes(b: [u8; 4]) -> Self {
        Self(u32::from_be_bytes(b))
    }

    pub const fn to_bytes(self) -> [u8; 4] {
        self.0.to_be_bytes()
    }

    /// Resolve to a string, `None` when any byte is not printable ASCII.
    pub fn to_code_string(self) -> Option<String> {
        let bytes = self.to_bytes();
        if bytes.iter().all(|b| b.is_ascii_graphic() || *b == b' ') {
            Some(bytes.iter().map(|b| *b as char).collect())
        } else {
            None
        }
    }
}

impl fmt::Debug for FourCharCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_code_string() {
            Some(s) => write!(f, "'{}'", s),
            None => write!(f, "{:#010x}", self.0),
        }
    }
}

impl fmt::Display for FourCharCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_code_string() {
            Some(s) => f.write_str(&s),
            None => write!(f, "{:#010x}", self.0),
        }
    }
}

/// Immutable description of a video stream's encoding and geometry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VideoFormat {
    pub codec: FourCharCode,
    pub width: u32,
    pub height: u32,
    /// Nominal duration of one frame
    pub frame_duration: MediaTime,
}

impl VideoFormat {
    pub fn new(codec: FourCharCode, width: u32, height: u32, fps: f64) -> Self {
        let frame_duration = if fps > 0.0 {
            MediaTime::from_secs_f64(1.0 / fps)
        } else {
            MediaTime::ZERO
        };
        Self {
            codec,
            width,
            height,
            frame_duration,
        }
    }

    pub fn bgra(width: u32, height: u32, fps: f64) -> Self {
        Self::new(FourCharCode::BGRA, width, height, fps)
    }

    pub fn fps(&self) -> f64 {
        let secs = self.frame_duration.as_secs_f64();
        if secs > 0.0 {
            1.0 / secs
        } else {
            0.0
        }
    }

    /// Bytes per pixel for the packed formats the pipeline understands
    pub fn bytes_per_pixel(&self) -> Option<usize> {
        match self.codec {
            FourCharCode::BGRA => Some(4),
            FourCharCode::RGB24 => Some(3),
            _ => None,
        }
    }
}

/// Immutable description of an audio stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AudioFormat {
    pub codec: FourCharCode,
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioFormat {
    pub fn pcm_f32(sample_rate: u32, channels: u16) -> Self {
        Self {
            codec: FourCharCode::LPCM_F32,
            sample_rate,
            channels,
        }
    }
}

/// A packed image plane
///
/// The pixel bytes are reference counted; cloning never copies them and
/// nothing in the pipeline mutates a buffer once it has been handed out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    pub width: u32,
    pub height: u32,
    pub pixel_format: FourCharCode,
    pub bytes_per_row: usize,
    pub data: Bytes,
}

impl PixelBuffer {
    pub fn new(width: u32, height: u32, pixel_format: FourCharCode, bytes_per_row: usize, data: Bytes) -> Self {
        Self {
            width,
            height,
            pixel_format,
            bytes_per_row,
            data,
        }
    }

    /// Tightly packed BGRA buffer
    pub fn bgra(width: u32, height: u32, data: impl Into<Bytes>) -> Self {
        Self::new(width, height, FourCharCode::BGRA, width as usize * 4, data.into())
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// One decoded video sample as delivered by a device
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub pixels: PixelBuffer,
    pub timestamp: MediaTime,
    pub format: VideoFormat,
}

impl VideoFrame {
    pub fn new(pixels: PixelBuffer, timestamp: MediaTime, format: VideoFormat) -> Self {
        Self {
            pixels,
            timestamp,
            format,
        }
    }

    pub fn with_pixels(&self, pixels: PixelBuffer) -> Self {
        Self {
            pixels,
            timestamp: self.timestamp,
            format: self.format,
        }
    }
}

/// One buffer of interleaved f32 PCM
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    pub samples: std::sync::Arc<[f32]>,
    pub timestamp: MediaTime,
    pub format: AudioFormat,
}

impl AudioBuffer {
    pub fn new(samples: impl Into<std::sync::Arc<[f32]>>, timestamp: MediaTime, format: AudioFormat) -> Self {
        Self {
            samples: samples.into(),
            timestamp,
            format,
        }
    }

    /// Number of sample frames (samples per channel)
    pub fn frame_count(&self) -> usize {
        if self.format.channels == 0 {
            return 0;
        }
        self.samples.len() / self.format.channels as usize
    }

    pub fn duration(&self) -> MediaTime {
        if self.format.sample_rate == 0 {
            return MediaTime::ZERO;
        }
        MediaTime::from_ratio(self.frame_count() as i64, self.format.sample_rate as i32)
    }
}

/// Anything a device can deliver
#[derive(Debug, Clone)]
pub enum Sample {
    Video(VideoFrame),
    Audio(AudioBuffer),
}

impl Sample {
    pub fn media_kind(&self) -> MediaKind {
        match self {
            Sample::Video(_) => MediaKind::Video,
            Sample::Audio(_) => MediaKind::Audio,
        }
    }

    pub fn timestamp(&self) -> MediaTime {
        match self {
            Sample::Video(frame) => frame.timestamp,
            Sample::Audio(buffer) => buffer.timestamp,
        }
    }
}

/// Normalized point of interest, (0, 0) top-left to (1, 1) bottom-right
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const CENTER: Point = Point { x: 0.5, y: 0.5 };

    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Orientation of the video connection, used for the recorded track transform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum VideoOrientation {
    #[default]
    Portrait,
    PortraitUpsideDown,
    LandscapeRight,
    LandscapeLeft,
}

impl VideoOrientation {
    /// Clockwise rotation a player applies to show the track upright
    pub fn rotation_degrees(&self) -> u16 {
        match self {
            VideoOrientation::Portrait => 90,
            VideoOrientation::PortraitUpsideDown => 270,
            VideoOrientation::LandscapeRight => 0,
            VideoOrientation::LandscapeLeft => 180,
        }
    }
}

/// File container for recordings and photos
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContainerType {
    Mp4,
    QuickTime,
    Heic,
    Jpeg,
    Dng,
}

impl ContainerType {
    pub fn extension(&self) -> &'static str {
        match self {
            ContainerType::Mp4 => "mp4",
            ContainerType::QuickTime => "mov",
            ContainerType::Heic => "heic",
            ContainerType::Jpeg => "jpg",
            ContainerType::Dng => "dng",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fourcc_string() {
        assert_eq!(FourCharCode::BGRA.to_code_string().as_deref(), Some("BGRA"));
        assert_eq!(FourCharCode::H264.to_string(), "avc1");
        assert_eq!(FourCharCode(0x0000_0020).to_code_string(), None);
        assert_eq!(format!("{:?}", FourCharCode::HEVC), "'hvc1'");
    }

    #[test]
    fn test_video_format_fps() {
        let format = VideoFormat::bgra(1920, 1080, 30.0);
        assert!((format.fps() - 30.0).abs() < 1e-6);
        assert_eq!(format.bytes_per_pixel(), Some(4));
    }

    #[test]
    fn test_audio_buffer_duration() {
        let format = AudioFormat::pcm_f32(48_000, 2);
        let buffer = AudioBuffer::new(vec![0.0f32; 960 * 2], MediaTime::ZERO, format);
        assert_eq!(buffer.frame_count(), 960);
        assert_eq!(buffer.duration(), MediaTime::from_millis(20));
    }

    #[test]
    fn test_pixel_buffer_clone_shares_bytes() {
        let buffer = PixelBuffer::bgra(2, 2, vec![7u8; 16]);
        let copy = buffer.clone();
        assert_eq!(buffer.data.as_ptr(), copy.data.as_ptr());
    }
}
