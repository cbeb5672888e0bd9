//! Synthetic frames, audio and a hand-driven clock
//!
//! Frame content changes every frame so encoders see temporal variation;
//! audio is a quiet 440 Hz tone.

use std::sync::atomic::{AtomicI64, Ordering};

use crate::timing::{MediaClock, MediaTime};
use crate::types::{AudioBuffer, AudioFormat, FourCharCode, PixelBuffer, VideoFormat, VideoFrame};

/// Gradient frame `frame_number` of a stream in `format`
///
/// Timestamped at `frame_number` frame durations. Formats the pipeline
/// cannot address per pixel get BGRA-sized data.
pub fn synthetic_video_frame(frame_number: u64, format: VideoFormat) -> VideoFrame {
    let bpp = format.bytes_per_pixel().unwrap_or(4);
    let (width, height) = (format.width as usize, format.height as usize);
    let mut data = vec![0u8; width * height * bpp];

    let base = (frame_number % 256) as u8;
    for y in 0..height {
        for x in 0..width {
            let idx = (y * width + x) * bpp;
            let px = &mut data[idx..idx + bpp];
            let (r, g, b) = (
                base.wrapping_add((x % 256) as u8),
                base.wrapping_add((y % 256) as u8),
                base.wrapping_add(((x + y) % 256) as u8),
            );
            if format.codec == FourCharCode::RGB24 {
                px.copy_from_slice(&[r, g, b]);
            } else {
                px[..3].copy_from_slice(&[b, g, r]);
                if bpp > 3 {
                    px[3] = 255;
                }
            }
        }
    }

    let pixels = PixelBuffer::new(
        format.width,
        format.height,
        format.codec,
        width * bpp,
        data.into(),
    );
    let timestamp = MediaTime::from_nanos(format.frame_duration.as_nanos() * frame_number as i64);
    VideoFrame::new(pixels, timestamp, format)
}

/// `frames` interleaved sample frames of a 440 Hz tone starting at `timestamp`
pub fn synthetic_audio_buffer(timestamp: MediaTime, format: AudioFormat, frames: usize) -> AudioBuffer {
    let channels = format.channels.max(1) as usize;
    let rate = format.sample_rate.max(1) as f64;
    let start = timestamp.as_secs_f64();
    let mut samples = vec![0.0f32; frames * channels];

    for i in 0..frames {
        let t = start + i as f64 / rate;
        let value = (2.0 * std::f64::consts::PI * 440.0 * t).sin() as f32 * 0.3;
        samples[i * channels..(i + 1) * channels].fill(value);
    }

    AudioBuffer::new(samples, timestamp, format)
}

/// A [`MediaClock`] that only moves when told to
#[derive(Debug, Default)]
pub struct ManualClock {
    nanos: AtomicI64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_at(time: MediaTime) -> Self {
        let clock = Self::new();
        clock.set(time);
        clock
    }

    pub fn set(&self, time: MediaTime) {
        self.nanos.store(time.as_nanos(), Ordering::SeqCst);
    }

    pub fn advance(&self, by: MediaTime) {
        self.nanos.fetch_add(by.as_nanos(), Ordering::SeqCst);
    }
}

impl MediaClock for ManualClock {
    fn now(&self) -> MediaTime {
        MediaTime::from_nanos(self.nanos.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_video_frame_geometry_and_time() {
        let format = VideoFormat::bgra(32, 16, 25.0);
        let frame = synthetic_video_frame(5, format);
        assert_eq!(frame.pixels.len(), 32 * 16 * 4);
        assert_eq!(frame.pixels.bytes_per_row, 32 * 4);
        assert_eq!(frame.timestamp, MediaTime::from_millis(200));
        assert_eq!(frame.format, format);
    }

    #[test]
    fn test_video_frames_differ() {
        let format = VideoFormat::bgra(8, 8, 30.0);
        let a = synthetic_video_frame(0, format);
        let b = synthetic_video_frame(1, format);
        assert_ne!(a.pixels.data, b.pixels.data);
    }

    #[test]
    fn test_rgb_frame_is_packed() {
        let format = VideoFormat::new(FourCharCode::RGB24, 4, 2, 30.0);
        assert_eq!(synthetic_video_frame(0, format).pixels.len(), 4 * 2 * 3);
    }

    #[test]
    fn test_audio_has_signal() {
        let buffer = synthetic_audio_buffer(MediaTime::ZERO, AudioFormat::pcm_f32(48_000, 2), 960);
        assert_eq!(buffer.samples.len(), 960 * 2);
        assert_eq!(buffer.frame_count(), 960);
        let peak = buffer.samples.iter().map(|s| s.abs()).fold(0.0, f32::max);
        assert!(peak > 0.1 && peak < 0.5, "peak {}", peak);
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::starting_at(MediaTime::from_millis(10));
        clock.advance(MediaTime::from_millis(5));
        assert_eq!(clock.now(), MediaTime::from_millis(15));
    }
}
