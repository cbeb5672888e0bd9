use bytes::BufMut;

use crate::types::{FourCharCode, PixelBuffer, VideoFormat};

use super::{BufferPool, Filter};

/// Sepia tone over packed BGRA or RGB24 frames
pub struct SepiaFilter {
    intensity: f32,
    input_format: Option<VideoFormat>,
    output_format: Option<VideoFormat>,
    pool: Option<BufferPool>,
}

impl Default for SepiaFilter {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl SepiaFilter {
    /// `intensity` in `[0, 1]` blends between the source and full sepia.
    pub fn new(intensity: f32) -> Self {
        Self {
            intensity: intensity.clamp(0.0, 1.0),
            input_format: None,
            output_format: None,
            pool: None,
        }
    }

    pub fn input_format(&self) -> Option<VideoFormat> {
        self.input_format
    }

    pub fn pool(&self) -> Option<&BufferPool> {
        self.pool.as_ref()
    }
}

#[inline]
fn tone(r: f32, g: f32, b: f32, intensity: f32) -> (u8, u8, u8) {
    let sr = 0.393 * r + 0.769 * g + 0.189 * b;
    let sg = 0.349 * r + 0.686 * g + 0.168 * b;
    let sb = 0.272 * r + 0.534 * g + 0.131 * b;
    let mix = |src: f32, sepia: f32| (src + (sepia - src) * intensity).round().clamp(0.0, 255.0) as u8;
    (mix(r, sr), mix(g, sg), mix(b, sb))
}

impl Filter for SepiaFilter {
    fn prepare(&mut self, format: &VideoFormat, retained_buffer_hint: usize) -> Option<VideoFormat> {
        self.reset();

        let bpp = format.bytes_per_pixel()?;
        if format.width == 0 || format.height == 0 {
            return None;
        }
        let len = format.width as usize * format.height as usize * bpp;
        self.pool = Some(BufferPool::new(len, retained_buffer_hint));
        self.input_format = Some(*format);
        self.output_format = Some(*format);
        log::debug!(
            "sepia filter prepared for {}x{} {}",
            format.width,
            format.height,
            format.codec
        );
        self.output_format
    }

    fn process(&mut self, pixels: &PixelBuffer) -> Option<PixelBuffer> {
        let format = self.input_format?;
        let pool = self.pool.as_mut()?;
        if pixels.width != format.width
            || pixels.height != format.height
            || pixels.pixel_format != format.codec
        {
            return None;
        }

        let bpp = format.bytes_per_pixel()?;
        let row_len = format.width as usize * bpp;
        if pixels.bytes_per_row < row_len
            || pixels.data.len() < pixels.bytes_per_row * (format.height as usize - 1) + row_len
        {
            return None;
        }

        let mut out = pool.acquire();
        out.clear();
        let bgra = format.codec == FourCharCode::BGRA;
        for row in pixels.data.chunks(pixels.bytes_per_row).take(format.height as usize) {
            for px in row[..row_len].chunks_exact(bpp) {
                let (r, g, b) = if bgra {
                    (px[2], px[1], px[0])
                } else {
                    (px[0], px[1], px[2])
                };
                let (r, g, b) = tone(r as f32, g as f32, b as f32, self.intensity);
                if bgra {
                    out.put_slice(&[b, g, r, px[3]]);
                } else {
                    out.put_slice(&[r, g, b]);
                }
            }
        }

        let data = pool.publish(out);
        Some(PixelBuffer::new(
            format.width,
            format.height,
            format.codec,
            row_len,
            data,
        ))
    }

    fn is_prepared(&self) -> bool {
        self.pool.is_some()
    }

    fn output_format(&self) -> Option<VideoFormat> {
        self.output_format
    }

    fn reset(&mut self) {
        if let Some(pool) = self.pool.as_mut() {
            pool.flush();
        }
        self.pool = None;
        self.input_format = None;
        self.output_format = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(w: u32, h: u32, bgra: [u8; 4]) -> PixelBuffer {
        let data: Vec<u8> = bgra.iter().copied().cycle().take((w * h * 4) as usize).collect();
        PixelBuffer::bgra(w, h, data)
    }

    #[test]
    fn test_unprepared_returns_none() {
        let mut filter = SepiaFilter::default();
        assert!(!filter.is_prepared());
        assert!(filter.process(&frame(2, 2, [10, 20, 30, 255])).is_none());
    }

    #[test]
    fn test_prepare_reports_output_format() {
        let mut filter = SepiaFilter::default();
        let format = VideoFormat::bgra(4, 2, 30.0);
        assert_eq!(filter.prepare(&format, 3), Some(format));
        assert!(filter.is_prepared());
        assert_eq!(filter.output_format(), Some(format));
    }

    #[test]
    fn test_unsupported_format_stays_unprepared() {
        let mut filter = SepiaFilter::default();
        let h264 = VideoFormat::new(FourCharCode::H264, 4, 4, 30.0);
        assert_eq!(filter.prepare(&h264, 3), None);
        assert!(!filter.is_prepared());
    }

    #[test]
    fn test_process_does_not_touch_input() {
        let mut filter = SepiaFilter::default();
        filter.prepare(&VideoFormat::bgra(2, 2, 30.0), 3);
        let input = frame(2, 2, [40, 80, 120, 255]);
        let snapshot = input.data.clone().to_vec();

        let output = filter.process(&input).unwrap();
        assert_eq!(input.data.to_vec(), snapshot);
        assert_ne!(output.data.as_ptr(), input.data.as_ptr());
        // r=120 g=80 b=40 -> sepia r=116.24 g=103.48 b=80.6, alpha kept
        assert_eq!(&output.data[..4], &[81, 103, 116, 255]);
    }

    #[test]
    fn test_zero_intensity_is_identity() {
        let mut filter = SepiaFilter::new(0.0);
        filter.prepare(&VideoFormat::bgra(2, 1, 30.0), 3);
        let input = frame(2, 1, [1, 2, 3, 4]);
        assert_eq!(filter.process(&input).unwrap().data, input.data);
    }

    #[test]
    fn test_respects_row_padding() {
        let mut filter = SepiaFilter::new(0.0);
        filter.prepare(&VideoFormat::bgra(1, 2, 30.0), 3);
        let data = vec![1, 2, 3, 4, 0xEE, 0xEE, 0xEE, 0xEE, 5, 6, 7, 8];
        let padded = PixelBuffer::new(1, 2, FourCharCode::BGRA, 8, data.into());
        let out = filter.process(&padded).unwrap();
        assert_eq!(out.bytes_per_row, 4);
        assert_eq!(&out.data[..], &[1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_pool_reuses_after_release() {
        let mut filter = SepiaFilter::default();
        filter.prepare(&VideoFormat::bgra(2, 2, 30.0), 3);
        let input = frame(2, 2, [1, 1, 1, 255]);
        for _ in 0..10 {
            drop(filter.process(&input).unwrap());
        }
        assert_eq!(filter.pool().unwrap().allocations(), 1);
    }
}
