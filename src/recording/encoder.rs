//! H.264 encoder wrapper using openh264

use openh264::encoder::{Encoder, FrameType};
use openh264::formats::YUVBuffer;

use crate::errors::CaptureError;
use crate::types::{FourCharCode, PixelBuffer};

/// H.264 encoder using openh264
///
/// openh264 infers dimensions from each `YUVSource`; the encoder only checks
/// that incoming frames keep the geometry it was created for.
pub struct H264Encoder {
    encoder: Encoder,
    width: u32,
    height: u32,
    frame_count: u64,
}

impl H264Encoder {
    pub fn new(width: u32, height: u32) -> Result<Self, CaptureError> {
        if width == 0 || height == 0 || width % 2 != 0 || height % 2 != 0 {
            return Err(CaptureError::Encoding(format!(
                "H.264 needs even, non-zero dimensions, got {}x{}",
                width, height
            )));
        }
        let encoder = Encoder::new()
            .map_err(|e| CaptureError::Encoding(format!("Failed to create encoder: {}", e)))?;

        Ok(Self {
            encoder,
            width,
            height,
            frame_count: 0,
        })
    }

    /// Encode a packed BGRA or RGB24 frame, honoring its row stride.
    pub fn encode(&mut self, pixels: &PixelBuffer) -> Result<EncodedFrame, CaptureError> {
        if pixels.width != self.width || pixels.height != self.height {
            return Err(CaptureError::Encoding(format!(
                "Frame dimensions {}x{} don't match encoder {}x{}",
                pixels.width, pixels.height, self.width, self.height
            )));
        }
        let layout = PackedLayout::for_format(pixels.pixel_format).ok_or_else(|| {
            CaptureError::Encoding(format!("Cannot encode {} frames", pixels.pixel_format))
        })?;
        let yuv = packed_to_yuv420(pixels, layout)?;
        self.encode_yuv(yuv)
    }

    fn encode_yuv(&mut self, yuv: Vec<u8>) -> Result<EncodedFrame, CaptureError> {
        let yuv_buffer = YUVBuffer::from_vec(yuv, self.width as usize, self.height as usize);

        let bitstream = self
            .encoder
            .encode(&yuv_buffer)
            .map_err(|e| CaptureError::Encoding(format!("Encoding failed: {}", e)))?;

        self.frame_count += 1;
        let is_keyframe = matches!(bitstream.frame_type(), FrameType::IDR | FrameType::I);

        Ok(EncodedFrame {
            data: bitstream.to_vec(),
            is_keyframe,
        })
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Force the next frame to be a keyframe
    pub fn force_keyframe(&mut self) {
        self.encoder.force_intra_frame();
    }
}

/// Result of encoding a single frame
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    /// Encoded H.264 data in Annex B format (with start codes)
    pub data: Vec<u8>,
    /// Whether this frame is a keyframe (IDR/I frame)
    pub is_keyframe: bool,
}

#[derive(Debug, Clone, Copy)]
struct PackedLayout {
    bpp: usize,
    r: usize,
    g: usize,
    b: usize,
}

impl PackedLayout {
    fn for_format(format: FourCharCode) -> Option<Self> {
        match format {
            FourCharCode::BGRA => Some(Self { bpp: 4, r: 2, g: 1, b: 0 }),
            FourCharCode::RGB24 => Some(Self { bpp: 3, r: 0, g: 1, b: 2 }),
            _ => None,
        }
    }
}

/// Convert a packed frame to I420 (BT.601, chroma from the top-left pixel of each 2x2 block)
fn packed_to_yuv420(pixels: &PixelBuffer, layout: PackedLayout) -> Result<Vec<u8>, CaptureError> {
    let w = pixels.width as usize;
    let h = pixels.height as usize;
    let stride = pixels.bytes_per_row;
    if stride < w * layout.bpp || pixels.data.len() < stride * (h - 1) + w * layout.bpp {
        return Err(CaptureError::Encoding(format!(
            "Pixel buffer too small for {}x{} with stride {}",
            w, h, stride
        )));
    }

    let y_size = w * h;
    let uv_size = (w / 2) * (h / 2);
    let mut yuv = vec![0u8; y_size + uv_size * 2];
    let (y_plane, uv_planes) = yuv.split_at_mut(y_size);
    let (u_plane, v_plane) = uv_planes.split_at_mut(uv_size);

    for y in 0..h {
        let row = &pixels.data[y * stride..];
        for x in 0..w {
            let px = &row[x * layout.bpp..];
            let r = px[layout.r] as i32;
            let g = px[layout.g] as i32;
            let b = px[layout.b] as i32;

            let y_val = ((66 * r + 129 * g + 25 * b + 128) >> 8) + 16;
            y_plane[y * w + x] = y_val.clamp(0, 255) as u8;

            if y % 2 == 0 && x % 2 == 0 {
                let uv_idx = (y / 2) * (w / 2) + (x / 2);
                let u_val = ((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128;
                let v_val = ((112 * r - 94 * g - 18 * b + 128) >> 8) + 128;
                u_plane[uv_idx] = u_val.clamp(0, 255) as u8;
                v_plane[uv_idx] = v_val.clamp(0, 255) as u8;
            }
        }
    }

    Ok(yuv)
}
