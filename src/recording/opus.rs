//! Opus encoding for the MP4 audio track

use crate::errors::CaptureError;
use crate::types::AudioFormat;

/// 20 ms at 48 kHz, per channel
pub const OPUS_FRAME_SAMPLES: usize = 960;

/// OPUS_APPLICATION_AUDIO (music/mixed content)
const OPUS_APPLICATION_AUDIO: i32 = 2049;

/// Largest packet libopus is allowed to produce per frame
const MAX_PACKET_BYTES: usize = 4000;

/// Encoded Opus audio packet
#[derive(Debug, Clone)]
pub struct EncodedAudio {
    pub data: Vec<u8>,
    /// Seconds on the writer timeline
    pub timestamp: f64,
    pub duration: f64,
}

/// Buffers interleaved f32 PCM and emits one packet per full Opus frame
///
/// Packet timestamps are the first buffered sample's time plus the samples
/// encoded since, so jitter in the input timestamps never reorders packets.
pub struct OpusEncoder {
    encoder: *mut libopus_sys::OpusEncoder,
    channels: u16,
    sample_rate: u32,
    sample_buffer: Vec<f32>,
    buffer_start_pts: Option<f64>,
    samples_encoded: u64,
}

// SAFETY: the libopus state is only reached through `&mut self`, so moving
// the encoder to the writer's lane is sound. Not `Sync`.
unsafe impl Send for OpusEncoder {}

impl OpusEncoder {
    /// 48 kHz only, mono or stereo.
    pub fn new(sample_rate: u32, channels: u16, bitrate: u32) -> Result<Self, CaptureError> {
        if !Self::supports(sample_rate, channels) {
            return Err(CaptureError::UnsupportedFormat(format!(
                "Opus needs 48000 Hz mono or stereo, got {} Hz x{}",
                sample_rate, channels
            )));
        }

        let mut error: i32 = 0;
        let encoder = unsafe {
            libopus_sys::opus_encoder_create(
                sample_rate as i32,
                channels as i32,
                OPUS_APPLICATION_AUDIO,
                &mut error,
            )
        };
        if encoder.is_null() || error != 0 {
            return Err(CaptureError::Encoding(format!(
                "Failed to create Opus encoder: error code {}",
                error
            )));
        }

        let result = unsafe {
            libopus_sys::opus_encoder_ctl(
                encoder,
                libopus_sys::OPUS_SET_BITRATE_REQUEST as i32,
                bitrate as i32,
            )
        };
        if result != 0 {
            unsafe { libopus_sys::opus_encoder_destroy(encoder) };
            return Err(CaptureError::Encoding(format!(
                "Failed to set bitrate: error code {}",
                result
            )));
        }

        Ok(Self {
            encoder,
            channels,
            sample_rate,
            sample_buffer: Vec::with_capacity(OPUS_FRAME_SAMPLES * channels as usize * 2),
            buffer_start_pts: None,
            samples_encoded: 0,
        })
    }

    pub fn supports(sample_rate: u32, channels: u16) -> bool {
        sample_rate == 48_000 && (channels == 1 || channels == 2)
    }

    pub fn for_format(format: &AudioFormat, bitrate: u32) -> Result<Self, CaptureError> {
        Self::new(format.sample_rate, format.channels, bitrate)
    }

    /// Queue interleaved samples starting at `timestamp` seconds.
    pub fn encode(&mut self, samples: &[f32], timestamp: f64) -> Result<Vec<EncodedAudio>, CaptureError> {
        if samples.len() % self.channels as usize != 0 {
            return Err(CaptureError::Encoding(format!(
                "{} samples do not divide into {} channels",
                samples.len(),
                self.channels
            )));
        }
        if self.buffer_start_pts.is_none() && !samples.is_empty() {
            self.buffer_start_pts = Some(timestamp);
        }
        self.sample_buffer.extend_from_slice(samples);
        self.drain_frames()
    }

    /// Pad and encode whatever is still buffered.
    pub fn flush(&mut self) -> Result<Vec<EncodedAudio>, CaptureError> {
        let samples_per_frame = OPUS_FRAME_SAMPLES * self.channels as usize;
        let remainder = self.sample_buffer.len() % samples_per_frame;
        if remainder != 0 {
            self.sample_buffer
                .resize(self.sample_buffer.len() + samples_per_frame - remainder, 0.0);
        }
        self.drain_frames()
    }

    fn drain_frames(&mut self) -> Result<Vec<EncodedAudio>, CaptureError> {
        let samples_per_frame = OPUS_FRAME_SAMPLES * self.channels as usize;
        let frame_duration = OPUS_FRAME_SAMPLES as f64 / self.sample_rate as f64;
        let mut packets = Vec::new();

        while self.sample_buffer.len() >= samples_per_frame {
            let mut output = vec![0u8; MAX_PACKET_BYTES];
            let len = unsafe {
                libopus_sys::opus_encode_float(
                    self.encoder,
                    self.sample_buffer.as_ptr(),
                    OPUS_FRAME_SAMPLES as i32,
                    output.as_mut_ptr(),
                    output.len() as i32,
                )
            };
            if len < 0 {
                return Err(CaptureError::Encoding(format!(
                    "Opus encoding failed: error code {}",
                    len
                )));
            }
            self.sample_buffer.drain(..samples_per_frame);
            output.truncate(len as usize);

            let offset = self.samples_encoded as f64 / self.sample_rate as f64;
            packets.push(EncodedAudio {
                data: output,
                timestamp: self.buffer_start_pts.unwrap_or(0.0) + offset,
                duration: frame_duration,
            });
            self.samples_encoded += OPUS_FRAME_SAMPLES as u64;
        }

        Ok(packets)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }
}

impl Drop for OpusEncoder {
    fn drop(&mut self) {
        if !self.encoder.is_null() {
            unsafe {
                libopus_sys::opus_encoder_destroy(self.encoder);
            }
        }
    }
}
