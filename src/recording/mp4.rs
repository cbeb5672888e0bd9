//! MP4 writer: openh264 for video, libopus for audio, muxide for the container

use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;

use muxide::api::{Metadata, MuxerBuilder, VideoCodec};

use crate::errors::CaptureError;
use crate::timing::MediaTime;
use crate::types::{
    AudioBuffer, AudioFormat, ContainerType, FourCharCode, MediaKind, PixelBuffer, VideoFormat,
    VideoOrientation,
};

use super::config::{RecordingConfig, RecordingStats};
use super::encoder::H264Encoder;
#[cfg(feature = "audio")]
use super::opus::OpusEncoder;
use super::writer::{AudioTrackSettings, MediaWriter, OutputFile, VideoTrackSettings, WriterFactory};

/// Container-level options shared by every file a factory opens
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Mp4Options {
    pub fast_start: bool,
    pub title: Option<String>,
}

impl From<&RecordingConfig> for Mp4Options {
    fn from(config: &RecordingConfig) -> Self {
        Self {
            fast_start: config.fast_start,
            title: config.title.clone(),
        }
    }
}

struct VideoTrack {
    format: VideoFormat,
    fps: f64,
    encoder: Option<H264Encoder>,
    last_pts: Option<f64>,
    finished: bool,
}

#[cfg_attr(not(feature = "audio"), allow(dead_code))]
struct AudioTrack {
    format: AudioFormat,
    bitrate: u32,
    #[cfg(feature = "audio")]
    encoder: Option<OpusEncoder>,
    last_pts: Option<f64>,
    finished: bool,
}

/// Writes H.264 (and Opus with the `audio` feature) into an MP4 file
pub struct Mp4Writer {
    path: PathBuf,
    options: Mp4Options,
    video: Option<VideoTrack>,
    audio: Option<AudioTrack>,
    muxer: Option<muxide::api::Muxer<BufWriter<File>>>,
    session_start: Option<MediaTime>,
    dropped_frames: u64,
}

impl Mp4Writer {
    pub fn new(path: impl Into<PathBuf>, options: Mp4Options) -> Self {
        Self {
            path: path.into(),
            options,
            video: None,
            audio: None,
            muxer: None,
            session_start: None,
            dropped_frames: 0,
        }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Seconds since the session start; `None` before `start_session`.
    fn writer_secs(&self, pts: MediaTime) -> Option<f64> {
        self.session_start.map(|start| (pts - start).as_secs_f64())
    }

    #[cfg(feature = "audio")]
    fn write_audio_packets(
        &mut self,
        packets: Vec<super::opus::EncodedAudio>,
    ) -> Result<(), CaptureError> {
        let (Some(muxer), Some(track)) = (self.muxer.as_mut(), self.audio.as_mut()) else {
            return Ok(());
        };
        for packet in packets {
            if track.last_pts.is_some_and(|last| packet.timestamp <= last) || packet.timestamp < 0.0 {
                self.dropped_frames += 1;
                continue;
            }
            muxer
                .write_audio(packet.timestamp, &packet.data)
                .map_err(|e| CaptureError::Muxing(format!("Failed to write audio: {}", e)))?;
            track.last_pts = Some(packet.timestamp);
        }
        Ok(())
    }
}

impl MediaWriter for Mp4Writer {
    fn can_apply_video(&self, format: &VideoFormat, settings: &VideoTrackSettings) -> bool {
        settings.codec == FourCharCode::H264
            && format.bytes_per_pixel().is_some()
            && format.width > 0
            && format.height > 0
            && format.width % 2 == 0
            && format.height % 2 == 0
    }

    #[cfg(feature = "audio")]
    fn can_apply_audio(&self, format: &AudioFormat, settings: &AudioTrackSettings) -> bool {
        settings.codec == FourCharCode::OPUS
            && format.codec == FourCharCode::LPCM_F32
            && OpusEncoder::supports(format.sample_rate, format.channels)
    }

    #[cfg(not(feature = "audio"))]
    fn can_apply_audio(&self, _format: &AudioFormat, _settings: &AudioTrackSettings) -> bool {
        false
    }

    fn add_video_track(
        &mut self,
        format: &VideoFormat,
        orientation: VideoOrientation,
        settings: &VideoTrackSettings,
    ) -> Result<(), CaptureError> {
        if self.muxer.is_some() {
            return Err(CaptureError::Writer("tracks are fixed once writing starts".to_string()));
        }
        if orientation.rotation_degrees() != 0 {
            log::debug!(
                "{}: {}° orientation is not stored in the container",
                self.path.display(),
                orientation.rotation_degrees()
            );
        }
        self.video = Some(VideoTrack {
            format: *format,
            fps: settings.fps_for(format),
            encoder: None,
            last_pts: None,
            finished: false,
        });
        Ok(())
    }

    fn add_audio_track(
        &mut self,
        format: &AudioFormat,
        settings: &AudioTrackSettings,
    ) -> Result<(), CaptureError> {
        if self.muxer.is_some() {
            return Err(CaptureError::Writer("tracks are fixed once writing starts".to_string()));
        }
        if !self.can_apply_audio(format, settings) {
            return Err(CaptureError::UnsupportedFormat(format!(
                "audio {} {} Hz x{}",
                format.codec, format.sample_rate, format.channels
            )));
        }
        self.audio = Some(AudioTrack {
            format: *format,
            bitrate: settings.bitrate,
            #[cfg(feature = "audio")]
            encoder: None,
            last_pts: None,
            finished: false,
        });
        Ok(())
    }

    fn has_track(&self, kind: MediaKind) -> bool {
        match kind {
            MediaKind::Video => self.video.is_some(),
            MediaKind::Audio => self.audio.is_some(),
        }
    }

    fn start_writing(&mut self) -> Result<(), CaptureError> {
        let video = self
            .video
            .as_mut()
            .ok_or(CaptureError::MissingFormat("video"))?;

        let file = File::create(&self.path)?;
        let mut builder = MuxerBuilder::new(BufWriter::new(file))
            .video(VideoCodec::H264, video.format.width, video.format.height, video.fps)
            .with_fast_start(self.options.fast_start);

        #[cfg(feature = "audio")]
        if let Some(audio) = self.audio.as_mut() {
            builder = builder.audio(
                muxide::api::AudioCodec::Opus,
                audio.format.sample_rate,
                audio.format.channels,
            );
            audio.encoder = Some(OpusEncoder::for_format(&audio.format, audio.bitrate)?);
        }

        let metadata = match self.options.title {
            Some(ref title) => Metadata::new().with_title(title).with_current_time(),
            None => Metadata::new().with_current_time(),
        };
        builder = builder.with_metadata(metadata);

        let muxer = builder
            .build()
            .map_err(|e| CaptureError::Muxing(format!("Failed to create muxer: {}", e)))?;
        video.encoder = Some(H264Encoder::new(video.format.width, video.format.height)?);
        self.muxer = Some(muxer);

        log::debug!(
            "mp4 writer started: {} ({}x{} @ {:.2} fps, audio: {})",
            self.path.display(),
            video.format.width,
            video.format.height,
            video.fps,
            self.audio.is_some()
        );
        Ok(())
    }

    fn start_session(&mut self, at: MediaTime) {
        if self.session_start.is_none() {
            self.session_start = Some(at);
        }
    }

    fn is_ready_for_more(&self, kind: MediaKind) -> bool {
        if self.muxer.is_none() || self.session_start.is_none() {
            return false;
        }
        match kind {
            MediaKind::Video => self.video.as_ref().is_some_and(|t| !t.finished),
            MediaKind::Audio => self.audio.as_ref().is_some_and(|t| !t.finished),
        }
    }

    fn append_video(&mut self, pixels: &PixelBuffer, pts: MediaTime) -> Result<(), CaptureError> {
        let Some(secs) = self.writer_secs(pts) else {
            return Ok(());
        };
        let (Some(muxer), Some(track)) = (self.muxer.as_mut(), self.video.as_mut()) else {
            return Ok(());
        };
        // muxide needs strictly increasing timestamps
        if secs < 0.0 || track.last_pts.is_some_and(|last| secs <= last) {
            self.dropped_frames += 1;
            return Ok(());
        }
        let Some(encoder) = track.encoder.as_mut() else {
            return Ok(());
        };

        let encoded = encoder.encode(pixels)?;
        if encoded.data.is_empty() {
            self.dropped_frames += 1;
            return Ok(());
        }
        muxer
            .write_video(secs, &encoded.data, encoded.is_keyframe)
            .map_err(|e| CaptureError::Muxing(format!("Failed to write frame: {}", e)))?;
        track.last_pts = Some(secs);
        Ok(())
    }

    #[cfg(feature = "audio")]
    fn append_audio(&mut self, buffer: &AudioBuffer, pts: MediaTime) -> Result<(), CaptureError> {
        let Some(secs) = self.writer_secs(pts) else {
            return Ok(());
        };
        let Some(encoder) = self.audio.as_mut().and_then(|t| t.encoder.as_mut()) else {
            return Ok(());
        };
        let packets = encoder.encode(&buffer.samples, secs)?;
        self.write_audio_packets(packets)
    }

    #[cfg(not(feature = "audio"))]
    fn append_audio(&mut self, _buffer: &AudioBuffer, _pts: MediaTime) -> Result<(), CaptureError> {
        Ok(())
    }

    fn mark_tracks_finished(&mut self) {
        if let Some(video) = self.video.as_mut() {
            video.finished = true;
        }
        if let Some(audio) = self.audio.as_mut() {
            audio.finished = true;
        }
    }

    fn finish(&mut self) -> Result<RecordingStats, CaptureError> {
        #[cfg(feature = "audio")]
        {
            let tail = match self.audio.as_mut().and_then(|t| t.encoder.as_mut()) {
                Some(encoder) => encoder.flush()?,
                None => Vec::new(),
            };
            self.write_audio_packets(tail)?;
        }

        let muxer = self
            .muxer
            .take()
            .ok_or_else(|| CaptureError::Writer("writer was never started".to_string()))?;
        let stats = muxer
            .finish_with_stats()
            .map_err(|e| CaptureError::Muxing(format!("Failed to finalize recording: {}", e)))?;

        log::debug!(
            "mp4 writer finished: {} ({} video / {} audio frames, {} bytes)",
            self.path.display(),
            stats.video_frames,
            stats.audio_frames,
            stats.bytes_written
        );
        Ok(RecordingStats {
            video_frames: stats.video_frames,
            audio_frames: stats.audio_frames,
            duration_secs: Some(stats.duration_secs),
            bytes_written: stats.bytes_written,
            dropped_frames: self.dropped_frames,
        })
    }
}

/// Opens an [`Mp4Writer`] per recording
#[derive(Debug, Clone, Default)]
pub struct Mp4WriterFactory {
    options: Mp4Options,
}

impl Mp4WriterFactory {
    pub fn new(options: Mp4Options) -> Self {
        Self { options }
    }

    pub fn from_config(config: &RecordingConfig) -> Self {
        Self::new(Mp4Options::from(config))
    }
}

impl WriterFactory for Mp4WriterFactory {
    fn create(&self, destination: &OutputFile) -> Result<Box<dyn MediaWriter>, CaptureError> {
        if destination.container != ContainerType::Mp4 {
            return Err(CaptureError::UnsupportedFormat(format!(
                "{:?} container",
                destination.container
            )));
        }
        Ok(Box::new(Mp4Writer::new(
            destination.path.clone(),
            self.options.clone(),
        )))
    }
}
