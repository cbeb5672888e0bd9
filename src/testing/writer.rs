//! An in-memory [`MediaWriter`] that records every call

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::errors::CaptureError;
use crate::recording::{
    AudioTrackSettings, MediaWriter, OutputFile, RecordingStats, VideoTrackSettings, WriterFactory,
};
use crate::timing::MediaTime;
use crate::types::{AudioBuffer, AudioFormat, MediaKind, PixelBuffer, VideoFormat, VideoOrientation};

/// One call made on a [`MemoryWriter`]
#[derive(Debug, Clone, PartialEq)]
pub enum WriterCall {
    Create(PathBuf),
    AddVideoTrack {
        format: VideoFormat,
        orientation: VideoOrientation,
    },
    AddAudioTrack {
        format: AudioFormat,
    },
    StartWriting,
    StartSession(MediaTime),
    AppendVideo(MediaTime),
    AppendAudio(MediaTime),
    MarkTracksFinished,
    Finish,
}

struct Script {
    calls: Vec<WriterCall>,
    video_ready: bool,
    audio_ready: bool,
    decline_audio: bool,
    reject_video: bool,
    fail_appends: Option<MediaKind>,
    fail_create: bool,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            calls: Vec::new(),
            video_ready: true,
            audio_ready: true,
            decline_audio: false,
            reject_video: false,
            fail_appends: None,
            fail_create: false,
        }
    }
}

/// Opens [`MemoryWriter`]s that share one call log and one script
#[derive(Clone, Default)]
pub struct MemoryWriterFactory {
    script: Arc<Mutex<Script>>,
}

impl MemoryWriterFactory {
    pub fn new() -> Self {
        Self::default()
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().expect("lock poisoned")
    }

    /// Writers refuse audio tracks.
    pub fn decline_audio(self) -> Self {
        self.script().decline_audio = true;
        self
    }

    /// Writers refuse every video format.
    pub fn reject_video(self) -> Self {
        self.script().reject_video = true;
        self
    }

    /// Every append on `kind` fails.
    pub fn fail_appends(self, kind: MediaKind) -> Self {
        self.script().fail_appends = Some(kind);
        self
    }

    pub fn fail_create(self) -> Self {
        self.script().fail_create = true;
        self
    }

    pub fn set_ready(&self, kind: MediaKind, ready: bool) {
        let mut script = self.script();
        match kind {
            MediaKind::Video => script.video_ready = ready,
            MediaKind::Audio => script.audio_ready = ready,
        }
    }

    pub fn calls(&self) -> Vec<WriterCall> {
        self.script().calls.clone()
    }

    pub fn writers_created(&self) -> usize {
        self.script()
            .calls
            .iter()
            .filter(|c| matches!(c, WriterCall::Create(_)))
            .count()
    }

    /// Timestamps appended on `kind`, across every writer
    pub fn appended(&self, kind: MediaKind) -> Vec<MediaTime> {
        self.script()
            .calls
            .iter()
            .filter_map(|c| match (c, kind) {
                (WriterCall::AppendVideo(t), MediaKind::Video) => Some(*t),
                (WriterCall::AppendAudio(t), MediaKind::Audio) => Some(*t),
                _ => None,
            })
            .collect()
    }

    /// The most recent session start
    pub fn session_start(&self) -> Option<MediaTime> {
        self.script().calls.iter().rev().find_map(|c| match c {
            WriterCall::StartSession(t) => Some(*t),
            _ => None,
        })
    }
}

impl WriterFactory for MemoryWriterFactory {
    fn create(&self, destination: &OutputFile) -> Result<Box<dyn MediaWriter>, CaptureError> {
        let mut script = self.script();
        if script.fail_create {
            return Err(CaptureError::Writer(format!(
                "cannot open {}",
                destination.path.display()
            )));
        }
        script.calls.push(WriterCall::Create(destination.path.clone()));
        Ok(Box::new(MemoryWriter {
            script: self.script.clone(),
            video: false,
            audio: false,
            writing: false,
            finished_tracks: false,
            session_start: None,
            last_pts: None,
            video_frames: 0,
            audio_frames: 0,
        }))
    }
}

/// Writer that keeps nothing but a log of what it was asked to do
pub struct MemoryWriter {
    script: Arc<Mutex<Script>>,
    video: bool,
    audio: bool,
    writing: bool,
    finished_tracks: bool,
    session_start: Option<MediaTime>,
    last_pts: Option<MediaTime>,
    video_frames: u64,
    audio_frames: u64,
}

impl MemoryWriter {
    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().expect("lock poisoned")
    }

    fn log(&self, call: WriterCall) {
        self.script().calls.push(call);
    }

    fn append(&mut self, kind: MediaKind, pts: MediaTime) -> Result<(), CaptureError> {
        if self.script().fail_appends == Some(kind) {
            return Err(CaptureError::Writer(format!("{} append failed", kind.as_str())));
        }
        self.last_pts = Some(self.last_pts.map_or(pts, |last| last.max(pts)));
        match kind {
            MediaKind::Video => {
                self.video_frames += 1;
                self.log(WriterCall::AppendVideo(pts));
            }
            MediaKind::Audio => {
                self.audio_frames += 1;
                self.log(WriterCall::AppendAudio(pts));
            }
        }
        Ok(())
    }
}

impl MediaWriter for MemoryWriter {
    fn can_apply_video(&self, format: &VideoFormat, _settings: &VideoTrackSettings) -> bool {
        !self.script().reject_video && format.width > 0 && format.height > 0
    }

    fn can_apply_audio(&self, _format: &AudioFormat, _settings: &AudioTrackSettings) -> bool {
        !self.script().decline_audio
    }

    fn add_video_track(
        &mut self,
        format: &VideoFormat,
        orientation: VideoOrientation,
        _settings: &VideoTrackSettings,
    ) -> Result<(), CaptureError> {
        self.video = true;
        self.log(WriterCall::AddVideoTrack {
            format: *format,
            orientation,
        });
        Ok(())
    }

    fn add_audio_track(
        &mut self,
        format: &AudioFormat,
        _settings: &AudioTrackSettings,
    ) -> Result<(), CaptureError> {
        self.audio = true;
        self.log(WriterCall::AddAudioTrack { format: *format });
        Ok(())
    }

    fn has_track(&self, kind: MediaKind) -> bool {
        match kind {
            MediaKind::Video => self.video,
            MediaKind::Audio => self.audio,
        }
    }

    fn start_writing(&mut self) -> Result<(), CaptureError> {
        self.writing = true;
        self.log(WriterCall::StartWriting);
        Ok(())
    }

    fn start_session(&mut self, at: MediaTime) {
        self.session_start = Some(at);
        self.log(WriterCall::StartSession(at));
    }

    fn is_ready_for_more(&self, kind: MediaKind) -> bool {
        if !self.writing || self.finished_tracks {
            return false;
        }
        let script = self.script();
        match kind {
            MediaKind::Video => script.video_ready,
            MediaKind::Audio => script.audio_ready,
        }
    }

    fn append_video(&mut self, _pixels: &PixelBuffer, pts: MediaTime) -> Result<(), CaptureError> {
        self.append(MediaKind::Video, pts)
    }

    fn append_audio(&mut self, _buffer: &AudioBuffer, pts: MediaTime) -> Result<(), CaptureError> {
        self.append(MediaKind::Audio, pts)
    }

    fn mark_tracks_finished(&mut self) {
        self.finished_tracks = true;
        self.log(WriterCall::MarkTracksFinished);
    }

    fn finish(&mut self) -> Result<RecordingStats, CaptureError> {
        if !self.writing {
            return Err(CaptureError::Writer("writer was never started".to_string()));
        }
        self.writing = false;
        self.log(WriterCall::Finish);
        let duration = match (self.session_start, self.last_pts) {
            (Some(start), Some(last)) => Some((last - start).as_secs_f64()),
            _ => None,
        };
        Ok(RecordingStats {
            video_frames: self.video_frames,
            audio_frames: self.audio_frames,
            duration_secs: duration,
            bytes_written: 0,
            dropped_frames: 0,
        })
    }
}
