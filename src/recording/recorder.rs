//! Pausable multiplexed recorder
//!
//! Public calls enqueue onto the recorder's own lane and return at once.
//! Writer calls, pause bookkeeping and state transitions all happen on that
//! lane; the status is mirrored behind a mutex so other threads can poll it.

use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex, Weak};

use uuid::Uuid;

use crate::dispatch::{CallbackQueue, SerialQueue};
use crate::errors::CaptureError;
use crate::models::RecordedVideo;
use crate::timing::{MediaClock, MediaTime};
use crate::types::{AudioBuffer, AudioFormat, MediaKind, Sample, VideoFormat, VideoFrame, VideoOrientation};

use super::status::RecordingStatus;
use super::timeline::PauseTimeline;
use super::writer::{AudioTrackSettings, MediaWriter, OutputFile, VideoTrackSettings, WriterFactory};

/// Receives a recorder's lifecycle on its callback queue
pub trait RecorderDelegate: Send + Sync {
    fn recorder_started(&self, _recorder: Uuid) {}
    fn recorder_finished(&self, recorder: Uuid, video: RecordedVideo);
    fn recorder_failed(&self, recorder: Uuid, error: CaptureError);
}

struct RecorderCore {
    id: Uuid,
    destination: OutputFile,
    factory: Arc<dyn WriterFactory>,
    delegate: Weak<dyn RecorderDelegate>,
    callbacks: CallbackQueue,
    status: Arc<Mutex<RecordingStatus>>,
    writer: Option<Box<dyn MediaWriter>>,
    video_format: Option<VideoFormat>,
    video_orientation: VideoOrientation,
    video_settings: VideoTrackSettings,
    audio_format: Option<AudioFormat>,
    audio_settings: AudioTrackSettings,
    timeline: PauseTimeline,
}

/// One recording into one file
///
/// Never reused: once finished or failed, start a new `Recorder`.
pub struct Recorder {
    id: Uuid,
    destination: OutputFile,
    lane: SerialQueue,
    clock: Arc<dyn MediaClock>,
    status: Arc<Mutex<RecordingStatus>>,
    core: Arc<Mutex<RecorderCore>>,
}

impl Recorder {
    pub fn new(
        destination: OutputFile,
        factory: Arc<dyn WriterFactory>,
        delegate: Weak<dyn RecorderDelegate>,
        callbacks: CallbackQueue,
        clock: Arc<dyn MediaClock>,
    ) -> Result<Self, CaptureError> {
        let id = Uuid::new_v4();
        let lane = SerialQueue::new("crabcapture.recorder")?;
        let status = Arc::new(Mutex::new(RecordingStatus::Idle));
        let core = RecorderCore {
            id,
            destination: destination.clone(),
            factory,
            delegate,
            callbacks,
            status: status.clone(),
            writer: None,
            video_format: None,
            video_orientation: VideoOrientation::default(),
            video_settings: VideoTrackSettings::default(),
            audio_format: None,
            audio_settings: AudioTrackSettings::default(),
            timeline: PauseTimeline::new(),
        };

        log::debug!("recorder {} created for {}", id, destination.path.display());
        Ok(Self {
            id,
            destination,
            lane,
            clock,
            status,
            core: Arc::new(Mutex::new(core)),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn destination(&self) -> &OutputFile {
        &self.destination
    }

    pub fn status(&self) -> RecordingStatus {
        *self.status.lock().expect("lock poisoned")
    }

    pub fn is_recording(&self) -> bool {
        self.status().is_recording()
    }

    /// Snapshot of the pause bookkeeping as of the last processed job
    pub fn timeline(&self) -> PauseTimeline {
        self.core.lock().expect("lock poisoned").timeline.clone()
    }

    fn submit<F>(&self, job: F)
    where
        F: FnOnce(&mut RecorderCore) + Send + 'static,
    {
        let core = self.core.clone();
        self.lane.dispatch(move || {
            let mut core = core.lock().expect("lock poisoned");
            job(&mut core);
        });
    }

    /// Only honored while idle.
    pub fn add_video_track(
        &self,
        format: VideoFormat,
        orientation: VideoOrientation,
        settings: VideoTrackSettings,
    ) {
        self.submit(move |core| {
            if !core.status().is_idle() {
                log::debug!("recorder {}: video track ignored, not idle", core.id);
                return;
            }
            core.video_format = Some(format);
            core.video_orientation = orientation;
            core.video_settings = settings;
        });
    }

    /// Only honored while idle.
    pub fn add_audio_track(&self, format: AudioFormat, settings: AudioTrackSettings) {
        self.submit(move |core| {
            if !core.status().is_idle() {
                log::debug!("recorder {}: audio track ignored, not idle", core.id);
                return;
            }
            core.audio_format = Some(format);
            core.audio_settings = settings;
        });
    }

    /// Replace the stored video format without touching the writer's tracks.
    pub fn set_video_format(&self, format: VideoFormat) {
        self.submit(move |core| core.video_format = Some(format));
    }

    /// Replace the stored audio format without touching the writer's tracks.
    pub fn set_audio_format(&self, format: AudioFormat) {
        self.submit(move |core| core.audio_format = Some(format));
    }

    pub fn prepare_to_record(&self) {
        self.submit(RecorderCore::prepare);
    }

    pub fn append_video(&self, frame: VideoFrame) {
        self.submit(move |core| core.append_video(frame));
    }

    pub fn append_audio(&self, buffer: AudioBuffer) {
        self.submit(move |core| core.append_audio(buffer));
    }

    pub fn append(&self, sample: Sample) {
        match sample {
            Sample::Video(frame) => self.append_video(frame),
            Sample::Audio(buffer) => self.append_audio(buffer),
        }
    }

    pub fn pause(&self) {
        let at = self.clock.now();
        self.submit(move |core| core.pause(at));
    }

    pub fn resume(&self) {
        let at = self.clock.now();
        self.submit(move |core| core.resume(at));
    }

    /// No-op unless recording or paused.
    pub fn finish_recording(&self) {
        self.submit(RecorderCore::finish);
    }

    /// Block until every call made so far has been processed.
    pub fn flush(&self) {
        self.lane.flush();
    }
}

impl std::fmt::Debug for Recorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Recorder")
            .field("id", &self.id)
            .field("destination", &self.destination)
            .field("status", &self.status())
            .finish()
    }
}

fn remove_existing(path: &Path) -> Result<(), CaptureError> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            log::debug!("removed existing file at {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

impl RecorderCore {
    fn status(&self) -> RecordingStatus {
        *self.status.lock().expect("lock poisoned")
    }

    /// Terminal states are sticky and repeating the current state is a no-op.
    fn set_status(&self, next: RecordingStatus) -> bool {
        let mut status = self.status.lock().expect("lock poisoned");
        if *status == next || status.is_final() {
            return false;
        }
        log::debug!("recorder {}: {:?} -> {:?}", self.id, *status, next);
        *status = next;
        true
    }

    fn notify<F>(&self, callback: F)
    where
        F: FnOnce(&dyn RecorderDelegate) + Send + 'static,
    {
        let delegate = self.delegate.clone();
        self.callbacks.dispatch(move || {
            if let Some(delegate) = delegate.upgrade() {
                callback(delegate.as_ref());
            }
        });
    }

    fn started(&mut self) {
        if self.set_status(RecordingStatus::Recording) {
            log::info!("recording started: {}", self.destination.path.display());
            let id = self.id;
            self.notify(move |delegate| delegate.recorder_started(id));
        }
    }

    fn completed(&mut self, video: RecordedVideo) {
        if self.set_status(RecordingStatus::Finished) {
            log::info!(
                "recording finished: {} ({:?}s)",
                video.path.display(),
                video.duration_secs
            );
            let id = self.id;
            self.notify(move |delegate| delegate.recorder_finished(id, video));
        }
    }

    fn failed(&mut self, error: CaptureError) {
        self.writer = None;
        if self.set_status(RecordingStatus::Failed) {
            log::warn!("recording failed for {}: {}", self.destination.path.display(), error);
            let id = self.id;
            self.notify(move |delegate| delegate.recorder_failed(id, error));
        }
    }

    fn prepare(&mut self) {
        if !self.status().is_idle() {
            return;
        }
        match self.open_writer() {
            Ok(writer) => {
                self.writer = Some(writer);
                self.set_status(RecordingStatus::Prepared);
            }
            Err(e) => self.failed(e),
        }
    }

    fn open_writer(&self) -> Result<Box<dyn MediaWriter>, CaptureError> {
        remove_existing(&self.destination.path)?;
        let mut writer = self.factory.create(&self.destination)?;

        let format = self.video_format.ok_or(CaptureError::MissingFormat("video"))?;
        if !writer.can_apply_video(&format, &self.video_settings) {
            return Err(CaptureError::UnsupportedFormat(format!(
                "{} {}x{} cannot be written as {}",
                format.codec, format.width, format.height, self.video_settings.codec
            )));
        }
        writer.add_video_track(&format, self.video_orientation, &self.video_settings)?;

        if let Some(audio) = self.audio_format {
            if !writer.can_apply_audio(&audio, &self.audio_settings) {
                log::warn!(
                    "skipping audio track: {} {} Hz x{} not accepted",
                    audio.codec,
                    audio.sample_rate,
                    audio.channels
                );
            } else if let Err(e) = writer.add_audio_track(&audio, &self.audio_settings) {
                log::warn!("skipping audio track: {}", e);
            }
        }

        writer.start_writing()?;
        Ok(writer)
    }

    fn append_video(&mut self, frame: VideoFrame) {
        if self.video_format.is_none() || !self.status().is_recording_or_prepared() {
            return;
        }
        let pts = self.timeline.video_pts(frame.timestamp);
        self.write(MediaKind::Video, pts, |writer| writer.append_video(&frame.pixels, pts));
    }

    fn append_audio(&mut self, buffer: AudioBuffer) {
        if self.audio_format.is_none() || !self.status().is_recording_or_prepared() {
            return;
        }
        let pts = self.timeline.audio_pts(buffer.timestamp);
        self.write(MediaKind::Audio, pts, |writer| writer.append_audio(&buffer, pts));
    }

    fn write<F>(&mut self, kind: MediaKind, pts: MediaTime, append: F)
    where
        F: FnOnce(&mut dyn MediaWriter) -> Result<(), CaptureError>,
    {
        if self.status().is_prepared() {
            if let Some(writer) = self.writer.as_mut() {
                writer.start_session(pts);
            }
            self.started();
        }
        if !self.status().is_recording() {
            return;
        }

        let Some(writer) = self.writer.as_mut() else {
            return;
        };
        if !writer.has_track(kind) || !writer.is_ready_for_more(kind) {
            return;
        }
        let result = append(writer.as_mut());
        if let Err(e) = result {
            self.failed(e);
        }
    }

    fn pause(&mut self, at: MediaTime) {
        if self.status().is_recording() {
            self.timeline.pause(at);
            self.set_status(RecordingStatus::Paused);
        }
    }

    fn resume(&mut self, at: MediaTime) {
        if self.status().is_paused() {
            self.timeline.resume(at);
            self.set_status(RecordingStatus::Recording);
        }
    }

    fn finish(&mut self) {
        if !self.status().is_active() {
            return;
        }
        let Some(mut writer) = self.writer.take() else {
            return;
        };

        writer.mark_tracks_finished();
        match writer.finish() {
            Ok(stats) => {
                let (width, height) = self
                    .video_format
                    .map(|f| (f.width, f.height))
                    .unwrap_or_default();
                let video = RecordedVideo {
                    path: self.destination.path.clone(),
                    container: self.destination.container,
                    codec: self.video_settings.codec.to_code_string(),
                    width,
                    height,
                    created: chrono::Utc::now(),
                    duration_secs: stats.duration_secs,
                };
                self.completed(video);
            }
            Err(e) => self.failed(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        synthetic_audio_buffer, synthetic_video_frame, CollectingRecorderDelegate, ManualClock,
        MemoryWriterFactory, RecorderEvent, WriterCall,
    };
    use crate::types::AudioFormat;

    struct Harness {
        recorder: Recorder,
        factory: Arc<MemoryWriterFactory>,
        delegate: Arc<CollectingRecorderDelegate>,
        clock: Arc<ManualClock>,
        callbacks: CallbackQueue,
        _dir: tempfile::TempDir,
    }

    impl Harness {
        fn new(factory: MemoryWriterFactory) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let factory = Arc::new(factory);
            let delegate = Arc::new(CollectingRecorderDelegate::default());
            let clock = Arc::new(ManualClock::new());
            let callbacks = CallbackQueue::new("test.callbacks").unwrap();
            let weak: Weak<CollectingRecorderDelegate> = Arc::downgrade(&delegate);
            let recorder = Recorder::new(
                OutputFile::mp4(dir.path().join("clip.mp4")),
                factory.clone(),
                weak,
                callbacks.clone(),
                clock.clone(),
            )
            .unwrap();
            Self {
                recorder,
                factory,
                delegate,
                clock,
                callbacks,
                _dir: dir,
            }
        }

        fn settle(&self) {
            self.recorder.flush();
            self.callbacks.flush();
        }
    }

    fn secs(s: f64) -> MediaTime {
        MediaTime::from_secs_f64(s)
    }

    fn hd() -> VideoFormat {
        VideoFormat::bgra(1920, 1080, 30.0)
    }

    fn video_at(t: f64) -> VideoFrame {
        let mut frame = synthetic_video_frame(0, VideoFormat::bgra(4, 4, 30.0));
        frame.timestamp = secs(t);
        frame
    }

    fn prepared(factory: MemoryWriterFactory) -> Harness {
        let h = Harness::new(factory);
        h.recorder
            .add_video_track(hd(), VideoOrientation::Portrait, VideoTrackSettings::default());
        h.recorder
            .add_audio_track(AudioFormat::pcm_f32(48_000, 1), AudioTrackSettings::default());
        h.recorder.prepare_to_record();
        h.settle();
        h
    }

    #[test]
    fn test_prepare_moves_to_prepared() {
        let h = prepared(MemoryWriterFactory::new());
        assert_eq!(h.recorder.status(), RecordingStatus::Prepared);
        assert!(h.factory.calls().contains(&WriterCall::StartWriting));
        assert!(h.delegate.events().is_empty());
    }

    #[test]
    fn test_pause_resume_scenario() {
        let h = prepared(MemoryWriterFactory::new());

        h.recorder.append_video(video_at(0.0));
        h.settle();
        assert_eq!(h.recorder.status(), RecordingStatus::Recording);
        assert_eq!(h.factory.session_start(), Some(MediaTime::ZERO));

        h.recorder
            .append_audio(synthetic_audio_buffer(secs(0.01), AudioFormat::pcm_f32(48_000, 1), 480));
        h.clock.set(secs(1.0));
        h.recorder.pause();
        h.clock.advance(secs(2.0));
        h.recorder.resume();
        h.recorder.append_video(video_at(2.03));
        h.settle();

        assert_eq!(h.factory.appended(MediaKind::Video), vec![MediaTime::ZERO, secs(0.03)]);
        assert_eq!(h.factory.appended(MediaKind::Audio), vec![secs(0.01)]);
        assert_eq!(h.recorder.timeline().offset(), secs(2.0));
        assert_eq!(h.delegate.events(), vec![RecorderEvent::Started(h.recorder.id())]);
    }

    #[test]
    fn test_first_audio_sample_anchors_session() {
        let h = prepared(MemoryWriterFactory::new());
        h.recorder
            .append_audio(synthetic_audio_buffer(secs(0.5), AudioFormat::pcm_f32(48_000, 1), 480));
        h.recorder.append_video(video_at(0.6));
        h.settle();
        assert_eq!(h.factory.session_start(), Some(secs(0.5)));
        assert_eq!(h.factory.appended(MediaKind::Video), vec![secs(0.6)]);
    }

    #[test]
    fn test_finish_while_prepared_is_noop() {
        let h = prepared(MemoryWriterFactory::new());
        h.recorder.finish_recording();
        h.settle();
        assert_eq!(h.recorder.status(), RecordingStatus::Prepared);
        assert!(h.delegate.events().is_empty());
        assert!(!h.factory.calls().contains(&WriterCall::Finish));
    }

    #[test]
    fn test_finish_reports_video() {
        let h = prepared(MemoryWriterFactory::new());
        h.recorder.append_video(video_at(0.0));
        h.recorder.append_video(video_at(1.0 / 30.0));
        h.recorder.finish_recording();
        h.settle();

        assert_eq!(h.recorder.status(), RecordingStatus::Finished);
        let events = h.delegate.events();
        let RecorderEvent::Finished(id, video) = &events[1] else {
            panic!("expected finished, got {:?}", events);
        };
        assert_eq!(*id, h.recorder.id());
        assert_eq!((video.width, video.height), (1920, 1080));
        assert_eq!(video.codec.as_deref(), Some("avc1"));
        assert_eq!(video.path, h.recorder.destination().path);
        assert!(video.duration_secs.is_some());
    }

    #[test]
    fn test_finish_while_paused() {
        let h = prepared(MemoryWriterFactory::new());
        h.recorder.append_video(video_at(0.0));
        h.recorder.pause();
        h.recorder.finish_recording();
        h.settle();
        assert_eq!(h.recorder.status(), RecordingStatus::Finished);
    }

    #[test]
    fn test_samples_while_paused_are_dropped() {
        let h = prepared(MemoryWriterFactory::new());
        h.recorder.append_video(video_at(0.0));
        h.recorder.pause();
        h.recorder.append_video(video_at(0.5));
        h.settle();
        assert_eq!(h.factory.appended(MediaKind::Video), vec![MediaTime::ZERO]);
    }

    #[test]
    fn test_missing_video_format_fails() {
        let h = Harness::new(MemoryWriterFactory::new());
        h.recorder.prepare_to_record();
        h.settle();
        assert_eq!(h.recorder.status(), RecordingStatus::Failed);
        match &h.delegate.events()[..] {
            [RecorderEvent::Failed(_, message)] => assert!(message.contains("video")),
            other => panic!("unexpected events {:?}", other),
        }
    }

    #[test]
    fn test_rejected_video_settings_fail() {
        let h = prepared(MemoryWriterFactory::new().reject_video());
        assert_eq!(h.recorder.status(), RecordingStatus::Failed);
    }

    #[test]
    fn test_declined_audio_is_skipped() {
        let h = prepared(MemoryWriterFactory::new().decline_audio());
        assert_eq!(h.recorder.status(), RecordingStatus::Prepared);
        h.recorder.append_video(video_at(0.0));
        h.recorder
            .append_audio(synthetic_audio_buffer(secs(0.01), AudioFormat::pcm_f32(48_000, 1), 480));
        h.settle();
        assert!(h.factory.appended(MediaKind::Audio).is_empty());
        assert_eq!(h.factory.appended(MediaKind::Video).len(), 1);
    }

    #[test]
    fn test_not_ready_track_drops_sample() {
        let h = prepared(MemoryWriterFactory::new());
        h.factory.set_ready(MediaKind::Video, false);
        h.recorder.append_video(video_at(0.0));
        h.settle();
        assert_eq!(h.recorder.status(), RecordingStatus::Recording);
        assert!(h.factory.appended(MediaKind::Video).is_empty());
    }

    #[test]
    fn test_append_error_fails_once() {
        let h = prepared(MemoryWriterFactory::new().fail_appends(MediaKind::Video));
        h.recorder.append_video(video_at(0.0));
        h.recorder.append_video(video_at(0.1));
        h.recorder.finish_recording();
        h.settle();
        assert_eq!(h.recorder.status(), RecordingStatus::Failed);
        let failures = h
            .delegate
            .events()
            .into_iter()
            .filter(|e| matches!(e, RecorderEvent::Failed(..)))
            .count();
        assert_eq!(failures, 1);
    }

    #[test]
    fn test_tracks_after_idle_are_ignored() {
        let h = prepared(MemoryWriterFactory::new());
        h.recorder
            .add_video_track(VideoFormat::bgra(640, 480, 30.0), VideoOrientation::Portrait, VideoTrackSettings::default());
        h.settle();
        let video_tracks = h
            .factory
            .calls()
            .into_iter()
            .filter(|c| matches!(c, WriterCall::AddVideoTrack { .. }))
            .count();
        assert_eq!(video_tracks, 1);
    }

    #[test]
    fn test_existing_file_is_replaced() {
        let h = Harness::new(MemoryWriterFactory::new());
        let path = h.recorder.destination().path.clone();
        std::fs::write(&path, b"stale").unwrap();
        h.recorder
            .add_video_track(hd(), VideoOrientation::Portrait, VideoTrackSettings::default());
        h.recorder.prepare_to_record();
        h.settle();
        assert!(!path.exists());
        assert_eq!(h.recorder.status(), RecordingStatus::Prepared);
    }

    #[test]
    fn test_dropped_delegate_is_skipped() {
        let h = prepared(MemoryWriterFactory::new());
        let Harness { recorder, delegate, callbacks, .. } = h;
        drop(delegate);
        recorder.append_video(video_at(0.0));
        recorder.flush();
        callbacks.flush();
        assert!(recorder.is_recording());
    }
}
