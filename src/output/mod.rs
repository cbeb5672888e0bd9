//! Frame output router
//!
//! [`VideoDataOutput`] is attached to the session as both the video and the
//! audio data output. For every sample it:
//!
//! 1. drops it if it came over a connection the router no longer tracks,
//! 2. re-primes the filter and adopts a new format when the raw format changed,
//! 3. sends video through the filter to the renderer,
//! 4. forwards video and audio to the recorder while it accepts samples.
//!
//! Recording control (`start_recording`, `pause_recording`, ...) creates and
//! drives one [`Recorder`] at a time; its lifecycle is reported through a
//! [`VideoOutputDelegate`].

use std::sync::{Arc, Mutex, MutexGuard, Weak};

use uuid::Uuid;

use crate::dispatch::CallbackQueue;
use crate::errors::CaptureError;
use crate::filter::SharedFilter;
use crate::models::RecordedVideo;
use crate::recording::{
    OutputFile, Recorder, RecorderDelegate, RecordingConfig, RecordingStatus, WriterFactory,
};
use crate::render::Renderer;
use crate::session::{CaptureBackend, Connection, OutputKind, SampleSink, SessionOutput};
use crate::timing::{MediaClock, PTSClock};
use crate::types::{AudioBuffer, AudioFormat, MediaKind, Sample, VideoFormat, VideoFrame};

/// Recording lifecycle as seen by the router's owner, on the callback queue
pub trait VideoOutputDelegate: Send + Sync {
    fn recording_started(&self) {}
    fn recording_finished(&self, video: RecordedVideo);
    fn recording_failed(&self, error: CaptureError);
}

#[derive(Default)]
struct RouterState {
    video_connection: Option<Connection>,
    audio_connection: Option<Connection>,
    /// Last format delivered by the device
    raw_video_format: Option<VideoFormat>,
    /// Format after the filter, what the renderer and recorder see
    video_format: Option<VideoFormat>,
    audio_format: Option<AudioFormat>,
    filter: Option<SharedFilter>,
    renderer: Option<Arc<dyn Renderer>>,
    delegate: Option<Weak<dyn VideoOutputDelegate>>,
    recorder: Option<Arc<Recorder>>,
    config: RecordingConfig,
}

impl RouterState {
    fn is_current(&self, connection: &Connection) -> bool {
        let tracked = match connection.media_kind {
            MediaKind::Video => &self.video_connection,
            MediaKind::Audio => &self.audio_connection,
        };
        tracked.as_ref().map(|c| c.id) == Some(connection.id)
    }
}

struct Inner {
    state: Mutex<RouterState>,
    factory: Arc<dyn WriterFactory>,
    callbacks: CallbackQueue,
    clock: Arc<dyn MediaClock>,
    retained_buffer_hint: usize,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, RouterState> {
        self.state.lock().expect("lock poisoned")
    }

    fn delegate(&self) -> Option<Arc<dyn VideoOutputDelegate>> {
        self.state().delegate.as_ref().and_then(Weak::upgrade)
    }

    /// Clear the recorder if it is still the one that just terminated.
    fn release_recorder(&self, recorder: Uuid) {
        let mut state = self.state();
        if state.recorder.as_ref().map(|r| r.id()) == Some(recorder) {
            state.recorder = None;
        }
    }

    fn adopt_video_format(&self, state: &mut RouterState, raw: VideoFormat) -> VideoFormat {
        state.raw_video_format = Some(raw);
        let adopted = match &state.filter {
            Some(filter) => filter
                .lock()
                .expect("lock poisoned")
                .prepare(&raw, self.retained_buffer_hint)
                .unwrap_or_else(|| {
                    log::warn!(
                        "filter could not prepare for {}x{}, passing frames through",
                        raw.width,
                        raw.height
                    );
                    raw
                }),
            None => raw,
        };
        log::debug!(
            "video format changed: {}x{} @ {:.2} fps",
            adopted.width,
            adopted.height,
            adopted.fps()
        );
        state.video_format = Some(adopted);
        if let Some(recorder) = &state.recorder {
            recorder.set_video_format(adopted);
        }
        adopted
    }

    fn route_video(&self, frame: VideoFrame, connection: &Connection) {
        let (filter, renderer, recorder, format) = {
            let mut state = self.state();
            if !state.is_current(connection) {
                log::trace!("dropping video frame from stale connection {}", connection.id);
                return;
            }
            let (current, raw) = (state.video_format, state.raw_video_format);
            let format = match current {
                Some(format) if raw == Some(frame.format) => format,
                _ => self.adopt_video_format(&mut state, frame.format),
            };
            (
                state.filter.clone(),
                state.renderer.clone(),
                state.recorder.clone(),
                format,
            )
        };

        let processed = filter
            .and_then(|filter| {
                let mut filter = filter.lock().expect("lock poisoned");
                filter.process(&frame.pixels)
            })
            .map(|pixels| VideoFrame::new(pixels, frame.timestamp, format))
            .unwrap_or(frame);

        if let Some(renderer) = renderer {
            renderer.render(&processed);
        }
        if let Some(recorder) = recorder {
            if recorder.status().is_recording_or_prepared() {
                recorder.append_video(processed);
            }
        }
    }

    fn route_audio(&self, buffer: AudioBuffer, connection: &Connection) {
        let recorder = {
            let mut state = self.state();
            if !state.is_current(connection) {
                log::trace!("dropping audio buffer from stale connection {}", connection.id);
                return;
            }
            if state.audio_format != Some(buffer.format) {
                log::debug!(
                    "audio format changed: {} Hz, {} channels",
                    buffer.format.sample_rate,
                    buffer.format.channels
                );
                state.audio_format = Some(buffer.format);
                if let Some(recorder) = &state.recorder {
                    recorder.set_audio_format(buffer.format);
                }
            }
            state.recorder.clone()
        };

        if let Some(recorder) = recorder {
            if recorder.status().is_recording_or_prepared() {
                recorder.append_audio(buffer);
            }
        }
    }
}

impl RecorderDelegate for Inner {
    fn recorder_started(&self, _recorder: Uuid) {
        if let Some(delegate) = self.delegate() {
            delegate.recording_started();
        }
    }

    fn recorder_finished(&self, recorder: Uuid, video: RecordedVideo) {
        self.release_recorder(recorder);
        if let Some(delegate) = self.delegate() {
            delegate.recording_finished(video);
        }
    }

    fn recorder_failed(&self, recorder: Uuid, error: CaptureError) {
        self.release_recorder(recorder);
        if let Some(delegate) = self.delegate() {
            delegate.recording_failed(error);
        }
    }
}

/// Routes session samples to the filter, renderer and recorder
///
/// Clones share the same router.
#[derive(Clone)]
pub struct VideoDataOutput {
    inner: Arc<Inner>,
}

/// Builder for [`VideoDataOutput`]
pub struct VideoDataOutputBuilder {
    factory: Arc<dyn WriterFactory>,
    callbacks: CallbackQueue,
    clock: Arc<dyn MediaClock>,
    config: RecordingConfig,
    retained_buffer_hint: usize,
    filter: Option<SharedFilter>,
    renderer: Option<Arc<dyn Renderer>>,
    delegate: Option<Weak<dyn VideoOutputDelegate>>,
}

impl VideoDataOutputBuilder {
    /// Clock used to time pauses
    pub fn clock(mut self, clock: Arc<dyn MediaClock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn recording_config(mut self, config: RecordingConfig) -> Self {
        self.config = config;
        self
    }

    /// Output buffers the filter keeps after each format change
    pub fn retained_buffer_hint(mut self, hint: usize) -> Self {
        self.retained_buffer_hint = hint.max(1);
        self
    }

    pub fn filter(mut self, filter: SharedFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn renderer(mut self, renderer: Arc<dyn Renderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    pub fn delegate(mut self, delegate: Weak<dyn VideoOutputDelegate>) -> Self {
        self.delegate = Some(delegate);
        self
    }

    pub fn build(self) -> VideoDataOutput {
        VideoDataOutput {
            inner: Arc::new(Inner {
                state: Mutex::new(RouterState {
                    filter: self.filter,
                    renderer: self.renderer,
                    delegate: self.delegate,
                    config: self.config,
                    ..RouterState::default()
                }),
                factory: self.factory,
                callbacks: self.callbacks,
                clock: self.clock,
                retained_buffer_hint: self.retained_buffer_hint,
            }),
        }
    }
}

impl VideoDataOutput {
    pub fn builder(factory: Arc<dyn WriterFactory>, callbacks: CallbackQueue) -> VideoDataOutputBuilder {
        VideoDataOutputBuilder {
            factory,
            callbacks,
            clock: Arc::new(PTSClock::new()),
            config: RecordingConfig::default(),
            retained_buffer_hint: 3,
            filter: None,
            renderer: None,
            delegate: None,
        }
    }

    pub fn set_delegate(&self, delegate: Weak<dyn VideoOutputDelegate>) {
        self.inner.state().delegate = Some(delegate);
    }

    /// Swap the filter; it is primed with the next frame.
    pub fn set_filter(&self, filter: Option<SharedFilter>) {
        let mut state = self.inner.state();
        if let Some(old) = state.filter.take() {
            old.lock().expect("lock poisoned").reset();
        }
        state.filter = filter;
        state.raw_video_format = None;
    }

    pub fn set_renderer(&self, renderer: Option<Arc<dyn Renderer>>) {
        self.inner.state().renderer = renderer;
    }

    pub fn renderer(&self) -> Option<Arc<dyn Renderer>> {
        self.inner.state().renderer.clone()
    }

    /// Applies to recordings started afterwards.
    pub fn set_recording_config(&self, config: RecordingConfig) {
        self.inner.state().config = config;
    }

    pub fn recording_config(&self) -> RecordingConfig {
        self.inner.state().config.clone()
    }

    /// Format currently handed to the renderer and recorder
    pub fn video_format(&self) -> Option<VideoFormat> {
        self.inner.state().video_format
    }

    pub fn audio_format(&self) -> Option<AudioFormat> {
        self.inner.state().audio_format
    }

    /// The recorder of the current recording, if any
    pub fn recorder(&self) -> Option<Arc<Recorder>> {
        self.inner.state().recorder.clone()
    }

    pub fn recording_status(&self) -> Option<RecordingStatus> {
        self.recorder().map(|r| r.status())
    }

    /// Attach as the session's video data output. Run inside a configuration bracket.
    pub fn setup_video_output(&self, backend: &dyn CaptureBackend) -> Result<(), CaptureError> {
        self.attach(backend, OutputKind::VideoData)
    }

    /// Attach as the session's audio data output. Run inside a configuration bracket.
    pub fn setup_audio_output(&self, backend: &dyn CaptureBackend) -> Result<(), CaptureError> {
        self.attach(backend, OutputKind::AudioData)
    }

    fn attach(&self, backend: &dyn CaptureBackend, kind: OutputKind) -> Result<(), CaptureError> {
        if !backend.can_add_output(kind) {
            return Err(CaptureError::Configuration(format!(
                "session cannot add {:?} output",
                kind
            )));
        }
        let sink: Arc<dyn SampleSink> = Arc::new(self.clone());
        let output = match kind {
            OutputKind::AudioData => SessionOutput::AudioData(sink),
            _ => SessionOutput::VideoData(sink),
        };
        backend.add_output(output)?;
        self.change_connection(backend);
        Ok(())
    }

    /// Track the backend's current connections; samples from any other are dropped.
    pub fn change_connection(&self, backend: &dyn CaptureBackend) {
        let mut state = self.inner.state();
        state.video_connection = backend.connection(MediaKind::Video);
        state.audio_connection = backend.connection(MediaKind::Audio);
        log::debug!(
            "router connections: video {:?}, audio {:?}",
            state.video_connection.as_ref().map(|c| c.id),
            state.audio_connection.as_ref().map(|c| c.id)
        );
    }

    pub fn is_recording(&self) -> bool {
        self.recorder().map(|r| r.is_recording()).unwrap_or(false)
    }

    /// Create a recorder for `destination` and prepare it.
    ///
    /// Ignored while a recording is running. A recorder that cannot be
    /// prepared (no video seen yet, unsupported format) reports through
    /// `recording_failed`.
    pub fn start_recording(&self, destination: OutputFile) -> Result<(), CaptureError> {
        if self.is_recording() {
            log::debug!("start_recording ignored, already recording");
            return Ok(());
        }

        let inner: Arc<dyn RecorderDelegate> = self.inner.clone();
        let as_delegate: Weak<dyn RecorderDelegate> = Arc::downgrade(&inner);
        let recorder = Recorder::new(
            destination,
            self.inner.factory.clone(),
            as_delegate,
            self.inner.callbacks.clone(),
            self.inner.clock.clone(),
        )?;

        let mut state = self.inner.state();
        if let Some(format) = state.video_format {
            let orientation = state
                .video_connection
                .as_ref()
                .map(|c| c.video_orientation)
                .unwrap_or_default();
            recorder.add_video_track(format, orientation, state.config.video_settings());
        }
        if let (Some(_), Some(format)) = (&state.audio_connection, state.audio_format) {
            recorder.add_audio_track(format, state.config.audio_settings());
        }
        recorder.prepare_to_record();

        log::info!(
            "recording requested: {}",
            recorder.destination().path.display()
        );
        state.recorder = Some(Arc::new(recorder));
        Ok(())
    }

    /// Finish the current recording; the result arrives through the delegate.
    pub fn stop_recording(&self) {
        if let Some(recorder) = self.recorder() {
            recorder.finish_recording();
        }
    }

    /// The recorder applies pause and resume in call order.
    pub fn pause_recording(&self) {
        if let Some(recorder) = self.recorder() {
            recorder.pause();
        }
    }

    pub fn resume_recording(&self) {
        if let Some(recorder) = self.recorder() {
            recorder.resume();
        }
    }

    /// Block until the current recorder and the callback queue have drained.
    pub fn flush(&self) {
        if let Some(recorder) = self.recorder() {
            recorder.flush();
        }
        self.inner.callbacks.flush();
    }
}

impl SampleSink for VideoDataOutput {
    fn deliver(&self, sample: Sample, connection: &Connection) {
        match sample {
            Sample::Video(frame) => self.inner.route_video(frame, connection),
            Sample::Audio(buffer) => self.inner.route_audio(buffer, connection),
        }
    }
}

impl std::fmt::Debug for VideoDataOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state();
        f.debug_struct("VideoDataOutput")
            .field("video_format", &state.video_format)
            .field("audio_format", &state.audio_format)
            .field("recorder", &state.recorder)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{self, Filter, SepiaFilter};
    use crate::render::PreviewRenderer;
    use crate::session::StreamingBackend;
    use crate::testing::{
        synthetic_audio_buffer, synthetic_video_frame, CollectingOutputDelegate, ManualClock,
        MemoryWriterFactory, OutputEvent, SyntheticCamera, SyntheticMicrophone, WriterCall,
    };
    use crate::device::DeviceInput;
    use crate::timing::MediaTime;
    use crate::types::{FourCharCode, PixelBuffer};

    /// Filter that never prepares
    struct RejectingFilter;

    impl Filter for RejectingFilter {
        fn prepare(&mut self, _format: &VideoFormat, _hint: usize) -> Option<VideoFormat> {
            None
        }
        fn process(&mut self, _pixels: &PixelBuffer) -> Option<PixelBuffer> {
            None
        }
        fn is_prepared(&self) -> bool {
            false
        }
        fn output_format(&self) -> Option<VideoFormat> {
            None
        }
        fn reset(&mut self) {}
    }

    struct Harness {
        router: VideoDataOutput,
        backend: StreamingBackend,
        factory: MemoryWriterFactory,
        renderer: Arc<PreviewRenderer>,
        delegate: Arc<CollectingOutputDelegate>,
        clock: Arc<ManualClock>,
        callbacks: CallbackQueue,
    }

    impl Harness {
        fn new(filter: Option<SharedFilter>) -> Self {
            Self::with_factory(filter, MemoryWriterFactory::new())
        }

        fn with_factory(filter: Option<SharedFilter>, factory: MemoryWriterFactory) -> Self {
            let callbacks = CallbackQueue::new("test.router.callbacks").unwrap();
            let renderer = Arc::new(PreviewRenderer::new());
            let delegate = Arc::new(CollectingOutputDelegate::default());
            let as_delegate: Arc<dyn VideoOutputDelegate> = delegate.clone();
            let clock = Arc::new(ManualClock::new());

            let mut builder = VideoDataOutput::builder(Arc::new(factory.clone()), callbacks.clone())
                .clock(clock.clone())
                .renderer(renderer.clone())
                .delegate(Arc::downgrade(&as_delegate));
            if let Some(filter) = filter {
                builder = builder.filter(filter);
            }
            let router = builder.build();

            let backend = StreamingBackend::new();
            backend
                .add_input(DeviceInput::new(Arc::new(SyntheticCamera::builder("cam").build())).unwrap())
                .unwrap();
            backend
                .add_input(DeviceInput::new(Arc::new(SyntheticMicrophone::builder("mic").build())).unwrap())
                .unwrap();
            router.setup_video_output(&backend).unwrap();
            router.setup_audio_output(&backend).unwrap();

            Self {
                router,
                backend,
                factory,
                renderer,
                delegate,
                clock,
                callbacks,
            }
        }

        fn video(&self, frame: VideoFrame) {
            let connection = self.backend.connection(MediaKind::Video).unwrap();
            self.router.deliver(Sample::Video(frame), &connection);
        }

        fn audio(&self, buffer: AudioBuffer) {
            let connection = self.backend.connection(MediaKind::Audio).unwrap();
            self.router.deliver(Sample::Audio(buffer), &connection);
        }

        fn settle(&self, recorder: &Recorder) {
            recorder.flush();
            self.callbacks.flush();
        }
    }

    fn hd() -> VideoFormat {
        VideoFormat::bgra(64, 36, 30.0)
    }

    #[test]
    fn test_unprepared_filter_renders_original_frame() {
        let h = Harness::new(Some(filter::shared(RejectingFilter)));
        let frame = synthetic_video_frame(0, hd());
        h.video(frame.clone());

        let rendered = h.renderer.latest_frame().unwrap();
        assert_eq!(rendered.pixels.data, frame.pixels.data);
        assert_eq!(h.router.video_format(), Some(hd()));
    }

    #[test]
    fn test_filter_output_is_rendered_including_first_frame() {
        let h = Harness::new(Some(filter::shared(SepiaFilter::default())));
        let frame = synthetic_video_frame(0, hd());
        h.video(frame.clone());

        let rendered = h.renderer.latest_frame().unwrap();
        assert_eq!(h.renderer.rendered_frames(), 1);
        assert_ne!(rendered.pixels.data, frame.pixels.data);
        assert_eq!(rendered.format, h.router.video_format().unwrap());
    }

    #[test]
    fn test_stale_connection_is_ignored() {
        let h = Harness::new(None);
        let mut stale = h.backend.connection(MediaKind::Video).unwrap();
        stale.id = Uuid::new_v4();
        h.router
            .deliver(Sample::Video(synthetic_video_frame(0, hd())), &stale);
        assert_eq!(h.renderer.rendered_frames(), 0);
        assert!(h.router.video_format().is_none());
    }

    #[test]
    fn test_format_change_reprimes_filter() {
        let h = Harness::new(Some(filter::shared(SepiaFilter::default())));
        h.video(synthetic_video_frame(0, hd()));
        let wide = VideoFormat::bgra(32, 16, 30.0);
        h.video(synthetic_video_frame(1, wide));

        assert_eq!(h.router.video_format().unwrap().width, 32);
        assert_eq!(h.renderer.latest_frame().unwrap().pixels.width, 32);
    }

    #[test]
    fn test_record_finish_cycle() {
        let h = Harness::new(None);
        h.video(synthetic_video_frame(0, hd()));
        h.audio(synthetic_audio_buffer(
            MediaTime::ZERO,
            AudioFormat::pcm_f32(48_000, 1),
            480,
        ));

        h.router.start_recording(OutputFile::mp4("/tmp/router-cycle.mp4")).unwrap();
        let recorder = h.router.recorder().unwrap();
        h.settle(&recorder);
        assert!(recorder.status().is_prepared());

        for n in 1..=3 {
            h.video(synthetic_video_frame(n, hd()));
        }
        h.settle(&recorder);
        assert!(h.router.is_recording());

        h.router.stop_recording();
        h.settle(&recorder);

        assert!(h.router.recorder().is_none());
        assert_eq!(h.factory.appended(MediaKind::Video).len(), 3);
        assert!(h.factory.calls().contains(&WriterCall::AddAudioTrack {
            format: AudioFormat::pcm_f32(48_000, 1)
        }));
        let events = h.delegate.events();
        assert_eq!(events[0], OutputEvent::Started);
        match &events[1] {
            OutputEvent::Finished(video) => {
                assert_eq!(video.width, 64);
                assert_eq!(video.codec.as_deref(), Some("avc1"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_start_without_video_fails_and_clears() {
        let h = Harness::new(None);
        h.router.start_recording(OutputFile::mp4("/tmp/router-nofmt.mp4")).unwrap();
        let recorder = h.router.recorder().unwrap();
        h.settle(&recorder);

        assert!(h.router.recorder().is_none());
        assert!(matches!(&h.delegate.events()[..], [OutputEvent::Failed(_)]));
    }

    #[test]
    fn test_pause_resume_through_router() {
        let h = Harness::new(None);
        h.video(synthetic_video_frame(0, hd()));
        h.router.start_recording(OutputFile::mp4("/tmp/router-pause.mp4")).unwrap();
        let recorder = h.router.recorder().unwrap();
        h.settle(&recorder);

        h.video(synthetic_video_frame(1, hd()));
        h.router.pause_recording();
        h.settle(&recorder);
        assert!(recorder.status().is_paused());

        // paused frames reach the renderer, not the writer
        h.video(synthetic_video_frame(2, hd()));
        h.clock.advance(MediaTime::from_secs_f64(1.0));
        h.router.resume_recording();
        h.settle(&recorder);
        assert!(h.router.is_recording());

        assert_eq!(h.factory.appended(MediaKind::Video).len(), 1);
        assert_eq!(h.renderer.rendered_frames(), 3);
    }

    #[test]
    fn test_rgb_frames_use_filter_output_format() {
        let h = Harness::new(Some(filter::shared(SepiaFilter::default())));
        let format = VideoFormat::new(FourCharCode::RGB24, 8, 8, 30.0);
        h.video(synthetic_video_frame(0, format));
        let rendered = h.renderer.latest_frame().unwrap();
        assert_eq!(rendered.format, h.router.video_format().unwrap());
    }
}
