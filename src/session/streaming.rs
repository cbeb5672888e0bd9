use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::device::{CaptureDevice, DeviceEvent, DeviceInput, PressureLevel};
use crate::errors::CaptureError;
use crate::observe::Observers;
use crate::types::{MediaKind, VideoOrientation};

use super::backend::{
    BackendEvent, CaptureBackend, Connection, OutputKind, SampleSink, SessionOutput,
};
use super::InterruptionReason;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

struct DeliveryLane {
    connection_id: uuid::Uuid,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl DeliveryLane {
    fn join(mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                log::error!("delivery lane panicked");
            }
        }
    }
}

#[derive(Default)]
struct State {
    inputs: Vec<DeviceInput>,
    outputs: Vec<SessionOutput>,
    connections: Vec<Connection>,
    orientation: VideoOrientation,
    running: bool,
    configuration_depth: u32,
    lanes: Vec<DeliveryLane>,
}

impl State {
    fn refresh_connections(&mut self) {
        let mut next = Vec::new();
        for (kind, output_kind) in [
            (MediaKind::Video, OutputKind::VideoData),
            (MediaKind::Audio, OutputKind::AudioData),
        ] {
            let input = self.inputs.iter().find(|i| i.media_kind() == kind);
            let has_output = self.outputs.iter().any(|o| o.kind() == output_kind);
            let (Some(input), true) = (input, has_output) else {
                continue;
            };
            let existing = self
                .connections
                .iter()
                .find(|c| c.media_kind == kind && c.input_id == input.id());
            next.push(match existing {
                Some(c) => c.clone(),
                None => Connection {
                    id: uuid::Uuid::new_v4(),
                    media_kind: kind,
                    input_id: input.id(),
                    video_orientation: self.orientation,
                },
            });
        }
        self.connections = next;
    }

    fn sink_for(&self, kind: MediaKind) -> Option<Arc<dyn SampleSink>> {
        let wanted = match kind {
            MediaKind::Video => OutputKind::VideoData,
            MediaKind::Audio => OutputKind::AudioData,
        };
        self.outputs
            .iter()
            .find(|o| o.kind() == wanted)
            .and_then(|o| o.sink().cloned())
    }

    fn device_for(&self, connection: &Connection) -> Option<Arc<dyn CaptureDevice>> {
        self.inputs
            .iter()
            .find(|i| i.id() == connection.input_id)
            .map(|i| i.device().clone())
    }
}

/// Backend that pulls samples from each connected device on its own thread
///
/// One delivery lane per connection reads from the input device and hands
/// samples to the output's sink. Lanes for connections that disappear in a
/// configuration are stopped, and lanes for new connections are started,
/// when the configuration is committed.
pub struct StreamingBackend {
    state: Arc<Mutex<State>>,
    events: Observers<BackendEvent>,
    poll_interval: Duration,
}

impl Default for StreamingBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamingBackend {
    pub fn new() -> Self {
        Self::with_poll_interval(DEFAULT_POLL_INTERVAL)
    }

    /// How long a delivery lane waits on its device before checking for shutdown
    pub fn with_poll_interval(poll_interval: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            events: Observers::new(),
            poll_interval,
        }
    }

    /// Raise an event as if the hardware had reported it.
    pub fn post(&self, event: BackendEvent) {
        if let BackendEvent::RunningChanged(running) = event {
            self.state.lock().expect("lock poisoned").running = running;
        }
        self.events.notify(&event);
    }

    pub fn connections(&self) -> Vec<Connection> {
        self.state.lock().expect("lock poisoned").connections.clone()
    }

    fn take_lanes<F>(&self, mut stale: F) -> Vec<DeliveryLane>
    where
        F: FnMut(&DeliveryLane, &[Connection]) -> bool,
    {
        let mut state = self.state.lock().expect("lock poisoned");
        let connections = state.connections.clone();
        let (gone, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut state.lanes)
            .into_iter()
            .partition(|lane| stale(lane, &connections));
        state.lanes = kept;
        gone
    }

    /// Start lanes for connections that have none. Caller holds the state lock.
    fn spawn_missing_lanes(&self, state: &mut State) -> Result<(), CaptureError> {
        let pending: Vec<Connection> = state
            .connections
            .iter()
            .filter(|c| !state.lanes.iter().any(|l| l.connection_id == c.id))
            .cloned()
            .collect();

        for connection in pending {
            let (Some(device), Some(sink)) = (
                state.device_for(&connection),
                state.sink_for(connection.media_kind),
            ) else {
                continue;
            };
            let stop = Arc::new(AtomicBool::new(false));
            let lane = LaneContext {
                connection: connection.clone(),
                device,
                sink,
                stop: stop.clone(),
                state: Arc::downgrade(&self.state),
                events: self.events.clone(),
                poll_interval: self.poll_interval,
            };
            let handle = thread::Builder::new()
                .name(format!("crabcapture.delivery.{}", connection.media_kind.as_str()))
                .spawn(move || delivery_loop(lane))
                .map_err(|e| CaptureError::Stream(format!("spawn failed: {e}")))?;
            state.lanes.push(DeliveryLane {
                connection_id: connection.id,
                stop,
                handle: Some(handle),
            });
        }
        Ok(())
    }
}

impl CaptureBackend for StreamingBackend {
    fn begin_configuration(&self) {
        self.state.lock().expect("lock poisoned").configuration_depth += 1;
    }

    fn commit_configuration(&self) {
        {
            let mut state = self.state.lock().expect("lock poisoned");
            state.configuration_depth = state.configuration_depth.saturating_sub(1);
            if state.configuration_depth > 0 || !state.running {
                return;
            }
        }

        let stale = self.take_lanes(|lane, connections| {
            !connections.iter().any(|c| c.id == lane.connection_id)
        });
        for lane in stale {
            lane.join();
        }

        let result = {
            let mut state = self.state.lock().expect("lock poisoned");
            if state.running {
                self.spawn_missing_lanes(&mut state)
            } else {
                Ok(())
            }
        };
        if let Err(e) = result {
            log::error!("could not restart delivery after configuration: {}", e);
            self.events
                .notify(&BackendEvent::RuntimeError(Arc::new(e)));
        }
    }

    fn can_add_input(&self, input: &DeviceInput) -> bool {
        let state = self.state.lock().expect("lock poisoned");
        input.device().is_connected()
            && !state
                .inputs
                .iter()
                .any(|i| i.id() == input.id() || i.media_kind() == input.media_kind())
    }

    fn add_input(&self, input: DeviceInput) -> Result<(), CaptureError> {
        if !self.can_add_input(&input) {
            return Err(CaptureError::DeviceBind(format!(
                "cannot add {} input {}",
                input.media_kind().as_str(),
                input.device().unique_id()
            )));
        }
        let mut state = self.state.lock().expect("lock poisoned");
        state.inputs.push(input);
        state.refresh_connections();
        Ok(())
    }

    fn remove_input(&self, input: &DeviceInput) {
        let mut state = self.state.lock().expect("lock poisoned");
        state.inputs.retain(|i| i.id() != input.id());
        state.refresh_connections();
    }

    fn inputs(&self) -> Vec<DeviceInput> {
        self.state.lock().expect("lock poisoned").inputs.clone()
    }

    fn can_add_output(&self, kind: OutputKind) -> bool {
        !self
            .state
            .lock()
            .expect("lock poisoned")
            .outputs
            .iter()
            .any(|o| o.kind() == kind)
    }

    fn add_output(&self, output: SessionOutput) -> Result<(), CaptureError> {
        if !self.can_add_output(output.kind()) {
            return Err(CaptureError::Configuration(format!(
                "{:?} output already attached",
                output.kind()
            )));
        }
        let mut state = self.state.lock().expect("lock poisoned");
        state.outputs.push(output);
        state.refresh_connections();
        Ok(())
    }

    fn connection(&self, media_kind: MediaKind) -> Option<Connection> {
        self.state
            .lock()
            .expect("lock poisoned")
            .connections
            .iter()
            .find(|c| c.media_kind == media_kind)
            .cloned()
    }

    fn set_video_orientation(&self, orientation: VideoOrientation) {
        let mut state = self.state.lock().expect("lock poisoned");
        state.orientation = orientation;
        for connection in state.connections.iter_mut() {
            if connection.media_kind == MediaKind::Video {
                connection.video_orientation = orientation;
            }
        }
    }

    fn start_running(&self) -> Result<(), CaptureError> {
        if self.is_running() {
            return Ok(());
        }
        // Lanes left behind by a runtime failure are finished before restarting.
        for lane in self.take_lanes(|_, _| true) {
            lane.join();
        }

        {
            let mut state = self.state.lock().expect("lock poisoned");
            state.running = true;
            if let Err(e) = self.spawn_missing_lanes(&mut state) {
                state.running = false;
                let lanes = std::mem::take(&mut state.lanes);
                drop(state);
                for lane in lanes {
                    lane.join();
                }
                return Err(e);
            }
        }
        log::info!("capture backend running");
        self.events.notify(&BackendEvent::RunningChanged(true));
        Ok(())
    }

    fn stop_running(&self) {
        let was_running = {
            let mut state = self.state.lock().expect("lock poisoned");
            std::mem::replace(&mut state.running, false)
        };
        for lane in self.take_lanes(|_, _| true) {
            lane.join();
        }
        if was_running {
            log::info!("capture backend stopped");
            self.events.notify(&BackendEvent::RunningChanged(false));
        }
    }

    fn is_running(&self) -> bool {
        self.state.lock().expect("lock poisoned").running
    }

    fn events(&self) -> &Observers<BackendEvent> {
        &self.events
    }
}

impl Drop for StreamingBackend {
    fn drop(&mut self) {
        let lanes = std::mem::take(&mut self.state.lock().expect("lock poisoned").lanes);
        for lane in lanes {
            lane.join();
        }
    }
}

struct LaneContext {
    connection: Connection,
    device: Arc<dyn CaptureDevice>,
    sink: Arc<dyn SampleSink>,
    stop: Arc<AtomicBool>,
    state: Weak<Mutex<State>>,
    events: Observers<BackendEvent>,
    poll_interval: Duration,
}

impl LaneContext {
    fn in_use_reason(&self) -> InterruptionReason {
        match self.connection.media_kind {
            MediaKind::Video => InterruptionReason::VideoDeviceInUseByAnotherClient,
            MediaKind::Audio => InterruptionReason::AudioDeviceInUseByAnotherClient,
        }
    }

    /// Stop the whole pipeline after an unrecoverable stream error.
    fn fail(&self, error: CaptureError) {
        if self.stop.load(Ordering::SeqCst) {
            return;
        }
        let was_running = match self.state.upgrade() {
            Some(state) => {
                let mut state = state.lock().expect("lock poisoned");
                for lane in &state.lanes {
                    lane.stop.store(true, Ordering::SeqCst);
                }
                std::mem::replace(&mut state.running, false)
            }
            None => false,
        };
        log::error!(
            "{} delivery failed: {}",
            self.connection.media_kind.as_str(),
            error
        );
        self.events
            .notify(&BackendEvent::RuntimeError(Arc::new(error)));
        if was_running {
            self.events.notify(&BackendEvent::RunningChanged(false));
        }
    }
}

fn delivery_loop(lane: LaneContext) {
    if let Err(e) = lane.device.start_stream() {
        lane.fail(e);
        return;
    }

    let pressure_shutdown = Arc::new(AtomicBool::new(false));
    let _pressure = {
        let flag = pressure_shutdown.clone();
        let events = lane.events.clone();
        lane.device.events().subscribe(move |event| {
            let DeviceEvent::SystemPressureChanged(level) = *event else {
                return;
            };
            let shutdown = level == PressureLevel::Shutdown;
            if flag.swap(shutdown, Ordering::SeqCst) != shutdown {
                events.notify(&if shutdown {
                    BackendEvent::InterruptionBegan(
                        InterruptionReason::VideoDeviceNotAvailableDueToSystemPressure,
                    )
                } else {
                    BackendEvent::InterruptionEnded
                });
            }
        })
    };

    let mut interrupted = false;
    while !lane.stop.load(Ordering::SeqCst) {
        match lane.device.read_sample(lane.poll_interval) {
            Ok(Some(sample)) => {
                if interrupted {
                    interrupted = false;
                    lane.events.notify(&BackendEvent::InterruptionEnded);
                }
                if sample.media_kind() == lane.connection.media_kind {
                    lane.sink.deliver(sample, &lane.connection);
                }
            }
            Ok(None) => {}
            Err(CaptureError::DeviceInUse(client)) => {
                if !interrupted {
                    interrupted = true;
                    log::warn!("{} device in use by {}", lane.connection.media_kind.as_str(), client);
                    lane.events
                        .notify(&BackendEvent::InterruptionBegan(lane.in_use_reason()));
                }
                thread::sleep(lane.poll_interval);
            }
            Err(e) => {
                lane.fail(e);
                break;
            }
        }
    }

    lane.device.stop_stream();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{synthetic_video_frame, SyntheticCamera};
    use crate::types::{Sample, VideoFormat};
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct Collect(StdMutex<Vec<(uuid::Uuid, MediaKind)>>);

    impl SampleSink for Collect {
        fn deliver(&self, sample: Sample, connection: &Connection) {
            self.0
                .lock()
                .unwrap()
                .push((connection.id, sample.media_kind()));
        }
    }

    fn format() -> VideoFormat {
        VideoFormat::bgra(4, 4, 30.0)
    }

    #[test]
    fn test_connection_requires_input_and_output() {
        let backend = StreamingBackend::new();
        let camera = Arc::new(SyntheticCamera::builder("cam").build());
        backend.add_input(DeviceInput::new(camera).unwrap()).unwrap();
        assert!(backend.connection(MediaKind::Video).is_none());

        backend
            .add_output(SessionOutput::VideoData(Arc::new(Collect::default())))
            .unwrap();
        assert!(backend.connection(MediaKind::Video).is_some());
        assert!(!backend.can_add_output(OutputKind::VideoData));
    }

    #[test]
    fn test_replacing_input_forms_new_connection() {
        let backend = StreamingBackend::new();
        let first = DeviceInput::new(Arc::new(SyntheticCamera::builder("a").build())).unwrap();
        backend.add_input(first.clone()).unwrap();
        backend
            .add_output(SessionOutput::VideoData(Arc::new(Collect::default())))
            .unwrap();
        let before = backend.connection(MediaKind::Video).unwrap();

        backend.remove_input(&first);
        let second = DeviceInput::new(Arc::new(SyntheticCamera::builder("b").build())).unwrap();
        backend.add_input(second).unwrap();
        let after = backend.connection(MediaKind::Video).unwrap();
        assert_ne!(before.id, after.id);
    }

    #[test]
    fn test_running_delivers_samples() {
        let backend = StreamingBackend::with_poll_interval(Duration::from_millis(5));
        let camera = Arc::new(SyntheticCamera::builder("cam").build());
        let sink = Arc::new(Collect::default());
        backend.add_input(DeviceInput::new(camera.clone()).unwrap()).unwrap();
        backend.add_output(SessionOutput::VideoData(sink.clone())).unwrap();

        backend.start_running().unwrap();
        for i in 0..3 {
            camera.push_frame(synthetic_video_frame(i, format()));
        }
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while sink.0.lock().unwrap().len() < 3 && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        backend.stop_running();
        assert_eq!(sink.0.lock().unwrap().len(), 3);
        assert!(!backend.is_running());
        assert!(!camera.is_streaming());
    }

    #[test]
    fn test_stream_failure_stops_running() {
        let backend = StreamingBackend::with_poll_interval(Duration::from_millis(5));
        let camera = Arc::new(SyntheticCamera::builder("cam").build());
        backend.add_input(DeviceInput::new(camera.clone()).unwrap()).unwrap();
        backend
            .add_output(SessionOutput::VideoData(Arc::new(Collect::default())))
            .unwrap();

        let (tx, rx) = crossbeam_channel::unbounded();
        let _sub = backend.events().subscribe(move |event: &BackendEvent| {
            let _ = tx.send(format!("{:?}", event));
        });

        backend.start_running().unwrap();
        camera.push_error(CaptureError::MediaServicesReset);

        let mut seen = Vec::new();
        while let Ok(event) = rx.recv_timeout(Duration::from_secs(2)) {
            seen.push(event);
            if seen.len() == 3 {
                break;
            }
        }
        assert!(seen[0].starts_with("RunningChanged(true)"));
        assert!(seen[1].contains("MediaServicesReset"));
        assert!(seen[2].starts_with("RunningChanged(false)"));
        assert!(!backend.is_running());
    }
}
