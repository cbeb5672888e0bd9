//! Capture session: the input/output graph and its configuration lane
//!
//! All graph mutations, as well as starting and stopping the pipeline, run
//! in order on one serial lane. Configuration is bracketed by the backend's
//! begin/commit calls, and the completion is handed back on the caller's
//! callback queue only after the commit.

mod backend;
mod streaming;

pub use backend::{
    BackendEvent, CaptureBackend, Connection, OutputKind, SampleSink, SessionOutput,
};
pub use streaming::StreamingBackend;

use std::future::Future;
use std::sync::{Arc, Mutex, Weak};

use serde::{Deserialize, Serialize};

use crate::dispatch::{CallbackQueue, SerialQueue};
use crate::errors::CaptureError;
use crate::observe::Subscription;

/// Why the session stopped receiving media
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InterruptionReason {
    VideoDeviceInUseByAnotherClient,
    AudioDeviceInUseByAnotherClient,
    VideoDeviceNotAvailableInBackground,
    VideoDeviceNotAvailableWithMultipleForegroundApps,
    VideoDeviceNotAvailableDueToSystemPressure,
}

/// Lifecycle notifications, delivered on the session's callback queue
pub trait SessionDelegate: Send + Sync {
    fn session_running_changed(&self, _running: bool) {}
    /// A media-services reset is followed by an automatic resume.
    fn session_runtime_error(&self, _error: &CaptureError) {}
    fn session_interrupted(&self, _reason: InterruptionReason) {}
    fn session_interruption_ended(&self) {}
}

struct Inner {
    backend: Arc<dyn CaptureBackend>,
    queue: SerialQueue,
    callbacks: CallbackQueue,
    delegate: Mutex<Option<Weak<dyn SessionDelegate>>>,
    observers: Mutex<Vec<Subscription>>,
}

impl Inner {
    fn delegate(&self) -> Option<Arc<dyn SessionDelegate>> {
        self.delegate
            .lock()
            .expect("lock poisoned")
            .as_ref()
            .and_then(Weak::upgrade)
    }

    fn notify_delegate<F>(&self, call: F)
    where
        F: FnOnce(&dyn SessionDelegate) + Send + 'static,
    {
        let Some(delegate) = self.delegate() else {
            return;
        };
        self.callbacks.dispatch(move || call(delegate.as_ref()));
    }

    fn report_start_failure(&self, error: CaptureError) {
        log::error!("capture session failed to start: {}", error);
        let error = Arc::new(error);
        self.notify_delegate(move |d| d.session_runtime_error(&error));
    }
}

/// Serializes configuration of a [`CaptureBackend`] and relays its events
#[derive(Clone)]
pub struct CaptureSession {
    inner: Arc<Inner>,
}

impl CaptureSession {
    pub fn new(
        backend: Arc<dyn CaptureBackend>,
        callbacks: CallbackQueue,
    ) -> Result<Self, CaptureError> {
        Ok(Self {
            inner: Arc::new(Inner {
                backend,
                queue: SerialQueue::new("crabcapture.session")?,
                callbacks,
                delegate: Mutex::new(None),
                observers: Mutex::new(Vec::new()),
            }),
        })
    }

    pub fn with_delegate(self, delegate: Weak<dyn SessionDelegate>) -> Self {
        self.set_delegate(delegate);
        self
    }

    pub fn set_delegate(&self, delegate: Weak<dyn SessionDelegate>) {
        *self.inner.delegate.lock().expect("lock poisoned") = Some(delegate);
    }

    pub fn backend(&self) -> &Arc<dyn CaptureBackend> {
        &self.inner.backend
    }

    pub fn callbacks(&self) -> &CallbackQueue {
        &self.inner.callbacks
    }

    pub fn is_running(&self) -> bool {
        self.inner.backend.is_running()
    }

    /// Run `mutation` inside a begin/commit bracket on the session lane.
    ///
    /// The bracket is committed even when `mutation` fails; its result is
    /// passed to `completion` on the callback queue afterwards.
    pub fn configure<F, C>(&self, mutation: F, completion: C)
    where
        F: FnOnce(&dyn CaptureBackend) -> Result<(), CaptureError> + Send + 'static,
        C: FnOnce(Result<(), CaptureError>) + Send + 'static,
    {
        let inner = self.inner.clone();
        self.inner.queue.dispatch(move || {
            let backend = inner.backend.as_ref();
            backend.begin_configuration();
            let result = mutation(backend);
            backend.commit_configuration();
            if let Err(e) = &result {
                log::warn!("session configuration failed: {}", e);
            }
            inner.callbacks.dispatch(move || completion(result));
        });
    }

    /// [`configure`](Self::configure) as a future resolved after the commit.
    pub fn configure_async<F>(&self, mutation: F) -> impl Future<Output = Result<(), CaptureError>>
    where
        F: FnOnce(&dyn CaptureBackend) -> Result<(), CaptureError> + Send + 'static,
    {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.configure(mutation, move |result| {
            let _ = tx.send(result);
        });
        async move { rx.await.map_err(|_| CaptureError::LaneClosed)? }
    }

    /// Register event observers and start the pipeline.
    pub fn start(&self) {
        let inner = self.inner.clone();
        self.inner.queue.dispatch(move || {
            let subscription = subscribe_events(&inner);
            inner
                .observers
                .lock()
                .expect("lock poisoned")
                .push(subscription);
            if let Err(e) = inner.backend.start_running() {
                inner.report_start_failure(e);
            }
        });
    }

    /// Stop the pipeline, then cancel every observer.
    ///
    /// The backend's final `RunningChanged(false)` still reaches the
    /// delegate.
    pub fn stop(&self) {
        let inner = self.inner.clone();
        self.inner.queue.dispatch(move || {
            inner.backend.stop_running();
            let observers = std::mem::take(&mut *inner.observers.lock().expect("lock poisoned"));
            drop(observers);
        });
    }

    /// Restart the pipeline after an interruption or runtime error.
    pub fn resume(&self) {
        let inner = self.inner.clone();
        self.inner.queue.dispatch(move || resume_running(&inner));
    }

    /// Block until all work queued on the session lane so far has run.
    pub fn flush(&self) {
        self.inner.queue.flush();
    }
}

fn resume_running(inner: &Inner) {
    if let Err(e) = inner.backend.start_running() {
        inner.report_start_failure(e);
    }
}

fn subscribe_events(inner: &Arc<Inner>) -> Subscription {
    let weak = Arc::downgrade(inner);
    inner.backend.events().subscribe(move |event: &BackendEvent| {
        let Some(inner) = weak.upgrade() else {
            return;
        };
        match event.clone() {
            BackendEvent::RunningChanged(running) => {
                inner.notify_delegate(move |d| d.session_running_changed(running));
            }
            BackendEvent::RuntimeError(error) => {
                let reset = error.is_media_services_reset();
                inner.notify_delegate(move |d| d.session_runtime_error(&error));
                if reset {
                    log::info!("media services were reset, resuming session");
                    let resumed = inner.clone();
                    inner.queue.dispatch(move || resume_running(&resumed));
                }
            }
            BackendEvent::InterruptionBegan(reason) => {
                log::warn!("capture session interrupted: {:?}", reason);
                inner.notify_delegate(move |d| d.session_interrupted(reason));
            }
            BackendEvent::InterruptionEnded => {
                log::info!("capture session interruption ended");
                inner.notify_delegate(|d| d.session_interruption_ended());
            }
        }
    })
}
