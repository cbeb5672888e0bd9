//! Serial work lanes
//!
//! Every lane is one named OS thread draining an unbounded crossbeam channel
//! of boxed closures. Work submitted to a lane runs in submission order and
//! never concurrently with other work on the same lane.

use std::sync::Arc;
use std::thread::{self, ThreadId};

use crossbeam_channel::{unbounded, Sender};

use crate::errors::CaptureError;

type Job = Box<dyn FnOnce() + Send + 'static>;

struct Lane {
    label: String,
    sender: Sender<Job>,
    thread_id: ThreadId,
}

/// A FIFO lane backed by a dedicated worker thread
///
/// Clones share the same lane. The worker exits once every clone has been
/// dropped and the queued work has drained; it is never joined, so dropping
/// the last handle from inside the lane itself is fine.
#[derive(Clone)]
pub struct SerialQueue {
    lane: Arc<Lane>,
}

/// Queue on which delegate callbacks and configuration completions run
pub type CallbackQueue = SerialQueue;

impl SerialQueue {
    pub fn new(label: impl Into<String>) -> Result<Self, CaptureError> {
        let label = label.into();
        let (sender, receiver) = unbounded::<Job>();

        let handle = thread::Builder::new()
            .name(label.clone())
            .spawn(move || {
                for job in receiver.iter() {
                    job();
                }
            })
            .map_err(|e| CaptureError::Configuration(format!("spawn failed for lane {label}: {e}")))?;

        Ok(Self {
            lane: Arc::new(Lane {
                thread_id: handle.thread().id(),
                label,
                sender,
            }),
        })
    }

    pub fn label(&self) -> &str {
        &self.lane.label
    }

    /// Enqueue `job`. Returns false if the worker has gone away.
    pub fn dispatch<F>(&self, job: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        if self.lane.sender.send(Box::new(job)).is_err() {
            log::warn!("lane {} is closed, dropping work item", self.lane.label);
            return false;
        }
        true
    }

    /// Run `job` on the lane and wait for its result.
    ///
    /// Called from the lane itself, the job runs inline.
    pub fn dispatch_sync<F, R>(&self, job: F) -> Result<R, CaptureError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.is_current() {
            return Ok(job());
        }
        let (tx, rx) = crossbeam_channel::bounded(1);
        if !self.dispatch(move || {
            let _ = tx.send(job());
        }) {
            return Err(CaptureError::LaneClosed);
        }
        rx.recv().map_err(|_| CaptureError::LaneClosed)
    }

    /// Block until everything queued before this call has run.
    pub fn flush(&self) {
        if self.is_current() {
            return;
        }
        let _ = self.dispatch_sync(|| ());
    }

    /// Whether the calling thread is this lane's worker
    pub fn is_current(&self) -> bool {
        thread::current().id() == self.lane.thread_id
    }
}

impl std::fmt::Debug for SerialQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialQueue")
            .field("label", &self.lane.label)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_fifo_order() {
        let queue = SerialQueue::new("test.fifo").unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..100 {
            let seen = seen.clone();
            queue.dispatch(move || seen.lock().unwrap().push(i));
        }
        queue.flush();
        assert_eq!(*seen.lock().unwrap(), (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_runs_on_named_thread() {
        let queue = SerialQueue::new("test.named").unwrap();
        let name = queue
            .dispatch_sync(|| thread::current().name().map(str::to_string))
            .unwrap();
        assert_eq!(name.as_deref(), Some("test.named"));
    }

    #[test]
    fn test_sync_from_lane_runs_inline() {
        let queue = SerialQueue::new("test.inline").unwrap();
        let inner = queue.clone();
        let value = queue
            .dispatch_sync(move || {
                assert!(inner.is_current());
                inner.dispatch_sync(|| 7).unwrap()
            })
            .unwrap();
        assert_eq!(value, 7);
        assert!(!queue.is_current());
    }
}
