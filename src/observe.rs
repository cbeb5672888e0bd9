//! Explicit observation handles
//!
//! An [`Observers`] registry hands out a [`Subscription`] per callback.
//! Cancelling (or dropping) the subscription removes the callback and waits
//! for any delivery running on another thread, so once `cancel` returns the
//! callback will not run again. Cancelling from inside the callback itself
//! does not wait.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread::{self, ThreadId};

type Callback<T> = Box<dyn FnMut(&T) + Send + 'static>;

struct Slot<T> {
    id: u64,
    cancelled: AtomicBool,
    delivering_on: Mutex<Option<ThreadId>>,
    callback: Mutex<Callback<T>>,
}

struct Registry<T> {
    slots: Mutex<Vec<Arc<Slot<T>>>>,
    next_id: AtomicU64,
}

/// Registry of callbacks interested in values of type `T`
pub struct Observers<T> {
    registry: Arc<Registry<T>>,
}

impl<T> Clone for Observers<T> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
        }
    }
}

impl<T: 'static> Default for Observers<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> Observers<T> {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Registry {
                slots: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Register `callback`; it stays registered until the subscription is cancelled or dropped.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: FnMut(&T) + Send + 'static,
    {
        let slot = Arc::new(Slot {
            id: self.registry.next_id.fetch_add(1, Ordering::Relaxed),
            cancelled: AtomicBool::new(false),
            delivering_on: Mutex::new(None),
            callback: Mutex::new(Box::new(callback)),
        });
        self.registry
            .slots
            .lock()
            .expect("lock poisoned")
            .push(slot.clone());

        let registry: Weak<Registry<T>> = Arc::downgrade(&self.registry);
        Subscription {
            cancel: Some(Box::new(move || cancel_slot(&registry, &slot))),
        }
    }

    /// Deliver `value` to every live callback on the calling thread.
    pub fn notify(&self, value: &T) {
        let snapshot: Vec<Arc<Slot<T>>> = self
            .registry
            .slots
            .lock()
            .expect("lock poisoned")
            .clone();

        for slot in snapshot {
            if slot.cancelled.load(Ordering::SeqCst) {
                continue;
            }
            let mut callback = slot.callback.lock().expect("lock poisoned");
            *slot.delivering_on.lock().expect("lock poisoned") = Some(thread::current().id());
            if !slot.cancelled.load(Ordering::SeqCst) {
                (callback)(value);
            }
            *slot.delivering_on.lock().expect("lock poisoned") = None;
        }
    }

    pub fn len(&self) -> usize {
        self.registry.slots.lock().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn cancel_slot<T>(registry: &Weak<Registry<T>>, slot: &Arc<Slot<T>>) {
    slot.cancelled.store(true, Ordering::SeqCst);
    if let Some(registry) = registry.upgrade() {
        registry
            .slots
            .lock()
            .expect("lock poisoned")
            .retain(|s| s.id != slot.id);
    }

    let delivering_here =
        *slot.delivering_on.lock().expect("lock poisoned") == Some(thread::current().id());
    if !delivering_here {
        // Wait out an in-flight delivery on another thread.
        drop(slot.callback.lock().expect("lock poisoned"));
    }
}

/// Handle to one registered callback
///
/// Dropping the handle cancels the observation.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + 'static>>,
}

impl Subscription {
    pub fn cancel(mut self) {
        self.cancel_in_place();
    }

    fn cancel_in_place(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel_in_place();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn test_notify_reaches_subscribers() {
        let observers = Observers::<u32>::new();
        let total = Arc::new(AtomicUsize::new(0));
        let t = total.clone();
        let _sub = observers.subscribe(move |v| {
            t.fetch_add(*v as usize, Ordering::SeqCst);
        });
        observers.notify(&3);
        observers.notify(&4);
        assert_eq!(total.load(Ordering::SeqCst), 7);
    }

    #[test]
    fn test_drop_cancels() {
        let observers = Observers::<()>::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let sub = observers.subscribe(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        observers.notify(&());
        drop(sub);
        observers.notify(&());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(observers.is_empty());
    }

    #[test]
    fn test_cancel_waits_for_in_flight_delivery() {
        let observers = Observers::<()>::new();
        let finished = Arc::new(AtomicBool::new(false));
        let (entered_tx, entered_rx) = crossbeam_channel::bounded(1);
        let f = finished.clone();
        let sub = observers.subscribe(move |_| {
            let _ = entered_tx.send(());
            thread::sleep(Duration::from_millis(50));
            f.store(true, Ordering::SeqCst);
        });

        let deliverer = {
            let observers = observers.clone();
            thread::spawn(move || observers.notify(&()))
        };
        entered_rx.recv().unwrap();
        sub.cancel();
        assert!(finished.load(Ordering::SeqCst));
        deliverer.join().unwrap();
    }

    #[test]
    fn test_cancel_from_inside_callback() {
        let observers = Observers::<()>::new();
        let holder: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let hits = Arc::new(AtomicUsize::new(0));
        let (h, inner_holder) = (hits.clone(), holder.clone());
        let sub = observers.subscribe(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
            let taken = inner_holder.lock().unwrap().take();
            if let Some(sub) = taken {
                sub.cancel();
            }
        });
        *holder.lock().unwrap() = Some(sub);
        observers.notify(&());
        observers.notify(&());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
