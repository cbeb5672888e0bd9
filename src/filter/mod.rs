//! Per-frame image filters
//!
//! A filter is primed with the incoming video format and answers with the
//! format it produces. Output pixels come from the filter's own
//! [`BufferPool`], so a processed frame never aliases the input.

mod sepia;

pub use sepia::SepiaFilter;

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use bytes::{Bytes, BytesMut};

use crate::types::{PixelBuffer, VideoFormat};

/// A pluggable image transform
pub trait Filter: Send {
    /// Reset, then allocate for `format`. Returns the output format, or
    /// `None` when the format cannot be handled (the filter stays unprepared).
    fn prepare(&mut self, format: &VideoFormat, retained_buffer_hint: usize) -> Option<VideoFormat>;

    /// Filter one frame; `None` when unprepared or on failure.
    fn process(&mut self, pixels: &PixelBuffer) -> Option<PixelBuffer>;

    fn is_prepared(&self) -> bool;

    fn output_format(&self) -> Option<VideoFormat>;

    fn reset(&mut self);
}

/// A filter shared between the frame router and other consumers
pub type SharedFilter = Arc<Mutex<dyn Filter>>;

pub fn shared<F: Filter + 'static>(filter: F) -> SharedFilter {
    Arc::new(Mutex::new(filter))
}

/// Recycles fixed-size output buffers
///
/// Up to `retained` frozen buffers are remembered after being handed out;
/// once every consumer has dropped its handle the storage is reused.
#[derive(Debug)]
pub struct BufferPool {
    buffer_len: usize,
    retained: usize,
    outstanding: VecDeque<Bytes>,
    free: Vec<BytesMut>,
    allocations: u64,
}

impl BufferPool {
    pub fn new(buffer_len: usize, retained: usize) -> Self {
        Self {
            buffer_len,
            retained: retained.max(1),
            outstanding: VecDeque::new(),
            free: Vec::new(),
            allocations: 0,
        }
    }

    pub fn buffer_len(&self) -> usize {
        self.buffer_len
    }

    /// Total fresh allocations made over the pool's life
    pub fn allocations(&self) -> u64 {
        self.allocations
    }

    /// A writable buffer of exactly `buffer_len` bytes.
    pub fn acquire(&mut self) -> BytesMut {
        self.reclaim();
        if let Some(mut buffer) = self.free.pop() {
            buffer.resize(self.buffer_len, 0);
            return buffer;
        }
        self.allocations += 1;
        BytesMut::zeroed(self.buffer_len)
    }

    /// Freeze a filled buffer and keep a handle for later reuse.
    pub fn publish(&mut self, buffer: BytesMut) -> Bytes {
        let bytes = buffer.freeze();
        if self.outstanding.len() >= self.retained {
            self.outstanding.pop_front();
        }
        self.outstanding.push_back(bytes.clone());
        bytes
    }

    fn reclaim(&mut self) {
        let mut still_shared = VecDeque::with_capacity(self.outstanding.len());
        while let Some(bytes) = self.outstanding.pop_front() {
            match bytes.try_into_mut() {
                Ok(buffer) if buffer.capacity() >= self.buffer_len => self.free.push(buffer),
                Ok(_) => {}
                Err(bytes) => still_shared.push_back(bytes),
            }
        }
        self.outstanding = still_shared;
        self.free.truncate(self.retained);
    }

    /// Drop every retained buffer.
    pub fn flush(&mut self) {
        self.outstanding.clear();
        self.free.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_released_buffers_are_reused() {
        let mut pool = BufferPool::new(16, 3);
        let first = pool.acquire();
        let published = pool.publish(first);
        drop(published);

        let again = pool.acquire();
        assert_eq!(again.len(), 16);
        assert_eq!(pool.allocations(), 1);
    }

    #[test]
    fn test_held_buffers_are_not_reused() {
        let mut pool = BufferPool::new(8, 3);
        let a = pool.acquire();
        let held = pool.publish(a);
        let b = pool.acquire();
        assert_eq!(pool.allocations(), 2);
        assert_ne!(held.as_ptr(), b.as_ptr());
    }

    #[test]
    fn test_flush_forgets_buffers() {
        let mut pool = BufferPool::new(8, 2);
        let a = pool.acquire();
        drop(pool.publish(a));
        pool.flush();
        let _ = pool.acquire();
        assert_eq!(pool.allocations(), 2);
    }
}
