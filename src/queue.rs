//! Bounded lock-free queue for inter-stage fan-out.
//!
//! Book update subscribers are invoked on the mutating thread, so anything
//! that is not trivially cheap must hand its work to another stage. This
//! queue is the sanctioned hand-off: pushes never block, and a full queue
//! rejects the element instead of stalling the matching path.

use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicU64, Ordering};

/// A bounded, lock-free, multi-producer multi-consumer queue.
///
/// Thin wrapper around [`ArrayQueue`] that keeps a count of rejected
/// elements so downstream consumers can detect that they fell behind.
#[derive(Debug)]
pub struct BoundedQueue<T> {
    inner: ArrayQueue<T>,
    dropped: AtomicU64,
}

impl<T> BoundedQueue<T> {
    /// Creates a queue with the given capacity.
    ///
    /// # Panics
    /// Panics if `capacity` is zero (an unusable queue is a programming
    /// error, not a runtime condition).
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: ArrayQueue::new(capacity),
            dropped: AtomicU64::new(0),
        }
    }

    /// Attempts to enqueue an element without blocking.
    ///
    /// Returns the element back to the caller when the queue is full.
    pub fn push(&self, value: T) -> Result<(), T> {
        self.inner.push(value)
    }

    /// Enqueues an element, dropping it when the queue is full.
    ///
    /// Returns `true` if the element was enqueued. Rejections increment the
    /// dropped counter.
    pub fn push_or_drop(&self, value: T) -> bool {
        match self.inner.push(value) {
            Ok(()) => true,
            Err(_) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Dequeues the oldest element, if any.
    pub fn pop(&self) -> Option<T> {
        self.inner.pop()
    }

    /// Number of elements currently queued.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns `true` when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// The fixed capacity of the queue.
    pub fn capacity(&self) -> usize {
        self.inner.capacity()
    }

    /// Total number of elements rejected by [`push_or_drop`](Self::push_or_drop).
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn push_pop_preserves_fifo_order() {
        let queue = BoundedQueue::new(8);
        for i in 0..5 {
            assert!(queue.push(i).is_ok());
        }
        for i in 0..5 {
            assert_eq!(queue.pop(), Some(i));
        }
        assert!(queue.pop().is_none());
    }

    #[test]
    fn full_queue_rejects_without_blocking() {
        let queue = BoundedQueue::new(2);
        assert!(queue.push(1).is_ok());
        assert!(queue.push(2).is_ok());
        assert_eq!(queue.push(3), Err(3));
        assert!(!queue.push_or_drop(4));
        assert_eq!(queue.dropped(), 1);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn concurrent_producers_and_consumer_drain_everything() {
        let queue = Arc::new(BoundedQueue::new(1024));
        let producers: Vec<_> = (0..4)
            .map(|p| {
                let q = Arc::clone(&queue);
                thread::spawn(move || {
                    for i in 0..256u32 {
                        // Spin until accepted; the consumer is draining.
                        let mut value = p * 1_000 + i;
                        loop {
                            match q.push(value) {
                                Ok(()) => break,
                                Err(v) => value = v,
                            }
                        }
                    }
                })
            })
            .collect();

        let consumer = {
            let q = Arc::clone(&queue);
            thread::spawn(move || {
                let mut seen = 0usize;
                while seen < 4 * 256 {
                    if q.pop().is_some() {
                        seen += 1;
                    }
                }
                seen
            })
        };

        for handle in producers {
            handle.join().expect("producer panicked");
        }
        assert_eq!(consumer.join().expect("consumer panicked"), 1024);
        assert!(queue.is_empty());
    }
}
