//! `BoundedEventQueue` — fixed-capacity MPSC job queue.
//!
//! Producers on any thread `emplace()`; the ring thread is the only
//! consumer. Backed by a lock-free crossbeam `ArrayQueue`.
//!
//! Queue occupancy and the semaphore count are updated by two separate
//! primitives, so the consumer must tolerate `pop()` returning `None`
//! even when the semaphore said a job was there.

use crossbeam_queue::ArrayQueue;

pub struct BoundedEventQueue<T> {
    inner: ArrayQueue<T>,
}

impl<T> BoundedEventQueue<T> {
    /// # Panics
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: ArrayQueue::new(capacity),
        }
    }

    /// Enqueue `job`. On overflow the job is handed back untouched.
    #[inline]
    pub fn emplace(&self, job: T) -> Result<(), T> {
        self.inner.push(job)
    }

    /// Dequeue one job. Single consumer.
    #[inline]
    pub fn pop(&self) -> Option<T> {
        self.inner.pop()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity()
    }
}

impl<T> std::fmt::Debug for BoundedEventQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedEventQueue")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_fifo_single_thread() {
        let q = BoundedEventQueue::new(4);
        for i in 0..3 {
            q.emplace(i).unwrap();
        }
        assert_eq!(q.len(), 3);
        assert_eq!(q.pop(), Some(0));
        assert_eq!(q.pop(), Some(1));
        assert_eq!(q.pop(), Some(2));
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn test_overflow_returns_job() {
        let q = BoundedEventQueue::new(2);
        q.emplace(String::from("a")).unwrap();
        q.emplace(String::from("b")).unwrap();
        let rejected = q.emplace(String::from("c")).unwrap_err();
        assert_eq!(rejected, "c");
        assert_eq!(q.len(), q.capacity());
        assert_eq!(q.pop().as_deref(), Some("a"));
        assert_eq!(q.pop().as_deref(), Some("b"));
        assert!(q.is_empty());
    }

    #[test]
    fn test_concurrent_producers() {
        let q = Arc::new(BoundedEventQueue::new(256));
        let n_threads = 4;
        let n_per_thread = 50;
        let handles: Vec<_> = (0..n_threads)
            .map(|t| {
                let q = Arc::clone(&q);
                std::thread::spawn(move || {
                    for i in 0..n_per_thread {
                        q.emplace(t * 1000 + i).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let mut seen = std::collections::HashSet::new();
        while let Some(v) = q.pop() {
            assert!(seen.insert(v), "duplicate job {}", v);
        }
        assert_eq!(seen.len(), n_threads * n_per_thread);
    }
}
