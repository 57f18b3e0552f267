//! Queue contracts at the boundary between the pipeline and its host
//! application, plus a ready-made implementation.
//!
//! The manager never assumes anything about the collaborating queues
//! beyond these two traits: the consumer side must accept frames without
//! blocking, and the producer side must hand out messages with at most a
//! short bounded wait. Both are bound once at construction and called
//! from the worker threads.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use bytes::Bytes;

/// Downstream sink for decoded inbound frames.
pub trait ConsumerQueue: Send + Sync {
    /// Offers one frame without blocking. Returns false when the queue
    /// rejects it (e.g. it is full); the frame is then lost at this
    /// boundary.
    fn offer_nowait(&self, frame: &[u8]) -> bool;
}

/// Upstream source of outbound messages.
pub trait ProducerQueue: Send + Sync {
    /// Waits up to `timeout` for a message.
    fn pop_timeout(&self, timeout: Duration) -> Option<Bytes>;

    /// Takes a message only if one is immediately available.
    fn pop_nowait(&self) -> Option<Bytes>;
}

/// A bounded (or unbounded) FIFO of byte messages implementing both queue
/// contracts. The in-process analog of the queue objects the manager is
/// normally wired to.
pub struct ByteQueue {
    inner: Mutex<VecDeque<Bytes>>,
    cond: Condvar,
    capacity: Option<usize>,
}

impl ByteQueue {
    /// An unbounded queue.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
            cond: Condvar::new(),
            capacity: None,
        }
    }

    /// A queue that rejects pushes beyond `capacity` messages.
    pub fn bounded(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            cond: Condvar::new(),
            capacity: Some(capacity),
        }
    }

    /// Appends a message; false if the queue is at capacity.
    pub fn push(&self, msg: Bytes) -> bool {
        let mut q = self.inner.lock().unwrap();
        if self.capacity.is_some_and(|cap| q.len() >= cap) {
            return false;
        }
        q.push_back(msg);
        drop(q);
        self.cond.notify_one();
        true
    }

    pub fn pop_timeout(&self, timeout: Duration) -> Option<Bytes> {
        let q = self.inner.lock().unwrap();
        let (mut q, _) = self
            .cond
            .wait_timeout_while(q, timeout, |q| q.is_empty())
            .unwrap();
        q.pop_front()
    }

    pub fn pop_nowait(&self) -> Option<Bytes> {
        self.inner.lock().unwrap().pop_front()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }
}

impl Default for ByteQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsumerQueue for ByteQueue {
    fn offer_nowait(&self, frame: &[u8]) -> bool {
        self.push(Bytes::copy_from_slice(frame))
    }
}

impl ProducerQueue for ByteQueue {
    fn pop_timeout(&self, timeout: Duration) -> Option<Bytes> {
        ByteQueue::pop_timeout(self, timeout)
    }

    fn pop_nowait(&self) -> Option<Bytes> {
        ByteQueue::pop_nowait(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn fifo_and_bounds() {
        let q = ByteQueue::bounded(2);
        assert!(q.push(Bytes::from_static(b"a")));
        assert!(q.push(Bytes::from_static(b"b")));
        assert!(!q.push(Bytes::from_static(b"c")));
        assert_eq!(q.pop_nowait().unwrap(), Bytes::from_static(b"a"));
        assert_eq!(q.pop_nowait().unwrap(), Bytes::from_static(b"b"));
        assert!(q.pop_nowait().is_none());
    }

    #[test]
    fn pop_timeout_expires_on_empty() {
        let q = ByteQueue::new();
        assert!(q.pop_timeout(Duration::from_millis(5)).is_none());
    }

    #[test]
    fn pop_timeout_wakes_on_push() {
        let q = Arc::new(ByteQueue::new());
        let pusher = {
            let q = q.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(10));
                q.push(Bytes::from_static(b"late"));
            })
        };
        let got = q.pop_timeout(Duration::from_secs(2));
        pusher.join().unwrap();
        assert_eq!(got.unwrap(), Bytes::from_static(b"late"));
    }

    #[test]
    fn offer_rejection_reports_false() {
        let q = ByteQueue::bounded(1);
        assert!(q.offer_nowait(&[1, 2]));
        assert!(!q.offer_nowait(&[3]));
    }
}
