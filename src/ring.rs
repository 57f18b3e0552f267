//! Bounded byte ring carrying length-prefixed frames from the reader to
//! the delivery worker.
//!
//! Each entry is a `u16` little-endian payload length followed by the
//! payload itself, laid out in a fixed byte buffer that wraps. Pushes
//! never block: when the free space cannot hold the entry the frame is
//! dropped and counted, so the oldest data always survives a stall on the
//! consumer side.

use std::sync::{Condvar, Mutex};
use std::time::Duration;

use crate::config::DEFAULT_RING_CAPACITY;

const LEN_PREFIX: usize = size_of::<u16>();

/// Largest payload a single entry can carry.
pub const MAX_FRAME_LEN: usize = u16::MAX as usize;

struct RingState {
    buf: Box<[u8]>,
    /// Monotonic write counter; physical offset is `head % capacity`.
    head: u64,
    /// Monotonic read counter; never exceeds `head`.
    tail: u64,
    dropped: u64,
}

impl RingState {
    fn used(&self) -> usize {
        (self.head - self.tail) as usize
    }

    fn copy_in(&mut self, at: u64, src: &[u8]) {
        let cap = self.buf.len();
        let start = (at % cap as u64) as usize;
        let until_end = cap - start;
        if src.len() <= until_end {
            self.buf[start..start + src.len()].copy_from_slice(src);
        } else {
            self.buf[start..].copy_from_slice(&src[..until_end]);
            self.buf[..src.len() - until_end].copy_from_slice(&src[until_end..]);
        }
    }

    fn copy_out(&self, at: u64, dst: &mut [u8]) {
        let cap = self.buf.len();
        let start = (at % cap as u64) as usize;
        let until_end = cap - start;
        let dst_len = dst.len();
        if dst_len <= until_end {
            dst.copy_from_slice(&self.buf[start..start + dst_len]);
        } else {
            dst[..until_end].copy_from_slice(&self.buf[start..]);
            dst[until_end..].copy_from_slice(&self.buf[..dst_len - until_end]);
        }
    }
}

/// Single-producer/single-consumer frame ring with a condition variable
/// for the consumer to park on.
pub struct FrameRing {
    state: Mutex<RingState>,
    cond: Condvar,
}

impl FrameRing {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_RING_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            state: Mutex::new(RingState {
                buf: vec![0u8; capacity].into_boxed_slice(),
                head: 0,
                tail: 0,
                dropped: 0,
            }),
            cond: Condvar::new(),
        }
    }

    /// Appends a length-prefixed entry. Returns false, incrementing the
    /// drop counter, when the entry does not fit; a frame longer than
    /// `capacity - 2` (or than [`MAX_FRAME_LEN`]) can never fit. Never
    /// blocks beyond the internal lock.
    pub fn push(&self, frame: &[u8]) -> bool {
        let mut st = self.state.lock().unwrap();

        let needed = LEN_PREFIX + frame.len();
        if frame.len() > MAX_FRAME_LEN || needed > st.buf.len() - st.used() {
            st.dropped += 1;
            return false;
        }

        let len = (frame.len() as u16).to_le_bytes();
        let head = st.head;
        st.copy_in(head, &len);
        st.copy_in(head + LEN_PREFIX as u64, frame);
        st.head += needed as u64;
        drop(st);

        self.cond.notify_one();
        true
    }

    /// Removes the oldest entry, copying its payload into `out`. Returns
    /// the payload length, or `None` when the ring is empty.
    ///
    /// # Panics
    ///
    /// If `out` is shorter than the stored payload; callers size it at
    /// [`MAX_FRAME_LEN`].
    pub fn pop_into(&self, out: &mut [u8]) -> Option<usize> {
        let mut st = self.state.lock().unwrap();
        if st.head == st.tail {
            return None;
        }

        let mut len = [0u8; LEN_PREFIX];
        st.copy_out(st.tail, &mut len);
        let len = u16::from_le_bytes(len) as usize;

        st.copy_out(st.tail + LEN_PREFIX as u64, &mut out[..len]);
        st.tail += (LEN_PREFIX + len) as u64;
        Some(len)
    }

    /// Parks the caller until a push occurs or `timeout` elapses. Returns
    /// whether the ring holds data on wakeup.
    pub fn wait_data(&self, timeout: Duration) -> bool {
        let st = self.state.lock().unwrap();
        if st.head != st.tail {
            return true;
        }
        let (st, _) = self
            .cond
            .wait_timeout_while(st, timeout, |st| st.head == st.tail)
            .unwrap();
        st.head != st.tail
    }

    /// Wakes any parked consumer regardless of ring contents. Used at
    /// shutdown.
    pub fn signal(&self) {
        self.cond.notify_all();
    }

    pub fn is_empty(&self) -> bool {
        let st = self.state.lock().unwrap();
        st.head == st.tail
    }

    /// Bytes currently occupied by entries, length prefixes included.
    pub fn used_bytes(&self) -> usize {
        self.state.lock().unwrap().used()
    }

    /// Number of frames rejected by `push` so far.
    pub fn dropped(&self) -> u64 {
        self.state.lock().unwrap().dropped
    }

    /// Discards all stored entries.
    pub fn clear(&self) {
        let mut st = self.state.lock().unwrap();
        let head = st.head;
        st.tail = head;
    }
}

impl Default for FrameRing {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order() {
        let ring = FrameRing::with_capacity(256);
        let frames: Vec<Vec<u8>> = (0..10u8).map(|i| vec![i; i as usize + 1]).collect();
        for f in &frames {
            assert!(ring.push(f));
        }
        let mut out = [0u8; MAX_FRAME_LEN];
        for f in &frames {
            let n = ring.pop_into(&mut out).unwrap();
            assert_eq!(&out[..n], &f[..]);
        }
        assert!(ring.pop_into(&mut out).is_none());
    }

    #[test]
    fn empty_frames_round_trip() {
        let ring = FrameRing::with_capacity(64);
        assert!(ring.push(&[]));
        assert!(ring.push(&[]));
        let mut out = [0u8; 8];
        assert_eq!(ring.pop_into(&mut out), Some(0));
        assert_eq!(ring.pop_into(&mut out), Some(0));
        assert_eq!(ring.pop_into(&mut out), None);
    }

    #[test]
    fn drops_when_full() {
        let ring = FrameRing::with_capacity(32);
        assert!(ring.push(&[0xAB; 30])); // 2 + 30 fills it exactly
        assert!(!ring.push(&[0x01]));
        assert_eq!(ring.dropped(), 1);
        assert!(!ring.push(&[]));
        assert_eq!(ring.dropped(), 2);

        let mut out = [0u8; 30];
        assert_eq!(ring.pop_into(&mut out), Some(30));
        assert!(ring.push(&[0x01]));
    }

    #[test]
    fn oversize_frame_always_rejected() {
        let ring = FrameRing::with_capacity(64);
        assert!(!ring.push(&[0u8; 63])); // needs 65 > capacity
        assert_eq!(ring.dropped(), 1);
    }

    #[test]
    fn wraps_across_physical_end() {
        let ring = FrameRing::with_capacity(16);
        let mut out = [0u8; 16];
        // Walk the head around the buffer a few times so entries straddle
        // the physical end.
        for i in 0..64u8 {
            let frame = [i, i.wrapping_add(1), i.wrapping_add(2)];
            assert!(ring.push(&frame));
            let n = ring.pop_into(&mut out).unwrap();
            assert_eq!(&out[..n], &frame);
        }
    }

    #[test]
    fn dropped_counter_is_monotonic() {
        let ring = FrameRing::with_capacity(8);
        let mut last = 0;
        for _ in 0..5 {
            ring.push(&[0u8; 8]);
            let d = ring.dropped();
            assert!(d >= last);
            last = d;
        }
        assert_eq!(last, 5);
    }

    #[test]
    fn wait_data_times_out_when_empty() {
        let ring = FrameRing::with_capacity(16);
        assert!(!ring.wait_data(Duration::from_millis(5)));
        ring.push(&[1]);
        assert!(ring.wait_data(Duration::from_millis(5)));
    }

    #[test]
    fn clear_releases_everything() {
        let ring = FrameRing::with_capacity(64);
        ring.push(&[1, 2, 3]);
        ring.push(&[4, 5]);
        ring.clear();
        assert!(ring.is_empty());
        assert_eq!(ring.used_bytes(), 0);
    }
}
