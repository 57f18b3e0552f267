//! End-to-end pipeline tests over an in-memory serial link.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use framelink::{ByteQueue, LinkResult, SerialLink, SerialManager, SerialManagerBuilder, cobs};

#[test]
fn single_frame_reaches_consumer() {
    let (manager, link, _outbound, inbound) = pipeline(ByteQueue::new());

    link.feed(&[0x03, 0x11, 0x22, 0x02, 0x33, 0x00]);

    let frame = inbound.pop_timeout(Duration::from_secs(2)).expect("frame");
    assert_eq!(&frame[..], &[0x11, 0x22, 0x00, 0x33]);
    assert!(inbound.pop_timeout(Duration::from_millis(50)).is_none());

    manager.shutdown();
}

#[test]
fn empty_frames_arrive_in_order() {
    let (manager, link, _outbound, inbound) = pipeline(ByteQueue::new());

    link.feed(&[0x01, 0x00, 0x01, 0x00, 0x01, 0x00]);

    for _ in 0..3 {
        let frame = inbound.pop_timeout(Duration::from_secs(2)).expect("frame");
        assert!(frame.is_empty());
    }
    assert!(inbound.pop_timeout(Duration::from_millis(50)).is_none());

    manager.shutdown();
}

#[test]
fn full_run_frame_survives() {
    let (manager, link, _outbound, inbound) = pipeline(ByteQueue::new());

    let mut wire = vec![0xFF];
    wire.extend_from_slice(&[0xAA; 254]);
    wire.push(0x00);
    link.feed(&wire);

    let frame = inbound.pop_timeout(Duration::from_secs(2)).expect("frame");
    assert_eq!(&frame[..], &[0xAA; 254][..]);

    manager.shutdown();
}

#[test]
fn corrupt_segment_is_dropped_and_stream_resyncs() {
    let (manager, link, _outbound, inbound) = pipeline(ByteQueue::new());

    // First segment's code byte promises more data than the delimiter
    // leaves it; the decode fails and only the second frame comes out.
    link.feed(&[0x04, 0x11, 0x22, 0x00, 0x03, 0x11, 0x22, 0x02, 0x33, 0x00]);

    let frame = inbound.pop_timeout(Duration::from_secs(2)).expect("frame");
    assert_eq!(&frame[..], &[0x11, 0x22, 0x00, 0x33]);
    assert!(inbound.pop_timeout(Duration::from_millis(50)).is_none());
    assert_eq!(manager.stats().decode_failed, 1);

    manager.shutdown();
}

#[test]
fn split_feed_reassembles_across_reads() {
    let (manager, link, _outbound, inbound) = pipeline(ByteQueue::new());

    // Deliver the encoded frame one byte at a time.
    for &b in &[0x03, 0x11, 0x22, 0x02, 0x33, 0x00] {
        link.feed(&[b]);
        thread::sleep(Duration::from_millis(1));
    }

    let frame = inbound.pop_timeout(Duration::from_secs(2)).expect("frame");
    assert_eq!(&frame[..], &[0x11, 0x22, 0x00, 0x33]);

    manager.shutdown();
}

#[test]
fn stalled_writer_preserves_order_and_content() {
    let (manager, link, outbound, _inbound) = pipeline(ByteQueue::new());

    link.stall(true);

    let mut expected = Vec::with_capacity(2000 * 32);
    for i in 0..2000u32 {
        let mut msg = vec![0u8; 32];
        msg[..4].copy_from_slice(&i.to_le_bytes());
        for (j, b) in msg.iter_mut().enumerate().skip(4) {
            *b = (i as u8).wrapping_add(j as u8);
        }
        expected.extend_from_slice(&msg);
        assert!(outbound.push(Bytes::from(msg)));
    }

    // Let the writer bang its head against the stall for a while.
    thread::sleep(Duration::from_millis(50));
    assert!(manager.is_running());

    link.stall(false);
    wait_until(Duration::from_secs(5), || {
        link.written().len() == expected.len()
    });
    assert_eq!(link.written(), expected);

    manager.shutdown();
}

#[test]
fn coalesced_writes_keep_relative_order() {
    let (manager, link, outbound, _inbound) = pipeline(ByteQueue::new());

    let mut expected = Vec::new();
    for i in 0..64u8 {
        let msg = vec![i; 17];
        expected.extend_from_slice(&msg);
        outbound.push(Bytes::from(msg));
    }

    wait_until(Duration::from_secs(2), || {
        link.written().len() == expected.len()
    });
    assert_eq!(link.written(), expected);

    manager.shutdown();
}

#[test]
fn shutdown_under_sustained_traffic() {
    let (manager, link, _outbound, inbound) = pipeline(ByteQueue::new());

    let stop_feeding = Arc::new(AtomicBool::new(false));
    let feeder = {
        let link = link.clone();
        let stop = stop_feeding.clone();
        thread::spawn(move || {
            let mut wire = cobs::encode(&[0xDE, 0xAD, 0x00, 0xBE, 0xEF]);
            wire.push(0x00);
            while !stop.load(Ordering::Relaxed) {
                link.feed(&wire);
                thread::sleep(Duration::from_micros(200));
            }
        })
    };

    // Make sure traffic is flowing before pulling the plug.
    assert!(inbound.pop_timeout(Duration::from_secs(2)).is_some());

    let begin = Instant::now();
    manager.shutdown();
    let join_time = begin.elapsed();

    assert!(!manager.is_running());
    assert!(join_time < Duration::from_secs(1), "joined in {join_time:?}");

    // No further deliveries once shutdown has returned.
    let settled = inbound.len();
    thread::sleep(Duration::from_millis(50));
    assert_eq!(inbound.len(), settled);

    stop_feeding.store(true, Ordering::Relaxed);
    feeder.join().unwrap();
}

#[test]
fn consumer_rejections_are_counted() {
    let (manager, link, _outbound, inbound) = pipeline(ByteQueue::bounded(1));

    for _ in 0..5 {
        link.feed(&[0x02, 0x42, 0x00]);
    }

    // One frame fits the bounded queue; the rest are rejected at the
    // delivery boundary.
    wait_until(Duration::from_secs(2), || {
        manager.stats().consumer_rejected == 4
    });
    assert_eq!(manager.stats().consumer_rejected, 4);
    assert_eq!(inbound.len(), 1);

    manager.shutdown();
}

#[test]
fn start_is_idempotent_and_restart_is_refused() {
    let outbound = Arc::new(ByteQueue::new());
    let inbound = Arc::new(ByteQueue::new());
    let link = MemoryLink::new();
    let manager =
        SerialManagerBuilder::new("mem0").build(outbound.clone(), inbound.clone());

    assert!(!manager.is_running());
    manager.start_with(link.clone()).unwrap();
    assert!(manager.is_running());
    manager.start_with(link.clone()).unwrap();
    assert!(manager.is_running());

    manager.shutdown();
    assert!(!manager.is_running());
    manager.shutdown(); // idempotent

    assert!(matches!(
        manager.start_with(link),
        Err(framelink::Error::Stopped)
    ));
}

#[test]
fn open_failure_surfaces_port_open_error() {
    let outbound = Arc::new(ByteQueue::new());
    let inbound = Arc::new(ByteQueue::new());
    let manager = SerialManager::new(
        "/dev/this-port-does-not-exist",
        outbound,
        inbound,
        115_200,
    );
    assert!(matches!(
        manager.start(),
        Err(framelink::Error::PortOpen { .. })
    ));
    assert!(!manager.is_running());
}

// Spins up a full pipeline over a fresh in-memory link.
fn pipeline(
    consumer: ByteQueue,
) -> (SerialManager, Arc<MemoryLink>, Arc<ByteQueue>, Arc<ByteQueue>) {
    // Several tests share the process; only the first init sticks.
    let _ = simple_logger::SimpleLogger::new()
        .with_level(log::LevelFilter::Debug)
        .init();

    let outbound = Arc::new(ByteQueue::new());
    let inbound = Arc::new(consumer);
    let link = MemoryLink::new();
    let manager = SerialManagerBuilder::new("mem0").build(outbound.clone(), inbound.clone());
    manager.start_with(link.clone()).unwrap();
    (manager, link, outbound, inbound)
}

fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) {
    let begin = Instant::now();
    while !cond() {
        assert!(begin.elapsed() < timeout, "condition not met in {timeout:?}");
        thread::sleep(Duration::from_millis(2));
    }
}

///////////////////////////////////////////////////////////////////////////
// In-memory serial link double
///////////////////////////////////////////////////////////////////////////

#[derive(Debug)]
struct MemoryLink {
    rx: Mutex<VecDeque<u8>>,
    rx_cond: Condvar,
    tx: Mutex<Vec<u8>>,
    stalled: AtomicBool,
    poll: Duration,
}

impl MemoryLink {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            rx: Mutex::new(VecDeque::new()),
            rx_cond: Condvar::new(),
            tx: Mutex::new(Vec::new()),
            stalled: AtomicBool::new(false),
            poll: Duration::from_millis(2),
        })
    }

    /// Makes `bytes` appear on the inbound side of the link.
    fn feed(&self, bytes: &[u8]) {
        self.rx.lock().unwrap().extend(bytes);
        self.rx_cond.notify_all();
    }

    /// Everything the pipeline has written so far.
    fn written(&self) -> Vec<u8> {
        self.tx.lock().unwrap().clone()
    }

    /// While stalled, writes accept nothing (the device is exerting
    /// backpressure).
    fn stall(&self, on: bool) {
        self.stalled.store(on, Ordering::SeqCst);
    }
}

impl SerialLink for MemoryLink {
    fn read(&self, buf: &mut [u8]) -> LinkResult<usize> {
        let rx = self.rx.lock().unwrap();
        let (mut rx, _) = self
            .rx_cond
            .wait_timeout_while(rx, self.poll, |rx| rx.is_empty())
            .unwrap();
        let n = buf.len().min(rx.len());
        for slot in buf[..n].iter_mut() {
            *slot = rx.pop_front().unwrap();
        }
        Ok(n)
    }

    fn write(&self, buf: &[u8]) -> LinkResult<usize> {
        if self.stalled.load(Ordering::SeqCst) {
            return Ok(0);
        }
        self.tx.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn cancel(&self) {
        self.rx_cond.notify_all();
    }
}
