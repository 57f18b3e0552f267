//! Lifecycle owner for the serial pipeline: construct, start, check,
//! shut down.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::debug;

use crate::link::{SerialLink, SerialPortLink};
use crate::pipeline;
use crate::queue::{ConsumerQueue, ProducerQueue};
use crate::ring::FrameRing;
use crate::{Error, LinkResult, config};

/// State shared between the manager and its three worker threads.
pub(crate) struct Shared {
    pub(crate) ring: FrameRing,
    /// Workers keep looping while this is set.
    alive: AtomicBool,
    /// Workers may call out to the consumer/producer queues while this is
    /// set. Cleared before `alive` at shutdown so no call-out races the
    /// teardown.
    deliver_enabled: AtomicBool,
    pub(crate) decode_failed: AtomicU64,
    pub(crate) frame_overflow: AtomicU64,
    pub(crate) consumer_rejected: AtomicU64,
}

impl Shared {
    fn new(ring_capacity: usize) -> Self {
        Self {
            ring: FrameRing::with_capacity(ring_capacity),
            alive: AtomicBool::new(false),
            deliver_enabled: AtomicBool::new(false),
            decode_failed: AtomicU64::new(0),
            frame_overflow: AtomicU64::new(0),
            consumer_rejected: AtomicU64::new(0),
        }
    }

    pub(crate) fn alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    pub(crate) fn deliver_enabled(&self) -> bool {
        self.deliver_enabled.load(Ordering::SeqCst)
    }
}

/// Snapshot of the pipeline's drop counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Frames rejected by the ring because it was full (or the frame was
    /// oversized).
    pub ring_dropped: u64,
    /// Wire segments that failed COBS decoding.
    pub decode_failed: u64,
    /// Partial frames abandoned because they outgrew the accumulator.
    pub frame_overflow: u64,
    /// Decoded frames the consumer queue refused.
    pub consumer_rejected: u64,
}

/// Owns the serial link and the reader, delivery, and writer threads.
///
/// Lifecycle is created → running → stopped; a stopped manager cannot be
/// restarted. Dropping a running manager shuts it down.
pub struct SerialManager {
    port_name: String,
    baud: u32,
    poll_interval: Duration,
    shared: Arc<Shared>,
    producer: Arc<dyn ProducerQueue>,
    consumer: Arc<dyn ConsumerQueue>,
    link: Mutex<Option<Arc<dyn SerialLink>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    stopped: AtomicBool,
}

impl SerialManager {
    /// Creates a manager for `port` wired to the given queues. The port
    /// is not opened until [`start`](Self::start). Prefer
    /// [`SerialManagerBuilder`](crate::SerialManagerBuilder) when the
    /// ring capacity or poll interval need adjusting.
    pub fn new(
        port: impl Into<String>,
        producer: Arc<dyn ProducerQueue>,
        consumer: Arc<dyn ConsumerQueue>,
        baud: u32,
    ) -> Self {
        Self::from_parts(
            port.into(),
            baud,
            config::DEFAULT_RING_CAPACITY,
            config::DEFAULT_POLL_INTERVAL,
            producer,
            consumer,
        )
    }

    pub(crate) fn from_parts(
        port_name: String,
        baud: u32,
        ring_capacity: usize,
        poll_interval: Duration,
        producer: Arc<dyn ProducerQueue>,
        consumer: Arc<dyn ConsumerQueue>,
    ) -> Self {
        Self {
            port_name,
            baud,
            poll_interval,
            shared: Arc::new(Shared::new(ring_capacity)),
            producer,
            consumer,
            link: Mutex::new(None),
            workers: Mutex::new(Vec::new()),
            stopped: AtomicBool::new(false),
        }
    }

    /// Opens the configured port and launches the worker threads. A
    /// no-op if already running; fails with [`Error::PortOpen`] when the
    /// device cannot be opened and [`Error::Stopped`] after a shutdown.
    pub fn start(&self) -> LinkResult<()> {
        if self.is_running() {
            return Ok(());
        }
        if self.stopped.load(Ordering::SeqCst) {
            return Err(Error::Stopped);
        }
        let link = SerialPortLink::open(&self.port_name, self.baud, self.poll_interval)?;
        self.start_with(Arc::new(link))
    }

    /// Launches the pipeline over an already-open link. This is how
    /// alternate transports (or test doubles) enter the pipeline.
    pub fn start_with(&self, link: Arc<dyn SerialLink>) -> LinkResult<()> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(Error::Stopped);
        }
        {
            let mut slot = self.link.lock().unwrap();
            if slot.is_some() {
                return Ok(());
            }
            *slot = Some(link.clone());
        }

        self.shared.deliver_enabled.store(true, Ordering::SeqCst);
        self.shared.alive.store(true, Ordering::SeqCst);

        let mut workers = self.workers.lock().unwrap();

        let shared = self.shared.clone();
        let rd_link = link.clone();
        workers.push(
            thread::Builder::new()
                .name("framelink-reader".into())
                .spawn(move || pipeline::reader_loop(shared, rd_link))
                .expect("spawning reader thread"),
        );

        let shared = self.shared.clone();
        let consumer = self.consumer.clone();
        workers.push(
            thread::Builder::new()
                .name("framelink-deliver".into())
                .spawn(move || pipeline::deliver_loop(shared, consumer))
                .expect("spawning delivery thread"),
        );

        let shared = self.shared.clone();
        let producer = self.producer.clone();
        workers.push(
            thread::Builder::new()
                .name("framelink-writer".into())
                .spawn(move || pipeline::writer_loop(shared, producer, link))
                .expect("spawning writer thread"),
        );

        debug!("pipeline started on '{}'", self.port_name);
        Ok(())
    }

    /// True while the workers run and the port is open.
    pub fn is_running(&self) -> bool {
        self.shared.alive()
            && self.shared.deliver_enabled()
            && self.link.lock().unwrap().is_some()
    }

    /// Stops the workers, closes the port, and releases any frames still
    /// in the ring. Queue call-outs cease before the threads are joined.
    /// Idempotent; safe to call from any thread at any time.
    pub fn shutdown(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.shared.deliver_enabled.store(false, Ordering::SeqCst);
        self.shared.alive.store(false, Ordering::SeqCst);
        self.shared.ring.signal();

        if let Some(link) = self.link.lock().unwrap().as_ref() {
            link.cancel();
        }

        let workers = { std::mem::take(&mut *self.workers.lock().unwrap()) };
        for handle in workers {
            let _ = handle.join();
        }

        *self.link.lock().unwrap() = None;
        self.shared.ring.clear();
        debug!("pipeline stopped on '{}'", self.port_name);
    }

    /// Snapshot of the drop counters.
    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            ring_dropped: self.shared.ring.dropped(),
            decode_failed: self.shared.decode_failed.load(Ordering::Relaxed),
            frame_overflow: self.shared.frame_overflow.load(Ordering::Relaxed),
            consumer_rejected: self.shared.consumer_rejected.load(Ordering::Relaxed),
        }
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    pub fn baud(&self) -> u32 {
        self.baud
    }
}

impl Drop for SerialManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for SerialManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialManager")
            .field("port", &self.port_name)
            .field("baud", &self.baud)
            .field("running", &self.is_running())
            .finish()
    }
}
