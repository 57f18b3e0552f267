/* Defines the builder for SerialManager construction knobs. */

use std::sync::Arc;
use std::time::Duration;

use crate::config::{DEFAULT_BAUD, DEFAULT_POLL_INTERVAL, DEFAULT_RING_CAPACITY};
use crate::manager::SerialManager;
use crate::queue::{ConsumerQueue, ProducerQueue};

/// Builder for a [`SerialManager`] with tuning knobs beyond the plain
/// constructor: ring capacity and the idle-read poll interval.
pub struct SerialManagerBuilder {
    port: String,
    baud: u32,
    ring_capacity: usize,
    poll_interval: Duration,
}

impl SerialManagerBuilder {
    pub fn new(port: &str) -> Self {
        Self {
            port: port.into(),
            baud: DEFAULT_BAUD,
            ring_capacity: DEFAULT_RING_CAPACITY,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Line rate; values outside the canonical set fall back to 115200.
    pub fn baud(mut self, baud: u32) -> Self {
        self.baud = baud;
        self
    }

    /// Capacity in bytes of the inbound frame ring.
    pub fn ring_capacity(mut self, bytes: usize) -> Self {
        self.ring_capacity = bytes;
        self
    }

    /// How long an idle port read may wait for data before reporting
    /// "nothing yet". Lower values trade CPU for latency.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Builds the manager around the two queue collaborators. The port is
    /// opened by [`SerialManager::start`], not here.
    pub fn build(
        self,
        producer: Arc<dyn ProducerQueue>,
        consumer: Arc<dyn ConsumerQueue>,
    ) -> SerialManager {
        SerialManager::from_parts(
            self.port,
            self.baud,
            self.ring_capacity,
            self.poll_interval,
            producer,
            consumer,
        )
    }
}
