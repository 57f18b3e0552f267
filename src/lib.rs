//! Serial bridge between a host program and an embedded device.
//!
//! The `framelink` crate drives a serial link with three worker threads:
//! a reader that splits the inbound byte stream on `0x00` delimiters and
//! COBS-decodes each segment, a delivery worker that hands decoded frames
//! to a consumer queue in batches, and a writer that coalesces outbound
//! messages from a producer queue into large port writes. Decoded frames
//! travel between the reader and the delivery worker through a bounded
//! in-process ring of length-prefixed entries, so a slow consumer costs
//! dropped frames rather than unbounded memory.
//!
//! Outbound messages are written verbatim; peers that expect COBS framing
//! on the way in are served by the standalone [`cobs`] encoder.
//!
//! # Example
//! This example opens a port and prints every decoded frame the device
//! sends.
//!
//! ```no_run
//! # fn example() -> framelink::LinkResult<()> {
//! use framelink::{ByteQueue, SerialManagerBuilder};
//! use std::sync::Arc;
//!
//! let outbound = Arc::new(ByteQueue::new());
//! let inbound = Arc::new(ByteQueue::new());
//!
//! // On Windows, use something like "COM5".
//! let manager = SerialManagerBuilder::new("/dev/ttyUSB0")
//!     .baud(115_200)
//!     .build(outbound.clone(), inbound.clone());
//! manager.start()?;
//!
//! while let Some(frame) = inbound.pop_timeout(std::time::Duration::from_secs(1)) {
//!     println!("{:02x?}", &frame[..]);
//! }
//! manager.shutdown();
//! # Ok(())
//! # }
//! ```

use std::io;

use thiserror::Error;

pub mod builder;
pub mod cobs;
pub mod config;
pub mod link;
pub mod manager;
pub(crate) mod pipeline;
pub mod queue;
pub mod ring;

pub use builder::SerialManagerBuilder;
pub use config::BaudRate;
pub use link::SerialLink;
pub use manager::{PipelineStats, SerialManager};
pub use queue::{ByteQueue, ConsumerQueue, ProducerQueue};
pub use ring::FrameRing;

/// Errors surfaced by the link manager and the serial layer.
#[derive(Error, Debug)]
pub enum Error {
    /// Opening the serial device failed. Only `start()` surfaces this.
    #[error("failed to open serial port '{port}'")]
    PortOpen {
        port: String,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Cobs(#[from] cobs::CobsError),
    /// The manager was shut down; it cannot be started again.
    #[error("manager has been shut down")]
    Stopped,
}

pub type LinkResult<T> = std::result::Result<T, Error>;
