// Contains types restricting values related to the link configuration
// and the tuning constants of the I/O pipeline.
use std::time::Duration;

pub const DEFAULT_BAUD: u32 = 115_200;

/// Default capacity of the inbound frame ring in bytes.
pub const DEFAULT_RING_CAPACITY: usize = 1024 * 1024;

/// Default bound on how long an idle port read waits for data.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(3);

/// Size of the reader's staging buffer for raw port bytes.
pub(crate) const STAGING_LEN: usize = 16 * 1024;

/// Size of the frame accumulator and of the decode scratch buffer. A
/// segment that would outgrow this is abandoned and the framer re-aligns
/// at the next delimiter.
pub(crate) const FRAME_MAX: usize = 64 * 1024;

/// Size of the writer's coalescing buffer.
pub(crate) const WRITE_BUF_LEN: usize = 64 * 1024;

/// Frames delivered to the consumer queue per batch.
pub(crate) const DELIVER_BATCH: usize = 256;

/// How long the delivery worker waits on the ring when it is empty.
pub(crate) const DELIVER_WAIT: Duration = Duration::from_millis(10);

/// Blocking-pop timeout for the writer's first message of an aggregate.
pub(crate) const WRITE_POP_TIMEOUT: Duration = Duration::from_millis(1);

/// Idle yield when the producer queue had nothing for us.
pub(crate) const WRITE_IDLE_YIELD: Duration = Duration::from_micros(500);

/// Recovery sleep after a port I/O error.
pub(crate) const IO_RETRY_DELAY: Duration = Duration::from_millis(10);

/// Cap on the reader's adaptive idle backoff, in milliseconds.
pub(crate) const MAX_IDLE_BACKOFF_MS: u64 = 3;

/// Settle time between clearing and re-asserting DTR on open.
pub(crate) const DTR_SETTLE: Duration = Duration::from_millis(10);

/// The canonical baud rates the link accepts. Anything else falls back to
/// 115200, matching the device's reset-default rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum BaudRate {
    #[display("9600")]
    B9600,
    #[display("19200")]
    B19200,
    #[display("38400")]
    B38400,
    #[display("57600")]
    B57600,
    #[display("115200")]
    B115200,
}

impl From<u32> for BaudRate {
    fn from(raw: u32) -> Self {
        match raw {
            9_600 => Self::B9600,
            19_200 => Self::B19200,
            38_400 => Self::B38400,
            57_600 => Self::B57600,
            115_200 => Self::B115200,
            _ => Self::B115200,
        }
    }
}

impl From<BaudRate> for u32 {
    fn from(baud: BaudRate) -> Self {
        match baud {
            BaudRate::B9600 => 9_600,
            BaudRate::B19200 => 19_200,
            BaudRate::B38400 => 38_400,
            BaudRate::B57600 => 57_600,
            BaudRate::B115200 => 115_200,
        }
    }
}
