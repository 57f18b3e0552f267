use std::io::ErrorKind;
use std::thread;
use std::time::Duration;

use serial2::{CharSize, FlowControl, Parity, SerialPort, Settings, StopBits};

use crate::config::{BaudRate, DTR_SETTLE};
use crate::link::SerialLink;
use crate::{Error, LinkResult};

const WRITE_TIMEOUT: Duration = Duration::from_secs(2);

/// Serial device handle configured for the pipeline: raw 8N1, no flow
/// control, reads bounded by the poll interval.
#[derive(Debug)]
pub struct SerialPortLink {
    port: SerialPort,
}

impl SerialPortLink {
    /// Opens `name` at `baud` (unknown rates fall back to 115200, see
    /// [`BaudRate`]). Performs the conventional DTR reset toggle so
    /// devices that reset on DTR see a clean edge, and purges anything
    /// stale in the OS buffers.
    pub fn open(name: &str, baud: u32, poll_interval: Duration) -> LinkResult<Self> {
        let rate = u32::from(BaudRate::from(baud));
        let mut port = SerialPort::open(name, move |mut settings: Settings| {
            settings.set_raw();
            settings.set_baud_rate(rate)?;
            settings.set_char_size(CharSize::Bits8);
            settings.set_stop_bits(StopBits::One);
            settings.set_parity(Parity::None);
            settings.set_flow_control(FlowControl::None);
            Ok(settings)
        })
        .map_err(|source| Error::PortOpen {
            port: name.to_string(),
            source,
        })?;

        port.set_read_timeout(poll_interval)?;
        port.set_write_timeout(WRITE_TIMEOUT)?;

        // DTR reset convention: assert lines, drop DTR for a beat, then
        // re-assert. Some boards ignore this entirely, which is fine.
        let _ = port.set_rts(true);
        let _ = port.set_dtr(true);
        let _ = port.set_dtr(false);
        thread::sleep(DTR_SETTLE);
        let _ = port.set_dtr(true);

        let _ = port.discard_buffers();

        Ok(Self { port })
    }
}

impl SerialLink for SerialPortLink {
    fn read(&self, buf: &mut [u8]) -> LinkResult<usize> {
        // The read timeout set at open bounds the idle wait; an expired
        // timer means "no data", not failure.
        match self.port.read(buf) {
            Ok(n) => Ok(n),
            Err(ref e) if e.kind() == ErrorKind::TimedOut => Ok(0),
            Err(ref e) if e.kind() == ErrorKind::WouldBlock => Ok(0),
            Err(ref e) if e.kind() == ErrorKind::Interrupted => Ok(0),
            Err(e) => Err(Error::Io(e)),
        }
    }

    fn write(&self, buf: &[u8]) -> LinkResult<usize> {
        match self.port.write(buf) {
            Ok(n) => Ok(n),
            // A full device-side buffer shows up as a timed-out write;
            // report a short write of zero and let the caller retry.
            Err(ref e) if e.kind() == ErrorKind::TimedOut => Ok(0),
            Err(ref e) if e.kind() == ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(Error::Io(e)),
        }
    }

    fn cancel(&self) {
        let _ = self.port.discard_buffers();
        let _ = self.port.set_dtr(false);
        let _ = self.port.set_rts(false);
    }
}
