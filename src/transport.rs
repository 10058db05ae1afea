//! # Serial Link Layer
//!
//! The engine talks to the wire through the [`SerialLink`] trait: a
//! non-blocking "give me whatever bytes have arrived" read, a frame write and
//! a clock. Keeping the clock on the link lets simulations and tests run on
//! hand-advanced time while real ports use `Instant::now()`.
//!
//! ## Implementations
//!
//! ### `SerialPortLink`
//! - RS-232 / RS-485 port opened as a `tokio_serial::SerialStream`
//! - Configurable data bits, stop bits and parity
//! - Polled once per call without a waker, so a poll never blocks; a
//!   frame the driver cannot take at once is finished on later calls
//!
//! ### `MemoryLink`
//! - Two connected endpoints sharing in-memory queues
//! - Optional [`ManualClock`] for deterministic timing
//! - Used by the simulator binary and the test suites
//!
//! ## Usage Example
//!
//! ```rust
//! use voltage_rtu::transport::{MemoryLink, SerialLink};
//!
//! let (mut master, mut slave) = MemoryLink::pair();
//! master.write_bytes(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x02, 0xC4, 0x0B]).unwrap();
//!
//! let mut buf = [0u8; 16];
//! let n = slave.read_available(&mut buf).unwrap();
//! assert_eq!(n, 8);
//! ```

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use futures::task::noop_waker_ref;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio_serial::SerialStream;
use tracing::info;

use crate::error::{ModbusError, ModbusResult};
use crate::timing::ManualClock;
use crate::utils::format::bytes_to_hex;

/// Log packet with direction
///
/// Sends are whole frames; receives are whatever chunk the driver handed over.
fn log_packet(direction: &str, data: &[u8], port: &str) {
    info!("[MODBUS-RTU] {} {} {}", port, direction, bytes_to_hex(data));
}

/// Byte-level access to a half-duplex serial line
///
/// Implementations must not block: `read_available` returns immediately with
/// zero bytes when nothing is pending.
pub trait SerialLink: Send {
    /// Copy pending bytes into `buf`, returning how many were copied
    fn read_available(&mut self, buf: &mut [u8]) -> ModbusResult<usize>;

    /// Transmit a complete frame
    fn write_bytes(&mut self, data: &[u8]) -> ModbusResult<()>;

    /// Current time on this link's clock
    fn now(&self) -> Instant {
        Instant::now()
    }

    /// Time elapsed on this link's clock since `since`
    fn elapsed_since(&self, since: Instant) -> Duration {
        self.now().saturating_duration_since(since)
    }

    /// Enable or disable raw packet tracing
    fn set_packet_logging(&mut self, _enabled: bool) {}
}

impl<L: SerialLink + ?Sized> SerialLink for Box<L> {
    fn read_available(&mut self, buf: &mut [u8]) -> ModbusResult<usize> {
        (**self).read_available(buf)
    }

    fn write_bytes(&mut self, data: &[u8]) -> ModbusResult<()> {
        (**self).write_bytes(data)
    }

    fn now(&self) -> Instant {
        (**self).now()
    }

    fn elapsed_since(&self, since: Instant) -> Duration {
        (**self).elapsed_since(since)
    }

    fn set_packet_logging(&mut self, enabled: bool) {
        (**self).set_packet_logging(enabled)
    }
}

/// Serial line settings besides the baud rate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineSettings {
    pub data_bits: tokio_serial::DataBits,
    pub stop_bits: tokio_serial::StopBits,
    pub parity: tokio_serial::Parity,
}

impl Default for LineSettings {
    /// 8-N-1
    fn default() -> Self {
        Self {
            data_bits: tokio_serial::DataBits::Eight,
            stop_bits: tokio_serial::StopBits::One,
            parity: tokio_serial::Parity::None,
        }
    }
}

/// Non-blocking link over an async byte stream
///
/// Every call polls the stream once with a no-op waker, so it only sees what
/// the reactor already reported ready. Frame bytes the driver cannot take yet
/// are kept in `unsent` and pushed out on the following calls; nothing here
/// waits for the line to drain.
pub struct StreamLink<S> {
    stream: S,
    name: String,
    unsent: VecDeque<u8>,
    packet_logging: bool,
}

/// Physical serial port
pub type SerialPortLink = StreamLink<SerialStream>;

impl StreamLink<SerialStream> {
    /// Open a port with 8-N-1 framing
    ///
    /// Must be called from inside a tokio runtime, which drives the port's
    /// readiness.
    pub fn open(port: &str, baud_rate: u32) -> ModbusResult<Self> {
        Self::open_with_settings(port, baud_rate, LineSettings::default())
    }

    /// Open a port with explicit line settings
    pub fn open_with_settings(
        port: &str,
        baud_rate: u32,
        settings: LineSettings,
    ) -> ModbusResult<Self> {
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(ModbusError::configuration(format!(
                "Serial port {} must be opened inside a tokio runtime",
                port
            )));
        }

        let builder = tokio_serial::new(port, baud_rate)
            .data_bits(settings.data_bits)
            .stop_bits(settings.stop_bits)
            .parity(settings.parity);
        let serial = SerialStream::open(&builder)
            .map_err(|e| ModbusError::io(format!("Failed to open serial port {}: {}", port, e)))?;

        Ok(Self::new(serial, port))
    }

    pub fn port_name(&self) -> &str {
        &self.name
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin + Send> StreamLink<S> {
    pub fn new(stream: S, name: impl Into<String>) -> Self {
        Self {
            stream,
            name: name.into(),
            unsent: VecDeque::new(),
            packet_logging: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Frame bytes accepted by `write_bytes` that the driver has not taken yet
    pub fn unsent(&self) -> usize {
        self.unsent.len()
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    fn push_unsent(&mut self) -> ModbusResult<()> {
        let mut cx = Context::from_waker(noop_waker_ref());
        while !self.unsent.is_empty() {
            let (head, _) = self.unsent.as_slices();
            match Pin::new(&mut self.stream).poll_write(&mut cx, head) {
                Poll::Ready(Ok(0)) => {
                    self.unsent.clear();
                    return Err(ModbusError::io(format!("{} closed while sending", self.name)));
                }
                Poll::Ready(Ok(n)) => {
                    self.unsent.drain(..n);
                }
                Poll::Ready(Err(e)) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Poll::Ready(Err(e)) => {
                    self.unsent.clear();
                    return Err(ModbusError::io(format!("Failed to send RTU frame: {}", e)));
                }
                Poll::Pending => break,
            }
        }
        Ok(())
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin + Send> SerialLink for StreamLink<S> {
    fn read_available(&mut self, buf: &mut [u8]) -> ModbusResult<usize> {
        self.push_unsent()?;
        if buf.is_empty() {
            return Ok(0);
        }

        let mut cx = Context::from_waker(noop_waker_ref());
        let mut read_buf = ReadBuf::new(buf);
        let n = match Pin::new(&mut self.stream).poll_read(&mut cx, &mut read_buf) {
            Poll::Ready(Ok(())) => read_buf.filled().len(),
            Poll::Ready(Err(e)) if e.kind() == std::io::ErrorKind::WouldBlock => 0,
            Poll::Ready(Err(e)) => {
                return Err(ModbusError::io(format!("Serial read error: {}", e)))
            }
            Poll::Pending => 0,
        };

        if self.packet_logging && n > 0 {
            log_packet("receive", &buf[..n], &self.name);
        }
        Ok(n)
    }

    fn write_bytes(&mut self, data: &[u8]) -> ModbusResult<()> {
        if self.packet_logging {
            log_packet("send", data, &self.name);
        }
        self.unsent.extend(data.iter().copied());
        self.push_unsent()
    }

    fn set_packet_logging(&mut self, enabled: bool) {
        self.packet_logging = enabled;
    }
}

type Queue = Arc<Mutex<VecDeque<u8>>>;

fn lock_queue(queue: &Queue) -> ModbusResult<std::sync::MutexGuard<'_, VecDeque<u8>>> {
    queue
        .lock()
        .map_err(|_| ModbusError::internal("Memory link queue poisoned"))
}

/// One end of an in-memory serial line
///
/// Bytes written on one endpoint become readable on its peer. Without a
/// clock the endpoints run on real time.
#[derive(Debug)]
pub struct MemoryLink {
    name: String,
    rx: Queue,
    tx: Queue,
    clock: Option<ManualClock>,
    packet_logging: bool,
}

impl MemoryLink {
    /// Two connected endpoints on real time
    pub fn pair() -> (Self, Self) {
        Self::build_pair(None)
    }

    /// Two connected endpoints sharing a manual clock
    pub fn pair_with_clock(clock: ManualClock) -> (Self, Self) {
        Self::build_pair(Some(clock))
    }

    fn build_pair(clock: Option<ManualClock>) -> (Self, Self) {
        let a_to_b: Queue = Arc::new(Mutex::new(VecDeque::new()));
        let b_to_a: Queue = Arc::new(Mutex::new(VecDeque::new()));

        let a = Self {
            name: "mem-a".to_string(),
            rx: b_to_a.clone(),
            tx: a_to_b.clone(),
            clock: clock.clone(),
            packet_logging: false,
        };
        let b = Self {
            name: "mem-b".to_string(),
            rx: a_to_b,
            tx: b_to_a,
            clock,
            packet_logging: false,
        };
        (a, b)
    }

    /// Place bytes in this endpoint's receive queue, as line noise would
    pub fn inject(&self, bytes: &[u8]) -> ModbusResult<()> {
        lock_queue(&self.rx)?.extend(bytes.iter().copied());
        Ok(())
    }

    /// Bytes waiting to be read on this endpoint
    pub fn pending(&self) -> ModbusResult<usize> {
        Ok(lock_queue(&self.rx)?.len())
    }

    /// Drain everything waiting on this endpoint
    pub fn take_all(&mut self) -> ModbusResult<Vec<u8>> {
        Ok(lock_queue(&self.rx)?.drain(..).collect())
    }
}

impl SerialLink for MemoryLink {
    fn read_available(&mut self, buf: &mut [u8]) -> ModbusResult<usize> {
        let mut rx = lock_queue(&self.rx)?;
        let n = rx.len().min(buf.len());
        for (slot, byte) in buf.iter_mut().zip(rx.drain(..n)) {
            *slot = byte;
        }
        drop(rx);

        if self.packet_logging && n > 0 {
            log_packet("receive", &buf[..n], &self.name);
        }
        Ok(n)
    }

    fn write_bytes(&mut self, data: &[u8]) -> ModbusResult<()> {
        if self.packet_logging {
            log_packet("send", data, &self.name);
        }
        lock_queue(&self.tx)?.extend(data.iter().copied());
        Ok(())
    }

    fn now(&self) -> Instant {
        match &self.clock {
            Some(clock) => clock.now(),
            None => Instant::now(),
        }
    }

    fn set_packet_logging(&mut self, enabled: bool) {
        self.packet_logging = enabled;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_link_pair() {
        let (mut a, mut b) = MemoryLink::pair();
        a.write_bytes(&[1, 2, 3]).unwrap();
        b.write_bytes(&[9]).unwrap();

        let mut buf = [0u8; 2];
        assert_eq!(b.read_available(&mut buf).unwrap(), 2);
        assert_eq!(buf, [1, 2]);
        assert_eq!(b.read_available(&mut buf).unwrap(), 1);
        assert_eq!(buf[0], 3);
        assert_eq!(b.read_available(&mut buf).unwrap(), 0);

        assert_eq!(a.take_all().unwrap(), vec![9]);
    }

    #[test]
    fn test_memory_link_inject() {
        let (mut a, _b) = MemoryLink::pair();
        a.inject(&[0xAA, 0x55]).unwrap();
        assert_eq!(a.pending().unwrap(), 2);
        assert_eq!(a.take_all().unwrap(), vec![0xAA, 0x55]);
    }

    #[test]
    fn test_manual_clock_link() {
        let clock = ManualClock::new();
        let (a, b) = MemoryLink::pair_with_clock(clock.clone());
        let start = a.now();

        clock.advance(Duration::from_millis(5));
        assert_eq!(a.elapsed_since(start), Duration::from_millis(5));
        assert_eq!(b.now(), a.now());
    }

    #[test]
    fn test_stream_link_write_does_not_wait_for_peer() {
        use tokio::io::AsyncReadExt;

        // The peer side holds at most 8 bytes until someone reads them
        let (local, mut remote) = tokio::io::duplex(8);
        let mut link = StreamLink::new(local, "duplex");
        let frame: Vec<u8> = (0..20).collect();

        link.write_bytes(&frame).unwrap();
        assert_eq!(link.unsent(), 12);

        let mut received = Vec::new();
        let mut chunk = [0u8; 32];
        while received.len() < frame.len() {
            let n = tokio_test::block_on(remote.read(&mut chunk)).unwrap();
            received.extend_from_slice(&chunk[..n]);
            // Each poll hands the driver what it has room for
            assert_eq!(link.read_available(&mut [0u8; 4]).unwrap(), 0);
        }
        assert_eq!(received, frame);
        assert_eq!(link.unsent(), 0);
    }

    #[test]
    fn test_stream_link_read_returns_immediately() {
        use tokio::io::AsyncWriteExt;

        let (local, mut remote) = tokio::io::duplex(64);
        let mut link = StreamLink::new(local, "duplex");
        let mut buf = [0u8; 16];
        assert_eq!(link.read_available(&mut buf).unwrap(), 0);

        tokio_test::block_on(remote.write_all(&[0x11, 0x03, 0x02])).unwrap();
        assert_eq!(link.read_available(&mut buf).unwrap(), 3);
        assert_eq!(&buf[..3], &[0x11, 0x03, 0x02]);
        assert_eq!(link.read_available(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_stream_link_closed_peer() {
        let (local, remote) = tokio::io::duplex(8);
        let mut link = StreamLink::new(local, "duplex");
        drop(remote);
        assert!(link.write_bytes(&[1, 2, 3]).is_err());
        assert_eq!(link.unsent(), 0);
    }

    #[test]
    fn test_serial_port_needs_runtime() {
        assert!(matches!(
            SerialPortLink::open("/dev/null-rtu", 9600),
            Err(ModbusError::Configuration { .. })
        ));
    }

    #[test]
    fn test_boxed_link() {
        let (a, mut b) = MemoryLink::pair();
        let mut boxed: Box<dyn SerialLink> = Box::new(a);
        boxed.write_bytes(&[7]).unwrap();
        assert_eq!(b.take_all().unwrap(), vec![7]);
    }
}
