/// Inter-frame timing for Modbus RTU
///
/// RTU frames carry no length field on the wire: a frame ends when the line has
/// been silent for 3.5 character times (T3.5). The monitor tracks when the last
/// byte arrived and answers whether that silence has elapsed. Every engine owns
/// its own monitor, so several buses can be driven side by side.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Bits per character on the wire (start + 8 data + parity/stop + stop)
pub const BITS_PER_CHAR: u64 = 11;

/// Fixed T3.5 used above 19200 baud, where the computed gap gets too short to
/// observe reliably
pub const MIN_FRAME_GAP: Duration = Duration::from_micros(1750);

/// Lower bound on the polling step derived from the frame gap
pub const MIN_POLL_INTERVAL: Duration = Duration::from_micros(100);

/// Time to transmit one character at `baud_rate`
pub fn char_time(baud_rate: u32) -> Duration {
    let baud = baud_rate.max(1) as u64;
    Duration::from_micros(BITS_PER_CHAR * 1_000_000 / baud)
}

/// T3.5 for `baud_rate`, clamped to [`MIN_FRAME_GAP`]
pub fn frame_gap_for_baud(baud_rate: u32) -> Duration {
    let char_time_us = char_time(baud_rate).as_micros() as u64;
    let gap = Duration::from_micros(char_time_us * 35 / 10); // 3.5 character times
    gap.max(MIN_FRAME_GAP)
}

/// Tracks silence on the bus since the last received byte
#[derive(Debug, Clone)]
pub struct TimingMonitor {
    frame_gap: Duration,
    last_byte_at: Option<Instant>,
}

impl TimingMonitor {
    /// Create a monitor for the given baud rate
    pub fn new(baud_rate: u32) -> Self {
        Self::with_frame_gap(frame_gap_for_baud(baud_rate))
    }

    /// Create a monitor with an explicit T3.5
    pub fn with_frame_gap(frame_gap: Duration) -> Self {
        Self {
            frame_gap,
            last_byte_at: None,
        }
    }

    /// The silence threshold that delimits frames
    pub fn frame_gap(&self) -> Duration {
        self.frame_gap
    }

    /// Longest step-function spacing that still observes T3.5 with useful accuracy
    pub fn poll_interval(&self) -> Duration {
        (self.frame_gap / 2).max(MIN_POLL_INTERVAL)
    }

    /// Record byte arrival at `now`
    pub fn signal_byte_received(&mut self, now: Instant) {
        self.last_byte_at = Some(now);
    }

    /// Forget the last byte, e.g. at the start of a transaction
    pub fn reset(&mut self) {
        self.last_byte_at = None;
    }

    /// When the most recent byte arrived, if any since the last reset
    pub fn last_byte_at(&self) -> Option<Instant> {
        self.last_byte_at
    }

    /// Silence since the last byte, or `None` if nothing has been received
    pub fn silence(&self, now: Instant) -> Option<Duration> {
        self.last_byte_at
            .map(|last| now.saturating_duration_since(last))
    }

    /// True once at least one byte was received and T3.5 has passed since
    pub fn is_frame_boundary_elapsed(&self, now: Instant) -> bool {
        self.silence(now)
            .map_or(false, |silence| silence >= self.frame_gap)
    }
}

/// Hand-advanced clock for simulations and deterministic tests
///
/// Clones share the same time, so one handle can be given to a link while the
/// test keeps another to move time forward.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<Instant>>,
}

impl ManualClock {
    /// Start a clock at the current instant
    pub fn new() -> Self {
        Self {
            now: Arc::new(Mutex::new(Instant::now())),
        }
    }

    /// Current reading
    pub fn now(&self) -> Instant {
        match self.now.lock() {
            Ok(now) => *now,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Move time forward
    pub fn advance(&self, by: Duration) {
        let mut now = match self.now.lock() {
            Ok(now) => now,
            Err(poisoned) => poisoned.into_inner(),
        };
        *now += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_gap_from_baud() {
        // 11 bits at 9600 baud = 1145us per char, 3.5 chars = 4007us
        assert_eq!(frame_gap_for_baud(9600), Duration::from_micros(4007));
        assert_eq!(frame_gap_for_baud(19200), Duration::from_micros(2002));
        assert_eq!(frame_gap_for_baud(1200), Duration::from_micros(32081));
    }

    #[test]
    fn test_frame_gap_minimum() {
        assert_eq!(frame_gap_for_baud(38400), MIN_FRAME_GAP);
        assert_eq!(frame_gap_for_baud(115200), MIN_FRAME_GAP);
    }

    #[test]
    fn test_boundary_detection() {
        let clock = ManualClock::new();
        let mut monitor = TimingMonitor::new(19200);
        assert!(!monitor.is_frame_boundary_elapsed(clock.now()));

        monitor.signal_byte_received(clock.now());
        clock.advance(Duration::from_micros(1000));
        assert!(!monitor.is_frame_boundary_elapsed(clock.now()));

        // Another byte restarts the silence window
        monitor.signal_byte_received(clock.now());
        clock.advance(Duration::from_micros(1500));
        assert!(!monitor.is_frame_boundary_elapsed(clock.now()));

        clock.advance(Duration::from_micros(600));
        assert!(monitor.is_frame_boundary_elapsed(clock.now()));

        monitor.reset();
        assert!(!monitor.is_frame_boundary_elapsed(clock.now()));
        assert_eq!(monitor.silence(clock.now()), None);
    }

    #[test]
    fn test_poll_interval_bounded_by_gap() {
        let monitor = TimingMonitor::new(9600);
        assert!(monitor.poll_interval() < monitor.frame_gap());

        let tiny = TimingMonitor::with_frame_gap(Duration::from_micros(50));
        assert_eq!(tiny.poll_interval(), MIN_POLL_INTERVAL);
    }
}
