//! # RTU Transaction State Machine
//!
//! [`RtuEngine`] owns one serial line and drives it through the IDLE/WAITING
//! cycle. It never blocks: callers invoke [`RtuEngine::poll`] repeatedly, at
//! least every [`RtuEngine::poll_interval`], from a plain loop, a timer
//! callback or an async task. Each call consumes whatever bytes the link has
//! pending, checks the T3.5 boundary and completes at most one frame.
//!
//! ## Master
//!
//! ```text
//! query() ──> WAITING ──poll()──> T3.5 elapsed, frame ok ──> IDLE + Response
//!                 │                               └─ bad ──> IDLE + Err
//!                 └──── response timeout ──────────────────> IDLE + Err(Timeout)
//! ```
//!
//! ## Slave
//!
//! Bytes arriving while IDLE start a frame (WAITING). At the boundary the
//! frame is CRC-checked, address-matched, dispatched to the [`DataStore`] and
//! answered. Corrupted and overflowing frames are dropped without a reply;
//! the master's timeout is the failure signal on the bus.
//!
//! ```rust
//! use std::time::Duration;
//! use voltage_rtu::transport::SerialLink;
//! use voltage_rtu::{ManualClock, MemoryLink, ModbusFunction, ModbusRequest, PollStatus, RtuConfig, RtuEngine};
//!
//! let clock = ManualClock::new();
//! let (link, mut peer) = MemoryLink::pair_with_clock(clock.clone());
//! let mut master = RtuEngine::new(link, RtuConfig::master(19200)).unwrap();
//!
//! let request = ModbusRequest::new_read(1, ModbusFunction::ReadHoldingRegisters, 0, 2);
//! master.query(&request).unwrap();
//! assert_eq!(peer.take_all().unwrap(), vec![0x01, 0x03, 0x00, 0x00, 0x00, 0x02, 0xC4, 0x0B]);
//!
//! peer.write_bytes(&[0x01, 0x03, 0x04, 0x00, 0x0A, 0x00, 0x0B, 0x9B, 0xF6]).unwrap();
//! assert!(matches!(master.poll().unwrap(), PollStatus::Waiting));
//!
//! clock.advance(Duration::from_millis(3));
//! match master.poll().unwrap() {
//!     PollStatus::Response(response) => assert_eq!(response.parse_registers().unwrap(), vec![10, 11]),
//!     other => panic!("unexpected {:?}", other),
//! }
//! ```

use log::{debug, warn};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::buffer::FrameBuffer;
use crate::codec::{self, RawFrame};
use crate::config::{RtuConfig, Role};
use crate::dispatch::{self, FunctionTable};
use crate::error::{ErrorCode, ModbusError, ModbusResult};
use crate::protocol::{ModbusException, ModbusRequest, ModbusResponse, SlaveId};
use crate::register_bank::DataStore;
use crate::timing::TimingMonitor;
use crate::transport::SerialLink;
use crate::{BROADCAST_ADDRESS, MAX_RTU_FRAME_SIZE};

/// Communication state of an engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CommState {
    /// Bus quiet, a new frame may begin
    Idle,
    /// Master awaiting a response, or slave accumulating a request
    Waiting,
}

/// Outcome of one [`RtuEngine::poll`] step
#[derive(Debug, Clone, PartialEq)]
pub enum PollStatus {
    /// Nothing in progress
    Idle,
    /// A transaction or frame is in progress
    Waiting,
    /// Master: the response to the outstanding request
    Response(ModbusResponse),
    /// Slave: a reply was transmitted for `function`
    Replied {
        function: u8,
        exception: Option<ModbusException>,
    },
    /// Slave: a broadcast write was applied, no reply sent
    Broadcast(ModbusRequest),
    /// Slave: a valid frame for another station, or a broadcast read, was dropped
    Ignored { address: u8 },
}

/// Result of servicing a request on a slave
enum Serviced {
    /// Broadcast read, not acted on
    Skipped,
    Applied(ModbusRequest, ModbusResponse),
}

/// Frame and error counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    /// Frames received with a valid CRC and handled by this engine
    pub frames_in: u64,
    /// Frames transmitted
    pub frames_out: u64,
    /// Failed transactions
    pub errors: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
}

/// Modbus RTU protocol engine for one serial line
pub struct RtuEngine<L: SerialLink> {
    link: L,
    config: RtuConfig,
    state: CommState,
    timing: TimingMonitor,
    rx: FrameBuffer,
    functions: FunctionTable,
    store: Option<Arc<dyn DataStore>>,
    pending: Option<ModbusRequest>,
    sent_at: Option<Instant>,
    response_timeout: Duration,
    last_error: Option<ModbusError>,
    stats: EngineStats,
}

impl<L: SerialLink> RtuEngine<L> {
    /// Build an engine over `link`
    pub fn new(mut link: L, config: RtuConfig) -> ModbusResult<Self> {
        config.validate()?;
        link.set_packet_logging(config.packet_logging);

        Ok(Self {
            timing: TimingMonitor::with_frame_gap(config.frame_gap()),
            rx: FrameBuffer::new(config.max_buffer_size),
            response_timeout: config.response_timeout(),
            link,
            config,
            state: CommState::Idle,
            functions: FunctionTable::standard(),
            store: None,
            pending: None,
            sent_at: None,
            last_error: None,
            stats: EngineStats::default(),
        })
    }

    /// Attach the application store answered by a slave
    pub fn with_store(mut self, store: Arc<dyn DataStore>) -> Self {
        self.attach_store(store);
        self
    }

    pub fn attach_store(&mut self, store: Arc<dyn DataStore>) {
        self.store = Some(store);
    }

    /// Restrict the accepted function codes
    pub fn with_functions(mut self, functions: FunctionTable) -> Self {
        self.functions = functions;
        self
    }

    pub fn config(&self) -> &RtuConfig {
        &self.config
    }

    pub fn role(&self) -> Role {
        self.config.role
    }

    pub fn state(&self) -> CommState {
        self.state
    }

    pub fn functions(&self) -> &FunctionTable {
        &self.functions
    }

    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    /// Most recent failure, cleared by the next successful transaction
    pub fn last_error(&self) -> Option<&ModbusError> {
        self.last_error.as_ref()
    }

    /// Most recent failure mapped onto the closed error taxonomy
    pub fn last_error_code(&self) -> Option<ErrorCode> {
        self.last_error.as_ref().and_then(ModbusError::code)
    }

    pub fn response_timeout(&self) -> Duration {
        self.response_timeout
    }

    /// Change the master response timeout; applies to the next check
    pub fn set_response_timeout(&mut self, timeout: Duration) {
        self.response_timeout = timeout;
    }

    /// T3.5 in effect
    pub fn frame_gap(&self) -> Duration {
        self.timing.frame_gap()
    }

    /// Maximum spacing between `poll` calls
    pub fn poll_interval(&self) -> Duration {
        self.timing.poll_interval()
    }

    /// The request awaiting a response, if any
    pub fn pending_request(&self) -> Option<&ModbusRequest> {
        self.pending.as_ref()
    }

    /// True once the outstanding request's response window has passed
    pub fn is_timed_out(&self) -> bool {
        match (&self.pending, self.sent_at) {
            (Some(_), Some(sent_at)) => self.link.elapsed_since(sent_at) > self.response_timeout,
            _ => false,
        }
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    pub fn into_link(self) -> L {
        self.link
    }

    /// Send a request (master only)
    ///
    /// Fails immediately with `NotMaster` on a slave and with `Polling` while
    /// a response is still outstanding; neither transmits anything. Broadcast
    /// writes leave the engine IDLE since no response will come.
    pub fn query(&mut self, request: &ModbusRequest) -> ModbusResult<()> {
        if !self.config.role.is_master() {
            self.last_error = Some(ModbusError::NotMaster);
            return Err(ModbusError::NotMaster);
        }
        if self.state == CommState::Waiting {
            self.last_error = Some(ModbusError::Polling);
            return Err(ModbusError::Polling);
        }
        if !self.functions.is_supported(request.function.to_u8()) {
            let error = ModbusError::invalid_function(request.function.to_u8());
            self.last_error = Some(error.clone());
            return Err(error);
        }

        let frame = match codec::encode_request(request) {
            Ok(frame) => frame,
            Err(e) => {
                self.last_error = Some(e.clone());
                return Err(e);
            }
        };
        self.drain_input()?;

        if let Err(e) = self.link.write_bytes(&frame) {
            return Err(self.fail(e));
        }
        self.stats.frames_out += 1;
        self.stats.bytes_out += frame.len() as u64;
        debug!(
            "Sent {} to slave {} ({} bytes)",
            request.function,
            request.slave_id,
            frame.len()
        );

        if request.is_broadcast() {
            self.last_error = None;
            return Ok(());
        }

        self.pending = Some(request.clone());
        self.sent_at = Some(self.link.now());
        self.state = CommState::Waiting;
        Ok(())
    }

    /// Advance the state machine by one step
    pub fn poll(&mut self) -> ModbusResult<PollStatus> {
        match self.config.role {
            Role::Master => self.poll_master(),
            Role::Slave { station } => self.poll_slave(station),
        }
    }

    /// Discard anything that arrived before a new transaction
    fn drain_input(&mut self) -> ModbusResult<()> {
        let mut scratch = [0u8; MAX_RTU_FRAME_SIZE];
        let mut discarded = 0;
        loop {
            let n = self.link.read_available(&mut scratch)?;
            if n == 0 {
                break;
            }
            discarded += n;
        }
        if discarded > 0 || !self.rx.is_empty() {
            debug!("Discarded {} stale bytes", discarded + self.rx.len());
        }
        self.rx.clear();
        self.timing.reset();
        Ok(())
    }

    /// Move pending link bytes into the receive buffer
    fn receive(&mut self) -> ModbusResult<usize> {
        let mut scratch = [0u8; MAX_RTU_FRAME_SIZE];
        let n = match self.link.read_available(&mut scratch) {
            Ok(n) => n,
            Err(e) => return Err(self.fail(e)),
        };
        if n == 0 {
            return Ok(0);
        }

        self.stats.bytes_in += n as u64;
        if let Err(e) = self.rx.push(&scratch[..n]) {
            warn!("Receive buffer overflow, dropping frame: {}", e);
            return Err(self.fail(e));
        }
        self.timing.signal_byte_received(self.link.now());
        Ok(n)
    }

    /// Abandon the current transaction and record `error`
    fn fail(&mut self, error: ModbusError) -> ModbusError {
        self.reset_transaction();
        self.stats.errors += 1;
        self.last_error = Some(error.clone());
        error
    }

    fn reset_transaction(&mut self) {
        self.rx.clear();
        self.timing.reset();
        self.pending = None;
        self.sent_at = None;
        self.state = CommState::Idle;
    }

    fn poll_master(&mut self) -> ModbusResult<PollStatus> {
        self.receive()?;

        let (slave_id, sent_at) = match (&self.pending, self.sent_at) {
            (Some(request), Some(sent_at)) => (request.slave_id, sent_at),
            _ => {
                if !self.rx.is_empty() {
                    debug!("Discarding {} unsolicited bytes", self.rx.len());
                    self.rx.clear();
                    self.timing.reset();
                }
                return Ok(PollStatus::Idle);
            }
        };

        let now = self.link.now();
        let in_window = self
            .timing
            .last_byte_at()
            .map_or(false, |at| at.saturating_duration_since(sent_at) <= self.response_timeout);

        if self.timing.is_frame_boundary_elapsed(now) {
            if self.rx.len() < self.config.min_frame_len {
                warn!("Discarding {}-byte fragment", self.rx.len());
                self.rx.clear();
                self.timing.reset();
            } else if in_window {
                return self.complete_response();
            }
        }

        let expired = now.saturating_duration_since(sent_at) > self.response_timeout;
        let frame_in_progress = !self.rx.is_empty() && in_window;
        if expired && !frame_in_progress {
            let timeout_ms = self.response_timeout.as_millis() as u64;
            warn!("No response from slave {} within {}ms", slave_id, timeout_ms);
            return Err(self.fail(ModbusError::timeout("read response", timeout_ms)));
        }

        Ok(PollStatus::Waiting)
    }

    fn complete_response(&mut self) -> ModbusResult<PollStatus> {
        let result = match &self.pending {
            Some(request) => codec::decode_response(self.rx.as_slice(), request),
            None => return Ok(PollStatus::Idle),
        };

        match result {
            Ok(response) => {
                self.reset_transaction();
                self.stats.frames_in += 1;
                self.last_error = None;
                Ok(PollStatus::Response(response))
            }
            Err(e) => {
                if !matches!(e, ModbusError::BadCrc { .. }) {
                    self.stats.frames_in += 1;
                }
                warn!("Response rejected: {}", e);
                Err(self.fail(e))
            }
        }
    }

    fn poll_slave(&mut self, station: SlaveId) -> ModbusResult<PollStatus> {
        self.receive()?;
        if self.rx.is_empty() {
            return Ok(PollStatus::Idle);
        }

        self.state = CommState::Waiting;
        if !self.timing.is_frame_boundary_elapsed(self.link.now()) {
            return Ok(PollStatus::Waiting);
        }

        let mut frame = [0u8; MAX_RTU_FRAME_SIZE];
        let len = self.rx.len();
        frame[..len].copy_from_slice(self.rx.as_slice());
        self.reset_transaction();

        self.handle_request(station, &frame[..len])
    }

    fn handle_request(&mut self, station: SlaveId, frame: &[u8]) -> ModbusResult<PollStatus> {
        if frame.len() < self.config.min_frame_len {
            warn!("Discarding {}-byte fragment", frame.len());
            return Err(self.fail(ModbusError::frame(format!(
                "Frame of {} bytes is below the {}-byte minimum",
                frame.len(),
                self.config.min_frame_len
            ))));
        }

        let raw = match codec::check_frame(frame) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Dropping corrupted frame: {}", e);
                return Err(self.fail(e));
            }
        };

        if raw.address != station && raw.address != BROADCAST_ADDRESS {
            debug!("Frame for station {} ignored", raw.address);
            return Ok(PollStatus::Ignored {
                address: raw.address,
            });
        }
        self.stats.frames_in += 1;

        let broadcast = raw.address == BROADCAST_ADDRESS;
        match self.service(&raw, frame) {
            Ok(Serviced::Skipped) => Ok(PollStatus::Ignored {
                address: raw.address,
            }),
            Ok(Serviced::Applied(request, _)) if broadcast => {
                self.last_error = None;
                Ok(PollStatus::Broadcast(request))
            }
            Ok(Serviced::Applied(_, response)) => {
                let reply = codec::encode_response(&response);
                self.transmit(&reply)?;
                self.last_error = None;
                Ok(PollStatus::Replied {
                    function: raw.function_code,
                    exception: None,
                })
            }
            Err(e) => {
                let exception = ModbusException::from_error(&e);
                let error = ModbusError::exception(raw.function_code, exception.to_u8());
                warn!("Request 0x{:02X} failed: {}", raw.function_code, e);
                self.stats.errors += 1;
                self.last_error = Some(error.clone());

                if broadcast {
                    return Err(error);
                }
                let reply = codec::encode_exception(station, raw.function_code, exception);
                self.transmit(&reply)?;
                Ok(PollStatus::Replied {
                    function: raw.function_code,
                    exception: Some(exception),
                })
            }
        }
    }

    /// Decode and execute a request addressed to this station
    fn service(&self, raw: &RawFrame<'_>, frame: &[u8]) -> ModbusResult<Serviced> {
        self.functions.lookup(raw.function_code)?;
        let request = codec::decode_request(frame)?;
        if request.is_broadcast() && request.function.is_read_function() {
            return Ok(Serviced::Skipped);
        }

        let store = self
            .store
            .as_ref()
            .ok_or_else(|| ModbusError::internal("No data store attached"))?;
        let response = dispatch::execute(&request, store.as_ref())?;
        Ok(Serviced::Applied(request, response))
    }

    fn transmit(&mut self, frame: &[u8]) -> ModbusResult<()> {
        if let Err(e) = self.link.write_bytes(frame) {
            return Err(self.fail(e));
        }
        self.stats.frames_out += 1;
        self.stats.bytes_out += frame.len() as u64;
        Ok(())
    }
}
