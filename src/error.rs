//! # Voltage RTU Error Handling
//!
//! Every failure the engine can report is a [`ModbusError`]. The variants fall
//! into three groups:
//!
//! ### Engine taxonomy
//! - **NotMaster**: a master-only operation was invoked on a slave instance
//! - **Polling**: a transaction is already outstanding on the bus
//! - **BufferOverflow**: more bytes arrived than the receive arena can hold
//! - **BadCrc**: the frame checksum did not match
//! - **Exception**: the peer answered (or must be answered) with a Modbus exception
//!
//! These five map onto the closed [`ErrorCode`] enumeration through
//! [`ModbusError::code`], which is what `RtuEngine::last_error` callers
//! usually match on.
//!
//! ### Transport errors
//! - **I/O Errors**: serial port read/write failures
//! - **Timeout Errors**: the response window elapsed without a frame
//!
//! ### Data errors
//! - **Invalid Function / Address / Data**: request validation failures, which a
//!   slave turns into exception replies
//! - **Frame / Configuration / Internal**
//!
//! All errors are transaction scoped. After any of them the engine is back in
//! `CommState::Idle` and ready for the next frame.
//!
//! ```rust
//! use voltage_rtu::{ErrorCode, ModbusError};
//!
//! fn describe(error: &ModbusError) -> &'static str {
//!     match error.code() {
//!         Some(ErrorCode::BadCrc) => "line noise, retry",
//!         Some(ErrorCode::Polling) => "wait for the current transaction",
//!         Some(_) => "protocol failure",
//!         None if error.is_recoverable() => "transient, retry",
//!         None => "fatal",
//!     }
//! }
//!
//! assert_eq!(describe(&ModbusError::bad_crc(0x1234, 0x4321)), "line noise, retry");
//! ```

use std::fmt;
use thiserror::Error;

/// Result type alias for Modbus operations
pub type ModbusResult<T> = Result<T, ModbusError>;

/// Closed set of transaction error codes reported by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Operation requires the master role
    NotMaster,
    /// A transaction is already in progress
    Polling,
    /// Received frame exceeded the receive buffer
    BufferOverflow,
    /// Checksum mismatch
    BadCrc,
    /// Function-level exception (returned by the peer or required of us)
    Exception,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCode::NotMaster => "NOT_MASTER",
            ErrorCode::Polling => "POLLING",
            ErrorCode::BufferOverflow => "BUFFER_OVERFLOW",
            ErrorCode::BadCrc => "BAD_CRC",
            ErrorCode::Exception => "EXCEPTION",
        };
        f.write_str(name)
    }
}

/// Modbus RTU error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModbusError {
    /// The operation is only valid on a master-role engine
    #[error("Operation requires master role")]
    NotMaster,

    /// A request is already outstanding; RTU allows exactly one at a time
    #[error("Transaction already in progress")]
    Polling,

    /// Receive buffer overflow
    ///
    /// The accumulated frame grew beyond the configured buffer capacity before a
    /// frame boundary was seen. The buffer is reset and nothing is transmitted.
    #[error("Receive buffer overflow: {received} bytes exceed capacity of {capacity}")]
    BufferOverflow { received: usize, capacity: usize },

    /// CRC validation failure
    ///
    /// `expected` is the checksum computed over the received bytes, `actual`
    /// is the checksum carried in the frame.
    #[error("CRC validation failed: expected={expected:04X}, actual={actual:04X}")]
    BadCrc { expected: u16, actual: u16 },

    /// Modbus exception response
    ///
    /// # Standard Exception Codes
    /// - 0x01: Illegal Function
    /// - 0x02: Illegal Data Address
    /// - 0x03: Illegal Data Value
    /// - 0x04: Slave Device Failure
    /// - 0x05: Acknowledge
    /// - 0x06: Slave Device Busy
    /// - 0x08: Memory Parity Error
    /// - 0x0A: Gateway Path Unavailable
    /// - 0x0B: Gateway Target Device Failed to Respond
    #[error("Modbus exception: function={function:02X}, code={code:02X} ({message})")]
    Exception { function: u8, code: u8, message: String },

    /// I/O related errors on the serial link
    #[error("I/O error: {message}")]
    Io { message: String },

    /// No frame boundary was detected inside the response window
    #[error("Timeout after {timeout_ms}ms: {operation}")]
    Timeout { operation: String, timeout_ms: u64 },

    /// Structurally invalid frame (too short, wrong length, unexpected echo)
    #[error("Frame error: {message}")]
    Frame { message: String },

    /// Function code outside the supported table
    #[error("Invalid function code: {code:#04X}")]
    InvalidFunction { code: u8 },

    /// Address range rejected by the data store
    #[error("Invalid address: start={start}, count={count}")]
    InvalidAddress { start: u16, count: u16 },

    /// Data value or quantity outside protocol limits
    #[error("Invalid data: {message}")]
    InvalidData { message: String },

    /// Engine or driver misconfiguration
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Internal errors (poisoned locks, unreachable states)
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl ModbusError {
    /// Create a new I/O error
    pub fn io<S: Into<String>>(message: S) -> Self {
        Self::Io { message: message.into() }
    }

    /// Create a new timeout error
    pub fn timeout<S: Into<String>>(operation: S, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Create a buffer overflow error
    pub fn buffer_overflow(received: usize, capacity: usize) -> Self {
        Self::BufferOverflow { received, capacity }
    }

    /// Create a CRC mismatch error
    pub fn bad_crc(expected: u16, actual: u16) -> Self {
        Self::BadCrc { expected, actual }
    }

    /// Create a Modbus exception error
    ///
    /// Standard exception codes are mapped to human-readable messages.
    pub fn exception(function: u8, code: u8) -> Self {
        let message = match code {
            0x01 => "Illegal Function",
            0x02 => "Illegal Data Address",
            0x03 => "Illegal Data Value",
            0x04 => "Slave Device Failure",
            0x05 => "Acknowledge",
            0x06 => "Slave Device Busy",
            0x08 => "Memory Parity Error",
            0x0A => "Gateway Path Unavailable",
            0x0B => "Gateway Target Device Failed to Respond",
            _ => "Unknown Exception",
        }
        .to_string();

        Self::Exception { function, code, message }
    }

    /// Create a frame error
    pub fn frame<S: Into<String>>(message: S) -> Self {
        Self::Frame { message: message.into() }
    }

    /// Create an invalid function error
    pub fn invalid_function(code: u8) -> Self {
        Self::InvalidFunction { code }
    }

    /// Create an invalid address error
    pub fn invalid_address(start: u16, count: u16) -> Self {
        Self::InvalidAddress { start, count }
    }

    /// Create an invalid data error
    pub fn invalid_data<S: Into<String>>(message: S) -> Self {
        Self::InvalidData { message: message.into() }
    }

    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal { message: message.into() }
    }

    /// Map onto the engine's closed error taxonomy
    ///
    /// Returns `None` for errors outside the five transaction codes, such as
    /// timeouts and I/O failures.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Self::NotMaster => Some(ErrorCode::NotMaster),
            Self::Polling => Some(ErrorCode::Polling),
            Self::BufferOverflow { .. } => Some(ErrorCode::BufferOverflow),
            Self::BadCrc { .. } => Some(ErrorCode::BadCrc),
            Self::Exception { .. } => Some(ErrorCode::Exception),
            _ => None,
        }
    }

    /// Check if the error is recoverable (can retry)
    ///
    /// Line noise and timeouts are the normal failure signals on a shared RTU
    /// bus, so CRC and overflow failures count as retryable.
    ///
    /// ```rust
    /// use voltage_rtu::ModbusError;
    ///
    /// assert!(ModbusError::timeout("read response", 1000).is_recoverable());
    /// assert!(!ModbusError::NotMaster.is_recoverable());
    /// ```
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Io { .. } => true,
            Self::Timeout { .. } => true,
            Self::Polling => true,
            Self::BadCrc { .. } => true,
            Self::BufferOverflow { .. } => true,
            Self::Exception { code, .. } => matches!(code, 0x05 | 0x06), // Acknowledge, Busy
            _ => false,
        }
    }

    /// Check if the error is a transport issue
    pub fn is_transport_error(&self) -> bool {
        matches!(self, Self::Io { .. } | Self::Timeout { .. })
    }

    /// Check if the error is a protocol issue
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidFunction { .. }
                | Self::Exception { .. }
                | Self::Frame { .. }
                | Self::BadCrc { .. }
                | Self::BufferOverflow { .. }
        )
    }
}

impl From<std::io::Error> for ModbusError {
    fn from(err: std::io::Error) -> Self {
        Self::io(err.to_string())
    }
}

/// Tokio's elapsed error carries no duration; callers that know the timeout
/// should build `ModbusError::timeout` themselves.
impl From<tokio::time::error::Elapsed> for ModbusError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Self::timeout("Operation timeout", 0)
    }
}

impl From<serde_json::Error> for ModbusError {
    fn from(err: serde_json::Error) -> Self {
        Self::configuration(format!("JSON error: {}", err))
    }
}

impl From<serde_yaml::Error> for ModbusError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::configuration(format!("YAML error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(ModbusError::NotMaster.code(), Some(ErrorCode::NotMaster));
        assert_eq!(ModbusError::Polling.code(), Some(ErrorCode::Polling));
        assert_eq!(
            ModbusError::buffer_overflow(257, 256).code(),
            Some(ErrorCode::BufferOverflow)
        );
        assert_eq!(ModbusError::bad_crc(1, 2).code(), Some(ErrorCode::BadCrc));
        assert_eq!(
            ModbusError::exception(0x03, 0x02).code(),
            Some(ErrorCode::Exception)
        );
        assert_eq!(ModbusError::timeout("read response", 1000).code(), None);
    }

    #[test]
    fn test_error_classification() {
        let err = ModbusError::timeout("read response", 1000);
        assert!(err.is_recoverable());
        assert!(err.is_transport_error());

        let err = ModbusError::exception(0x03, 0x02);
        assert!(!err.is_recoverable());
        assert!(err.is_protocol_error());

        assert!(ModbusError::exception(0x03, 0x06).is_recoverable());
        assert!(!ModbusError::configuration("bad baud").is_recoverable());
    }

    #[test]
    fn test_error_display() {
        let msg = ModbusError::bad_crc(0x1234, 0x5678).to_string();
        assert!(msg.contains("CRC validation failed"));
        assert!(msg.contains("1234"));
        assert!(msg.contains("5678"));

        let msg = ModbusError::exception(0x03, 0x02).to_string();
        assert!(msg.contains("Illegal Data Address"));

        assert_eq!(ErrorCode::BufferOverflow.to_string(), "BUFFER_OVERFLOW");
    }
}
