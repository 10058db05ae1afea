//! # Voltage RTU - Poll-Driven Modbus RTU Protocol Engine
//!
//! **Author:** Evan Liu <evan.liu@voltageenergy.com>
//! **License:** MIT
//!
//! A Modbus RTU master/slave engine for half-duplex serial buses (RS-232,
//! RS-485). The engine is a non-blocking state machine: it frames on the
//! T3.5 silence interval, checks CRC-16/MODBUS, and runs one transaction at a
//! time. Callers drive it by calling `poll()` from a loop, a timer or an
//! async task.
//!
//! ## Features
//!
//! - **Deterministic**: all timing comes from the link's clock, so tests run on a hand-advanced [`ManualClock`]
//! - **Both roles**: master `query`/`poll`, reactive slave backed by a [`DataStore`]
//! - **Bounded memory**: fixed receive arena, overflow drops the frame
//! - **Broadcast**: address 0 writes applied by every slave, never answered
//! - **Async drivers**: [`ModbusRtuClient`] and [`ModbusRtuServer`] on tokio
//!
//! ## Supported Function Codes
//!
//! | Code | Function | Master | Slave |
//! |------|----------|--------|-------|
//! | 0x01 | Read Coils | ✅ | ✅ |
//! | 0x02 | Read Discrete Inputs | ✅ | ✅ |
//! | 0x03 | Read Holding Registers | ✅ | ✅ |
//! | 0x04 | Read Input Registers | ✅ | ✅ |
//! | 0x05 | Write Single Coil | ✅ | ✅ |
//! | 0x06 | Write Single Register | ✅ | ✅ |
//! | 0x0F | Write Multiple Coils | ✅ | ✅ |
//! | 0x10 | Write Multiple Registers | ✅ | ✅ |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use voltage_rtu::{ModbusClient, ModbusResult, ModbusRtuClient, RtuConfig};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> ModbusResult<()> {
//!     let config = RtuConfig::master(9600).with_response_timeout(Duration::from_millis(500));
//!     let mut client = ModbusRtuClient::open("/dev/ttyUSB0", config)?;
//!
//!     let values = client.read_03(1, 0, 10).await?;
//!     println!("Read registers: {:?}", values);
//!
//!     client.write_06(1, 100, 0x1234).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐    ┌─────────────────┐
//! │ ModbusRtuClient │    │ ModbusRtuServer │   async drivers (optional)
//! └─────────────────┘    └─────────────────┘
//!          │                       │
//! ┌─────────────────┐    ┌─────────────────┐
//! │ RtuEngine       │    │ RtuEngine       │   IDLE/WAITING, T3.5, CRC
//! │ (master)        │    │ (slave)         │──► DataStore
//! └─────────────────┘    └─────────────────┘
//!          │                       │
//! ┌─────────────────┐    ┌─────────────────┐
//! │ SerialLink      │◄──►│ SerialLink      │   serial port or memory bus
//! └─────────────────┘    └─────────────────┘
//! ```

/// Core error types and result handling
pub mod error;

/// CRC-16/MODBUS
pub mod crc;

/// T3.5 frame boundary detection
pub mod timing;

/// Fixed-capacity receive buffer
pub mod buffer;

/// Modbus protocol definitions and message handling
pub mod protocol;

/// RTU frame encoding and decoding
pub mod codec;

/// Function code table and slave request execution
pub mod dispatch;

/// Thread-safe register storage for slave applications
pub mod register_bank;

/// Serial links: physical ports and in-memory buses
pub mod transport;

/// Transaction state machine
pub mod engine;

/// Engine configuration
pub mod config;

/// Async master driver
pub mod client;

/// Async slave driver
pub mod server;

/// Utility functions and performance monitoring
pub mod utils;

/// Callback logging for requests and responses
pub mod logging;

// Re-export main types for convenience
pub use error::{ErrorCode, ModbusError, ModbusResult};
pub use protocol::{ModbusException, ModbusFunction, ModbusRequest, ModbusResponse, SlaveId};
pub use dispatch::FunctionTable;
pub use engine::{CommState, EngineStats, PollStatus, RtuEngine};
pub use config::{Role, RtuConfig};
pub use timing::{ManualClock, TimingMonitor};
pub use transport::{MemoryLink, SerialLink, SerialPortLink, StreamLink};
pub use client::{ClientStats, ModbusClient, ModbusRtuClient};
pub use server::{ModbusRtuServer, ModbusServer, ServerStats};
pub use register_bank::{DataKind, DataStore, ModbusRegisterBank, RegisterBankStats};
pub use utils::{OperationTimer, PerformanceMetrics};
pub use logging::{CallbackLogger, LogCallback, LogLevel, LoggingMode};

/// Default master response timeout
pub const DEFAULT_TIMEOUT_MS: u64 = 1000;

/// Default line speed
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Maximum number of coils or discrete inputs in a single read
pub const MAX_COILS_PER_REQUEST: u16 = 2000;

/// Maximum number of registers in a single read
pub const MAX_REGISTERS_PER_REQUEST: u16 = 125;

/// Maximum number of coils in a single 0x0F write
pub const MAX_WRITE_COILS: u16 = 1968;

/// Maximum number of registers in a single 0x10 write
pub const MAX_WRITE_REGISTERS: u16 = 123;

/// Maximum Modbus RTU frame size
pub const MAX_RTU_FRAME_SIZE: usize = 256;

/// Smallest complete RTU frame (exception response)
pub const MIN_RTU_FRAME_SIZE: usize = 5;

/// Address every slave accepts and none answers
pub const BROADCAST_ADDRESS: u8 = 0;

/// Highest unicast station address
pub const MAX_SLAVE_ID: u8 = 247;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get library information
pub fn info() -> String {
    format!("Voltage RTU v{} - Modbus RTU protocol engine by Evan Liu", VERSION)
}
