/// Callback logging for RTU transactions
///
/// Applications that want request/response traces without wiring up a `log`
/// backend hand a closure to [`CallbackLogger`]. Packets are shown as RTU
/// frames (`Raw`), as decoded fields (`Interpreted`), or both.

use std::sync::Arc;

use crate::codec;
use crate::protocol::{ModbusFunction, ModbusRequest, ModbusResponse};
use crate::utils::format::bytes_to_hex;

/// Log levels for the callback logging system
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
}

/// Logging mode for packet display
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoggingMode {
    /// RTU frame bytes including CRC
    Raw,
    /// Decoded fields
    Interpreted,
    /// Interpreted at info level, raw at debug level
    Both,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
        }
    }
}

/// Type alias for log callback functions
pub type LogCallback = Box<dyn Fn(LogLevel, &str) + Send + Sync>;

/// Logger that uses callbacks for flexible logging
#[derive(Clone)]
pub struct CallbackLogger {
    callback: Option<Arc<LogCallback>>,
    min_level: LogLevel,
    mode: LoggingMode,
}

impl CallbackLogger {
    pub fn new(callback: Option<LogCallback>, min_level: LogLevel) -> Self {
        Self::with_mode(callback, min_level, LoggingMode::Interpreted)
    }

    pub fn with_mode(callback: Option<LogCallback>, min_level: LogLevel, mode: LoggingMode) -> Self {
        Self {
            callback: callback.map(Arc::new),
            min_level,
            mode,
        }
    }

    /// Timestamped output on stdout/stderr
    pub fn console() -> Self {
        let callback: LogCallback = Box::new(|level, message| {
            let timestamp = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S%.3f");
            match level {
                LogLevel::Error | LogLevel::Warn => {
                    eprintln!("[{}] {}: {}", timestamp, level.as_str(), message)
                }
                LogLevel::Info | LogLevel::Debug => {
                    println!("[{}] {}: {}", timestamp, level.as_str(), message)
                }
            }
        });
        Self::new(Some(callback), LogLevel::Info)
    }

    pub fn disabled() -> Self {
        Self::new(None, LogLevel::Error)
    }

    pub fn set_mode(&mut self, mode: LoggingMode) {
        self.mode = mode;
    }

    pub fn get_mode(&self) -> LoggingMode {
        self.mode
    }

    pub fn log(&self, level: LogLevel, message: &str) {
        if self.should_log(level) {
            if let Some(ref callback) = self.callback {
                callback(level, message);
            }
        }
    }

    pub fn error(&self, message: &str) {
        self.log(LogLevel::Error, message);
    }

    pub fn warn(&self, message: &str) {
        self.log(LogLevel::Warn, message);
    }

    pub fn info(&self, message: &str) {
        self.log(LogLevel::Info, message);
    }

    pub fn debug(&self, message: &str) {
        self.log(LogLevel::Debug, message);
    }

    fn should_log(&self, level: LogLevel) -> bool {
        self.callback.is_some() && level as u8 <= self.min_level as u8
    }

    /// Log packet data with hex dump
    pub fn log_packet(&self, level: LogLevel, direction: &str, data: &[u8]) {
        if !self.should_log(level) {
            return;
        }
        let message = format!("{} packet ({} bytes): {}", direction, data.len(), bytes_to_hex(data));
        self.log(level, &message);
    }

    /// Log an outgoing request
    pub fn log_request(&self, request: &ModbusRequest) {
        let interpreted = || {
            format!(
                "Modbus Request -> Slave: {}, Function: {}, Address: {}, Quantity: {}",
                request.slave_id, request.function, request.address, request.quantity
            )
        };
        let raw = || {
            let frame = codec::encode_request(request).map(|f| bytes_to_hex(&f));
            format!(
                "Modbus Request -> Raw: {}",
                frame.unwrap_or_else(|e| format!("<unencodable: {}>", e))
            )
        };
        self.emit(interpreted, raw);
    }

    /// Log an incoming response
    pub fn log_response(&self, response: &ModbusResponse) {
        let interpreted = || {
            let detail = match response.exception {
                Some(exception) => exception.to_string(),
                None => interpret_response_data(response.function, &response.data),
            };
            format!(
                "Modbus Response <- Slave: {}, Function: {}, {}",
                response.slave_id, response.function, detail
            )
        };
        let raw = || {
            format!(
                "Modbus Response <- Raw: {}",
                bytes_to_hex(&codec::encode_response(response))
            )
        };
        self.emit(interpreted, raw);
    }

    fn emit(&self, interpreted: impl Fn() -> String, raw: impl Fn() -> String) {
        match self.mode {
            LoggingMode::Raw => {
                if self.should_log(LogLevel::Info) {
                    self.info(&raw());
                }
            }
            LoggingMode::Interpreted => {
                if self.should_log(LogLevel::Info) {
                    self.info(&interpreted());
                }
            }
            LoggingMode::Both => {
                if self.should_log(LogLevel::Info) {
                    self.info(&interpreted());
                }
                if self.should_log(LogLevel::Debug) {
                    self.debug(&raw());
                }
            }
        }
    }
}

/// Describe a response payload by function
fn interpret_response_data(function: ModbusFunction, data: &[u8]) -> String {
    if data.is_empty() {
        return "No data".to_string();
    }

    match function {
        ModbusFunction::ReadCoils | ModbusFunction::ReadDiscreteInputs => {
            let byte_count = data[0];
            let bits: Vec<bool> = data[1..]
                .iter()
                .flat_map(|byte| (0..8).map(move |bit| byte & (1 << bit) != 0))
                .take(16)
                .collect();
            format!("Byte count: {}, Bits: {:?}", byte_count, bits)
        }
        ModbusFunction::ReadHoldingRegisters | ModbusFunction::ReadInputRegisters => {
            let byte_count = data[0];
            let registers: Vec<u16> = data[1..]
                .chunks_exact(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                .take(8)
                .collect();
            format!("Byte count: {}, Registers: {:?}", byte_count, registers)
        }
        _ if data.len() == 4 => {
            let address = u16::from_be_bytes([data[0], data[1]]);
            let value = u16::from_be_bytes([data[2], data[3]]);
            match function {
                ModbusFunction::WriteSingleCoil => format!(
                    "Address: {}, Value: 0x{:04X} ({})",
                    address,
                    value,
                    if value == 0xFF00 { "ON" } else { "OFF" }
                ),
                ModbusFunction::WriteSingleRegister => {
                    format!("Address: {}, Value: {} (0x{:04X})", address, value, value)
                }
                _ => format!("Address: {}, Quantity: {}", address, value),
            }
        }
        _ => format!("Data: {}", hex::encode(data)),
    }
}

impl Default for CallbackLogger {
    fn default() -> Self {
        Self::disabled()
    }
}

/// Convenience macro for creating a simple console logger
#[macro_export]
macro_rules! console_logger {
    () => {
        $crate::logging::CallbackLogger::console()
    };
}

/// Convenience macro for creating a custom logger
#[macro_export]
macro_rules! custom_logger {
    ($callback:expr) => {
        $crate::logging::CallbackLogger::new(Some($callback), $crate::logging::LogLevel::Info)
    };
    ($callback:expr, $level:expr) => {
        $crate::logging::CallbackLogger::new(Some($callback), $level)
    };
    ($callback:expr, $level:expr, $mode:expr) => {
        $crate::logging::CallbackLogger::with_mode(Some($callback), $level, $mode)
    };
}
