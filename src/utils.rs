/// Utility functions and helpers
///
/// Validation shortcuts, display formatting and operation timing shared by
/// the drivers and binaries.

use log::{debug, info, warn};
use serde::Serialize;
use std::time::{Duration, Instant};

use crate::error::{ModbusError, ModbusResult};

/// Latency and outcome counters for request/response operations
#[derive(Debug, Clone, Default, Serialize)]
pub struct PerformanceMetrics {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub total_duration: Duration,
    pub min_duration: Option<Duration>,
    pub max_duration: Option<Duration>,
    pub avg_duration: Duration,
}

impl PerformanceMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&mut self, duration: Duration) {
        self.successful_requests += 1;
        self.min_duration = Some(self.min_duration.map_or(duration, |min| min.min(duration)));
        self.max_duration = Some(self.max_duration.map_or(duration, |max| max.max(duration)));
        self.record(duration);
    }

    pub fn record_failure(&mut self, duration: Duration) {
        self.failed_requests += 1;
        self.record(duration);
    }

    fn record(&mut self, duration: Duration) {
        self.total_requests += 1;
        self.total_duration += duration;
        self.avg_duration = self.total_duration / self.total_requests as u32;
    }

    /// Success rate as a percentage
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            return 0.0;
        }
        (self.successful_requests as f64 / self.total_requests as f64) * 100.0
    }

    pub fn requests_per_second(&self) -> f64 {
        if self.total_duration.is_zero() {
            return 0.0;
        }
        self.total_requests as f64 / self.total_duration.as_secs_f64()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Timer for measuring operation duration
pub struct OperationTimer {
    start: Instant,
    operation_name: String,
}

impl OperationTimer {
    pub fn start(operation_name: &str) -> Self {
        debug!("Starting operation: {}", operation_name);
        Self {
            start: Instant::now(),
            operation_name: operation_name.to_string(),
        }
    }

    pub fn stop(self) -> Duration {
        let duration = self.start.elapsed();
        debug!("Operation '{}' completed in {:?}", self.operation_name, duration);
        duration
    }

    /// Stop and log the outcome at info/warn level
    pub fn stop_and_log(self, success: bool) -> Duration {
        let duration = self.start.elapsed();
        if success {
            info!("Operation '{}' succeeded in {:?}", self.operation_name, duration);
        } else {
            warn!("Operation '{}' failed after {:?}", self.operation_name, duration);
        }
        duration
    }
}

/// Data validation utilities
pub mod validation {
    use super::*;
    use crate::MAX_SLAVE_ID;

    /// Unicast station address (1-247)
    pub fn validate_slave_id(slave_id: u8) -> ModbusResult<()> {
        if slave_id == 0 || slave_id > MAX_SLAVE_ID {
            return Err(ModbusError::invalid_data(format!(
                "Invalid slave ID: {} (must be 1-{})",
                slave_id, MAX_SLAVE_ID
            )));
        }
        Ok(())
    }

    /// Range must be non-empty and stay inside the 16-bit address space
    pub fn validate_address_range(start: u16, count: u16) -> ModbusResult<()> {
        if count == 0 || (start as u32 + count as u32) > 65536 {
            return Err(ModbusError::invalid_address(start, count));
        }
        Ok(())
    }

    /// Standard baud rates for RS-485 Modbus networks
    pub fn validate_baud_rate(baud_rate: u32) -> ModbusResult<()> {
        const STANDARD: [u32; 9] = [1200, 2400, 4800, 9600, 19200, 38400, 57600, 115200, 230400];
        if !STANDARD.contains(&baud_rate) {
            return Err(ModbusError::configuration(format!(
                "Non-standard baud rate: {}",
                baud_rate
            )));
        }
        Ok(())
    }
}

/// Formatting and display utilities
pub mod format {
    use super::*;

    /// Bytes as space-separated upper-case hex
    pub fn bytes_to_hex(bytes: &[u8]) -> String {
        bytes
            .iter()
            .map(|b| format!("{:02X}", b))
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn registers_to_hex(registers: &[u16]) -> String {
        registers
            .iter()
            .map(|r| format!("{:04X}", r))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Parse hex written with or without separating spaces
    pub fn hex_to_bytes(text: &str) -> ModbusResult<Vec<u8>> {
        let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
        hex::decode(&compact).map_err(|e| ModbusError::invalid_data(format!("Invalid hex: {}", e)))
    }

    /// Human-readable duration; sub-millisecond values are shown in microseconds
    pub fn format_duration(duration: Duration) -> String {
        let micros = duration.as_micros();
        if micros < 1000 {
            format!("{}us", micros)
        } else if micros < 1_000_000 {
            format!("{}ms", duration.as_millis())
        } else if micros < 60_000_000 {
            format!("{:.2}s", duration.as_secs_f64())
        } else {
            let millis = duration.as_millis();
            format!("{}m {:.1}s", millis / 60_000, (millis % 60_000) as f64 / 1000.0)
        }
    }

    pub fn format_metrics(metrics: &PerformanceMetrics) -> String {
        format!(
            "Performance Metrics:\n\
             ├─ Total Requests: {}\n\
             ├─ Successful: {} ({:.1}%)\n\
             ├─ Failed: {}\n\
             ├─ Average Duration: {}\n\
             ├─ Min Duration: {}\n\
             └─ Max Duration: {}",
            metrics.total_requests,
            metrics.successful_requests,
            metrics.success_rate(),
            metrics.failed_requests,
            format_duration(metrics.avg_duration),
            metrics.min_duration.map_or("N/A".to_string(), format_duration),
            metrics.max_duration.map_or("N/A".to_string(), format_duration),
        )
    }
}

/// Logging utilities
pub mod logging {
    /// Initialize env_logger for tests; repeated calls are harmless
    pub fn init_test_logger() {
        let _ = env_logger::builder()
            .filter_level(log::LevelFilter::Debug)
            .is_test(true)
            .try_init();
    }
}
