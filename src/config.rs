/// Engine configuration
///
/// Everything an engine needs besides its link: role, line speed, response
/// timeout and receive buffer size. Loadable from YAML or JSON.
///
/// ```yaml
/// role:
///   mode: slave
///   station: 17
/// baud_rate: 19200
/// response_timeout_ms: 500
/// ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::codec::FRAME_OVERHEAD;
use crate::error::{ModbusError, ModbusResult};
use crate::protocol::SlaveId;
use crate::timing::{frame_gap_for_baud, TimingMonitor};
use crate::{
    DEFAULT_BAUD_RATE, DEFAULT_TIMEOUT_MS, MAX_RTU_FRAME_SIZE, MAX_SLAVE_ID, MIN_RTU_FRAME_SIZE,
};

/// Bus role of an engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum Role {
    /// Initiates transactions
    Master,
    /// Answers requests addressed to `station`
    Slave { station: SlaveId },
}

impl Role {
    pub fn is_master(&self) -> bool {
        matches!(self, Role::Master)
    }

    /// Station address of a slave
    pub fn station(&self) -> Option<SlaveId> {
        match self {
            Role::Master => None,
            Role::Slave { station } => Some(*station),
        }
    }
}

impl Default for Role {
    fn default() -> Self {
        Role::Master
    }
}

/// RTU engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RtuConfig {
    pub role: Role,
    /// Line speed, used to derive T3.5
    pub baud_rate: u32,
    /// How long a master waits for a response frame
    pub response_timeout_ms: u64,
    /// Receive buffer capacity in bytes
    pub max_buffer_size: usize,
    /// Shortest buffer accepted as a frame once T3.5 elapses
    pub min_frame_len: usize,
    /// Explicit T3.5 in microseconds instead of the baud-derived value
    pub frame_gap_us: Option<u64>,
    /// Trace raw frames on the serial link
    pub packet_logging: bool,
}

impl Default for RtuConfig {
    fn default() -> Self {
        Self {
            role: Role::Master,
            baud_rate: DEFAULT_BAUD_RATE,
            response_timeout_ms: DEFAULT_TIMEOUT_MS,
            max_buffer_size: MAX_RTU_FRAME_SIZE,
            min_frame_len: MIN_RTU_FRAME_SIZE,
            frame_gap_us: None,
            packet_logging: false,
        }
    }
}

impl RtuConfig {
    /// Master at the given baud rate
    pub fn master(baud_rate: u32) -> Self {
        Self {
            baud_rate,
            ..Self::default()
        }
    }

    /// Slave answering as `station` at the given baud rate
    pub fn slave(station: SlaveId, baud_rate: u32) -> Self {
        Self {
            role: Role::Slave { station },
            baud_rate,
            ..Self::default()
        }
    }

    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_max_buffer_size(mut self, size: usize) -> Self {
        self.max_buffer_size = size;
        self
    }

    pub fn with_packet_logging(mut self, enabled: bool) -> Self {
        self.packet_logging = enabled;
        self
    }

    /// Check every field, returning the first violation
    pub fn validate(&self) -> ModbusResult<()> {
        if let Role::Slave { station } = self.role {
            if station == 0 || station > MAX_SLAVE_ID {
                return Err(ModbusError::configuration(format!(
                    "Slave station must be 1..={}, got {}",
                    MAX_SLAVE_ID, station
                )));
            }
        }
        if self.baud_rate == 0 {
            return Err(ModbusError::configuration("Baud rate must be positive"));
        }
        if self.response_timeout_ms == 0 {
            return Err(ModbusError::configuration("Response timeout must be positive"));
        }
        if self.max_buffer_size < MIN_RTU_FRAME_SIZE || self.max_buffer_size > MAX_RTU_FRAME_SIZE {
            return Err(ModbusError::configuration(format!(
                "Buffer size must be {}..={}, got {}",
                MIN_RTU_FRAME_SIZE, MAX_RTU_FRAME_SIZE, self.max_buffer_size
            )));
        }
        if self.min_frame_len < FRAME_OVERHEAD || self.min_frame_len > self.max_buffer_size {
            return Err(ModbusError::configuration(format!(
                "Minimum frame length must be {}..={}, got {}",
                FRAME_OVERHEAD, self.max_buffer_size, self.min_frame_len
            )));
        }
        if self.frame_gap_us == Some(0) {
            return Err(ModbusError::configuration("Frame gap must be positive"));
        }
        Ok(())
    }

    /// Parse and validate a YAML document
    pub fn from_yaml_str(yaml: &str) -> ModbusResult<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate a JSON document
    pub fn from_json_str(json: &str) -> ModbusResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a `.yaml`/`.yml` or `.json` file
    pub fn load<P: AsRef<Path>>(path: P) -> ModbusResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml_str(&contents),
            Some("json") => Self::from_json_str(&contents),
            _ => Err(ModbusError::configuration(format!(
                "Unsupported config format: {}",
                path.display()
            ))),
        }
    }

    /// T3.5 silence that delimits frames
    pub fn frame_gap(&self) -> Duration {
        match self.frame_gap_us {
            Some(us) => Duration::from_micros(us),
            None => frame_gap_for_baud(self.baud_rate),
        }
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    /// Upper bound on the spacing of `RtuEngine::poll` calls
    pub fn poll_interval(&self) -> Duration {
        TimingMonitor::with_frame_gap(self.frame_gap()).poll_interval()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RtuConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.role.is_master());
        assert_eq!(config.frame_gap(), Duration::from_micros(4007));
        assert_eq!(config.response_timeout(), Duration::from_millis(1000));
        assert_eq!(config.poll_interval(), Duration::from_nanos(2_003_500));
    }

    #[test]
    fn test_validation() {
        assert!(RtuConfig::slave(0, 9600).validate().is_err());
        assert!(RtuConfig::slave(248, 9600).validate().is_err());
        assert!(RtuConfig::slave(17, 9600).validate().is_ok());
        assert!(RtuConfig::master(0).validate().is_err());
        assert!(RtuConfig::master(9600).with_max_buffer_size(300).validate().is_err());
        assert!(RtuConfig::master(9600).with_max_buffer_size(4).validate().is_err());

        let config = RtuConfig {
            min_frame_len: 3,
            ..RtuConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ModbusError::Configuration { .. })
        ));
    }

    #[test]
    fn test_frame_gap_override() {
        let config = RtuConfig {
            frame_gap_us: Some(2500),
            ..RtuConfig::master(9600)
        };
        assert_eq!(config.frame_gap(), Duration::from_micros(2500));
        assert_eq!(RtuConfig::master(115200).frame_gap(), Duration::from_micros(1750));
    }

    #[test]
    fn test_from_yaml() {
        let yaml = r#"
role:
  mode: slave
  station: 17
baud_rate: 19200
response_timeout_ms: 500
"#;
        let config = RtuConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.role, Role::Slave { station: 17 });
        assert_eq!(config.baud_rate, 19200);
        assert_eq!(config.max_buffer_size, MAX_RTU_FRAME_SIZE);

        let invalid = "role:\n  mode: slave\n  station: 0\n";
        assert!(RtuConfig::from_yaml_str(invalid).is_err());
    }

    #[test]
    fn test_from_json() {
        let json = r#"{"role": {"mode": "master"}, "baud_rate": 115200, "packet_logging": true}"#;
        let config = RtuConfig::from_json_str(json).unwrap();
        assert!(config.role.is_master());
        assert!(config.packet_logging);

        assert!(matches!(
            RtuConfig::from_json_str("{not json"),
            Err(ModbusError::Configuration { .. })
        ));
    }

    #[test]
    fn test_load_rejects_unknown_extension() {
        let path = std::env::temp_dir().join("voltage_rtu_config_test.toml");
        std::fs::write(&path, "baud_rate = 9600").unwrap();
        assert!(matches!(
            RtuConfig::load(&path),
            Err(ModbusError::Configuration { .. })
        ));
        let _ = std::fs::remove_file(&path);
    }
}
