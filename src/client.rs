/// Async master driver
///
/// [`ModbusRtuClient`] wraps a master [`RtuEngine`]: each call sends one
/// request with `query` and then polls the engine every `poll_interval` until
/// the response, an exception or the response timeout ends the transaction.
/// There are no retries; a failed call leaves the engine IDLE and ready.

use async_trait::async_trait;
use serde::Serialize;

use crate::config::RtuConfig;
use crate::engine::{EngineStats, PollStatus, RtuEngine};
use crate::error::{ModbusError, ModbusResult};
use crate::logging::CallbackLogger;
use crate::protocol::{ModbusFunction, ModbusRequest, ModbusResponse, SlaveId};
use crate::transport::{SerialLink, SerialPortLink};
use crate::utils::{OperationTimer, PerformanceMetrics};

/// Trait defining the interface for Modbus master operations
///
/// Methods are named after their function codes.
#[async_trait]
pub trait ModbusClient: Send {
    /// Read coils (function code 0x01)
    async fn read_01(&mut self, slave_id: SlaveId, address: u16, quantity: u16) -> ModbusResult<Vec<bool>>;

    /// Read discrete inputs (function code 0x02)
    async fn read_02(&mut self, slave_id: SlaveId, address: u16, quantity: u16) -> ModbusResult<Vec<bool>>;

    /// Read holding registers (function code 0x03)
    async fn read_03(&mut self, slave_id: SlaveId, address: u16, quantity: u16) -> ModbusResult<Vec<u16>>;

    /// Read input registers (function code 0x04)
    async fn read_04(&mut self, slave_id: SlaveId, address: u16, quantity: u16) -> ModbusResult<Vec<u16>>;

    /// Write single coil (function code 0x05)
    async fn write_05(&mut self, slave_id: SlaveId, address: u16, value: bool) -> ModbusResult<()>;

    /// Write single register (function code 0x06)
    async fn write_06(&mut self, slave_id: SlaveId, address: u16, value: u16) -> ModbusResult<()>;

    /// Write multiple coils (function code 0x0F)
    async fn write_0f(&mut self, slave_id: SlaveId, address: u16, values: &[bool]) -> ModbusResult<()>;

    /// Write multiple registers (function code 0x10)
    async fn write_10(&mut self, slave_id: SlaveId, address: u16, values: &[u16]) -> ModbusResult<()>;

    /// Whether the client still accepts requests
    fn is_connected(&self) -> bool;

    /// Stop accepting requests
    async fn close(&mut self) -> ModbusResult<()>;

    fn get_stats(&self) -> ClientStats;

    async fn read_coils(&mut self, slave_id: SlaveId, address: u16, quantity: u16) -> ModbusResult<Vec<bool>> {
        self.read_01(slave_id, address, quantity).await
    }

    async fn read_discrete_inputs(&mut self, slave_id: SlaveId, address: u16, quantity: u16) -> ModbusResult<Vec<bool>> {
        self.read_02(slave_id, address, quantity).await
    }

    async fn read_holding_registers(&mut self, slave_id: SlaveId, address: u16, quantity: u16) -> ModbusResult<Vec<u16>> {
        self.read_03(slave_id, address, quantity).await
    }

    async fn read_input_registers(&mut self, slave_id: SlaveId, address: u16, quantity: u16) -> ModbusResult<Vec<u16>> {
        self.read_04(slave_id, address, quantity).await
    }

    async fn write_single_coil(&mut self, slave_id: SlaveId, address: u16, value: bool) -> ModbusResult<()> {
        self.write_05(slave_id, address, value).await
    }

    async fn write_single_register(&mut self, slave_id: SlaveId, address: u16, value: u16) -> ModbusResult<()> {
        self.write_06(slave_id, address, value).await
    }

    async fn write_multiple_coils(&mut self, slave_id: SlaveId, address: u16, values: &[bool]) -> ModbusResult<()> {
        self.write_0f(slave_id, address, values).await
    }

    async fn write_multiple_registers(&mut self, slave_id: SlaveId, address: u16, values: &[u16]) -> ModbusResult<()> {
        self.write_10(slave_id, address, values).await
    }
}

/// Engine counters plus per-call latency
#[derive(Debug, Clone, Default, Serialize)]
pub struct ClientStats {
    pub engine: EngineStats,
    pub metrics: PerformanceMetrics,
}

/// Modbus RTU master over any [`SerialLink`]
pub struct ModbusRtuClient<L: SerialLink> {
    engine: RtuEngine<L>,
    logger: Option<CallbackLogger>,
    metrics: PerformanceMetrics,
    closed: bool,
}

impl ModbusRtuClient<SerialPortLink> {
    /// Open a serial port and build a master on it
    pub fn open(port: &str, config: RtuConfig) -> ModbusResult<Self> {
        let link = SerialPortLink::open(port, config.baud_rate)?;
        Self::new(link, config)
    }
}

impl<L: SerialLink> ModbusRtuClient<L> {
    /// Build a master engine over `link`; `config` must describe a master
    pub fn new(link: L, config: RtuConfig) -> ModbusResult<Self> {
        if !config.role.is_master() {
            return Err(ModbusError::configuration("Client requires a master configuration"));
        }
        Ok(Self::from_engine(RtuEngine::new(link, config)?))
    }

    pub fn from_engine(engine: RtuEngine<L>) -> Self {
        Self {
            engine,
            logger: None,
            metrics: PerformanceMetrics::new(),
            closed: false,
        }
    }

    pub fn with_logger(mut self, logger: CallbackLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn engine(&self) -> &RtuEngine<L> {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut RtuEngine<L> {
        &mut self.engine
    }

    pub fn into_engine(self) -> RtuEngine<L> {
        self.engine
    }

    /// Run one transaction
    ///
    /// Returns `None` for broadcast requests, which get no response.
    pub async fn execute_request(&mut self, request: ModbusRequest) -> ModbusResult<Option<ModbusResponse>> {
        if self.closed {
            return Err(ModbusError::io("Client is closed"));
        }
        if let Some(ref logger) = self.logger {
            logger.log_request(&request);
        }

        let timer = OperationTimer::start(&format!("{} slave {}", request.function, request.slave_id));
        let result = self.transact(&request).await;
        let duration = timer.stop();

        match &result {
            Ok(response) => {
                self.metrics.record_success(duration);
                if let (Some(logger), Some(response)) = (&self.logger, response) {
                    logger.log_response(response);
                }
            }
            Err(e) => {
                self.metrics.record_failure(duration);
                if let Some(ref logger) = self.logger {
                    logger.warn(&format!("Request to slave {} failed: {}", request.slave_id, e));
                }
            }
        }
        result
    }

    async fn transact(&mut self, request: &ModbusRequest) -> ModbusResult<Option<ModbusResponse>> {
        self.engine.query(request)?;
        if request.is_broadcast() {
            return Ok(None);
        }

        let interval = self.engine.poll_interval();
        loop {
            match self.engine.poll()? {
                PollStatus::Response(response) => return Ok(Some(response)),
                PollStatus::Waiting => tokio::time::sleep(interval).await,
                other => {
                    return Err(ModbusError::internal(format!(
                        "Unexpected master poll status: {:?}",
                        other
                    )))
                }
            }
        }
    }

    /// Unicast request whose response is required
    async fn expect_response(&mut self, request: ModbusRequest) -> ModbusResult<ModbusResponse> {
        self.execute_request(request)
            .await?
            .ok_or_else(|| ModbusError::invalid_data("Broadcast requests cannot read data"))
    }

    async fn read_bits(
        &mut self,
        slave_id: SlaveId,
        function: ModbusFunction,
        address: u16,
        quantity: u16,
    ) -> ModbusResult<Vec<bool>> {
        let request = ModbusRequest::new_read(slave_id, function, address, quantity);
        let mut bits = self.expect_response(request).await?.parse_bits()?;
        bits.truncate(quantity as usize);
        Ok(bits)
    }

    async fn read_registers(
        &mut self,
        slave_id: SlaveId,
        function: ModbusFunction,
        address: u16,
        quantity: u16,
    ) -> ModbusResult<Vec<u16>> {
        let request = ModbusRequest::new_read(slave_id, function, address, quantity);
        self.expect_response(request).await?.parse_registers()
    }
}

#[async_trait]
impl<L: SerialLink> ModbusClient for ModbusRtuClient<L> {
    async fn read_01(&mut self, slave_id: SlaveId, address: u16, quantity: u16) -> ModbusResult<Vec<bool>> {
        self.read_bits(slave_id, ModbusFunction::ReadCoils, address, quantity).await
    }

    async fn read_02(&mut self, slave_id: SlaveId, address: u16, quantity: u16) -> ModbusResult<Vec<bool>> {
        self.read_bits(slave_id, ModbusFunction::ReadDiscreteInputs, address, quantity).await
    }

    async fn read_03(&mut self, slave_id: SlaveId, address: u16, quantity: u16) -> ModbusResult<Vec<u16>> {
        self.read_registers(slave_id, ModbusFunction::ReadHoldingRegisters, address, quantity).await
    }

    async fn read_04(&mut self, slave_id: SlaveId, address: u16, quantity: u16) -> ModbusResult<Vec<u16>> {
        self.read_registers(slave_id, ModbusFunction::ReadInputRegisters, address, quantity).await
    }

    async fn write_05(&mut self, slave_id: SlaveId, address: u16, value: bool) -> ModbusResult<()> {
        let request = ModbusRequest::write_single_coil(slave_id, address, value);
        self.execute_request(request).await.map(|_| ())
    }

    async fn write_06(&mut self, slave_id: SlaveId, address: u16, value: u16) -> ModbusResult<()> {
        let request = ModbusRequest::write_single_register(slave_id, address, value);
        self.execute_request(request).await.map(|_| ())
    }

    async fn write_0f(&mut self, slave_id: SlaveId, address: u16, values: &[bool]) -> ModbusResult<()> {
        let request = ModbusRequest::write_multiple_coils(slave_id, address, values);
        self.execute_request(request).await.map(|_| ())
    }

    async fn write_10(&mut self, slave_id: SlaveId, address: u16, values: &[u16]) -> ModbusResult<()> {
        let request = ModbusRequest::write_multiple_registers(slave_id, address, values);
        self.execute_request(request).await.map(|_| ())
    }

    fn is_connected(&self) -> bool {
        !self.closed
    }

    async fn close(&mut self) -> ModbusResult<()> {
        self.closed = true;
        Ok(())
    }

    fn get_stats(&self) -> ClientStats {
        ClientStats {
            engine: self.engine.stats().clone(),
            metrics: self.metrics.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MemoryLink, SerialLink};
    use std::time::Duration;

    /// Fast line so the poll loop finishes quickly on real time
    fn client() -> (ModbusRtuClient<MemoryLink>, MemoryLink) {
        let (link, peer) = MemoryLink::pair();
        let config = RtuConfig::master(115200).with_response_timeout(Duration::from_millis(50));
        (ModbusRtuClient::new(link, config).unwrap(), peer)
    }

    #[test]
    fn test_rejects_slave_config() {
        let (link, _peer) = MemoryLink::pair();
        assert!(matches!(
            ModbusRtuClient::new(link, RtuConfig::slave(1, 9600)),
            Err(ModbusError::Configuration { .. })
        ));
    }

    #[tokio::test]
    async fn test_timeout_without_slave() {
        let (mut client, mut peer) = client();
        let result = client.read_03(1, 0, 2).await;
        assert!(matches!(result, Err(ModbusError::Timeout { .. })));
        assert_eq!(peer.take_all().unwrap(), vec![0x01, 0x03, 0x00, 0x00, 0x00, 0x02, 0xC4, 0x0B]);

        let stats = client.get_stats();
        assert_eq!(stats.metrics.failed_requests, 1);
        assert_eq!(stats.engine.errors, 1);
    }

    #[tokio::test]
    async fn test_stale_bytes_are_not_a_response() {
        let (mut client, mut peer) = client();
        // Arrives before the query, so it is drained and the call times out
        peer.write_bytes(&[0x01, 0x03, 0x04, 0x00, 0x0A, 0x00, 0x0B, 0x9B, 0xF6]).unwrap();
        assert!(matches!(client.read_03(1, 0, 2).await, Err(ModbusError::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_broadcast_write_returns_immediately() {
        let (mut client, mut peer) = client();
        client.write_06(0, 5, 7).await.unwrap();
        assert_eq!(peer.take_all().unwrap(), vec![0x00, 0x06, 0x00, 0x05, 0x00, 0x07, 0xD9, 0xD8]);
        assert!(matches!(
            client.read_03(0, 0, 1).await,
            Err(ModbusError::InvalidData { .. })
        ));
    }

    #[tokio::test]
    async fn test_closed_client() {
        let (mut client, _peer) = client();
        client.close().await.unwrap();
        assert!(!client.is_connected());
        assert!(matches!(client.write_05(1, 0, true).await, Err(ModbusError::Io { .. })));
    }
}
