//! Integration Tests for Voltage RTU
//!
//! Master and slave engines talking to each other over in-memory serial
//! lines: first on a hand-advanced clock, stepping both state machines
//! explicitly, then through the async client and server on real time.

use std::sync::Arc;
use std::time::Duration;
use voltage_rtu::*;

/// Poll spacing used when stepping engines by hand (T3.5 is 2002us at 19200)
const STEP: Duration = Duration::from_micros(500);
const STATION: u8 = 17;

/// A master and a slave on one simulated line
struct Bus {
    master: RtuEngine<MemoryLink>,
    slave: RtuEngine<MemoryLink>,
    clock: ManualClock,
    bank: Arc<ModbusRegisterBank>,
    slave_events: Vec<ModbusResult<PollStatus>>,
}

impl Bus {
    fn new() -> Self {
        utils::logging::init_test_logger();
        let clock = ManualClock::new();
        let (master_link, slave_link) = MemoryLink::pair_with_clock(clock.clone());
        let bank = Arc::new(ModbusRegisterBank::with_size(100));

        let master_config = RtuConfig::master(19200).with_response_timeout(Duration::from_millis(20));
        let master = RtuEngine::new(master_link, master_config).unwrap();
        let slave = RtuEngine::new(slave_link, RtuConfig::slave(STATION, 19200))
            .unwrap()
            .with_store(bank.clone());

        Self {
            master,
            slave,
            clock,
            bank,
            slave_events: Vec::new(),
        }
    }

    /// Step both engines until the master's transaction ends
    fn finish(&mut self) -> ModbusResult<ModbusResponse> {
        for _ in 0..200 {
            let event = self.slave.poll();
            if !matches!(event, Ok(PollStatus::Idle) | Ok(PollStatus::Waiting)) {
                self.slave_events.push(event);
            }
            match self.master.poll()? {
                PollStatus::Response(response) => return Ok(response),
                PollStatus::Waiting => {}
                other => panic!("unexpected master status {:?}", other),
            }
            self.clock.advance(STEP);
        }
        panic!("transaction did not finish");
    }

    fn transact(&mut self, request: &ModbusRequest) -> ModbusResult<ModbusResponse> {
        self.master.query(request)?;
        self.finish()
    }

    /// Step only the slave until it has answered
    fn slave_reply(&mut self) {
        for _ in 0..20 {
            self.clock.advance(STEP);
            if let Ok(PollStatus::Replied { .. }) = self.slave.poll() {
                return;
            }
        }
        panic!("slave did not reply");
    }
}

#[test]
fn test_engine_pair_all_functions() {
    let mut bus = Bus::new();
    bus.bank.set_input_register(4, 0x1234).unwrap();
    bus.bank.set_discrete_input(2, true).unwrap();

    let response = bus
        .transact(&ModbusRequest::write_single_coil(STATION, 3, true))
        .unwrap();
    assert_eq!(response.data, vec![0x00, 0x03, 0xFF, 0x00]);
    bus.transact(&ModbusRequest::write_single_register(STATION, 1, 42))
        .unwrap();
    bus.transact(&ModbusRequest::write_multiple_coils(
        STATION,
        10,
        &[true, false, true],
    ))
    .unwrap();
    bus.transact(&ModbusRequest::write_multiple_registers(STATION, 2, &[10, 258]))
        .unwrap();

    let coils = bus
        .transact(&ModbusRequest::new_read(STATION, ModbusFunction::ReadCoils, 0, 13))
        .unwrap()
        .parse_bits()
        .unwrap();
    assert!(coils[3]);
    assert_eq!(&coils[10..13], &[true, false, true]);

    let inputs = bus
        .transact(&ModbusRequest::new_read(STATION, ModbusFunction::ReadDiscreteInputs, 0, 3))
        .unwrap()
        .parse_bits()
        .unwrap();
    assert_eq!(&inputs[..3], &[false, false, true]);

    let holding = bus
        .transact(&ModbusRequest::new_read(STATION, ModbusFunction::ReadHoldingRegisters, 1, 3))
        .unwrap()
        .parse_registers()
        .unwrap();
    assert_eq!(holding, vec![42, 10, 258]);

    let input_registers = bus
        .transact(&ModbusRequest::new_read(STATION, ModbusFunction::ReadInputRegisters, 4, 1))
        .unwrap()
        .parse_registers()
        .unwrap();
    assert_eq!(input_registers, vec![0x1234]);

    assert_eq!(bus.master.stats().frames_out, 8);
    assert_eq!(bus.master.stats().frames_in, 8);
    assert_eq!(bus.slave.stats().frames_in, 8);
    assert_eq!(bus.master.state(), CommState::Idle);
    assert!(bus.master.last_error().is_none());
}

#[test]
fn test_exception_reply_reaches_master() {
    let mut bus = Bus::new();
    let request = ModbusRequest::new_read(STATION, ModbusFunction::ReadHoldingRegisters, 98, 5);

    let err = bus.transact(&request).unwrap_err();
    assert!(matches!(err, ModbusError::Exception { code: 0x02, .. }));
    assert_eq!(bus.master.last_error_code(), Some(ErrorCode::Exception));
    assert!(matches!(
        bus.slave_events.last(),
        Some(Ok(PollStatus::Replied {
            function: 0x03,
            exception: Some(ModbusException::IllegalDataAddress),
        }))
    ));
}

#[test]
fn test_other_station_times_out() {
    let mut bus = Bus::new();
    let request = ModbusRequest::new_read(STATION + 1, ModbusFunction::ReadHoldingRegisters, 0, 1);

    let err = bus.transact(&request).unwrap_err();
    assert!(matches!(err, ModbusError::Timeout { .. }));
    assert!(matches!(
        bus.slave_events.as_slice(),
        [Ok(PollStatus::Ignored { address })] if *address == STATION + 1
    ));
    assert_eq!(bus.master.state(), CommState::Idle);
}

#[test]
fn test_corrupted_request_recovers_after_timeout() {
    let mut bus = Bus::new();
    let request = ModbusRequest::new_read(STATION, ModbusFunction::ReadHoldingRegisters, 0, 2);

    bus.master.query(&request).unwrap();
    let mut frame = bus.slave.link_mut().take_all().unwrap();
    frame[3] ^= 0x01;
    bus.slave.link().inject(&frame).unwrap();

    assert!(matches!(bus.finish(), Err(ModbusError::Timeout { .. })));
    assert!(matches!(
        bus.slave_events.as_slice(),
        [Err(ModbusError::BadCrc { .. })]
    ));
    assert_eq!(bus.slave.last_error_code(), Some(ErrorCode::BadCrc));
    assert_eq!(bus.slave.stats().errors, 1);

    bus.bank.write_10(0, &[7, 8]).unwrap();
    let registers = bus.transact(&request).unwrap().parse_registers().unwrap();
    assert_eq!(registers, vec![7, 8]);
}

#[test]
fn test_corrupted_response_is_bad_crc() {
    let mut bus = Bus::new();
    let request = ModbusRequest::new_read(STATION, ModbusFunction::ReadCoils, 0, 8);

    bus.master.query(&request).unwrap();
    bus.slave_reply();
    let mut reply = bus.master.link_mut().take_all().unwrap();
    let last = reply.len() - 1;
    reply[last] ^= 0xFF;
    bus.master.link().inject(&reply).unwrap();

    assert!(matches!(bus.finish(), Err(ModbusError::BadCrc { .. })));
    assert_eq!(bus.master.last_error_code(), Some(ErrorCode::BadCrc));
    assert_eq!(bus.master.state(), CommState::Idle);

    assert!(bus.transact(&request).is_ok());
    assert!(bus.master.last_error().is_none());
}

#[test]
fn test_broadcast_write_applied_without_reply() {
    let mut bus = Bus::new();
    let request = ModbusRequest::write_single_register(BROADCAST_ADDRESS, 5, 7);

    bus.master.query(&request).unwrap();
    assert_eq!(bus.master.state(), CommState::Idle);

    let mut applied = false;
    for _ in 0..10 {
        bus.clock.advance(STEP);
        if let Ok(PollStatus::Broadcast(seen)) = bus.slave.poll() {
            assert_eq!(seen, request);
            applied = true;
            break;
        }
    }
    assert!(applied);
    assert_eq!(bus.bank.read_03(5, 1).unwrap(), vec![7]);
    assert_eq!(bus.master.link().pending().unwrap(), 0);
    assert_eq!(bus.slave.stats().frames_out, 0);
}

#[test]
fn test_slave_from_yaml_config() {
    let yaml = r#"
role:
  mode: slave
  station: 17
baud_rate: 19200
"#;
    let config = RtuConfig::from_yaml_str(yaml).unwrap();
    let clock = ManualClock::new();
    let (mut master_link, slave_link) = MemoryLink::pair_with_clock(clock.clone());
    let mut slave = RtuEngine::new(slave_link, config)
        .unwrap()
        .with_store(Arc::new(ModbusRegisterBank::new()));

    // 11 03 00 00 00 03 with CRC
    master_link
        .write_bytes(&[0x11, 0x03, 0x00, 0x00, 0x00, 0x03, 0x07, 0x5B])
        .unwrap();
    assert_eq!(slave.poll().unwrap(), PollStatus::Waiting);
    clock.advance(Duration::from_micros(2100));
    assert!(matches!(slave.poll().unwrap(), PollStatus::Replied { function: 0x03, exception: None }));

    assert_eq!(
        master_link.take_all().unwrap(),
        vec![0x11, 0x03, 0x06, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xEC, 0xB5]
    );
}

fn async_pair(bank: Arc<ModbusRegisterBank>) -> (ModbusRtuClient<MemoryLink>, ModbusRtuServer<MemoryLink>) {
    let (master_link, slave_link) = MemoryLink::pair();
    let config = RtuConfig::master(115200).with_response_timeout(Duration::from_millis(200));
    let client = ModbusRtuClient::new(master_link, config).unwrap();
    let server = ModbusRtuServer::new(slave_link, RtuConfig::slave(STATION, 115200), bank).unwrap();
    (client, server)
}

#[tokio::test]
async fn test_client_server_round_trip() {
    let bank = Arc::new(ModbusRegisterBank::with_size(200));
    bank.set_input_register(0, 0x1234).unwrap();
    bank.set_discrete_input(1, true).unwrap();
    let (mut client, mut server) = async_pair(bank.clone());
    server.start().await.unwrap();

    client.write_05(STATION, 3, true).await.unwrap();
    assert_eq!(
        client.read_01(STATION, 0, 5).await.unwrap(),
        vec![false, false, false, true, false]
    );
    assert_eq!(client.read_02(STATION, 0, 2).await.unwrap(), vec![false, true]);

    client.write_06(STATION, 10, 0xBEEF).await.unwrap();
    client.write_10(STATION, 11, &[1, 2, 3]).await.unwrap();
    assert_eq!(
        client.read_holding_registers(STATION, 10, 4).await.unwrap(),
        vec![0xBEEF, 1, 2, 3]
    );
    assert_eq!(client.read_04(STATION, 0, 1).await.unwrap(), vec![0x1234]);

    client.write_0f(STATION, 20, &[true, true, false, true]).await.unwrap();
    assert_eq!(bank.read_01(20, 4).unwrap(), vec![true, true, false, true]);

    let err = client.read_03(STATION, 199, 2).await.unwrap_err();
    assert!(matches!(err, ModbusError::Exception { code: 0x02, .. }));

    client.write_06(BROADCAST_ADDRESS, 50, 9).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(bank.read_03(50, 1).unwrap(), vec![9]);

    server.stop().await.unwrap();

    let client_stats = client.get_stats();
    assert_eq!(client_stats.metrics.total_requests, 10);
    assert_eq!(client_stats.metrics.failed_requests, 1);

    let server_stats = server.get_stats();
    assert_eq!(server_stats.total_requests, 10);
    assert_eq!(server_stats.failed_requests, 1);
    assert_eq!(server_stats.broadcasts, 1);
    assert!(server_stats.register_bank_stats.is_some());
}

#[tokio::test]
async fn test_client_times_out_when_server_stopped() {
    let bank = Arc::new(ModbusRegisterBank::new());
    let (mut client, mut server) = async_pair(bank);
    server.start().await.unwrap();
    server.stop().await.unwrap();

    let err = client.read_03(STATION, 0, 1).await.unwrap_err();
    assert!(matches!(err, ModbusError::Timeout { .. }));
    assert_eq!(client.engine().last_error_code(), None);
    assert_eq!(client.engine().state(), CommState::Idle);
}

#[test]
fn test_broadcast_through_client_without_runtime_macro() {
    let (link, mut peer) = MemoryLink::pair();
    let mut client = ModbusRtuClient::new(link, RtuConfig::master(9600)).unwrap();

    tokio_test::block_on(async {
        tokio_test::assert_ok!(client.write_05(BROADCAST_ADDRESS, 3, true).await);
    });
    assert_eq!(
        peer.take_all().unwrap(),
        vec![0x00, 0x05, 0x00, 0x03, 0xFF, 0x00, 0x7D, 0xEB]
    );
}
