/// Modbus RTU Simulator
///
/// Runs master and slave engines against each other on in-memory serial
/// lines, one client/server pair per line, and exercises every supported
/// function code. A noise rate corrupts received bytes at random so CRC
/// rejections and response timeouts can be watched on a live bus.
///
/// ```text
/// rtu_simulator [noise_rate] [lines]
/// ```

use futures::future::join_all;
use rand::Rng;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::{Duration, Instant};
use voltage_rtu::{
    utils::format::format_metrics, CallbackLogger, ClientStats, MemoryLink, ModbusClient,
    ModbusRegisterBank, ModbusResult, ModbusRtuClient, ModbusRtuServer, ModbusServer, RtuConfig,
    SerialLink, ServerStats, SlaveId,
};

const BAUD_RATE: u32 = 115200;
const BANK_SIZE: u16 = 1000;

/// Serial link that flips one random bit in a received chunk
struct NoisyLink<L> {
    inner: L,
    error_rate: f64,
}

impl<L: SerialLink> NoisyLink<L> {
    fn new(inner: L, error_rate: f64) -> Self {
        Self {
            inner,
            error_rate: error_rate.clamp(0.0, 1.0),
        }
    }
}

impl<L: SerialLink> SerialLink for NoisyLink<L> {
    fn read_available(&mut self, buf: &mut [u8]) -> ModbusResult<usize> {
        let n = self.inner.read_available(buf)?;
        if n > 0 && self.error_rate > 0.0 {
            let mut rng = rand::thread_rng();
            if rng.gen_bool(self.error_rate) {
                let index = rng.gen_range(0..n);
                buf[index] ^= 1u8 << rng.gen_range(0..8u8);
                log::debug!("Noise injected at byte {}", index);
            }
        }
        Ok(n)
    }

    fn write_bytes(&mut self, data: &[u8]) -> ModbusResult<()> {
        self.inner.write_bytes(data)
    }

    fn now(&self) -> Instant {
        self.inner.now()
    }

    fn set_packet_logging(&mut self, enabled: bool) {
        self.inner.set_packet_logging(enabled)
    }
}

/// Power-meter style test data
fn preload(bank: &ModbusRegisterBank) -> ModbusResult<()> {
    // Holding registers: voltage readings in tenths of a volt
    let voltages: Vec<u16> = (0..10).map(|i| 2200 + i * 5).collect();
    bank.write_10(0, &voltages)?;

    for i in 0..50 {
        bank.set_input_register(i, 1000 + i)?;
    }
    let coils: Vec<bool> = (0..100).map(|i| i % 3 == 0).collect();
    bank.write_0f(0, &coils)?;
    for i in 0..100 {
        bank.set_discrete_input(i, i % 2 == 0)?;
    }
    Ok(())
}

fn report<T: Debug>(line: usize, operation: &str, result: ModbusResult<T>) {
    match result {
        Ok(value) => println!("[line {}] {:<28} ok    {:?}", line, operation, value),
        Err(e) => println!("[line {}] {:<28} error {}", line, operation, e),
    }
}

async fn run_line(line: usize, error_rate: f64) -> ModbusResult<(ClientStats, ServerStats)> {
    let station = (line + 1) as SlaveId;
    let (master_link, slave_link) = MemoryLink::pair();

    let bank = Arc::new(ModbusRegisterBank::with_size(BANK_SIZE));
    preload(&bank)?;

    let mut server = ModbusRtuServer::new(
        NoisyLink::new(slave_link, error_rate),
        RtuConfig::slave(station, BAUD_RATE),
        bank.clone(),
    )?;
    server.start().await?;

    let config = RtuConfig::master(BAUD_RATE).with_response_timeout(Duration::from_millis(100));
    let mut client = ModbusRtuClient::new(NoisyLink::new(master_link, error_rate), config)?;
    if line == 0 {
        client = client.with_logger(CallbackLogger::console());
    }

    report(line, "read_01 coils 0..10", client.read_01(station, 0, 10).await);
    report(line, "read_02 inputs 0..8", client.read_02(station, 0, 8).await);
    report(line, "read_03 holding 0..4", client.read_03(station, 0, 4).await);
    report(line, "read_04 input regs 0..4", client.read_04(station, 0, 4).await);
    report(line, "write_05 coil 3 ON", client.write_05(station, 3, true).await);
    report(line, "write_06 holding 1 = 42", client.write_06(station, 1, 42).await);
    report(
        line,
        "write_0f coils 0..10",
        client
            .write_0f(station, 0, &[true, false, true, true, false, false, true, true, true, false])
            .await,
    );
    report(line, "write_10 holding 1..3", client.write_10(station, 1, &[10, 258]).await);
    report(line, "read_03 holding 1..3", client.read_03(station, 1, 2).await);
    report(line, "read_03 past bank end", client.read_03(station, BANK_SIZE - 2, 5).await);
    report(line, "read_03 wrong station", client.read_03(station.saturating_add(100), 0, 1).await);

    report(line, "broadcast write_06 5 = 7", client.write_06(0, 5, 7).await);
    tokio::time::sleep(Duration::from_millis(20)).await;
    report(line, "bank holding 5 after broadcast", bank.read_03(5, 1));

    server.stop().await?;
    Ok((client.get_stats(), server.get_stats()))
}

#[tokio::main]
async fn main() -> ModbusResult<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut args = std::env::args().skip(1);
    let error_rate: f64 = args.next().and_then(|s| s.parse().ok()).unwrap_or(0.0);
    let lines: usize = args.next().and_then(|s| s.parse().ok()).unwrap_or(2);

    println!("=== Modbus RTU Simulator ===");
    println!("{}", voltage_rtu::info());
    println!("Lines: {}, noise rate: {:.2}, baud: {}", lines, error_rate, BAUD_RATE);

    let results = join_all((0..lines).map(|line| run_line(line, error_rate))).await;

    for (line, result) in results.into_iter().enumerate() {
        let (client_stats, server_stats) = result?;
        println!("\n--- Line {} ---", line);
        println!("{}", format_metrics(&client_stats.metrics));
        println!("Master frames: {:?}", client_stats.engine);
        println!(
            "Slave: {} requests, {} failed, {} broadcasts, frames {:?}",
            server_stats.total_requests,
            server_stats.failed_requests,
            server_stats.broadcasts,
            server_stats.engine
        );
    }

    println!("\n=== Simulator Completed ===");
    Ok(())
}
