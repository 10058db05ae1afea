/// Modbus RTU hardware smoke test
///
/// Talks to a real slave on a serial port and reads its first holding
/// registers and coils, with raw frame tracing on the line.
///
/// ```text
/// rtu_test <port> <baud> <slave> [rounds]
/// rtu_test /dev/ttyUSB0 9600 1
/// ```

use anyhow::{bail, Context, Result};
use std::time::Duration;
use voltage_rtu::{
    utils::{format::format_metrics, validation},
    ModbusClient, ModbusRtuClient, RtuConfig,
};

const RESPONSE_TIMEOUT: Duration = Duration::from_millis(1000);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 4 {
        bail!("usage: {} <port> <baud> <slave> [rounds]", args[0]);
    }
    let port = &args[1];
    let baud_rate: u32 = args[2].parse().context("baud rate must be a number")?;
    let slave: u8 = args[3].parse().context("slave id must be 1-247")?;
    let rounds: usize = match args.get(4) {
        Some(rounds) => rounds.parse().context("rounds must be a number")?,
        None => 3,
    };

    validation::validate_slave_id(slave)?;
    if let Err(e) = validation::validate_baud_rate(baud_rate) {
        tracing::warn!("{}", e);
    }

    let config = RtuConfig::master(baud_rate)
        .with_response_timeout(RESPONSE_TIMEOUT)
        .with_packet_logging(true);
    tracing::info!(
        "Opening {} at {} baud, T3.5 = {:?}",
        port,
        baud_rate,
        config.frame_gap()
    );
    let mut client = ModbusRtuClient::open(port, config)
        .with_context(|| format!("cannot open serial port {}", port))?;

    for round in 1..=rounds {
        println!("--- Round {}/{} ---", round, rounds);
        match client.read_03(slave, 0, 10).await {
            Ok(values) => println!("Holding registers 0..10: {:?}", values),
            Err(e) => println!("Read holding registers failed: {}", e),
        }
        match client.read_01(slave, 0, 16).await {
            Ok(bits) => println!("Coils 0..16: {:?}", bits),
            Err(e) => println!("Read coils failed: {}", e),
        }
    }

    let stats = client.get_stats();
    println!("\n{}", format_metrics(&stats.metrics));
    println!("Engine: {}", serde_json::to_string(&stats.engine)?);
    client.close().await?;
    Ok(())
}
