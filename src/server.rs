/// Async slave driver
///
/// [`ModbusRtuServer`] moves a slave [`RtuEngine`] into a tokio task that
/// polls it every `poll_interval` until told to stop. Stopping hands the
/// engine back, so a server can be restarted or inspected afterwards.

use async_trait::async_trait;
use log::{debug, info, warn};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::config::RtuConfig;
use crate::engine::{EngineStats, PollStatus, RtuEngine};
use crate::error::{ModbusError, ModbusResult};
use crate::register_bank::{ModbusRegisterBank, RegisterBankStats};
use crate::transport::{SerialLink, SerialPortLink};

/// Modbus server trait
#[async_trait]
pub trait ModbusServer: Send {
    /// Start serving requests in the background
    async fn start(&mut self) -> ModbusResult<()>;

    /// Stop serving and wait for the background task
    async fn stop(&mut self) -> ModbusResult<()>;

    fn is_running(&self) -> bool;

    fn get_stats(&self) -> ServerStats;

    fn get_register_bank(&self) -> Option<Arc<ModbusRegisterBank>>;
}

/// Server statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct ServerStats {
    /// Requests answered or applied
    pub total_requests: u64,
    pub successful_requests: u64,
    /// Exception replies and dropped frames
    pub failed_requests: u64,
    pub broadcasts: u64,
    pub uptime_seconds: u64,
    pub engine: EngineStats,
    #[serde(skip)]
    pub register_bank_stats: Option<RegisterBankStats>,
}

impl ServerStats {
    fn record(&mut self, status: &ModbusResult<PollStatus>) {
        match status {
            Ok(PollStatus::Replied { exception: None, .. }) => {
                self.total_requests += 1;
                self.successful_requests += 1;
            }
            Ok(PollStatus::Replied { exception: Some(_), .. }) => {
                self.total_requests += 1;
                self.failed_requests += 1;
            }
            Ok(PollStatus::Broadcast(_)) => {
                self.total_requests += 1;
                self.successful_requests += 1;
                self.broadcasts += 1;
            }
            Err(_) => self.failed_requests += 1,
            Ok(_) => {}
        }
    }
}

/// Modbus RTU slave serving a register bank
pub struct ModbusRtuServer<L: SerialLink + 'static> {
    engine: Option<RtuEngine<L>>,
    register_bank: Arc<ModbusRegisterBank>,
    stats: Arc<Mutex<ServerStats>>,
    shutdown_tx: Option<broadcast::Sender<()>>,
    handle: Option<JoinHandle<RtuEngine<L>>>,
    is_running: Arc<AtomicBool>,
    start_time: Option<Instant>,
}

impl ModbusRtuServer<SerialPortLink> {
    /// Open a serial port and serve `register_bank` on it
    pub fn open(port: &str, config: RtuConfig, register_bank: Arc<ModbusRegisterBank>) -> ModbusResult<Self> {
        let link = SerialPortLink::open(port, config.baud_rate)?;
        Self::new(link, config, register_bank)
    }
}

impl<L: SerialLink + 'static> ModbusRtuServer<L> {
    /// Build a slave engine over `link`; `config` must describe a slave
    pub fn new(link: L, config: RtuConfig, register_bank: Arc<ModbusRegisterBank>) -> ModbusResult<Self> {
        if config.role.is_master() {
            return Err(ModbusError::configuration("Server requires a slave configuration"));
        }
        let engine = RtuEngine::new(link, config)?.with_store(register_bank.clone());
        Ok(Self {
            engine: Some(engine),
            register_bank,
            stats: Arc::new(Mutex::new(ServerStats::default())),
            shutdown_tx: None,
            handle: None,
            is_running: Arc::new(AtomicBool::new(false)),
            start_time: None,
        })
    }

    /// The engine, while the server is stopped
    pub fn engine(&self) -> Option<&RtuEngine<L>> {
        self.engine.as_ref()
    }

    pub fn into_engine(self) -> Option<RtuEngine<L>> {
        self.engine
    }

    fn station(&self) -> Option<u8> {
        self.engine.as_ref().and_then(|engine| engine.role().station())
    }
}

#[async_trait]
impl<L: SerialLink + 'static> ModbusServer for ModbusRtuServer<L> {
    async fn start(&mut self) -> ModbusResult<()> {
        let station = self.station();
        let mut engine = self
            .engine
            .take()
            .ok_or_else(|| ModbusError::internal("Server is already running"))?;

        let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);
        self.shutdown_tx = Some(shutdown_tx);
        self.start_time = Some(Instant::now());
        self.is_running.store(true, Ordering::SeqCst);

        let stats = self.stats.clone();
        let running = self.is_running.clone();
        let interval = engine.poll_interval();
        info!(
            "Modbus RTU server started as station {:?}, polling every {:?}",
            station, interval
        );

        self.handle = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        debug!("Shutdown signal received");
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {
                        let status = engine.poll();
                        match &status {
                            Ok(PollStatus::Replied { function, exception: Some(exception) }) => {
                                debug!("Answered 0x{:02X} with {}", function, exception)
                            }
                            Ok(PollStatus::Broadcast(request)) => {
                                debug!("Applied broadcast {}", request.function)
                            }
                            Err(e) => warn!("Request dropped: {}", e),
                            Ok(_) => {}
                        }
                        if let Ok(mut stats) = stats.lock() {
                            stats.record(&status);
                            stats.engine = engine.stats().clone();
                        }
                    }
                }
            }
            running.store(false, Ordering::SeqCst);
            engine
        }));
        Ok(())
    }

    async fn stop(&mut self) -> ModbusResult<()> {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let engine = handle
                .await
                .map_err(|e| ModbusError::internal(format!("Server task failed: {}", e)))?;
            self.engine = Some(engine);
        }
        self.is_running.store(false, Ordering::SeqCst);
        info!("Modbus RTU server stopped");
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    fn get_stats(&self) -> ServerStats {
        let mut stats = match self.stats.lock() {
            Ok(stats) => stats.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        if let Some(start_time) = self.start_time {
            stats.uptime_seconds = start_time.elapsed().as_secs();
        }
        stats.register_bank_stats = self.register_bank.get_stats().ok();
        stats
    }

    fn get_register_bank(&self) -> Option<Arc<ModbusRegisterBank>> {
        Some(self.register_bank.clone())
    }
}
