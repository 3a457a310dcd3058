//! Remote TCP client
//!
//! Keeps one connection to the configured cloud/gateway host alive for the
//! whole run:
//!
//! ```text
//! Idle -> WaitForLink -> Resolving -> Connecting -> Active -> Disconnected
//!              ^                |            |                     |
//!              +---- retry delay <-----------+---------------------+
//! ```
//!
//! Every `Active` entry registers a fresh queue in the remote slot, so
//! anything still queued from the previous connection is discarded.

use log::{debug, info, warn};
use std::fmt;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread;

use crate::config::{RemoteClientConfig, THREAD_STACK_SIZE};
use crate::error::{Error, Result};
use crate::queue::OutboundQueue;
use crate::registry::{QueueRegistry, SlotKind};
use crate::shutdown::Shutdown;
use crate::uart::UartSink;
use crate::wifi::WifiGate;
use crate::worker::{ConnectionWorker, WorkerSettings};

/// Connection state of the remote client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RemoteState {
    Idle = 0,
    WaitForLink = 1,
    Resolving = 2,
    Connecting = 3,
    Active = 4,
    Disconnected = 5,
    Stopped = 6,
}

impl RemoteState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => RemoteState::WaitForLink,
            2 => RemoteState::Resolving,
            3 => RemoteState::Connecting,
            4 => RemoteState::Active,
            5 => RemoteState::Disconnected,
            6 => RemoteState::Stopped,
            _ => RemoteState::Idle,
        }
    }
}

impl fmt::Display for RemoteState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Counters observable while the client runs
#[derive(Default)]
pub struct RemoteStatus {
    state: AtomicU8,
    attempts: AtomicU32,
    connections: AtomicU32,
}

impl RemoteStatus {
    pub fn state(&self) -> RemoteState {
        RemoteState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Resolve/connect attempts made so far
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::Relaxed)
    }

    /// Attempts that reached `Active`
    pub fn connections(&self) -> u32 {
        self.connections.load(Ordering::Relaxed)
    }
}

pub struct RemoteClient {
    config: RemoteClientConfig,
    registry: Arc<QueueRegistry>,
    uart: Arc<dyn UartSink>,
    wifi: Arc<WifiGate>,
    settings: WorkerSettings,
    shutdown: Arc<Shutdown>,
    status: Arc<RemoteStatus>,
}

impl RemoteClient {
    pub fn new(
        config: RemoteClientConfig,
        registry: Arc<QueueRegistry>,
        uart: Arc<dyn UartSink>,
        wifi: Arc<WifiGate>,
        settings: WorkerSettings,
        shutdown: Arc<Shutdown>,
    ) -> Self {
        Self {
            config,
            registry,
            uart,
            wifi,
            settings,
            shutdown,
            status: Arc::new(RemoteStatus::default()),
        }
    }

    /// Shared handle to the live state and counters
    pub fn status(&self) -> Arc<RemoteStatus> {
        Arc::clone(&self.status)
    }

    fn enter(&self, state: RemoteState) {
        let previous = RemoteState::from_u8(self.status.state.swap(state as u8, Ordering::AcqRel));
        if previous != state {
            debug!("Remote {}:{} {} -> {}", self.config.host, self.config.port, previous, state);
        }
    }

    /// Run the connect/serve/reconnect cycle until shutdown
    pub fn run(&self) {
        info!(
            "Remote client targeting {}:{}",
            self.config.host, self.config.port
        );

        while !self.shutdown.is_triggered() {
            if !self.wait_for_link() {
                break;
            }

            match self.connect() {
                Ok(stream) => self.serve(stream),
                Err(e) => warn!("Remote connection failed: {}", e),
            }

            self.enter(RemoteState::Disconnected);
            if self.shutdown.sleep(self.config.retry_delay()) {
                break;
            }
        }

        self.enter(RemoteState::Stopped);
        info!("Remote client stopped");
    }

    /// Block until the station link is up; false once shutdown is requested
    fn wait_for_link(&self) -> bool {
        self.enter(RemoteState::WaitForLink);
        loop {
            if self.shutdown.is_triggered() {
                return false;
            }
            if self.wifi.wait_for_up(self.config.link_wait()) {
                return true;
            }
            debug!("Remote client still waiting for WiFi link");
        }
    }

    fn resolve(&self) -> Result<Vec<SocketAddr>> {
        self.enter(RemoteState::Resolving);
        let target = (self.config.host.as_str(), self.config.port);
        let addrs: Vec<SocketAddr> = target
            .to_socket_addrs()
            .map_err(|e| {
                Error::Connection(format!("Failed to resolve {}: {}", self.config.host, e))
            })?
            .collect();
        if addrs.is_empty() {
            return Err(Error::Connection(format!(
                "{} resolved to no addresses",
                self.config.host
            )));
        }
        Ok(addrs)
    }

    fn connect(&self) -> Result<TcpStream> {
        self.status.attempts.fetch_add(1, Ordering::Relaxed);
        let addrs = self.resolve()?;

        self.enter(RemoteState::Connecting);
        let mut last_err = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.config.connect_timeout()) {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    debug!("Connect to {} failed: {}", addr, e);
                    last_err = Some(e);
                }
            }
        }
        Err(Error::Connection(format!(
            "Failed to connect to {}:{}: {}",
            self.config.host,
            self.config.port,
            last_err.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    fn serve(&self, stream: TcpStream) {
        let registration = match self
            .registry
            .register(SlotKind::Remote, Arc::new(OutboundQueue::new()))
        {
            Ok(registration) => registration,
            Err(e) => {
                warn!("Remote slot unavailable: {}", e);
                return;
            }
        };

        let label = format!("remote {}:{}", self.config.host, self.config.port);
        let worker = match ConnectionWorker::new(
            label,
            stream,
            registration,
            Arc::clone(&self.uart),
            self.settings,
            Arc::clone(&self.shutdown),
        ) {
            Ok(worker) => worker,
            Err(e) => {
                warn!("Failed to set up remote connection: {}", e);
                return;
            }
        };

        self.status.connections.fetch_add(1, Ordering::Relaxed);
        self.enter(RemoteState::Active);
        let reason = worker.run();
        info!("Remote connection ended: {}", reason);
    }
}

/// Spawn the remote client on its own thread
pub fn start_remote_client(client: RemoteClient) -> Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name("tcp_remote".into())
        .stack_size(THREAD_STACK_SIZE)
        .spawn(move || client.run())
        .map_err(|e| Error::General(format!("Failed to spawn remote client thread: {}", e)))
}
