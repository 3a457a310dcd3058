//! TCP Server module
//!
//! Local listener for the bridge. Every accepted client gets its own queue,
//! a slot in the [`QueueRegistry`] and a [`ConnectionWorker`] thread; a
//! client arriving while all local slots are taken is closed right away.

use log::{debug, error, info, warn};
use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::config::{TcpServerConfig, THREAD_STACK_SIZE};
use crate::error::{Error, Result};
use crate::queue::OutboundQueue;
use crate::registry::{QueueRegistry, SlotKind};
use crate::shutdown::Shutdown;
use crate::uart::UartSink;
use crate::worker::{ConnectionWorker, WorkerSettings};

/// TCP Server
///
/// Accepts local clients and attaches each one to the fan-out engine.
pub struct TcpServer {
    /// TCP server configuration
    config: TcpServerConfig,
    /// Registry the accepted clients' queues are placed in
    registry: Arc<QueueRegistry>,
    /// Where bytes from clients go
    uart: Arc<dyn UartSink>,
    settings: WorkerSettings,
    shutdown: Arc<Shutdown>,
}

impl TcpServer {
    pub fn new(
        config: TcpServerConfig,
        registry: Arc<QueueRegistry>,
        uart: Arc<dyn UartSink>,
        settings: WorkerSettings,
        shutdown: Arc<Shutdown>,
    ) -> Self {
        Self {
            config,
            registry,
            uart,
            settings,
            shutdown,
        }
    }

    /// Bind the configured address.
    ///
    /// Failure is a [`Error::Configuration`]: the local server cannot run,
    /// the rest of the bridge is unaffected.
    pub fn bind(&self) -> Result<TcpListener> {
        let bind_address = format!("{}:{}", self.config.bind_address, self.config.port);
        let listener = TcpListener::bind(&bind_address).map_err(|e| {
            Error::Configuration(format!("Failed to bind to {}: {}", bind_address, e))
        })?;
        listener.set_nonblocking(true).map_err(|e| {
            Error::Configuration(format!("Failed to configure listener on {}: {}", bind_address, e))
        })?;

        info!("TCP server listening on {}", bind_address);
        Ok(listener)
    }

    /// Bind and serve until shutdown
    pub fn run(&self) -> Result<()> {
        let listener = self.bind()?;
        self.serve(listener)
    }

    /// Accept clients on an already bound listener until shutdown
    pub fn serve(&self, listener: TcpListener) -> Result<()> {
        listener.set_nonblocking(true)?;
        let accept_poll = Duration::from_millis(self.config.accept_poll_ms);

        while !self.shutdown.is_triggered() {
            match listener.accept() {
                Ok((stream, peer_addr)) => self.admit(stream, peer_addr),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.shutdown.sleep(accept_poll);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    // e.g. ECONNABORTED or fd exhaustion: back off, keep listening
                    error!("Connection failed: {}", e);
                    self.shutdown.sleep(accept_poll);
                }
            }
        }

        info!("TCP server stopped");
        Ok(())
    }

    /// Register a queue for a freshly accepted client and start its worker
    fn admit(&self, stream: TcpStream, peer_addr: SocketAddr) {
        info!("New client connected: {}", peer_addr);

        let registration = match self
            .registry
            .register(SlotKind::Local, Arc::new(OutboundQueue::new()))
        {
            Ok(registration) => registration,
            Err(e) => {
                warn!("Rejecting client {}: {}", peer_addr, e);
                drop(stream);
                return;
            }
        };

        let label = format!("client {}", peer_addr);
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
                error!("Failed to set up client {}: {}", peer_addr, e);
                return;
            }
        };

        // The worker owns every resource of the client, so a spawn failure
        // drops it and thereby tears the client down.
        let spawned = thread::Builder::new()
            .name(format!("tcp_client_{}", peer_addr.port()))
            .stack_size(THREAD_STACK_SIZE)
            .spawn(move || {
                let reason = worker.run();
                debug!("Client {} worker exited: {}", peer_addr, reason);
            });
        if let Err(e) = spawned {
            error!("Failed to spawn worker for client {}: {}", peer_addr, e);
        }
    }

    pub fn connected_clients(&self) -> usize {
        self.registry.local_count()
    }
}

/// Spawn the server on its own thread.
///
/// A bind failure is logged and ends only this thread.
pub fn start_tcp_server(server: TcpServer) -> Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name("tcp_server".into())
        .stack_size(THREAD_STACK_SIZE)
        .spawn(move || {
            info!("TCP server thread started");
            if let Err(e) = server.run() {
                error!("TCP server error: {}; local server disabled", e);
            }
        })
        .map_err(|e| Error::General(format!("Failed to spawn TCP server thread: {}", e)))
}
