//! Serial Port Profile bridge: one UART fanned out to many TCP peers.
//!
//! UART receive events go through [`Relay::ingest`] into every registered
//! [`OutboundQueue`]; each connection's [`ConnectionWorker`] writes its queue
//! to its socket and forwards whatever the peer sends straight to the UART.

pub mod buffer;
pub mod config;
pub mod error;
pub mod queue;
pub mod registry;
pub mod relay;
pub mod shutdown;
pub mod tcp_client;
pub mod tcp_server;
pub mod uart;
pub mod wifi;
pub mod worker;

// 重新导出一些公共接口，使它们可以直接从 crate 根访问
pub use buffer::{Buffer, BufferPool, PoolStats};
pub use config::{create_config, AppConfig};
pub use error::{Error, Result};
pub use queue::{OutboundQueue, QUEUE_DEPTH};
pub use registry::{BroadcastReport, QueueRegistry, Registration, SlotId, SlotKind};
pub use relay::Relay;
pub use shutdown::Shutdown;
pub use tcp_client::{start_remote_client, RemoteClient, RemoteState, RemoteStatus};
pub use tcp_server::{start_tcp_server, TcpServer};
pub use uart::{start_forwarding, UartSink, UartSource};
pub use wifi::WifiGate;
pub use worker::{CloseReason, ConnectionWorker, WorkerSettings};
