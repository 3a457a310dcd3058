//! Remote client lifecycle: link gating, retry on failure, reconnect.

mod common;

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use common::{init_logging, settings, wait_until, RecordingSink};
use spp_bridge::config::RemoteClientConfig;
use spp_bridge::{
    BufferPool, QueueRegistry, Relay, RemoteClient, RemoteState, RemoteStatus, Shutdown,
    WifiGate,
};

const TIMEOUT: Duration = Duration::from_secs(5);

struct Remote {
    registry: Arc<QueueRegistry>,
    relay: Relay,
    sink: Arc<RecordingSink>,
    wifi: Arc<WifiGate>,
    status: Arc<RemoteStatus>,
    shutdown: Arc<Shutdown>,
    thread: Option<JoinHandle<()>>,
}

impl Remote {
    fn start(port: u16, link_up: bool) -> Self {
        init_logging();
        let registry = QueueRegistry::new(0);
        let relay = Relay::new(BufferPool::new(4096), Arc::clone(&registry));
        let sink = Arc::new(RecordingSink::default());
        let wifi = Arc::new(WifiGate::new(link_up));
        let shutdown = Arc::new(Shutdown::new());

        let mut config = RemoteClientConfig {
            enabled: true,
            port,
            retry_delay_ms: 20,
            link_wait_ms: 20,
            connect_timeout_ms: 500,
            ..RemoteClientConfig::default()
        };
        config.host = heapless::String::try_from("127.0.0.1").unwrap();

        let client = RemoteClient::new(
            config,
            Arc::clone(&registry),
            sink.clone(),
            Arc::clone(&wifi),
            settings(),
            Arc::clone(&shutdown),
        );
        let status = client.status();
        let thread = thread::spawn(move || client.run());

        Self {
            registry,
            relay,
            sink,
            wifi,
            status,
            shutdown,
            thread: Some(thread),
        }
    }

    fn stop(&mut self) {
        self.shutdown.trigger();
        if let Some(thread) = self.thread.take() {
            thread.join().expect("remote client thread panicked");
        }
    }
}

impl Drop for Remote {
    fn drop(&mut self) {
        self.stop();
    }
}

/// A loopback port with nothing listening on it
fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

fn accept(listener: &TcpListener) -> TcpStream {
    listener.set_nonblocking(false).unwrap();
    let (stream, _) = listener.accept().expect("accept remote client");
    stream.set_read_timeout(Some(TIMEOUT)).unwrap();
    stream
}

#[test]
fn unreachable_host_is_retried_without_crashing() {
    let mut remote = Remote::start(closed_port(), true);

    assert!(wait_until(TIMEOUT, || remote.status.attempts() >= 3));
    assert_eq!(remote.status.connections(), 0);
    assert!(!remote.registry.remote_connected());

    remote.stop();
    assert_eq!(remote.status.state(), RemoteState::Stopped);
}

#[test]
fn link_down_blocks_before_connecting() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let remote = Remote::start(port, false);

    thread::sleep(Duration::from_millis(150));
    assert_eq!(remote.status.attempts(), 0);
    assert_eq!(remote.status.state(), RemoteState::WaitForLink);

    remote.wifi.set_up(true);
    let _peer = accept(&listener);
    assert!(wait_until(TIMEOUT, || remote.status.state() == RemoteState::Active));
    assert!(remote.registry.remote_connected());
}

#[test]
fn round_trip_and_reconnect() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let remote = Remote::start(port, true);

    let mut peer = accept(&listener);
    assert!(wait_until(TIMEOUT, || remote.registry.remote_connected()));

    remote.relay.ingest(b"hello").unwrap();
    let mut buf = [0u8; 5];
    peer.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"hello");

    peer.write_all(b"world").unwrap();
    assert!(wait_until(TIMEOUT, || remote.sink.bytes() == b"world"));

    // Peer goes away: slot is released, then a fresh connection is made.
    drop(peer);
    let mut peer = accept(&listener);
    assert!(wait_until(TIMEOUT, || {
        remote.status.connections() == 2 && remote.registry.remote_connected()
    }));

    remote.relay.ingest(b"again").unwrap();
    peer.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"again");
}
