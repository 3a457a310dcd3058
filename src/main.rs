#[cfg(target_os = "espidf")]
use esp_idf_sys as _; // If using the `binstart` feature of `esp-idf-sys`, always keep this module imported
use log::info;
use std::sync::Arc;
use std::time::Duration;

use spp_bridge::{
    config::AppConfig,
    error::Result,
    start_forwarding, start_remote_client, start_tcp_server, BufferPool, QueueRegistry, Relay,
    RemoteClient, RemoteState, Shutdown, TcpServer, UartSink, UartSource, WifiGate,
    WorkerSettings,
};

const STATUS_INTERVAL: Duration = Duration::from_secs(5);

#[cfg(target_os = "espidf")]
fn main() -> anyhow::Result<()> {
    use esp_idf_hal::peripherals::Peripherals;
    use spp_bridge::{config::create_config, uart::esp::EspUart, wifi::esp::WiFiManager};

    // Initialize the ESP-IDF system
    esp_idf_sys::link_patches();

    // Configure logging
    esp_idf_svc::log::EspLogger::initialize_default();
    info!("ESP32 starting up...");

    let config = create_config();
    info!("Configuration loaded");

    let peripherals = Peripherals::take()?;
    info!("Peripherals initialized");

    // The gate starts down; DHCP completion on the station flips it up.
    let wifi_gate = Arc::new(WifiGate::default());
    let mut wifi_manager =
        WiFiManager::new(config.wifi.clone(), peripherals.modem, Arc::clone(&wifi_gate))?;
    wifi_manager.configure_mixed_mode()?;
    wifi_manager.start()?;

    let uart = Arc::new(EspUart::new(
        peripherals.uart1,
        peripherals.pins.gpio21,
        peripherals.pins.gpio20,
        &config.uart,
    )?);
    info!("UART initialized");

    run_bridge(uart, wifi_gate, config)?;

    // 保持WiFi驱动存活直到桥接结束
    drop(wifi_manager);
    Ok(())
}

#[cfg(not(target_os = "espidf"))]
fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    info!("SPP bridge starting on host (stdin/stdout as UART)");

    let config = AppConfig::from_env()?;

    // No radio on the host: the link is always up.
    let wifi_gate = Arc::new(WifiGate::new(true));
    let uart = Arc::new(spp_bridge::uart::StdioUart::new());

    run_bridge(uart, wifi_gate, config)?;
    Ok(())
}

/// Wire the fan-out engine to the UART and start every enabled endpoint
fn run_bridge<U>(uart: Arc<U>, wifi_gate: Arc<WifiGate>, config: AppConfig) -> Result<()>
where
    U: UartSink + UartSource + 'static,
{
    config.validate()?;

    let shutdown = Arc::new(Shutdown::new());
    let local_slots = if config.tcp_server.enabled {
        config.tcp_server.max_clients
    } else {
        0
    };
    let registry = QueueRegistry::new(local_slots);
    let relay = Relay::new(BufferPool::new(config.relay.byte_budget), Arc::clone(&registry));
    let settings = WorkerSettings::from(&config.relay);
    info!(
        "Queue registry created with {} slots, {} byte in-flight budget",
        registry.capacity(),
        config.relay.byte_budget
    );

    let uart_sink: Arc<dyn UartSink> = uart.clone();
    let uart_source: Arc<dyn UartSource> = uart;
    start_forwarding(uart_source, relay, config.uart.clone(), Arc::clone(&shutdown))?;

    if config.tcp_server.enabled {
        info!("Starting TCP server on port {}...", config.tcp_server.port);
        start_tcp_server(TcpServer::new(
            config.tcp_server.clone(),
            Arc::clone(&registry),
            Arc::clone(&uart_sink),
            settings,
            Arc::clone(&shutdown),
        ))?;
    } else {
        info!("Local TCP server disabled");
    }

    let remote_status = if config.remote.enabled {
        let client = RemoteClient::new(
            config.remote.clone(),
            Arc::clone(&registry),
            Arc::clone(&uart_sink),
            wifi_gate,
            settings,
            Arc::clone(&shutdown),
        );
        let status = client.status();
        start_remote_client(client)?;
        Some(status)
    } else {
        info!("Remote TCP client disabled");
        None
    };

    info!("==================================================");
    info!("SPP bridge running");
    info!("TCP Server Port: {}", config.tcp_server.port);
    info!("UART Baudrate: {}", config.uart.baudrate);
    info!("==================================================");

    // 保持程序运行并定期检查状态
    let mut last_client_count = 0;
    let mut last_remote_state = RemoteState::Idle;
    while !shutdown.sleep(STATUS_INTERVAL) {
        let current_client_count = registry.local_count();
        if current_client_count != last_client_count {
            if current_client_count > 0 {
                info!("Currently {} TCP client(s) connected", current_client_count);
            } else {
                info!("No TCP clients connected. Waiting for connections...");
            }
            last_client_count = current_client_count;
        }

        if let Some(status) = &remote_status {
            let state = status.state();
            if state != last_remote_state {
                info!(
                    "Remote client {} ({} attempts, {} connections)",
                    state,
                    status.attempts(),
                    status.connections()
                );
                last_remote_state = state;
            }
        }
    }

    Ok(())
}
