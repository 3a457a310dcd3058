use heapless::String;
use std::time::Duration;

use crate::error::{Error, Result};

/// Baud rates the UART peripheral is known to run reliably at
pub const VALID_BAUDRATES: [u32; 9] = [
    9600, 19200, 38400, 57600, 115200, 230400, 460800, 921600, 1500000,
];

/// Stack size for bridge threads; the device build keeps them small
#[cfg(target_os = "espidf")]
pub const THREAD_STACK_SIZE: usize = 8192;
#[cfg(not(target_os = "espidf"))]
pub const THREAD_STACK_SIZE: usize = 64 * 1024;

/// WiFi configuration
#[derive(Debug, Clone)]
pub struct WiFiConfig {
    /// SSID for client mode
    pub client_ssid: String<32>,
    /// Password for client mode
    pub client_password: String<64>,
    /// SSID for access point mode
    pub ap_ssid: String<32>,
    /// Password for access point mode
    pub ap_password: String<64>,
    /// WiFi channel for access point mode
    pub ap_channel: u8,
    /// Maximum number of stations on the access point
    pub ap_max_connections: u16,
}

impl Default for WiFiConfig {
    fn default() -> Self {
        Self {
            client_ssid: String::try_from("your_wifi_ssid").unwrap_or_default(),
            client_password: String::try_from("your_wifi_password").unwrap_or_default(),
            ap_ssid: String::try_from("ESP32-SPP").unwrap_or_default(),
            ap_password: String::try_from("password123").unwrap_or_default(),
            ap_channel: 6,
            ap_max_connections: 4,
        }
    }
}

/// UART configuration
#[derive(Debug, Clone)]
pub struct UartConfig {
    /// Baud rate for UART
    pub baudrate: u32,
    /// Size of one UART read chunk, i.e. the largest single ingest
    pub buffer_size: usize,
    /// Read timeout of the UART pump in milliseconds
    pub poll_interval_ms: u64,
}

impl Default for UartConfig {
    fn default() -> Self {
        Self {
            baudrate: 115_200,
            buffer_size: 512,
            poll_interval_ms: 10,
        }
    }
}

/// Fan-out engine and connection worker settings
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Upper bound on bytes held by live buffers across all queues
    pub byte_budget: usize,
    /// Scratch buffer size for socket reads
    pub socket_buffer_size: usize,
    /// Bounded readiness wait of a connection worker in milliseconds
    pub poll_interval_ms: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            byte_budget: 16 * 1024,
            socket_buffer_size: 1024,
            poll_interval_ms: 10,
        }
    }
}

impl RelayConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Local TCP server configuration
#[derive(Debug, Clone)]
pub struct TcpServerConfig {
    /// Whether the local server runs at all
    pub enabled: bool,
    /// Bind address for the TCP server
    pub bind_address: &'static str,
    /// Port for the TCP server
    pub port: u16,
    /// Maximum number of concurrently connected local clients
    pub max_clients: usize,
    /// How often the accept loop checks for shutdown in milliseconds
    pub accept_poll_ms: u64,
}

impl Default for TcpServerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: "0.0.0.0",
            port: 8080,
            max_clients: 4,
            accept_poll_ms: 50,
        }
    }
}

/// Remote (cloud/gateway) client configuration
#[derive(Debug, Clone)]
pub struct RemoteClientConfig {
    /// Whether the remote client runs at all
    pub enabled: bool,
    /// Hostname or IP literal of the remote endpoint
    pub host: String<64>,
    /// Remote port
    pub port: u16,
    /// Pause between a disconnect (or failed attempt) and the next attempt
    pub retry_delay_ms: u64,
    /// How long one wait for the WiFi link blocks before re-checking
    pub link_wait_ms: u64,
    /// Per-address connect timeout
    pub connect_timeout_ms: u64,
}

impl Default for RemoteClientConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: String::new(),
            port: 9000,
            retry_delay_ms: 5_000,
            link_wait_ms: 10_000,
            connect_timeout_ms: 5_000,
        }
    }
}

impl RemoteClientConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn link_wait(&self) -> Duration {
        Duration::from_millis(self.link_wait_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Application configuration
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    /// WiFi configuration
    pub wifi: WiFiConfig,
    /// UART configuration
    pub uart: UartConfig,
    /// Fan-out engine configuration
    pub relay: RelayConfig,
    /// Local TCP server configuration
    pub tcp_server: TcpServerConfig,
    /// Remote TCP client configuration
    pub remote: RemoteClientConfig,
}

impl AppConfig {
    /// Reject settings the bridge cannot run with
    pub fn validate(&self) -> Result<()> {
        if !VALID_BAUDRATES.contains(&self.uart.baudrate) {
            return Err(Error::Configuration(format!(
                "unsupported baudrate {}",
                self.uart.baudrate
            )));
        }
        if self.uart.buffer_size == 0 || self.relay.socket_buffer_size == 0 {
            return Err(Error::Configuration("buffer sizes must be non-zero".into()));
        }
        if self.relay.byte_budget == 0 {
            return Err(Error::Configuration("byte budget must be non-zero".into()));
        }
        if self.tcp_server.enabled && self.tcp_server.max_clients == 0 {
            return Err(Error::Configuration(
                "local server enabled with zero client slots".into(),
            ));
        }
        if self.remote.enabled {
            if self.remote.host.is_empty() {
                return Err(Error::Configuration("remote client enabled without a host".into()));
            }
            if self.remote.port == 0 {
                return Err(Error::Configuration("remote port must be non-zero".into()));
            }
        }
        Ok(())
    }

    /// Apply `SPP_*` overrides looked up through `lookup`
    pub fn apply_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<std::string::String>,
    {
        if let Some(v) = lookup("SPP_LOCAL_ENABLE") {
            self.tcp_server.enabled = parse_flag("SPP_LOCAL_ENABLE", &v)?;
        }
        if let Some(v) = lookup("SPP_LOCAL_PORT") {
            self.tcp_server.port = parse_num("SPP_LOCAL_PORT", &v)?;
        }
        if let Some(v) = lookup("SPP_MAX_CLIENTS") {
            self.tcp_server.max_clients = parse_num("SPP_MAX_CLIENTS", &v)?;
        }
        if let Some(v) = lookup("SPP_REMOTE_ENABLE") {
            self.remote.enabled = parse_flag("SPP_REMOTE_ENABLE", &v)?;
        }
        if let Some(v) = lookup("SPP_REMOTE_HOST") {
            self.remote.host = String::try_from(v.as_str()).map_err(|_| {
                Error::Configuration(format!("SPP_REMOTE_HOST longer than 64 bytes: {}", v))
            })?;
        }
        if let Some(v) = lookup("SPP_REMOTE_PORT") {
            self.remote.port = parse_num("SPP_REMOTE_PORT", &v)?;
        }
        if let Some(v) = lookup("SPP_BYTE_BUDGET") {
            self.relay.byte_budget = parse_num("SPP_BYTE_BUDGET", &v)?;
        }
        Ok(self)
    }

    /// Defaults with overrides taken from the process environment
    pub fn from_env() -> Result<Self> {
        Self::default().apply_overrides(|key| std::env::var(key).ok())
    }
}

fn parse_flag(key: &str, value: &str) -> Result<bool> {
    match value.trim() {
        "1" | "true" | "on" | "yes" => Ok(true),
        "0" | "false" | "off" | "no" => Ok(false),
        other => Err(Error::Configuration(format!("{}: not a flag: {}", key, other))),
    }
}

fn parse_num<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Configuration(format!("{}: not a number: {}", key, value)))
}

/// Create a new application configuration with default values
pub fn create_config() -> AppConfig {
    AppConfig::default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<std::string::String> {
        let map: HashMap<std::string::String, std::string::String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let config = create_config();
        config.validate().unwrap();
        assert_eq!(config.tcp_server.port, 8080);
        assert!(!config.remote.enabled);
        assert_eq!(config.relay.poll_interval(), Duration::from_millis(10));
    }

    #[test]
    fn overrides_enable_remote_client() {
        let config = AppConfig::default()
            .apply_overrides(lookup_from(&[
                ("SPP_REMOTE_ENABLE", "1"),
                ("SPP_REMOTE_HOST", "gateway.local"),
                ("SPP_REMOTE_PORT", "7000"),
                ("SPP_MAX_CLIENTS", "2"),
            ]))
            .unwrap();

        assert!(config.remote.enabled);
        assert_eq!(config.remote.host.as_str(), "gateway.local");
        assert_eq!(config.remote.port, 7000);
        assert_eq!(config.tcp_server.max_clients, 2);
        config.validate().unwrap();
    }

    #[test]
    fn bad_override_is_configuration_error() {
        let err = AppConfig::default()
            .apply_overrides(lookup_from(&[("SPP_LOCAL_PORT", "eighty")]))
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn remote_without_host_is_rejected() {
        let mut config = AppConfig::default();
        config.remote.enabled = true;
        assert!(matches!(config.validate(), Err(Error::Configuration(_))));
    }

    #[test]
    fn unsupported_baudrate_is_rejected() {
        let mut config = AppConfig::default();
        config.uart.baudrate = 12345;
        assert!(config.validate().is_err());
    }
}
