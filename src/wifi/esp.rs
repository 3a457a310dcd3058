//! ESP-IDF WiFi driver glue
//!
//! Runs the radio in mixed mode: the station joins the upstream network used
//! by the remote client, the access point lets local clients reach the TCP
//! server directly. Station link transitions are published to a [`WifiGate`].

use esp_idf_svc::eventloop::{EspSubscription, EspSystemEventLoop, System};
use esp_idf_svc::hal::modem::Modem;
use esp_idf_svc::netif::IpEvent;
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use esp_idf_svc::wifi::{
    AccessPointConfiguration, AuthMethod, ClientConfiguration, Configuration, EspWifi, WifiEvent,
};
use log::{info, warn};
use std::sync::Arc;

use super::WifiGate;
use crate::config::WiFiConfig;
use crate::error::{Error, Result};

/// Owns the WiFi driver and the event subscriptions feeding the gate
pub struct WiFiManager {
    wifi: Box<EspWifi<'static>>,
    config: WiFiConfig,
    _wifi_events: EspSubscription<'static, System>,
    _ip_events: EspSubscription<'static, System>,
}

impl WiFiManager {
    pub fn new(config: WiFiConfig, modem: Modem, gate: Arc<WifiGate>) -> Result<Self> {
        let nvs = EspDefaultNvsPartition::take()
            .map_err(|e| Error::WiFi(format!("Failed to take NVS partition: {}", e)))?;
        let sysloop = EspSystemEventLoop::take()
            .map_err(|e| Error::WiFi(format!("Failed to take system event loop: {}", e)))?;

        let wifi = Box::new(
            EspWifi::new(modem, sysloop.clone(), Some(nvs))
                .map_err(|e| Error::WiFi(format!("Failed to create WiFi driver: {}", e)))?,
        );

        let down_gate = Arc::clone(&gate);
        let wifi_events = sysloop
            .subscribe::<WifiEvent, _>(move |event| {
                if let WifiEvent::StaDisconnected(_) = event {
                    down_gate.set_up(false);
                    // SAFETY: the driver is started before any station event can fire.
                    let rc = unsafe { esp_idf_sys::esp_wifi_connect() };
                    if rc != 0 {
                        warn!("Station reconnect request failed: {}", rc);
                    }
                }
            })
            .map_err(|e| Error::WiFi(format!("Failed to subscribe to WiFi events: {}", e)))?;

        let up_gate = gate;
        let ip_events = sysloop
            .subscribe::<IpEvent, _>(move |event| {
                if let IpEvent::DhcpIpAssigned(_) = event {
                    up_gate.set_up(true);
                }
            })
            .map_err(|e| Error::WiFi(format!("Failed to subscribe to IP events: {}", e)))?;

        Ok(Self {
            wifi,
            config,
            _wifi_events: wifi_events,
            _ip_events: ip_events,
        })
    }

    /// Apply station + access point configuration
    pub fn configure_mixed_mode(&mut self) -> Result<()> {
        info!("Setting up WiFi AP with SSID: {}", self.config.ap_ssid);

        self.wifi
            .set_configuration(&Configuration::Mixed(
                ClientConfiguration {
                    ssid: self.config.client_ssid.clone(),
                    password: self.config.client_password.clone(),
                    auth_method: AuthMethod::WPA2Personal,
                    ..Default::default()
                },
                AccessPointConfiguration {
                    ssid: self.config.ap_ssid.clone(),
                    password: self.config.ap_password.clone(),
                    auth_method: AuthMethod::WPA2Personal,
                    channel: self.config.ap_channel,
                    max_connections: self.config.ap_max_connections,
                    ..Default::default()
                },
            ))
            .map_err(|e| Error::WiFi(format!("Failed to set WiFi configuration: {}", e)))
    }

    /// Start the radio and request the station connection.
    ///
    /// Does not wait for the link; the gate flips when DHCP completes.
    pub fn start(&mut self) -> Result<()> {
        self.wifi
            .start()
            .map_err(|e| Error::WiFi(format!("Failed to start WiFi: {}", e)))?;
        info!("WiFi started");

        if let Err(e) = self.wifi.connect() {
            warn!("WiFi station connect failed: {:?} (AP still available)", e);
        }

        match self.wifi.ap_netif().get_ip_info() {
            Ok(ap_info) => info!("AP IP address: {}", ap_info.ip),
            Err(e) => warn!("Failed to get AP IP address: {}", e),
        }
        Ok(())
    }
}
