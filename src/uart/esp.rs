//! ESP-IDF UART driver glue

use esp_idf_hal::delay::TickType;
use esp_idf_hal::gpio;
use esp_idf_hal::peripheral::Peripheral;
use esp_idf_hal::prelude::*;
use esp_idf_hal::uart::{config, UartDriver, UartRxDriver, UartTxDriver, UART1};
use log::{info, trace};
use std::sync::Mutex;
use std::time::Duration;

use super::{UartSink, UartSource};
use crate::config::{UartConfig, VALID_BAUDRATES};
use crate::error::{Error, Result};

/// UART1 split into independently locked transmit and receive halves, so a
/// pending read never delays bytes headed for the UART.
pub struct EspUart {
    tx: Mutex<UartTxDriver<'static>>,
    rx: Mutex<UartRxDriver<'static>>,
}

impl EspUart {
    pub fn new(
        uart: impl Peripheral<P = UART1> + 'static,
        tx_pin: impl Peripheral<P = impl gpio::OutputPin> + 'static,
        rx_pin: impl Peripheral<P = impl gpio::InputPin> + 'static,
        config: &UartConfig,
    ) -> Result<Self> {
        if !VALID_BAUDRATES.contains(&config.baudrate) {
            return Err(Error::Configuration(format!(
                "unsupported baudrate {}",
                config.baudrate
            )));
        }

        let uart_config = config::Config::new().baudrate(Hertz(config.baudrate));
        let driver = UartDriver::new(
            uart,
            tx_pin,
            rx_pin,
            Option::<gpio::Gpio0>::None, // RTS pin (not used)
            Option::<gpio::Gpio1>::None, // CTS pin (not used)
            &uart_config,
        )
        .map_err(|e| Error::Uart(format!("Failed to create UART driver: {}", e)))?;

        info!("UART initialized with baudrate: {}", config.baudrate);

        let (tx, rx) = driver.into_split();
        Ok(Self {
            tx: Mutex::new(tx),
            rx: Mutex::new(rx),
        })
    }
}

impl UartSink for EspUart {
    fn send(&self, data: &[u8]) -> Result<()> {
        let mut tx = self
            .tx
            .lock()
            .map_err(|_| Error::Uart("Failed to lock UART tx".to_string()))?;

        let mut written = 0;
        while written < data.len() {
            written += tx
                .write(&data[written..])
                .map_err(|e| Error::Uart(format!("Failed to write to UART: {}", e)))?;
        }

        if log::log_enabled!(log::Level::Trace) {
            trace!("UART sent {} bytes", data.len());
        }
        Ok(())
    }
}

impl UartSource for EspUart {
    fn receive(&self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let mut rx = self
            .rx
            .lock()
            .map_err(|_| Error::Uart("Failed to lock UART rx".to_string()))?;

        match rx.read(buf, TickType::from(timeout).ticks()) {
            Ok(len) => Ok(len),
            Err(e) if e.code() == esp_idf_sys::ESP_ERR_TIMEOUT as esp_idf_sys::esp_err_t => Ok(0),
            Err(e) => Err(Error::Uart(format!("Failed to read from UART: {}", e))),
        }
    }
}
