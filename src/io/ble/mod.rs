// src/io/ble/mod.rs
//
// Bluetooth transport over the Nordic UART service. The device notifies
// received text on the TX characteristic and accepts writes on RX.

pub mod adapter;

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{Central, Characteristic, Peripheral as _, ScanFilter, ValueNotification, WriteType};
use btleplug::platform::{Adapter, Peripheral};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::LinkError;
use crate::io::{
    ChunkReader, ChunkWriter, Transport, TransportConfig, TransportKind, TransportStream,
};

const KIND: TransportKind = TransportKind::Ble;

// ============================================================================
// GATT UUIDs
// ============================================================================

pub const UART_SERVICE_UUID: Uuid = Uuid::from_u128(0x6e400001_b5a3_f393_e0a9_e50e24dcca9e);
/// Device to host (notify / indicate)
pub const UART_TX_UUID: Uuid = Uuid::from_u128(0x6e400002_b5a3_f393_e0a9_e50e24dcca9e);
/// Host to device (write)
pub const UART_RX_UUID: Uuid = Uuid::from_u128(0x6e400003_b5a3_f393_e0a9_e50e24dcca9e);

pub const DEFAULT_NAME_PREFIX: &str = "BBC micro:bit";

/// Default ATT payload; longer writes are split
const WRITE_CHUNK_SIZE: usize = 20;
const SCAN_POLL_INTERVAL: Duration = Duration::from_millis(500);
const WATCHDOG_INTERVAL: Duration = Duration::from_secs(2);

// ============================================================================
// Types
// ============================================================================

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BleConfig {
    /// Peripherals whose advertised name starts with this are accepted
    pub name_prefix: String,
    pub scan_timeout_ms: u64,
}

impl Default for BleConfig {
    fn default() -> Self {
        BleConfig {
            name_prefix: DEFAULT_NAME_PREFIX.to_string(),
            scan_timeout_ms: 10_000,
        }
    }
}

impl BleConfig {
    pub fn scan_timeout(&self) -> Duration {
        Duration::from_millis(self.scan_timeout_ms)
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct BleDevice {
    pub name: String,
    pub id: String,
    pub rssi: Option<i16>,
}

fn name_matches(name: Option<&str>, prefix: &str) -> bool {
    name.is_some_and(|n| n.starts_with(prefix))
}

// ============================================================================
// Scanning
// ============================================================================

/// Scan for `config.scan_timeout()` and report every matching peripheral.
pub async fn scan(config: &BleConfig) -> Result<Vec<BleDevice>, LinkError> {
    let adapter = adapter::radio().await?;
    start_scan(&adapter).await?;

    let mut found: Vec<BleDevice> = Vec::new();
    let deadline = tokio::time::Instant::now() + config.scan_timeout();
    while tokio::time::Instant::now() < deadline {
        tokio::time::sleep(SCAN_POLL_INTERVAL).await;
        for (peripheral, name, rssi) in matching_peripherals(&adapter, &config.name_prefix).await {
            let id = peripheral.id().to_string();
            if found.iter().any(|d| d.id == id) {
                continue;
            }
            debug!(%name, %id, ?rssi, "matched peripheral");
            found.push(BleDevice { name, id, rssi });
        }
    }

    let _ = adapter.stop_scan().await;
    Ok(found)
}

async fn start_scan(adapter: &Adapter) -> Result<(), LinkError> {
    // No service filter: the micro:bit does not advertise the UART service
    // in its primary advertisement, so matching is by name.
    adapter
        .start_scan(ScanFilter::default())
        .await
        .map_err(|e| LinkError::acquisition(KIND, format!("failed to start BLE scan: {e}")))
}

async fn matching_peripherals(
    adapter: &Adapter,
    prefix: &str,
) -> Vec<(Peripheral, String, Option<i16>)> {
    let Ok(peripherals) = adapter.peripherals().await else {
        return Vec::new();
    };
    let mut matches = Vec::new();
    for peripheral in peripherals {
        let props = match peripheral.properties().await.ok().flatten() {
            Some(p) => p,
            None => continue,
        };
        if name_matches(props.local_name.as_deref(), prefix) {
            let name = props.local_name.unwrap_or_default();
            matches.push((peripheral, name, props.rssi));
        }
    }
    matches
}

async fn find_peripheral(adapter: &Adapter, config: &BleConfig) -> Result<Peripheral, LinkError> {
    start_scan(adapter).await?;
    let deadline = tokio::time::Instant::now() + config.scan_timeout();

    let found = loop {
        if let Some((peripheral, name, _)) = matching_peripherals(adapter, &config.name_prefix)
            .await
            .into_iter()
            .next()
        {
            info!(%name, "found peripheral");
            break Some(peripheral);
        }
        if tokio::time::Instant::now() >= deadline {
            break None;
        }
        tokio::time::sleep(SCAN_POLL_INTERVAL).await;
    };

    let _ = adapter.stop_scan().await;
    found.ok_or_else(|| {
        LinkError::acquisition(
            KIND,
            format!("no peripheral named '{}*' found", config.name_prefix),
        )
    })
}

// ============================================================================
// Transport
// ============================================================================

#[derive(Debug, Default)]
pub struct BleTransport;

impl BleTransport {
    pub fn new() -> Self {
        BleTransport
    }
}

#[async_trait]
impl Transport for BleTransport {
    fn kind(&self) -> TransportKind {
        KIND
    }

    async fn open(&self, config: &TransportConfig) -> Result<TransportStream, LinkError> {
        let TransportConfig::Ble(config) = config else {
            return Err(LinkError::Settings(
                "bluetooth transport needs a bluetooth configuration".to_string(),
            ));
        };

        let adapter = adapter::radio().await?;
        let peripheral = find_peripheral(&adapter, config).await?;

        peripheral
            .connect()
            .await
            .map_err(|e| LinkError::acquisition(KIND, format!("failed to connect: {e}")))?;

        match attach(&peripheral).await {
            Ok(stream) => {
                info!(id = %peripheral.id(), "UART service attached");
                Ok(stream)
            }
            Err(e) => {
                let _ = peripheral.disconnect().await;
                Err(e)
            }
        }
    }
}

async fn attach(peripheral: &Peripheral) -> Result<TransportStream, LinkError> {
    peripheral
        .discover_services()
        .await
        .map_err(|e| LinkError::acquisition(KIND, format!("failed to discover services: {e}")))?;

    let tx_char = find_characteristic(peripheral, UART_TX_UUID)
        .ok_or_else(|| LinkError::acquisition(KIND, "device has no UART TX characteristic"))?;
    let rx_char = find_characteristic(peripheral, UART_RX_UUID)
        .ok_or_else(|| LinkError::acquisition(KIND, "device has no UART RX characteristic"))?;

    // Open the stream before subscribing so no early notification is missed
    let notifications = peripheral
        .notifications()
        .await
        .map_err(|e| LinkError::acquisition(KIND, format!("failed to open notifications: {e}")))?;
    peripheral
        .subscribe(&tx_char)
        .await
        .map_err(|e| LinkError::acquisition(KIND, format!("failed to subscribe to TX: {e}")))?;

    let mut watchdog = tokio::time::interval(WATCHDOG_INTERVAL);
    watchdog.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    Ok(TransportStream {
        reader: Box::new(BleReader {
            peripheral: peripheral.clone(),
            tx_char,
            notifications,
            watchdog,
        }),
        writer: Box::new(BleWriter {
            peripheral: Some(peripheral.clone()),
            rx_char,
        }),
    })
}

fn find_characteristic(peripheral: &Peripheral, uuid: Uuid) -> Option<Characteristic> {
    peripheral.characteristics().into_iter().find(|c| c.uuid == uuid)
}

// ============================================================================
// Halves
// ============================================================================

type NotificationStream = Pin<Box<dyn Stream<Item = ValueNotification> + Send>>;

struct BleReader {
    peripheral: Peripheral,
    tx_char: Characteristic,
    notifications: NotificationStream,
    watchdog: tokio::time::Interval,
}

#[async_trait]
impl ChunkReader for BleReader {
    async fn read_chunk(&mut self) -> Result<Option<Vec<u8>>, LinkError> {
        loop {
            tokio::select! {
                notification = self.notifications.next() => match notification {
                    Some(n) if n.uuid == UART_TX_UUID => return Ok(Some(n.value)),
                    Some(_) => continue,
                    None => return Ok(None),
                },
                _ = self.watchdog.tick() => {
                    // Link loss does not always end the notification stream
                    if !self.peripheral.is_connected().await.unwrap_or(false) {
                        warn!(id = %self.peripheral.id(), "peripheral disconnected");
                        return Ok(None);
                    }
                }
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.peripheral.unsubscribe(&self.tx_char).await {
            debug!("unsubscribe failed: {e}");
        }
    }
}

struct BleWriter {
    peripheral: Option<Peripheral>,
    rx_char: Characteristic,
}

#[async_trait]
impl ChunkWriter for BleWriter {
    async fn write_all(&mut self, bytes: &[u8]) -> Result<(), LinkError> {
        let peripheral = self
            .peripheral
            .as_ref()
            .ok_or_else(|| LinkError::write(KIND, "peripheral released"))?;
        for piece in bytes.chunks(WRITE_CHUNK_SIZE) {
            peripheral
                .write(&self.rx_char, piece, WriteType::WithResponse)
                .await
                .map_err(|e| LinkError::write(KIND, format!("failed to write RX: {e}")))?;
        }
        Ok(())
    }

    async fn close(&mut self) {
        if let Some(peripheral) = self.peripheral.take() {
            // The peripheral may already be gone
            let _ = peripheral.disconnect().await;
            info!(id = %peripheral.id(), "peripheral released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uart_uuids() {
        assert_eq!(UART_SERVICE_UUID.to_string(), "6e400001-b5a3-f393-e0a9-e50e24dcca9e");
        assert_eq!(UART_TX_UUID.to_string(), "6e400002-b5a3-f393-e0a9-e50e24dcca9e");
        assert_eq!(UART_RX_UUID.to_string(), "6e400003-b5a3-f393-e0a9-e50e24dcca9e");
    }

    #[test]
    fn test_name_prefix_match() {
        assert!(name_matches(Some("BBC micro:bit [zuvat]"), DEFAULT_NAME_PREFIX));
        assert!(!name_matches(Some("Headphones"), DEFAULT_NAME_PREFIX));
        assert!(!name_matches(Some("BBC"), DEFAULT_NAME_PREFIX));
        assert!(!name_matches(None, DEFAULT_NAME_PREFIX));
    }

    #[test]
    fn test_default_config() {
        let config = BleConfig::default();
        assert_eq!(config.name_prefix, "BBC micro:bit");
        assert_eq!(config.scan_timeout(), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_wrong_config_kind() {
        let config = TransportConfig::Serial(crate::io::SerialConfig::default());
        let err = BleTransport::new().open(&config).await.err().unwrap();
        assert!(matches!(err, LinkError::Settings(_)));
    }
}
