// src/io/ble/adapter.rs
//
// The host Bluetooth radio. Looked up once and reused by every scan and
// session; a failed lookup is not cached so plugging in a dongle later works.

use btleplug::api::{Central, Manager as _};
use btleplug::platform::{Adapter, Manager};
use once_cell::sync::Lazy;
use tokio::sync::Mutex;
use tracing::info;

use crate::error::LinkError;
use crate::io::TransportKind;

static RADIO: Lazy<Mutex<Option<Adapter>>> = Lazy::new(|| Mutex::new(None));

fn unavailable(message: String) -> LinkError {
    LinkError::acquisition(TransportKind::Ble, message)
}

/// The first Bluetooth adapter on this host.
pub async fn radio() -> Result<Adapter, LinkError> {
    let mut cached = RADIO.lock().await;
    if let Some(adapter) = cached.as_ref() {
        return Ok(adapter.clone());
    }

    let manager = Manager::new()
        .await
        .map_err(|e| unavailable(format!("bluetooth unavailable: {e}")))?;
    let adapter = manager
        .adapters()
        .await
        .map_err(|e| unavailable(format!("cannot list bluetooth adapters: {e}")))?
        .into_iter()
        .next()
        .ok_or_else(|| unavailable("no bluetooth adapter found".to_string()))?;

    if let Ok(description) = adapter.adapter_info().await {
        info!(adapter = %description, "bluetooth radio ready");
    }
    *cached = Some(adapter.clone());
    Ok(adapter)
}
