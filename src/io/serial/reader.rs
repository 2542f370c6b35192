// src/io/serial/reader.rs
//
// Serial transport. The port is owned by a blocking worker thread that reads
// with a short timeout and services queued writes between reads, so reading
// and writing never contend for the port.

use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serialport::{DataBits, SerialPort, SerialPortBuilder, SerialPortType, StopBits};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{DEFAULT_BAUD_RATE, MICROBIT_USB_VID};
use crate::error::LinkError;
use crate::io::{
    ChunkReader, ChunkWriter, Transport, TransportConfig, TransportKind, TransportStream,
};

const KIND: TransportKind = TransportKind::Serial;

/// Short read timeout keeps the worker responsive to stop and write requests
const READ_TIMEOUT: Duration = Duration::from_millis(50);
const WRITE_TIMEOUT: Duration = Duration::from_millis(500);

// ============================================================================
// Configuration
// ============================================================================

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Port path; `None` picks the first attached micro:bit
    pub port: Option<String>,
    pub baud_rate: u32,
    pub data_bits: u8,
    pub stop_bits: u8,
    pub parity: Parity,
}

impl Default for SerialConfig {
    fn default() -> Self {
        SerialConfig {
            port: None,
            baud_rate: DEFAULT_BAUD_RATE,
            data_bits: 8,
            stop_bits: 1,
            parity: Parity::None,
        }
    }
}

impl SerialConfig {
    /// Framing in the usual `8N1` notation
    pub fn frame_format(&self) -> String {
        let parity = match self.parity {
            Parity::None => 'N',
            Parity::Odd => 'O',
            Parity::Even => 'E',
        };
        format!("{}{}{}", self.data_bits, parity, self.stop_bits)
    }

    /// Line settings as the driver understands them. Data bits outside 5..=7
    /// mean 8; stop bits other than 2 mean 1.
    fn line_settings(&self) -> (DataBits, serialport::Parity, StopBits) {
        let data_bits = match self.data_bits {
            5 => DataBits::Five,
            6 => DataBits::Six,
            7 => DataBits::Seven,
            _ => DataBits::Eight,
        };
        let parity = match self.parity {
            Parity::None => serialport::Parity::None,
            Parity::Odd => serialport::Parity::Odd,
            Parity::Even => serialport::Parity::Even,
        };
        let stop_bits = if self.stop_bits == 2 {
            StopBits::Two
        } else {
            StopBits::One
        };
        (data_bits, parity, stop_bits)
    }

    /// Builder for `port` with this framing and the worker's read timeout
    pub fn builder(&self, port: &str) -> SerialPortBuilder {
        let (data_bits, parity, stop_bits) = self.line_settings();
        serialport::new(port, self.baud_rate)
            .data_bits(data_bits)
            .parity(parity)
            .stop_bits(stop_bits)
            .timeout(READ_TIMEOUT)
    }
}

/// Write request handed to the worker thread
struct TransmitRequest {
    data: Vec<u8>,
    result_tx: oneshot::Sender<Result<(), String>>,
}

type ChunkResult = Result<Vec<u8>, String>;

// ============================================================================
// Port discovery
// ============================================================================

/// One attached port, as shown by `bitlink ports`
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SerialPortInfo {
    pub port_name: String,
    /// USB product or manufacturer string, else the bus type
    pub label: String,
    /// USB vendor and product id
    pub usb_id: Option<(u16, u16)>,
}

impl SerialPortInfo {
    pub fn is_microbit(&self) -> bool {
        matches!(self.usb_id, Some((vid, _)) if vid == MICROBIT_USB_VID)
    }

    fn from_driver(port: serialport::SerialPortInfo) -> Self {
        let (label, usb_id) = match port.port_type {
            SerialPortType::UsbPort(usb) => (
                usb.product
                    .or(usb.manufacturer)
                    .unwrap_or_else(|| "USB".to_string()),
                Some((usb.vid, usb.pid)),
            ),
            SerialPortType::BluetoothPort => ("Bluetooth".to_string(), None),
            SerialPortType::PciPort => ("PCI".to_string(), None),
            SerialPortType::Unknown => ("unknown".to_string(), None),
        };
        SerialPortInfo {
            port_name: port.port_name,
            label,
            usb_id,
        }
    }
}

/// macOS lists every device twice; the /dev/tty.* twin blocks on open
/// waiting for carrier detect, so only /dev/cu.* is kept.
fn is_dial_in_twin(port_name: &str) -> bool {
    cfg!(target_os = "macos") && port_name.starts_with("/dev/tty.")
}

/// micro:bits first, then by name
fn sort_ports(ports: &mut [SerialPortInfo]) {
    ports.sort_by(|a, b| {
        b.is_microbit()
            .cmp(&a.is_microbit())
            .then_with(|| a.port_name.cmp(&b.port_name))
    });
}

/// Attached serial ports, micro:bits first.
pub fn list_ports() -> Result<Vec<SerialPortInfo>, LinkError> {
    let mut ports: Vec<SerialPortInfo> = serialport::available_ports()
        .map_err(|e| LinkError::acquisition(KIND, format!("failed to enumerate ports: {}", e)))?
        .into_iter()
        .filter(|p| !is_dial_in_twin(&p.port_name))
        .map(SerialPortInfo::from_driver)
        .collect();
    sort_ports(&mut ports);
    Ok(ports)
}

/// Path of the first attached micro:bit, if any
pub fn find_microbit_port() -> Result<Option<String>, LinkError> {
    Ok(list_ports()?
        .into_iter()
        .find(SerialPortInfo::is_microbit)
        .map(|p| p.port_name))
}

// ============================================================================
// Transport
// ============================================================================

#[derive(Debug, Default)]
pub struct SerialTransport;

impl SerialTransport {
    pub fn new() -> Self {
        SerialTransport
    }
}

#[async_trait]
impl Transport for SerialTransport {
    fn kind(&self) -> TransportKind {
        KIND
    }

    async fn open(&self, config: &TransportConfig) -> Result<TransportStream, LinkError> {
        let TransportConfig::Serial(config) = config else {
            return Err(LinkError::Settings(
                "serial transport needs a serial configuration".to_string(),
            ));
        };
        if config.baud_rate == 0 {
            return Err(LinkError::Settings(format!(
                "invalid baud rate {}",
                config.baud_rate
            )));
        }

        let port_name = match &config.port {
            Some(name) => name.clone(),
            None => find_microbit_port()?
                .ok_or_else(|| LinkError::acquisition(KIND, "no micro:bit found"))?,
        };

        let port = open_port(port_name.clone(), config.clone()).await?;

        info!(
            port = %port_name,
            baud = config.baud_rate,
            "opened {}",
            config.frame_format()
        );

        let stop_flag = Arc::new(AtomicBool::new(false));
        let (chunk_tx, chunk_rx) = mpsc::channel::<ChunkResult>(64);
        let (transmit_tx, transmit_rx) = std_mpsc::sync_channel::<TransmitRequest>(32);

        let worker_stop = stop_flag.clone();
        let worker = tokio::task::spawn_blocking(move || {
            run_port_blocking(port, port_name, chunk_tx, transmit_rx, worker_stop)
        });

        Ok(TransportStream {
            reader: Box::new(SerialReader {
                rx: chunk_rx,
                stop_flag,
                worker: Some(worker),
            }),
            writer: Box::new(SerialWriter {
                transmit_tx: Some(transmit_tx),
            }),
        })
    }
}

async fn open_port(
    port_name: String,
    config: SerialConfig,
) -> Result<Box<dyn SerialPort>, LinkError> {
    tokio::task::spawn_blocking(move || {
        config
            .builder(&port_name)
            .open()
            .map_err(|e| LinkError::acquisition(KIND, format!("failed to open {}: {}", port_name, e)))
    })
    .await
    .map_err(|e| LinkError::acquisition(KIND, format!("open task failed: {}", e)))?
}

/// Worker loop. Ends on stop, end of file, a read error, or when the reader
/// half goes away; the port is closed when it returns.
fn run_port_blocking(
    mut port: Box<dyn SerialPort>,
    port_name: String,
    chunk_tx: mpsc::Sender<ChunkResult>,
    transmit_rx: std_mpsc::Receiver<TransmitRequest>,
    stop_flag: Arc<AtomicBool>,
) {
    let mut buf = [0u8; 256];

    loop {
        if stop_flag.load(Ordering::SeqCst) || chunk_tx.is_closed() {
            debug!(port = %port_name, "worker stopping");
            break;
        }

        // Service pending writes (non-blocking)
        while let Ok(req) = transmit_rx.try_recv() {
            let result = port
                .write_all(&req.data)
                .and_then(|_| port.flush())
                .map_err(|e| format!("write to {} failed: {}", port_name, e));
            let _ = req.result_tx.send(result);
        }

        match port.read(&mut buf) {
            Ok(0) => {
                debug!(port = %port_name, "end of file");
                break;
            }
            Ok(n) => {
                if chunk_tx.blocking_send(Ok(buf[..n].to_vec())).is_err() {
                    break;
                }
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => {}
            Err(e) => {
                warn!(port = %port_name, "read error: {}", e);
                let _ = chunk_tx.blocking_send(Err(format!("read from {} failed: {}", port_name, e)));
                break;
            }
        }
    }
}

// ============================================================================
// Halves
// ============================================================================

struct SerialReader {
    rx: mpsc::Receiver<ChunkResult>,
    stop_flag: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

#[async_trait]
impl ChunkReader for SerialReader {
    async fn read_chunk(&mut self) -> Result<Option<Vec<u8>>, LinkError> {
        match self.rx.recv().await {
            Some(Ok(chunk)) => Ok(Some(chunk)),
            Some(Err(message)) => Err(LinkError::read(KIND, message)),
            None => Ok(None),
        }
    }

    async fn close(&mut self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        self.rx.close();
        if let Some(worker) = self.worker.take() {
            if let Err(e) = worker.await {
                warn!("serial worker panicked: {}", e);
            }
        }
    }
}

struct SerialWriter {
    transmit_tx: Option<std_mpsc::SyncSender<TransmitRequest>>,
}

#[async_trait]
impl ChunkWriter for SerialWriter {
    async fn write_all(&mut self, bytes: &[u8]) -> Result<(), LinkError> {
        let tx = self
            .transmit_tx
            .as_ref()
            .ok_or_else(|| LinkError::write(KIND, "port closed"))?;

        let (result_tx, result_rx) = oneshot::channel();
        tx.try_send(TransmitRequest {
            data: bytes.to_vec(),
            result_tx,
        })
        .map_err(|e| LinkError::write(KIND, format!("failed to queue write: {}", e)))?;

        match tokio::time::timeout(WRITE_TIMEOUT, result_rx).await {
            Ok(Ok(result)) => result.map_err(|message| LinkError::write(KIND, message)),
            Ok(Err(_)) => Err(LinkError::write(KIND, "port closed before write completed")),
            Err(_) => Err(LinkError::write(KIND, "write timed out")),
        }
    }

    async fn close(&mut self) {
        self.transmit_tx = None;
    }
}

// ============================================================================
// Tests
// ============================================================================
