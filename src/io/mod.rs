// src/io/mod.rs
//
// Transport abstraction and session plumbing.
//
// A transport opens into a reader half (polled by the session's read loop)
// and a writer half (used by `write`). Concrete transports live in the
// `serial` and `ble` submodules.

pub mod ble;
#[cfg(test)]
pub(crate) mod mock;
pub mod serial;
pub mod session;
pub mod supervisor;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::LinkError;

pub use ble::{BleConfig, BleTransport};
pub use serial::{SerialConfig, SerialTransport};
pub use session::{SessionState, TransportSession};
pub use supervisor::ConnectionSupervisor;

// ============================================================================
// Transport kinds and configuration
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    Serial,
    Ble,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::Serial => write!(f, "serial"),
            TransportKind::Ble => write!(f, "bluetooth"),
        }
    }
}

/// Parameters for a single connect attempt
#[derive(Debug, Clone)]
pub enum TransportConfig {
    Serial(SerialConfig),
    Ble(BleConfig),
}

impl TransportConfig {
    pub fn kind(&self) -> TransportKind {
        match self {
            TransportConfig::Serial(_) => TransportKind::Serial,
            TransportConfig::Ble(_) => TransportKind::Ble,
        }
    }
}

// ============================================================================
// Transport traits
// ============================================================================

/// Source of byte chunks. `read_chunk` must be cancel safe: the session
/// races it against its cancellation signal.
#[async_trait]
pub trait ChunkReader: Send {
    /// Next chunk of bytes, or `None` at end of stream.
    async fn read_chunk(&mut self) -> Result<Option<Vec<u8>>, LinkError>;

    async fn close(&mut self);
}

#[async_trait]
pub trait ChunkWriter: Send {
    async fn write_all(&mut self, bytes: &[u8]) -> Result<(), LinkError>;

    async fn close(&mut self);
}

/// Both halves of an open transport
pub struct TransportStream {
    pub reader: Box<dyn ChunkReader>,
    pub writer: Box<dyn ChunkWriter>,
}

#[async_trait]
pub trait Transport: Send + Sync {
    fn kind(&self) -> TransportKind;

    /// Acquire the device and open it with `config`.
    async fn open(&self, config: &TransportConfig) -> Result<TransportStream, LinkError>;
}

// ============================================================================
// Session events
// ============================================================================

/// Why a read loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEndReason {
    /// Cancelled by `disconnect`
    Stopped,
    /// The transport reported end of stream
    Disconnected,
    /// A read failed
    Error,
}

/// Diagnostics surfaced to the owner of a supervisor
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Connected {
        kind: TransportKind,
    },
    Error {
        kind: TransportKind,
        message: String,
    },
    StreamEnded {
        kind: TransportKind,
        reason: StreamEndReason,
    },
    TokenDropped {
        kind: TransportKind,
        len: usize,
        reason: String,
    },
    LoggingDisabled {
        reason: String,
    },
}

pub type EventSender = mpsc::UnboundedSender<SessionEvent>;

pub(crate) fn emit(events: &EventSender, event: SessionEvent) {
    // The receiver may have been dropped; events are advisory
    let _ = events.send(event);
}

/// Strip embedded line breaks and terminate with exactly one delimiter.
pub fn sanitize_outgoing(text: &str) -> Vec<u8> {
    let mut bytes: Vec<u8> = text
        .bytes()
        .filter(|&b| b != b'\n' && b != b'\r')
        .collect();
    bytes.push(crate::framer::DELIMITER);
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_appends_single_newline() {
        assert_eq!(sanitize_outgoing("Hello"), b"Hello\n");
        assert_eq!(sanitize_outgoing("Hello\n"), b"Hello\n");
        assert_eq!(sanitize_outgoing("a\r\nb\n\n"), b"ab\n");
        assert_eq!(sanitize_outgoing(""), b"\n");
    }

    #[test]
    fn test_config_kind() {
        let serial = TransportConfig::Serial(SerialConfig::default());
        let ble = TransportConfig::Ble(BleConfig::default());
        assert_eq!(serial.kind(), TransportKind::Serial);
        assert_eq!(ble.kind(), TransportKind::Ble);
    }
}
