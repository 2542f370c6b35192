// src/error.rs
//
// Error taxonomy for the link layer. Nothing here is fatal to the process;
// each variant is either recovered locally or surfaced once to the caller.

use thiserror::Error;

use crate::io::TransportKind;

#[derive(Debug, Error)]
pub enum LinkError {
    /// No device found, permission denied, or the port refused to open
    #[error("could not acquire {kind} transport: {message}")]
    Acquisition { kind: TransportKind, message: String },

    /// Mid-stream failure while the read loop was running
    #[error("{kind} read failed: {message}")]
    Read { kind: TransportKind, message: String },

    /// Token bytes were not valid UTF-8
    #[error("malformed token ({len} bytes): {source}")]
    Decode {
        len: usize,
        #[source]
        source: std::str::Utf8Error,
    },

    #[error("{kind} write failed: {message}")]
    Write { kind: TransportKind, message: String },

    #[error("log sink failed: {0}")]
    LogSink(String),

    /// A session of this kind is already open; close it first
    #[error("{0} session is already open")]
    AlreadyOpen(TransportKind),

    #[error("invalid configuration: {0}")]
    Settings(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl LinkError {
    pub(crate) fn acquisition(kind: TransportKind, message: impl Into<String>) -> Self {
        LinkError::Acquisition {
            kind,
            message: message.into(),
        }
    }

    pub(crate) fn read(kind: TransportKind, message: impl Into<String>) -> Self {
        LinkError::Read {
            kind,
            message: message.into(),
        }
    }

    pub(crate) fn write(kind: TransportKind, message: impl Into<String>) -> Self {
        LinkError::Write {
            kind,
            message: message.into(),
        }
    }
}
