// src/lib.rs
//
// Line protocol bridge for micro:bit devices over USB serial and the
// Bluetooth UART service. Received bytes from either link are split into
// newline-delimited messages and routed to display, MIDI, graphics and
// custom sinks.

pub mod capture;
pub mod dispatch;
pub mod error;
pub mod framer;
pub mod io;
pub mod logging;
pub mod pipeline;
pub mod settings;

pub use capture::{CaptureHandle, FileLogSink, LogSink};
pub use dispatch::filter::FilterState;
pub use dispatch::graphics::GraphicsSink;
pub use dispatch::midi::MidiSink;
pub use dispatch::{Category, ChannelSink, CustomSink, DisplaySink, TextDispatcher};
pub use error::LinkError;
pub use framer::{Token, Tokenizer};
pub use io::{
    sanitize_outgoing, ConnectionSupervisor, SessionEvent, SessionState, StreamEndReason,
    Transport, TransportConfig, TransportKind, TransportSession,
};
pub use pipeline::Pipeline;
pub use settings::LinkSettings;
