// src/io/serial/mod.rs
//
// USB serial transport for the micro:bit.
//
// Features:
// - Blocking serialport I/O on a dedicated thread, chunks forwarded to the
//   session over a channel
// - Writes queued to the same thread, one result per request
// - Port discovery with micro:bit auto-detection by USB vendor id

pub mod reader;

pub use reader::{
    find_microbit_port, list_ports, Parity, SerialConfig, SerialPortInfo, SerialTransport,
};

/// USB vendor id of the BBC micro:bit (Arm mbed DAPLink)
pub const MICROBIT_USB_VID: u16 = 0x0D28;

/// Usual rates; 31250 is the MIDI wire rate
pub const BAUD_PRESETS: [u32; 3] = [115_200, 31_250, 9_600];

pub const DEFAULT_BAUD_RATE: u32 = 9_600;
