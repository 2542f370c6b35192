// src/main.rs
//
// Command-line front end: list ports, or connect and print what the
// device sends while forwarding stdin lines to it.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use bitlink_lib::io::{ble, serial, BleTransport, SerialTransport};
use bitlink_lib::settings::default_settings_path;
use bitlink_lib::{
    ConnectionSupervisor, DisplaySink, FileLogSink, GraphicsSink, LinkSettings, MidiSink,
    Pipeline, SessionEvent, TextDispatcher, TransportConfig, TransportKind,
};

#[derive(Parser)]
#[command(name = "bitlink", version, about = "micro:bit serial and Bluetooth UART bridge")]
struct Cli {
    /// Settings file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List serial ports, optionally scanning for Bluetooth devices too
    Ports {
        #[arg(long)]
        ble: bool,
    },
    /// Open sessions and bridge them to the terminal
    Connect(ConnectArgs),
}

#[derive(Args)]
struct ConnectArgs {
    /// Serial port path; auto-detected when omitted
    #[arg(long)]
    serial: Option<String>,
    #[arg(long)]
    baud: Option<u32>,
    /// Connect over Bluetooth (serial is skipped unless --serial is given)
    #[arg(long)]
    ble: bool,
    /// Capture raw received text into a timestamped file in DIR
    #[arg(long, value_name = "DIR")]
    log: Option<PathBuf>,
    #[arg(long)]
    no_midi: bool,
    #[arg(long)]
    no_graphics: bool,
    #[arg(long)]
    no_other: bool,
}

struct PrintDisplay;

impl DisplaySink for PrintDisplay {
    fn show(&mut self, message: &str) {
        println!("{message}");
    }
}

struct PrintMidi;

impl MidiSink for PrintMidi {
    fn note_on(&mut self, channel: u32, note: u32, velocity: u32) {
        println!("  midi note-on ch={channel} note={note} vel={velocity}");
    }

    fn note_off(&mut self, channel: u32, note: u32, velocity: u32) {
        println!("  midi note-off ch={channel} note={note} vel={velocity}");
    }

    fn control_change(&mut self, channel: u32, controller: u32, value: u32) {
        println!("  midi cc ch={channel} ctrl={controller} val={value}");
    }
}

struct PrintGraphics;

impl GraphicsSink for PrintGraphics {
    fn pitch(&mut self, degrees: i32) {
        println!("  graphics pitch={degrees}");
    }

    fn roll(&mut self, degrees: i32) {
        println!("  graphics roll={degrees}");
    }

    fn knob0(&mut self, value: u32) {
        println!("  graphics knob0={value}");
    }

    fn knob1(&mut self, value: u32) {
        println!("  graphics knob1={value}");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings_path = match cli.config {
        Some(path) => path,
        None => default_settings_path()?,
    };
    let settings = LinkSettings::load(&settings_path)
        .with_context(|| format!("loading {}", settings_path.display()))?;
    bitlink_lib::logging::init_tracing(&settings.log.level);

    match cli.command {
        Command::Ports { ble } => list_ports(&settings, ble).await,
        Command::Connect(args) => connect(settings, args).await,
    }
}

async fn list_ports(settings: &LinkSettings, scan_ble: bool) -> Result<()> {
    for port in serial::list_ports()? {
        let marker = if port.is_microbit() { " (micro:bit)" } else { "" };
        let usb_id = port
            .usb_id
            .map(|(vid, pid)| format!("{vid:04x}:{pid:04x}"))
            .unwrap_or_else(|| "-".into());
        println!("{}  {}  {}{}", port.port_name, usb_id, port.label, marker);
    }
    if scan_ble {
        println!("scanning for '{}*'...", settings.ble.name_prefix);
        for device in ble::scan(&settings.ble).await? {
            let rssi = device.rssi.map(|r| r.to_string()).unwrap_or_else(|| "-".into());
            println!("{}  {}  rssi {}", device.name, device.id, rssi);
        }
    }
    Ok(())
}

async fn connect(mut settings: LinkSettings, args: ConnectArgs) -> Result<()> {
    if args.no_midi {
        settings.filters.midi = false;
    }
    if args.no_graphics {
        settings.filters.graphics = false;
    }
    if args.no_other {
        settings.filters.other = false;
    }
    if let Some(port) = args.serial.clone() {
        settings.serial.port = Some(port);
    }
    if let Some(baud) = args.baud {
        settings.serial.baud_rate = baud;
    }
    settings.validate()?;

    let mut dispatcher = TextDispatcher::new(Arc::new(settings.filter_state()));
    dispatcher.set_display(PrintDisplay);
    dispatcher.set_midi(PrintMidi);
    dispatcher.set_graphics(PrintGraphics);

    let (mut supervisor, mut events) = ConnectionSupervisor::new(Arc::new(Pipeline::new(dispatcher)));
    supervisor.register_transport(Arc::new(SerialTransport::new()));
    supervisor.register_transport(Arc::new(BleTransport::new()));

    if let Some(dir) = args.log.as_ref().or(settings.log.directory.as_ref()) {
        supervisor.start_log(Box::new(FileLogSink::create_in(dir)?))?;
    }

    let mut kinds = Vec::new();
    if args.serial.is_some() || !args.ble {
        kinds.push(TransportKind::Serial);
    }
    if args.ble {
        kinds.push(TransportKind::Ble);
    }
    for kind in kinds {
        let config: TransportConfig = settings.transport_config(kind);
        if let Err(e) = supervisor.open(kind, &config).await {
            warn!(%kind, "{}", e);
        }
    }
    if supervisor.open_kinds().is_empty() {
        supervisor.shutdown().await?;
        bail!("no session could be opened");
    }

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = stdin.next_line() => match line? {
                Some(line) => {
                    if let Err(e) = supervisor.send(&line).await {
                        warn!("{}", e);
                    }
                }
                None => break,
            },
            Some(event) = events.recv() => {
                if let SessionEvent::StreamEnded { kind, reason } = &event {
                    info!(%kind, ?reason, "stream ended");
                    if supervisor.open_kinds().is_empty() {
                        break;
                    }
                } else {
                    info!(?event, "session event");
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    supervisor.shutdown().await?;
    let stats = supervisor.pipeline().with_dispatcher(|d| d.stats());
    info!(dispatched = stats.dispatched, dropped = stats.dropped, "disconnected");
    Ok(())
}
