//! usb-mouse-listener
//!
//! Finds the first HID boot-protocol mouse, claims it and logs every raw
//! interrupt report it sends until interrupted.

use anyhow::{Context, Result};
use clap::Parser;
use common::setup_logging;
use listener::config::{ListenerConfig, expand_path};
use listener::{
    DeviceEnumerator, HexLogger, ListenerBridge, ListenerEvent, RusbHost, SelectionStrategy,
    create_listener_bridge, spawn_listener,
};
use tokio::signal;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "usb-mouse-listener")]
#[command(
    author,
    version,
    about = "Read raw interrupt reports from a USB HID mouse"
)]
#[command(long_about = "
Opens the first HID boot-protocol mouse found on the host, claims its
interface (detaching the kernel driver) and prints every raw interrupt
report as hex until Ctrl+C.

EXAMPLES:
    # Listen on the first mouse
    usb-mouse-listener

    # Listen on every mouse endpoint found
    usb-mouse-listener --all

    # Show candidate endpoints and exit
    usb-mouse-listener --list-devices

CONFIGURATION:
    1. Path specified with --config
    2. ~/.config/usb-mouse-listener/listener.toml
    3. /etc/usb-mouse-listener/listener.toml
    4. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<std::path::PathBuf>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// List mouse candidates and exit
    #[arg(long)]
    list_devices: bool,

    /// Attach to every candidate instead of the first
    #[arg(long)]
    all: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.save_config {
        let config = ListenerConfig::default();
        let path = match &args.config {
            Some(path) => expand_path(path),
            None => ListenerConfig::default_path(),
        };
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let config = if let Some(ref path) = args.config {
        ListenerConfig::load(Some(path.clone())).context("Failed to load configuration")?
    } else {
        ListenerConfig::load_or_default()
    };

    let log_level = args
        .log_level
        .as_deref()
        .unwrap_or(&config.listener.log_level);
    setup_logging(log_level).context("Failed to setup logging")?;

    info!("usb-mouse-listener v{}", env!("CARGO_PKG_VERSION"));

    if args.list_devices {
        return list_devices_mode();
    }

    let mut options = config
        .session_options()
        .context("Invalid listener configuration")?;
    if args.all {
        options.strategy = SelectionStrategy::All;
    }

    let (bridge, worker) = create_listener_bridge();
    let listener_handle =
        spawn_listener(worker, options, HexLogger::new()).context("Failed to spawn listener")?;

    let events_task = tokio::spawn(forward_events(bridge.clone()));
    let mut join = tokio::task::spawn_blocking(move || listener_handle.join());

    let finished = tokio::select! {
        joined = &mut join => Some(joined),
        result = signal::ctrl_c() => {
            match result {
                Ok(()) => info!("Received Ctrl+C, shutting down gracefully..."),
                Err(e) => error!("Error waiting for Ctrl+C: {}", e),
            }
            None
        }
    };

    let joined = match finished {
        Some(joined) => joined,
        None => {
            if let Err(e) = bridge.shutdown().await {
                // Listener already gone
                warn!("Could not deliver shutdown: {}", e);
            }
            join.await
        }
    };
    let outcome = joined.context("Failed to join listener thread")?;
    events_task.abort();

    match outcome {
        Ok(Ok(reason)) => {
            info!("Listener stopped: {}", reason);
            Ok(())
        }
        Ok(Err(e)) => Err(anyhow::Error::new(e).context("Listener failed")),
        Err(e) => {
            error!("Listener thread panicked: {:?}", e);
            anyhow::bail!("listener thread panicked")
        }
    }
}

/// Enumerate candidates and print them
fn list_devices_mode() -> Result<()> {
    let mut host = RusbHost::new().context("Failed to initialize libusb")?;
    let candidates =
        DeviceEnumerator::try_discover(&mut host).context("Failed to enumerate USB devices")?;

    if candidates.is_empty() {
        println!("No HID boot mouse found.");
    } else {
        println!("Found {} mouse endpoint(s):\n", candidates.len());
        for (i, c) in candidates.iter().enumerate() {
            println!(
                "  [{}] {:04x}:{:04x} endpoint {:#04x}",
                i, c.vendor_id, c.product_id, c.endpoint_address
            );
        }
    }
    Ok(())
}

/// Log listener events that are not already logged by the listener thread
async fn forward_events(bridge: ListenerBridge) {
    while let Ok(event) = bridge.recv_event().await {
        match event {
            ListenerEvent::Attached { candidate } => info!("Attached to {}", candidate),
            ListenerEvent::AutoDetachFailed { candidate, error } => {
                warn!("Kernel driver auto-detach unavailable on {}: {}", candidate, error)
            }
            ListenerEvent::AttachFailed { candidate, error } => {
                warn!("Could not attach to {}: {}", candidate, error)
            }
            ListenerEvent::TransferFailed { candidate, status } => {
                warn!("{} went silent ({})", candidate, status)
            }
            ListenerEvent::ResubmissionFailed { candidate, error } => {
                warn!("{} retired after resubmission failure: {}", candidate, error)
            }
            ListenerEvent::Stopped { reason } => info!("Listener stopping: {}", reason),
        }
    }
}
