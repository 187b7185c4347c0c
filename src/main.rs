use clap::Parser;
use serial_port_hub::config::{Config, ConfigLoader};
use serial_port_hub::port::{available_ports, HexDump, ReadEvent, SerialPortDriver};
use serial_port_hub::registry::{OpenOutcome, PortRegistry, RegistrySettings, SharedPort};
use serial_port_hub::{logging, PortDescriptor};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};

// Command-line arguments
#[derive(Parser, Debug)]
#[command(
    version,
    about = "Opens serial lines, keeps them open and logs everything they receive.",
    long_about = "Opens every configured serial line through a shared registry, retries lines that are missing or busy, and logs each received chunk as hex until interrupted."
)]
struct Args {
    /// Configuration file (otherwise SERIAL_HUB_CONFIG, ./config.toml, then the platform config dir).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to open, as name[:baud[:flags]]. May be repeated.
    #[arg(short, long = "port", value_name = "PORT")]
    ports: Vec<String>,

    /// Receive buffer size in bytes.
    #[arg(long)]
    buffer_size: Option<usize>,

    /// Delay before retrying a failed open, in milliseconds.
    #[arg(long)]
    retry_delay_ms: Option<u64>,

    /// List the serial ports present on this system and exit.
    #[arg(short, long)]
    list: bool,
}

fn load_config(args: &Args) -> Result<Config, Box<dyn std::error::Error>> {
    let loader = match &args.config {
        Some(path) => ConfigLoader::load_from(path)?,
        None => ConfigLoader::load()?,
    };
    let mut config = loader.into_config();

    if let Some(size) = args.buffer_size {
        config.serial.buffer_size = size;
    }
    if let Some(delay) = args.retry_delay_ms {
        config.retry.delay_ms = delay;
    }
    for spec in &args.ports {
        let entry = config.serial.parse_port(spec)?;
        config.serial.ports.push(entry);
    }
    config.validate()?;
    Ok(config)
}

// --- Main Application Entry Point ---
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = load_config(&args)?;
    logging::init(&config.logging);

    if args.list {
        for port in available_ports()? {
            println!("{}\t{}", port.name, port.kind);
        }
        return Ok(());
    }

    if config.serial.ports.is_empty() {
        warn!("No ports configured; use --port or serial.ports in the config file");
    }

    let driver = Arc::new(SerialPortDriver::new(config.serial.read_timeout()));
    let registry = PortRegistry::new(driver, RegistrySettings::from(&config));
    registry.on_start()?;

    let descriptors: Vec<PortDescriptor> = config.serial.descriptors();
    let names: Vec<String> = descriptors.iter().map(|d| d.name().to_string()).collect();
    let startup = registry.clone();
    tokio::task::spawn_blocking(move || {
        for outcome in startup.open_all(descriptors) {
            if let OpenOutcome::Failed(e) = outcome {
                error!("Giving up on port: {}", e);
            }
        }
    })
    .await?;

    // Ports that are still retrying get their listener once they appear.
    let mut handles: Vec<SharedPort> = Vec::new();
    let mut waiting = names;
    attach_listeners(&registry, &mut waiting, &mut handles);
    info!(ports = ?registry.names(), "Serial Port Hub running, press Ctrl+C to stop");

    let mut tick = tokio::time::interval(config.retry.delay().min(Duration::from_secs(1)));
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = tick.tick(), if !waiting.is_empty() => {
                attach_listeners(&registry, &mut waiting, &mut handles);
            }
        }
    }

    tokio::task::spawn_blocking(move || {
        drop(handles);
        registry.shutdown();
    })
    .await?;

    Ok(())
}

/// Take a handle on every waiting port that is now open and log its reads.
fn attach_listeners(
    registry: &PortRegistry,
    waiting: &mut Vec<String>,
    handles: &mut Vec<SharedPort>,
) {
    waiting.retain(|name| match registry.get(name) {
        Some(port) => {
            port.add_listener(|event: &ReadEvent| {
                info!(port = event.port(), len = event.len(), "{}", HexDump(event.data()));
            });
            handles.push(port);
            false
        }
        None => true,
    });
}

// --- Graceful Shutdown Handler ---
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Signal received, starting graceful shutdown...");
}
