use clap::{Parser, Subcommand};
use serial_core::config::{Config, ConfigLoader};
use serial_core::enumerate::{list_devices, SystemEnumerator};
use serial_core::listener::Listener;
use serial_core::{
    logging, BaudRate, LineStatus, OpenOptions, PortConfiguration, PortMonitor, SerialPort,
    ThreadRegistry,
};
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};
use tokio::signal;
use tokio::sync::mpsc;
use tracing::info;

// Command-line arguments
#[derive(Parser, Debug)]
#[command(
    version,
    about = "Inspect, drive and watch serial ports.",
    long_about = "Opens terminal devices in raw mode, applies line settings through termios and runs background listeners for data, modem lines and device presence."
)]
struct Args {
    /// Configuration file (otherwise the standard locations are searched).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List serial devices known to the system.
    Ports,
    /// Print the effective configuration as TOML.
    Config,
    /// Show the decoded line settings and modem lines of a port.
    Status {
        path: PathBuf,
    },
    /// Write bytes to a port.
    Send {
        path: PathBuf,
        data: String,
        /// Line speed (defaults to the configured one).
        #[arg(short, long)]
        baud: Option<u32>,
        /// Append a newline.
        #[arg(short = 'n', long)]
        newline: bool,
    },
    /// Print incoming data and modem line changes until Ctrl-C.
    Listen {
        path: PathBuf,
        #[arg(short, long)]
        baud: Option<u32>,
    },
    /// Report when a device appears or disappears until Ctrl-C.
    Monitor {
        path: PathBuf,
    },
}

enum Event {
    Data(Vec<u8>),
    Lines(LineStatus),
    Presence(bool),
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = match &args.config {
        Some(path) => ConfigLoader::load_from(path)?,
        None => ConfigLoader::load()?,
    }
    .into_config();
    logging::init(&config.logging);

    match args.command {
        Command::Ports => {
            let devices = list_devices(&SystemEnumerator)?;
            println!("{}", serde_json::to_string_pretty(&devices)?);
        }
        Command::Config => print!("{}", toml::to_string_pretty(&config)?),
        Command::Status { path } => {
            let port = open(&config, &path, None)?;
            let status = serde_json::json!({
                "path": port.path(),
                "configuration": port.configuration()?,
                "lines": port.line_status()?,
                "queued": port.byte_counts()?,
            });
            println!("{}", serde_json::to_string_pretty(&status)?);
            port.close()?;
        }
        Command::Send {
            path,
            data,
            baud,
            newline,
        } => {
            let port = open(&config, &path, baud)?;
            let mut bytes = data.into_bytes();
            if newline {
                bytes.push(b'\n');
            }
            port.write_all(&bytes)?;
            info!(path = %path.display(), len = bytes.len(), "sent");
            port.close()?;
        }
        Command::Listen { path, baud } => listen(&config, &path, baud).await?,
        Command::Monitor { path } => monitor(&config, path).await?,
    }

    Ok(())
}

fn open(config: &Config, path: &Path, baud: Option<u32>) -> serial_core::Result<SerialPort> {
    let mut settings: PortConfiguration = config.defaults.port;
    if let Some(baud) = baud {
        settings.baud = BaudRate::from_rate(baud);
    }
    SerialPort::open(
        path,
        OpenOptions::new()
            .exclusive(config.defaults.exclusive)
            .config(settings),
    )
}

async fn listen(
    config: &Config,
    path: &Path,
    baud: Option<u32>,
) -> Result<(), Box<dyn std::error::Error>> {
    let port = open(config, path, baud)?;
    let fd = port.as_raw_fd();
    let registry = ThreadRegistry::from_config(config);
    let (tx, mut rx) = mpsc::unbounded_channel();

    let data_tx = tx.clone();
    let slot = registry.register(
        fd,
        Listener::data(move |bytes: &[u8]| {
            let _ = data_tx.send(Event::Data(bytes.to_vec()));
        })
        .with_gate(port.config_gate()),
    )?;
    registry.start_listener(
        &slot,
        Listener::event(move |status: LineStatus| {
            let _ = tx.send(Event::Lines(status));
        }),
    )?;
    info!(path = %path.display(), fd, "listening, press Ctrl-C to stop");

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => break,
            event = rx.recv() => match event {
                Some(Event::Data(bytes)) => println!("{}", String::from_utf8_lossy(&bytes)),
                Some(Event::Lines(status)) => println!("{}", serde_json::to_string(&status)?),
                Some(Event::Presence(_)) => {}
                None => break,
            },
        }
    }

    registry.shutdown();
    port.close()?;
    Ok(())
}

async fn monitor(config: &Config, path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let monitor = PortMonitor::from_config(config);
    let (tx, mut rx) = mpsc::unbounded_channel();

    // Nothing is opened, so there is no descriptor to record.
    monitor.register(-1, &path, move |present: bool| {
        let _ = tx.send(Event::Presence(present));
    })?;
    info!(path = %path.display(), "monitoring, press Ctrl-C to stop");

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => break,
            event = rx.recv() => match event {
                Some(Event::Presence(true)) => println!("{} attached", path.display()),
                Some(Event::Presence(false)) => println!("{} removed", path.display()),
                Some(_) => {}
                None => break,
            },
        }
    }

    monitor.shutdown();
    Ok(())
}
