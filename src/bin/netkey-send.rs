//! netkey sender binary
//!
//! Reads a passphrase from stdin and delivers it to a waiting receiver on
//! the link, answering its requests until it acknowledges.

use clap::Parser;
use netkey::{interface_index, respond_with_passphrase, Config, MulticastSocket, ResponderOutcome};
use std::io::Read;
use std::path::PathBuf;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, EnvFilter};
use zeroize::Zeroizing;

/// Deliver a passphrase to a waiting netkey receiver
#[derive(Parser, Debug)]
#[command(name = "netkey-send", version, about)]
struct Args {
    /// Path to configuration file (overrides default search paths)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Interface to send on (overrides interface.name)
    #[arg(short, long, value_name = "NAME")]
    interface: Option<String>,

    /// Drop one trailing newline from the input
    #[arg(long)]
    strip_newline: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(config_path) => match Config::load_file(config_path) {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load configuration from {}: {}", config_path.display(), e);
                std::process::exit(1);
            }
        },
        None => match Config::load() {
            Ok((config, _)) => config,
            Err(e) => {
                error!("Failed to load configuration: {}", e);
                std::process::exit(1);
            }
        },
    };

    if let Some(name) = args.interface {
        config.interface.name = Some(name);
    }
    let name = config.interface.name().to_string();

    let mut passphrase = Zeroizing::new(Vec::new());
    if let Err(e) = std::io::stdin().lock().read_to_end(&mut passphrase) {
        error!("Failed to read passphrase from stdin: {}", e);
        std::process::exit(1);
    }
    if args.strip_newline && passphrase.last() == Some(&b'\n') {
        passphrase.pop();
    }

    let index = match interface_index(&name).await {
        Ok(index) => index,
        Err(e) => {
            error!("Failed to resolve {}: {}", name, e);
            std::process::exit(1);
        }
    };

    let socket = match MulticastSocket::bind(&config.exchange, index).await {
        Ok(socket) => socket,
        Err(e) => {
            error!("Failed to open exchange socket: {}", e);
            std::process::exit(1);
        }
    };

    info!(interface = %name, len = passphrase.len(), "Offering passphrase");
    match respond_with_passphrase(&socket, &passphrase, &config.exchange).await {
        Ok(ResponderOutcome::Acknowledged) => info!("Passphrase delivered"),
        Ok(ResponderOutcome::Unacknowledged) => {
            error!("No receiver acknowledged the passphrase");
            std::process::exit(1);
        }
        Err(e) => {
            error!("Passphrase delivery failed: {}", e);
            std::process::exit(1);
        }
    }
}
