//! netkey receiver binary
//!
//! Brings the interface up, waits for it to become usable, obtains the
//! passphrase from the link and writes it to stdout. Logs go to stderr.

use clap::Parser;
use netkey::{
    acquire_passphrase, bring_down, ensure_up_and_ready, interface_index, Config, MulticastSocket,
};
use std::io::Write;
use std::path::PathBuf;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, EnvFilter};

/// Obtain a passphrase from a peer on the local link
#[derive(Parser, Debug)]
#[command(name = "netkey", version, about)]
struct Args {
    /// Path to configuration file (overrides default search paths)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Interface to bring up and listen on (overrides interface.name)
    #[arg(short, long, value_name = "NAME")]
    interface: Option<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // stdout carries the passphrase, so logging must stay on stderr
    let filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let (mut config, loaded_paths) = if let Some(config_path) = &args.config {
        match Config::load_file(config_path) {
            Ok(config) => (config, vec![config_path.clone()]),
            Err(e) => {
                error!("Failed to load configuration from {}: {}", config_path.display(), e);
                std::process::exit(1);
            }
        }
    } else {
        match Config::load() {
            Ok(result) => result,
            Err(e) => {
                error!("Failed to load configuration: {}", e);
                std::process::exit(1);
            }
        }
    };

    if loaded_paths.is_empty() {
        info!("No config files found, using defaults");
    } else {
        for path in &loaded_paths {
            info!(path = %path.display(), "Loaded config file");
        }
    }

    if let Some(name) = args.interface {
        config.interface.name = Some(name);
    }
    let name = config.interface.name().to_string();

    info!(interface = %name, "Bringing interface up");
    if let Err(e) = ensure_up_and_ready(&name).await {
        error!("Failed to bring up {}: {}", name, e);
        std::process::exit(1);
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

    info!("Waiting for passphrase");
    let passphrase = match acquire_passphrase(&socket, &config.exchange).await {
        Ok(passphrase) => passphrase,
        Err(e) => {
            error!("Passphrase exchange failed: {}", e);
            std::process::exit(1);
        }
    };
    drop(socket);

    if config.interface.bring_down() {
        if let Err(e) = bring_down(&name).await {
            warn!("Failed to bring {} down: {}", name, e);
        }
    }

    let mut stdout = std::io::stdout().lock();
    if let Err(e) = stdout
        .write_all(passphrase.as_bytes())
        .and_then(|()| stdout.flush())
    {
        error!("Failed to write passphrase: {}", e);
        std::process::exit(1);
    }
}
