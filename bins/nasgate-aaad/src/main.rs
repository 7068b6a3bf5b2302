//! NASGate AAA server
//!
//! Diameter base protocol peer accepting connections from network-access
//! nodes: capabilities exchange, watchdog, cooperative disconnect and a
//! sample authentication command backed by the configured user table.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use nasgate_diameter::{DiameterServer, Dictionary, ServerConfig, DIAMETER_PORT};

/// NASGate - Diameter AAA server
#[derive(Parser, Debug)]
#[command(name = "nasgate-aaad")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Diameter base protocol AAA server", long_about = None)]
struct Args {
    /// Port to listen on
    #[arg(short = 'p', long, default_value_t = DIAMETER_PORT)]
    port: u16,

    /// Configuration file path
    #[arg(short = 'c', long, default_value = "config.json")]
    config: String,

    /// Dictionary file path
    #[arg(short = 'd', long, default_value = "dict.json")]
    dictionary: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'e', long, default_value = "info")]
    log_level: String,

    /// Disable color output
    #[arg(short = 'm', long)]
    no_color: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args);

    log::info!("NASGate AAA server v{} starting...", env!("CARGO_PKG_VERSION"));

    let config = ServerConfig::load(&args.config)
        .with_context(|| format!("loading configuration from {}", args.config))?;
    log::info!(
        "configured as {} in realm {}",
        config.origin_host,
        config.origin_realm
    );

    let dict = Dictionary::load(&args.dictionary)
        .with_context(|| format!("loading dictionary from {}", args.dictionary))?;

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    let server = DiameterServer::bind(addr, Arc::new(config), Arc::new(dict))
        .await
        .with_context(|| format!("binding listener on port {}", args.port))?;
    log::info!("listening on {addr}");

    tokio::select! {
        result = server.run() => {
            result.context("server loop failed")?;
        }
        _ = tokio::signal::ctrl_c() => {
            log::info!("received shutdown signal");
        }
    }

    log::info!("NASGate AAA server stopped");
    Ok(())
}

/// Initialize logging based on command line arguments
fn init_logging(args: &Args) {
    let mut builder = env_logger::Builder::new();

    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => log::LevelFilter::Trace,
        "debug" => log::LevelFilter::Debug,
        "info" => log::LevelFilter::Info,
        "warn" => log::LevelFilter::Warn,
        "error" => log::LevelFilter::Error,
        _ => log::LevelFilter::Info,
    };
    builder.filter_level(level);
    builder.format_timestamp_millis();

    if args.no_color {
        builder.write_style(env_logger::WriteStyle::Never);
    }

    builder.init();
}
