//! ICE/QUIC demo client
//!
//! Connects to the demo server over ICE, layers QUIC on the resulting path
//! and reports both transport states.

mod bootstrap;
mod config;
mod error;
mod log;
mod status;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use net_transport::{IceTransport, QuicOptions, QuicOverIce, QuicTransport, UdpIceTransport};
use tracing::info;
use url::Url;

use bootstrap::{Mode, run_client};
use config::{DemoConfig, HttpEndpoints};
use status::StatusBoard;

#[derive(Parser, Debug)]
#[command(name = "ice-client")]
#[command(about = "Connect to the ICE/QUIC demo server and report transport states")]
#[command(version)]
struct Args {
    /// JSON file with the demo configuration
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Base URL of the server's configuration endpoints
    #[arg(long, env = "ICE_DEMO_ORIGIN")]
    origin: Option<Url>,

    /// Post the local ICE password to the server before starting checks
    #[arg(long)]
    upload: bool,

    /// Server name for the QUIC handshake
    #[arg(long)]
    server_name: Option<String>,

    /// Seconds to wait for the transports to settle
    #[arg(long, default_value_t = 10)]
    wait_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("ice_client=info".parse()?)
                .add_directive("net_transport=info".parse()?),
        )
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => DemoConfig::load(path)?,
        None => DemoConfig::default(),
    };
    if let Some(origin) = args.origin {
        config.origin = Some(origin);
    }
    if let Some(server_name) = args.server_name {
        config.server_name = server_name;
    }

    info!("Starting ICE/QUIC demo client");

    let ice = Arc::new(UdpIceTransport::new());
    let quic = QuicOverIce::new(
        ice.clone(),
        QuicOptions {
            server_name: config.server_name.clone(),
            ..QuicOptions::default()
        },
    );
    ice.on_gathering_state_change(Box::new(|state| {
        log::log(&format!("ICE gathering state changed to {}", state), None);
    }));
    quic.on_quic_stream(Box::new(|stream| {
        log::log("Got a QUIC stream", Some(&[("id", &stream.send.id())]));
    }));

    let endpoints = HttpEndpoints::new(Duration::from_secs(5))?;
    let status = StatusBoard::new();
    let mode = if args.upload { Mode::Upload } else { Mode::Fetch };

    let resolved = run_client(&config, &*ice, &quic, &endpoints, &status, mode).await?;
    info!(
        "Checking {}:{}, waiting up to {}s",
        resolved.address, resolved.port, args.wait_secs
    );

    tokio::select! {
        state = quic.wait_for_state(|s| s.is_terminal()) => {
            info!("QUIC transport {}", state);
        }
        _ = tokio::time::sleep(Duration::from_secs(args.wait_secs)) => {
            info!("Stopped waiting");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted");
        }
    }

    if let Some(stats) = quic.stats() {
        info!(
            "QUIC rtt {:?}, {} bytes sent, {} bytes received, {} packets lost",
            stats.rtt, stats.bytes_sent, stats.bytes_received, stats.packets_lost
        );
    }

    print!("{}", status);

    quic.stop();
    ice.stop();

    Ok(())
}
