//! ICE/QUIC Demo Server
//!
//! Answers ICE connectivity checks on UDP and serves the parameters a client
//! needs to reach it over HTTP.

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{ConnectInfo, State},
    http::StatusCode,
    routing::{get, post},
};
use clap::Parser;
use dashmap::DashMap;
use ice_protocol::{DEFAULT_ICE_ADDRESS, DEFAULT_ICE_PASSWORD, DEFAULT_ICE_PORT};
use net_transport::{ResponderStats, StunResponder};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "ice-server")]
#[command(about = "ICE responder and configuration endpoints for the ICE/QUIC demo")]
#[command(version)]
struct Args {
    /// Address the HTTP endpoints listen on
    #[arg(long, env = "ICE_DEMO_HTTP_ADDR", default_value = "0.0.0.0:3030")]
    http_addr: SocketAddr,

    /// Address handed to clients as the ICE candidate
    #[arg(long, default_value = DEFAULT_ICE_ADDRESS)]
    ice_address: String,

    /// UDP port for ICE checks
    #[arg(long, default_value_t = DEFAULT_ICE_PORT)]
    ice_port: u16,

    /// Password ICE checks must be signed with
    #[arg(long, env = "ICE_DEMO_PASSWORD", default_value = DEFAULT_ICE_PASSWORD)]
    ice_password: String,

    /// Directory served for every other path
    #[arg(long, default_value = ".")]
    static_dir: PathBuf,

    /// Run only the ICE responder
    #[arg(long)]
    no_http: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("ice_server=debug".parse()?)
                .add_directive("net_transport=info".parse()?)
                .add_directive("tower_http=debug".parse()?),
        )
        .init();

    let args = Args::parse();

    info!("Starting ICE/QUIC Demo Server");

    let responder = StunResponder::bind(
        SocketAddr::from(([0, 0, 0, 0], args.ice_port)),
        args.ice_password.clone(),
    )
    .await?;

    if args.no_http {
        info!("HTTP endpoints disabled");
    } else {
        let state = AppState::new(
            IceEndpoint {
                address: args.ice_address.clone(),
                port: args.ice_port,
                password: args.ice_password.clone(),
            },
            responder.stats(),
        );
        let app = router(state, &args.static_dir);

        let listener = tokio::net::TcpListener::bind(args.http_addr).await?;
        info!("Listening for HTTP on {}", args.http_addr);

        tokio::spawn(async move {
            let service = app.into_make_service_with_connect_info::<SocketAddr>();
            if let Err(e) = axum::serve(listener, service).await {
                error!("HTTP server failed: {}", e);
            }
        });
    }

    tokio::select! {
        result = responder.run() => result?,
        _ = tokio::signal::ctrl_c() => info!("Shutting down"),
    }

    Ok(())
}

/// What clients are told about the ICE responder
#[derive(Debug, Clone)]
struct IceEndpoint {
    address: String,
    port: u16,
    password: String,
}

/// Application state
#[derive(Clone)]
struct AppState {
    ice: Arc<IceEndpoint>,
    /// Uploaded client passwords: client IP -> password. Only recorded and
    /// counted; the responder authenticates checks with its own password.
    client_passwords: Arc<DashMap<IpAddr, String>>,
    responder: Arc<ResponderStats>,
}

impl AppState {
    fn new(ice: IceEndpoint, responder: Arc<ResponderStats>) -> Self {
        Self {
            ice: Arc::new(ice),
            client_passwords: Arc::new(DashMap::new()),
            responder,
        }
    }
}

fn router(state: AppState, static_dir: &Path) -> Router {
    Router::new()
        .route("/ice-address", get(address_handler))
        .route("/ice-port", get(port_handler))
        .route("/ice-password", get(password_handler))
        .route("/ice", post(upload_handler))
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))
        .fallback_service(ServeDir::new(static_dir))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn address_handler(State(state): State<AppState>) -> String {
    state.ice.address.clone()
}

async fn port_handler(State(state): State<AppState>) -> String {
    state.ice.port.to_string()
}

async fn password_handler(State(state): State<AppState>) -> String {
    state.ice.password.clone()
}

/// Record the password a client will answer checks with
async fn upload_handler(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    body: String,
) -> StatusCode {
    let password = body.trim();
    if password.is_empty() {
        warn!("Empty ICE password upload from {}", addr);
        return StatusCode::BAD_REQUEST;
    }

    info!("Client {} uploaded its ICE password", addr.ip());
    state.client_passwords.insert(addr.ip(), password.to_string());
    StatusCode::NO_CONTENT
}

/// Health check endpoint
async fn health_handler() -> &'static str {
    "OK"
}

/// Stats endpoint
async fn stats_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "uploaded_passwords": state.client_passwords.len(),
        "checks_answered": state.responder.answered(),
        "checks_bad_integrity": state.responder.bad_integrity(),
        "unknown_packets": state.responder.unknown(),
    }))
}
