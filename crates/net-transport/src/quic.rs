//! QUIC transport layered on an ICE transport

use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::time::Duration;

use ice_protocol::{IceTransportState, QuicTransportState};
use parking_lot::{Mutex, RwLock};
use quinn::{
    ClientConfig, Connection, Endpoint, EndpointConfig, RecvStream, SendStream, TransportConfig,
};
use tracing::{debug, info, warn};

use crate::{
    IceTransport, QuicTransport, StateCell, StateHandler, TransportError, TransportResult,
    UdpIceTransport,
};

/// ALPN identifier offered by the client
pub const QUIC_ALPN: &[u8] = b"ice-quic-demo";

/// Handler for streams opened by the remote peer
pub type StreamHandler = Box<dyn Fn(QuicStream) + Send + Sync>;

/// A bidirectional stream opened by the remote peer
pub struct QuicStream {
    pub send: SendStream,
    pub recv: RecvStream,
}

/// QUIC client settings
#[derive(Debug, Clone)]
pub struct QuicOptions {
    /// Server name presented in the TLS handshake
    pub server_name: String,
    pub idle_timeout: Duration,
    pub keep_alive: Duration,
}

impl Default for QuicOptions {
    fn default() -> Self {
        Self {
            server_name: "localhost".to_string(),
            idle_timeout: Duration::from_secs(30),
            keep_alive: Duration::from_secs(5),
        }
    }
}

/// QUIC over the path an ICE transport establishes.
///
/// Connects as soon as the ICE transport reports `connected`, reusing its
/// socket. ICE failure or closure is mirrored onto the QUIC state.
pub struct QuicOverIce {
    inner: Arc<QuicInner>,
}

struct QuicInner {
    state: StateCell<QuicTransportState>,
    ice: Arc<UdpIceTransport>,
    options: QuicOptions,
    endpoint: Mutex<Option<Endpoint>>,
    connection: RwLock<Option<Connection>>,
    stream_handler: RwLock<Option<StreamHandler>>,
}

impl QuicOverIce {
    /// Bind a QUIC transport to `ice`. The ICE transport must be created first.
    pub fn new(ice: Arc<UdpIceTransport>, options: QuicOptions) -> Self {
        let inner = Arc::new(QuicInner {
            state: StateCell::new("QUIC", QuicTransportState::New),
            ice: ice.clone(),
            options,
            endpoint: Mutex::new(None),
            connection: RwLock::new(None),
            stream_handler: RwLock::new(None),
        });

        let weak: Weak<QuicInner> = Arc::downgrade(&inner);
        ice.on_state_change(Box::new(move |ice_state| {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            match ice_state {
                IceTransportState::Connected | IceTransportState::Completed => {
                    if inner.state.get() == QuicTransportState::New {
                        tokio::spawn(inner.connect());
                    }
                }
                IceTransportState::Failed => {
                    inner
                        .state
                        .set_if(|s| !s.is_terminal(), QuicTransportState::Failed);
                }
                IceTransportState::Closed => inner.close("ICE transport closed"),
                _ => {}
            }
        }));

        Self { inner }
    }

    /// Set the handler for incoming bidirectional streams, replacing any
    /// previous one
    pub fn on_quic_stream(&self, handler: StreamHandler) {
        *self.inner.stream_handler.write() = Some(handler);
    }

    /// Wait until the connection state satisfies `done`
    pub async fn wait_for_state(
        &self,
        done: impl Fn(&QuicTransportState) -> bool,
    ) -> QuicTransportState {
        self.inner.state.wait_for(done).await
    }

    /// Open a new bidirectional stream (reliable)
    pub async fn open_bi_stream(&self) -> TransportResult<(SendStream, RecvStream)> {
        let connection = self
            .inner
            .connection
            .read()
            .clone()
            .ok_or(TransportError::NotConnected)?;

        connection
            .open_bi()
            .await
            .map_err(|e| TransportError::Stream(e.to_string()))
    }

    /// Get remote address
    pub fn remote_address(&self) -> Option<SocketAddr> {
        self.inner
            .connection
            .read()
            .as_ref()
            .map(|c| c.remote_address())
    }

    /// Get connection stats
    pub fn stats(&self) -> Option<ConnectionStats> {
        self.inner.connection.read().as_ref().map(|conn| {
            let stats = conn.stats();
            ConnectionStats {
                rtt: stats.path.rtt,
                bytes_sent: stats.udp_tx.bytes,
                bytes_received: stats.udp_rx.bytes,
                packets_lost: stats.path.lost_packets,
            }
        })
    }

    /// Close the connection
    pub fn close(&self, reason: &str) {
        self.inner.close(reason);
    }
}

impl QuicTransport for QuicOverIce {
    fn state(&self) -> QuicTransportState {
        self.inner.state.get()
    }

    fn on_state_change(&self, handler: StateHandler<QuicTransportState>) {
        self.inner.state.on_change(handler);
    }

    fn stop(&self) {
        self.inner.close("stopped");
    }
}

impl QuicInner {
    async fn connect(self: Arc<Self>) {
        if !self.state.set_if(
            |s| s == QuicTransportState::New,
            QuicTransportState::Connecting,
        ) {
            return;
        }

        match self.try_connect().await {
            Ok(connection) => {
                info!("QUIC connected to {}", connection.remote_address());
                *self.connection.write() = Some(connection.clone());
                if self.state.set_if(
                    |s| s == QuicTransportState::Connecting,
                    QuicTransportState::Connected,
                ) {
                    tokio::spawn(self.clone().accept_streams(connection));
                } else {
                    // Closed while the handshake was in flight
                    self.close("closed during handshake");
                }
            }
            Err(e) => {
                warn!("QUIC connection failed: {}", e);
                self.state
                    .set_if(|s| !s.is_terminal(), QuicTransportState::Failed);
            }
        }
    }

    async fn try_connect(&self) -> TransportResult<Connection> {
        let remote = self
            .ice
            .selected_remote_address()
            .ok_or(TransportError::NotConnected)?;
        let socket = self.ice.take_socket()?;

        let mut endpoint = Endpoint::new(
            EndpointConfig::default(),
            None,
            socket,
            Arc::new(quinn::TokioRuntime),
        )?;
        endpoint.set_default_client_config(create_client_config(&self.options)?);
        *self.endpoint.lock() = Some(endpoint.clone());

        info!("Connecting QUIC to {} ({})", remote, self.options.server_name);

        endpoint
            .connect(remote, &self.options.server_name)
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))
    }

    /// Deliver incoming bidirectional streams to the stream handler
    async fn accept_streams(self: Arc<Self>, connection: Connection) {
        loop {
            match connection.accept_bi().await {
                Ok((send, recv)) => {
                    debug!("Accepted QUIC stream {}", send.id());
                    match self.stream_handler.read().as_ref() {
                        Some(handler) => handler(QuicStream { send, recv }),
                        None => debug!("No stream handler registered, dropping stream"),
                    }
                }
                Err(e) => {
                    debug!("Stopped accepting streams: {}", e);
                    break;
                }
            }
        }

        self.state
            .set_if(|s| !s.is_terminal(), QuicTransportState::Closed);
    }

    fn close(&self, reason: &str) {
        if let Some(conn) = self.connection.write().take() {
            conn.close(0u32.into(), reason.as_bytes());
            info!("Connection closed: {}", reason);
        }
        if let Some(endpoint) = self.endpoint.lock().take() {
            endpoint.close(0u32.into(), reason.as_bytes());
        }
        self.state
            .set_if(|s| !s.is_terminal(), QuicTransportState::Closed);
    }
}

/// Connection statistics
#[derive(Debug, Clone)]
pub struct ConnectionStats {
    pub rtt: Duration,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub packets_lost: u64,
}

/// Create client TLS config (the demo server's certificate is self-signed)
fn create_client_config(options: &QuicOptions) -> TransportResult<ClientConfig> {
    let mut crypto = rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(SkipServerVerification))
        .with_no_client_auth();
    crypto.alpn_protocols = vec![QUIC_ALPN.to_vec()];

    let mut transport = TransportConfig::default();
    transport.max_idle_timeout(Some(
        options
            .idle_timeout
            .try_into()
            .map_err(|_| TransportError::Config("idle timeout out of range".to_string()))?,
    ));
    transport.keep_alive_interval(Some(options.keep_alive));

    let mut config = ClientConfig::new(Arc::new(
        quinn::crypto::rustls::QuicClientConfig::try_from(crypto)
            .map_err(|e| TransportError::Tls(e.to_string()))?,
    ));
    config.transport_config(Arc::new(transport));

    Ok(config)
}

/// Server config with a fresh self-signed certificate, for a peer that
/// answers QUIC on the ICE port
pub fn create_server_config(server_name: &str) -> TransportResult<quinn::ServerConfig> {
    let certified_key = rcgen::generate_simple_self_signed(vec![server_name.to_string()])
        .map_err(|e| TransportError::Certificate(e.to_string()))?;

    let cert_der = certified_key.cert.der().clone();
    let key_der = certified_key.key_pair.serialize_der();
    let key = rustls::pki_types::PrivatePkcs8KeyDer::from(key_der);

    let mut server_crypto = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(vec![cert_der], key.into())
        .map_err(|e| TransportError::Tls(e.to_string()))?;
    server_crypto.alpn_protocols = vec![QUIC_ALPN.to_vec()];

    Ok(quinn::ServerConfig::with_crypto(Arc::new(
        quinn::crypto::rustls::QuicServerConfig::try_from(server_crypto)
            .map_err(|e| TransportError::Tls(e.to_string()))?,
    )))
}

/// Skip TLS server verification (for development only)
#[derive(Debug)]
struct SkipServerVerification;

impl rustls::client::danger::ServerCertVerifier for SkipServerVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::RSA_PKCS1_SHA384,
            rustls::SignatureScheme::RSA_PKCS1_SHA512,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
            rustls::SignatureScheme::ECDSA_NISTP521_SHA512,
            rustls::SignatureScheme::ED25519,
        ]
    }
}
