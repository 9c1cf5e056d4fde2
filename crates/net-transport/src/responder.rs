//! STUN responder for the server side of the demo
//!
//! Answers authenticated Binding requests so a client's connectivity check
//! succeeds. Everything else on the port is logged and dropped.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use ice_protocol::{MAX_UDP_PACKET_SIZE, ProtocolResult, StunMessage, StunMessageType};
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use crate::{TransportError, TransportResult};

/// What to do with one received datagram
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponderAction {
    /// Send this Binding success response back to the sender
    Respond(Bytes),
    /// A Binding request whose MESSAGE-INTEGRITY does not match our password
    BadIntegrity,
    /// Not an ICE check
    Unknown,
}

/// Decide how to answer `data` received from `from`.
///
/// A packet is an ICE check when it parses as STUN, is a Binding request
/// and carries a valid FINGERPRINT.
pub fn handle_packet(data: &[u8], from: SocketAddr, password: &str) -> ResponderAction {
    // QUIC shares the port; its packets never have the STUN prefix
    if !StunMessage::looks_like_stun(data) {
        return ResponderAction::Unknown;
    }
    let Ok(request) = StunMessage::parse(data) else {
        return ResponderAction::Unknown;
    };
    let is_ice_check = request.message_type() == StunMessageType::BindingRequest
        && request.validate_fingerprint();
    if !is_ice_check {
        return ResponderAction::Unknown;
    }

    if !request.validate_message_integrity(password.as_bytes()) {
        return ResponderAction::BadIntegrity;
    }

    match binding_success(&request, from, password) {
        Ok(response) => ResponderAction::Respond(response.into_bytes()),
        Err(e) => {
            warn!("Failed to build binding response: {}", e);
            ResponderAction::Unknown
        }
    }
}

fn binding_success(
    request: &StunMessage,
    from: SocketAddr,
    password: &str,
) -> ProtocolResult<StunMessage> {
    let mut response =
        StunMessage::new(StunMessageType::BindingResponse, request.transaction_id());
    response.add_xor_mapped_address(from)?;
    response.add_message_integrity(password.as_bytes())?;
    response.add_fingerprint()?;
    Ok(response)
}

/// Packet counters, shared with whoever reports them
#[derive(Debug, Default)]
pub struct ResponderStats {
    answered: AtomicU64,
    bad_integrity: AtomicU64,
    unknown: AtomicU64,
}

impl ResponderStats {
    pub fn answered(&self) -> u64 {
        self.answered.load(Ordering::Relaxed)
    }

    pub fn bad_integrity(&self) -> u64 {
        self.bad_integrity.load(Ordering::Relaxed)
    }

    pub fn unknown(&self) -> u64 {
        self.unknown.load(Ordering::Relaxed)
    }

    fn record(&self, action: &ResponderAction) {
        let counter = match action {
            ResponderAction::Respond(_) => &self.answered,
            ResponderAction::BadIntegrity => &self.bad_integrity,
            ResponderAction::Unknown => &self.unknown,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// UDP listener answering ICE checks for one password
pub struct StunResponder {
    socket: UdpSocket,
    password: String,
    stats: Arc<ResponderStats>,
}

impl StunResponder {
    pub async fn bind(addr: SocketAddr, password: impl Into<String>) -> TransportResult<Self> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|e| TransportError::Bind(format!("{}: {}", addr, e)))?;
        let password = password.into();

        info!(
            "Listening for ICE and QUIC on {} for password {}",
            socket.local_addr()?,
            password
        );

        Ok(Self {
            socket,
            password,
            stats: Arc::new(ResponderStats::default()),
        })
    }

    pub fn local_addr(&self) -> TransportResult<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn stats(&self) -> Arc<ResponderStats> {
        self.stats.clone()
    }

    /// Serve until the socket fails
    pub async fn run(self) -> TransportResult<()> {
        let mut buf = [0u8; MAX_UDP_PACKET_SIZE];

        loop {
            let (size, from) = match self.socket.recv_from(&mut buf).await {
                Ok(received) => received,
                Err(e) if e.kind() == io::ErrorKind::ConnectionReset => {
                    debug!("Ignoring connection reset: {}", e);
                    continue;
                }
                Err(e) => return Err(TransportError::Receive(e.to_string())),
            };
            debug!("Read packet of size {} from {}", size, from);

            let action = handle_packet(&buf[..size], from, &self.password);
            self.stats.record(&action);

            match action {
                ResponderAction::Respond(response) => {
                    if let Err(e) = self.socket.send_to(&response, from).await {
                        warn!("Failed to write ICE check response to {}: {}", from, e);
                    }
                }
                ResponderAction::BadIntegrity => {
                    info!("ICE check from {} has bad message integrity", from);
                }
                ResponderAction::Unknown => {
                    info!("Read unknown packet of size {} from {}", size, from);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use ice_protocol::{IceParameters, StunMessage};

    use super::*;

    fn check_request(password: &str) -> StunMessage {
        let remote = IceParameters::new("srv", password);
        let local = IceParameters::new("cli", "unused");
        let mut request = StunMessage::with_random_transaction_id(StunMessageType::BindingRequest);
        request.add_username(&remote.check_username(&local)).unwrap();
        request.add_message_integrity(password.as_bytes()).unwrap();
        request.add_fingerprint().unwrap();
        request
    }

    #[test]
    fn test_authenticated_check_gets_signed_response() {
        let from: SocketAddr = "127.0.0.1:50000".parse().unwrap();
        let request = check_request("password");

        let ResponderAction::Respond(bytes) = handle_packet(request.as_bytes(), from, "password")
        else {
            panic!("expected a response");
        };

        let response = StunMessage::parse(&bytes).unwrap();
        assert_eq!(response.message_type(), StunMessageType::BindingResponse);
        assert_eq!(response.transaction_id(), request.transaction_id());
        assert_eq!(response.xor_mapped_address().unwrap(), Some(from));
        assert!(response.validate_message_integrity(b"password"));
        assert!(response.validate_fingerprint());
    }

    #[test]
    fn test_wrong_password_is_rejected() {
        let from: SocketAddr = "127.0.0.1:50000".parse().unwrap();
        let request = check_request("guess");
        assert_eq!(
            handle_packet(request.as_bytes(), from, "password"),
            ResponderAction::BadIntegrity
        );
    }

    #[test]
    fn test_non_checks_are_unknown() {
        let from: SocketAddr = "127.0.0.1:50000".parse().unwrap();

        assert_eq!(handle_packet(b"hello", from, "password"), ResponderAction::Unknown);

        // A QUIC long header packet (fixed bit set) on the shared port
        let mut quic_initial = check_request("password").as_bytes().to_vec();
        quic_initial[0] = 0xC3;
        assert_eq!(
            handle_packet(&quic_initial, from, "password"),
            ResponderAction::Unknown
        );

        // Binding request without a fingerprint
        let mut bare = StunMessage::with_random_transaction_id(StunMessageType::BindingRequest);
        bare.add_message_integrity(b"password").unwrap();
        assert_eq!(
            handle_packet(bare.as_bytes(), from, "password"),
            ResponderAction::Unknown
        );

        // A response is never answered
        let mut response =
            StunMessage::with_random_transaction_id(StunMessageType::BindingResponse);
        response.add_fingerprint().unwrap();
        assert_eq!(
            handle_packet(response.as_bytes(), from, "password"),
            ResponderAction::Unknown
        );
    }

    #[test]
    fn test_stats_count_each_outcome() {
        let from: SocketAddr = "127.0.0.1:50000".parse().unwrap();
        let stats = ResponderStats::default();

        stats.record(&handle_packet(check_request("password").as_bytes(), from, "password"));
        stats.record(&handle_packet(check_request("guess").as_bytes(), from, "password"));
        stats.record(&handle_packet(b"noise", from, "password"));
        stats.record(&handle_packet(b"more noise", from, "password"));

        assert_eq!(stats.answered(), 1);
        assert_eq!(stats.bad_integrity(), 1);
        assert_eq!(stats.unknown(), 2);
    }
}
