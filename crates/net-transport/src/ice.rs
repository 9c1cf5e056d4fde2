//! ICE transport over a single UDP socket
//!
//! Gathers one host candidate and runs a STUN Binding check against each
//! remote candidate in turn. There is no pairing, prioritisation or
//! nomination: the first candidate that answers an authenticated check
//! becomes the selected path.

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use ice_protocol::{
    CandidateProtocol, IceCandidate, IceCandidateInit, IceGatherOptions, IceGatherPolicy,
    IceGathererState, IceParameters, IceTransportState, MAX_UDP_PACKET_SIZE, StunMessage,
    StunMessageType, TransactionId,
};
use parking_lot::{Mutex, RwLock};
use tokio::net::UdpSocket;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::{IceTransport, StateCell, StateHandler, TransportError, TransportResult};

/// Connectivity check timing
#[derive(Debug, Clone)]
pub struct CheckConfig {
    /// How long to wait for a response before retransmitting
    pub attempt_timeout: Duration,
    /// Binding requests sent per candidate before giving up
    pub max_attempts: u32,
}

impl Default for CheckConfig {
    fn default() -> Self {
        Self {
            attempt_timeout: Duration::from_millis(500),
            max_attempts: 6,
        }
    }
}

/// ICE transport backed by one UDP socket
pub struct UdpIceTransport {
    inner: Arc<IceInner>,
}

struct IceInner {
    state: StateCell<IceTransportState>,
    gathering: StateCell<IceGathererState>,
    local: IceParameters,
    remote: RwLock<Option<IceParameters>>,
    socket: Mutex<Option<Arc<UdpSocket>>>,
    local_candidates: RwLock<Vec<IceCandidate>>,
    remote_candidates: RwLock<Vec<IceCandidate>>,
    selected: RwLock<Option<SocketAddr>>,
    pending_checks: AtomicUsize,
    /// Serialises checks so only one reader is on the socket at a time
    check_lock: tokio::sync::Mutex<()>,
    config: CheckConfig,
}

/// What a received datagram means for an outstanding check
enum CheckReply {
    Success,
    ErrorResponse,
    Ignore(&'static str),
}

impl UdpIceTransport {
    /// Create a transport with fresh local credentials
    pub fn new() -> Self {
        Self::with_config(CheckConfig::default())
    }

    pub fn with_config(config: CheckConfig) -> Self {
        Self {
            inner: Arc::new(IceInner {
                state: StateCell::new("ICE", IceTransportState::New),
                gathering: StateCell::new("ICE gathering", IceGathererState::New),
                local: IceParameters::generate(),
                remote: RwLock::new(None),
                socket: Mutex::new(None),
                local_candidates: RwLock::new(Vec::new()),
                remote_candidates: RwLock::new(Vec::new()),
                selected: RwLock::new(None),
                pending_checks: AtomicUsize::new(0),
                check_lock: tokio::sync::Mutex::new(()),
                config,
            }),
        }
    }

    pub fn gathering_state(&self) -> IceGathererState {
        self.inner.gathering.get()
    }

    pub fn on_gathering_state_change(&self, handler: StateHandler<IceGathererState>) {
        self.inner.gathering.on_change(handler);
    }

    /// Wait until the connectivity state satisfies `done`
    pub async fn wait_for_state(
        &self,
        done: impl Fn(&IceTransportState) -> bool,
    ) -> IceTransportState {
        self.inner.state.wait_for(done).await
    }

    pub fn local_candidates(&self) -> Vec<IceCandidate> {
        self.inner.local_candidates.read().clone()
    }

    pub fn remote_candidates(&self) -> Vec<IceCandidate> {
        self.inner.remote_candidates.read().clone()
    }

    /// Remote address that answered a check
    pub fn selected_remote_address(&self) -> Option<SocketAddr> {
        *self.inner.selected.read()
    }

    /// Local address of the gathered socket, while the transport still owns it
    pub fn local_address(&self) -> Option<SocketAddr> {
        self.inner
            .socket
            .lock()
            .as_ref()
            .and_then(|s| s.local_addr().ok())
    }

    /// Hand the underlying socket to another protocol (QUIC) once the path
    /// is up. The transport no longer reads from it afterwards.
    pub fn take_socket(&self) -> TransportResult<std::net::UdpSocket> {
        let mut slot = self.inner.socket.lock();
        let socket = slot
            .take()
            .ok_or(TransportError::SocketUnavailable("not gathered or already taken"))?;

        match Arc::try_unwrap(socket) {
            Ok(socket) => Ok(socket.into_std()?),
            Err(shared) => {
                *slot = Some(shared);
                Err(TransportError::SocketUnavailable("connectivity check in progress"))
            }
        }
    }

    fn ensure_open(&self) -> TransportResult<()> {
        if self.inner.state.get() == IceTransportState::Closed {
            return Err(TransportError::Closed);
        }
        Ok(())
    }
}

impl Default for UdpIceTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl IceTransport for UdpIceTransport {
    fn state(&self) -> IceTransportState {
        self.inner.state.get()
    }

    fn on_state_change(&self, handler: StateHandler<IceTransportState>) {
        self.inner.state.on_change(handler);
    }

    fn gather(&self, options: IceGatherOptions) -> TransportResult<()> {
        self.ensure_open()?;
        if self.inner.gathering.get() != IceGathererState::New {
            return Err(TransportError::AlreadyGathered);
        }

        self.inner.gathering.set(IceGathererState::Gathering);

        let socket = match bind_socket(options.bind_address) {
            Ok(socket) => socket,
            Err(e) => {
                self.inner.gathering.set(IceGathererState::New);
                return Err(e);
            }
        };
        let local_addr = socket.local_addr()?;

        if options.gather_policy == IceGatherPolicy::All {
            let candidate = IceCandidate::host(local_addr.ip().to_string(), local_addr.port());
            info!("Gathered {}", candidate);
            self.inner.local_candidates.write().push(candidate);
        } else {
            debug!(
                "Gather policy {:?} excludes host candidates; socket bound on {}",
                options.gather_policy, local_addr
            );
        }

        *self.inner.socket.lock() = Some(Arc::new(socket));
        self.inner.gathering.set(IceGathererState::Complete);
        Ok(())
    }

    fn start(&self, remote: IceParameters) -> TransportResult<()> {
        self.ensure_open()?;
        if self.inner.gathering.get() != IceGathererState::Complete {
            return Err(TransportError::NotGathered);
        }

        info!(
            "Starting ICE (local ufrag {}, remote ufrag {})",
            self.inner.local.username_fragment, remote.username_fragment
        );
        *self.inner.remote.write() = Some(remote);
        Ok(())
    }

    fn local_parameters(&self) -> IceParameters {
        self.inner.local.clone()
    }

    fn add_remote_candidate(&self, candidate: IceCandidateInit) -> TransportResult<()> {
        self.ensure_open()?;
        let candidate = candidate.into_candidate()?;
        let remote = self
            .inner
            .remote
            .read()
            .clone()
            .ok_or(TransportError::NotStarted)?;

        if candidate.protocol != CandidateProtocol::Udp {
            warn!("Ignoring non-UDP remote candidate {}", candidate);
            return Ok(());
        }

        info!("Adding remote {}", candidate);
        self.inner.remote_candidates.write().push(candidate.clone());
        self.inner.pending_checks.fetch_add(1, Ordering::SeqCst);
        self.inner.state.set_if(
            |s| !s.is_connected() && s != IceTransportState::Closed,
            IceTransportState::Checking,
        );

        let inner = self.inner.clone();
        tokio::spawn(async move {
            inner.run_check(candidate, remote).await;
        });

        Ok(())
    }

    fn stop(&self) {
        if self.inner.state.set(IceTransportState::Closed) {
            info!("ICE transport closed");
        }
        self.inner.socket.lock().take();
    }
}

impl IceInner {
    async fn run_check(self: Arc<Self>, candidate: IceCandidate, remote: IceParameters) {
        let _guard = self.check_lock.lock().await;

        let outcome = if self.state.get().is_connected() {
            debug!("Already connected, skipping check for {}", candidate);
            None
        } else {
            Some(self.check_candidate(&candidate, &remote).await)
        };

        let remaining = self.pending_checks.fetch_sub(1, Ordering::SeqCst) - 1;

        match outcome {
            Some(Ok(addr)) => {
                info!("Connectivity check to {} succeeded", addr);
                *self.selected.write() = Some(addr);
                self.state.set_if(
                    |s| s != IceTransportState::Closed,
                    IceTransportState::Connected,
                );
            }
            Some(Err(e)) => {
                warn!("Connectivity check for {} failed: {}", candidate, e);
                if remaining == 0 {
                    self.state.set_if(
                        |s| !s.is_connected() && s != IceTransportState::Closed,
                        IceTransportState::Failed,
                    );
                }
            }
            None => {}
        }
    }

    /// Run one check; the socket clone is dropped before returning so the
    /// socket can be taken as soon as the state changes.
    async fn check_candidate(
        &self,
        candidate: &IceCandidate,
        remote: &IceParameters,
    ) -> TransportResult<SocketAddr> {
        let socket = self
            .socket
            .lock()
            .clone()
            .ok_or(TransportError::Closed)?;

        let local_addr = socket.local_addr()?;
        let addr = resolve_candidate(candidate, local_addr).await?;

        let mut request = StunMessage::with_random_transaction_id(StunMessageType::BindingRequest);
        request.add_username(&remote.check_username(&self.local))?;
        request.add_message_integrity(remote.password.as_bytes())?;
        request.add_fingerprint()?;
        let tid = request.transaction_id();

        let mut buf = [0u8; MAX_UDP_PACKET_SIZE];
        let max_attempts = self.config.max_attempts;

        for attempt in 1..=max_attempts {
            if self.state.get() == IceTransportState::Closed {
                return Err(TransportError::Closed);
            }

            debug!(
                "Sending binding request to {} (attempt {}/{})",
                addr, attempt, max_attempts
            );
            socket
                .send_to(request.as_bytes(), addr)
                .await
                .map_err(|e| TransportError::Send(e.to_string()))?;

            let deadline = Instant::now() + self.config.attempt_timeout;
            loop {
                let (len, from) =
                    match tokio::time::timeout_at(deadline, socket.recv_from(&mut buf)).await {
                        Err(_) => break,
                        Ok(Ok(received)) => received,
                        Ok(Err(e)) if is_transient(&e) => {
                            debug!("Transient receive error: {}", e);
                            continue;
                        }
                        Ok(Err(e)) => return Err(TransportError::Receive(e.to_string())),
                    };

                if from != addr {
                    debug!("Ignoring {} bytes from unexpected peer {}", len, from);
                    continue;
                }

                match classify_reply(&buf[..len], &tid, remote) {
                    CheckReply::Success => return Ok(addr),
                    CheckReply::ErrorResponse => {
                        return Err(TransportError::ConnectionFailed(format!(
                            "{} answered with a binding error",
                            addr
                        )));
                    }
                    CheckReply::Ignore(reason) => {
                        debug!("Ignoring packet from {}: {}", from, reason);
                    }
                }
            }
        }

        Err(TransportError::ConnectionFailed(format!(
            "no response from {} after {} attempts",
            addr, max_attempts
        )))
    }
}

fn bind_socket(addr: SocketAddr) -> TransportResult<UdpSocket> {
    let socket = std::net::UdpSocket::bind(addr)
        .map_err(|e| TransportError::Bind(format!("{}: {}", addr, e)))?;
    socket.set_nonblocking(true)?;
    Ok(UdpSocket::from_std(socket)?)
}

fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionRefused
    )
}

fn classify_reply(data: &[u8], tid: &TransactionId, remote: &IceParameters) -> CheckReply {
    let Ok(message) = StunMessage::parse(data) else {
        return CheckReply::Ignore("not a STUN message");
    };
    if message.transaction_id() != *tid {
        return CheckReply::Ignore("transaction id mismatch");
    }

    match message.message_type() {
        StunMessageType::BindingResponse => {}
        StunMessageType::BindingErrorResponse => return CheckReply::ErrorResponse,
        _ => return CheckReply::Ignore("not a binding response"),
    }

    if !message.validate_fingerprint() {
        return CheckReply::Ignore("bad fingerprint");
    }
    if !message.validate_message_integrity(remote.password.as_bytes()) {
        return CheckReply::Ignore("bad message integrity");
    }

    CheckReply::Success
}

/// Resolve the candidate address, preferring the local socket's family
async fn resolve_candidate(
    candidate: &IceCandidate,
    local_addr: SocketAddr,
) -> TransportResult<SocketAddr> {
    if let Ok(ip) = candidate.address.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, candidate.port));
    }

    let resolved: Vec<SocketAddr> =
        tokio::net::lookup_host((candidate.address.as_str(), candidate.port))
            .await
            .map_err(|e| TransportError::Resolve(format!("{}: {}", candidate.address, e)))?
            .collect();

    resolved
        .iter()
        .find(|addr| addr.is_ipv4() == local_addr.is_ipv4())
        .or_else(|| resolved.first())
        .copied()
        .ok_or_else(|| TransportError::Resolve(candidate.address.clone()))
}
