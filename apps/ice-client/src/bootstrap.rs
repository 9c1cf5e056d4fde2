//! Connectivity bootstrapper
//!
//! Drives an ICE transport and the QUIC transport layered on it through one
//! linear attempt: observe both, resolve the remote parameters, then
//! `gather`, `start` and `add_remote_candidate` in that order. Nothing is
//! retried; the first error is returned.

use ice_protocol::{IceCandidateInit, IceGatherOptions, IceParameters, host_candidate_line};
use net_transport::{IceTransport, QuicTransport};

use crate::config::{ConfigEndpoints, DemoConfig, ResolvedConfig};
use crate::error::{ClientError, ClientResult};
use crate::log::log;
use crate::status::{ICE_STATE, QUIC_STATE, StatusBoard};

/// How the server learns the client's credentials
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// The server already knows the password it checks against
    #[default]
    Fetch,
    /// POST the local password to the server after gathering
    Upload,
}

/// Log every state change of both transports and mirror it on `status`
pub fn watch_states(ice: &dyn IceTransport, quic: &dyn QuicTransport, status: &StatusBoard) {
    status.set(ICE_STATE, ice.state().as_str());
    status.set(QUIC_STATE, quic.state().as_str());

    let board = status.clone();
    ice.on_state_change(Box::new(move |state| {
        log(&format!("ICE state changed to {}", state), None);
        board.set(ICE_STATE, state.as_str());
    }));

    let board = status.clone();
    quic.on_state_change(Box::new(move |state| {
        log(&format!("QUIC state changed to {}", state), None);
        board.set(QUIC_STATE, state.as_str());
    }));
}

/// Run the demo against `ice` and `quic`. `quic` must be bound to `ice`.
pub async fn run_client<E: ConfigEndpoints>(
    config: &DemoConfig,
    ice: &dyn IceTransport,
    quic: &dyn QuicTransport,
    endpoints: &E,
    status: &StatusBoard,
    mode: Mode,
) -> ClientResult<ResolvedConfig> {
    watch_states(ice, quic, status);

    let resolved = config.resolve(endpoints).await?;
    log(
        "Resolved ICE server",
        Some(&[
            ("address", &resolved.address),
            ("port", &resolved.port),
        ]),
    );

    ice.gather(IceGatherOptions::default())?;
    let local = ice.local_parameters();

    if mode == Mode::Upload {
        let origin = config
            .networked_origin()
            .ok_or(ClientError::UploadWithoutOrigin)?;
        let url = config.endpoint(origin, &config.upload_path)?;
        endpoints.post_text(&url, &local.password).await?;
        log("Uploaded local ICE password", Some(&[("url", &url)]));
    }

    // The server checks the USERNAME against our own fragment, so ours is
    // passed as the remote one.
    ice.start(IceParameters::new(
        local.username_fragment,
        resolved.password.clone(),
    ))?;

    let candidate = host_candidate_line(&resolved.address, resolved.port);
    log("Adding remote candidate", Some(&[("candidate", &candidate)]));
    ice.add_remote_candidate(IceCandidateInit::from_line(candidate))?;

    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use ice_protocol::{IceTransportState, QuicTransportState};
    use net_transport::{StateCell, StateHandler, TransportError, TransportResult};
    use parking_lot::Mutex;
    use url::Url;

    use super::*;
    use crate::config::tests::FakeEndpoints;

    type CallLog = Arc<Mutex<Vec<String>>>;

    /// Records every call; state is moved only by the test
    struct FakeIce {
        calls: CallLog,
        state: StateCell<IceTransportState>,
        local: IceParameters,
        fail_gather: bool,
    }

    impl FakeIce {
        fn new(calls: CallLog) -> Self {
            Self {
                calls,
                state: StateCell::new("fake ICE", IceTransportState::New),
                local: IceParameters::new("localufr", "localpassword"),
                fail_gather: false,
            }
        }
    }

    impl IceTransport for FakeIce {
        fn state(&self) -> IceTransportState {
            self.state.get()
        }

        fn on_state_change(&self, handler: StateHandler<IceTransportState>) {
            self.state.on_change(handler);
        }

        fn gather(&self, _options: IceGatherOptions) -> TransportResult<()> {
            self.calls.lock().push("gather".to_string());
            if self.fail_gather {
                return Err(TransportError::Bind("address in use".to_string()));
            }
            Ok(())
        }

        fn start(&self, remote: IceParameters) -> TransportResult<()> {
            self.calls.lock().push(format!(
                "start {} {}",
                remote.username_fragment, remote.password
            ));
            Ok(())
        }

        fn local_parameters(&self) -> IceParameters {
            self.local.clone()
        }

        fn add_remote_candidate(&self, candidate: IceCandidateInit) -> TransportResult<()> {
            let IceCandidateInit::Sdp { candidate, .. } = candidate else {
                panic!("expected a candidate line");
            };
            self.calls.lock().push(format!("add {}", candidate));
            Ok(())
        }

        fn stop(&self) {
            self.calls.lock().push("stop".to_string());
        }
    }

    struct FakeQuic {
        state: StateCell<QuicTransportState>,
    }

    impl FakeQuic {
        fn new() -> Self {
            Self {
                state: StateCell::new("fake QUIC", QuicTransportState::New),
            }
        }
    }

    impl QuicTransport for FakeQuic {
        fn state(&self) -> QuicTransportState {
            self.state.get()
        }

        fn on_state_change(&self, handler: StateHandler<QuicTransportState>) {
            self.state.on_change(handler);
        }

        fn stop(&self) {}
    }

    fn networked() -> DemoConfig {
        DemoConfig {
            origin: Some(Url::parse("http://localhost:3030/").unwrap()),
            ..DemoConfig::default()
        }
    }

    fn server_endpoints() -> FakeEndpoints {
        FakeEndpoints::default()
            .with("/ice-address", "10.0.0.7")
            .with("/ice-port", "4000")
            .with("/ice-password", "serverpass")
    }

    #[tokio::test]
    async fn test_defaults_drive_fixed_sequence() {
        let calls = CallLog::default();
        let ice = FakeIce::new(calls.clone());
        let quic = FakeQuic::new();
        let endpoints = FakeEndpoints::default().sharing_log(calls.clone());

        let resolved = run_client(
            &DemoConfig::default(),
            &ice,
            &quic,
            &endpoints,
            &StatusBoard::new(),
            Mode::Fetch,
        )
        .await
        .unwrap();

        assert_eq!(resolved.address, "127.0.0.1");
        assert_eq!(
            *calls.lock(),
            vec![
                "gather",
                "start localufr password",
                "add candidate:0 0 UDP 0 127.0.0.1 3737 typ host",
            ]
        );
    }

    #[tokio::test]
    async fn test_fetched_values_reach_start_and_candidate() {
        let calls = CallLog::default();
        let ice = FakeIce::new(calls.clone());
        let quic = FakeQuic::new();
        let endpoints = server_endpoints().sharing_log(calls.clone());

        run_client(
            &networked(),
            &ice,
            &quic,
            &endpoints,
            &StatusBoard::new(),
            Mode::Fetch,
        )
        .await
        .unwrap();

        assert_eq!(
            *calls.lock(),
            vec![
                "GET /ice-address",
                "GET /ice-port",
                "GET /ice-password",
                "gather",
                "start localufr serverpass",
                "add candidate:0 0 UDP 0 10.0.0.7 4000 typ host",
            ]
        );
    }

    #[tokio::test]
    async fn test_upload_posts_password_between_gather_and_start() {
        let calls = CallLog::default();
        let ice = FakeIce::new(calls.clone());
        let quic = FakeQuic::new();
        let endpoints = server_endpoints().sharing_log(calls.clone());

        run_client(
            &networked(),
            &ice,
            &quic,
            &endpoints,
            &StatusBoard::new(),
            Mode::Upload,
        )
        .await
        .unwrap();

        let calls = calls.lock();
        assert_eq!(
            calls[3..],
            [
                "gather",
                "POST /ice localpassword",
                "start localufr serverpass",
                "add candidate:0 0 UDP 0 10.0.0.7 4000 typ host",
            ]
        );
    }

    #[tokio::test]
    async fn test_upload_without_origin_stops_after_gather() {
        let calls = CallLog::default();
        let ice = FakeIce::new(calls.clone());
        let quic = FakeQuic::new();

        let err = run_client(
            &DemoConfig::default(),
            &ice,
            &quic,
            &FakeEndpoints::default(),
            &StatusBoard::new(),
            Mode::Upload,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, ClientError::UploadWithoutOrigin));
        assert_eq!(*calls.lock(), vec!["gather"]);
    }

    #[tokio::test]
    async fn test_transport_error_propagates() {
        let calls = CallLog::default();
        let mut ice = FakeIce::new(calls.clone());
        ice.fail_gather = true;
        let quic = FakeQuic::new();

        let err = run_client(
            &DemoConfig::default(),
            &ice,
            &quic,
            &FakeEndpoints::default(),
            &StatusBoard::new(),
            Mode::Fetch,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, ClientError::Transport(TransportError::Bind(_))));
        assert_eq!(*calls.lock(), vec!["gather"]);
    }

    #[test]
    fn test_observers_mirror_every_transition() {
        let ice = FakeIce::new(CallLog::default());
        let quic = FakeQuic::new();
        let status = StatusBoard::new();

        watch_states(&ice, &quic, &status);
        assert_eq!(status.get(ICE_STATE).as_deref(), Some("new"));
        assert_eq!(status.get(QUIC_STATE).as_deref(), Some("new"));

        // A misbehaving observer registered alongside must not stop ours
        ice.on_state_change(Box::new(|_| panic!("observer failure")));

        for state in [
            IceTransportState::Checking,
            IceTransportState::Connected,
            IceTransportState::Completed,
            IceTransportState::Disconnected,
            IceTransportState::Failed,
            IceTransportState::Closed,
        ] {
            assert!(ice.state.set(state));
            assert_eq!(status.get(ICE_STATE).as_deref(), Some(state.as_str()));
        }

        for state in [
            QuicTransportState::Connecting,
            QuicTransportState::Connected,
            QuicTransportState::Closed,
            QuicTransportState::Failed,
        ] {
            assert!(quic.state.set(state));
            assert_eq!(status.get(QUIC_STATE).as_deref(), Some(state.as_str()));
        }
    }
}
