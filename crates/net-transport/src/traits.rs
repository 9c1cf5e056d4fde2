//! Transport capability traits
//!
//! The surface a connectivity bootstrapper drives. Implementations own
//! their state; callers only observe it.

use ice_protocol::{
    IceCandidateInit, IceGatherOptions, IceParameters, IceTransportState, QuicTransportState,
};

use crate::{StateHandler, TransportResult};

/// An ICE transport
pub trait IceTransport: Send + Sync {
    /// Current connectivity state
    fn state(&self) -> IceTransportState;

    /// Register a state change handler
    fn on_state_change(&self, handler: StateHandler<IceTransportState>);

    /// Gather local candidates
    fn gather(&self, options: IceGatherOptions) -> TransportResult<()>;

    /// Start connectivity checks using the remote peer's credentials
    fn start(&self, remote: IceParameters) -> TransportResult<()>;

    /// Local credentials to hand to the remote peer
    fn local_parameters(&self) -> IceParameters;

    /// Add a remote candidate; checks run in the background
    fn add_remote_candidate(&self, candidate: IceCandidateInit) -> TransportResult<()>;

    /// Tear down the transport
    fn stop(&self);
}

/// A QUIC transport layered on an ICE transport
pub trait QuicTransport: Send + Sync {
    /// Current connection state
    fn state(&self) -> QuicTransportState;

    /// Register a state change handler
    fn on_state_change(&self, handler: StateHandler<QuicTransportState>);

    /// Close the connection
    fn stop(&self);
}
