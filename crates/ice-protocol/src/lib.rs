//! Shared ICE protocol definitions for the ICE/QUIC demo
//!
//! This crate contains the STUN message codec, the ICE candidate line,
//! connectivity parameters and the transport state enums shared by the
//! client and the server.

mod candidate;
mod error;
mod parameters;
mod state;
mod stun;

pub use candidate::*;
pub use error::*;
pub use parameters::*;
pub use state::*;
pub use stun::*;

/// Default UDP port the demo server listens on for ICE and QUIC
pub const DEFAULT_ICE_PORT: u16 = 3737;

/// Default ICE password shared between the demo client and server
pub const DEFAULT_ICE_PASSWORD: &str = "password";

/// Default address of the demo server
pub const DEFAULT_ICE_ADDRESS: &str = "127.0.0.1";

/// Largest UDP payload read in one go
pub const MAX_UDP_PACKET_SIZE: usize = 1500;
