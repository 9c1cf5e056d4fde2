//! Network Transport - ICE and QUIC-over-ICE for the connectivity demo
//!
//! Provides the transport capability traits the bootstrapper drives, a
//! UDP implementation of them backed by STUN connectivity checks, a quinn
//! client that takes over the checked path, and the STUN responder the
//! demo server runs.

mod error;
mod ice;
mod observer;
mod quic;
mod responder;
mod traits;

pub use error::*;
pub use ice::*;
pub use observer::*;
pub use quic::*;
pub use responder::*;
pub use traits::*;
