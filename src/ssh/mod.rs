//! SSH access to the fleet.
//!
//! Provides:
//! - The [`Transport`] seam and its OpenSSH implementation
//! - The gateway [`TunnelPool`] shared by hosts behind the same jump host

pub mod transport;
pub mod tunnel;

pub use transport::{FailureKind, OpenSshTransport, Transport, TransportError};
pub use tunnel::{GatewayKey, GatewayTunnel, TunnelPool};
