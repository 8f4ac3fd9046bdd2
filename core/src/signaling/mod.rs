//! Rendezvous signaling — directory, relay routing, wire protocol, client
//!
//! Two NAT-bound peers cannot open a direct channel unaided; this module is
//! the third party that introduces them. It carries setup metadata only —
//! payload data never passes through here once a channel is up.

pub mod client;
pub mod directory;
pub mod protocol;
pub mod rendezvous;
pub mod router;

pub use client::{connect, SignalingConnection};
pub use directory::{Directory, Session, SessionId};
pub use protocol::{ClientRequest, ServerEvent, SignalEnvelope, SignalKind};
pub use rendezvous::Rendezvous;
pub use router::RelayRouter;

use thiserror::Error;

/// Errors surfaced by the directory and relay router. Always returned to the
/// originating session only — never broadcast, never applied to the target.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignalingError {
    #[error("peer id \"{0}\" is already in use")]
    DuplicatePeerId(String),
    #[error("peer \"{0}\" not found or offline")]
    PeerNotFound(String),
    #[error("malformed signal: {0}")]
    MalformedSignal(String),
}
