//! Peer connection negotiation — engine seam, orchestrator, fan-out
//!
//! The heavy lifting of ICE/DTLS/SCTP belongs to an external transport
//! engine behind the [`engine::TransportEngine`] trait; this module owns the
//! per-peer negotiation choreography around it.

pub mod engine;
pub mod fanout;
pub mod local;
pub mod orchestrator;

pub use engine::{
    DataChannel, EngineEvent, EngineEventSender, EngineFactory, IceCandidate, SdpType,
    SessionDescription, TransportEngine, TransportState,
};
pub use fanout::InboundText;
pub use local::{LoopbackEngineFactory, LoopbackNet};
pub use orchestrator::{ConnectionOrchestrator, OutboundSignal, Phase};

use thiserror::Error;

/// Errors from the connection layer. Always scoped to one remote peer and
/// reported to the local caller only — never sent over the wire.
#[derive(Debug, Clone, Error)]
pub enum ConnectionError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("no open channels")]
    NoOpenChannels,
}
