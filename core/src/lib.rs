// nexus-core — Rendezvous & Direct-Channel Spine
//
// "Can two peers behind NAT find each other and talk directly,
//  with the server touching nothing but setup metadata?"
//
// Everything in this crate serves that question. The rendezvous side
// (directory, relay router) and the client side (orchestrator, fan-out,
// node loop) live together so the wire protocol has exactly one definition.

pub mod connection;
pub mod node;
pub mod signaling;

pub use connection::engine::{
    DataChannel, EngineEvent, EngineEventSender, EngineFactory, IceCandidate, SdpType,
    SessionDescription, TransportEngine, TransportState,
};
pub use connection::{ConnectionError, ConnectionOrchestrator, InboundText, Phase};
pub use node::{ClientNode, Command, NodeEvent, NodeHandle};
pub use signaling::{
    ClientRequest, Directory, RelayRouter, Rendezvous, ServerEvent, Session, SessionId,
    SignalEnvelope, SignalKind, SignalingError,
};
