//! Signaling wire protocol — messages exchanged with the rendezvous server
//!
//! JSON text frames over one persistent WebSocket per client. The `data`
//! field of a signal is opaque here; only the connection layer interprets it.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Discriminant of a relayed signaling payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalKind {
    /// Session description opening a negotiation
    #[serde(rename = "offer")]
    Offer,
    /// Session description completing a negotiation
    #[serde(rename = "answer")]
    Answer,
    /// One candidate network path for the direct connection
    #[serde(rename = "ice-candidate")]
    Candidate,
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalKind::Offer => write!(f, "offer"),
            SignalKind::Answer => write!(f, "answer"),
            SignalKind::Candidate => write!(f, "ice-candidate"),
        }
    }
}

/// A signaling payload addressed to a peer, as submitted by a sender.
///
/// The router stamps the delivered event with the sender's registered
/// identity; an envelope never carries a self-declared origin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalEnvelope {
    /// Peer identity the payload is for
    pub target: String,
    pub kind: SignalKind,
    /// Opaque payload, interpreted only by the endpoints
    pub data: serde_json::Value,
}

/// Client → server requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientRequest {
    /// Claim a peer identity for this session
    Register { peer_id: String },
    /// Ask for the identities currently online
    GetPeers,
    /// Relay a signaling payload to a named peer
    Signal {
        target: String,
        kind: SignalKind,
        data: serde_json::Value,
    },
}

/// Server → client events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Registration confirmation
    Registered { status: String, peer_id: String },
    /// Directory snapshot, excluding the requesting peer
    PeersList { peers: Vec<String> },
    /// A relayed signal; `from` is the sender's registered identity
    Signal {
        from: String,
        kind: SignalKind,
        data: serde_json::Value,
    },
    /// Operation failure, delivered to the offending session only
    Error { message: String },
}
