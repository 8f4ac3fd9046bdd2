//! Transport engine abstraction — the seam to the external negotiation engine
//!
//! Defines the types and events the orchestrator exchanges with whatever
//! actually performs ICE/DTLS/SCTP. One engine instance serves one remote
//! peer; events come back tagged with that peer's identity.

use super::ConnectionError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Which half of the description exchange a [`SessionDescription`] is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

/// A session description as carried inside `offer`/`answer` signal data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

/// One candidate network path, as carried inside `ice-candidate` signal data.
///
/// Field spelling matches the wire format the description exchange uses, so
/// these serialize directly into signal payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid", skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", skip_serializing_if = "Option::is_none")]
    pub sdp_mline_index: Option<u32>,
}

/// Connection lifecycle as reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    New,
    Connecting,
    Connected,
    Failed,
    Closed,
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportState::New => write!(f, "new"),
            TransportState::Connecting => write!(f, "connecting"),
            TransportState::Connected => write!(f, "connected"),
            TransportState::Failed => write!(f, "failed"),
            TransportState::Closed => write!(f, "closed"),
        }
    }
}

/// Notifications pushed by an engine for its remote peer.
#[derive(Debug)]
pub enum EngineEvent {
    /// The engine discovered a candidate to relay to the remote peer
    CandidateDiscovered(IceCandidate),
    /// Underlying transport state changed
    StateChanged(TransportState),
    /// The bidirectional channel is up
    ChannelOpened(Arc<dyn DataChannel>),
    /// Text arrived on the open channel
    MessageReceived(String),
    /// The channel went away
    ChannelClosed,
}

/// Engine events arrive tagged with the remote peer they concern.
pub type EngineEventSender = mpsc::UnboundedSender<(String, EngineEvent)>;

/// One direct bidirectional text channel.
pub trait DataChannel: fmt::Debug + Send + Sync {
    /// Queue `text` for the remote peer.
    fn send_text(&self, text: &str) -> Result<(), ConnectionError>;
    /// Whether the channel is currently open for sending.
    fn is_open(&self) -> bool;
    fn label(&self) -> &str;
}

/// The external transport-negotiation engine, one instance per remote peer.
#[async_trait]
pub trait TransportEngine: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription, ConnectionError>;
    async fn create_answer(&self) -> Result<SessionDescription, ConnectionError>;
    async fn set_local_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), ConnectionError>;
    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), ConnectionError>;
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), ConnectionError>;
    /// Announce the channel to negotiate; the caller side does this before
    /// producing its offer.
    async fn create_data_channel(&self, label: &str) -> Result<(), ConnectionError>;
    /// Release the engine's resources. Idempotent.
    async fn close(&self);
}

/// Creates one engine per remote peer, wired to the orchestrator's tagged
/// event stream.
pub trait EngineFactory: Send + Sync {
    fn create(&self, remote_peer: &str, events: EngineEventSender) -> Arc<dyn TransportEngine>;
}
