//! Connection Orchestrator — per-remote-peer negotiation state machine
//!
//! Owns every [`Connection`] this client has attempted, keyed by remote peer
//! identity. Driven entirely by notifications: inbound signals from the
//! relay, engine events from the transport layer, commands from the
//! presentation layer. It never blocks waiting on a remote peer.

use super::engine::{
    DataChannel, EngineEvent, EngineEventSender, EngineFactory, IceCandidate, SessionDescription,
    TransportEngine, TransportState,
};
use super::fanout::{self, InboundText};
use super::ConnectionError;
use crate::signaling::protocol::SignalKind;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const CHANNEL_LABEL: &str = "chat";

/// Lifecycle of one negotiated peer link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// State exists but negotiation has not started (buffered candidates only)
    Idle,
    /// Offer/answer exchange in flight
    Negotiating,
    /// Channel up, fan-out eligible
    Open,
    /// Terminal; the connection's state has been discarded
    Closed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Idle => write!(f, "idle"),
            Phase::Negotiating => write!(f, "negotiating"),
            Phase::Open => write!(f, "open"),
            Phase::Closed => write!(f, "closed"),
        }
    }
}

/// A signal queued for the rendezvous server.
#[derive(Debug, Clone)]
pub struct OutboundSignal {
    pub target: String,
    pub kind: SignalKind,
    pub data: serde_json::Value,
}

/// Everything known about one remote peer's connection attempt.
struct Connection {
    phase: Phase,
    engine: Arc<dyn TransportEngine>,
    remote_description_set: bool,
    /// Candidates that arrived before the remote description; applied FIFO
    pending_candidates: VecDeque<IceCandidate>,
    channel: Option<Arc<dyn DataChannel>>,
    transport_state: TransportState,
    initiated_locally: bool,
}

/// Per-client negotiation state machine. Single-task ownership: one
/// orchestrator instance is driven by exactly one event loop.
pub struct ConnectionOrchestrator {
    local_peer: String,
    engines: Arc<dyn EngineFactory>,
    connections: HashMap<String, Connection>,
    /// Peers whose connection reached the terminal phase; late candidates
    /// for these are dropped instead of resurrecting state
    closed_peers: HashSet<String>,
    signals: mpsc::UnboundedSender<OutboundSignal>,
    engine_events: EngineEventSender,
    inbound: mpsc::UnboundedSender<InboundText>,
}

impl ConnectionOrchestrator {
    pub fn new(
        local_peer: &str,
        engines: Arc<dyn EngineFactory>,
        signals: mpsc::UnboundedSender<OutboundSignal>,
        engine_events: EngineEventSender,
        inbound: mpsc::UnboundedSender<InboundText>,
    ) -> Self {
        Self {
            local_peer: local_peer.to_string(),
            engines,
            connections: HashMap::new(),
            closed_peers: HashSet::new(),
            signals,
            engine_events,
            inbound,
        }
    }

    pub fn local_peer(&self) -> &str {
        &self.local_peer
    }

    /// Current phase for `peer`, if it was ever attempted.
    pub fn phase_of(&self, peer: &str) -> Option<Phase> {
        if let Some(connection) = self.connections.get(peer) {
            return Some(connection.phase);
        }
        if self.closed_peers.contains(peer) {
            return Some(Phase::Closed);
        }
        None
    }

    /// Peers whose channel is currently open.
    pub fn open_peers(&self) -> Vec<String> {
        self.connections
            .iter()
            .filter(|(_, connection)| connection.phase == Phase::Open && connection.channel.is_some())
            .map(|(peer, _)| peer.clone())
            .collect()
    }

    /// Dial `peer`: create a fresh connection, produce an offer and relay it.
    /// Valid only when no live connection for that identity exists.
    pub async fn initiate_call(&mut self, peer: &str) -> Result<(), ConnectionError> {
        if self.connections.contains_key(peer) {
            return Err(ConnectionError::ConnectionFailed(format!(
                "connection to {peer} already exists"
            )));
        }
        info!("calling {}", peer);
        let engine = self.create_connection(peer, true);
        match self.drive_offer(peer, &engine).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.discard(peer).await;
                Err(e)
            }
        }
    }

    async fn drive_offer(
        &mut self,
        peer: &str,
        engine: &Arc<dyn TransportEngine>,
    ) -> Result<(), ConnectionError> {
        engine.create_data_channel(CHANNEL_LABEL).await?;
        let offer = engine.create_offer().await?;
        engine.set_local_description(offer.clone()).await?;
        self.send_signal(peer, SignalKind::Offer, &offer)?;
        self.set_phase(peer, Phase::Negotiating);
        Ok(())
    }

    /// Dispatch one inbound envelope from the relay.
    pub async fn handle_signal(
        &mut self,
        from: &str,
        kind: SignalKind,
        data: serde_json::Value,
    ) -> Result<(), ConnectionError> {
        match kind {
            SignalKind::Offer => self.handle_incoming_offer(from, data).await,
            SignalKind::Answer => self.handle_answer(from, data).await,
            SignalKind::Candidate => self.handle_candidate(from, data).await,
        }
    }

    /// Accept an incoming call: set the remote offer, answer it, then drain
    /// whatever candidates arrived early.
    pub async fn handle_incoming_offer(
        &mut self,
        from: &str,
        data: serde_json::Value,
    ) -> Result<(), ConnectionError> {
        let offer: SessionDescription = decode(SignalKind::Offer, data)?;
        info!("incoming call from {}", from);
        let engine = match self.connections.get(from) {
            Some(connection) => connection.engine.clone(),
            None => self.create_connection(from, false),
        };
        match self.drive_answer(from, &engine, offer).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.discard(from).await;
                Err(e)
            }
        }
    }

    async fn drive_answer(
        &mut self,
        from: &str,
        engine: &Arc<dyn TransportEngine>,
        offer: SessionDescription,
    ) -> Result<(), ConnectionError> {
        engine.set_remote_description(offer).await?;
        self.mark_remote_set(from);
        let answer = engine.create_answer().await?;
        engine.set_local_description(answer.clone()).await?;
        self.send_signal(from, SignalKind::Answer, &answer)?;
        self.set_phase(from, Phase::Negotiating);
        self.drain_pending(from).await
    }

    /// Complete a call we initiated. Requires a connection in NEGOTIATING
    /// created by [`Self::initiate_call`]; anything else is a local error and
    /// touches nothing.
    pub async fn handle_answer(
        &mut self,
        from: &str,
        data: serde_json::Value,
    ) -> Result<(), ConnectionError> {
        let answer: SessionDescription = decode(SignalKind::Answer, data)?;
        let engine = {
            let Some(connection) = self.connections.get(from) else {
                return Err(ConnectionError::ConnectionFailed(format!(
                    "no pending call to {from}"
                )));
            };
            if !connection.initiated_locally || connection.phase != Phase::Negotiating {
                return Err(ConnectionError::ConnectionFailed(format!(
                    "unexpected answer from {from} in phase {}",
                    connection.phase
                )));
            }
            connection.engine.clone()
        };
        match self.apply_answer(from, &engine, answer).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.discard(from).await;
                Err(e)
            }
        }
    }

    async fn apply_answer(
        &mut self,
        from: &str,
        engine: &Arc<dyn TransportEngine>,
        answer: SessionDescription,
    ) -> Result<(), ConnectionError> {
        engine.set_remote_description(answer).await?;
        self.mark_remote_set(from);
        self.drain_pending(from).await
    }

    /// Apply or buffer one remote candidate. Candidates outrun descriptions
    /// routinely; anything early is queued FIFO until the remote description
    /// lands. A candidate for a closed connection is dropped.
    pub async fn handle_candidate(
        &mut self,
        from: &str,
        data: serde_json::Value,
    ) -> Result<(), ConnectionError> {
        let candidate: IceCandidate = decode(SignalKind::Candidate, data)?;
        if self.closed_peers.contains(from) && !self.connections.contains_key(from) {
            debug!("discarding candidate for closed connection {}", from);
            return Ok(());
        }
        if !self.connections.contains_key(from) {
            // No negotiation yet; hold the candidate until an offer shows up.
            self.create_connection(from, false);
        }
        let Some(connection) = self.connections.get_mut(from) else {
            return Ok(());
        };
        if connection.remote_description_set {
            let engine = connection.engine.clone();
            match engine.add_ice_candidate(candidate).await {
                Ok(()) => Ok(()),
                Err(e) => {
                    self.discard(from).await;
                    Err(e)
                }
            }
        } else {
            connection.pending_candidates.push_back(candidate);
            Ok(())
        }
    }

    /// Record the open channel and make the peer fan-out eligible.
    pub fn on_channel_open(&mut self, peer: &str, channel: Arc<dyn DataChannel>) {
        let Some(connection) = self.connections.get_mut(peer) else {
            debug!("channel opened for unknown peer {}", peer);
            return;
        };
        info!("channel \"{}\" open with {}", channel.label(), peer);
        connection.channel = Some(channel);
        connection.phase = Phase::Open;
    }

    /// Drop the channel reference. If the transport already reported failure
    /// the connection is finished and its state goes away with it.
    pub async fn on_channel_closed(&mut self, peer: &str) {
        let failed = match self.connections.get_mut(peer) {
            Some(connection) => {
                info!("channel closed with {}", peer);
                connection.channel = None;
                connection.transport_state == TransportState::Failed
            }
            None => return,
        };
        if failed {
            self.discard(peer).await;
        }
    }

    /// Terminal transport failure: release the engine and discard all state
    /// for the peer, buffered candidates included. No retry, no backoff.
    pub async fn on_transport_failed(&mut self, peer: &str) {
        if self.connections.contains_key(peer) {
            warn!("transport failed for {}", peer);
            self.discard(peer).await;
        }
    }

    /// Locally cancel/close the connection to `peer`. No signal is sent to
    /// the remote side; it learns of the close from its own engine.
    pub async fn close(&mut self, peer: &str) {
        self.discard(peer).await;
    }

    /// Close every connection; used at shutdown.
    pub async fn close_all(&mut self) {
        let peers: Vec<String> = self.connections.keys().cloned().collect();
        for peer in peers {
            self.discard(&peer).await;
        }
    }

    /// Route one engine notification for `peer`.
    pub async fn handle_engine_event(&mut self, peer: &str, event: EngineEvent) {
        match event {
            EngineEvent::CandidateDiscovered(candidate) => {
                if !matches!(self.phase_of(peer), Some(Phase::Idle | Phase::Negotiating | Phase::Open)) {
                    debug!("dropping discovered candidate for {}", peer);
                    return;
                }
                if let Err(e) = self.send_signal(peer, SignalKind::Candidate, &candidate) {
                    warn!("could not relay candidate to {}: {}", peer, e);
                }
            }
            EngineEvent::StateChanged(state) => {
                debug!("transport {} for {}", state, peer);
                if let Some(connection) = self.connections.get_mut(peer) {
                    connection.transport_state = state;
                }
                if state == TransportState::Failed {
                    self.on_transport_failed(peer).await;
                }
            }
            EngineEvent::ChannelOpened(channel) => self.on_channel_open(peer, channel),
            EngineEvent::MessageReceived(text) => {
                let _ = self.inbound.send(InboundText {
                    from: peer.to_string(),
                    text,
                });
            }
            EngineEvent::ChannelClosed => self.on_channel_closed(peer).await,
        }
    }

    /// Fan `text` out to every open channel. See [`fanout::broadcast`].
    pub fn broadcast(&self, text: &str) -> Result<usize, ConnectionError> {
        fanout::broadcast(
            self.connections.iter().filter_map(|(peer, connection)| {
                match (connection.phase, &connection.channel) {
                    (Phase::Open, Some(channel)) => Some((peer.as_str(), channel)),
                    _ => None,
                }
            }),
            text,
        )
    }

    fn create_connection(&mut self, peer: &str, initiated_locally: bool) -> Arc<dyn TransportEngine> {
        self.closed_peers.remove(peer);
        let engine = self.engines.create(peer, self.engine_events.clone());
        self.connections.insert(
            peer.to_string(),
            Connection {
                phase: Phase::Idle,
                engine: engine.clone(),
                remote_description_set: false,
                pending_candidates: VecDeque::new(),
                channel: None,
                transport_state: TransportState::New,
                initiated_locally,
            },
        );
        engine
    }

    async fn discard(&mut self, peer: &str) {
        if let Some(connection) = self.connections.remove(peer) {
            connection.engine.close().await;
            self.closed_peers.insert(peer.to_string());
            debug!(
                "discarded connection to {} ({} buffered candidates dropped)",
                peer,
                connection.pending_candidates.len()
            );
        }
    }

    async fn drain_pending(&mut self, peer: &str) -> Result<(), ConnectionError> {
        let (engine, queued) = match self.connections.get_mut(peer) {
            Some(connection) => (
                connection.engine.clone(),
                std::mem::take(&mut connection.pending_candidates),
            ),
            None => return Ok(()),
        };
        for candidate in queued {
            engine.add_ice_candidate(candidate).await?;
        }
        Ok(())
    }

    fn mark_remote_set(&mut self, peer: &str) {
        if let Some(connection) = self.connections.get_mut(peer) {
            connection.remote_description_set = true;
        }
    }

    fn set_phase(&mut self, peer: &str, phase: Phase) {
        if let Some(connection) = self.connections.get_mut(peer) {
            connection.phase = phase;
        }
    }

    fn send_signal<T: Serialize>(
        &self,
        target: &str,
        kind: SignalKind,
        payload: &T,
    ) -> Result<(), ConnectionError> {
        let data = serde_json::to_value(payload)
            .map_err(|e| ConnectionError::ConnectionFailed(format!("encode {kind} failed: {e}")))?;
        self.signals
            .send(OutboundSignal {
                target: target.to_string(),
                kind,
                data,
            })
            .map_err(|_| ConnectionError::ConnectionFailed("signaling channel closed".to_string()))
    }
}

fn decode<T: DeserializeOwned>(
    kind: SignalKind,
    data: serde_json::Value,
) -> Result<T, ConnectionError> {
    serde_json::from_value(data)
        .map_err(|e| ConnectionError::ConnectionFailed(format!("malformed {kind} payload: {e}")))
}
