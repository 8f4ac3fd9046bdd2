//! Client node — wires signaling, orchestration and the presentation layer
//!
//! One task owns the orchestrator and suspends only on notifications: server
//! events from the rendezvous, engine events from the transport layer,
//! commands from the presentation side. The presentation input loop runs
//! elsewhere and talks to the node through [`NodeHandle`] — it never shares
//! the event loop.

use crate::connection::engine::{EngineEvent, EngineFactory};
use crate::connection::fanout::InboundText;
use crate::connection::orchestrator::{ConnectionOrchestrator, OutboundSignal, Phase};
use crate::signaling::protocol::{ClientRequest, ServerEvent};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Commands from the presentation layer.
#[derive(Debug, Clone)]
pub enum Command {
    /// Dial a peer by identity
    Call(String),
    /// Ask the rendezvous for the current peer list
    ListPeers,
    /// Send text to every connected peer
    Broadcast(String),
    /// Close every connection and stop the node
    Shutdown,
}

/// Events surfaced to the presentation layer.
#[derive(Debug, Clone)]
pub enum NodeEvent {
    /// The rendezvous accepted our identity
    Registered { peer_id: String },
    /// Directory snapshot; `true` marks peers we hold an open channel with
    PeerList { peers: Vec<(String, bool)> },
    /// Text received from a connected peer
    Message { from: String, text: String },
    /// A channel to `peer` came up
    ChannelOpen { peer: String },
    /// The channel to `peer` went away
    ChannelClosed { peer: String },
    /// A broadcast went out to `peers`
    Delivered {
        text: String,
        count: usize,
        peers: Vec<String>,
    },
    /// A local or server-side failure, already scoped to this client
    Error { message: String },
}

/// Handle the presentation layer uses to drive a running node.
#[derive(Clone)]
pub struct NodeHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl NodeHandle {
    pub fn call(&self, peer: impl Into<String>) {
        let _ = self.commands.send(Command::Call(peer.into()));
    }

    pub fn list_peers(&self) {
        let _ = self.commands.send(Command::ListPeers);
    }

    pub fn broadcast(&self, text: impl Into<String>) {
        let _ = self.commands.send(Command::Broadcast(text.into()));
    }

    pub fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
    }
}

/// Channel receivers the event loop drains. Kept separate from [`NodeState`]
/// so `run` can move them out while handlers keep borrowing the state.
struct Pumps {
    server_events: mpsc::UnboundedReceiver<ServerEvent>,
    engine_events: mpsc::UnboundedReceiver<(String, EngineEvent)>,
    outbound_signals: mpsc::UnboundedReceiver<OutboundSignal>,
    inbound_text: mpsc::UnboundedReceiver<InboundText>,
    commands: mpsc::UnboundedReceiver<Command>,
}

struct NodeState {
    peer_id: String,
    orchestrator: ConnectionOrchestrator,
    requests: mpsc::UnboundedSender<ClientRequest>,
    events: mpsc::UnboundedSender<NodeEvent>,
}

/// A complete client node, ready to [`run`](Self::run).
pub struct ClientNode {
    state: NodeState,
    pumps: Pumps,
}

impl ClientNode {
    /// Assemble a node on top of an established signaling connection.
    /// Returns the node, the presentation handle, and the event stream.
    pub fn new(
        peer_id: &str,
        engines: Arc<dyn EngineFactory>,
        requests: mpsc::UnboundedSender<ClientRequest>,
        server_events: mpsc::UnboundedReceiver<ServerEvent>,
    ) -> (Self, NodeHandle, mpsc::UnboundedReceiver<NodeEvent>) {
        let (signal_tx, outbound_signals) = mpsc::unbounded_channel();
        let (engine_tx, engine_events) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_text) = mpsc::unbounded_channel();
        let (command_tx, commands) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let orchestrator =
            ConnectionOrchestrator::new(peer_id, engines, signal_tx, engine_tx, inbound_tx);

        let node = Self {
            state: NodeState {
                peer_id: peer_id.to_string(),
                orchestrator,
                requests,
                events: event_tx,
            },
            pumps: Pumps {
                server_events,
                engine_events,
                outbound_signals,
                inbound_text,
                commands,
            },
        };
        (node, NodeHandle { commands: command_tx }, event_rx)
    }

    /// Drive the node until shutdown or loss of the signaling session.
    pub async fn run(self) {
        let ClientNode { mut state, pumps } = self;
        let Pumps {
            mut server_events,
            mut engine_events,
            mut outbound_signals,
            mut inbound_text,
            mut commands,
        } = pumps;

        let _ = state.requests.send(ClientRequest::Register {
            peer_id: state.peer_id.clone(),
        });

        loop {
            tokio::select! {
                event = server_events.recv() => match event {
                    Some(event) => state.on_server_event(event).await,
                    None => {
                        info!("signaling session ended");
                        break;
                    }
                },
                Some((peer, event)) = engine_events.recv() => {
                    state.on_engine_event(peer, event).await;
                }
                Some(signal) = outbound_signals.recv() => state.forward_signal(signal),
                Some(inbound) = inbound_text.recv() => {
                    let _ = state.events.send(NodeEvent::Message {
                        from: inbound.from,
                        text: inbound.text,
                    });
                }
                command = commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => state.on_command(command).await,
                },
            }
        }

        state.orchestrator.close_all().await;
        debug!("node loop for {} ended", state.peer_id);
    }
}

impl NodeState {
    async fn on_server_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::Registered { peer_id, .. } => {
                info!("registered as {}", peer_id);
                let _ = self.events.send(NodeEvent::Registered { peer_id });
            }
            ServerEvent::PeersList { peers } => {
                let peers = peers
                    .into_iter()
                    .map(|peer| {
                        let connected =
                            matches!(self.orchestrator.phase_of(&peer), Some(Phase::Open));
                        (peer, connected)
                    })
                    .collect();
                let _ = self.events.send(NodeEvent::PeerList { peers });
            }
            ServerEvent::Signal { from, kind, data } => {
                if let Err(e) = self.orchestrator.handle_signal(&from, kind, data).await {
                    let _ = self.events.send(NodeEvent::Error {
                        message: e.to_string(),
                    });
                }
            }
            ServerEvent::Error { message } => {
                let _ = self.events.send(NodeEvent::Error { message });
            }
        }
    }

    async fn on_engine_event(&mut self, peer: String, event: EngineEvent) {
        match &event {
            EngineEvent::ChannelOpened(_) => {
                let _ = self.events.send(NodeEvent::ChannelOpen { peer: peer.clone() });
            }
            EngineEvent::ChannelClosed => {
                let _ = self
                    .events
                    .send(NodeEvent::ChannelClosed { peer: peer.clone() });
            }
            _ => {}
        }
        self.orchestrator.handle_engine_event(&peer, event).await;
    }

    fn forward_signal(&self, signal: OutboundSignal) {
        let _ = self.requests.send(ClientRequest::Signal {
            target: signal.target,
            kind: signal.kind,
            data: signal.data,
        });
    }

    async fn on_command(&mut self, command: Command) {
        match command {
            Command::Call(peer) => {
                if let Err(e) = self.orchestrator.initiate_call(&peer).await {
                    let _ = self.events.send(NodeEvent::Error {
                        message: e.to_string(),
                    });
                }
            }
            Command::ListPeers => {
                let _ = self.requests.send(ClientRequest::GetPeers);
            }
            Command::Broadcast(text) => match self.orchestrator.broadcast(&text) {
                Ok(count) => {
                    let peers = self.orchestrator.open_peers();
                    let _ = self.events.send(NodeEvent::Delivered { text, count, peers });
                }
                Err(e) => {
                    let _ = self.events.send(NodeEvent::Error {
                        message: e.to_string(),
                    });
                }
            },
            // Shutdown is intercepted by the run loop.
            Command::Shutdown => {}
        }
    }
}
