//! Rendezvous service — request dispatch for one signaling session
//!
//! The transport layer (WebSocket server, in-process test harness) owns the
//! sockets; this owns the semantics. One [`Rendezvous`] serves every session.

use super::directory::{Directory, Session, SessionId};
use super::protocol::{ClientRequest, ServerEvent, SignalEnvelope};
use super::router::RelayRouter;
use super::SignalingError;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Directory + relay router behind a single request surface.
pub struct Rendezvous {
    directory: Arc<Directory>,
    router: RelayRouter,
}

impl Rendezvous {
    pub fn new(directory: Arc<Directory>) -> Self {
        let router = RelayRouter::new(directory.clone());
        Self { directory, router }
    }

    pub fn directory(&self) -> &Arc<Directory> {
        &self.directory
    }

    /// Handle one request from `session`.
    ///
    /// Positive replies go straight to `outbox`; the error return is the
    /// sender-only failure path, for the transport to convert into an
    /// `error` event. No failure here mutates shared state.
    pub fn handle(
        &self,
        session: SessionId,
        outbox: &mpsc::UnboundedSender<ServerEvent>,
        request: ClientRequest,
    ) -> Result<(), SignalingError> {
        match request {
            ClientRequest::Register { peer_id } => {
                if peer_id.is_empty() {
                    return Err(SignalingError::MalformedSignal(
                        "peer_id is required".to_string(),
                    ));
                }
                self.directory.register(
                    &peer_id,
                    Session {
                        session_id: session,
                        outbox: outbox.clone(),
                    },
                )?;
                info!(
                    "registered peer {} | peers online: {}",
                    peer_id,
                    self.directory.len()
                );
                let _ = outbox.send(ServerEvent::Registered {
                    status: "ok".to_string(),
                    peer_id,
                });
                Ok(())
            }
            ClientRequest::GetPeers => {
                let peers = self.directory.lookup(session);
                debug!("peer list for session {} | {} peers", session, peers.len());
                let _ = outbox.send(ServerEvent::PeersList { peers });
                Ok(())
            }
            ClientRequest::Signal { target, kind, data } => {
                self.router.relay(session, SignalEnvelope { target, kind, data })
            }
        }
    }

    /// Session teardown. Implicitly releases the session's registration.
    pub fn disconnect(&self, session: SessionId) {
        self.directory.unregister(session);
        debug!(
            "session {} gone | peers online: {}",
            session,
            self.directory.len()
        );
    }
}
