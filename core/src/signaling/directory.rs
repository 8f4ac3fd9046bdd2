//! Directory Service — the rendezvous mapping from peer identity to session

use super::protocol::ServerEvent;
use super::SignalingError;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Opaque handle identifying one live signaling session (one socket).
///
/// Assigned by the transport layer at connect time; never derived from or
/// related to the peer identity the session later registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A live registration: who the session is and how to reach its socket.
#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: SessionId,
    /// Delivery path back to the session's socket
    pub outbox: mpsc::UnboundedSender<ServerEvent>,
}

/// Both directions of the identity mapping, behind one lock so they can
/// never drift apart.
#[derive(Default)]
struct Registrations {
    by_peer: HashMap<String, Session>,
    by_session: HashMap<SessionId, String>,
}

/// Authoritative identity → session mapping; the rendezvous point itself.
///
/// Every operation takes the single internal lock, so concurrent calls from
/// different sessions each observe one consistent snapshot of the table.
pub struct Directory {
    inner: Mutex<Registrations>,
}

impl Directory {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Registrations::default()),
        }
    }

    /// Claim `peer_id` for `session`.
    ///
    /// Fails with [`SignalingError::DuplicatePeerId`] if a *different* live
    /// session holds the identity. Re-registering the same identity from the
    /// same session is idempotent and updates nothing. A session registering
    /// a new identity releases its previous one in the same critical section.
    pub fn register(&self, peer_id: &str, session: Session) -> Result<(), SignalingError> {
        let mut inner = self.inner.lock();

        if let Some(existing) = inner.by_peer.get(peer_id) {
            if existing.session_id == session.session_id {
                return Ok(());
            }
            return Err(SignalingError::DuplicatePeerId(peer_id.to_string()));
        }

        if let Some(old_peer) = inner
            .by_session
            .insert(session.session_id, peer_id.to_string())
        {
            inner.by_peer.remove(&old_peer);
        }
        inner.by_peer.insert(peer_id.to_string(), session);
        Ok(())
    }

    /// All registered identities except the requester's own.
    pub fn lookup(&self, requester: SessionId) -> Vec<String> {
        let inner = self.inner.lock();
        let own = inner.by_session.get(&requester).cloned();
        inner
            .by_peer
            .keys()
            .filter(|id| own.as_deref() != Some(id.as_str()))
            .cloned()
            .collect()
    }

    /// The identity a session registered as, if any.
    pub fn identity_of(&self, session: SessionId) -> Option<String> {
        self.inner.lock().by_session.get(&session).cloned()
    }

    /// Resolve a peer identity to its active session.
    pub fn find(&self, peer_id: &str) -> Option<Session> {
        self.inner.lock().by_peer.get(peer_id).cloned()
    }

    /// Drop whatever binding `session` owns. Disconnect of a session that
    /// never registered is not an error.
    pub fn unregister(&self, session: SessionId) {
        let mut inner = self.inner.lock();
        if let Some(peer_id) = inner.by_session.remove(&session) {
            inner.by_peer.remove(&peer_id);
        }
    }

    /// Number of active registrations.
    pub fn len(&self) -> usize {
        self.inner.lock().by_peer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for Directory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn session() -> (Session, mpsc::UnboundedReceiver<ServerEvent>) {
        let (outbox, rx) = mpsc::unbounded_channel();
        (
            Session {
                session_id: SessionId::new(),
                outbox,
            },
            rx,
        )
    }

    #[test]
    fn test_register_new_identity() {
        let directory = Directory::new();
        let (alice, _rx) = session();

        assert!(directory.register("alice", alice).is_ok());
        assert_eq!(directory.len(), 1);
    }

    #[test]
    fn test_duplicate_identity_rejected_first_unaffected() {
        let directory = Directory::new();
        let (first, _rx1) = session();
        let first_id = first.session_id;
        let (second, _rx2) = session();

        directory.register("alice", first).expect("first register");
        let result = directory.register("alice", second);

        assert_eq!(
            result,
            Err(SignalingError::DuplicatePeerId("alice".to_string()))
        );
        // Original holder still owns the identity.
        let held = directory.find("alice").expect("still registered");
        assert_eq!(held.session_id, first_id);
    }

    #[test]
    fn test_reregister_same_session_is_idempotent() {
        let directory = Directory::new();
        let (alice, _rx) = session();
        let again = alice.clone();

        directory.register("alice", alice).expect("register");
        assert!(directory.register("alice", again).is_ok());
        assert_eq!(directory.len(), 1);
    }

    #[test]
    fn test_new_identity_releases_old_binding() {
        let directory = Directory::new();
        let (alice, _rx) = session();
        let renamed = alice.clone();

        directory.register("alice", alice).expect("register");
        directory.register("alice2", renamed).expect("rebind");

        assert_eq!(directory.len(), 1);
        assert!(directory.find("alice").is_none());
        assert!(directory.find("alice2").is_some());
    }

    #[test]
    fn test_lookup_excludes_caller() {
        let directory = Directory::new();
        let (alice, _rx1) = session();
        let alice_id = alice.session_id;
        let (bob, _rx2) = session();

        directory.register("alice", alice).expect("register alice");
        directory.register("bob", bob).expect("register bob");

        assert_eq!(directory.lookup(alice_id), vec!["bob".to_string()]);
    }

    #[test]
    fn test_lookup_from_unregistered_session_sees_everyone() {
        let directory = Directory::new();
        let (alice, _rx) = session();
        directory.register("alice", alice).expect("register");

        let mut peers = directory.lookup(SessionId::new());
        peers.sort();
        assert_eq!(peers, vec!["alice".to_string()]);
    }

    #[test]
    fn test_unregister_unknown_session_is_noop() {
        let directory = Directory::new();
        directory.unregister(SessionId::new());
        assert!(directory.is_empty());
    }

    #[test]
    fn test_identity_reusable_after_disconnect() {
        let directory = Directory::new();
        let (alice, _rx1) = session();
        let alice_id = alice.session_id;

        directory.register("alice", alice).expect("register");
        directory.unregister(alice_id);
        assert!(directory.is_empty());

        let (newcomer, _rx2) = session();
        assert!(directory.register("alice", newcomer).is_ok());
    }

    #[test]
    fn test_concurrent_register_unregister_leaves_no_residue() {
        let directory = Arc::new(Directory::new());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let directory = directory.clone();
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        let (contender, _rx) = session();
                        let id = contender.session_id;
                        if directory.register("contested", contender).is_ok() {
                            assert_eq!(
                                directory.identity_of(id).as_deref(),
                                Some("contested")
                            );
                            directory.unregister(id);
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().expect("worker panicked");
        }
        assert!(directory.is_empty());
    }
}
