//! Relay Router — forwards signal envelopes between directory-known sessions

use super::directory::{Directory, SessionId};
use super::protocol::{ServerEvent, SignalEnvelope};
use super::SignalingError;
use std::sync::Arc;
use tracing::debug;

/// Forwards signaling envelopes between two registered sessions.
///
/// Delivery is at-most-once and unacknowledged. The router never retries and
/// never buffers; durability of a signal is the sender's concern.
pub struct RelayRouter {
    directory: Arc<Directory>,
}

impl RelayRouter {
    pub fn new(directory: Arc<Directory>) -> Self {
        Self { directory }
    }

    /// Validate and forward `envelope` on behalf of the session `sender`.
    ///
    /// The delivered event carries the sender's *registered* identity, looked
    /// up from the session handle — a caller-supplied origin is never
    /// trusted. All failures are returned to the sender alone and leave the
    /// target untouched.
    pub fn relay(
        &self,
        sender: SessionId,
        envelope: SignalEnvelope,
    ) -> Result<(), SignalingError> {
        if envelope.target.is_empty() {
            return Err(SignalingError::MalformedSignal("empty target".to_string()));
        }
        if envelope.data.is_null() {
            return Err(SignalingError::MalformedSignal(
                "empty signal data".to_string(),
            ));
        }

        let from = self
            .directory
            .identity_of(sender)
            .ok_or_else(|| SignalingError::MalformedSignal("sender is not registered".to_string()))?;

        let target = self
            .directory
            .find(&envelope.target)
            .ok_or_else(|| SignalingError::PeerNotFound(envelope.target.clone()))?;

        debug!("relay {} | {} -> {}", envelope.kind, from, envelope.target);

        let event = ServerEvent::Signal {
            from,
            kind: envelope.kind,
            data: envelope.data,
        };
        if target.outbox.send(event).is_err() {
            // Target socket is mid-teardown; at-most-once means the signal dies here.
            debug!(
                "dropped {} signal for departing peer {}",
                envelope.kind, envelope.target
            );
        }
        Ok(())
    }
}
