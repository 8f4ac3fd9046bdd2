//! Fan-out messenger — one payload to every open channel

use super::engine::DataChannel;
use super::ConnectionError;
use std::sync::Arc;
use tracing::warn;

/// Text received on an open channel, tagged with the peer that sent it.
///
/// Ordering holds per peer (to the extent the transport guarantees it);
/// across peers there is none.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundText {
    pub from: String,
    pub text: String,
}

/// Send `text` on every channel currently open, returning how many sends
/// were attempted.
///
/// With no open channel this fails with [`ConnectionError::NoOpenChannels`]
/// before touching any transport. A send that fails locally is logged and
/// still counted — fan-out is best-effort, never all-or-nothing.
pub fn broadcast<'a, I>(channels: I, text: &str) -> Result<usize, ConnectionError>
where
    I: IntoIterator<Item = (&'a str, &'a Arc<dyn DataChannel>)>,
{
    let mut delivered = 0;
    for (peer, channel) in channels {
        if !channel.is_open() {
            continue;
        }
        if let Err(e) = channel.send_text(text) {
            warn!("send to {} failed: {}", peer, e);
        }
        delivered += 1;
    }
    if delivered == 0 {
        return Err(ConnectionError::NoOpenChannels);
    }
    Ok(delivered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Debug)]
    struct StubChannel {
        open: bool,
        sent: Mutex<Vec<String>>,
    }

    impl StubChannel {
        fn new(open: bool) -> Arc<dyn DataChannel> {
            Arc::new(Self {
                open,
                sent: Mutex::new(Vec::new()),
            })
        }
    }

    impl DataChannel for StubChannel {
        fn send_text(&self, text: &str) -> Result<(), ConnectionError> {
            if !self.open {
                return Err(ConnectionError::ConnectionFailed("closed".to_string()));
            }
            self.sent.lock().push(text.to_string());
            Ok(())
        }

        fn is_open(&self) -> bool {
            self.open
        }

        fn label(&self) -> &str {
            "chat"
        }
    }

    #[test]
    fn test_broadcast_reaches_every_open_channel() {
        let channels = vec![
            ("bob".to_string(), StubChannel::new(true)),
            ("carol".to_string(), StubChannel::new(true)),
        ];
        let delivered = broadcast(
            channels.iter().map(|(peer, ch)| (peer.as_str(), ch)),
            "hi",
        )
        .expect("broadcast");
        assert_eq!(delivered, 2);
    }

    #[test]
    fn test_broadcast_skips_channels_no_longer_open() {
        let channels = vec![
            ("bob".to_string(), StubChannel::new(true)),
            ("carol".to_string(), StubChannel::new(false)),
        ];
        let delivered = broadcast(
            channels.iter().map(|(peer, ch)| (peer.as_str(), ch)),
            "hi",
        )
        .expect("broadcast");
        assert_eq!(delivered, 1);
    }

    #[test]
    fn test_broadcast_with_no_channels_fails() {
        let channels: Vec<(String, Arc<dyn DataChannel>)> = Vec::new();
        let result = broadcast(channels.iter().map(|(peer, ch)| (peer.as_str(), ch)), "hi");
        assert!(matches!(result, Err(ConnectionError::NoOpenChannels)));
    }

    #[test]
    fn test_broadcast_with_only_stale_channels_fails() {
        let channels = vec![("bob".to_string(), StubChannel::new(false))];
        let result = broadcast(channels.iter().map(|(peer, ch)| (peer.as_str(), ch)), "hi");
        assert!(matches!(result, Err(ConnectionError::NoOpenChannels)));
    }
}
