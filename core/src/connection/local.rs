//! Loopback transport engine — in-process pairs for tests and demos
//!
//! Stands in for a real negotiation engine: descriptions are tokens, one
//! synthetic candidate is "discovered" per side, and the data channel is a
//! pair of in-memory queues. The full offer/answer/candidate choreography is
//! still required before anything opens, so orchestration code exercises the
//! same paths it would against a real engine.

use super::engine::{
    DataChannel, EngineEvent, EngineEventSender, EngineFactory, IceCandidate, SdpType,
    SessionDescription, TransportEngine, TransportState,
};
use super::ConnectionError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

const DEFAULT_LABEL: &str = "chat";

/// One engine's end of a loopback link, keyed by (local, remote).
struct LinkEnd {
    events: EngineEventSender,
    remote_description_set: bool,
    label: Option<String>,
    opened: bool,
    open_flag: Option<Arc<AtomicBool>>,
    applied: Vec<IceCandidate>,
}

impl LinkEnd {
    fn new(events: EngineEventSender) -> Self {
        Self {
            events,
            remote_description_set: false,
            label: None,
            opened: false,
            open_flag: None,
            applied: Vec::new(),
        }
    }
}

/// In-process switchboard pairing the two ends of each loopback link.
/// Share one instance between every peer that should be able to connect.
#[derive(Default)]
pub struct LoopbackNet {
    ends: Mutex<HashMap<(String, String), LinkEnd>>,
}

impl LoopbackNet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Candidates applied on the (local, remote) end, in application order.
    pub fn applied_candidates(&self, local: &str, remote: &str) -> Vec<IceCandidate> {
        self.ends
            .lock()
            .get(&(local.to_string(), remote.to_string()))
            .map(|end| end.applied.clone())
            .unwrap_or_default()
    }

    fn attach(&self, local: &str, remote: &str, events: EngineEventSender) {
        self.ends
            .lock()
            .insert((local.to_string(), remote.to_string()), LinkEnd::new(events));
    }

    fn with_end<R>(
        &self,
        local: &str,
        remote: &str,
        f: impl FnOnce(&mut LinkEnd) -> R,
    ) -> Result<R, ConnectionError> {
        let mut ends = self.ends.lock();
        let end = ends
            .get_mut(&(local.to_string(), remote.to_string()))
            .ok_or_else(|| ConnectionError::ConnectionFailed("engine is closed".to_string()))?;
        Ok(f(end))
    }

    fn local_description_set(&self, local: &str, remote: &str) -> Result<(), ConnectionError> {
        self.with_end(local, remote, |end| {
            let _ = end.events.send((
                remote.to_string(),
                EngineEvent::CandidateDiscovered(synthetic_candidate(local)),
            ));
        })
    }

    fn remote_description_set(&self, local: &str, remote: &str) -> Result<(), ConnectionError> {
        self.with_end(local, remote, |end| end.remote_description_set = true)?;
        self.try_open(local, remote);
        Ok(())
    }

    /// Open the paired channels once both ends hold a remote description.
    fn try_open(&self, local: &str, remote: &str) {
        let mut ends = self.ends.lock();
        let key_a = (local.to_string(), remote.to_string());
        let key_b = (remote.to_string(), local.to_string());

        let (a_events, a_label) = {
            let Some(a) = ends.get(&key_a) else { return };
            if !a.remote_description_set || a.opened {
                return;
            }
            (a.events.clone(), a.label.clone())
        };
        let (b_events, b_label) = {
            let Some(b) = ends.get(&key_b) else { return };
            if !b.remote_description_set || b.opened {
                return;
            }
            (b.events.clone(), b.label.clone())
        };

        // The callee never names the channel; it inherits the caller's label.
        let label = a_label
            .or(b_label)
            .unwrap_or_else(|| DEFAULT_LABEL.to_string());
        let flag = Arc::new(AtomicBool::new(true));

        let channel_for_a = Arc::new(LoopbackChannel {
            label: label.clone(),
            from: local.to_string(),
            open: flag.clone(),
            sink: b_events.clone(),
        });
        let channel_for_b = Arc::new(LoopbackChannel {
            label,
            from: remote.to_string(),
            open: flag.clone(),
            sink: a_events.clone(),
        });

        if let Some(a) = ends.get_mut(&key_a) {
            a.opened = true;
            a.open_flag = Some(flag.clone());
            let _ = a_events.send((
                remote.to_string(),
                EngineEvent::StateChanged(TransportState::Connected),
            ));
            let _ = a_events.send((remote.to_string(), EngineEvent::ChannelOpened(channel_for_a)));
        }
        if let Some(b) = ends.get_mut(&key_b) {
            b.opened = true;
            b.open_flag = Some(flag);
            let _ = b_events.send((
                local.to_string(),
                EngineEvent::StateChanged(TransportState::Connected),
            ));
            let _ = b_events.send((local.to_string(), EngineEvent::ChannelOpened(channel_for_b)));
        }
    }

    /// Tear one end down. The surviving end sees its channel close and the
    /// transport report failure — the only way a remote close is discovered.
    fn detach(&self, local: &str, remote: &str) {
        let mut ends = self.ends.lock();
        let Some(end) = ends.remove(&(local.to_string(), remote.to_string())) else {
            return;
        };
        if let Some(flag) = end.open_flag {
            flag.store(false, Ordering::SeqCst);
        }
        if end.opened {
            if let Some(peer_end) = ends.get_mut(&(remote.to_string(), local.to_string())) {
                peer_end.opened = false;
                peer_end.open_flag = None;
                let _ = peer_end
                    .events
                    .send((local.to_string(), EngineEvent::ChannelClosed));
                let _ = peer_end.events.send((
                    local.to_string(),
                    EngineEvent::StateChanged(TransportState::Failed),
                ));
            }
        }
    }
}

fn synthetic_candidate(local: &str) -> IceCandidate {
    IceCandidate {
        candidate: format!("candidate:1 1 udp 2122260223 127.0.0.1 0 typ host loopback-{local}"),
        sdp_mid: Some("0".to_string()),
        sdp_mline_index: Some(0),
    }
}

/// One half of a paired in-memory channel.
#[derive(Debug)]
pub struct LoopbackChannel {
    label: String,
    /// Identity the receiving side attributes our messages to
    from: String,
    open: Arc<AtomicBool>,
    sink: EngineEventSender,
}

impl DataChannel for LoopbackChannel {
    fn send_text(&self, text: &str) -> Result<(), ConnectionError> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(ConnectionError::ConnectionFailed(
                "channel is closed".to_string(),
            ));
        }
        self.sink
            .send((
                self.from.clone(),
                EngineEvent::MessageReceived(text.to_string()),
            ))
            .map_err(|_| ConnectionError::ConnectionFailed("peer engine is gone".to_string()))
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn label(&self) -> &str {
        &self.label
    }
}

/// Loopback engine for one remote peer.
pub struct LoopbackEngine {
    net: Arc<LoopbackNet>,
    local: String,
    remote: String,
}

#[async_trait]
impl TransportEngine for LoopbackEngine {
    async fn create_offer(&self) -> Result<SessionDescription, ConnectionError> {
        Ok(SessionDescription {
            sdp_type: SdpType::Offer,
            sdp: format!("v=0 loopback {} -> {}", self.local, self.remote),
        })
    }

    async fn create_answer(&self) -> Result<SessionDescription, ConnectionError> {
        Ok(SessionDescription {
            sdp_type: SdpType::Answer,
            sdp: format!("v=0 loopback {} -> {}", self.local, self.remote),
        })
    }

    async fn set_local_description(
        &self,
        _description: SessionDescription,
    ) -> Result<(), ConnectionError> {
        self.net.local_description_set(&self.local, &self.remote)
    }

    async fn set_remote_description(
        &self,
        _description: SessionDescription,
    ) -> Result<(), ConnectionError> {
        self.net.remote_description_set(&self.local, &self.remote)
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), ConnectionError> {
        self.net
            .with_end(&self.local, &self.remote, |end| end.applied.push(candidate))
    }

    async fn create_data_channel(&self, label: &str) -> Result<(), ConnectionError> {
        self.net
            .with_end(&self.local, &self.remote, |end| {
                end.label = Some(label.to_string())
            })
    }

    async fn close(&self) {
        self.net.detach(&self.local, &self.remote);
    }
}

/// Creates loopback engines for one local peer against a shared net.
pub struct LoopbackEngineFactory {
    net: Arc<LoopbackNet>,
    local: String,
}

impl LoopbackEngineFactory {
    pub fn new(net: Arc<LoopbackNet>, local: &str) -> Self {
        Self {
            net,
            local: local.to_string(),
        }
    }
}

impl EngineFactory for LoopbackEngineFactory {
    fn create(&self, remote_peer: &str, events: EngineEventSender) -> Arc<dyn TransportEngine> {
        self.net.attach(&self.local, remote_peer, events);
        Arc::new(LoopbackEngine {
            net: self.net.clone(),
            local: self.local.clone(),
            remote: remote_peer.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    struct Pair {
        net: Arc<LoopbackNet>,
        alice: Arc<dyn TransportEngine>,
        bob: Arc<dyn TransportEngine>,
        alice_rx: mpsc::UnboundedReceiver<(String, EngineEvent)>,
        bob_rx: mpsc::UnboundedReceiver<(String, EngineEvent)>,
    }

    fn pair() -> Pair {
        let net = Arc::new(LoopbackNet::new());
        let (alice_tx, alice_rx) = mpsc::unbounded_channel();
        let (bob_tx, bob_rx) = mpsc::unbounded_channel();
        let alice = LoopbackEngineFactory::new(net.clone(), "alice").create("bob", alice_tx);
        let bob = LoopbackEngineFactory::new(net.clone(), "bob").create("alice", bob_tx);
        Pair {
            net,
            alice,
            bob,
            alice_rx,
            bob_rx,
        }
    }

    async fn negotiate(p: &mut Pair) {
        p.alice.create_data_channel("chat").await.expect("channel");
        let offer = p.alice.create_offer().await.expect("offer");
        p.alice
            .set_local_description(offer.clone())
            .await
            .expect("local offer");
        p.bob.set_remote_description(offer).await.expect("remote offer");
        let answer = p.bob.create_answer().await.expect("answer");
        p.bob
            .set_local_description(answer.clone())
            .await
            .expect("local answer");
        p.alice
            .set_remote_description(answer)
            .await
            .expect("remote answer");
    }

    fn drain_channel(
        rx: &mut mpsc::UnboundedReceiver<(String, EngineEvent)>,
    ) -> Option<Arc<dyn DataChannel>> {
        while let Ok((_, event)) = rx.try_recv() {
            if let EngineEvent::ChannelOpened(channel) = event {
                return Some(channel);
            }
        }
        None
    }

    #[tokio::test]
    async fn test_channels_open_after_full_negotiation() {
        let mut p = pair();
        negotiate(&mut p).await;

        let alice_channel = drain_channel(&mut p.alice_rx).expect("alice channel");
        let bob_channel = drain_channel(&mut p.bob_rx).expect("bob channel");
        assert!(alice_channel.is_open());
        assert_eq!(bob_channel.label(), "chat");
    }

    #[tokio::test]
    async fn test_text_crosses_the_link_with_sender_tag() {
        let mut p = pair();
        negotiate(&mut p).await;
        let alice_channel = drain_channel(&mut p.alice_rx).expect("alice channel");
        drain_channel(&mut p.bob_rx);

        alice_channel.send_text("ping").expect("send");

        let (from, event) = p.bob_rx.try_recv().expect("delivered");
        assert_eq!(from, "alice");
        match event {
            EngineEvent::MessageReceived(text) => assert_eq!(text, "ping"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_local_description_discovers_a_candidate() {
        let mut p = pair();
        let offer = p.alice.create_offer().await.expect("offer");
        p.alice.set_local_description(offer).await.expect("local");

        let (from, event) = p.alice_rx.try_recv().expect("event");
        assert_eq!(from, "bob");
        assert!(matches!(event, EngineEvent::CandidateDiscovered(_)));
    }

    #[tokio::test]
    async fn test_close_surfaces_failure_at_the_other_end() {
        let mut p = pair();
        negotiate(&mut p).await;
        let alice_channel = drain_channel(&mut p.alice_rx).expect("alice channel");
        let bob_channel = drain_channel(&mut p.bob_rx).expect("bob channel");

        p.alice.close().await;

        assert!(!bob_channel.is_open());
        assert!(alice_channel.send_text("into the void").is_err());
        let events: Vec<_> = std::iter::from_fn(|| p.bob_rx.try_recv().ok()).collect();
        assert!(events
            .iter()
            .any(|(_, e)| matches!(e, EngineEvent::ChannelClosed)));
        assert!(events.iter().any(|(_, e)| matches!(
            e,
            EngineEvent::StateChanged(TransportState::Failed)
        )));
    }

    #[tokio::test]
    async fn test_candidates_record_in_application_order() {
        let p = pair();
        for n in 1..=3 {
            p.alice
                .add_ice_candidate(IceCandidate {
                    candidate: format!("candidate:{n}"),
                    sdp_mid: None,
                    sdp_mline_index: None,
                })
                .await
                .expect("apply");
        }
        let applied: Vec<String> = p
            .net
            .applied_candidates("alice", "bob")
            .into_iter()
            .map(|c| c.candidate)
            .collect();
        assert_eq!(applied, vec!["candidate:1", "candidate:2", "candidate:3"]);
    }
}
