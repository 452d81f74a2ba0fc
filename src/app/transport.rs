// Copyright 2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! The peer-to-peer RPC boundary. A real deployment binds this to HTTP, as
//! spec'd in the client/peer JSON schemas; this crate ships only an
//! in-process reference implementation so the ring logic is testable
//! without a network.

use super::message::PeerMessage;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// Sends a message to a named peer. Topology RPCs (`join`, `joinResponse`,
/// `update_succ_info`, the shift/inc/dec family, `departPred`) are
/// synchronous by spec; data-plane chain hops (`modify`, `query`,
/// `query_star`) are fire-and-forget. Both are represented the same way
/// here — delivery is all this trait promises, not a reply.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    async fn send(&self, to: &str, message: PeerMessage) -> anyhow::Result<()>;

    /// Claim `url`'s inbox, returning the receiving half a `Node` polls in
    /// its run loop. Called once, during actor `init`.
    async fn register(&self, url: String) -> mpsc::UnboundedReceiver<PeerMessage>;

    async fn deregister(&self, url: &str);
}

/// An in-process transport for tests and the bundled demo: peers register
/// an inbox keyed by URL, and `send` is a direct channel hand-off with no
/// network involved. Still genuinely asynchronous and non-FIFO-ordered
/// across distinct sender tasks, which is why the sequencer still matters
/// even here.
#[derive(Clone, Default)]
pub struct LoopbackTransport {
    inboxes: Arc<Mutex<HashMap<String, mpsc::UnboundedSender<PeerMessage>>>>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PeerTransport for LoopbackTransport {
    async fn send(&self, to: &str, message: PeerMessage) -> anyhow::Result<()> {
        let sender = self
            .inboxes
            .lock()
            .await
            .get(to)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no peer registered at {}", to))?;
        sender
            .send(message)
            .map_err(|_| anyhow::anyhow!("peer {} inbox closed", to))
    }

    async fn register(&self, url: String) -> mpsc::UnboundedReceiver<PeerMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inboxes.lock().await.insert(url, tx);
        rx
    }

    async fn deregister(&self, url: &str) {
        self.inboxes.lock().await.remove(url);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::message::PeerMessage;

    #[tokio::test]
    async fn send_to_unregistered_peer_errors() {
        let transport = LoopbackTransport::new();
        let err = transport
            .send("http://nowhere", PeerMessage::UpdateSuccInfo { new_node_url: "x".into() })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no peer registered"));
    }

    #[tokio::test]
    async fn registered_peer_receives_sent_message() {
        let transport = LoopbackTransport::new();
        let mut rx = transport.register("http://a".into()).await;
        transport
            .send("http://a", PeerMessage::UpdateSuccInfo { new_node_url: "http://b".into() })
            .await
            .unwrap();
        let received = rx.recv().await.unwrap();
        assert!(matches!(received, PeerMessage::UpdateSuccInfo { new_node_url } if new_node_url == "http://b"));
    }
}
