//! Fans the Agent Bridge's single, process-wide response handler back out
//! to the particular session each [`voice_agent_core::AgentMessage`] is
//! addressed to.
//!
//! The bridge (§4.5) only supports one `ResponseHandler` at a time, shared
//! across every session subscription on the instance. Mirrors the
//! registry's `RwLock<HashMap>` convention so sessions can come and go
//! without touching that shared handler.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::debug;

use voice_agent_bridge::ResponseHandler;
use voice_agent_core::AgentMessage;

const SESSION_RESPONSE_BUFFER: usize = 64;

#[derive(Default)]
pub struct ResponseRouter {
    senders: RwLock<HashMap<String, mpsc::Sender<AgentMessage>>>,
}

impl ResponseRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers interest in `session_id`'s responses and returns the
    /// receiving half.
    pub fn register(&self, session_id: impl Into<String>) -> mpsc::Receiver<AgentMessage> {
        let (tx, rx) = mpsc::channel(SESSION_RESPONSE_BUFFER);
        self.senders.write().insert(session_id.into(), tx);
        rx
    }

    pub fn unregister(&self, session_id: &str) {
        self.senders.write().remove(session_id);
    }

    fn dispatch(&self, msg: AgentMessage) {
        let Some(session_id) = msg.session_id.as_deref() else {
            debug!("dropping response envelope with no session_id");
            return;
        };
        let sender = self.senders.read().get(session_id).cloned();
        match sender {
            Some(sender) => {
                if sender.try_send(msg).is_err() {
                    debug!(session_id, "session response channel full or closed, dropping");
                }
            }
            None => debug!(session_id, "no active session for response envelope"),
        }
    }

    /// Wraps this router as the single [`ResponseHandler`] the bridge
    /// invokes for every session subscription.
    pub fn as_handler(self: Arc<Self>) -> ResponseHandler {
        Arc::new(move |msg| self.dispatch(msg))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voice_agent_core::MessageKind;

    fn response_for(session_id: &str) -> AgentMessage {
        AgentMessage::response_delta("hi").with_session_id(session_id)
    }

    #[tokio::test]
    async fn dispatches_to_the_registered_session_only() {
        let router = Arc::new(ResponseRouter::new());
        let mut rx_a = router.register("A");
        let mut rx_b = router.register("B");

        let handler = router.clone().as_handler();
        handler(response_for("A"));

        let msg = rx_a.try_recv().expect("A should receive its message");
        assert_eq!(msg.kind, MessageKind::ResponseDelta);
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn unregistered_session_drops_silently() {
        let router = Arc::new(ResponseRouter::new());
        let handler = router.as_handler();
        handler(response_for("ghost"));
    }

    #[tokio::test]
    async fn unregister_stops_further_delivery() {
        let router = Arc::new(ResponseRouter::new());
        let mut rx = router.register("A");
        router.unregister("A");
        let handler = router.as_handler();
        handler(response_for("A"));
        assert!(rx.try_recv().is_err());
    }
}
