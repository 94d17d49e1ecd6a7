//! Narrows [`voice_agent_bridge::AgentBridge`] down to the publish/
//! subscribe operations the session drives, mirroring [`crate::peer_sink`].

use async_trait::async_trait;
use voice_agent_bridge::{AgentBridge, Result as BridgeResult};
use voice_agent_core::AgentMessage;

#[async_trait]
pub trait ReplyBridge: Send + Sync {
    async fn subscribe_to_session(&self, session_id: &str) -> BridgeResult<()>;
    async fn unsubscribe_from_session(&self, session_id: &str);
    async fn refresh_session_subscription(&self, session_id: &str);
    fn publish_utterance(&self, msg: AgentMessage);
    fn publish_cancellation(&self, agent_id: &str, session_id: &str, reason: &str);
}

#[async_trait]
impl ReplyBridge for AgentBridge {
    async fn subscribe_to_session(&self, session_id: &str) -> BridgeResult<()> {
        AgentBridge::subscribe_to_session(self, session_id).await
    }

    async fn unsubscribe_from_session(&self, session_id: &str) {
        AgentBridge::unsubscribe_from_session(self, session_id).await
    }

    async fn refresh_session_subscription(&self, session_id: &str) {
        AgentBridge::refresh_session_subscription(self, session_id).await
    }

    fn publish_utterance(&self, msg: AgentMessage) {
        AgentBridge::publish_utterance(self, msg)
    }

    fn publish_cancellation(&self, agent_id: &str, session_id: &str, reason: &str) {
        AgentBridge::publish_cancellation(self, agent_id, session_id, reason)
    }
}
