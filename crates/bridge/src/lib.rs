//! Agent Bridge (§4.5): cross-instance fan-out over the broker.
//!
//! Two channel families live on the broker (§6.3): one request channel per
//! agent (`agent:{id}:requests`) and one response channel per session
//! (`session:{id}:responses`). This crate owns publishing envelopes onto
//! those channels and running the subscriber tasks that pull them back off
//! on the instance that locally hosts the agent connection or the session.
//!
//! Subscriber lifetimes form the DAG described in §9: every subscriber
//! task is rooted at the bridge's own `CancellationToken`, so `Close`
//! tears down the whole tree in one shot, while `UnregisterAgent` /
//! `UnsubscribeFromSession` cancel exactly their own child.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use futures::StreamExt;
use parking_lot::RwLock as SyncRwLock;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use voice_agent_config::BridgeConfig;
use voice_agent_core::{agent_request_channel, session_response_channel, AgentMessage, MessageKind};
use voice_agent_registry::AgentConnection;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("failed to connect to broker: {0}")]
    TransientTransport(String),

    #[error("agent {0} already has a live bridge subscription")]
    AlreadyConnected(String),

    #[error("session subscription capacity exceeded ({0} open)")]
    Capacity(usize),
}

pub type Result<T> = std::result::Result<T, BridgeError>;

/// Invoked for every response received on any session subscription; this
/// is the voice session's response ingress (§4.5 `SetResponseHandler`).
pub type ResponseHandler = std::sync::Arc<dyn Fn(AgentMessage) + Send + Sync>;

struct AgentSubscription {
    token: CancellationToken,
    task: JoinHandle<()>,
}

struct SessionSubscription {
    token: CancellationToken,
    task: JoinHandle<()>,
    created_at: SyncRwLock<Instant>,
}

pub struct AgentBridge {
    client: async_nats::Client,
    config: BridgeConfig,
    agent_subs: RwLock<HashMap<String, AgentSubscription>>,
    session_subs: RwLock<HashMap<String, SessionSubscription>>,
    response_handler: SyncRwLock<Option<ResponseHandler>>,
    root: CancellationToken,
    sweeper: SyncRwLock<Option<JoinHandle<()>>>,
}

impl AgentBridge {
    /// Connects to the broker (the only retried operation per §7) and
    /// starts the TTL sweeper.
    pub async fn connect(config: BridgeConfig) -> Result<std::sync::Arc<Self>> {
        let client = connect_with_retry(&config.broker_url, 3).await?;

        let bridge = std::sync::Arc::new(Self {
            client,
            config: config.clone(),
            agent_subs: RwLock::new(HashMap::new()),
            session_subs: RwLock::new(HashMap::new()),
            response_handler: SyncRwLock::new(None),
            root: CancellationToken::new(),
            sweeper: SyncRwLock::new(None),
        });

        let sweeper_bridge = bridge.clone();
        let sweep_interval = config.sweep_interval();
        let ttl = config.session_ttl();
        let token = bridge.root.child_token();
        let handle = tokio::spawn(async move {
            sweeper_bridge.run_sweeper(sweep_interval, ttl, token).await;
        });
        *bridge.sweeper.write() = Some(handle);

        Ok(bridge)
    }

    pub fn set_response_handler(&self, handler: ResponseHandler) {
        *self.response_handler.write() = Some(handler);
    }

    /// Starts a subscriber task for `conn`'s agent request channel.
    /// Duplicate live registration fails with `AlreadyConnected`.
    pub async fn register_agent(&self, conn: std::sync::Arc<AgentConnection>) -> Result<()> {
        let mut subs = self.agent_subs.write().await;
        if subs.contains_key(&conn.agent_id) {
            return Err(BridgeError::AlreadyConnected(conn.agent_id.clone()));
        }

        let subject = agent_request_channel(&conn.agent_id);
        let subscriber = self
            .client
            .subscribe(subject.clone())
            .await
            .map_err(|e| BridgeError::TransientTransport(e.to_string()))?;

        let token = self.root.child_token();
        let agent_id = conn.agent_id.clone();
        let conn_for_task = conn.clone();
        let child_token = token.clone();
        let task = tokio::spawn(async move {
            run_agent_subscriber(subscriber, conn_for_task, child_token).await;
        });

        subs.insert(agent_id, AgentSubscription { token, task });
        Ok(())
    }

    /// Cancels and removes the subscription for `agent_id`, if any.
    pub async fn unregister_agent(&self, agent_id: &str) {
        if let Some(sub) = self.agent_subs.write().await.remove(agent_id) {
            sub.token.cancel();
            let _ = sub.task.await;
        }
    }

    /// Idempotently starts (or no-ops on) a subscriber for the session's
    /// response channel. Fails if the instance already has
    /// `max_session_subscriptions` open.
    pub async fn subscribe_to_session(&self, session_id: &str) -> Result<()> {
        let mut subs = self.session_subs.write().await;
        if subs.contains_key(session_id) {
            return Ok(());
        }
        if subs.len() >= self.config.max_session_subscriptions {
            return Err(BridgeError::Capacity(subs.len()));
        }

        let subject = session_response_channel(session_id);
        let subscriber = self
            .client
            .subscribe(subject)
            .await
            .map_err(|e| BridgeError::TransientTransport(e.to_string()))?;

        let token = self.root.child_token();
        // Tasks started before a later `set_response_handler` call keep
        // the snapshot they were spawned with; only new subscriptions
        // pick up a handler registered afterwards.
        let handler = self.response_handler.read().clone();
        let child_token = token.clone();
        let task = tokio::spawn(async move {
            run_session_subscriber(subscriber, handler, child_token).await;
        });

        subs.insert(
            session_id.to_string(),
            SessionSubscription {
                token,
                task,
                created_at: SyncRwLock::new(Instant::now()),
            },
        );
        Ok(())
    }

    /// Updates the subscription's last-refresh time, used by the TTL
    /// sweeper. No-op if the session has no open subscription.
    pub async fn refresh_session_subscription(&self, session_id: &str) {
        if let Some(sub) = self.session_subs.read().await.get(session_id) {
            *sub.created_at.write() = Instant::now();
        }
    }

    pub async fn unsubscribe_from_session(&self, session_id: &str) {
        if let Some(sub) = self.session_subs.write().await.remove(session_id) {
            sub.token.cancel();
            let _ = sub.task.await;
        }
    }

    pub async fn session_subscription_count(&self) -> usize {
        self.session_subs.read().await.len()
    }

    fn publish_json(&self, subject: String, msg: &AgentMessage) {
        let client = self.client.clone();
        match serde_json::to_vec(msg) {
            Ok(bytes) => {
                tokio::spawn(async move {
                    if let Err(e) = client.publish(subject, bytes.into()).await {
                        warn!(error = %e, "failed to publish to broker");
                    }
                });
            }
            Err(e) => warn!(error = %e, "failed to encode agent message"),
        }
    }

    /// Publishes an utterance to its target agent's request channel.
    pub fn publish_utterance(&self, msg: AgentMessage) {
        let agent_id = msg.agent_id.clone().unwrap_or_default();
        self.publish_json(agent_request_channel(&agent_id), &msg);
    }

    /// Publishes a response (delta or done) to its session's channel.
    pub fn publish_response(&self, msg: AgentMessage) {
        let session_id = msg.session_id.clone().unwrap_or_default();
        self.publish_json(session_response_channel(&session_id), &msg);
    }

    /// Publishes the same message to every agent in `agent_ids`.
    pub fn publish_to_agents(&self, agent_ids: &[String], msg: AgentMessage) {
        for agent_id in agent_ids {
            let mut per_agent = msg.clone();
            per_agent.agent_id = Some(agent_id.clone());
            self.publish_json(agent_request_channel(agent_id), &per_agent);
        }
    }

    /// Publishes a barge-in interrupt for `session_id` on `agent_id`'s
    /// request channel (§4.3 step 3).
    pub fn publish_cancellation(&self, agent_id: &str, session_id: &str, reason: &str) {
        let msg = AgentMessage::interrupt(reason)
            .with_agent_id(agent_id)
            .with_session_id(session_id);
        self.publish_json(agent_request_channel(agent_id), &msg);
    }

    async fn run_sweeper(&self, interval: Duration, ttl: Duration, token: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = ticker.tick() => {
                    self.sweep_expired(ttl).await;
                }
            }
        }
    }

    async fn sweep_expired(&self, ttl: Duration) {
        let expired: Vec<String> = {
            let subs = self.session_subs.read().await;
            subs.iter()
                .filter(|(_, sub)| sub.created_at.read().elapsed() > ttl)
                .map(|(id, _)| id.clone())
                .collect()
        };
        if expired.is_empty() {
            return;
        }
        for session_id in &expired {
            self.unsubscribe_from_session(session_id).await;
        }
        metrics::counter!("voice_agent_bridge_subscriptions_evicted_total")
            .increment(expired.len() as u64);
        info!(evicted = expired.len(), "swept expired session subscriptions");
    }

    /// Cancels every child subscriber and the sweeper, and waits for them
    /// to exit. Idempotent.
    pub async fn close(&self) {
        self.root.cancel();
        if let Some(handle) = self.sweeper.write().take() {
            let _ = handle.await;
        }
        let agent_subs: Vec<_> = self.agent_subs.write().await.drain().collect();
        for (_, sub) in agent_subs {
            let _ = sub.task.await;
        }
        let session_subs: Vec<_> = self.session_subs.write().await.drain().collect();
        for (_, sub) in session_subs {
            let _ = sub.task.await;
        }
    }
}

async fn connect_with_retry(url: &str, attempts: u32) -> Result<async_nats::Client> {
    let mut last_err = None;
    for attempt in 0..attempts {
        match async_nats::connect(url).await {
            Ok(client) => return Ok(client),
            Err(e) => {
                warn!(attempt, error = %e, "broker connect failed, retrying");
                last_err = Some(e.to_string());
                tokio::time::sleep(Duration::from_millis(200 * 2u64.pow(attempt))).await;
            }
        }
    }
    Err(BridgeError::TransientTransport(last_err.unwrap_or_default()))
}

async fn run_agent_subscriber(
    mut subscriber: async_nats::Subscriber,
    conn: std::sync::Arc<AgentConnection>,
    token: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = token.cancelled() => return,
            next = subscriber.next() => {
                let Some(message) = next else { return };
                match std::str::from_utf8(&message.payload) {
                    Ok(text) => conn.send(text.into()),
                    Err(_) => debug!(agent_id = %conn.agent_id, "dropped non-utf8 request payload"),
                }
            }
        }
    }
}

async fn run_session_subscriber(
    mut subscriber: async_nats::Subscriber,
    handler: Option<ResponseHandler>,
    token: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = token.cancelled() => return,
            next = subscriber.next() => {
                let Some(message) = next else { return };
                match serde_json::from_slice::<AgentMessage>(&message.payload) {
                    Ok(msg) => {
                        if let Some(handler) = &handler {
                            handler(msg);
                        }
                    }
                    Err(e) => debug!(error = %e, "dropped malformed response envelope"),
                }
            }
        }
    }
}

/// Constructs the `MessageKind::Utterance` envelope the session publishes
/// at dispatch time, given the fields §6.3 requires.
pub fn utterance_envelope(
    text: impl Into<String>,
    request_id: uuid::Uuid,
    session_id: impl Into<String>,
    agent_id: impl Into<String>,
    user_id: impl Into<String>,
) -> AgentMessage {
    AgentMessage::utterance(text)
        .with_request_id(request_id)
        .with_session_id(session_id)
        .with_agent_id(agent_id)
        .with_user_id(user_id)
}

/// True if `kind` is one of the streaming response types the session's
/// response ingress acts on.
pub fn is_response_kind(kind: &MessageKind) -> bool {
    matches!(
        kind,
        MessageKind::Response | MessageKind::ResponseDelta | MessageKind::ResponseDone
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utterance_envelope_carries_all_required_fields() {
        let id = uuid::Uuid::new_v4();
        let msg = utterance_envelope("hi", id, "sess-1", "agent-1", "user-1");
        assert_eq!(msg.request_id, Some(id));
        assert_eq!(msg.session_id.as_deref(), Some("sess-1"));
        assert_eq!(msg.agent_id.as_deref(), Some("agent-1"));
        assert_eq!(msg.user_id.as_deref(), Some("user-1"));
        assert_eq!(msg.kind, MessageKind::Utterance);
    }

    #[test]
    fn is_response_kind_matches_streaming_variants_only() {
        assert!(is_response_kind(&MessageKind::Response));
        assert!(is_response_kind(&MessageKind::ResponseDelta));
        assert!(is_response_kind(&MessageKind::ResponseDone));
        assert!(!is_response_kind(&MessageKind::Utterance));
        assert!(!is_response_kind(&MessageKind::Interrupt));
    }
}
