//! Typed configuration for the gateway's core subsystems.
//!
//! This is scoped to the tunables the core crates actually read (queue
//! capacity, ICE/TURN, bridge limits, router weights, barge-in policy,
//! agent transport timeouts). Wiring a file/environment/CLI bootstrap on
//! top of [`Settings`] is left to the embedding binary; what this crate
//! guarantees is that every such tunable has a serde-friendly type with a
//! sane [`Default`] and a `validate()`.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error(transparent)]
    Load(#[from] config::ConfigError),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Tunables for the Paced Output Queue (§4.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Bounded queue capacity. Default 4096 per spec.
    pub capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { capacity: 4096 }
    }
}

impl QueueConfig {
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(ConfigError::Invalid("queue.capacity must be > 0".into()));
        }
        Ok(())
    }
}

/// One ICE/STUN/TURN server entry handed to the peer-connection factory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IceServerConfig {
    pub urls: Vec<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub credential: Option<String>,
}

/// Shared-secret TURN credential issuance (§4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TurnCredentialConfig {
    /// HMAC-SHA1 shared secret. `None` disables ephemeral credential
    /// issuance entirely (static `IceServerConfig` entries are used as-is).
    pub shared_secret: Option<String>,
    /// Credential lifetime in seconds.
    pub ttl_secs: u64,
}

impl Default for TurnCredentialConfig {
    fn default() -> Self {
        Self {
            shared_secret: None,
            ttl_secs: 3600,
        }
    }
}

impl TurnCredentialConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.ttl_secs == 0 {
            return Err(ConfigError::Invalid("turn.ttl_secs must be > 0".into()));
        }
        Ok(())
    }
}

/// ICE configuration owned by the Voice Manager (§4.7).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IceConfig {
    pub servers: Vec<IceServerConfig>,
    pub turn: TurnCredentialConfig,
}

impl IceConfig {
    pub fn validate(&self) -> Result<()> {
        self.turn.validate()
    }
}

/// Agent Bridge limits (§4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Broker connection string (e.g. a NATS server URL).
    pub broker_url: String,
    /// Maximum concurrently open session response subscriptions.
    pub max_session_subscriptions: usize,
    /// Subscription TTL, refreshed by the owning session.
    pub session_ttl_secs: u64,
    /// TTL sweeper interval.
    pub sweep_interval_secs: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            broker_url: "nats://127.0.0.1:4222".to_string(),
            max_session_subscriptions: 10_000,
            session_ttl_secs: 30 * 60,
            sweep_interval_secs: 5 * 60,
        }
    }
}

impl BridgeConfig {
    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.broker_url.trim().is_empty() {
            return Err(ConfigError::Invalid("bridge.broker_url must not be empty".into()));
        }
        if self.max_session_subscriptions == 0 {
            return Err(ConfigError::Invalid(
                "bridge.max_session_subscriptions must be > 0".into(),
            ));
        }
        if self.session_ttl_secs == 0 || self.sweep_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "bridge.session_ttl_secs and sweep_interval_secs must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// Smart Router posting weights (§4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterWeights {
    pub keyword: u32,
    pub capability: u32,
    pub description: u32,
    pub example: u32,
}

impl Default for RouterWeights {
    fn default() -> Self {
        Self {
            keyword: 3,
            capability: 2,
            description: 1,
            example: 1,
        }
    }
}

impl RouterWeights {
    pub fn validate(&self) -> Result<()> {
        if self.keyword == 0 && self.capability == 0 && self.description == 0 && self.example == 0
        {
            return Err(ConfigError::Invalid(
                "router weights must not all be zero".into(),
            ));
        }
        Ok(())
    }
}

/// Barge-in policy, configurable per session (§4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BargeInConfig {
    pub allow_while_speaking: bool,
    pub debounce_min_ms: u64,
    pub min_silence_for_end_ms: u64,
}

impl Default for BargeInConfig {
    fn default() -> Self {
        Self {
            allow_while_speaking: true,
            debounce_min_ms: 50,
            min_silence_for_end_ms: 500,
        }
    }
}

impl BargeInConfig {
    pub fn debounce_min(&self) -> Duration {
        Duration::from_millis(self.debounce_min_ms)
    }

    pub fn min_silence_for_end(&self) -> Duration {
        Duration::from_millis(self.min_silence_for_end_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.debounce_min_ms < 50 {
            return Err(ConfigError::Invalid(
                "barge_in.debounce_min_ms must be >= 50ms".into(),
            ));
        }
        Ok(())
    }
}

/// Agent connection send-queue depth (§6.4), consumed by
/// `voice_agent_registry::AgentConnection::new`. The wire-level ping/pong
/// cadence, read deadline and max frame size for the two agent transport
/// modes are owned by whatever already-authenticated connection
/// terminator hands the registry its `AgentConnection` handle (§1, §6.4
/// Non-goal) and have no counterpart here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentTransportConfig {
    pub send_buffer: usize,
}

impl Default for AgentTransportConfig {
    fn default() -> Self {
        Self { send_buffer: 128 }
    }
}

impl AgentTransportConfig {
    pub fn validate(&self) -> Result<()> {
        if self.send_buffer == 0 {
            return Err(ConfigError::Invalid(
                "agent_transport.send_buffer must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// Aggregate settings for the gateway's core subsystems. An embedding
/// binary loads this the way the teacher's own settings module does
/// (`config::Config::builder()` layering a file over
/// `VOICE_GATEWAY__`-prefixed environment variables); that loader is out
/// of scope here, but [`Settings::from_config`] accepts anything that
/// produced a compatible [`config::Config`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub queue: QueueConfig,
    pub ice: IceConfig,
    pub bridge: BridgeConfig,
    pub router_weights: RouterWeights,
    pub barge_in: BargeInConfig,
    pub agent_transport: AgentTransportConfig,
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        self.queue.validate()?;
        self.ice.validate()?;
        self.bridge.validate()?;
        self.router_weights.validate()?;
        self.barge_in.validate()?;
        self.agent_transport.validate()?;
        Ok(())
    }

    /// Builds a `Settings` from a [`config::Config`], validating the
    /// result. Embedding binaries assemble the `Config` however they like
    /// (file + `Environment::with_prefix("VOICE_GATEWAY").separator("__")`
    /// is the teacher's convention); this crate does not open files or
    /// read the environment itself.
    pub fn from_config(raw: config::Config) -> Result<Self> {
        let settings: Settings = raw.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(Settings::default().validate().is_ok());
    }

    #[test]
    fn zero_capacity_queue_is_invalid() {
        let mut s = Settings::default();
        s.queue.capacity = 0;
        assert!(s.validate().is_err());
    }

    #[test]
    fn debounce_below_50ms_is_invalid() {
        let mut s = Settings::default();
        s.barge_in.debounce_min_ms = 10;
        assert!(s.validate().is_err());
    }

    #[test]
    fn zero_send_buffer_is_invalid() {
        let mut s = Settings::default();
        s.agent_transport.send_buffer = 0;
        assert!(s.validate().is_err());
    }

    #[test]
    fn all_zero_router_weights_is_invalid() {
        let mut s = Settings::default();
        s.router_weights = RouterWeights {
            keyword: 0,
            capability: 0,
            description: 0,
            example: 0,
        };
        assert!(s.validate().is_err());
    }
}
