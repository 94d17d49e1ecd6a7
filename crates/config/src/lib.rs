//! Typed configuration structs for the voice agent gateway's core
//! subsystems.
//!
//! Every tunable named in the specification (queue capacity, ICE/TURN,
//! bridge limits, router weights, barge-in policy, agent transport
//! timeouts) gets a serde-friendly type here with a sane [`Default`] and a
//! `validate()`. Loading a [`config::Config`] from a file or environment is
//! left to the embedding binary; see [`Settings::from_config`].

pub mod settings;

pub use settings::{
    AgentTransportConfig, BargeInConfig, BridgeConfig, ConfigError, IceConfig, IceServerConfig,
    QueueConfig, Result, RouterWeights, Settings, TurnCredentialConfig,
};
