//! Tributary: a small pub/sub client layer.
//!
//! [`ConsumeLoop`] drains a topic subscription into a [`MessageHandler`] and
//! idles when nothing is left. [`Producer`] writes schema-validated records
//! after [`TopicProvisioner`] has made sure the topic exists. Both talk to a
//! broker only through the traits in [`broker`].

pub mod broker;
pub mod config;
pub mod consumer;
pub mod error;
pub mod producer;
pub mod schema;
pub mod telemetry;
pub mod types;

pub use error::{BrokerError, BrokerErrorCode, TributaryError};

// Re-export commonly used types for ergonomics
pub use broker::{BrokerBackend, InMemoryBroker};
pub use config::{
    BrokerConfig, ConfigLoader, ConsumerSettings, ProducerSettings, ProvisionerSettings,
    TributaryConfig,
};
pub use consumer::{
    ConsumeLoop, LoopPhase, MessageHandler, PollOutcome, Shutdown, ShutdownTrigger,
    shutdown_channel,
};
pub use producer::{Producer, ProducerSchemas, TopicProvisioner, TopicRegistry};
pub use types::*;

// Re-export logging macros for consistent usage across the crate
pub use log::{debug, error, info, trace, warn};
