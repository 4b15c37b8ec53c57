//! Client configuration and file loading.

pub mod loader;
pub mod types;

pub use loader::ConfigLoader;
pub use types::{
    BrokerConfig, ConsumerSettings, ProducerSettings, ProvisionerSettings, TributaryConfig,
};
