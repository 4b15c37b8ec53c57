//! Broker client traits and their implementations.

pub mod backend;
#[cfg(feature = "kafka")]
pub mod kafka;
pub mod memory;
pub mod r#trait;

// Re-exports for ergonomics
pub use backend::BrokerBackend;
pub use memory::{InMemoryAdmin, InMemoryBroker, InMemoryConsumer, InMemoryProducer};
pub use r#trait::{AdminClient, ConsumerClient, ProducerClient, RebalanceListener};
