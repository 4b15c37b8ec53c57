//! Broker backend selection.

use crate::TributaryError;
use crate::broker::memory::InMemoryBroker;
use crate::broker::r#trait::{AdminClient, ConsumerClient, ProducerClient};
#[cfg(feature = "kafka")]
use crate::config::BrokerConfig;
use std::sync::Arc;

/// Which broker the client handles talk to.
#[derive(Debug, Clone)]
pub enum BrokerBackend {
    /// Process-local broker. Every handle shares the same topics and groups.
    Memory(InMemoryBroker),
    /// Real cluster through librdkafka.
    #[cfg(feature = "kafka")]
    Kafka(BrokerConfig),
}

impl BrokerBackend {
    pub fn new_memory() -> Self {
        BrokerBackend::Memory(InMemoryBroker::new())
    }

    pub fn consumer(&self) -> Result<Box<dyn ConsumerClient>, TributaryError> {
        match self {
            BrokerBackend::Memory(broker) => Ok(Box::new(broker.consumer())),
            #[cfg(feature = "kafka")]
            BrokerBackend::Kafka(config) => {
                Ok(Box::new(crate::broker::kafka::KafkaConsumer::new(config.clone())))
            }
        }
    }

    pub fn admin(&self) -> Result<Arc<dyn AdminClient>, TributaryError> {
        match self {
            BrokerBackend::Memory(broker) => Ok(Arc::new(broker.admin())),
            #[cfg(feature = "kafka")]
            BrokerBackend::Kafka(config) => Ok(Arc::new(crate::broker::kafka::KafkaAdmin::new(config)?)),
        }
    }

    pub fn producer(&self) -> Result<Arc<dyn ProducerClient>, TributaryError> {
        match self {
            BrokerBackend::Memory(broker) => Ok(Arc::new(broker.producer())),
            #[cfg(feature = "kafka")]
            BrokerBackend::Kafka(config) => {
                Ok(Arc::new(crate::broker::kafka::KafkaProducer::new(config)?))
            }
        }
    }
}

impl Default for BrokerBackend {
    fn default() -> Self {
        Self::new_memory()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TopicSpec;
    use std::time::Duration;

    #[tokio::test]
    async fn test_memory_handles_share_state() {
        let backend = BrokerBackend::new_memory();
        let admin = backend.admin().unwrap();

        admin
            .create_topics(&[TopicSpec::new("shared", 2, 1).unwrap()], Duration::from_secs(1))
            .await
            .unwrap();

        let metadata = backend
            .admin()
            .unwrap()
            .fetch_metadata(Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(metadata.topic("shared").unwrap().partitions, 2);
    }

    #[test]
    fn test_default_backend() {
        assert!(matches!(BrokerBackend::default(), BrokerBackend::Memory(_)));
    }
}
