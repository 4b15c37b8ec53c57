//! Integration tests for topic provisioning across producers.

use crate::test_utilities::RacingAdmin;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::Barrier;
use tributary::producer::ProvisionOutcome;
use tributary::schema::{InMemorySchemaRegistry, Schema};
use tributary::{
    BrokerError, BrokerErrorCode, InMemoryBroker, Producer, ProducerSchemas, ProducerSettings,
    ProvisionerSettings, TopicProvisioner, TopicRegistry, TopicSpec, TributaryError,
};

#[tokio::test]
async fn test_second_ensure_skips_the_broker() {
    let broker = InMemoryBroker::new();
    let provisioner = TopicProvisioner::new(
        Arc::new(broker.admin()),
        TopicRegistry::new(),
        ProvisionerSettings::default(),
    );
    let spec = TopicSpec::new("org.chicago.transit.stations.transformed", 1, 1).unwrap();

    assert_eq!(provisioner.ensure(&spec).await.unwrap(), ProvisionOutcome::Created);
    assert_eq!(
        provisioner.ensure(&spec).await.unwrap(),
        ProvisionOutcome::AlreadyRegistered
    );
    assert_eq!(broker.metadata_requests(), 1);
    assert_eq!(broker.create_requests(), 1);
}

#[tokio::test]
async fn test_registry_is_shared_between_provisioners() {
    let broker = InMemoryBroker::new();
    let registry = TopicRegistry::new();
    let spec = TopicSpec::new("T", 1, 1).unwrap();

    for _ in 0..3 {
        let provisioner = TopicProvisioner::new(
            Arc::new(broker.admin()),
            registry.clone(),
            ProvisionerSettings::default(),
        );
        provisioner.ensure(&spec).await.unwrap();
    }
    assert_eq!(broker.metadata_requests(), 1);

    // A separate registry knows nothing and goes back to the broker.
    let isolated = TopicProvisioner::new(
        Arc::new(broker.admin()),
        TopicRegistry::new(),
        ProvisionerSettings::default(),
    );
    assert_eq!(isolated.ensure(&spec).await.unwrap(), ProvisionOutcome::Existing);
    assert_eq!(broker.metadata_requests(), 2);
}

#[tokio::test]
async fn test_concurrent_creation_race_is_tolerated() {
    let broker = InMemoryBroker::new();
    let registry = TopicRegistry::new();
    let barrier = Arc::new(Barrier::new(2));
    let first = TopicProvisioner::new(
        Arc::new(RacingAdmin::new(&broker, barrier.clone())),
        registry.clone(),
        ProvisionerSettings::default(),
    );
    let second = TopicProvisioner::new(
        Arc::new(RacingAdmin::new(&broker, barrier)),
        registry.clone(),
        ProvisionerSettings::default(),
    );
    let spec = TopicSpec::new("T", 3, 1).unwrap();

    let (a, b) = tokio::join!(first.ensure(&spec), second.ensure(&spec));
    let mut outcomes = vec![a.unwrap(), b.unwrap()];
    outcomes.sort_by_key(|o| *o == ProvisionOutcome::CreatedConcurrently);

    assert_eq!(
        outcomes,
        vec![ProvisionOutcome::Created, ProvisionOutcome::CreatedConcurrently]
    );
    assert_eq!(broker.create_requests(), 2);
    assert_eq!(registry.topics(), vec!["T"]);
}

#[tokio::test]
async fn test_concurrent_producers_create_topic_once() {
    let broker = InMemoryBroker::new();
    let registry = TopicRegistry::new();
    let schemas = Arc::new(InMemorySchemaRegistry::new());
    let barrier = Arc::new(Barrier::new(2));
    let settings = ProducerSettings::new("T").with_layout(3, 1);

    let provisioner_a = TopicProvisioner::new(
        Arc::new(RacingAdmin::new(&broker, barrier.clone())),
        registry.clone(),
        ProvisionerSettings::default(),
    );
    let provisioner_b = TopicProvisioner::new(
        Arc::new(RacingAdmin::new(&broker, barrier)),
        registry.clone(),
        ProvisionerSettings::default(),
    );

    let (a, b) = tokio::join!(
        Producer::new(
            &settings,
            ProducerSchemas::key_only(Schema::string()),
            &provisioner_a,
            Arc::new(broker.producer()),
            schemas.clone(),
        ),
        Producer::new(
            &settings,
            ProducerSchemas::key_only(Schema::string()),
            &provisioner_b,
            Arc::new(broker.producer()),
            schemas.clone(),
        ),
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(broker.topic_metadata("T").unwrap().partitions, 3);
    assert_eq!(registry.topics(), vec!["T"]);
    assert_eq!(schemas.versions("T-key").len(), 1);

    a.send(&json!("a"), None).await.unwrap();
    b.send(&json!("b"), None).await.unwrap();
}

#[tokio::test]
async fn test_failed_provisioning_blocks_producer_and_allows_retry() {
    let broker = InMemoryBroker::new();
    let registry = TopicRegistry::new();
    let schemas = Arc::new(InMemorySchemaRegistry::new());
    let provisioner = TopicProvisioner::new(
        Arc::new(broker.admin()),
        registry.clone(),
        ProvisionerSettings::default(),
    );
    let settings = ProducerSettings::new("T").with_layout(3, 1);
    broker.fail_next_create(BrokerError::new(
        BrokerErrorCode::BrokerNotAvailable,
        "connection refused",
    ));

    let result = Producer::new(
        &settings,
        ProducerSchemas::key_only(Schema::string()),
        &provisioner,
        Arc::new(broker.producer()),
        schemas.clone(),
    )
    .await;
    assert!(matches!(
        result,
        Err(TributaryError::Provisioning { ref topic, .. }) if topic == "T"
    ));
    assert!(registry.is_empty());
    assert!(schemas.versions("T-key").is_empty());

    let producer = Producer::new(
        &settings,
        ProducerSchemas::key_only(Schema::string()),
        &provisioner,
        Arc::new(broker.producer()),
        schemas,
    )
    .await
    .unwrap();
    assert_eq!(producer.topic(), "T");
    assert_eq!(broker.metadata_requests(), 2);
    assert!(registry.contains("T"));
}
