//! Integration tests wiring a producer into a consume loop.

use crate::test_utilities::RecordCollector;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tributary::schema::{InMemorySchemaRegistry, RecordCodec, Schema};
use tributary::{
    ConsumeLoop, ConsumerSettings, InMemoryBroker, Payload, Producer, ProducerSchemas,
    ProducerSettings, ProvisionerSettings, TopicProvisioner, TopicRegistry,
};

fn arrival_schema() -> Schema {
    Schema::parse(
        r#"{
            "namespace": "org.chicago.transit",
            "type": "record",
            "name": "arrival",
            "fields": [
                {"name": "station_id", "type": "int"},
                {"name": "train_id", "type": "string"},
                {"name": "line", "type": {"type": "enum", "name": "line", "symbols": ["red", "blue", "green"]}}
            ]
        }"#,
    )
    .unwrap()
}

#[test_log::test(tokio::test)]
async fn test_produced_records_arrive_decoded() {
    let broker = InMemoryBroker::new();
    let schemas = Arc::new(InMemorySchemaRegistry::new());
    let provisioner = TopicProvisioner::new(
        Arc::new(broker.admin()),
        TopicRegistry::new(),
        ProvisionerSettings::default(),
    );

    let producer = Producer::new(
        &ProducerSettings::new("org.chicago.transit.arrivals").with_layout(2, 1),
        ProducerSchemas::new(Schema::string(), arrival_schema()),
        &provisioner,
        Arc::new(broker.producer()),
        schemas.clone(),
    )
    .await
    .unwrap();

    let arrivals = [
        json!({"station_id": 40380, "train_id": "BL001", "line": "blue"}),
        json!({"station_id": 40370, "train_id": "RL002", "line": "red"}),
        json!({"station_id": 40380, "train_id": "BL003", "line": "blue"}),
    ];
    for arrival in &arrivals {
        let key = json!(arrival["station_id"].to_string());
        producer.send(&key, Some(arrival)).await.unwrap();
    }
    producer.close().await.unwrap();

    let collector = RecordCollector::new();
    let mut consume = ConsumeLoop::new(
        Box::new(broker.consumer()),
        &ConsumerSettings::new("org.chicago.transit.arrivals")
            .with_offset_earliest(true)
            .with_poll_timeout(Duration::ZERO),
        "0",
        collector.handler(),
    )
    .unwrap()
    .with_decoder(Arc::new(RecordCodec::new(schemas)));

    assert_eq!(consume.drain().await.unwrap(), 3);

    let mut received: Vec<_> = collector
        .records()
        .into_iter()
        .map(|record| {
            let station_id = record.value.as_decoded().unwrap()["station_id"].to_string();
            assert_eq!(record.key, Payload::Decoded(json!(station_id)));
            record.value.into_decoded().unwrap()
        })
        .collect();
    let mut expected = arrivals.to_vec();
    received.sort_by_key(|v| v["train_id"].as_str().map(str::to_string));
    expected.sort_by_key(|v| v["train_id"].as_str().map(str::to_string));
    assert_eq!(received, expected);
}
