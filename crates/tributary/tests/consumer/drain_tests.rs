//! Integration tests for drain-then-idle behaviour.

use crate::test_utilities::{RecordCollector, immediate_settings, seed_topic};
use std::sync::Arc;
use std::time::Duration;
use tributary::schema::{InMemorySchemaRegistry, RecordCodec};
use tributary::{
    BrokerErrorCode, ConsumeLoop, InMemoryBroker, LoopPhase, PartitionId, TributaryError,
    shutdown_channel,
};

#[tokio::test]
async fn test_drain_polls_once_past_the_last_record() {
    let broker = InMemoryBroker::new();
    seed_topic(&broker, "stations", 1, 7);
    let collector = RecordCollector::new();

    let mut consume = ConsumeLoop::new(
        Box::new(broker.consumer()),
        &immediate_settings("stations", true),
        "0",
        collector.handler(),
    )
    .unwrap();

    assert_eq!(consume.drain().await.unwrap(), 7);
    assert_eq!(consume.stats().polls, 8);
    assert_eq!(collector.len(), 7);

    // An already-drained topic costs exactly one poll.
    assert_eq!(consume.drain().await.unwrap(), 0);
    assert_eq!(consume.stats().polls, 9);
}

#[test_log::test(tokio::test)]
async fn test_three_partitions_drain_in_offset_order_then_idle() {
    let broker = InMemoryBroker::new();
    seed_topic(&broker, "stations", 3, 10);
    let collector = RecordCollector::new();

    let consume = ConsumeLoop::new(
        Box::new(broker.consumer()),
        &immediate_settings("stations", true).with_idle_sleep(Duration::from_secs(30)),
        "0",
        collector.handler(),
    )
    .unwrap();
    let mut monitor = consume.monitor();
    let (trigger, shutdown) = shutdown_channel();
    let handle = consume.spawn(shutdown);

    assert!(monitor.wait_for_phase(LoopPhase::Idle).await);
    let stats = monitor.stats();
    assert_eq!(stats.records_handled, 30);
    assert_eq!(stats.polls, 31);
    assert_eq!(stats.idle_cycles, 1);
    assert_eq!(collector.len(), 30);
    for partition in 0..3 {
        assert_eq!(
            collector.offsets("stations", partition),
            (0..10).collect::<Vec<i64>>()
        );
    }

    trigger.trigger();
    let final_stats = handle.await.unwrap().unwrap();
    assert_eq!(final_stats.records_handled, 30);
}

#[tokio::test]
async fn test_broker_errors_never_reach_the_handler() {
    let broker = InMemoryBroker::new();
    seed_topic(&broker, "stations", 1, 3);
    let collector = RecordCollector::new();

    let mut consume = ConsumeLoop::new(
        Box::new(broker.consumer()),
        &immediate_settings("stations", true),
        "0",
        collector.handler(),
    )
    .unwrap();
    // First poll performs the assignment so the injected error has an owner.
    assert_eq!(consume.drain().await.unwrap(), 3);

    broker.inject_poll_error("stations", PartitionId(0), BrokerErrorCode::LeaderNotAvailable);
    broker.inject_poll_error("stations", PartitionId(0), BrokerErrorCode::TopicAuthorizationFailed);
    broker
        .append("stations", Some(PartitionId(0)), None, Some(b"late".to_vec()))
        .unwrap();

    assert_eq!(consume.drain().await.unwrap(), 0);
    assert_eq!(consume.drain().await.unwrap(), 0);
    assert_eq!(consume.drain().await.unwrap(), 1);

    let stats = consume.stats();
    assert_eq!(stats.transient_errors, 2);
    assert_eq!(collector.len(), 4);
    assert!(collector.records().iter().all(|r| r.error().is_none()));
}

#[tokio::test]
async fn test_decode_failure_stops_the_loop() {
    let broker = InMemoryBroker::new();
    seed_topic(&broker, "stations", 1, 2);
    let collector = RecordCollector::new();
    let codec = Arc::new(RecordCodec::new(Arc::new(InMemorySchemaRegistry::new())));

    let consume = ConsumeLoop::new(
        Box::new(broker.consumer()),
        &immediate_settings("stations", true),
        "0",
        collector.handler(),
    )
    .unwrap()
    .with_decoder(codec);
    let (_trigger, shutdown) = shutdown_channel();

    let err = consume.spawn(shutdown).await.unwrap().unwrap_err();
    assert!(matches!(
        err,
        TributaryError::Decode { ref topic, partition: 0, offset: 0, .. } if topic == "stations"
    ));
    assert_eq!(collector.len(), 0);
    assert_eq!(broker.group_members("0"), 0);
}

#[tokio::test]
async fn test_handler_sees_records_produced_while_idle() {
    let broker = InMemoryBroker::new();
    seed_topic(&broker, "stations", 2, 1);
    let collector = RecordCollector::new();

    let consume = ConsumeLoop::new(
        Box::new(broker.consumer()),
        &immediate_settings("stations", true).with_idle_sleep(Duration::from_millis(20)),
        "0",
        collector.handler(),
    )
    .unwrap();
    let mut monitor = consume.monitor();
    let (trigger, shutdown) = shutdown_channel();
    let handle = consume.spawn(shutdown);

    assert!(monitor.wait_for_phase(LoopPhase::Idle).await);
    broker
        .append("stations", Some(PartitionId(1)), None, Some(b"1-1".to_vec()))
        .unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        while collector.len() < 3 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    trigger.trigger();
    let stats = handle.await.unwrap().unwrap();
    assert_eq!(stats.records_handled, 3);
    assert!(stats.idle_cycles >= 2);
    assert_eq!(collector.offsets("stations", 1), vec![0, 1]);
}
