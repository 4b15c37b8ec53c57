//! Integration tests for offset policy and partition assignment.

use crate::test_utilities::{RecordCollector, immediate_settings, seed_topic};
use tributary::consumer::AssignmentState;
use tributary::{ConsumeLoop, InMemoryBroker, PartitionId};

/// Consume everything once under group "g" so every partition has a committed offset.
async fn commit_everything(broker: &InMemoryBroker, topic: &str) {
    let mut consume = ConsumeLoop::new(
        Box::new(broker.consumer()),
        &immediate_settings(topic, true),
        "g",
        RecordCollector::new().handler(),
    )
    .unwrap();
    consume.drain().await.unwrap();
    consume.close().unwrap();
}

#[tokio::test]
async fn test_earliest_ignores_committed_offsets() {
    let broker = InMemoryBroker::new();
    seed_topic(&broker, "arrivals", 2, 4);
    commit_everything(&broker, "arrivals").await;
    assert_eq!(broker.committed_offset("g", "arrivals", PartitionId(1)), Some(4));

    let collector = RecordCollector::new();
    let mut consume = ConsumeLoop::new(
        Box::new(broker.consumer()),
        &immediate_settings("arrivals", true),
        "g",
        collector.handler(),
    )
    .unwrap();

    assert_eq!(consume.drain().await.unwrap(), 8);
    assert_eq!(collector.offsets("arrivals", 0), vec![0, 1, 2, 3]);
}

#[tokio::test]
async fn test_latest_keeps_broker_default_offsets() {
    let broker = InMemoryBroker::new();
    seed_topic(&broker, "arrivals", 2, 4);
    commit_everything(&broker, "arrivals").await;
    broker
        .append("arrivals", Some(PartitionId(0)), None, Some(b"0-4".to_vec()))
        .unwrap();

    let collector = RecordCollector::new();
    let mut consume = ConsumeLoop::new(
        Box::new(broker.consumer()),
        &immediate_settings("arrivals", false),
        "g",
        collector.handler(),
    )
    .unwrap();

    // Resumes from the committed offsets: only the new record is delivered.
    assert_eq!(consume.drain().await.unwrap(), 1);
    assert_eq!(collector.offsets("arrivals", 0), vec![4]);
}

#[tokio::test]
async fn test_latest_without_commits_starts_at_the_end() {
    let broker = InMemoryBroker::new();
    seed_topic(&broker, "arrivals", 1, 5);

    let collector = RecordCollector::new();
    let mut consume = ConsumeLoop::new(
        Box::new(broker.consumer()),
        &immediate_settings("arrivals", false),
        "fresh",
        collector.handler(),
    )
    .unwrap();

    assert_eq!(consume.drain().await.unwrap(), 0);
    assert_eq!(consume.assignment_state(), AssignmentState::Assigned);
    assert_eq!(collector.len(), 0);
}

#[tokio::test]
async fn test_subscribe_does_not_wait_for_assignment() {
    let broker = InMemoryBroker::new();
    let consume = ConsumeLoop::new(
        Box::new(broker.consumer()),
        &immediate_settings("not-created-yet", true),
        "0",
        RecordCollector::new().handler(),
    )
    .unwrap();

    assert_eq!(consume.assignment_state(), AssignmentState::Subscribed);
    assert_eq!(broker.group_members("0"), 1);
}

#[tokio::test]
async fn test_rebalance_reapplies_the_rewrite() {
    let broker = InMemoryBroker::new();
    seed_topic(&broker, "arrivals", 4, 2);

    let first = RecordCollector::new();
    let mut first_loop = ConsumeLoop::new(
        Box::new(broker.consumer()),
        &immediate_settings("arrivals", true),
        "g",
        first.handler(),
    )
    .unwrap();
    assert_eq!(first_loop.drain().await.unwrap(), 8);

    let second = RecordCollector::new();
    let mut second_loop = ConsumeLoop::new(
        Box::new(broker.consumer()),
        &immediate_settings("arrivals", true),
        "g",
        second.handler(),
    )
    .unwrap();

    // The newcomer owns half the partitions and rewinds them to the start.
    assert_eq!(second_loop.drain().await.unwrap(), 4);
    assert_eq!(first_loop.drain().await.unwrap(), 4);
    assert_eq!(first.len() + second.len(), 16);
}

#[tokio::test]
async fn test_pattern_subscription_spans_topics() {
    let broker = InMemoryBroker::new();
    seed_topic(&broker, "org.chicago.transit.arrivals.clark", 1, 2);
    seed_topic(&broker, "org.chicago.transit.arrivals.austin", 1, 3);
    seed_topic(&broker, "org.chicago.weather", 1, 5);

    let collector = RecordCollector::new();
    let mut consume = ConsumeLoop::new(
        Box::new(broker.consumer()),
        &immediate_settings("^org\\.chicago\\.transit\\.arrivals\\..*", true),
        "0",
        collector.handler(),
    )
    .unwrap();

    assert_eq!(consume.drain().await.unwrap(), 5);
    assert!(collector.records().iter().all(|r| r.topic.contains(".arrivals.")));
}
