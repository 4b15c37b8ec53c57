//! Integration tests for shutdown and close.

use crate::test_utilities::{RecordCollector, immediate_settings, seed_topic};
use std::time::Duration;
use tributary::{
    ConsumeLoop, InMemoryBroker, InboundRecord, LoopPhase, PartitionId, TributaryError,
    shutdown_channel,
};

#[tokio::test]
async fn test_shutdown_interrupts_idle_sleep() {
    let broker = InMemoryBroker::new();
    seed_topic(&broker, "stations", 1, 2);

    let consume = ConsumeLoop::new(
        Box::new(broker.consumer()),
        &immediate_settings("stations", true).with_idle_sleep(Duration::from_secs(3600)),
        "0",
        RecordCollector::new().handler(),
    )
    .unwrap();
    let mut monitor = consume.monitor();
    let (trigger, shutdown) = shutdown_channel();
    let handle = consume.spawn(shutdown);

    assert!(monitor.wait_for_phase(LoopPhase::Idle).await);
    trigger.trigger();

    let stats = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("loop should stop well before the idle sleep ends")
        .unwrap()
        .unwrap();
    assert_eq!(stats.records_handled, 2);
    assert_eq!(monitor.phase(), LoopPhase::Stopped);
    assert_eq!(broker.group_members("0"), 0);
}

#[tokio::test]
async fn test_shutdown_stops_a_topic_that_never_runs_dry() {
    let broker = InMemoryBroker::new();
    seed_topic(&broker, "stations", 1, 1);

    // Every handled record appends another, so a drain never comes back empty.
    let feeder = broker.clone();
    let consume = ConsumeLoop::new(
        Box::new(broker.consumer()),
        &immediate_settings("stations", true).with_poll_timeout(Duration::from_millis(100)),
        "0",
        move |_record: InboundRecord| -> Result<(), TributaryError> {
            feeder
                .append("stations", Some(PartitionId(0)), None, Some(b"more".to_vec()))
                .map(|_| ())
                .map_err(TributaryError::Broker)
        },
    )
    .unwrap();
    let mut monitor = consume.monitor();
    let (trigger, shutdown) = shutdown_channel();
    let handle = consume.spawn(shutdown);

    assert!(monitor.wait_for_phase(LoopPhase::Draining).await);
    tokio::time::sleep(Duration::from_millis(200)).await;
    trigger.trigger();

    let stats = tokio::time::timeout(Duration::from_secs(3), handle)
        .await
        .expect("loop should stop while records keep arriving")
        .unwrap()
        .unwrap();
    assert!(stats.records_handled > 1);
    assert_eq!(stats.idle_cycles, 0);
    assert_eq!(monitor.phase(), LoopPhase::Stopped);
}

#[tokio::test]
async fn test_dropping_the_trigger_stops_the_loop() {
    let broker = InMemoryBroker::new();
    let consume = ConsumeLoop::new(
        Box::new(broker.consumer()),
        &immediate_settings("stations", true),
        "0",
        RecordCollector::new().handler(),
    )
    .unwrap();
    let (trigger, shutdown) = shutdown_channel();
    let handle = consume.spawn(shutdown);
    drop(trigger);

    let stats = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(stats.records_handled, 0);
}

#[tokio::test]
async fn test_shutdown_before_run_skips_polling() {
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

    let (trigger, shutdown) = shutdown_channel();
    trigger.trigger();
    consume.run(shutdown).await.unwrap();

    assert_eq!(consume.stats().polls, 0);
    assert_eq!(collector.len(), 0);
}

#[tokio::test]
async fn test_poll_after_close_fails_fast() {
    let broker = InMemoryBroker::new();
    seed_topic(&broker, "stations", 1, 1);
    let mut consume = ConsumeLoop::new(
        Box::new(broker.consumer()),
        &immediate_settings("stations", true),
        "0",
        RecordCollector::new().handler(),
    )
    .unwrap();
    consume.close().unwrap();

    assert!(matches!(
        consume.poll_once().await,
        Err(TributaryError::Closed { component: "ConsumeLoop" })
    ));
    assert!(matches!(
        consume.drain().await,
        Err(TributaryError::Closed { .. })
    ));

    let (_trigger, shutdown) = shutdown_channel();
    assert!(consume.run(shutdown).await.is_err());
    assert_eq!(consume.stats().polls, 0);
}
