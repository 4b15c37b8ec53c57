//! The drain-then-idle consume loop.
//!
//! Every outer iteration polls until a poll comes back empty, then sleeps for
//! the idle interval. The sleep is the only point where the task yields to a
//! shutdown request; polls themselves are bounded by the poll timeout.

use super::assignment::{AssignmentState, AssignmentTracker};
use super::handler::MessageHandler;
use super::shutdown::Shutdown;
use crate::TributaryError;
use crate::broker::ConsumerClient;
use crate::config::ConsumerSettings;
use crate::error::BrokerErrorCode;
use crate::schema::{RecordCodec, RecordOrigin};
use crate::types::{InboundRecord, Payload, Subscription};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Result of a single poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// A record was handed to the handler.
    Progress,
    /// Nothing usable came back: no record, or a record carrying a broker error.
    Drained,
}

impl PollOutcome {
    pub fn count(self) -> usize {
        match self {
            PollOutcome::Progress => 1,
            PollOutcome::Drained => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopPhase {
    /// Constructed, `run` not entered yet.
    Ready,
    Draining,
    Idle,
    Stopped,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub polls: u64,
    pub records_handled: u64,
    pub transient_errors: u64,
    pub idle_cycles: u64,
}

#[derive(Debug, Default)]
struct Counters {
    polls: AtomicU64,
    records_handled: AtomicU64,
    transient_errors: AtomicU64,
    idle_cycles: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> LoopStats {
        LoopStats {
            polls: self.polls.load(Ordering::Relaxed),
            records_handled: self.records_handled.load(Ordering::Relaxed),
            transient_errors: self.transient_errors.load(Ordering::Relaxed),
            idle_cycles: self.idle_cycles.load(Ordering::Relaxed),
        }
    }
}

/// Read-only view of a loop that may be running on another task.
#[derive(Debug, Clone)]
pub struct LoopMonitor {
    phase: watch::Receiver<LoopPhase>,
    counters: Arc<Counters>,
    tracker: Arc<AssignmentTracker>,
}

impl LoopMonitor {
    pub fn phase(&self) -> LoopPhase {
        *self.phase.borrow()
    }

    pub fn stats(&self) -> LoopStats {
        self.counters.snapshot()
    }

    pub fn assignment_state(&self) -> AssignmentState {
        self.tracker.state()
    }

    /// Wait until the loop enters `phase`. Returns false if the loop went away first.
    pub async fn wait_for_phase(&mut self, phase: LoopPhase) -> bool {
        self.phase.wait_for(|current| *current == phase).await.is_ok()
    }
}

pub struct ConsumeLoop {
    client: Box<dyn ConsumerClient>,
    handler: Box<dyn MessageHandler>,
    decoder: Option<Arc<RecordCodec>>,
    subscription: Subscription,
    tracker: Arc<AssignmentTracker>,
    poll_timeout: Duration,
    idle_sleep: Duration,
    counters: Arc<Counters>,
    phase: watch::Sender<LoopPhase>,
    closed: bool,
}

impl ConsumeLoop {
    /// Subscribe `client` and register the assignment hook. Returns without
    /// waiting for partitions; they arrive during the first polls.
    pub fn new(
        mut client: Box<dyn ConsumerClient>,
        settings: &ConsumerSettings,
        group_id: &str,
        handler: impl MessageHandler + 'static,
    ) -> Result<Self, TributaryError> {
        settings.validate()?;
        let subscription =
            Subscription::new(&settings.topic_pattern, settings.offset_policy(), group_id)?;
        let tracker = Arc::new(AssignmentTracker::new(&subscription));
        client.subscribe(&subscription, tracker.clone())?;

        let (phase, _) = watch::channel(LoopPhase::Ready);
        Ok(Self {
            client,
            handler: Box::new(handler),
            decoder: None,
            subscription,
            tracker,
            poll_timeout: settings.poll_timeout(),
            idle_sleep: settings.idle_sleep(),
            counters: Arc::new(Counters::default()),
            phase,
            closed: false,
        })
    }

    /// Decode framed keys and values through `codec` before handing records over.
    pub fn with_decoder(mut self, codec: Arc<RecordCodec>) -> Self {
        self.decoder = Some(codec);
        self
    }

    pub fn subscription(&self) -> &Subscription {
        &self.subscription
    }

    pub fn assignment_state(&self) -> AssignmentState {
        self.tracker.state()
    }

    pub fn stats(&self) -> LoopStats {
        self.counters.snapshot()
    }

    pub fn monitor(&self) -> LoopMonitor {
        LoopMonitor {
            phase: self.phase.subscribe(),
            counters: Arc::clone(&self.counters),
            tracker: Arc::clone(&self.tracker),
        }
    }

    /// Poll once and dispatch what came back.
    ///
    /// Broker-reported record errors are logged and absorbed. Decode and
    /// handler failures are returned.
    pub async fn poll_once(&mut self) -> Result<PollOutcome, TributaryError> {
        if self.closed {
            return Err(TributaryError::closed("ConsumeLoop"));
        }

        self.counters.polls.fetch_add(1, Ordering::Relaxed);
        let Some(record) = self.client.poll(self.poll_timeout).await? else {
            return Ok(PollOutcome::Drained);
        };

        if let Some(err) = record.error() {
            self.counters.transient_errors.fetch_add(1, Ordering::Relaxed);
            match err.code {
                BrokerErrorCode::PartitionEof => {
                    debug!(topic = %record.topic, partition = %record.partition, "reached end of partition")
                }
                code if code.is_fatal() => {
                    error!(topic = %record.topic, partition = %record.partition, "non-retryable broker error, continuing: {err}")
                }
                _ => warn!(topic = %record.topic, partition = %record.partition, "error: {err}"),
            }
            return Ok(PollOutcome::Drained);
        }

        let decoder = self.decoder.clone();
        let record = decode_record(decoder.as_deref(), record).await?;
        debug!(topic = %record.topic, partition = %record.partition, offset = record.offset, "dispatching record");
        self.handler.handle(record)?;
        self.counters.records_handled.fetch_add(1, Ordering::Relaxed);
        Ok(PollOutcome::Progress)
    }

    /// Poll until a poll makes no progress. Returns the number of records handled.
    pub async fn drain(&mut self) -> Result<usize, TributaryError> {
        let mut handled = 0;
        loop {
            let n = self.poll_once().await?.count();
            if n == 0 {
                return Ok(handled);
            }
            handled += n;
        }
    }

    /// Like [`ConsumeLoop::drain`], but stops early once `shutdown` fires so a
    /// topic that never runs dry cannot hold the loop. Yields to the runtime
    /// after every record.
    async fn drain_until(&mut self, shutdown: &Shutdown) -> Result<usize, TributaryError> {
        let mut handled = 0;
        loop {
            if shutdown.is_triggered() {
                return Ok(handled);
            }
            let n = self.poll_once().await?.count();
            if n == 0 {
                return Ok(handled);
            }
            handled += n;
            tokio::task::yield_now().await;
        }
    }

    /// Drain, idle, repeat until `shutdown` fires or a poll fails.
    ///
    /// Shutdown is observed between polls and during the idle sleep, so it
    /// takes effect at worst one poll timeout late.
    ///
    /// Does not close the subscription; call [`ConsumeLoop::close`] afterwards
    /// or use [`ConsumeLoop::spawn`].
    pub async fn run(&mut self, mut shutdown: Shutdown) -> Result<(), TributaryError> {
        info!(pattern = %self.subscription.topic_pattern, "consume loop started");
        let result = loop {
            if shutdown.is_triggered() {
                break Ok(());
            }

            self.phase.send_replace(LoopPhase::Draining);
            match self.drain_until(&shutdown).await {
                Ok(handled) if handled > 0 => {
                    debug!(pattern = %self.subscription.topic_pattern, handled, "drained")
                }
                Ok(_) => {}
                Err(e) => break Err(e),
            }
            if shutdown.is_triggered() {
                break Ok(());
            }

            self.counters.idle_cycles.fetch_add(1, Ordering::Relaxed);
            self.phase.send_replace(LoopPhase::Idle);
            tokio::select! {
                _ = tokio::time::sleep(self.idle_sleep) => {}
                _ = shutdown.triggered() => break Ok(()),
            }
        };

        self.phase.send_replace(LoopPhase::Stopped);
        match &result {
            Ok(()) => info!(pattern = %self.subscription.topic_pattern, "consume loop stopped"),
            Err(e) => error!(pattern = %self.subscription.topic_pattern, "consume loop failed: {e}"),
        }
        result
    }

    /// Run on a new task and close the subscription when it ends.
    pub fn spawn(mut self, shutdown: Shutdown) -> JoinHandle<Result<LoopStats, TributaryError>> {
        tokio::spawn(async move {
            let result = self.run(shutdown).await;
            let closed = self.close();
            result.and(closed).map(|_| self.stats())
        })
    }

    /// Release the subscription. Later polls fail with `Closed`.
    pub fn close(&mut self) -> Result<(), TributaryError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.phase.send_replace(LoopPhase::Stopped);
        self.client.close()?;
        info!(pattern = %self.subscription.topic_pattern, "consumer closed");
        Ok(())
    }
}

async fn decode_record(
    codec: Option<&RecordCodec>,
    mut record: InboundRecord,
) -> Result<InboundRecord, TributaryError> {
    let Some(codec) = codec else {
        return Ok(record);
    };

    let origin = RecordOrigin {
        topic: &record.topic,
        partition: record.partition.0,
        offset: record.offset,
    };
    let key = match record.key.as_bytes() {
        Some(bytes) => Some(codec.decode(origin, bytes).await?),
        None => None,
    };
    let value = match record.value.as_bytes() {
        Some(bytes) => Some(codec.decode(origin, bytes).await?),
        None => None,
    };

    if let Some(key) = key {
        record.key = Payload::Decoded(key);
    }
    if let Some(value) = value {
        record.value = Payload::Decoded(value);
    }
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::InMemoryBroker;
    use crate::types::{PartitionId, TopicSpec};

    fn settings(topic: &str) -> ConsumerSettings {
        ConsumerSettings::new(topic)
            .with_offset_earliest(true)
            .with_poll_timeout(Duration::ZERO)
    }

    #[tokio::test]
    async fn test_poll_once_outcomes() {
        let broker = InMemoryBroker::new();
        broker.create_topic(&TopicSpec::new("t", 1, 1).unwrap()).unwrap();
        broker
            .append("t", None, None, Some(b"one".to_vec()))
            .unwrap();

        let mut seen = Vec::new();
        let mut consume = ConsumeLoop::new(
            Box::new(broker.consumer()),
            &settings("t"),
            "0",
            move |record: InboundRecord| -> Result<(), TributaryError> {
                seen.push(record.offset);
                Ok(())
            },
        )
        .unwrap();
        assert_eq!(consume.assignment_state(), AssignmentState::Subscribed);

        assert_eq!(consume.poll_once().await.unwrap(), PollOutcome::Progress);
        assert_eq!(consume.assignment_state(), AssignmentState::Assigned);
        assert_eq!(consume.poll_once().await.unwrap(), PollOutcome::Drained);

        broker.inject_poll_error("t", PartitionId(0), BrokerErrorCode::TopicAuthorizationFailed);
        assert_eq!(consume.poll_once().await.unwrap(), PollOutcome::Drained);

        let stats = consume.stats();
        assert_eq!(stats.polls, 3);
        assert_eq!(stats.records_handled, 1);
        assert_eq!(stats.transient_errors, 1);
    }

    #[tokio::test]
    async fn test_handler_error_propagates() {
        let broker = InMemoryBroker::new();
        broker.create_topic(&TopicSpec::new("t", 1, 1).unwrap()).unwrap();
        broker.append("t", None, None, Some(b"x".to_vec())).unwrap();

        let mut consume = ConsumeLoop::new(
            Box::new(broker.consumer()),
            &settings("t"),
            "0",
            |_record: InboundRecord| {
                Err(TributaryError::Handler {
                    reason: "rejected".to_string(),
                })
            },
        )
        .unwrap();

        let err = consume.drain().await.unwrap_err();
        assert_eq!(
            err,
            TributaryError::Handler {
                reason: "rejected".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_final() {
        let broker = InMemoryBroker::new();
        let mut consume = ConsumeLoop::new(
            Box::new(broker.consumer()),
            &settings("t"),
            "0",
            |_record: InboundRecord| -> Result<(), TributaryError> { Ok(()) },
        )
        .unwrap();
        let monitor = consume.monitor();

        consume.close().unwrap();
        consume.close().unwrap();
        assert_eq!(monitor.phase(), LoopPhase::Stopped);
        assert_eq!(broker.group_members("0"), 0);
        assert_eq!(
            consume.poll_once().await.unwrap_err(),
            TributaryError::closed("ConsumeLoop")
        );
    }

    #[test]
    fn test_invalid_settings_rejected() {
        let broker = InMemoryBroker::new();
        let result = ConsumeLoop::new(
            Box::new(broker.consumer()),
            &ConsumerSettings::new(""),
            "0",
            |_record: InboundRecord| -> Result<(), TributaryError> { Ok(()) },
        );
        assert!(matches!(result, Err(TributaryError::InvalidConfig { .. })));

        let result = ConsumeLoop::new(
            Box::new(broker.consumer()),
            &ConsumerSettings::new("^(unclosed"),
            "0",
            |_record: InboundRecord| -> Result<(), TributaryError> { Ok(()) },
        );
        assert!(result.is_err());
    }
}
