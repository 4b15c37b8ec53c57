//! In-memory broker implementation.
//!
//! Implements all three client traits against process-local state. Suitable for
//! tests and demos; nothing is persisted and there is no network involved.

use crate::broker::r#trait::{AdminClient, ConsumerClient, ProducerClient, RebalanceListener};
use crate::error::{BrokerError, BrokerErrorCode, TributaryError};
use crate::types::*;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, info, trace};

type PartitionKey = (String, PartitionId);

#[derive(Debug, Clone)]
struct StoredRecord {
    key: Option<Vec<u8>>,
    value: Option<Vec<u8>>,
    timestamp: DateTime<Utc>,
}

#[derive(Debug)]
struct TopicState {
    replication_factor: u16,
    partitions: Vec<Vec<StoredRecord>>,
    next_round_robin: usize,
}

struct MemberState {
    matcher: TopicMatcher,
    listener: Arc<dyn RebalanceListener>,
    /// Broker-default assignment computed at the last rebalance.
    assigned: PartitionAssignment,
    rebalance_pending: bool,
}

#[derive(Default)]
struct GroupState {
    members: BTreeMap<String, MemberState>,
    committed: HashMap<PartitionKey, i64>,
}

#[derive(Default)]
struct BrokerState {
    topics: BTreeMap<String, TopicState>,
    groups: HashMap<String, GroupState>,
    poll_errors: VecDeque<(String, PartitionId, BrokerError)>,
    create_failures: VecDeque<BrokerError>,
    flush_failures: VecDeque<BrokerError>,
    metadata_requests: u64,
    create_requests: u64,
    metadata_latency: Duration,
}

struct Shared {
    state: Mutex<BrokerState>,
    records_available: Notify,
    broker_count: u16,
}

/// Process-local broker shared by every client handle created from it.
#[derive(Clone)]
pub struct InMemoryBroker {
    shared: Arc<Shared>,
}

impl fmt::Debug for InMemoryBroker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("InMemoryBroker")
            .field("broker_count", &self.shared.broker_count)
            .field("topics", &state.topics.keys().collect::<Vec<_>>())
            .field("groups", &state.groups.len())
            .finish()
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::with_broker_count(1)
    }

    /// Broker count bounds the replication factor a topic may request.
    pub fn with_broker_count(broker_count: u16) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(BrokerState::default()),
                records_available: Notify::new(),
                broker_count: broker_count.max(1),
            }),
        }
    }

    pub fn consumer(&self) -> InMemoryConsumer {
        InMemoryConsumer {
            broker: self.clone(),
            subscription: None,
            member_id: None,
            current: PartitionAssignment::empty(),
            positions: BTreeMap::new(),
            cursor: 0,
            closed: false,
        }
    }

    pub fn admin(&self) -> InMemoryAdmin {
        InMemoryAdmin {
            broker: self.clone(),
        }
    }

    pub fn producer(&self) -> InMemoryProducer {
        InMemoryProducer {
            broker: self.clone(),
        }
    }

    pub fn create_topic(&self, spec: &TopicSpec) -> Result<(), BrokerError> {
        let result = {
            let mut state = self.shared.state.lock();
            create_topic_locked(&mut state, spec, self.shared.broker_count)
        };
        if result.is_ok() {
            self.shared.records_available.notify_waiters();
        }
        result
    }

    /// Append a record. Without an explicit partition the key hash picks one;
    /// keyless records are spread round-robin.
    pub fn append(
        &self,
        topic: &str,
        partition: Option<PartitionId>,
        key: Option<Vec<u8>>,
        value: Option<Vec<u8>>,
    ) -> Result<DeliveryReport, BrokerError> {
        let report = {
            let mut state = self.shared.state.lock();
            let topic_state = state.topics.get_mut(topic).ok_or_else(|| {
                BrokerError::new(
                    BrokerErrorCode::UnknownTopicOrPartition,
                    format!("topic '{topic}'"),
                )
            })?;

            let partition_count = topic_state.partitions.len();
            let index = match (partition, key.as_deref()) {
                (Some(partition), _) => partition.0 as usize,
                (None, Some(key)) => {
                    let mut hasher = DefaultHasher::new();
                    key.hash(&mut hasher);
                    (hasher.finish() % partition_count as u64) as usize
                }
                (None, None) => {
                    let index = topic_state.next_round_robin % partition_count;
                    topic_state.next_round_robin = topic_state.next_round_robin.wrapping_add(1);
                    index
                }
            };

            let log = topic_state.partitions.get_mut(index).ok_or_else(|| {
                BrokerError::new(
                    BrokerErrorCode::UnknownTopicOrPartition,
                    format!("partition {index} of topic '{topic}'"),
                )
            })?;
            log.push(StoredRecord {
                key,
                value,
                timestamp: Utc::now(),
            });

            DeliveryReport {
                topic: topic.to_string(),
                partition: PartitionId(index as u32),
                offset: log.len() as i64 - 1,
            }
        };
        trace!(topic = %report.topic, partition = %report.partition, offset = report.offset, "record appended");
        self.shared.records_available.notify_waiters();
        Ok(report)
    }

    /// Queue a broker error for the next poll of a consumer owning the partition.
    pub fn inject_poll_error(&self, topic: &str, partition: PartitionId, code: BrokerErrorCode) {
        let mut state = self.shared.state.lock();
        state.poll_errors.push_back((
            topic.to_string(),
            partition,
            BrokerError::new(code, format!("injected for {topic}[{partition}]")),
        ));
        drop(state);
        self.shared.records_available.notify_waiters();
    }

    /// Fail the next topic creation with `error` regardless of broker state.
    pub fn fail_next_create(&self, error: BrokerError) {
        self.shared.state.lock().create_failures.push_back(error);
    }

    /// Fail the next producer flush with `error`.
    pub fn fail_next_flush(&self, error: BrokerError) {
        self.shared.state.lock().flush_failures.push_back(error);
    }

    pub fn set_metadata_latency(&self, latency: Duration) {
        self.shared.state.lock().metadata_latency = latency;
    }

    pub fn metadata_requests(&self) -> u64 {
        self.shared.state.lock().metadata_requests
    }

    pub fn create_requests(&self) -> u64 {
        self.shared.state.lock().create_requests
    }

    pub fn topic_metadata(&self, topic: &str) -> Option<TopicMetadata> {
        let state = self.shared.state.lock();
        state.topics.get(topic).map(|t| topic_metadata(topic, t))
    }

    pub fn high_water_mark(&self, topic: &str, partition: PartitionId) -> i64 {
        let state = self.shared.state.lock();
        partition_len(&state, topic, partition)
    }

    pub fn committed_offset(&self, group_id: &str, topic: &str, partition: PartitionId) -> Option<i64> {
        let state = self.shared.state.lock();
        state
            .groups
            .get(group_id)
            .and_then(|g| g.committed.get(&(topic.to_string(), partition)))
            .copied()
    }

    pub fn group_members(&self, group_id: &str) -> usize {
        let state = self.shared.state.lock();
        state.groups.get(group_id).map(|g| g.members.len()).unwrap_or(0)
    }

    /// Every record of one partition, in offset order.
    pub fn read_partition(&self, topic: &str, partition: PartitionId) -> Vec<InboundRecord> {
        let state = self.shared.state.lock();
        state
            .topics
            .get(topic)
            .and_then(|t| t.partitions.get(partition.0 as usize))
            .map(|log| {
                log.iter()
                    .enumerate()
                    .map(|(offset, stored)| to_inbound(topic, partition, offset as i64, stored))
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn topic_metadata(name: &str, topic: &TopicState) -> TopicMetadata {
    TopicMetadata {
        name: name.to_string(),
        partitions: topic.partitions.len() as u32,
        replication_factor: topic.replication_factor,
    }
}

fn partition_len(state: &BrokerState, topic: &str, partition: PartitionId) -> i64 {
    state
        .topics
        .get(topic)
        .and_then(|t| t.partitions.get(partition.0 as usize))
        .map(|log| log.len() as i64)
        .unwrap_or(0)
}

fn to_inbound(topic: &str, partition: PartitionId, offset: i64, stored: &StoredRecord) -> InboundRecord {
    InboundRecord::new(
        topic,
        partition,
        offset,
        Payload::from_bytes(stored.key.as_deref()),
        Payload::from_bytes(stored.value.as_deref()),
    )
    .with_timestamp(stored.timestamp)
}

fn create_topic_locked(
    state: &mut BrokerState,
    spec: &TopicSpec,
    broker_count: u16,
) -> Result<(), BrokerError> {
    if let Some(error) = state.create_failures.pop_front() {
        return Err(error);
    }
    if state.topics.contains_key(&spec.name) {
        return Err(BrokerError::new(
            BrokerErrorCode::TopicAlreadyExists,
            format!("topic '{}' already exists", spec.name),
        ));
    }
    if spec.partitions == 0 {
        return Err(BrokerError::new(
            BrokerErrorCode::InvalidPartitions,
            "partitions must be at least 1",
        ));
    }
    if spec.replication_factor == 0 || spec.replication_factor > broker_count {
        return Err(BrokerError::new(
            BrokerErrorCode::InvalidReplicationFactor,
            format!(
                "replication factor {} with {broker_count} available brokers",
                spec.replication_factor
            ),
        ));
    }

    state.topics.insert(
        spec.name.clone(),
        TopicState {
            replication_factor: spec.replication_factor,
            partitions: vec![Vec::new(); spec.partitions as usize],
            next_round_robin: 0,
        },
    );
    info!(topic = %spec.name, partitions = spec.partitions, replication = spec.replication_factor, "topic created");

    // Pattern subscribers pick up new topics on their next rebalance.
    let affected: Vec<String> = state
        .groups
        .iter()
        .filter(|(_, group)| group.members.values().any(|m| m.matcher.matches(&spec.name)))
        .map(|(group_id, _)| group_id.clone())
        .collect();
    for group_id in affected {
        rebalance_group(state, &group_id);
    }
    Ok(())
}

/// Spread each topic's partitions round-robin over the members subscribed to it.
fn rebalance_group(state: &mut BrokerState, group_id: &str) {
    let BrokerState { topics, groups, .. } = state;
    let Some(group) = groups.get_mut(group_id) else {
        return;
    };

    let member_ids: Vec<String> = group.members.keys().cloned().collect();
    let mut assignments: HashMap<String, Vec<TopicPartitionOffset>> =
        member_ids.iter().map(|id| (id.clone(), Vec::new())).collect();

    for (name, topic) in topics.iter() {
        let eligible: Vec<&String> = member_ids
            .iter()
            .filter(|id| group.members[id.as_str()].matcher.matches(name))
            .collect();
        if eligible.is_empty() {
            continue;
        }
        for partition in 0..topic.partitions.len() {
            let owner = eligible[partition % eligible.len()];
            if let Some(owned) = assignments.get_mut(owner) {
                owned.push(TopicPartitionOffset::new(
                    name.clone(),
                    partition as u32,
                    Offset::Stored,
                ));
            }
        }
    }

    for (member_id, member) in group.members.iter_mut() {
        member.assigned = PartitionAssignment::new(assignments.remove(member_id).unwrap_or_default());
        member.rebalance_pending = true;
    }
    debug!(group = group_id, members = member_ids.len(), "group rebalanced");
}

/// Consumer handle; one group member once subscribed.
pub struct InMemoryConsumer {
    broker: InMemoryBroker,
    subscription: Option<Subscription>,
    member_id: Option<String>,
    current: PartitionAssignment,
    positions: BTreeMap<PartitionKey, i64>,
    cursor: usize,
    closed: bool,
}

impl InMemoryConsumer {
    pub fn assignment(&self) -> &PartitionAssignment {
        &self.current
    }

    /// Next fetch position for a partition in the current assignment.
    pub fn position(&self, topic: &str, partition: PartitionId) -> Option<i64> {
        self.positions.get(&(topic.to_string(), partition)).copied()
    }

    fn ensure_open(&self) -> Result<(), TributaryError> {
        if self.closed {
            return Err(TributaryError::closed("InMemoryConsumer"));
        }
        Ok(())
    }

    fn leave_group(&mut self) {
        let (Some(subscription), Some(member_id)) = (self.subscription.take(), self.member_id.take())
        else {
            return;
        };
        let mut state = self.broker.shared.state.lock();
        let removed = state
            .groups
            .get_mut(&subscription.group_id)
            .and_then(|group| group.members.remove(&member_id))
            .is_some();
        if removed {
            rebalance_group(&mut state, &subscription.group_id);
        }
        drop(state);
        self.current = PartitionAssignment::empty();
        self.positions.clear();
    }

    /// Deliver a pending rebalance through the listener, the way a client
    /// library dispatches callbacks from inside poll.
    fn dispatch_rebalance(&mut self) -> Result<(), TributaryError> {
        let (Some(subscription), Some(member_id)) = (&self.subscription, &self.member_id) else {
            return Err(TributaryError::NotSubscribed);
        };

        let pending = {
            let mut state = self.broker.shared.state.lock();
            state
                .groups
                .get_mut(&subscription.group_id)
                .and_then(|group| group.members.get_mut(member_id))
                .filter(|member| member.rebalance_pending)
                .map(|member| {
                    member.rebalance_pending = false;
                    (member.assigned.clone(), Arc::clone(&member.listener))
                })
        };

        if let Some((broker_default, listener)) = pending {
            if !self.current.is_empty() {
                listener.on_revoke(&self.current);
            }
            let effective = listener.on_assign(broker_default);
            self.assign(&effective)?;
        }
        Ok(())
    }

    fn next_record(&mut self) -> Option<InboundRecord> {
        let group_id = self.subscription.as_ref()?.group_id.clone();
        let mut state = self.broker.shared.state.lock();

        if let Some(index) = state
            .poll_errors
            .iter()
            .position(|(topic, partition, _)| self.positions.contains_key(&(topic.clone(), *partition)))
        {
            let (topic, partition, error) = state.poll_errors.remove(index)?;
            return Some(InboundRecord::from_error(topic, partition, error));
        }

        let keys: Vec<PartitionKey> = self.positions.keys().cloned().collect();
        let count = keys.len();
        for step in 0..count {
            let index = (self.cursor + step) % count;
            let key = &keys[index];
            let position = self.positions[key];
            let Some(stored) = state
                .topics
                .get(&key.0)
                .and_then(|t| t.partitions.get(key.1.0 as usize))
                .and_then(|log| log.get(position as usize))
                .cloned()
            else {
                continue;
            };

            self.positions.insert(key.clone(), position + 1);
            self.cursor = (index + 1) % count;
            // Auto-commit: the committed offset is the next one to read.
            if let Some(group) = state.groups.get_mut(&group_id) {
                group.committed.insert(key.clone(), position + 1);
            }
            return Some(to_inbound(&key.0, key.1, position, &stored));
        }
        None
    }
}

#[async_trait]
impl ConsumerClient for InMemoryConsumer {
    fn subscribe(
        &mut self,
        subscription: &Subscription,
        listener: Arc<dyn RebalanceListener>,
    ) -> Result<(), TributaryError> {
        self.ensure_open()?;
        self.leave_group();

        let matcher = subscription.matcher()?;
        let member_id = format!("{}-{}", subscription.group_id, uuid::Uuid::new_v4());
        {
            let mut state = self.broker.shared.state.lock();
            state
                .groups
                .entry(subscription.group_id.clone())
                .or_default()
                .members
                .insert(
                    member_id.clone(),
                    MemberState {
                        matcher,
                        listener,
                        assigned: PartitionAssignment::empty(),
                        rebalance_pending: false,
                    },
                );
            rebalance_group(&mut state, &subscription.group_id);
        }
        debug!(member = %member_id, pattern = %subscription.topic_pattern, "joined group");

        self.subscription = Some(subscription.clone());
        self.member_id = Some(member_id);
        Ok(())
    }

    async fn poll(&mut self, timeout: Duration) -> Result<Option<InboundRecord>, TributaryError> {
        self.ensure_open()?;
        self.dispatch_rebalance()?;

        let shared = Arc::clone(&self.broker.shared);
        let notified = shared.records_available.notified();
        if let Some(record) = self.next_record() {
            return Ok(Some(record));
        }
        if timeout.is_zero() || tokio::time::timeout(timeout, notified).await.is_err() {
            return Ok(None);
        }

        self.dispatch_rebalance()?;
        Ok(self.next_record())
    }

    fn assign(&mut self, assignment: &PartitionAssignment) -> Result<(), TributaryError> {
        self.ensure_open()?;
        let policy = self
            .subscription
            .as_ref()
            .map(|s| s.offset_policy)
            .unwrap_or_default();
        let group_id = self.subscription.as_ref().map(|s| s.group_id.clone());

        let state = self.broker.shared.state.lock();
        let committed = group_id.as_ref().and_then(|id| state.groups.get(id));

        let mut positions = BTreeMap::new();
        for tpo in assignment.iter() {
            let high_water_mark = partition_len(&state, &tpo.topic, tpo.partition);
            let key = (tpo.topic.clone(), tpo.partition);
            let position = match tpo.offset {
                Offset::Beginning => 0,
                Offset::End => high_water_mark,
                Offset::At(offset) => offset.clamp(0, high_water_mark),
                Offset::Stored => committed
                    .and_then(|group| group.committed.get(&key))
                    .copied()
                    .unwrap_or(match policy {
                        OffsetPolicy::Earliest => 0,
                        OffsetPolicy::Latest => high_water_mark,
                    }),
            };
            positions.insert(key, position);
        }
        drop(state);

        self.positions = positions;
        self.current = assignment.clone();
        self.cursor = 0;
        Ok(())
    }

    fn close(&mut self) -> Result<(), TributaryError> {
        if self.closed {
            return Ok(());
        }
        self.leave_group();
        self.closed = true;
        Ok(())
    }
}

impl Drop for InMemoryConsumer {
    fn drop(&mut self) {
        self.leave_group();
    }
}

#[derive(Clone)]
pub struct InMemoryAdmin {
    broker: InMemoryBroker,
}

#[async_trait]
impl AdminClient for InMemoryAdmin {
    async fn fetch_metadata(&self, timeout: Duration) -> Result<ClusterMetadata, TributaryError> {
        let latency = {
            let mut state = self.broker.shared.state.lock();
            state.metadata_requests += 1;
            state.metadata_latency
        };
        if latency > timeout {
            tokio::time::sleep(timeout).await;
            return Err(TributaryError::Timeout {
                operation: "topic metadata".to_string(),
            });
        }
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let state = self.broker.shared.state.lock();
        Ok(ClusterMetadata {
            topics: state
                .topics
                .iter()
                .map(|(name, topic)| (name.clone(), topic_metadata(name, topic)))
                .collect(),
        })
    }

    async fn create_topics(
        &self,
        specs: &[TopicSpec],
        _timeout: Duration,
    ) -> Result<Vec<TopicCreateOutcome>, TributaryError> {
        let outcomes = {
            let mut state = self.broker.shared.state.lock();
            state.create_requests += 1;
            specs
                .iter()
                .map(|spec| TopicCreateOutcome {
                    topic: spec.name.clone(),
                    result: create_topic_locked(&mut state, spec, self.broker.shared.broker_count),
                })
                .collect()
        };
        self.broker.shared.records_available.notify_waiters();
        Ok(outcomes)
    }
}

#[derive(Clone)]
pub struct InMemoryProducer {
    broker: InMemoryBroker,
}

#[async_trait]
impl ProducerClient for InMemoryProducer {
    async fn send(
        &self,
        record: OutboundRecord,
        _timeout: Duration,
    ) -> Result<DeliveryReport, TributaryError> {
        self.broker
            .append(&record.topic, record.partition, record.key, record.value)
            .map_err(|e| TributaryError::Delivery {
                topic: record.topic.clone(),
                reason: e.to_string(),
            })
    }

    async fn flush(&self, _timeout: Duration) -> Result<(), TributaryError> {
        let failure = self.broker.shared.state.lock().flush_failures.pop_front();
        match failure {
            Some(error) => Err(TributaryError::Broker(error)),
            None => Ok(()),
        }
    }
}
