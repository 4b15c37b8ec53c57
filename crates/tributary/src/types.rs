//! Core types shared by the consumer, producer and broker client layers.

use crate::error::{BrokerError, TributaryError};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PartitionId(pub u32);

impl PartitionId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for PartitionId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl From<PartitionId> for u32 {
    fn from(partition_id: PartitionId) -> u32 {
        partition_id.0
    }
}

/// Position a partition is assigned at.
///
/// `Stored` is the broker default: the group's committed offset, falling back to
/// the subscription's reset policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Offset {
    Beginning,
    End,
    Stored,
    At(i64),
}

impl Offset {
    /// Kafka wire sentinels for the symbolic offsets.
    pub const BEGINNING_SENTINEL: i64 = -2;
    pub const END_SENTINEL: i64 = -1;
    pub const STORED_SENTINEL: i64 = -1000;

    pub fn to_raw(self) -> i64 {
        match self {
            Offset::Beginning => Self::BEGINNING_SENTINEL,
            Offset::End => Self::END_SENTINEL,
            Offset::Stored => Self::STORED_SENTINEL,
            Offset::At(offset) => offset,
        }
    }

    pub fn from_raw(raw: i64) -> Self {
        match raw {
            Self::BEGINNING_SENTINEL => Offset::Beginning,
            Self::END_SENTINEL => Offset::End,
            offset if offset >= 0 => Offset::At(offset),
            _ => Offset::Stored,
        }
    }
}

impl fmt::Display for Offset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Offset::Beginning => write!(f, "beginning"),
            Offset::End => write!(f, "end"),
            Offset::Stored => write!(f, "stored"),
            Offset::At(offset) => write!(f, "{offset}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OffsetPolicy {
    Earliest,
    #[default]
    Latest,
}

impl OffsetPolicy {
    pub fn from_earliest_flag(offset_earliest: bool) -> Self {
        if offset_earliest {
            OffsetPolicy::Earliest
        } else {
            OffsetPolicy::Latest
        }
    }

    /// Value for the `auto.offset.reset` client property.
    pub fn as_reset_str(&self) -> &'static str {
        match self {
            OffsetPolicy::Earliest => "earliest",
            OffsetPolicy::Latest => "latest",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TopicPartitionOffset {
    pub topic: String,
    pub partition: PartitionId,
    pub offset: Offset,
}

impl TopicPartitionOffset {
    pub fn new(topic: impl Into<String>, partition: impl Into<PartitionId>, offset: Offset) -> Self {
        Self {
            topic: topic.into(),
            partition: partition.into(),
            offset,
        }
    }
}

/// Set of partitions handed to a consumer on (re)balance.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PartitionAssignment {
    partitions: Vec<TopicPartitionOffset>,
}

impl PartitionAssignment {
    pub fn new(partitions: Vec<TopicPartitionOffset>) -> Self {
        Self { partitions }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.partitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TopicPartitionOffset> {
        self.partitions.iter()
    }

    pub fn offset_of(&self, topic: &str, partition: PartitionId) -> Option<Offset> {
        self.partitions
            .iter()
            .find(|tpo| tpo.topic == topic && tpo.partition == partition)
            .map(|tpo| tpo.offset)
    }

    /// Same partitions, every offset replaced with `offset`.
    pub fn with_offset(mut self, offset: Offset) -> Self {
        for tpo in self.partitions.iter_mut() {
            tpo.offset = offset;
        }
        self
    }

    pub fn topics(&self) -> Vec<&str> {
        let mut topics: Vec<&str> = self.partitions.iter().map(|p| p.topic.as_str()).collect();
        topics.sort_unstable();
        topics.dedup();
        topics
    }
}

impl FromIterator<TopicPartitionOffset> for PartitionAssignment {
    fn from_iter<I: IntoIterator<Item = TopicPartitionOffset>>(iter: I) -> Self {
        Self {
            partitions: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for PartitionAssignment {
    type Item = TopicPartitionOffset;
    type IntoIter = std::vec::IntoIter<TopicPartitionOffset>;

    fn into_iter(self) -> Self::IntoIter {
        self.partitions.into_iter()
    }
}

/// Immutable subscription owned by one consume loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub topic_pattern: String,
    pub offset_policy: OffsetPolicy,
    pub group_id: String,
}

impl Subscription {
    pub fn new(
        topic_pattern: impl Into<String>,
        offset_policy: OffsetPolicy,
        group_id: impl Into<String>,
    ) -> Result<Self, TributaryError> {
        let topic_pattern = topic_pattern.into();
        if topic_pattern.trim().is_empty() {
            return Err(TributaryError::invalid_config(
                "topic_pattern",
                "must not be empty",
            ));
        }
        let group_id = group_id.into();
        if group_id.is_empty() {
            return Err(TributaryError::invalid_config("group_id", "must not be empty"));
        }
        // Surface bad regexes at construction rather than at first rebalance.
        TopicMatcher::compile(&topic_pattern)?;
        Ok(Self {
            topic_pattern,
            offset_policy,
            group_id,
        })
    }

    pub fn matcher(&self) -> Result<TopicMatcher, TributaryError> {
        TopicMatcher::compile(&self.topic_pattern)
    }
}

/// Literal topic name or, when the pattern starts with `^`, a regex.
#[derive(Debug, Clone)]
pub enum TopicMatcher {
    Literal(String),
    Pattern(Regex),
}

impl TopicMatcher {
    pub fn compile(pattern: &str) -> Result<Self, TributaryError> {
        if pattern.starts_with('^') {
            Regex::new(pattern)
                .map(TopicMatcher::Pattern)
                .map_err(|e| TributaryError::invalid_config("topic_pattern", e.to_string()))
        } else {
            Ok(TopicMatcher::Literal(pattern.to_string()))
        }
    }

    pub fn matches(&self, topic: &str) -> bool {
        match self {
            TopicMatcher::Literal(name) => name == topic,
            TopicMatcher::Pattern(regex) => regex.is_match(topic),
        }
    }
}

/// Desired layout of a topic, used once to request creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicSpec {
    pub name: String,
    pub partitions: u32,
    pub replication_factor: u16,
    #[serde(default)]
    pub config: BTreeMap<String, String>,
}

impl TopicSpec {
    pub fn new(
        name: impl Into<String>,
        partitions: u32,
        replication_factor: u16,
    ) -> Result<Self, TributaryError> {
        let spec = Self {
            name: name.into(),
            partitions,
            replication_factor,
            config: BTreeMap::new(),
        };
        spec.validate()?;
        Ok(spec)
    }

    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    pub fn validate(&self) -> Result<(), TributaryError> {
        if self.name.trim().is_empty() {
            return Err(TributaryError::invalid_config("topic", "must not be empty"));
        }
        if self.partitions == 0 {
            return Err(TributaryError::invalid_config(
                "partitions",
                "must be at least 1",
            ));
        }
        if self.replication_factor == 0 {
            return Err(TributaryError::invalid_config(
                "replication_factor",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicMetadata {
    pub name: String,
    pub partitions: u32,
    pub replication_factor: u16,
}

/// Snapshot of the topics the broker knows about.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ClusterMetadata {
    pub topics: BTreeMap<String, TopicMetadata>,
}

impl ClusterMetadata {
    pub fn contains(&self, topic: &str) -> bool {
        self.topics.contains_key(topic)
    }

    pub fn topic(&self, topic: &str) -> Option<&TopicMetadata> {
        self.topics.get(topic)
    }
}

/// Per-topic result of a create-topics request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicCreateOutcome {
    pub topic: String,
    pub result: Result<(), BrokerError>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum Payload {
    #[default]
    Empty,
    Raw(Vec<u8>),
    Decoded(serde_json::Value),
}

impl Payload {
    pub fn from_bytes(bytes: Option<&[u8]>) -> Self {
        match bytes {
            Some(bytes) => Payload::Raw(bytes.to_vec()),
            None => Payload::Empty,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Payload::Empty)
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Payload::Raw(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn as_decoded(&self) -> Option<&serde_json::Value> {
        match self {
            Payload::Decoded(value) => Some(value),
            _ => None,
        }
    }

    pub fn into_decoded(self) -> Option<serde_json::Value> {
        match self {
            Payload::Decoded(value) => Some(value),
            _ => None,
        }
    }
}

/// One record returned by a poll. Records carrying `error` never reach a handler.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundRecord {
    pub topic: String,
    pub partition: PartitionId,
    pub offset: i64,
    pub key: Payload,
    pub value: Payload,
    pub timestamp: Option<DateTime<Utc>>,
    pub error: Option<BrokerError>,
}

impl InboundRecord {
    pub fn new(
        topic: impl Into<String>,
        partition: PartitionId,
        offset: i64,
        key: Payload,
        value: Payload,
    ) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
            key,
            value,
            timestamp: None,
            error: None,
        }
    }

    pub fn from_error(topic: impl Into<String>, partition: PartitionId, error: BrokerError) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset: Offset::STORED_SENTINEL,
            key: Payload::Empty,
            value: Payload::Empty,
            timestamp: None,
            error: Some(error),
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn error(&self) -> Option<&BrokerError> {
        self.error.as_ref()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutboundRecord {
    pub topic: String,
    pub partition: Option<PartitionId>,
    pub key: Option<Vec<u8>>,
    pub value: Option<Vec<u8>>,
    pub timestamp_ms: Option<i64>,
}

impl OutboundRecord {
    pub fn new(topic: impl Into<String>, key: Option<Vec<u8>>, value: Option<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            partition: None,
            key,
            value,
            timestamp_ms: None,
        }
    }

    pub fn with_partition(mut self, partition: PartitionId) -> Self {
        self.partition = Some(partition);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub topic: String,
    pub partition: PartitionId,
    pub offset: i64,
}
