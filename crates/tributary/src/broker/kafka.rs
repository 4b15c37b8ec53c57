//! Kafka adapter over librdkafka.
//!
//! Blocking librdkafka calls (metadata, flush) run on the blocking pool so they
//! never stall the runtime.

use crate::broker::r#trait::{AdminClient, ConsumerClient, ProducerClient, RebalanceListener};
use crate::config::BrokerConfig;
use crate::error::{BrokerError, BrokerErrorCode, TributaryError};
use crate::types::*;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rdkafka::admin::{AdminClient as RdAdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::{ClientContext, DefaultClientContext};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{BaseConsumer, Consumer, ConsumerContext, Rebalance, StreamConsumer};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::topic_partition_list::TopicPartitionList;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

fn map_code(code: RDKafkaErrorCode) -> BrokerErrorCode {
    match code {
        RDKafkaErrorCode::TopicAlreadyExists => BrokerErrorCode::TopicAlreadyExists,
        RDKafkaErrorCode::UnknownTopicOrPartition => BrokerErrorCode::UnknownTopicOrPartition,
        RDKafkaErrorCode::LeaderNotAvailable => BrokerErrorCode::LeaderNotAvailable,
        RDKafkaErrorCode::NotLeaderForPartition => BrokerErrorCode::NotLeaderForPartition,
        RDKafkaErrorCode::RequestTimedOut => BrokerErrorCode::RequestTimedOut,
        RDKafkaErrorCode::BrokerNotAvailable => BrokerErrorCode::BrokerNotAvailable,
        RDKafkaErrorCode::PolicyViolation => BrokerErrorCode::PolicyViolation,
        RDKafkaErrorCode::InvalidPartitions => BrokerErrorCode::InvalidPartitions,
        RDKafkaErrorCode::InvalidReplicationFactor => BrokerErrorCode::InvalidReplicationFactor,
        RDKafkaErrorCode::TopicAuthorizationFailed => BrokerErrorCode::TopicAuthorizationFailed,
        RDKafkaErrorCode::GroupAuthorizationFailed => BrokerErrorCode::GroupAuthorizationFailed,
        RDKafkaErrorCode::PartitionEOF => BrokerErrorCode::PartitionEof,
        _ => BrokerErrorCode::Unknown,
    }
}

fn map_kafka_error(err: &KafkaError) -> BrokerError {
    let code = err
        .rdkafka_error_code()
        .map(map_code)
        .unwrap_or(BrokerErrorCode::Unknown);
    BrokerError::new(code, err.to_string())
}

/// Consumption errors carry no topic, and a partition only for EOF.
fn error_record(pattern: &str, err: &KafkaError) -> InboundRecord {
    let partition = match err {
        KafkaError::PartitionEOF(partition) => PartitionId((*partition).max(0) as u32),
        _ => PartitionId(0),
    };
    InboundRecord::from_error(pattern, partition, map_kafka_error(err))
}

fn to_rd_offset(offset: Offset) -> rdkafka::Offset {
    match offset {
        Offset::Beginning => rdkafka::Offset::Beginning,
        Offset::End => rdkafka::Offset::End,
        Offset::Stored => rdkafka::Offset::Stored,
        Offset::At(n) => rdkafka::Offset::Offset(n),
    }
}

fn from_rd_offset(offset: rdkafka::Offset) -> Offset {
    match offset {
        rdkafka::Offset::Beginning => Offset::Beginning,
        rdkafka::Offset::End => Offset::End,
        rdkafka::Offset::Offset(n) => Offset::At(n),
        _ => Offset::Stored,
    }
}

fn to_assignment(tpl: &TopicPartitionList) -> PartitionAssignment {
    tpl.elements()
        .iter()
        .map(|elem| {
            TopicPartitionOffset::new(
                elem.topic(),
                elem.partition().max(0) as u32,
                from_rd_offset(elem.offset()),
            )
        })
        .collect()
}

fn to_tpl(assignment: &PartitionAssignment) -> Result<TopicPartitionList, TributaryError> {
    let mut tpl = TopicPartitionList::new();
    for tpo in assignment.iter() {
        tpl.add_partition_offset(&tpo.topic, tpo.partition.0 as i32, to_rd_offset(tpo.offset))
            .map_err(|e| TributaryError::Broker(map_kafka_error(&e)))?;
    }
    Ok(tpl)
}

fn base_config(config: &BrokerConfig) -> ClientConfig {
    let mut client_config = ClientConfig::new();
    client_config.set("bootstrap.servers", config.bootstrap_servers_string());
    client_config
}

/// Routes librdkafka rebalance callbacks to a [`RebalanceListener`].
pub struct RebalanceContext {
    listener: Arc<dyn RebalanceListener>,
}

impl ClientContext for RebalanceContext {}

impl ConsumerContext for RebalanceContext {
    fn post_rebalance(&self, base_consumer: &BaseConsumer<Self>, rebalance: &Rebalance<'_>) {
        match rebalance {
            Rebalance::Assign(tpl) => {
                let effective = self.listener.on_assign(to_assignment(tpl));
                let result = to_tpl(&effective).and_then(|tpl| {
                    base_consumer
                        .assign(&tpl)
                        .map_err(|e| TributaryError::Broker(map_kafka_error(&e)))
                });
                if let Err(e) = result {
                    error!("Failed to accept partition assignment: {e}");
                }
            }
            Rebalance::Revoke(tpl) => self.listener.on_revoke(&to_assignment(tpl)),
            Rebalance::Error(e) => warn!("Rebalance error: {e}"),
        }
    }
}

/// Group consumer; the underlying client is created on subscribe because the
/// group id and reset policy come from the subscription.
pub struct KafkaConsumer {
    config: BrokerConfig,
    consumer: Option<StreamConsumer<RebalanceContext>>,
    /// Subscribed pattern, the best topic label for errors librdkafka reports
    /// without one.
    pattern: String,
    closed: bool,
}

impl KafkaConsumer {
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            config,
            consumer: None,
            pattern: String::new(),
            closed: false,
        }
    }

    fn ensure_open(&self) -> Result<(), TributaryError> {
        if self.closed {
            return Err(TributaryError::closed("KafkaConsumer"));
        }
        Ok(())
    }

    fn consumer(&self) -> Result<&StreamConsumer<RebalanceContext>, TributaryError> {
        self.ensure_open()?;
        self.consumer.as_ref().ok_or(TributaryError::NotSubscribed)
    }
}

#[async_trait]
impl ConsumerClient for KafkaConsumer {
    fn subscribe(
        &mut self,
        subscription: &Subscription,
        listener: Arc<dyn RebalanceListener>,
    ) -> Result<(), TributaryError> {
        self.ensure_open()?;
        let consumer: StreamConsumer<RebalanceContext> = base_config(&self.config)
            .set("group.id", &subscription.group_id)
            .set("auto.offset.reset", subscription.offset_policy.as_reset_str())
            .set("enable.partition.eof", "false")
            .create_with_context(RebalanceContext { listener })
            .map_err(|e| TributaryError::from_config_error(e, "consumer creation"))?;

        consumer
            .subscribe(&[subscription.topic_pattern.as_str()])
            .map_err(|e| TributaryError::Broker(map_kafka_error(&e)))?;
        info!(pattern = %subscription.topic_pattern, group = %subscription.group_id, "subscribed");

        self.consumer = Some(consumer);
        self.pattern = subscription.topic_pattern.clone();
        Ok(())
    }

    async fn poll(&mut self, timeout: Duration) -> Result<Option<InboundRecord>, TributaryError> {
        let consumer = self.consumer()?;
        let received = match tokio::time::timeout(timeout, consumer.recv()).await {
            Ok(received) => received,
            Err(_) => return Ok(None),
        };

        match received {
            Ok(message) => {
                let timestamp = message
                    .timestamp()
                    .to_millis()
                    .and_then(DateTime::<Utc>::from_timestamp_millis);
                let mut record = InboundRecord::new(
                    message.topic(),
                    PartitionId(message.partition().max(0) as u32),
                    message.offset(),
                    Payload::from_bytes(message.key()),
                    Payload::from_bytes(message.payload()),
                );
                record.timestamp = timestamp;
                Ok(Some(record))
            }
            Err(e) => Ok(Some(error_record(&self.pattern, &e))),
        }
    }

    fn assign(&mut self, assignment: &PartitionAssignment) -> Result<(), TributaryError> {
        let tpl = to_tpl(assignment)?;
        self.consumer()?
            .assign(&tpl)
            .map_err(|e| TributaryError::Broker(map_kafka_error(&e)))
    }

    fn close(&mut self) -> Result<(), TributaryError> {
        if let Some(consumer) = self.consumer.take() {
            consumer.unsubscribe();
            debug!("consumer closed");
        }
        self.closed = true;
        Ok(())
    }
}

pub struct KafkaAdmin {
    admin: Arc<RdAdminClient<DefaultClientContext>>,
}

impl KafkaAdmin {
    pub fn new(config: &BrokerConfig) -> Result<Self, TributaryError> {
        let admin = base_config(config)
            .create()
            .map_err(|e| TributaryError::from_config_error(e, "admin client creation"))?;
        Ok(Self {
            admin: Arc::new(admin),
        })
    }
}

#[async_trait]
impl AdminClient for KafkaAdmin {
    async fn fetch_metadata(&self, timeout: Duration) -> Result<ClusterMetadata, TributaryError> {
        let admin = Arc::clone(&self.admin);
        tokio::task::spawn_blocking(move || {
            let metadata = admin.inner().fetch_metadata(None, timeout).map_err(|e| {
                match e.rdkafka_error_code() {
                    Some(RDKafkaErrorCode::OperationTimedOut) => TributaryError::Timeout {
                        operation: "topic metadata".to_string(),
                    },
                    _ => TributaryError::Broker(map_kafka_error(&e)),
                }
            })?;

            let topics = metadata
                .topics()
                .iter()
                .filter(|topic| topic.error().is_none())
                .map(|topic| {
                    let replication_factor = topic
                        .partitions()
                        .first()
                        .map(|p| p.replicas().len() as u16)
                        .unwrap_or(0);
                    (
                        topic.name().to_string(),
                        TopicMetadata {
                            name: topic.name().to_string(),
                            partitions: topic.partitions().len() as u32,
                            replication_factor,
                        },
                    )
                })
                .collect();
            Ok(ClusterMetadata { topics })
        })
        .await
        .map_err(|e| TributaryError::Broker(BrokerError::new(BrokerErrorCode::Unknown, e.to_string())))?
    }

    async fn create_topics(
        &self,
        specs: &[TopicSpec],
        timeout: Duration,
    ) -> Result<Vec<TopicCreateOutcome>, TributaryError> {
        let new_topics: Vec<NewTopic<'_>> = specs
            .iter()
            .map(|spec| {
                spec.config.iter().fold(
                    NewTopic::new(
                        &spec.name,
                        spec.partitions as i32,
                        TopicReplication::Fixed(spec.replication_factor as i32),
                    ),
                    |topic, (key, value)| topic.set(key, value),
                )
            })
            .collect();
        let options = AdminOptions::new().operation_timeout(Some(timeout));

        let results = self
            .admin
            .create_topics(new_topics.iter(), &options)
            .await
            .map_err(|e| TributaryError::Broker(map_kafka_error(&e)))?;

        Ok(results
            .into_iter()
            .map(|result| match result {
                Ok(topic) => TopicCreateOutcome {
                    topic,
                    result: Ok(()),
                },
                Err((topic, code)) => TopicCreateOutcome {
                    result: Err(BrokerError::new(map_code(code), format!("topic '{topic}'"))),
                    topic,
                },
            })
            .collect())
    }
}

#[derive(Clone)]
pub struct KafkaProducer {
    producer: FutureProducer,
}

impl KafkaProducer {
    pub fn new(config: &BrokerConfig) -> Result<Self, TributaryError> {
        let producer = base_config(config)
            .create()
            .map_err(|e| TributaryError::from_config_error(e, "producer creation"))?;
        Ok(Self { producer })
    }
}

#[async_trait]
impl ProducerClient for KafkaProducer {
    async fn send(
        &self,
        record: OutboundRecord,
        timeout: Duration,
    ) -> Result<DeliveryReport, TributaryError> {
        let mut future_record: FutureRecord<'_, [u8], [u8]> = FutureRecord::to(&record.topic);
        if let Some(key) = &record.key {
            future_record = future_record.key(key.as_slice());
        }
        if let Some(value) = &record.value {
            future_record = future_record.payload(value.as_slice());
        }
        if let Some(partition) = record.partition {
            future_record = future_record.partition(partition.0 as i32);
        }
        if let Some(timestamp) = record.timestamp_ms {
            future_record = future_record.timestamp(timestamp);
        }

        match self.producer.send(future_record, timeout).await {
            Ok((partition, offset)) => Ok(DeliveryReport {
                topic: record.topic.clone(),
                partition: PartitionId(partition.max(0) as u32),
                offset,
            }),
            Err((e, _)) => Err(TributaryError::Delivery {
                topic: record.topic.clone(),
                reason: e.to_string(),
            }),
        }
    }

    async fn flush(&self, timeout: Duration) -> Result<(), TributaryError> {
        let producer = self.producer.clone();
        tokio::task::spawn_blocking(move || producer.flush(timeout))
            .await
            .map_err(|e| TributaryError::Broker(BrokerError::new(BrokerErrorCode::Unknown, e.to_string())))?
            .map_err(|e| TributaryError::Broker(map_kafka_error(&e)))
    }
}
