//! Consume raw stations, transform, table and republish.
//!
//! The consume loop's handler is synchronous, so transformed stations are
//! handed to a forwarding task over a channel and sent from there. The
//! forwarder ends once the loop (and with it the sending half) is dropped.

use crate::models::{Station, TransformedStation};
use crate::schemas;
use crate::table::StationTable;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use tributary::consumer::LoopMonitor;
use tributary::schema::{RecordCodec, Schema, SchemaRegistry};
use tributary::{
    BrokerBackend, ConsumeLoop, ConsumerSettings, InboundRecord, Producer, ProducerSchemas,
    ProducerSettings, Shutdown, TopicProvisioner, TopicRegistry, TributaryConfig, TributaryError,
};

pub const INPUT_TOPIC: &str = "org.chicago.transit.stations";
pub const OUTPUT_TOPIC: &str = "org.chicago.transit.stations.transformed";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineReport {
    pub records_consumed: u64,
    pub records_forwarded: u64,
    pub stations: Vec<TransformedStation>,
}

pub struct StationsPipeline {
    consumer: ConsumeLoop,
    producer: Arc<Producer>,
    forwarder: JoinHandle<Result<u64, TributaryError>>,
    table: StationTable,
}

impl StationsPipeline {
    /// Consumer and producer sections used when a config leaves them out.
    pub fn default_config() -> TributaryConfig {
        TributaryConfig {
            consumer: Some(default_consumer_settings()),
            producer: Some(default_producer_settings()),
            ..TributaryConfig::default()
        }
    }

    /// Provision the output topic, then subscribe to the input topic.
    pub async fn build(
        backend: &BrokerBackend,
        schema_registry: Arc<dyn SchemaRegistry>,
        topics: TopicRegistry,
        config: &TributaryConfig,
    ) -> Result<Self, TributaryError> {
        config.validate()?;
        let consumer_settings = config
            .consumer
            .clone()
            .unwrap_or_else(default_consumer_settings);
        let producer_settings = config
            .producer
            .clone()
            .unwrap_or_else(default_producer_settings);

        let provisioner = TopicProvisioner::new(backend.admin()?, topics, config.provisioner.clone());
        let producer = Arc::new(
            Producer::new(
                &producer_settings,
                ProducerSchemas::new(Schema::string(), schemas::transformed_station()?),
                &provisioner,
                backend.producer()?,
                schema_registry.clone(),
            )
            .await?,
        );

        let table = StationTable::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let mut consumer = ConsumeLoop::new(
            backend.consumer()?,
            &consumer_settings,
            &config.broker.group_id,
            transform_handler(table.clone(), tx),
        )?;
        if consumer_settings.decode {
            consumer = consumer.with_decoder(Arc::new(RecordCodec::new(schema_registry)));
        }

        info!(
            input = %consumer_settings.topic_pattern,
            output = %producer.topic(),
            "stations pipeline ready"
        );
        let forwarder = tokio::spawn(forward(producer.clone(), rx));
        Ok(Self {
            consumer,
            producer,
            forwarder,
            table,
        })
    }

    pub fn table(&self) -> StationTable {
        self.table.clone()
    }

    pub fn monitor(&self) -> LoopMonitor {
        self.consumer.monitor()
    }

    /// Run until `shutdown` fires, then flush the producer.
    pub async fn run(self, shutdown: Shutdown) -> Result<PipelineReport, TributaryError> {
        let Self {
            consumer,
            producer,
            forwarder,
            table,
        } = self;

        let consumed = joined(consumer.spawn(shutdown)).await;
        let forwarded = joined(forwarder).await;
        let closed = producer.close().await;

        // The error that stopped the stream wins over a failed flush.
        let (stats, records_forwarded) = match (consumed, forwarded) {
            (Ok(stats), Ok(records_forwarded)) => {
                closed?;
                (stats, records_forwarded)
            }
            (Err(e), _) | (Ok(_), Err(e)) => {
                if let Err(close_err) = closed {
                    warn!(output = %producer.topic(), "producer close failed after stream error: {close_err}");
                }
                return Err(e);
            }
        };
        info!(
            consumed = stats.records_handled,
            forwarded = records_forwarded,
            stations = table.len(),
            "stations pipeline stopped"
        );
        Ok(PipelineReport {
            records_consumed: stats.records_handled,
            records_forwarded,
            stations: table.snapshot(),
        })
    }
}

fn default_consumer_settings() -> ConsumerSettings {
    ConsumerSettings::new(format!("^{}$", regex::escape(INPUT_TOPIC))).with_offset_earliest(true)
}

fn default_producer_settings() -> ProducerSettings {
    ProducerSettings::new(OUTPUT_TOPIC).with_layout(1, 1)
}

fn transform_handler(
    table: StationTable,
    tx: mpsc::UnboundedSender<TransformedStation>,
) -> impl FnMut(InboundRecord) -> Result<(), TributaryError> + Send + 'static {
    move |record| {
        let Some(station) = parse_station(&record)? else {
            debug!(topic = %record.topic, offset = record.offset, "skipping tombstone");
            return Ok(());
        };
        let transformed = TransformedStation::from(&station);
        table.upsert(transformed.clone());
        tx.send(transformed).map_err(|_| TributaryError::Handler {
            reason: "station forwarder stopped".to_string(),
        })
    }
}

/// `None` for records without a value.
fn parse_station(record: &InboundRecord) -> Result<Option<Station>, TributaryError> {
    let decode_error = |reason: String| TributaryError::Decode {
        topic: record.topic.clone(),
        partition: record.partition.0,
        offset: record.offset,
        reason,
    };

    let parsed = if let Some(value) = record.value.as_decoded() {
        Station::deserialize(value)
    } else if let Some(bytes) = record.value.as_bytes() {
        serde_json::from_slice(bytes)
    } else {
        return Ok(None);
    };
    parsed.map(Some).map_err(|e| decode_error(e.to_string()))
}

async fn forward(
    producer: Arc<Producer>,
    mut rx: mpsc::UnboundedReceiver<TransformedStation>,
) -> Result<u64, TributaryError> {
    let mut forwarded = 0;
    while let Some(station) = rx.recv().await {
        let value = serde_json::to_value(&station).map_err(|e| TributaryError::Schema {
            schema: OUTPUT_TOPIC.to_string(),
            reason: e.to_string(),
        })?;
        let key = Value::String(station.station_id.to_string());
        producer.send(&key, Some(&value)).await?;
        forwarded += 1;
    }
    Ok(forwarded)
}

async fn joined<T>(handle: JoinHandle<Result<T, TributaryError>>) -> Result<T, TributaryError> {
    handle.await.map_err(|e| TributaryError::Handler {
        reason: format!("pipeline task failed: {e}"),
    })?
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tributary::{PartitionId, Payload, TopicMatcher};

    fn raw_station() -> Value {
        json!({
            "stop_id": 30162,
            "direction_id": "N",
            "stop_name": "Roosevelt (Howard-bound)",
            "station_name": "Roosevelt",
            "station_descriptive_name": "Roosevelt (Red, Orange & Green lines)",
            "station_id": 41400,
            "order": 3,
            "red": true,
            "blue": false,
            "green": true
        })
    }

    fn raw(offset: i64, bytes: &[u8]) -> InboundRecord {
        InboundRecord::new(
            INPUT_TOPIC,
            PartitionId(0),
            offset,
            Payload::Empty,
            Payload::from_bytes(Some(bytes)),
        )
    }

    #[test]
    fn test_parse_station_accepts_decoded_and_raw_json() {
        let record = InboundRecord::new(
            INPUT_TOPIC,
            PartitionId(0),
            7,
            Payload::Empty,
            Payload::Decoded(raw_station()),
        );
        assert_eq!(parse_station(&record).unwrap().unwrap().station_id, 41400);

        let bytes = serde_json::to_vec(&raw_station()).unwrap();
        let record = raw(8, &bytes);
        assert!(parse_station(&record).unwrap().unwrap().red);
    }

    #[test]
    fn test_parse_station_reports_malformed_rows() {
        let record = raw(9, b"{\"stop_id\": 1}");
        let err = parse_station(&record).unwrap_err();
        assert!(matches!(err, TributaryError::Decode { offset: 9, .. }));

        let tombstone = InboundRecord::new(INPUT_TOPIC, PartitionId(0), 10, Payload::Empty, Payload::Empty);
        assert!(parse_station(&tombstone).unwrap().is_none());
    }

    #[test]
    fn test_handler_tables_and_forwards() {
        let table = StationTable::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut handler = transform_handler(table.clone(), tx);

        let bytes = serde_json::to_vec(&raw_station()).unwrap();
        handler(raw(0, &bytes)).unwrap();

        assert_eq!(table.get(41400).unwrap().line, "red");
        assert_eq!(rx.try_recv().unwrap().station_name, "Roosevelt");

        drop(rx);
        let err = handler(raw(1, &bytes)).unwrap_err();
        assert!(matches!(err, TributaryError::Handler { .. }));
    }

    #[test]
    fn test_default_pattern_matches_only_input_topic() {
        let settings = default_consumer_settings();
        let matcher = TopicMatcher::compile(&settings.topic_pattern).unwrap();
        assert!(matcher.matches(INPUT_TOPIC));
        assert!(!matcher.matches(OUTPUT_TOPIC));
        assert!(settings.offset_earliest);
    }
}
