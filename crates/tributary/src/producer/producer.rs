use super::provisioner::TopicProvisioner;
use crate::TributaryError;
use crate::broker::ProducerClient;
use crate::config::ProducerSettings;
use crate::schema::{RecordCodec, Schema, SchemaId, SchemaRegistry};
use crate::types::{DeliveryReport, OutboundRecord, TopicSpec};
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info};

/// Milliseconds since the Unix epoch, the conventional event key.
pub fn time_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Key schema and optional value schema for one topic.
#[derive(Debug, Clone)]
pub struct ProducerSchemas {
    pub key: Schema,
    pub value: Option<Schema>,
}

impl ProducerSchemas {
    pub fn new(key: Schema, value: Schema) -> Self {
        Self {
            key,
            value: Some(value),
        }
    }

    pub fn key_only(key: Schema) -> Self {
        Self { key, value: None }
    }
}

#[derive(Debug)]
struct RegisteredSchema {
    id: SchemaId,
    schema: Schema,
}

/// Writes schema-validated records to a single topic.
///
/// Construction provisions the topic and registers both schemas, so a
/// `Producer` that exists is ready to send.
pub struct Producer {
    topic: TopicSpec,
    client: Arc<dyn ProducerClient>,
    codec: RecordCodec,
    key: RegisteredSchema,
    value: Option<RegisteredSchema>,
    send_timeout: Duration,
    closed: AtomicBool,
}

impl Producer {
    pub async fn new(
        settings: &ProducerSettings,
        schemas: ProducerSchemas,
        provisioner: &TopicProvisioner,
        client: Arc<dyn ProducerClient>,
        schema_registry: Arc<dyn SchemaRegistry>,
    ) -> Result<Self, TributaryError> {
        settings.validate()?;
        let topic = settings.topic_spec()?;
        provisioner.ensure(&topic).await?;

        let key = RegisteredSchema {
            id: schema_registry
                .register(&settings.key_subject(), &schemas.key)
                .await?,
            schema: schemas.key,
        };
        let value = match schemas.value {
            Some(schema) => Some(RegisteredSchema {
                id: schema_registry
                    .register(&settings.value_subject(), &schema)
                    .await?,
                schema,
            }),
            None => None,
        };
        debug!(topic = %topic.name, key_schema = %key.id, "producer ready");

        Ok(Self {
            topic,
            client,
            codec: RecordCodec::new(schema_registry),
            key,
            value,
            send_timeout: settings.send_timeout(),
            closed: AtomicBool::new(false),
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic.name
    }

    /// Encode and deliver one record, waiting for the broker's acknowledgement.
    pub async fn send(&self, key: &Value, value: Option<&Value>) -> Result<DeliveryReport, TributaryError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TributaryError::closed("Producer"));
        }

        let key_bytes = self.codec.encode(self.key.id, &self.key.schema, key)?;
        let value_bytes = match (value, &self.value) {
            (Some(value), Some(registered)) => {
                Some(self.codec.encode(registered.id, &registered.schema, value)?)
            }
            (Some(_), None) => {
                return Err(TributaryError::Schema {
                    schema: self.topic.name.clone(),
                    reason: "producer has no value schema".to_string(),
                });
            }
            (None, _) => None,
        };

        let mut record = OutboundRecord::new(&self.topic.name, Some(key_bytes), value_bytes);
        record.timestamp_ms = Some(time_millis());
        self.client.send(record, self.send_timeout).await
    }

    pub async fn flush(&self) -> Result<(), TributaryError> {
        self.client.flush(self.send_timeout).await
    }

    /// Flush outstanding records. Later sends fail with `Closed`.
    pub async fn close(&self) -> Result<(), TributaryError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.flush().await?;
        info!(topic = %self.topic.name, "producer closed");
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
