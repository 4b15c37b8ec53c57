//! Configuration data structures.
//!
//! Durations are stored as milliseconds so files stay readable in both JSON
//! and YAML; accessors convert them to [`Duration`].

use crate::TributaryError;
use crate::types::{OffsetPolicy, TopicSpec};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

fn default_group_id() -> String {
    "0".to_string()
}

fn default_poll_timeout_ms() -> u64 {
    100
}

fn default_idle_sleep_ms() -> u64 {
    1_000
}

fn default_true() -> bool {
    true
}

fn default_metadata_timeout_ms() -> u64 {
    5_000
}

fn default_create_timeout_ms() -> u64 {
    30_000
}

fn default_send_timeout_ms() -> u64 {
    5_000
}

fn default_one_u32() -> u32 {
    1
}

fn default_one_u16() -> u16 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerConfig {
    pub bootstrap_servers: Vec<String>,
    #[serde(default)]
    pub schema_registry_url: Option<String>,
    #[serde(default = "default_group_id")]
    pub group_id: String,
}

impl BrokerConfig {
    pub fn new(bootstrap_servers: Vec<String>) -> Self {
        Self {
            bootstrap_servers,
            schema_registry_url: None,
            group_id: default_group_id(),
        }
    }

    /// Comma-separated form expected by client libraries.
    pub fn bootstrap_servers_string(&self) -> String {
        self.bootstrap_servers.join(",")
    }

    pub fn validate(&self) -> Result<(), TributaryError> {
        if self.bootstrap_servers.iter().all(|s| s.trim().is_empty()) {
            return Err(TributaryError::invalid_config(
                "bootstrap_servers",
                "at least one server is required",
            ));
        }
        if self.group_id.is_empty() {
            return Err(TributaryError::invalid_config("group_id", "must not be empty"));
        }
        Ok(())
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self::new(vec!["localhost:9092".to_string()])
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsumerSettings {
    pub topic_pattern: String,
    #[serde(default)]
    pub offset_earliest: bool,
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
    #[serde(default = "default_idle_sleep_ms")]
    pub idle_sleep_ms: u64,
    /// Decode payloads through the schema registry before handing them over.
    #[serde(default = "default_true")]
    pub decode: bool,
}

impl ConsumerSettings {
    pub fn new(topic_pattern: impl Into<String>) -> Self {
        Self {
            topic_pattern: topic_pattern.into(),
            offset_earliest: false,
            poll_timeout_ms: default_poll_timeout_ms(),
            idle_sleep_ms: default_idle_sleep_ms(),
            decode: true,
        }
    }

    pub fn with_offset_earliest(mut self, offset_earliest: bool) -> Self {
        self.offset_earliest = offset_earliest;
        self
    }

    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_idle_sleep(mut self, sleep: Duration) -> Self {
        self.idle_sleep_ms = sleep.as_millis() as u64;
        self
    }

    pub fn with_decode(mut self, decode: bool) -> Self {
        self.decode = decode;
        self
    }

    pub fn offset_policy(&self) -> OffsetPolicy {
        OffsetPolicy::from_earliest_flag(self.offset_earliest)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn idle_sleep(&self) -> Duration {
        Duration::from_millis(self.idle_sleep_ms)
    }

    pub fn validate(&self) -> Result<(), TributaryError> {
        if self.topic_pattern.trim().is_empty() {
            return Err(TributaryError::invalid_config(
                "topic_pattern",
                "must not be empty",
            ));
        }
        // A zero poll timeout is a legal non-blocking poll; a zero idle sleep
        // would spin on an empty topic.
        if self.idle_sleep_ms == 0 {
            return Err(TributaryError::invalid_config(
                "idle_sleep_ms",
                "must be greater than zero",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisionerSettings {
    #[serde(default = "default_metadata_timeout_ms")]
    pub metadata_timeout_ms: u64,
    #[serde(default = "default_create_timeout_ms")]
    pub create_timeout_ms: u64,
}

impl ProvisionerSettings {
    pub fn metadata_timeout(&self) -> Duration {
        Duration::from_millis(self.metadata_timeout_ms)
    }

    pub fn create_timeout(&self) -> Duration {
        Duration::from_millis(self.create_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), TributaryError> {
        if self.metadata_timeout_ms == 0 {
            return Err(TributaryError::invalid_config(
                "metadata_timeout_ms",
                "must be greater than zero",
            ));
        }
        if self.create_timeout_ms == 0 {
            return Err(TributaryError::invalid_config(
                "create_timeout_ms",
                "must be greater than zero",
            ));
        }
        Ok(())
    }
}

impl Default for ProvisionerSettings {
    fn default() -> Self {
        Self {
            metadata_timeout_ms: default_metadata_timeout_ms(),
            create_timeout_ms: default_create_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProducerSettings {
    pub topic_name: String,
    #[serde(default = "default_one_u32")]
    pub num_partitions: u32,
    #[serde(default = "default_one_u16")]
    pub num_replicas: u16,
    #[serde(default)]
    pub topic_config: BTreeMap<String, String>,
    /// Registry subject for keys; defaults to `<topic>-key`.
    #[serde(default)]
    pub key_subject: Option<String>,
    /// Registry subject for values; defaults to `<topic>-value`.
    #[serde(default)]
    pub value_subject: Option<String>,
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,
}

impl ProducerSettings {
    pub fn new(topic_name: impl Into<String>) -> Self {
        Self {
            topic_name: topic_name.into(),
            num_partitions: 1,
            num_replicas: 1,
            topic_config: BTreeMap::new(),
            key_subject: None,
            value_subject: None,
            send_timeout_ms: default_send_timeout_ms(),
        }
    }

    pub fn with_layout(mut self, num_partitions: u32, num_replicas: u16) -> Self {
        self.num_partitions = num_partitions;
        self.num_replicas = num_replicas;
        self
    }

    pub fn topic_spec(&self) -> Result<TopicSpec, TributaryError> {
        let mut spec = TopicSpec::new(&self.topic_name, self.num_partitions, self.num_replicas)?;
        spec.config = self.topic_config.clone();
        Ok(spec)
    }

    pub fn key_subject(&self) -> String {
        self.key_subject
            .clone()
            .unwrap_or_else(|| format!("{}-key", self.topic_name))
    }

    pub fn value_subject(&self) -> String {
        self.value_subject
            .clone()
            .unwrap_or_else(|| format!("{}-value", self.topic_name))
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), TributaryError> {
        self.topic_spec()?;
        if self.send_timeout_ms == 0 {
            return Err(TributaryError::invalid_config(
                "send_timeout_ms",
                "must be greater than zero",
            ));
        }
        Ok(())
    }
}

/// Top-level configuration file layout.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TributaryConfig {
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub consumer: Option<ConsumerSettings>,
    #[serde(default)]
    pub provisioner: ProvisionerSettings,
    #[serde(default)]
    pub producer: Option<ProducerSettings>,
}

impl TributaryConfig {
    pub fn validate(&self) -> Result<(), TributaryError> {
        self.broker.validate()?;
        self.provisioner.validate()?;
        if let Some(consumer) = &self.consumer {
            consumer.validate()?;
        }
        if let Some(producer) = &self.producer {
            producer.validate()?;
        }
        Ok(())
    }
}
