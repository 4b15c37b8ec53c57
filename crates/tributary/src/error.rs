use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum TributaryError {
    InvalidConfig {
        field: String,
        reason: String,
    },
    /// Configuration file could not be read or parsed.
    Config {
        context: String,
        reason: String,
    },
    /// Operation attempted on a component after `close()`.
    Closed {
        component: &'static str,
    },
    NotSubscribed,
    /// Payload failed schema validation or deserialization.
    Decode {
        topic: String,
        partition: u32,
        offset: i64,
        reason: String,
    },
    /// Topic metadata query or creation failed for a reason other than a lost race.
    Provisioning {
        topic: String,
        reason: String,
    },
    SchemaRegistry {
        context: String,
        reason: String,
    },
    /// Encode-side validation against a record schema failed.
    Schema {
        schema: String,
        reason: String,
    },
    Delivery {
        topic: String,
        reason: String,
    },
    Timeout {
        operation: String,
    },
    /// Error reported by a message handler.
    Handler {
        reason: String,
    },
    Broker(BrokerError),
}

/// Error reported by the broker client for a single request or record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerError {
    pub code: BrokerErrorCode,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BrokerErrorCode {
    TopicAlreadyExists,
    UnknownTopicOrPartition,
    LeaderNotAvailable,
    NotLeaderForPartition,
    RequestTimedOut,
    BrokerNotAvailable,
    PolicyViolation,
    InvalidPartitions,
    InvalidReplicationFactor,
    TopicAuthorizationFailed,
    GroupAuthorizationFailed,
    PartitionEof,
    Unknown,
}

impl fmt::Display for TributaryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TributaryError::InvalidConfig { field, reason } => {
                write!(f, "Invalid configuration for '{field}': {reason}")
            }
            TributaryError::Config { context, reason } => {
                write!(f, "Configuration error in {context}: {reason}")
            }
            TributaryError::Closed { component } => {
                write!(f, "{component} is closed")
            }
            TributaryError::NotSubscribed => write!(f, "Consumer is not subscribed"),
            TributaryError::Decode {
                topic,
                partition,
                offset,
                reason,
            } => {
                write!(
                    f,
                    "Failed to decode record at {topic}[{partition}]@{offset}: {reason}"
                )
            }
            TributaryError::Provisioning { topic, reason } => {
                write!(f, "Failed to provision topic '{topic}': {reason}")
            }
            TributaryError::SchemaRegistry { context, reason } => {
                write!(f, "Schema registry error in {context}: {reason}")
            }
            TributaryError::Schema { schema, reason } => {
                write!(f, "Record does not match schema '{schema}': {reason}")
            }
            TributaryError::Delivery { topic, reason } => {
                write!(f, "Failed to deliver record to '{topic}': {reason}")
            }
            TributaryError::Timeout { operation } => {
                write!(f, "Timed out waiting for {operation}")
            }
            TributaryError::Handler { reason } => write!(f, "Message handler failed: {reason}"),
            TributaryError::Broker(err) => write!(f, "Broker error: {err}"),
        }
    }
}

impl fmt::Display for BrokerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.code)
        } else {
            write!(f, "{}: {}", self.code, self.message)
        }
    }
}

impl fmt::Display for BrokerErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BrokerErrorCode::TopicAlreadyExists => "topic already exists",
            BrokerErrorCode::UnknownTopicOrPartition => "unknown topic or partition",
            BrokerErrorCode::LeaderNotAvailable => "leader not available",
            BrokerErrorCode::NotLeaderForPartition => "not leader for partition",
            BrokerErrorCode::RequestTimedOut => "request timed out",
            BrokerErrorCode::BrokerNotAvailable => "broker not available",
            BrokerErrorCode::PolicyViolation => "policy violation",
            BrokerErrorCode::InvalidPartitions => "invalid partitions",
            BrokerErrorCode::InvalidReplicationFactor => "invalid replication factor",
            BrokerErrorCode::TopicAuthorizationFailed => "topic authorization failed",
            BrokerErrorCode::GroupAuthorizationFailed => "group authorization failed",
            BrokerErrorCode::PartitionEof => "partition end of file",
            BrokerErrorCode::Unknown => "unknown broker error",
        };
        f.write_str(name)
    }
}

impl std::error::Error for TributaryError {}
impl std::error::Error for BrokerError {}

impl TributaryError {
    /// Errors that indicate a contract violation and must reach the caller.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            TributaryError::Decode { .. }
                | TributaryError::Provisioning { .. }
                | TributaryError::Schema { .. }
                | TributaryError::InvalidConfig { .. }
                | TributaryError::Config { .. }
                | TributaryError::Closed { .. }
        )
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            TributaryError::Timeout { .. } => true,
            TributaryError::Broker(err) => err.code.is_retryable(),
            _ => false,
        }
    }

    pub fn closed(component: &'static str) -> Self {
        TributaryError::Closed { component }
    }

    pub fn from_config_error(e: impl fmt::Display, context: &str) -> Self {
        TributaryError::Config {
            context: context.to_string(),
            reason: e.to_string(),
        }
    }

    pub fn from_registry_error(e: impl fmt::Display, context: &str) -> Self {
        TributaryError::SchemaRegistry {
            context: context.to_string(),
            reason: e.to_string(),
        }
    }

    pub fn invalid_config(field: &str, reason: impl Into<String>) -> Self {
        TributaryError::InvalidConfig {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

impl BrokerError {
    pub fn new(code: BrokerErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn is_already_exists(&self) -> bool {
        self.code == BrokerErrorCode::TopicAlreadyExists
    }
}

impl BrokerErrorCode {
    /// Codes that will not go away by retrying, e.g. missing ACLs.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            BrokerErrorCode::TopicAuthorizationFailed
                | BrokerErrorCode::GroupAuthorizationFailed
                | BrokerErrorCode::PolicyViolation
                | BrokerErrorCode::InvalidReplicationFactor
                | BrokerErrorCode::InvalidPartitions
        )
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BrokerErrorCode::LeaderNotAvailable
                | BrokerErrorCode::NotLeaderForPartition
                | BrokerErrorCode::RequestTimedOut
                | BrokerErrorCode::BrokerNotAvailable
        )
    }
}

impl From<BrokerError> for TributaryError {
    fn from(err: BrokerError) -> Self {
        TributaryError::Broker(err)
    }
}
