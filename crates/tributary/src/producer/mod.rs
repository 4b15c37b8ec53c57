//! Schema-validated production with lazy topic provisioning.

pub mod producer;
pub mod provisioner;
pub mod registry;

pub use producer::{Producer, ProducerSchemas, time_millis};
pub use provisioner::{ProvisionOutcome, TopicProvisioner};
pub use registry::TopicRegistry;
