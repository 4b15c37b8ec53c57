//! Broker client trait definitions.
//!
//! Wire protocol handling lives behind these traits; the consume loop and the
//! topic provisioner only ever talk to them.

use crate::TributaryError;
use crate::types::{
    ClusterMetadata, DeliveryReport, InboundRecord, OutboundRecord, PartitionAssignment,
    Subscription, TopicCreateOutcome, TopicSpec,
};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Receives partition (re)assignments from a broker client.
///
/// Called synchronously from inside the client's callback dispatch, so
/// implementations must return quickly.
pub trait RebalanceListener: Send + Sync {
    /// Takes the broker-default assignment and returns the one to accept.
    fn on_assign(&self, broker_default: PartitionAssignment) -> PartitionAssignment;

    fn on_revoke(&self, _revoked: &PartitionAssignment) {}
}

#[async_trait]
pub trait ConsumerClient: Send {
    /// Join the subscription's group. Must not wait for an assignment.
    fn subscribe(
        &mut self,
        subscription: &Subscription,
        listener: Arc<dyn RebalanceListener>,
    ) -> Result<(), TributaryError>;

    /// Return at most one record, or `None` if nothing arrived within `timeout`.
    async fn poll(&mut self, timeout: Duration) -> Result<Option<InboundRecord>, TributaryError>;

    /// Replace the current assignment with explicit offsets.
    fn assign(&mut self, assignment: &PartitionAssignment) -> Result<(), TributaryError>;

    /// Leave the group and release connection resources.
    fn close(&mut self) -> Result<(), TributaryError>;
}

#[async_trait]
pub trait AdminClient: Send + Sync {
    async fn fetch_metadata(&self, timeout: Duration) -> Result<ClusterMetadata, TributaryError>;

    /// Request creation of every listed topic; each gets its own outcome.
    async fn create_topics(
        &self,
        specs: &[TopicSpec],
        timeout: Duration,
    ) -> Result<Vec<TopicCreateOutcome>, TributaryError>;
}

#[async_trait]
pub trait ProducerClient: Send + Sync {
    async fn send(
        &self,
        record: OutboundRecord,
        timeout: Duration,
    ) -> Result<DeliveryReport, TributaryError>;

    async fn flush(&self, timeout: Duration) -> Result<(), TributaryError>;
}
