//! Partition assignment policy and state.

use crate::broker::RebalanceListener;
use crate::types::{Offset, OffsetPolicy, PartitionAssignment, Subscription};
use parking_lot::Mutex;
use tracing::{debug, info};

/// The assignment a consumer accepts for a broker-proposed one.
///
/// `Earliest` restarts every partition at the beginning of its log; `Latest`
/// keeps the broker's offsets untouched.
pub fn effective_assignment(
    policy: OffsetPolicy,
    broker_default: PartitionAssignment,
) -> PartitionAssignment {
    match policy {
        OffsetPolicy::Earliest => broker_default.with_offset(Offset::Beginning),
        OffsetPolicy::Latest => broker_default,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignmentState {
    /// Joined the group, nothing assigned yet (or the last assignment was revoked).
    Subscribed,
    Assigning,
    Assigned,
}

#[derive(Debug)]
struct TrackerState {
    state: AssignmentState,
    current: PartitionAssignment,
    generation: u64,
}

/// Rebalance listener that applies [`effective_assignment`] and records the result.
#[derive(Debug)]
pub struct AssignmentTracker {
    topic_pattern: String,
    policy: OffsetPolicy,
    inner: Mutex<TrackerState>,
}

impl AssignmentTracker {
    pub fn new(subscription: &Subscription) -> Self {
        Self {
            topic_pattern: subscription.topic_pattern.clone(),
            policy: subscription.offset_policy,
            inner: Mutex::new(TrackerState {
                state: AssignmentState::Subscribed,
                current: PartitionAssignment::empty(),
                generation: 0,
            }),
        }
    }

    pub fn state(&self) -> AssignmentState {
        self.inner.lock().state
    }

    pub fn current(&self) -> PartitionAssignment {
        self.inner.lock().current.clone()
    }

    /// Number of assignments accepted so far.
    pub fn generation(&self) -> u64 {
        self.inner.lock().generation
    }
}

impl RebalanceListener for AssignmentTracker {
    fn on_assign(&self, broker_default: PartitionAssignment) -> PartitionAssignment {
        self.inner.lock().state = AssignmentState::Assigning;

        let effective = effective_assignment(self.policy, broker_default);

        let mut inner = self.inner.lock();
        inner.state = AssignmentState::Assigned;
        inner.current = effective.clone();
        inner.generation += 1;
        drop(inner);

        info!(
            pattern = %self.topic_pattern,
            partitions = effective.len(),
            "partitions assigned for {}",
            self.topic_pattern
        );
        effective
    }

    fn on_revoke(&self, revoked: &PartitionAssignment) {
        let mut inner = self.inner.lock();
        inner.state = AssignmentState::Subscribed;
        inner.current = PartitionAssignment::empty();
        debug!(pattern = %self.topic_pattern, partitions = revoked.len(), "partitions revoked");
    }
}
