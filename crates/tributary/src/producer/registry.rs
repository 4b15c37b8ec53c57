use dashmap::DashSet;
use std::sync::Arc;

/// Topics known to exist, shared by every producer that holds a clone.
///
/// Membership only grows. Inserting an existing name is a no-op that reports
/// `false`, which keeps concurrent provisioners from double-counting.
#[derive(Debug, Clone, Default)]
pub struct TopicRegistry {
    topics: Arc<DashSet<String>>,
}

impl TopicRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, topic: &str) -> bool {
        self.topics.contains(topic)
    }

    /// Returns true if the topic was not registered before.
    pub fn insert(&self, topic: &str) -> bool {
        self.topics.insert(topic.to_string())
    }

    pub fn len(&self) -> usize {
        self.topics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }

    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.topics.iter().map(|t| t.key().clone()).collect();
        topics.sort();
        topics
    }
}
