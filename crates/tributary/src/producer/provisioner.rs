//! Check-or-create topic provisioning.

use super::registry::TopicRegistry;
use crate::TributaryError;
use crate::broker::AdminClient;
use crate::config::ProvisionerSettings;
use crate::types::TopicSpec;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// How a topic came to be registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionOutcome {
    /// Registered earlier in this process; no broker call was made.
    AlreadyRegistered,
    /// The broker already had the topic.
    Existing,
    Created,
    /// Creation was rejected because someone else created it first.
    CreatedConcurrently,
}

pub struct TopicProvisioner {
    admin: Arc<dyn AdminClient>,
    registry: TopicRegistry,
    settings: ProvisionerSettings,
}

impl TopicProvisioner {
    pub fn new(
        admin: Arc<dyn AdminClient>,
        registry: TopicRegistry,
        settings: ProvisionerSettings,
    ) -> Self {
        Self {
            admin,
            registry,
            settings,
        }
    }

    pub fn registry(&self) -> &TopicRegistry {
        &self.registry
    }

    /// Make sure `spec.name` exists on the broker, at most once per registry.
    ///
    /// A failed creation leaves the topic unregistered so a retry checks again.
    pub async fn ensure(&self, spec: &TopicSpec) -> Result<ProvisionOutcome, TributaryError> {
        if self.registry.contains(&spec.name) {
            return Ok(ProvisionOutcome::AlreadyRegistered);
        }
        spec.validate()?;

        let metadata_timeout = self.settings.metadata_timeout();
        let metadata = tokio::time::timeout(metadata_timeout, self.admin.fetch_metadata(metadata_timeout))
            .await
            .map_err(|_| provisioning_error(spec, "timed out fetching topic metadata"))?
            .map_err(|e| provisioning_error(spec, e))?;

        if metadata.contains(&spec.name) {
            info!(topic = %spec.name, "{} already exists on the broker", spec.name);
            self.register(spec);
            return Ok(ProvisionOutcome::Existing);
        }

        let create_timeout = self.settings.create_timeout();
        let outcomes = tokio::time::timeout(
            create_timeout,
            self.admin.create_topics(std::slice::from_ref(spec), create_timeout),
        )
        .await
        .map_err(|_| provisioning_error(spec, "timed out creating topic"))?
        .map_err(|e| provisioning_error(spec, e))?;

        let result = outcomes
            .into_iter()
            .find(|outcome| outcome.topic == spec.name)
            .map(|outcome| outcome.result)
            .ok_or_else(|| provisioning_error(spec, "broker returned no creation result"))?;

        match result {
            Ok(()) => {
                info!(
                    topic = %spec.name,
                    partitions = spec.partitions,
                    replication = spec.replication_factor,
                    "topic {} created",
                    spec.name
                );
                self.register(spec);
                Ok(ProvisionOutcome::Created)
            }
            Err(e) if e.is_already_exists() => {
                warn!(topic = %spec.name, "topic created concurrently by another client: {e}");
                self.register(spec);
                Ok(ProvisionOutcome::CreatedConcurrently)
            }
            Err(e) => Err(provisioning_error(spec, e)),
        }
    }

    fn register(&self, spec: &TopicSpec) {
        if self.registry.insert(&spec.name) {
            debug!(topic = %spec.name, "topic registered");
        }
    }
}

fn provisioning_error(spec: &TopicSpec, reason: impl ToString) -> TributaryError {
    TributaryError::Provisioning {
        topic: spec.name.clone(),
        reason: reason.to_string(),
    }
}
