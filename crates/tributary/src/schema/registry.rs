//! Schema registry seam and an in-memory implementation.

use super::types::Schema;
use crate::TributaryError;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SchemaId(pub u32);

impl fmt::Display for SchemaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for SchemaId {
    fn from(id: u32) -> Self {
        SchemaId(id)
    }
}

#[async_trait]
pub trait SchemaRegistry: Send + Sync {
    /// Register `schema` under `subject`, returning its id. Registering an
    /// identical schema again returns the existing id.
    async fn register(&self, subject: &str, schema: &Schema) -> Result<SchemaId, TributaryError>;

    async fn schema_by_id(&self, id: SchemaId) -> Result<Schema, TributaryError>;
}

#[derive(Debug)]
struct RegistryState {
    schemas: Vec<Schema>,
    subjects: HashMap<String, Vec<SchemaId>>,
    available: bool,
}

/// Process-local registry. Ids are sequential from 1 and shared across subjects.
#[derive(Debug, Clone)]
pub struct InMemorySchemaRegistry {
    inner: Arc<RwLock<RegistryState>>,
}

impl Default for InMemorySchemaRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemorySchemaRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(RegistryState {
                schemas: Vec::new(),
                subjects: HashMap::new(),
                available: true,
            })),
        }
    }

    /// Simulate the registry going away; every call fails while unavailable.
    pub fn set_available(&self, available: bool) {
        self.inner.write().available = available;
    }

    pub fn versions(&self, subject: &str) -> Vec<SchemaId> {
        self.inner
            .read()
            .subjects
            .get(subject)
            .cloned()
            .unwrap_or_default()
    }

    fn unavailable(context: &str) -> TributaryError {
        TributaryError::from_registry_error("registry unreachable", context)
    }
}

#[async_trait]
impl SchemaRegistry for InMemorySchemaRegistry {
    async fn register(&self, subject: &str, schema: &Schema) -> Result<SchemaId, TributaryError> {
        let mut state = self.inner.write();
        if !state.available {
            return Err(Self::unavailable(subject));
        }

        let id = match state
            .schemas
            .iter()
            .position(|existing| existing.canonical() == schema.canonical())
        {
            Some(index) => SchemaId(index as u32 + 1),
            None => {
                state.schemas.push(schema.clone());
                SchemaId(state.schemas.len() as u32)
            }
        };

        let versions = state.subjects.entry(subject.to_string()).or_default();
        if !versions.contains(&id) {
            versions.push(id);
            debug!(subject, %id, "schema registered");
        }
        Ok(id)
    }

    async fn schema_by_id(&self, id: SchemaId) -> Result<Schema, TributaryError> {
        let state = self.inner.read();
        if !state.available {
            return Err(Self::unavailable("schema lookup"));
        }
        id.0.checked_sub(1)
            .and_then(|index| state.schemas.get(index as usize))
            .cloned()
            .ok_or_else(|| TributaryError::from_registry_error(format!("unknown schema id {id}"), "schema lookup"))
    }
}
