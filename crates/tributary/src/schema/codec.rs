//! Registry-framed record encoding.
//!
//! Wire layout: one magic byte (`0x00`), the schema id as a big-endian `u32`,
//! then the record as compact JSON.

use super::registry::{SchemaId, SchemaRegistry};
use super::types::Schema;
use crate::TributaryError;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;

pub const MAGIC_BYTE: u8 = 0x00;
const HEADER_LEN: usize = 5;

/// Where a payload came from, for decode error reporting.
#[derive(Debug, Clone, Copy)]
pub struct RecordOrigin<'a> {
    pub topic: &'a str,
    pub partition: u32,
    pub offset: i64,
}

pub struct RecordCodec {
    registry: Arc<dyn SchemaRegistry>,
    schemas: DashMap<SchemaId, Arc<Schema>>,
}

impl RecordCodec {
    pub fn new(registry: Arc<dyn SchemaRegistry>) -> Self {
        Self {
            registry,
            schemas: DashMap::new(),
        }
    }

    /// Validate `value` against `schema` and frame it with `id`.
    pub fn encode(&self, id: SchemaId, schema: &Schema, value: &Value) -> Result<Vec<u8>, TributaryError> {
        schema.validate(value)?;
        let body = serde_json::to_vec(value).map_err(|e| TributaryError::Schema {
            schema: schema.name().to_string(),
            reason: e.to_string(),
        })?;

        let mut framed = Vec::with_capacity(HEADER_LEN + body.len());
        framed.push(MAGIC_BYTE);
        framed.extend_from_slice(&id.0.to_be_bytes());
        framed.extend_from_slice(&body);
        Ok(framed)
    }

    /// Resolve the framed schema id and return the validated record.
    pub async fn decode(&self, origin: RecordOrigin<'_>, bytes: &[u8]) -> Result<Value, TributaryError> {
        let decode_error = |reason: String| TributaryError::Decode {
            topic: origin.topic.to_string(),
            partition: origin.partition,
            offset: origin.offset,
            reason,
        };

        let (id, body) = split_frame(bytes).map_err(decode_error)?;
        let schema = self.schema(id).await.map_err(|e| decode_error(e.to_string()))?;
        let value: Value = serde_json::from_slice(body).map_err(|e| decode_error(e.to_string()))?;
        schema
            .validate(&value)
            .map_err(|e| decode_error(e.to_string()))?;
        Ok(value)
    }

    async fn schema(&self, id: SchemaId) -> Result<Arc<Schema>, TributaryError> {
        let cached = self.schemas.get(&id).map(|entry| Arc::clone(entry.value()));
        if let Some(schema) = cached {
            return Ok(schema);
        }
        let schema = Arc::new(self.registry.schema_by_id(id).await?);
        self.schemas.insert(id, Arc::clone(&schema));
        Ok(schema)
    }
}

fn split_frame(bytes: &[u8]) -> Result<(SchemaId, &[u8]), String> {
    if bytes.len() < HEADER_LEN {
        return Err(format!("payload of {} bytes is shorter than the header", bytes.len()));
    }
    if bytes[0] != MAGIC_BYTE {
        return Err(format!("unknown magic byte {:#04x}", bytes[0]));
    }
    let id = u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]);
    Ok((SchemaId(id), &bytes[HEADER_LEN..]))
}
