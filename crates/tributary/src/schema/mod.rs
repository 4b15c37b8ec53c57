//! Record schemas, the schema registry seam and the wire codec.

pub mod codec;
pub mod registry;
pub mod types;

pub use codec::{MAGIC_BYTE, RecordCodec, RecordOrigin};
pub use registry::{InMemorySchemaRegistry, SchemaId, SchemaRegistry};
pub use types::{Field, FieldType, Schema};
