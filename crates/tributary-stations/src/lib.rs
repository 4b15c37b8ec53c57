//! Chicago transit stations stream.
//!
//! Reads raw station rows, reduces each to its id, name, order and line
//! colour, keeps the latest version per station in a table and republishes it.

pub mod demo;
pub mod models;
pub mod pipeline;
pub mod schemas;
pub mod table;

pub use models::{Line, Station, TransformedStation};
pub use pipeline::{INPUT_TOPIC, OUTPUT_TOPIC, PipelineReport, StationsPipeline};
pub use table::StationTable;
