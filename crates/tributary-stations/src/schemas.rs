//! Record schemas for the stations topics.

use tributary::TributaryError;
use tributary::schema::Schema;

const STATION: &str = r#"{
    "namespace": "org.chicago.transit",
    "type": "record",
    "name": "station",
    "fields": [
        {"name": "stop_id", "type": "int"},
        {"name": "direction_id", "type": "string"},
        {"name": "stop_name", "type": "string"},
        {"name": "station_name", "type": "string"},
        {"name": "station_descriptive_name", "type": "string"},
        {"name": "station_id", "type": "int"},
        {"name": "order", "type": "int"},
        {"name": "red", "type": "boolean"},
        {"name": "blue", "type": "boolean"},
        {"name": "green", "type": "boolean"}
    ]
}"#;

const TRANSFORMED_STATION: &str = r#"{
    "namespace": "org.chicago.transit",
    "type": "record",
    "name": "transformed_station",
    "fields": [
        {"name": "station_id", "type": "int"},
        {"name": "station_name", "type": "string"},
        {"name": "order", "type": "int"},
        {"name": "line", "type": "string"}
    ]
}"#;

pub fn station() -> Result<Schema, TributaryError> {
    Schema::parse(STATION)
}

pub fn transformed_station() -> Result<Schema, TributaryError> {
    Schema::parse(TRANSFORMED_STATION)
}
