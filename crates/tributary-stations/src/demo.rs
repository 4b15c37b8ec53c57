//! A handful of real stations for running the stream without a feed.

use crate::models::Station;
use crate::pipeline::INPUT_TOPIC;
use crate::schemas;
use serde_json::Value;
use std::sync::Arc;
use tributary::schema::{Schema, SchemaRegistry};
use tributary::{
    BrokerBackend, Producer, ProducerSchemas, ProducerSettings, ProvisionerSettings,
    TopicProvisioner, TopicRegistry, TributaryError,
};

#[allow(clippy::too_many_arguments)]
fn station(
    stop_id: i32,
    direction_id: &str,
    stop_name: &str,
    station_name: &str,
    station_descriptive_name: &str,
    station_id: i32,
    order: i32,
    (red, blue, green): (bool, bool, bool),
) -> Station {
    Station {
        stop_id,
        direction_id: direction_id.to_string(),
        stop_name: stop_name.to_string(),
        station_name: station_name.to_string(),
        station_descriptive_name: station_descriptive_name.to_string(),
        station_id,
        order,
        red,
        blue,
        green,
    }
}

pub fn stations() -> Vec<Station> {
    vec![
        station(
            30074, "E", "Clark/Lake (Loop-bound)", "Clark/Lake",
            "Clark/Lake (Blue, Brown, Green, Orange, Purple & Pink lines)", 40380, 12,
            (false, true, true),
        ),
        station(
            30072, "S", "Washington (Forest Pk-bound)", "Washington/Dearborn",
            "Washington/Dearborn (Blue Line)", 40370, 13, (false, true, false),
        ),
        station(
            30162, "N", "Roosevelt (Howard-bound)", "Roosevelt",
            "Roosevelt (Red, Orange & Green lines)", 41400, 3, (true, false, true),
        ),
        station(
            30050, "E", "State/Lake (Loop-bound)", "State/Lake",
            "State/Lake (Brown, Green, Orange, Pink & Purple lines)", 40260, 14,
            (false, false, true),
        ),
        station(
            30255, "S", "Belmont (95th-bound)", "Belmont",
            "Belmont (Red, Brown & Purple lines)", 41320, 21, (true, false, false),
        ),
    ]
}

/// Produce the demo stations to the input topic, keyed by station id.
pub async fn seed(
    backend: &BrokerBackend,
    schema_registry: Arc<dyn SchemaRegistry>,
    topics: TopicRegistry,
) -> Result<usize, TributaryError> {
    let provisioner = TopicProvisioner::new(backend.admin()?, topics, ProvisionerSettings::default());
    let producer = Producer::new(
        &ProducerSettings::new(INPUT_TOPIC),
        ProducerSchemas::new(Schema::string(), schemas::station()?),
        &provisioner,
        backend.producer()?,
        schema_registry,
    )
    .await?;

    let stations = stations();
    for station in &stations {
        let value = serde_json::to_value(station).map_err(|e| TributaryError::Schema {
            schema: INPUT_TOPIC.to_string(),
            reason: e.to_string(),
        })?;
        producer
            .send(&Value::String(station.station_id.to_string()), Some(&value))
            .await?;
    }
    producer.close().await?;
    Ok(stations.len())
}
