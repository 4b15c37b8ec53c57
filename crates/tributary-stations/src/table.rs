use crate::models::TransformedStation;
use dashmap::DashMap;
use std::sync::Arc;

/// Latest transformed record per station id.
#[derive(Debug, Clone, Default)]
pub struct StationTable {
    stations: Arc<DashMap<i32, TransformedStation>>,
}

impl StationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `station`, returning the version it replaced.
    pub fn upsert(&self, station: TransformedStation) -> Option<TransformedStation> {
        self.stations.insert(station.station_id, station)
    }

    pub fn get(&self, station_id: i32) -> Option<TransformedStation> {
        self.stations.get(&station_id).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.stations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stations.is_empty()
    }

    /// All stations ordered by id.
    pub fn snapshot(&self) -> Vec<TransformedStation> {
        let mut stations: Vec<TransformedStation> =
            self.stations.iter().map(|entry| entry.value().clone()).collect();
        stations.sort_by_key(|s| s.station_id);
        stations
    }
}
