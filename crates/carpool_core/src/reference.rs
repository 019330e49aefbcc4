//! Reference data shared by every instance: the place graph, the
//! place-to-station proximity map and the destination distance table.
//!
//! # CSV formats
//!
//! Distances, one undirected edge per row:
//!
//! ```csv
//! node1,node2,distance
//! A,B,12.5
//! B,C,4
//! ```
//!
//! Nearby stations, one place per row; rows with a blank station are skipped:
//!
//! ```csv
//! city_point,near_metro_dropoff
//! A,S1
//! B,
//! ```

use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

use carpool_contracts::storage_keys::{
    DESTINATION_DISTANCES_KEY, NEARBY_STATIONS_KEY, PLACE_GRAPH_KEY,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::store::{load_json, save_json, KeyValueStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum ReferenceDataError {
    #[error("failed to open {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("bad csv row: {0}")]
    Csv(#[from] csv::Error),
    #[error("invalid distance {distance} between {from} and {to}")]
    InvalidDistance { from: String, to: String, distance: f64 },
}

/// Symmetric weighted adjacency between places.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlaceGraph {
    edges: BTreeMap<String, BTreeMap<String, f64>>,
}

impl PlaceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts both directions.
    pub fn insert(&mut self, a: &str, b: &str, distance: f64) {
        self.edges
            .entry(a.to_string())
            .or_default()
            .insert(b.to_string(), distance);
        self.edges
            .entry(b.to_string())
            .or_default()
            .insert(a.to_string(), distance);
    }

    /// `Some(0.0)` for `a == b`; `None` when neither direction is known.
    pub fn distance(&self, a: &str, b: &str) -> Option<f64> {
        if a == b {
            return Some(0.0);
        }
        self.edges
            .get(a)
            .and_then(|row| row.get(b))
            .or_else(|| self.edges.get(b).and_then(|row| row.get(a)))
            .copied()
    }

    pub fn place_count(&self) -> usize {
        self.edges.len()
    }
}

/// Place → nearest station.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StationProximityMap {
    stations: BTreeMap<String, String>,
}

impl StationProximityMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, place: &str, station: &str) {
        self.stations.insert(place.to_string(), station.to_string());
    }

    /// Blank station ids count as no station.
    pub fn station_for(&self, place: &str) -> Option<&str> {
        self.stations
            .get(place)
            .map(|station| station.trim())
            .filter(|station| !station.is_empty())
    }

    pub fn len(&self) -> usize {
        self.stations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stations.is_empty()
    }
}

/// Place → place → whole distance units, used to score destination closeness.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DestinationDistanceTable {
    distances: BTreeMap<String, BTreeMap<String, u32>>,
}

impl DestinationDistanceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, from: &str, to: &str, distance: u32) {
        self.distances
            .entry(from.to_string())
            .or_default()
            .insert(to.to_string(), distance);
    }

    /// Looks up `from → to`, then `to → from`.
    pub fn get(&self, from: &str, to: &str) -> Option<u32> {
        self.distances
            .get(from)
            .and_then(|row| row.get(to))
            .or_else(|| self.distances.get(to).and_then(|row| row.get(from)))
            .copied()
    }

    pub fn len(&self) -> usize {
        self.distances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.distances.is_empty()
    }
}

#[derive(Deserialize)]
struct DistanceRecord {
    node1: String,
    node2: String,
    distance: f64,
}

#[derive(Deserialize)]
struct NearbyRecord {
    city_point: String,
    near_metro_dropoff: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReferenceData {
    pub graph: PlaceGraph,
    pub stations: StationProximityMap,
    pub destination_distances: DestinationDistanceTable,
}

impl ReferenceData {
    pub fn from_csv_paths(
        distances: &Path,
        nearby: &Path,
    ) -> Result<Self, ReferenceDataError> {
        let open = |path: &Path| {
            std::fs::File::open(path).map_err(|source| ReferenceDataError::Io {
                path: path.display().to_string(),
                source,
            })
        };
        Self::from_csv_readers(open(distances)?, open(nearby)?)
    }

    /// Like [`ReferenceData::from_csv_paths`] but for any `Read` source.
    pub fn from_csv_readers<D: Read, N: Read>(
        distances: D,
        nearby: N,
    ) -> Result<Self, ReferenceDataError> {
        let mut data = Self::default();

        let mut reader = csv::Reader::from_reader(distances);
        for row in reader.deserialize::<DistanceRecord>() {
            let row = row?;
            let (from, to) = (row.node1.trim(), row.node2.trim());
            if !row.distance.is_finite() || row.distance < 0.0 {
                return Err(ReferenceDataError::InvalidDistance {
                    from: from.to_string(),
                    to: to.to_string(),
                    distance: row.distance,
                });
            }
            data.graph.insert(from, to, row.distance);
            let units = row.distance.round() as u32;
            data.destination_distances.insert(from, to, units);
            data.destination_distances.insert(to, from, units);
        }

        let mut reader = csv::Reader::from_reader(nearby);
        for row in reader.deserialize::<NearbyRecord>() {
            let row = row?;
            let station = row.near_metro_dropoff.trim();
            if !station.is_empty() {
                data.stations.insert(row.city_point.trim(), station);
            }
        }

        Ok(data)
    }

    /// Write all three tables under their shared keys.
    pub fn seed(&self, store: &dyn KeyValueStore) -> Result<(), StoreError> {
        save_json(store, PLACE_GRAPH_KEY, &self.graph)?;
        save_json(store, NEARBY_STATIONS_KEY, &self.stations)?;
        save_json(store, DESTINATION_DISTANCES_KEY, &self.destination_distances)?;
        info!(
            places = self.graph.place_count(),
            stations = self.stations.len(),
            "reference data seeded"
        );
        Ok(())
    }
}

pub fn load_place_graph(store: &dyn KeyValueStore) -> Result<Option<PlaceGraph>, StoreError> {
    load_json(store, PLACE_GRAPH_KEY)
}

pub fn load_station_map(
    store: &dyn KeyValueStore,
) -> Result<Option<StationProximityMap>, StoreError> {
    load_json(store, NEARBY_STATIONS_KEY)
}

pub fn load_destination_distances(
    store: &dyn KeyValueStore,
) -> Result<Option<DestinationDistanceTable>, StoreError> {
    load_json(store, DESTINATION_DISTANCES_KEY)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn graph_is_symmetric_and_zero_on_self() {
        let mut graph = PlaceGraph::new();
        graph.insert("A", "B", 12.5);
        assert_eq!(graph.distance("A", "B"), Some(12.5));
        assert_eq!(graph.distance("B", "A"), Some(12.5));
        assert_eq!(graph.distance("C", "C"), Some(0.0));
        assert_eq!(graph.distance("A", "C"), None);
    }

    #[test]
    fn blank_station_counts_as_none() {
        let mut stations = StationProximityMap::new();
        stations.insert("A", "S1");
        stations.insert("B", "  ");
        assert_eq!(stations.station_for("A"), Some("S1"));
        assert_eq!(stations.station_for("B"), None);
        assert_eq!(stations.station_for("Z"), None);
    }

    #[test]
    fn destination_lookup_falls_back_to_reverse() {
        let mut table = DestinationDistanceTable::new();
        table.insert("X", "Y", 3);
        assert_eq!(table.get("Y", "X"), Some(3));
        assert_eq!(table.get("X", "Z"), None);
    }

    #[test]
    fn loads_tables_from_csv() {
        let distances = "node1,node2,distance\nA,B,12.6\nB,C,4\n";
        let nearby = "city_point,near_metro_dropoff\nA,S1\nB,\nC,S3\n";
        let data =
            ReferenceData::from_csv_readers(Cursor::new(distances), Cursor::new(nearby)).unwrap();

        assert_eq!(data.graph.distance("B", "A"), Some(12.6));
        assert_eq!(data.destination_distances.get("A", "B"), Some(13));
        assert_eq!(data.stations.len(), 2);
        assert_eq!(data.stations.station_for("B"), None);
    }

    #[test]
    fn rejects_negative_distance() {
        let distances = "node1,node2,distance\nA,B,-1\n";
        let nearby = "city_point,near_metro_dropoff\n";
        let error = ReferenceData::from_csv_readers(Cursor::new(distances), Cursor::new(nearby))
            .unwrap_err();
        assert!(matches!(error, ReferenceDataError::InvalidDistance { .. }));
    }
}
