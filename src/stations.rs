/// Station catalog for the ridership bar map.
///
/// Defines the canonical list of plottable stations and their coordinates.
/// The catalog is loaded once at startup from a TOML file and is immutable
/// afterwards; all other modules reference stations through it rather than
/// hardcoding ids or coordinates.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::Path;

use serde::Deserialize;

use crate::model::{StationId, StationPoint};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum CatalogError {
    Io(std::io::Error),
    Parse(String),
    /// The same station id appears twice.
    Duplicate(StationId),
    Empty,
}

impl fmt::Display for CatalogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CatalogError::Io(e) => write!(f, "Failed to read station catalog: {}", e),
            CatalogError::Parse(msg) => write!(f, "Parse error in station catalog: {}", msg),
            CatalogError::Duplicate(id) => write!(f, "Duplicate station id in catalog: {}", id),
            CatalogError::Empty => write!(f, "Station catalog contains no stations"),
        }
    }
}

impl std::error::Error for CatalogError {}

impl From<std::io::Error> for CatalogError {
    fn from(e: std::io::Error) -> Self {
        CatalogError::Io(e)
    }
}

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(rename = "station", default)]
    stations: Vec<StationPoint>,
}

/// All stations that can be drawn, in catalog order.
#[derive(Debug, Clone)]
pub struct StationCatalog {
    stations: Vec<StationPoint>,
}

impl StationCatalog {
    pub fn new(stations: Vec<StationPoint>) -> Result<Self, CatalogError> {
        if stations.is_empty() {
            return Err(CatalogError::Empty);
        }
        let mut seen = HashSet::new();
        for station in &stations {
            if !seen.insert(station.id.as_str()) {
                return Err(CatalogError::Duplicate(station.id.clone()));
            }
        }
        Ok(Self { stations })
    }

    /// Parse a catalog from TOML text made of `[[station]]` tables.
    pub fn from_toml_str(text: &str) -> Result<Self, CatalogError> {
        let file: CatalogFile =
            toml::from_str(text).map_err(|e| CatalogError::Parse(e.to_string()))?;
        Self::new(file.stations)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn stations(&self) -> &[StationPoint] {
        &self.stations
    }

    pub fn len(&self) -> usize {
        self.stations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stations.is_empty()
    }

    /// Looks up a station by id. Returns `None` if not found.
    pub fn find(&self, id: &str) -> Option<&StationPoint> {
        self.stations.iter().find(|s| s.id == id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.stations.iter().map(|s| s.id.as_str())
    }

    /// `id -> [lon, lat]` for every station, as consumed by the wave
    /// loading animations.
    pub fn targets(&self) -> HashMap<StationId, [f64; 2]> {
        self.stations
            .iter()
            .map(|s| (s.id.clone(), s.coords()))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [[station]]
        id = "127"
        name = "Times Sq-42 St"
        lon = -73.9873
        lat = 40.7553

        [[station]]
        id = "635"
        name = "14 St-Union Sq"
        lon = -73.9903
        lat = 40.7349
    "#;

    #[test]
    fn test_catalog_parses_station_tables() {
        let catalog = StationCatalog::from_toml_str(SAMPLE).expect("sample should parse");
        assert_eq!(catalog.len(), 2);
        let times_sq = catalog.find("127").expect("127 should be present");
        assert_eq!(times_sq.name, "Times Sq-42 St");
        assert_eq!(times_sq.coords(), [-73.9873, 40.7553]);
    }

    #[test]
    fn test_find_returns_none_for_unknown_id() {
        let catalog = StationCatalog::from_toml_str(SAMPLE).unwrap();
        assert!(catalog.find("999").is_none());
    }

    #[test]
    fn test_duplicate_ids_are_rejected() {
        let doubled = format!("{}\n[[station]]\nid = \"127\"\nlon = 0.0\nlat = 0.0\n", SAMPLE);
        match StationCatalog::from_toml_str(&doubled) {
            Err(CatalogError::Duplicate(id)) => assert_eq!(id, "127"),
            other => panic!("expected duplicate error, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_catalog_is_rejected() {
        assert!(matches!(
            StationCatalog::from_toml_str(""),
            Err(CatalogError::Empty)
        ));
    }

    #[test]
    fn test_targets_cover_every_station() {
        let catalog = StationCatalog::from_toml_str(SAMPLE).unwrap();
        let targets = catalog.targets();
        assert_eq!(targets.len(), catalog.len());
        assert_eq!(targets["635"], [-73.9903, 40.7349]);
    }

    #[test]
    fn test_shipped_catalog_is_valid() {
        let text = include_str!("../stations.toml");
        let catalog = StationCatalog::from_toml_str(text).expect("shipped catalog should parse");
        for station in catalog.stations() {
            assert!(
                (-180.0..=180.0).contains(&station.lon) && (-90.0..=90.0).contains(&station.lat),
                "{} has coordinates outside WGS84 bounds",
                station.id
            );
        }
    }
}
