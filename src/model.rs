/// Core data types for the ridership bar-map service.
///
/// This module defines the shared domain model imported by all other modules:
/// station identifiers and points, query direction, fetched ridership rows,
/// and the fetch error taxonomy. It contains no I/O and no async code.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Station identity
// ---------------------------------------------------------------------------

/// Identifier of one plottable station (an "entity" on the map).
///
/// Catalog ids are strings (e.g. `"127"` for Times Sq-42 St); the backend
/// echoes them back verbatim in every row it returns.
pub type StationId = String;

/// Immutable station location loaded once from the static catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationPoint {
    pub id: StationId,
    #[serde(default)]
    pub name: String,
    pub lon: f64,
    pub lat: f64,
}

impl StationPoint {
    /// The `[lon, lat]` pair used as an animation target coordinate.
    pub fn coords(&self) -> [f64; 2] {
        [self.lon, self.lat]
    }
}

/// Which station the viewer is looking at: one station, or the aggregate
/// "all stations" entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StationSelector {
    AllStations,
    Station(StationId),
}

impl StationSelector {
    pub fn is_all(&self) -> bool {
        matches!(self, StationSelector::AllStations)
    }

    pub fn station_id(&self) -> Option<&str> {
        match self {
            StationSelector::AllStations => None,
            StationSelector::Station(id) => Some(id),
        }
    }
}

impl fmt::Display for StationSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StationSelector::AllStations => write!(f, "ALL_STATIONS"),
            StationSelector::Station(id) => write!(f, "{}", id),
        }
    }
}

// ---------------------------------------------------------------------------
// Direction
// ---------------------------------------------------------------------------

/// Whether the bars count riders arriving at the selected station
/// (`ComingFrom` every other station) or leaving it (`GoingTo`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Direction {
    #[serde(rename = "comingFrom")]
    ComingFrom,
    #[serde(rename = "goingTo")]
    GoingTo,
}

impl Direction {
    /// The opposite direction. Total-ridership queries compute the
    /// complement internally, so the coordinator swaps before asking.
    pub fn swapped(self) -> Direction {
        match self {
            Direction::ComingFrom => Direction::GoingTo,
            Direction::GoingTo => Direction::ComingFrom,
        }
    }

    /// Query-string value understood by the backend.
    pub fn as_param(self) -> &'static str {
        match self {
            Direction::ComingFrom => "comingFrom",
            Direction::GoingTo => "goingTo",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_param())
    }
}

// ---------------------------------------------------------------------------
// Ridership types
// ---------------------------------------------------------------------------

/// One station-hour of ridership for the current filter selection.
///
/// `percentage` is derived after the fetch (see `analysis::heights`) and is
/// 0 until then, or whenever no matching total exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RidershipSample {
    pub station_id: StationId,
    pub hour: u8,
    pub ridership: f64,
    #[serde(default)]
    pub percentage: f64,
}

/// Total ridership per station per hour, used as the percentage denominator.
pub type Totals = HashMap<StationId, HashMap<u8, f64>>;

/// Everything one authoritative fetch produces. Superseded wholesale by the
/// next successful fetch; never merged.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RidershipResult {
    pub samples: Vec<RidershipSample>,
    pub totals: Option<Totals>,
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors that can arise when fetching ridership for a filter selection.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchError {
    /// A newer fetch superseded this one. Internal only; never shown to users.
    Cancelled,
    /// Transport failure, timeout, 5xx, or an unreadable response body.
    NetworkFailure(String),
    /// The filter was malformed (4xx-equivalent). Never retried.
    ValidationFailure(String),
}

impl FetchError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, FetchError::Cancelled)
    }
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchError::Cancelled => write!(f, "Request superseded by a newer fetch"),
            FetchError::NetworkFailure(msg) => write!(f, "Network failure: {}", msg),
            FetchError::ValidationFailure(msg) => write!(f, "Invalid filter: {}", msg),
        }
    }
}

impl std::error::Error for FetchError {}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
