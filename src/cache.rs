//! Bounded LRU memo of fetch results, owned by the request coordinator.

use std::collections::BTreeSet;

use chrono::Weekday;
use indexmap::IndexMap;

use crate::model::{Direction, RidershipResult, StationSelector};
use crate::selection::FilterSelection;

/// The selection fields a fetch result depends on. Hour and bar scale are
/// applied client-side and are deliberately absent.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FetchKey {
    pub day: Weekday,
    pub station: StationSelector,
    pub direction: Direction,
    pub months: BTreeSet<u8>,
    pub percentage_mode: bool,
}

impl From<&FilterSelection> for FetchKey {
    fn from(selection: &FilterSelection) -> Self {
        Self {
            day: selection.day,
            station: selection.station.clone(),
            direction: selection.direction,
            months: selection.months.clone(),
            percentage_mode: selection.percentage_mode,
        }
    }
}

/// Least-recently-used entries sit at the front of the map.
#[derive(Debug)]
pub struct RidershipCache {
    capacity: usize,
    entries: IndexMap<FetchKey, RidershipResult>,
}

impl RidershipCache {
    /// A capacity of 0 disables memoizing entirely.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: IndexMap::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&mut self, key: &FetchKey) -> Option<RidershipResult> {
        let (key, value) = self.entries.shift_remove_entry(key)?;
        let hit = value.clone();
        self.entries.insert(key, value);
        Some(hit)
    }

    pub fn insert(&mut self, key: FetchKey, value: RidershipResult) {
        if self.capacity == 0 {
            return;
        }
        self.entries.shift_remove(&key);
        self.entries.insert(key, value);
        while self.entries.len() > self.capacity {
            self.entries.shift_remove_index(0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RidershipSample;

    fn key(hour_independent_day: Weekday) -> FetchKey {
        FetchKey::from(&FilterSelection {
            day: hour_independent_day,
            ..FilterSelection::default()
        })
    }

    fn result(ridership: f64) -> RidershipResult {
        RidershipResult {
            samples: vec![RidershipSample {
                station_id: "127".into(),
                hour: 8,
                ridership,
                percentage: 0.0,
            }],
            totals: None,
        }
    }

    #[test]
    fn test_hour_and_scale_do_not_affect_key() {
        let base = FilterSelection::default();
        let other = FilterSelection {
            hour: 17,
            bar_scale: Some(0.5),
            ..base.clone()
        };
        assert_eq!(FetchKey::from(&base), FetchKey::from(&other));
    }

    #[test]
    fn test_least_recently_used_entry_is_evicted() {
        let mut cache = RidershipCache::new(2);
        cache.insert(key(Weekday::Mon), result(1.0));
        cache.insert(key(Weekday::Tue), result(2.0));

        // Touch Monday so Tuesday becomes the eviction candidate.
        assert_eq!(cache.get(&key(Weekday::Mon)), Some(result(1.0)));
        cache.insert(key(Weekday::Wed), result(3.0));

        assert_eq!(cache.len(), 2);
        assert!(cache.get(&key(Weekday::Tue)).is_none());
        assert!(cache.get(&key(Weekday::Mon)).is_some());
        assert!(cache.get(&key(Weekday::Wed)).is_some());
    }

    #[test]
    fn test_reinsert_replaces_value() {
        let mut cache = RidershipCache::new(4);
        cache.insert(key(Weekday::Mon), result(1.0));
        cache.insert(key(Weekday::Mon), result(5.0));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&key(Weekday::Mon)), Some(result(5.0)));
    }

    #[test]
    fn test_zero_capacity_stores_nothing() {
        let mut cache = RidershipCache::new(0);
        cache.insert(key(Weekday::Mon), result(1.0));
        assert!(cache.is_empty());
    }
}
