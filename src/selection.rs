//! Filter selection and filter deltas.
//!
//! The orchestrator owns the one authoritative `FilterSelection`. UI controls
//! never mutate it directly; they submit a `FilterDelta` naming any subset of
//! fields, and `FilterSelection::merge` produces the candidate next selection
//! together with per-field change flags.

use std::collections::BTreeSet;

use chrono::Weekday;

use crate::model::{Direction, FetchError, StationSelector};

/// Backend query-string name for a day of the week.
pub fn day_param(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
}

// ---------------------------------------------------------------------------
// Selection
// ---------------------------------------------------------------------------

/// The full set of user-chosen parameters driving what the map shows.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterSelection {
    pub day: Weekday,
    pub station: StationSelector,
    pub direction: Direction,
    /// Month indices 0-11. Must be non-empty.
    pub months: BTreeSet<u8>,
    /// Hour of day 0-23 whose samples are drawn.
    pub hour: u8,
    pub percentage_mode: bool,
    /// Locked bar scale, or `None` for the automatic scale.
    pub bar_scale: Option<f64>,
}

impl Default for FilterSelection {
    fn default() -> Self {
        Self {
            day: Weekday::Mon,
            station: StationSelector::AllStations,
            direction: Direction::GoingTo,
            months: (0..12).collect(),
            hour: 8,
            percentage_mode: false,
            bar_scale: None,
        }
    }
}

impl FilterSelection {
    /// Fails closed on anything the backend or the engine could not use.
    pub fn validate(&self) -> Result<(), FetchError> {
        if self.months.is_empty() {
            return Err(FetchError::ValidationFailure(
                "at least one month must be selected".to_string(),
            ));
        }
        if let Some(bad) = self.months.iter().find(|m| **m > 11) {
            return Err(FetchError::ValidationFailure(format!(
                "month index {} is outside 0-11",
                bad
            )));
        }
        if self.hour > 23 {
            return Err(FetchError::ValidationFailure(format!(
                "hour {} is outside 0-23",
                self.hour
            )));
        }
        if let Some(scale) = self.bar_scale {
            if !scale.is_finite() || scale <= 0.0 {
                return Err(FetchError::ValidationFailure(format!(
                    "bar scale {} must be a positive number",
                    scale
                )));
            }
        }
        Ok(())
    }

    /// Apply `delta` and report which fields actually changed value.
    /// A delta field equal to the current value does not count as a change.
    pub fn merge(&self, delta: &FilterDelta) -> (FilterSelection, FieldChanges) {
        let mut next = self.clone();
        let mut changes = FieldChanges::default();

        if let Some(day) = delta.day {
            changes.day = day != self.day;
            next.day = day;
        }
        if let Some(station) = &delta.station {
            changes.station = *station != self.station;
            next.station = station.clone();
        }
        if let Some(direction) = delta.direction {
            changes.direction = direction != self.direction;
            next.direction = direction;
        }
        if let Some(months) = &delta.months {
            changes.months = *months != self.months;
            next.months = months.clone();
        }
        if let Some(hour) = delta.hour {
            changes.hour = hour != self.hour;
            next.hour = hour;
        }
        if let Some(percentage_mode) = delta.percentage_mode {
            changes.percentage_mode = percentage_mode != self.percentage_mode;
            next.percentage_mode = percentage_mode;
        }
        if let Some(bar_scale) = delta.bar_scale {
            changes.bar_scale = bar_scale != self.bar_scale;
            next.bar_scale = bar_scale;
        }

        (next, changes)
    }
}

// ---------------------------------------------------------------------------
// Delta
// ---------------------------------------------------------------------------

/// A partial update against the current selection. `None` leaves a field as
/// it is; `bar_scale: Some(None)` switches back to the automatic scale.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterDelta {
    pub day: Option<Weekday>,
    pub station: Option<StationSelector>,
    pub direction: Option<Direction>,
    pub months: Option<BTreeSet<u8>>,
    pub hour: Option<u8>,
    pub percentage_mode: Option<bool>,
    pub bar_scale: Option<Option<f64>>,
}

impl FilterDelta {
    pub fn is_empty(&self) -> bool {
        *self == FilterDelta::default()
    }

    pub fn day(mut self, day: Weekday) -> Self {
        self.day = Some(day);
        self
    }

    pub fn station(mut self, station: StationSelector) -> Self {
        self.station = Some(station);
        self
    }

    pub fn direction(mut self, direction: Direction) -> Self {
        self.direction = Some(direction);
        self
    }

    pub fn months(mut self, months: impl IntoIterator<Item = u8>) -> Self {
        self.months = Some(months.into_iter().collect());
        self
    }

    pub fn hour(mut self, hour: u8) -> Self {
        self.hour = Some(hour);
        self
    }

    pub fn percentage_mode(mut self, on: bool) -> Self {
        self.percentage_mode = Some(on);
        self
    }

    pub fn bar_scale(mut self, scale: Option<f64>) -> Self {
        self.bar_scale = Some(scale);
        self
    }

    /// Parse one `key=value` control assignment, e.g. `hour=9`,
    /// `station=all`, `months=0,1,2`, `scale=auto`.
    pub fn parse_assignment(line: &str) -> Result<FilterDelta, FetchError> {
        let invalid = |msg: String| FetchError::ValidationFailure(msg);

        let (key, value) = line
            .split_once('=')
            .ok_or_else(|| invalid(format!("expected key=value, got '{}'", line.trim())))?;
        let key = key.trim();
        let value = value.trim();
        let delta = FilterDelta::default();

        match key {
            "day" => {
                let day: Weekday = value
                    .parse()
                    .map_err(|_| invalid(format!("unknown day '{}'", value)))?;
                Ok(delta.day(day))
            }
            "station" => {
                if value.eq_ignore_ascii_case("all") {
                    Ok(delta.station(StationSelector::AllStations))
                } else if value.is_empty() {
                    Err(invalid("station id must not be empty".to_string()))
                } else {
                    Ok(delta.station(StationSelector::Station(value.to_string())))
                }
            }
            "direction" => match value {
                "comingFrom" => Ok(delta.direction(Direction::ComingFrom)),
                "goingTo" => Ok(delta.direction(Direction::GoingTo)),
                _ => Err(invalid(format!("unknown direction '{}'", value))),
            },
            "months" => {
                let months = value
                    .split(',')
                    .filter(|m| !m.trim().is_empty())
                    .map(|m| {
                        m.trim()
                            .parse::<u8>()
                            .map_err(|_| invalid(format!("bad month '{}'", m.trim())))
                    })
                    .collect::<Result<BTreeSet<u8>, _>>()?;
                Ok(FilterDelta {
                    months: Some(months),
                    ..delta
                })
            }
            "hour" => {
                let hour = value
                    .parse::<u8>()
                    .map_err(|_| invalid(format!("bad hour '{}'", value)))?;
                Ok(delta.hour(hour))
            }
            "percentage" => {
                let on = value
                    .parse::<bool>()
                    .map_err(|_| invalid(format!("percentage must be true or false, got '{}'", value)))?;
                Ok(delta.percentage_mode(on))
            }
            "scale" => {
                if value.eq_ignore_ascii_case("auto") {
                    Ok(delta.bar_scale(None))
                } else {
                    let scale = value
                        .parse::<f64>()
                        .map_err(|_| invalid(format!("bad scale '{}'", value)))?;
                    Ok(delta.bar_scale(Some(scale)))
                }
            }
            _ => Err(invalid(format!("unknown control '{}'", key))),
        }
    }
}

// ---------------------------------------------------------------------------
// Change flags
// ---------------------------------------------------------------------------

/// Which fields a merged delta actually changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FieldChanges {
    pub day: bool,
    pub station: bool,
    pub direction: bool,
    pub months: bool,
    pub hour: bool,
    pub percentage_mode: bool,
    pub bar_scale: bool,
}

impl FieldChanges {
    /// Any change to a query parameter, or the very first load, needs data
    /// from the backend. Hour and scale changes reuse the cached samples.
    pub fn should_fetch(&self, initial_load: bool) -> bool {
        self.day
            || self.station
            || self.direction
            || self.months
            || self.percentage_mode
            || initial_load
    }

    pub fn should_animate_transition(&self, initial_load: bool) -> bool {
        self.should_fetch(initial_load) || self.hour
    }

    pub fn any(&self) -> bool {
        self.should_fetch(false) || self.hour || self.bar_scale
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_selection_is_valid() {
        assert!(FilterSelection::default().validate().is_ok());
    }

    #[test]
    fn test_empty_months_fail_validation() {
        let selection = FilterSelection {
            months: BTreeSet::new(),
            ..FilterSelection::default()
        };
        assert!(matches!(
            selection.validate(),
            Err(FetchError::ValidationFailure(_))
        ));
    }

    #[test]
    fn test_out_of_range_month_and_hour_fail_validation() {
        let bad_month = FilterSelection {
            months: [3, 12].into_iter().collect(),
            ..FilterSelection::default()
        };
        assert!(bad_month.validate().is_err());

        let bad_hour = FilterSelection {
            hour: 24,
            ..FilterSelection::default()
        };
        assert!(bad_hour.validate().is_err());
    }

    #[test]
    fn test_non_positive_scale_fails_validation() {
        for scale in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let selection = FilterSelection {
                bar_scale: Some(scale),
                ..FilterSelection::default()
            };
            assert!(selection.validate().is_err(), "scale {} should be rejected", scale);
        }
    }

    #[test]
    fn test_merge_flags_only_fields_that_differ() {
        let current = FilterSelection::default();
        let delta = FilterDelta::default()
            .day(Weekday::Mon) // same as current
            .hour(9)
            .station(StationSelector::Station("127".into()));
        let (next, changes) = current.merge(&delta);

        assert!(!changes.day);
        assert!(changes.hour);
        assert!(changes.station);
        assert_eq!(next.hour, 9);
        assert_eq!(next.station, StationSelector::Station("127".into()));
        assert_eq!(next.months, current.months);
    }

    #[test]
    fn test_hour_and_scale_changes_do_not_fetch() {
        let current = FilterSelection::default();
        let (_, hour_only) = current.merge(&FilterDelta::default().hour(17));
        assert!(!hour_only.should_fetch(false));
        assert!(hour_only.should_animate_transition(false));

        let (_, scale_only) = current.merge(&FilterDelta::default().bar_scale(Some(0.01)));
        assert!(!scale_only.should_fetch(false));
        assert!(!scale_only.should_animate_transition(false));
        assert!(scale_only.any());
    }

    #[test]
    fn test_initial_load_always_fetches() {
        let (_, none) = FilterSelection::default().merge(&FilterDelta::default());
        assert!(!none.any());
        assert!(none.should_fetch(true));
    }

    #[test]
    fn test_percentage_mode_change_fetches() {
        let (_, changes) =
            FilterSelection::default().merge(&FilterDelta::default().percentage_mode(true));
        assert!(changes.should_fetch(false));
    }

    #[test]
    fn test_parse_assignments() {
        assert_eq!(
            FilterDelta::parse_assignment("hour=9").unwrap(),
            FilterDelta::default().hour(9)
        );
        assert_eq!(
            FilterDelta::parse_assignment("station = all").unwrap(),
            FilterDelta::default().station(StationSelector::AllStations)
        );
        assert_eq!(
            FilterDelta::parse_assignment("day=Tuesday").unwrap(),
            FilterDelta::default().day(Weekday::Tue)
        );
        assert_eq!(
            FilterDelta::parse_assignment("months=0,1, 2").unwrap(),
            FilterDelta::default().months([0, 1, 2])
        );
        assert_eq!(
            FilterDelta::parse_assignment("scale=auto").unwrap(),
            FilterDelta::default().bar_scale(None)
        );
        assert_eq!(
            FilterDelta::parse_assignment("direction=comingFrom").unwrap(),
            FilterDelta::default().direction(Direction::ComingFrom)
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(FilterDelta::parse_assignment("hour").is_err());
        assert!(FilterDelta::parse_assignment("hour=noon").is_err());
        assert!(FilterDelta::parse_assignment("colour=red").is_err());
        assert!(FilterDelta::parse_assignment("direction=sideways").is_err());
    }

    #[test]
    fn test_day_param_uses_full_names() {
        assert_eq!(day_param(Weekday::Mon), "Monday");
        assert_eq!(day_param(Weekday::Sun), "Sunday");
    }
}
