/// Derived ridership values and bar heights.
///
/// Turns a fetched sample set into what the map draws: percentage shares
/// against the paired totals, the automatic bar scale, and one target
/// height per catalog station for the selected hour.

use crate::animation::HeightMap;
use crate::model::{RidershipSample, Totals};
use crate::stations::StationCatalog;

// ---------------------------------------------------------------------------
// Percentages
// ---------------------------------------------------------------------------

/// Recompute `percentage` for every sample as `100 * ridership / total`.
/// A missing or zero total yields 0.
pub fn derive_percentages(samples: &mut [RidershipSample], totals: Option<&Totals>) {
    for sample in samples.iter_mut() {
        let total = totals
            .and_then(|t| t.get(&sample.station_id))
            .and_then(|by_hour| by_hour.get(&sample.hour))
            .copied()
            .unwrap_or(0.0);
        sample.percentage = if total > 0.0 {
            100.0 * sample.ridership / total
        } else {
            0.0
        };
    }
}

/// The quantity a bar represents in the current mode.
pub fn displayed_value(sample: &RidershipSample, percentage_mode: bool) -> f64 {
    if percentage_mode {
        sample.percentage
    } else {
        sample.ridership
    }
}

// ---------------------------------------------------------------------------
// Scale and heights
// ---------------------------------------------------------------------------

/// `1 / max(value)` over the samples for `hour`, so the tallest bar renders
/// at one height unit. Falls back to 1.0 when there is nothing to scale.
pub fn auto_scale(samples: &[RidershipSample], hour: u8, percentage_mode: bool) -> f64 {
    let max = samples
        .iter()
        .filter(|s| s.hour == hour)
        .map(|s| displayed_value(s, percentage_mode))
        .fold(0.0_f64, f64::max);
    if max > 0.0 { 1.0 / max } else { 1.0 }
}

/// One target height per catalog station: the station's value at `hour`
/// times `scale` times `height_unit`, or 0 when it has no sample.
/// Samples for stations outside the catalog are not plottable and are skipped.
pub fn target_heights(
    catalog: &StationCatalog,
    samples: &[RidershipSample],
    hour: u8,
    percentage_mode: bool,
    scale: f64,
    height_unit: f64,
) -> HeightMap {
    let mut heights: HeightMap = catalog.ids().map(|id| (id.to_string(), 0.0)).collect();
    for sample in samples.iter().filter(|s| s.hour == hour) {
        if let Some(height) = heights.get_mut(&sample.station_id) {
            *height = displayed_value(sample, percentage_mode) * scale * height_unit;
        }
    }
    heights
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::StationPoint;
    use std::collections::HashMap;

    fn sample(id: &str, hour: u8, ridership: f64) -> RidershipSample {
        RidershipSample {
            station_id: id.to_string(),
            hour,
            ridership,
            percentage: 0.0,
        }
    }

    fn catalog() -> StationCatalog {
        StationCatalog::new(
            ["127", "635", "610"]
                .iter()
                .map(|id| StationPoint {
                    id: id.to_string(),
                    name: String::new(),
                    lon: 0.0,
                    lat: 0.0,
                })
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_percentages_against_totals() {
        let mut samples = vec![sample("127", 8, 50.0), sample("635", 8, 10.0), sample("610", 9, 5.0)];
        let mut totals = Totals::new();
        totals.insert("127".into(), HashMap::from([(8, 200.0)]));
        totals.insert("635".into(), HashMap::from([(8, 0.0)]));

        derive_percentages(&mut samples, Some(&totals));
        assert_eq!(samples[0].percentage, 25.0);
        assert_eq!(samples[1].percentage, 0.0, "zero total must not divide");
        assert_eq!(samples[2].percentage, 0.0, "missing total defaults to 0");
    }

    #[test]
    fn test_percentages_without_totals_are_zero() {
        let mut samples = vec![sample("127", 8, 50.0)];
        samples[0].percentage = 12.0;
        derive_percentages(&mut samples, None);
        assert_eq!(samples[0].percentage, 0.0);
    }

    #[test]
    fn test_auto_scale_uses_selected_hour_only() {
        let samples = vec![sample("127", 8, 400.0), sample("635", 8, 100.0), sample("610", 9, 10_000.0)];
        assert_eq!(auto_scale(&samples, 8, false), 1.0 / 400.0);
        assert_eq!(auto_scale(&samples, 9, false), 1.0 / 10_000.0);
        assert_eq!(auto_scale(&samples, 3, false), 1.0);
    }

    #[test]
    fn test_target_heights_cover_catalog_and_skip_unknown_stations() {
        let samples = vec![sample("127", 8, 400.0), sample("635", 8, 100.0), sample("999", 8, 50.0)];
        let scale = auto_scale(&samples, 8, false);
        let heights = target_heights(&catalog(), &samples, 8, false, scale, 1000.0);

        assert_eq!(heights.len(), 3);
        assert!((heights["127"] - 1000.0).abs() < 1e-9);
        assert!((heights["635"] - 250.0).abs() < 1e-9);
        assert_eq!(heights["610"], 0.0);
        assert!(!heights.contains_key("999"));
    }

    #[test]
    fn test_target_heights_in_percentage_mode() {
        let mut samples = vec![sample("127", 8, 50.0)];
        samples[0].percentage = 25.0;
        let heights = target_heights(&catalog(), &samples, 8, true, 0.02, 100.0);
        assert!((heights["127"] - 50.0).abs() < 1e-9);
    }
}
