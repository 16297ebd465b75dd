//! Request coordinator: fetches the ridership slice for a filter selection
//! with at-most-one-authoritative-request semantics.
//!
//! Every call to `fetch` supersedes the previous one. The superseded request
//! is aborted at its next suspension point and, should it settle anyway, its
//! result is discarded by a generation check, so it can never reach a caller
//! as anything other than `FetchError::Cancelled`.

use std::sync::{Mutex, MutexGuard};

use futures::future::{AbortHandle, Aborted, abortable};

use crate::cache::{FetchKey, RidershipCache};
use crate::ingest::backend::{RidershipBackend, RidershipQuery, StationHourCount};
use crate::logging::{self, Component};
use crate::model::{FetchError, RidershipResult, RidershipSample, StationSelector, Totals};
use crate::selection::FilterSelection;

#[derive(Debug, Default)]
struct InFlight {
    generation: u64,
    abort: Option<AbortHandle>,
}

pub struct RequestCoordinator<B> {
    backend: B,
    cache: Mutex<RidershipCache>,
    in_flight: Mutex<InFlight>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl<B: RidershipBackend> RequestCoordinator<B> {
    pub fn new(backend: B, cache: RidershipCache) -> Self {
        Self {
            backend,
            cache: Mutex::new(cache),
            in_flight: Mutex::new(InFlight::default()),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Fetch ridership for `selection`, cancelling any earlier fetch that has
    /// not yet settled.
    pub async fn fetch(&self, selection: &FilterSelection) -> Result<RidershipResult, FetchError> {
        let generation = self.supersede();
        let station = selection.station.station_id();

        if let Err(e) = selection.validate() {
            logging::log_fetch_failure(station, "fetch", &e);
            return Err(e);
        }

        let key = FetchKey::from(selection);
        if let Some(hit) = lock(&self.cache).get(&key) {
            logging::debug(Component::Coordinator, station, "served from cache");
            self.settle(generation);
            return Ok(hit);
        }

        let (task, abort) = abortable(self.query(selection));
        self.register(generation, abort);

        let outcome = match task.await {
            Ok(result) => result,
            Err(Aborted) => Err(FetchError::Cancelled),
        };

        if !self.settle(generation) {
            logging::log_fetch_failure(station, "fetch", &FetchError::Cancelled);
            return Err(FetchError::Cancelled);
        }

        match outcome {
            Ok(result) => {
                logging::debug(
                    Component::Coordinator,
                    station,
                    &format!("fetched {} samples", result.samples.len()),
                );
                lock(&self.cache).insert(key, result.clone());
                Ok(result)
            }
            Err(e) => {
                logging::log_fetch_failure(station, "fetch", &e);
                Err(e)
            }
        }
    }

    /// Start a new generation, aborting whatever was still in flight.
    fn supersede(&self) -> u64 {
        let mut in_flight = lock(&self.in_flight);
        if let Some(previous) = in_flight.abort.take() {
            previous.abort();
        }
        in_flight.generation += 1;
        in_flight.generation
    }

    fn register(&self, generation: u64, abort: AbortHandle) {
        let mut in_flight = lock(&self.in_flight);
        if in_flight.generation == generation {
            in_flight.abort = Some(abort);
        } else {
            abort.abort();
        }
    }

    /// Returns whether `generation` is still the authoritative request.
    fn settle(&self, generation: u64) -> bool {
        let mut in_flight = lock(&self.in_flight);
        if in_flight.generation == generation {
            in_flight.abort = None;
            true
        } else {
            false
        }
    }

    async fn query(&self, selection: &FilterSelection) -> Result<RidershipResult, FetchError> {
        match &selection.station {
            StationSelector::AllStations => {
                let rows = self.backend.total_ridership(&totals_query(selection)).await?;
                Ok(RidershipResult {
                    samples: to_samples(rows),
                    totals: None,
                })
            }
            StationSelector::Station(id) => {
                let query = RidershipQuery {
                    day: selection.day,
                    station: Some(id.clone()),
                    direction: selection.direction,
                    months: selection.months.clone(),
                };
                if selection.percentage_mode {
                    let totals_query = totals_query(selection);
                    let (rows, totals) = tokio::try_join!(
                        self.backend.ridership_by_station(&query),
                        self.backend.total_ridership(&totals_query),
                    )?;
                    Ok(RidershipResult {
                        samples: to_samples(rows),
                        totals: Some(to_totals(totals)),
                    })
                } else {
                    let rows = self.backend.ridership_by_station(&query).await?;
                    Ok(RidershipResult {
                        samples: to_samples(rows),
                        totals: None,
                    })
                }
            }
        }
    }
}

/// The totals endpoint reports the complement of the direction it is asked
/// for, so the selection's direction is swapped before querying.
fn totals_query(selection: &FilterSelection) -> RidershipQuery {
    RidershipQuery {
        day: selection.day,
        station: None,
        direction: selection.direction.swapped(),
        months: selection.months.clone(),
    }
}

fn to_samples(rows: Vec<StationHourCount>) -> Vec<RidershipSample> {
    rows.into_iter()
        .map(|row| RidershipSample {
            station_id: row.station_id,
            hour: row.hour,
            ridership: row.count.max(0.0),
            percentage: 0.0,
        })
        .collect()
}

fn to_totals(rows: Vec<StationHourCount>) -> Totals {
    let mut totals = Totals::new();
    for row in rows {
        totals
            .entry(row.station_id)
            .or_default()
            .insert(row.hour, row.count);
    }
    totals
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Direction;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Answers every query after `delay`, recording what was asked.
    struct ScriptedBackend {
        delay: Duration,
        calls: AtomicUsize,
        queries: Mutex<Vec<(&'static str, RidershipQuery)>>,
        fail_with: Option<FetchError>,
    }

    impl ScriptedBackend {
        fn new(delay_ms: u64) -> Self {
            Self {
                delay: Duration::from_millis(delay_ms),
                calls: AtomicUsize::new(0),
                queries: Mutex::new(Vec::new()),
                fail_with: None,
            }
        }

        async fn answer(
            &self,
            endpoint: &'static str,
            query: &RidershipQuery,
        ) -> Result<Vec<StationHourCount>, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            lock(&self.queries).push((endpoint, query.clone()));
            tokio::time::sleep(self.delay).await;
            if let Some(e) = &self.fail_with {
                return Err(e.clone());
            }
            let count = match &query.station {
                Some(id) => id.len() as f64 * 10.0,
                None => 1000.0,
            };
            Ok(vec![StationHourCount {
                station_id: "635".into(),
                hour: 8,
                count,
            }])
        }
    }

    impl RidershipBackend for ScriptedBackend {
        async fn ridership_by_station(
            &self,
            query: &RidershipQuery,
        ) -> Result<Vec<StationHourCount>, FetchError> {
            self.answer("by_station", query).await
        }

        async fn total_ridership(
            &self,
            query: &RidershipQuery,
        ) -> Result<Vec<StationHourCount>, FetchError> {
            self.answer("totals", query).await
        }
    }

    fn station(id: &str) -> FilterSelection {
        FilterSelection {
            station: StationSelector::Station(id.into()),
            ..FilterSelection::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_stations_routes_to_totals_with_swapped_direction() {
        let coordinator = RequestCoordinator::new(ScriptedBackend::new(5), RidershipCache::new(0));
        let selection = FilterSelection {
            direction: Direction::GoingTo,
            ..FilterSelection::default()
        };
        let result = coordinator.fetch(&selection).await.unwrap();
        assert_eq!(result.samples[0].ridership, 1000.0);
        assert!(result.totals.is_none());

        let queries = lock(&coordinator.backend().queries);
        assert_eq!(queries.len(), 1);
        assert_eq!(queries[0].0, "totals");
        assert_eq!(queries[0].1.direction, Direction::ComingFrom);
        assert_eq!(queries[0].1.station, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_percentage_mode_also_fetches_totals() {
        let coordinator = RequestCoordinator::new(ScriptedBackend::new(5), RidershipCache::new(0));
        let selection = FilterSelection {
            percentage_mode: true,
            ..station("127")
        };
        let result = coordinator.fetch(&selection).await.unwrap();
        let totals = result.totals.expect("percentage mode should carry totals");
        assert_eq!(totals["635"][&8], 1000.0);
        assert_eq!(coordinator.backend().calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_station_without_percentage_skips_totals() {
        let coordinator = RequestCoordinator::new(ScriptedBackend::new(5), RidershipCache::new(0));
        let result = coordinator.fetch(&station("127")).await.unwrap();
        assert!(result.totals.is_none());
        assert_eq!(coordinator.backend().calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_newer_fetch_cancels_pending_one() {
        let coordinator = RequestCoordinator::new(ScriptedBackend::new(100), RidershipCache::new(0));
        let first = station("127");
        let second = station("6350");

        let (a, b) = tokio::join!(coordinator.fetch(&first), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            coordinator.fetch(&second).await
        });

        assert_eq!(a, Err(FetchError::Cancelled));
        assert_eq!(b.unwrap().samples[0].ridership, 40.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_selection_is_rejected_without_query() {
        let coordinator = RequestCoordinator::new(ScriptedBackend::new(5), RidershipCache::new(0));
        let selection = FilterSelection {
            months: Default::default(),
            ..station("127")
        };
        let result = coordinator.fetch(&selection).await;
        assert!(matches!(result, Err(FetchError::ValidationFailure(_))));
        assert_eq!(coordinator.backend().calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backend_failure_is_passed_through_and_not_cached() {
        let mut backend = ScriptedBackend::new(5);
        backend.fail_with = Some(FetchError::NetworkFailure("HTTP 503: down".into()));
        let coordinator = RequestCoordinator::new(backend, RidershipCache::new(4));

        let selection = station("127");
        assert!(matches!(
            coordinator.fetch(&selection).await,
            Err(FetchError::NetworkFailure(_))
        ));
        assert!(coordinator.fetch(&selection).await.is_err());
        assert_eq!(coordinator.backend().calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeat_selection_is_served_from_cache() {
        let coordinator = RequestCoordinator::new(ScriptedBackend::new(5), RidershipCache::new(4));
        let selection = station("127");
        let first = coordinator.fetch(&selection).await.unwrap();

        let hourly = FilterSelection {
            hour: 17,
            ..selection.clone()
        };
        let second = coordinator.fetch(&hourly).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(coordinator.backend().calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_hit_still_cancels_pending_fetch() {
        let coordinator = RequestCoordinator::new(ScriptedBackend::new(100), RidershipCache::new(4));
        let cached = station("127");
        coordinator.fetch(&cached).await.unwrap();

        let slow = station("6350");
        let (pending, hit) = tokio::join!(coordinator.fetch(&slow), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            coordinator.fetch(&cached).await
        });
        assert_eq!(pending, Err(FetchError::Cancelled));
        assert!(hit.is_ok());
    }
}
