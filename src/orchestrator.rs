//! Settings-change orchestrator.
//!
//! Consumes filter deltas from the UI, decides whether new data is needed,
//! and sequences the request coordinator and the animation engine so that:
//!
//! - fetches answered inside the grace period never flash a loading wave,
//! - a loading wave, once shown, stays up for at least one full cycle,
//! - results of a superseded change are never rendered and never clear the
//!   loading flag of the change that superseded them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::watch;

use crate::analysis::heights::{auto_scale, derive_percentages, target_heights};
use crate::animation::{
    AnimationSpec, BarHeightState, CompletionHandle, Easing, HeightMap, RenderKind, SharedEngine,
    SpecKind, WaveDirection,
};
use crate::config::ServiceConfig;
use crate::coordinator::RequestCoordinator;
use crate::ingest::backend::RidershipBackend;
use crate::logging::{self, Component};
use crate::model::{Direction, FetchError, RidershipResult, RidershipSample, StationSelector};
use crate::selection::{FilterDelta, FilterSelection};
use crate::stations::StationCatalog;

// ---------------------------------------------------------------------------
// Settings and outcomes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorSettings {
    /// How long a fetch may take before a loading wave is shown.
    pub grace: Duration,
    pub transition: Duration,
    pub easing: Easing,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            grace: Duration::from_millis(50),
            transition: Duration::from_millis(1000),
            easing: Easing::EaseOutCubic,
        }
    }
}

impl OrchestratorSettings {
    pub fn from_config(config: &ServiceConfig) -> Self {
        Self {
            grace: config.pipeline.grace(),
            transition: Duration::from_millis(config.pipeline.transition_ms),
            easing: Easing::EaseOutCubic,
        }
    }
}

/// What `apply_change` did with a delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOutcome {
    /// New bar heights were handed to the engine.
    Rendered { fetched: bool, loading_shown: bool },
    /// Only hour or scale changed while a fetch was pending; that fetch will
    /// render with the committed values.
    Deferred,
    /// A newer change took over before this one could render.
    Superseded,
    /// The delta matched the current selection.
    Unchanged,
}

// ---------------------------------------------------------------------------
// View state
// ---------------------------------------------------------------------------

struct ViewState {
    selection: FilterSelection,
    /// Selection whose data is currently displayed, if any fetch succeeded.
    fetched: Option<FilterSelection>,
    samples: Vec<RidershipSample>,
    auto_scale: f64,
    /// Hour or scale change committed while a fetch was pending; `true` when
    /// it calls for a transition rather than an instant redraw.
    deferred: Option<bool>,
}

impl ViewState {
    fn scale(&self) -> f64 {
        self.selection.bar_scale.unwrap_or(self.auto_scale)
    }

    fn refresh_auto_scale(&mut self) {
        self.auto_scale = auto_scale(
            &self.samples,
            self.selection.hour,
            self.selection.percentage_mode,
        );
    }

    /// Wholesale replacement with a fresh fetch result.
    fn apply_result(&mut self, result: RidershipResult) {
        let mut samples = result.samples;
        if self.selection.percentage_mode {
            derive_percentages(&mut samples, result.totals.as_ref());
        }
        self.samples = samples;
        self.fetched = Some(self.selection.clone());
        self.refresh_auto_scale();
    }

    /// Put the query fields back to the ones whose data is on screen, so the
    /// failed values can be chosen again to retry.
    fn roll_back_query_fields(&mut self) {
        if let Some(fetched) = &self.fetched {
            self.selection.day = fetched.day;
            self.selection.station = fetched.station.clone();
            self.selection.direction = fetched.direction;
            self.selection.months = fetched.months.clone();
            self.selection.percentage_mode = fetched.percentage_mode;
        }
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct Orchestrator<B> {
    coordinator: RequestCoordinator<B>,
    engine: Arc<SharedEngine>,
    catalog: Arc<StationCatalog>,
    settings: OrchestratorSettings,
    view: Mutex<ViewState>,
    loading: watch::Sender<bool>,
    /// Bumped by every change that fetches; only the latest may render or
    /// clear the loading flag.
    fetch_generation: AtomicU64,
}

impl<B: RidershipBackend> Orchestrator<B> {
    pub fn new(
        coordinator: RequestCoordinator<B>,
        engine: Arc<SharedEngine>,
        catalog: Arc<StationCatalog>,
        settings: OrchestratorSettings,
        selection: FilterSelection,
    ) -> Self {
        let (loading, _) = watch::channel(false);
        Self {
            coordinator,
            engine,
            catalog,
            settings,
            view: Mutex::new(ViewState {
                selection,
                fetched: None,
                samples: Vec::new(),
                auto_scale: 1.0,
                deferred: None,
            }),
            loading,
            fetch_generation: AtomicU64::new(0),
        }
    }

    fn view(&self) -> MutexGuard<'_, ViewState> {
        self.view.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn coordinator(&self) -> &RequestCoordinator<B> {
        &self.coordinator
    }

    pub fn engine(&self) -> &Arc<SharedEngine> {
        &self.engine
    }

    pub fn selection(&self) -> FilterSelection {
        self.view().selection.clone()
    }

    pub fn samples(&self) -> Vec<RidershipSample> {
        self.view().samples.clone()
    }

    /// The bar scale in effect: the locked one, or the automatic one.
    pub fn effective_scale(&self) -> f64 {
        self.view().scale()
    }

    /// Heights the current data settles at, independent of any running
    /// animation.
    pub fn target_heights(&self) -> HeightMap {
        let view = self.view();
        self.heights_for(&view)
    }

    pub fn is_loading(&self) -> bool {
        *self.loading.borrow()
    }

    pub fn loading_signal(&self) -> watch::Receiver<bool> {
        self.loading.subscribe()
    }

    pub fn bar_heights(&self) -> watch::Receiver<Arc<BarHeightState>> {
        self.engine.subscribe()
    }

    /// Fetch and render the current selection for the first time.
    pub async fn initial_load(&self) -> Result<ChangeOutcome, FetchError> {
        self.apply_change(FilterDelta::default()).await
    }

    /// Apply a filter delta. Resolves once the transition for this change has
    /// been started (not finished), or once the change is known to be
    /// superseded. Cancellation is never reported as an error.
    pub async fn apply_change(&self, delta: FilterDelta) -> Result<ChangeOutcome, FetchError> {
        let (next, changes, initial_load, previous_station, generation) = {
            let mut view = self.view();
            let (next, changes) = view.selection.merge(&delta);
            if let Err(e) = next.validate() {
                logging::warn(
                    Component::Orchestrator,
                    None,
                    &format!("rejected filter change: {}", e),
                );
                return Err(e);
            }
            let initial_load = view.fetched.is_none();
            let previous_station = view.selection.station.clone();
            view.selection = next.clone();

            if !changes.should_fetch(initial_load) {
                if !changes.any() {
                    return Ok(ChangeOutcome::Unchanged);
                }
                return Ok(self.rerender(&mut view, changes.should_animate_transition(initial_load)));
            }

            // Bumped under the view lock so a stale result can never be
            // applied on top of a newer commit.
            let generation = self.fetch_generation.fetch_add(1, Ordering::SeqCst) + 1;
            self.loading.send_replace(true);
            (next, changes, initial_load, previous_station, generation)
        };

        let station = next.station.station_id().map(str::to_string);
        logging::debug(
            Component::Orchestrator,
            station.as_deref(),
            &format!("fetching for {} {}", next.station, next.direction),
        );

        // Show the wave at once when the view jumps between individual
        // stations; otherwise only when the fetch outlasts the grace period.
        let eager = initial_load
            || ((changes.station || changes.direction) && !previous_station.is_all());

        let fetch = self.coordinator.fetch(&next);
        tokio::pin!(fetch);

        let mut loading_wave: Option<CompletionHandle> = None;
        if eager {
            loading_wave = Some(self.engine.start(self.loading_spec(&next)));
        }

        let settled = if loading_wave.is_some() {
            Some(fetch.as_mut().await)
        } else {
            tokio::select! {
                biased;
                result = fetch.as_mut() => Some(result),
                _ = tokio::time::sleep(self.settings.grace) => None,
            }
        };
        let result = match settled {
            Some(result) => result,
            None => {
                loading_wave = Some(self.engine.start(self.loading_spec(&next)));
                fetch.as_mut().await
            }
        };
        let loading_shown = loading_wave.is_some();

        match result {
            Err(FetchError::Cancelled) => Ok(ChangeOutcome::Superseded),
            Err(e) => {
                let mut view = self.view();
                if self.is_current(generation) {
                    logging::warn(
                        Component::Orchestrator,
                        station.as_deref(),
                        &format!("keeping previous data: {}", e),
                    );
                    view.roll_back_query_fields();
                    self.restore_after_failure(&mut view);
                    self.loading.send_replace(false);
                }
                Err(e)
            }
            Ok(result) => {
                if let Some(wave) = loading_wave {
                    wave.await;
                }
                let mut view = self.view();
                if !self.is_current(generation) {
                    return Ok(ChangeOutcome::Superseded);
                }
                view.apply_result(result);
                view.deferred = None;
                self.start_transition(self.heights_for(&view));
                self.loading.send_replace(false);
                drop(view);

                logging::debug(
                    Component::Orchestrator,
                    station.as_deref(),
                    &format!("rendered (loading wave shown: {})", loading_shown),
                );
                Ok(ChangeOutcome::Rendered {
                    fetched: true,
                    loading_shown,
                })
            }
        }
    }

    /// Hour or scale changed: redraw from the samples already held, or leave
    /// it to the pending fetch.
    fn rerender(&self, view: &mut ViewState, animate: bool) -> ChangeOutcome {
        if self.is_loading() {
            view.deferred = Some(view.deferred.unwrap_or(false) || animate);
            return ChangeOutcome::Deferred;
        }
        view.refresh_auto_scale();
        self.render_held(view, animate);
        ChangeOutcome::Rendered {
            fetched: false,
            loading_shown: false,
        }
    }

    /// The failed fetch renders nothing new. Bring back the held data if a
    /// loading motif is on screen (this change's or a superseded one's), and
    /// catch up on any hour or scale change deferred while it was pending.
    fn restore_after_failure(&self, view: &mut ViewState) {
        view.refresh_auto_scale();
        let deferred = view.deferred.take();
        let wave_running = matches!(
            self.engine.active_kind(),
            Some(SpecKind::WaveRadial | SpecKind::WaveVertical)
        );
        let loading_on_screen =
            wave_running || self.engine.snapshot().kind == RenderKind::Loading;
        if loading_on_screen {
            self.render_held(view, true);
        } else if let Some(animate) = deferred {
            self.render_held(view, animate);
        }
    }

    fn render_held(&self, view: &ViewState, animate: bool) {
        let heights = self.heights_for(view);
        if animate {
            self.start_transition(heights);
        } else {
            self.engine.start(AnimationSpec::Instant { heights });
        }
    }

    fn heights_for(&self, view: &ViewState) -> HeightMap {
        target_heights(
            &self.catalog,
            &view.samples,
            view.selection.hour,
            view.selection.percentage_mode,
            view.scale(),
            self.engine.height_unit(),
        )
    }

    fn start_transition(&self, heights: HeightMap) {
        self.engine.start(AnimationSpec::Transition {
            from_heights: None,
            to_heights: heights,
            duration: self.settings.transition,
            easing: self.settings.easing,
        });
    }

    /// Radial wave around the selected station; vertical sweep for the
    /// all-stations view or a station missing from the catalog.
    fn loading_spec(&self, selection: &FilterSelection) -> AnimationSpec {
        let targets = self.catalog.targets();
        let center = match &selection.station {
            StationSelector::Station(id) => self.catalog.find(id),
            StationSelector::AllStations => None,
        };
        match center {
            Some(center) => AnimationSpec::WaveRadial {
                direction: match selection.direction {
                    Direction::ComingFrom => WaveDirection::In,
                    Direction::GoingTo => WaveDirection::Out,
                },
                center: center.clone(),
                targets,
            },
            None => AnimationSpec::WaveVertical { targets },
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.fetch_generation.load(Ordering::SeqCst) == generation
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
