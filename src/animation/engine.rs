//! Single-active-animation engine.
//!
//! At most one animation runs at a time. `start` synchronously retires the
//! previous one (settling its completion handle with `Completion::Retired`)
//! before installing the new one. Each tick advances the explicit
//! `AnimationState` through the pure `AnimationState::step`, and the engine
//! replaces its snapshot with the result.
//!
//! The engine never reads the wall clock itself; every operation takes the
//! current instant from the caller.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::config::AnimationConfig;
use crate::model::StationId;

use super::spec::{
    AnimationSpec, BarHeightState, Completion, CompletionHandle, Easing, HeightMap, RenderKind,
    SpecKind, TargetMap, WaveDirection,
};

/// Wavefront overshoot so the pulse fully clears the farthest station
/// before the cycle wraps.
const RADIAL_OVERSHOOT: f64 = 1.1;

/// Inverse half-width of the vertical sweep's pulse.
const VERTICAL_FALLOFF: f64 = 20.0;

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EngineEvent {
    Started { kind: SpecKind, at: Instant },
    /// The completion handle fired: end of a transition, or the first full
    /// cycle of a wave (which keeps running).
    Completed { kind: SpecKind, at: Instant },
    Retired { kind: SpecKind, at: Instant },
}

// ---------------------------------------------------------------------------
// Precomputed plans
// ---------------------------------------------------------------------------

/// Per-entity geometry resolved once at `start`.
#[derive(Debug)]
enum Plan {
    Radial {
        direction: WaveDirection,
        /// Normalized distance to the center; `None` for a station sitting
        /// exactly on it.
        distances: Vec<(StationId, Option<f64>)>,
    },
    Vertical {
        /// 0 at the northmost station, 1 at the southmost.
        positions: Vec<(StationId, f64)>,
    },
    Transition {
        from: HeightMap,
        to: HeightMap,
        duration_ms: f64,
        easing: Easing,
    },
}

fn radial_plan(direction: WaveDirection, center: [f64; 2], targets: &TargetMap) -> Plan {
    let raw: Vec<(StationId, f64)> = targets
        .iter()
        .map(|(id, [lon, lat])| {
            let dx = lon - center[0];
            let dy = lat - center[1];
            (id.clone(), (dx * dx + dy * dy).sqrt())
        })
        .collect();
    let max_distance = raw.iter().map(|(_, d)| *d).fold(0.0_f64, f64::max);

    let distances = raw
        .into_iter()
        .map(|(id, d)| {
            if d == 0.0 {
                (id, None)
            } else {
                (id, Some(d / max_distance))
            }
        })
        .collect();

    Plan::Radial {
        direction,
        distances,
    }
}

fn vertical_plan(targets: &TargetMap) -> Plan {
    let northmost = targets.values().map(|[_, lat]| *lat).fold(f64::MIN, f64::max);
    let southmost = targets.values().map(|[_, lat]| *lat).fold(f64::MAX, f64::min);
    let lat_range = northmost - southmost;

    let positions = targets
        .iter()
        .map(|(id, [_, lat])| {
            let progress = if lat_range > 0.0 {
                (northmost - lat) / lat_range
            } else {
                0.0
            };
            (id.clone(), progress)
        })
        .collect();

    Plan::Vertical { positions }
}

// ---------------------------------------------------------------------------
// State and pure step
// ---------------------------------------------------------------------------

/// Everything a running animation needs to compute its next frame.
#[derive(Debug, Clone)]
pub struct AnimationState {
    kind: SpecKind,
    plan: Arc<Plan>,
    started_at: Instant,
    /// Highest unwrapped cycle progress seen so far (cyclic specs only).
    peak_progress: f64,
}

/// Output of one `AnimationState::step`.
#[derive(Debug, Clone)]
pub struct Step {
    pub snapshot: BarHeightState,
    pub progress: f64,
    /// The completion handle should fire on this step.
    pub completed: bool,
    /// The animation is over and should be removed.
    pub finished: bool,
}

impl AnimationState {
    /// Resolve `spec` against the engine's last snapshot. Returns `None` for
    /// `Instant`, which is never scheduled.
    fn new(spec: AnimationSpec, now: Instant, last: &BarHeightState) -> Option<Self> {
        let kind = spec.kind();
        let plan = match spec {
            AnimationSpec::WaveRadial {
                direction,
                center,
                targets,
            } => radial_plan(direction, center.coords(), &targets),
            AnimationSpec::WaveVertical { targets } => vertical_plan(&targets),
            AnimationSpec::Transition {
                from_heights,
                to_heights,
                duration,
                easing,
            } => Plan::Transition {
                from: from_heights.unwrap_or_else(|| last.height_map()),
                to: to_heights,
                duration_ms: duration.as_secs_f64() * 1000.0,
                easing,
            },
            AnimationSpec::Instant { .. } => return None,
        };
        Some(Self {
            kind,
            plan: Arc::new(plan),
            started_at: now,
            peak_progress: 0.0,
        })
    }

    pub fn kind(&self) -> SpecKind {
        self.kind
    }

    /// Advance to `now`. Pure: the returned state replaces `self`.
    pub fn step(&self, now: Instant, config: &AnimationConfig) -> (AnimationState, Step) {
        let elapsed_ms = now.saturating_duration_since(self.started_at).as_secs_f64() * 1000.0;

        match &*self.plan {
            Plan::Radial {
                direction,
                distances,
            } => {
                let (next, progress, completed) = self.advance_cycle(elapsed_ms, config);
                let wavefront = progress * RADIAL_OVERSHOOT;
                let heights = distances
                    .iter()
                    .map(|(id, distance)| {
                        let height = match distance {
                            None => 0.0,
                            Some(d) => {
                                let along = match direction {
                                    WaveDirection::Out => *d,
                                    WaveDirection::In => 1.0 - d,
                                };
                                let distance_from_wave = (along - wavefront).abs();
                                let effect = (1.0 - distance_from_wave / config.wave_width).max(0.0);
                                pulse_height(effect, config)
                            }
                        };
                        (id.clone(), height)
                    })
                    .collect();
                let step = Step {
                    snapshot: BarHeightState::from_heights(RenderKind::Loading, &heights),
                    progress,
                    completed,
                    finished: false,
                };
                (next, step)
            }
            Plan::Vertical { positions } => {
                let (next, progress, completed) = self.advance_cycle(elapsed_ms, config);
                let wrapped = (progress + 1.0) % 1.0;
                let heights = positions
                    .iter()
                    .map(|(id, station_progress)| {
                        let distance_from_wave = (wrapped - station_progress).abs();
                        let effect = (1.0 - distance_from_wave * VERTICAL_FALLOFF).max(0.0);
                        (id.clone(), pulse_height(effect, config))
                    })
                    .collect();
                let step = Step {
                    snapshot: BarHeightState::from_heights(RenderKind::Loading, &heights),
                    progress,
                    completed,
                    finished: false,
                };
                (next, step)
            }
            Plan::Transition {
                from,
                to,
                duration_ms,
                easing,
            } => {
                let progress = if *duration_ms <= 0.0 {
                    1.0
                } else {
                    (elapsed_ms / duration_ms).min(1.0)
                };
                let snapshot = if progress >= 1.0 {
                    BarHeightState::from_heights(RenderKind::Data, to)
                } else {
                    BarHeightState::from_heights(
                        RenderKind::Data,
                        &interpolate(from, to, easing.apply(progress)),
                    )
                };
                let done = progress >= 1.0;
                let step = Step {
                    snapshot,
                    progress,
                    completed: done,
                    finished: done,
                };
                (self.clone(), step)
            }
        }
    }

    /// Cyclic progress plus first-full-cycle detection.
    fn advance_cycle(&self, elapsed_ms: f64, config: &AnimationConfig) -> (AnimationState, f64, bool) {
        let raw = elapsed_ms * config.wave_speed;
        let progress = raw % 1.0;
        let peak = self.peak_progress.max(raw);
        let completed = self.peak_progress < 1.0 && peak >= 1.0;
        let next = AnimationState {
            peak_progress: peak,
            ..self.clone()
        };
        (next, progress, completed)
    }
}

fn pulse_height(effect: f64, config: &AnimationConfig) -> f64 {
    (config.min_pulse + (config.max_pulse - config.min_pulse) * effect) * config.height_unit
}

/// Per-entity interpolation; an entity missing on either side counts as 0.
fn interpolate(from: &HeightMap, to: &HeightMap, eased: f64) -> HeightMap {
    let ids: HashSet<&StationId> = from.keys().chain(to.keys()).collect();
    ids.into_iter()
        .map(|id| {
            let a = from.get(id).copied().unwrap_or(0.0);
            let b = to.get(id).copied().unwrap_or(0.0);
            (id.clone(), a + (b - a) * eased)
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

struct ActiveAnimation {
    state: AnimationState,
    completion: Option<oneshot::Sender<Completion>>,
}

pub struct AnimationEngine {
    config: AnimationConfig,
    active: Option<ActiveAnimation>,
    snapshot: Arc<BarHeightState>,
    events: Vec<EngineEvent>,
}

impl AnimationEngine {
    pub fn new(config: AnimationConfig) -> Self {
        Self {
            config,
            active: None,
            snapshot: Arc::new(BarHeightState::empty()),
            events: Vec::new(),
        }
    }

    pub fn config(&self) -> &AnimationConfig {
        &self.config
    }

    pub fn snapshot(&self) -> Arc<BarHeightState> {
        Arc::clone(&self.snapshot)
    }

    pub fn is_running(&self) -> bool {
        self.active.is_some()
    }

    pub fn active_kind(&self) -> Option<SpecKind> {
        self.active.as_ref().map(|a| a.state.kind())
    }

    /// Events recorded since the last drain, oldest first.
    pub fn drain_events(&mut self) -> Vec<EngineEvent> {
        std::mem::take(&mut self.events)
    }

    /// Replace whatever is running with `spec`.
    ///
    /// `Instant` applies synchronously and returns an already-finished handle.
    /// A spec with no targets leaves the engine untouched and also returns a
    /// finished handle.
    pub fn start(&mut self, spec: AnimationSpec, now: Instant) -> CompletionHandle {
        if spec.has_no_targets() {
            return CompletionHandle::ready(Completion::Finished);
        }

        self.retire(now);
        let kind = spec.kind();
        self.events.push(EngineEvent::Started { kind, at: now });

        if let AnimationSpec::Instant { heights } = &spec {
            self.snapshot = Arc::new(BarHeightState::from_heights(RenderKind::Data, heights));
            self.events.push(EngineEvent::Completed { kind, at: now });
            return CompletionHandle::ready(Completion::Finished);
        }

        let Some(state) = AnimationState::new(spec, now, &self.snapshot) else {
            return CompletionHandle::ready(Completion::Finished);
        };
        let (tx, handle) = CompletionHandle::pending();
        self.active = Some(ActiveAnimation {
            state,
            completion: Some(tx),
        });

        // Render the first frame right away so a zero-length transition is
        // already settled when `start` returns.
        self.tick(now);
        handle
    }

    /// Stop the running animation, keeping its last frame on screen.
    pub fn cancel(&mut self, now: Instant) {
        self.retire(now);
    }

    /// Advance the running animation to `now` and return the new snapshot.
    pub fn tick(&mut self, now: Instant) -> Arc<BarHeightState> {
        let Some(active) = self.active.as_mut() else {
            return self.snapshot();
        };

        let (next, step) = active.state.step(now, &self.config);
        active.state = next;
        self.snapshot = Arc::new(step.snapshot);

        let kind = active.state.kind();
        if step.completed {
            if let Some(tx) = active.completion.take() {
                let _ = tx.send(Completion::Finished);
            }
            self.events.push(EngineEvent::Completed { kind, at: now });
        }
        if step.finished {
            self.active = None;
        }
        self.snapshot()
    }

    fn retire(&mut self, now: Instant) {
        if let Some(mut previous) = self.active.take() {
            if let Some(tx) = previous.completion.take() {
                let _ = tx.send(Completion::Retired);
            }
            self.events.push(EngineEvent::Retired {
                kind: previous.state.kind(),
                at: now,
            });
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
