//! Animation specs, rendered snapshots, and completion handles.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::oneshot;

use crate::model::{StationId, StationPoint};

/// Target bar height per station.
pub type HeightMap = HashMap<StationId, f64>;

/// `id -> [lon, lat]` for every entity a wave animates.
pub type TargetMap = HashMap<StationId, [f64; 2]>;

// ---------------------------------------------------------------------------
// Specs
// ---------------------------------------------------------------------------

/// Which way the radial wave travels relative to its center station.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaveDirection {
    /// From the farthest stations toward the center.
    In,
    /// From the center outward.
    Out,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Easing {
    Linear,
    EaseOutCubic,
}

impl Easing {
    pub fn apply(self, progress: f64) -> f64 {
        match self {
            Easing::Linear => progress,
            Easing::EaseOutCubic => 1.0 - (1.0 - progress).powi(3),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AnimationSpec {
    /// Cyclic loading pulse radiating around `center`.
    WaveRadial {
        direction: WaveDirection,
        center: StationPoint,
        targets: TargetMap,
    },
    /// Cyclic loading pulse sweeping north to south by latitude band.
    WaveVertical { targets: TargetMap },
    /// Finite interpolation between two height sets. `from_heights: None`
    /// starts from whatever the engine last rendered.
    Transition {
        from_heights: Option<HeightMap>,
        to_heights: HeightMap,
        duration: Duration,
        easing: Easing,
    },
    /// Synchronous jump to `heights`; never scheduled.
    Instant { heights: HeightMap },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpecKind {
    WaveRadial,
    WaveVertical,
    Transition,
    Instant,
}

impl fmt::Display for SpecKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpecKind::WaveRadial => write!(f, "wave-radial"),
            SpecKind::WaveVertical => write!(f, "wave-vertical"),
            SpecKind::Transition => write!(f, "transition"),
            SpecKind::Instant => write!(f, "instant"),
        }
    }
}

impl AnimationSpec {
    pub fn kind(&self) -> SpecKind {
        match self {
            AnimationSpec::WaveRadial { .. } => SpecKind::WaveRadial,
            AnimationSpec::WaveVertical { .. } => SpecKind::WaveVertical,
            AnimationSpec::Transition { .. } => SpecKind::Transition,
            AnimationSpec::Instant { .. } => SpecKind::Instant,
        }
    }

    pub fn is_cyclic(&self) -> bool {
        matches!(
            self,
            AnimationSpec::WaveRadial { .. } | AnimationSpec::WaveVertical { .. }
        )
    }

    /// A spec with no entities to draw. A `Transition` without explicit
    /// `from_heights` is never considered empty here, because its baseline
    /// is only known to the engine.
    pub fn has_no_targets(&self) -> bool {
        match self {
            AnimationSpec::WaveRadial { targets, .. } | AnimationSpec::WaveVertical { targets } => {
                targets.is_empty()
            }
            AnimationSpec::Transition {
                from_heights: Some(from),
                to_heights,
                ..
            } => from.is_empty() && to_heights.is_empty(),
            AnimationSpec::Transition { .. } => false,
            AnimationSpec::Instant { heights } => heights.is_empty(),
        }
    }
}

// ---------------------------------------------------------------------------
// Snapshots
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderKind {
    Loading,
    Data,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BarHeight {
    pub current_height: f64,
}

/// The engine's single rendered snapshot, consumed by the map every frame.
#[derive(Debug, Clone, PartialEq)]
pub struct BarHeightState {
    pub kind: RenderKind,
    pub heights: HashMap<StationId, BarHeight>,
}

impl BarHeightState {
    pub fn empty() -> Self {
        Self {
            kind: RenderKind::Data,
            heights: HashMap::new(),
        }
    }

    pub fn from_heights(kind: RenderKind, heights: &HeightMap) -> Self {
        Self {
            kind,
            heights: heights
                .iter()
                .map(|(id, h)| (id.clone(), BarHeight { current_height: *h }))
                .collect(),
        }
    }

    pub fn height_of(&self, id: &str) -> Option<f64> {
        self.heights.get(id).map(|b| b.current_height)
    }

    pub fn height_map(&self) -> HeightMap {
        self.heights
            .iter()
            .map(|(id, b)| (id.clone(), b.current_height))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Completion
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// A transition reached progress 1, or a wave finished its first cycle.
    Finished,
    /// The animation was cancelled or replaced before finishing.
    Retired,
}

/// Resolves exactly once. Never left pending by a retired animation: the
/// engine settles it with `Retired`, and a dropped sender reads the same way.
#[derive(Debug)]
pub struct CompletionHandle {
    state: HandleState,
}

#[derive(Debug)]
enum HandleState {
    Ready(Completion),
    Waiting(oneshot::Receiver<Completion>),
    Done,
}

impl CompletionHandle {
    pub(crate) fn pending() -> (oneshot::Sender<Completion>, CompletionHandle) {
        let (tx, rx) = oneshot::channel();
        (
            tx,
            CompletionHandle {
                state: HandleState::Waiting(rx),
            },
        )
    }

    pub(crate) fn ready(completion: Completion) -> CompletionHandle {
        CompletionHandle {
            state: HandleState::Ready(completion),
        }
    }

    /// Non-blocking peek; `None` while the animation is still going.
    pub fn try_completion(&mut self) -> Option<Completion> {
        match &mut self.state {
            HandleState::Ready(c) => Some(*c),
            HandleState::Waiting(rx) => match rx.try_recv() {
                Ok(c) => {
                    self.state = HandleState::Ready(c);
                    Some(c)
                }
                Err(oneshot::error::TryRecvError::Empty) => None,
                Err(oneshot::error::TryRecvError::Closed) => {
                    self.state = HandleState::Ready(Completion::Retired);
                    Some(Completion::Retired)
                }
            },
            HandleState::Done => Some(Completion::Retired),
        }
    }
}

impl Future for CompletionHandle {
    type Output = Completion;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Completion> {
        let this = &mut *self;
        match &mut this.state {
            HandleState::Ready(c) => {
                let c = *c;
                this.state = HandleState::Done;
                Poll::Ready(c)
            }
            HandleState::Waiting(rx) => match Pin::new(rx).poll(cx) {
                Poll::Ready(result) => {
                    this.state = HandleState::Done;
                    Poll::Ready(result.unwrap_or(Completion::Retired))
                }
                Poll::Pending => Poll::Pending,
            },
            HandleState::Done => Poll::Ready(Completion::Retired),
        }
    }
}
