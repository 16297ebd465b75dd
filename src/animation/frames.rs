//! The rendering clock.
//!
//! `SharedEngine` wraps the engine for use from async code: the orchestrator
//! starts specs on it, and `FrameLoop` ticks it once per frame. Each new
//! snapshot is published on a `watch` channel for the map layer, and engine
//! lifecycle events on a `broadcast` channel.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::config::AnimationConfig;
use crate::logging::{self, Component};

use super::engine::{AnimationEngine, EngineEvent};
use super::spec::{AnimationSpec, BarHeightState, CompletionHandle, SpecKind};

const EVENT_CAPACITY: usize = 256;

pub struct SharedEngine {
    engine: Mutex<AnimationEngine>,
    snapshots: watch::Sender<Arc<BarHeightState>>,
    events: broadcast::Sender<EngineEvent>,
}

impl SharedEngine {
    pub fn new(config: AnimationConfig) -> Self {
        let engine = AnimationEngine::new(config);
        let (snapshots, _) = watch::channel(engine.snapshot());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            engine: Mutex::new(engine),
            snapshots,
            events,
        }
    }

    fn lock(&self) -> MutexGuard<'_, AnimationEngine> {
        self.engine.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn start(&self, spec: AnimationSpec) -> CompletionHandle {
        let mut engine = self.lock();
        let handle = engine.start(spec, Instant::now());
        self.publish(&mut engine);
        handle
    }

    pub fn cancel(&self) {
        let mut engine = self.lock();
        engine.cancel(Instant::now());
        self.publish(&mut engine);
    }

    pub fn tick(&self) -> Arc<BarHeightState> {
        self.tick_at(Instant::now())
    }

    pub fn tick_at(&self, now: Instant) -> Arc<BarHeightState> {
        let mut engine = self.lock();
        let snapshot = engine.tick(now);
        self.publish(&mut engine);
        snapshot
    }

    pub fn snapshot(&self) -> Arc<BarHeightState> {
        self.lock().snapshot()
    }

    pub fn active_kind(&self) -> Option<SpecKind> {
        self.lock().active_kind()
    }

    pub fn height_unit(&self) -> f64 {
        self.lock().config().height_unit
    }

    /// The current snapshot, updated once per rendered frame.
    pub fn subscribe(&self) -> watch::Receiver<Arc<BarHeightState>> {
        self.snapshots.subscribe()
    }

    pub fn events(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    fn publish(&self, engine: &mut AnimationEngine) {
        let snapshot = engine.snapshot();
        self.snapshots.send_if_modified(|current| {
            if Arc::ptr_eq(current, &snapshot) {
                false
            } else {
                *current = snapshot;
                true
            }
        });

        for event in engine.drain_events() {
            match event {
                EngineEvent::Started { kind, .. } => {
                    logging::debug(Component::Engine, None, &format!("started {}", kind))
                }
                EngineEvent::Completed { kind, .. } => {
                    logging::debug(Component::Engine, None, &format!("{} completed", kind))
                }
                EngineEvent::Retired { kind, .. } => {
                    logging::debug(Component::Engine, None, &format!("{} retired", kind))
                }
            }
            // No subscribers is fine.
            let _ = self.events.send(event);
        }
    }
}

/// Ticks a `SharedEngine` at a fixed frame interval, like a repeatedly
/// rescheduled animation-frame callback.
pub struct FrameLoop {
    engine: Arc<SharedEngine>,
    interval: Duration,
}

impl FrameLoop {
    pub fn new(engine: Arc<SharedEngine>, interval: Duration) -> Self {
        Self { engine, interval }
    }

    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            let now = ticker.tick().await;
            self.engine.tick_at(now);
        }
    }

    /// Run on the current runtime until the returned handle is aborted.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}
