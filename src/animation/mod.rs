/// Bar-height animation.
///
/// Submodules:
/// - `spec`: animation specs, rendered snapshots, completion handles.
/// - `engine`: the single-active-animation state machine and its pure step.
/// - `frames`: shared engine plus the frame loop that ticks it.

pub mod engine;
pub mod frames;
pub mod spec;

pub use engine::{AnimationEngine, AnimationState, EngineEvent};
pub use frames::{FrameLoop, SharedEngine};
pub use spec::{
    AnimationSpec, BarHeight, BarHeightState, Completion, CompletionHandle, Easing, HeightMap,
    RenderKind, SpecKind, TargetMap, WaveDirection,
};
