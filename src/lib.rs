/// Data-refresh pipeline for an animated ridership bar map.
///
/// A filter change flows through three pieces:
/// - `coordinator` fetches the matching ridership slice, superseding any
///   earlier request.
/// - `animation` owns the one active bar animation and renders it per frame.
/// - `orchestrator` sequences the two: grace period, loading wave, and the
///   transition to the new heights.

pub mod analysis;
pub mod animation;
pub mod cache;
pub mod config;
pub mod coordinator;
pub mod ingest;
pub mod logging;
pub mod model;
pub mod orchestrator;
pub mod selection;
pub mod stations;
