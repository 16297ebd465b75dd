/// Data shaping for the bar map.
///
/// Submodules:
/// - `heights`: percentage derivation, automatic bar scale, and per-station
///   target heights.

pub mod heights;
