/// Data ingestion from the ridership query service.
///
/// Submodules:
/// - `backend`: the `RidershipBackend` seam and its HTTP implementation.

pub mod backend;
