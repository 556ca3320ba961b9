//! Pipeline entry points.
//!
//! - `run_ingestion`: fetch all sources, normalize and store listings
//! - `Rankings`: ending-soon and nearby views over stored auctions
//! - `run_validate`: check configuration and source selectors

pub mod circuit_breaker;
pub mod ingest;
pub mod normalize;
pub mod rank;
mod validate;

pub use ingest::{IngestionSummary, geocode_pending, run_ingestion};
pub use normalize::Normalizer;
pub use rank::{ProximityRequest, RankedPage, Rankings};
pub use validate::run_validate;
