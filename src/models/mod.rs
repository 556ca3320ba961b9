// src/models/mod.rs

//! Domain models for the auction aggregator.
//!
//! This module contains all data structures used throughout the application,
//! organized by their primary purpose.

mod auction;
mod config;
mod raw;
mod selectors;

// Re-export all public types
pub use auction::{
    AuctionStatus, AuctionSummary, DEFAULT_CATEGORIES, DedupKey, DetailInput, ImageInput,
    LocationInput, NormalizedAuction, PendingLocation, SourceInfo, UpsertOutcome,
};
pub use config::{
    Config, DatabaseConfig, GeocoderConfig, HttpConfig, IngestionConfig, RankingConfig,
    SourceConfig, SourceKind,
};
pub use raw::{RawRecord, RawValue, raw_record};
pub use selectors::ListingSelectors;
