//! Storage abstractions for auction persistence.
//!
//! One logical schema is served over SQLite and PostgreSQL:
//!
//! ```text
//! auction_sources ─┐
//!                  ├─< auctions >─┬─< auction_images
//! locations ───────┤              └─< auction_details
//! auction_categories (self-parented tree)
//! zip_coordinates           # geocode cache
//! ```
//!
//! Timestamps are stored as fixed-width UTC text so that string order is
//! chronological order on both engines.

pub mod dialect;
pub mod schema;
mod sql;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};

use crate::error::{AppError, Result};
use crate::geo::{Coordinates, GeocodeCache};
use crate::models::{
    AuctionStatus, AuctionSummary, DatabaseConfig, NormalizedAuction, PendingLocation,
    SourceInfo, UpsertOutcome,
};

pub use dialect::{Dialect, Postgres, Sqlite};
pub use sql::{PostgresStore, SqlStore, SqliteStore};

/// Persistence operations needed by ingestion and ranking.
#[async_trait]
pub trait AuctionStore: Send + Sync {
    /// Engine name, for logs.
    fn dialect_name(&self) -> &'static str;

    /// The same store viewed as a geocode cache.
    fn geocode_cache(self: Arc<Self>) -> Arc<dyn GeocodeCache>;

    /// Create tables and indexes if missing.
    async fn create_schema(&self) -> Result<()>;

    /// Get-or-create a source by name, refreshing its metadata.
    async fn ensure_source(&self, source: &SourceInfo) -> Result<i64>;

    /// Get-or-create each category of a root-to-leaf path, returning the leaf.
    async fn ensure_category_path(&self, path: &[String]) -> Result<Option<i64>>;

    /// Re-parent a category. Rejects assignments that would create a cycle.
    async fn set_category_parent(&self, category_id: i64, parent_id: Option<i64>) -> Result<()>;

    /// Ancestor ids from nearest parent to root.
    async fn category_ancestors(&self, category_id: i64) -> Result<Vec<i64>>;

    /// Insert or update one normalized auction in a single transaction.
    async fn upsert_auction(
        &self,
        source_id: i64,
        auction: &NormalizedAuction,
        now: DateTime<Utc>,
    ) -> Result<UpsertOutcome>;

    async fn get_auction(&self, auction_id: i64) -> Result<Option<AuctionSummary>>;

    /// Auctions with `status`, soonest end first, ties by id. Pages are 1-based.
    async fn get_by_end_time_ascending(
        &self,
        page: u32,
        page_size: u32,
        status: AuctionStatus,
    ) -> Result<Vec<AuctionSummary>>;

    /// Located active auctions within `max_miles` of `origin`, nearest first.
    async fn get_by_proximity_ascending(
        &self,
        origin: Coordinates,
        max_miles: f64,
        page: u32,
        page_size: u32,
    ) -> Result<Vec<AuctionSummary>>;

    /// Locations referenced by active auctions whose coordinates are unknown.
    async fn locations_missing_coordinates(&self, limit: u32) -> Result<Vec<PendingLocation>>;

    /// Fill in coordinates. Returns false if they were already known.
    async fn set_location_coordinates(&self, location_id: i64, coords: Coordinates)
    -> Result<bool>;

    /// End active auctions of a source last seen before `seen_before`.
    async fn mark_stale_ended(
        &self,
        source_id: i64,
        seen_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<u64>;

    /// Mark one active auction removed. Returns false if it was not active.
    async fn mark_removed(&self, auction_id: i64, now: DateTime<Utc>) -> Result<bool>;

    /// Delete ended/removed auctions whose end date is before `cutoff`.
    async fn purge_ended_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    async fn count_auctions(&self, status: Option<AuctionStatus>) -> Result<u64>;

    async fn count_active_for_source(&self, source_id: i64) -> Result<u64>;
}

/// Open a store for a database URL, choosing the dialect by scheme.
pub async fn connect(url: &str, config: &DatabaseConfig) -> Result<Arc<dyn AuctionStore>> {
    let scheme = url.split(':').next().unwrap_or_default().to_ascii_lowercase();
    match scheme.as_str() {
        "sqlite" => Ok(Arc::new(SqliteStore::connect(url, config).await?)),
        "postgres" | "postgresql" => Ok(Arc::new(PostgresStore::connect(url, config).await?)),
        _ => Err(AppError::config(format!(
            "unsupported database URL scheme '{scheme}' (expected sqlite or postgres)"
        ))),
    }
}

/// Canonical stored form of a timestamp.
pub fn encode_timestamp(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

pub fn decode_timestamp(text: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| AppError::validation(format!("bad stored timestamp '{text}': {e}")))
}

/// Cutoff for purging auctions that ended more than `older_than_days` ago.
pub fn cleanup_cutoff(now: DateTime<Utc>, older_than_days: i64) -> Result<DateTime<Utc>> {
    TimeDelta::try_days(older_than_days)
        .filter(|age| *age >= TimeDelta::zero())
        .and_then(|age| now.checked_sub_signed(age))
        .ok_or_else(|| {
            AppError::validation(format!("older-than-days {older_than_days} is out of range"))
        })
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn timestamps_are_fixed_width_and_ordered() {
        let a = Utc.with_ymd_and_hms(2025, 3, 9, 5, 0, 0).unwrap();
        let b = Utc.with_ymd_and_hms(2025, 11, 18, 16, 30, 0).unwrap();

        let (ea, eb) = (encode_timestamp(a), encode_timestamp(b));
        assert_eq!(ea, "2025-03-09T05:00:00.000Z");
        assert_eq!(ea.len(), eb.len());
        assert!(ea < eb);
        assert_eq!(decode_timestamp(&eb).unwrap(), b);
    }

    #[test]
    fn cleanup_cutoff_rejects_out_of_range_ages() {
        let now = Utc.with_ymd_and_hms(2025, 3, 9, 5, 0, 0).unwrap();
        assert_eq!(
            cleanup_cutoff(now, 90).unwrap(),
            Utc.with_ymd_and_hms(2024, 12, 9, 5, 0, 0).unwrap()
        );
        assert_eq!(cleanup_cutoff(now, 0).unwrap(), now);
        assert!(cleanup_cutoff(now, -1).is_err());
        assert!(cleanup_cutoff(now, i64::MAX).is_err());
        assert!(cleanup_cutoff(now, 999_999_999_999).is_err());
    }

    #[tokio::test]
    async fn unknown_scheme_is_config_error() {
        let result = connect("mysql://localhost/db", &DatabaseConfig::default()).await;
        assert!(matches!(result, Err(AppError::Config(_))));
    }
}
