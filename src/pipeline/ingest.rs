// src/pipeline/ingest.rs

//! Ingestion pipeline: fetch every source, normalize, upsert.

use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};

use crate::error::{AppError, Result};
use crate::geo::Geocoder;
use crate::models::{IngestionConfig, LocationInput, RawRecord};
use crate::pipeline::circuit_breaker::CircuitBreaker;
use crate::pipeline::normalize::Normalizer;
use crate::services::SourceAdapter;
use crate::storage::AuctionStore;
use crate::utils::report;

/// Pending locations geocoded at the end of a run.
const GEOCODE_BATCH: u32 = 200;

/// Counters for one ingestion run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngestionSummary {
    /// New auctions inserted
    pub created: usize,
    /// Existing auctions updated
    pub updated: usize,
    /// Records whose write failed
    pub failed: usize,
    /// Records rejected by normalization
    pub skipped: usize,
    pub sources_ok: usize,
    pub sources_failed: usize,
    /// Absent auctions moved to ended
    pub marked_ended: u64,
    /// Locations given coordinates after the run
    pub geocoded: usize,
    /// Run stopped early after repeated store connectivity failures
    pub aborted: bool,
}

impl IngestionSummary {
    pub fn is_success(&self) -> bool {
        !self.aborted && self.sources_failed == 0
    }

    pub fn processed(&self) -> usize {
        self.created + self.updated + self.failed + self.skipped
    }

    /// Write the summary through the run report.
    pub fn report(&self, started: DateTime<Utc>, finished: DateTime<Utc>) {
        report::summary(
            "Ingestion",
            &[
                ("created", self.created.to_string()),
                ("updated", self.updated.to_string()),
                ("failed", self.failed.to_string()),
                ("skipped", self.skipped.to_string()),
                (
                    "sources",
                    format!("{} ok, {} failed", self.sources_ok, self.sources_failed),
                ),
                ("marked ended", self.marked_ended.to_string()),
                ("geocoded", self.geocoded.to_string()),
                ("aborted", self.aborted.to_string()),
                (
                    "duration",
                    format!("{}s", (finished - started).num_seconds()),
                ),
            ],
        );
    }
}

/// Tracks consecutive store connectivity failures across the whole run.
struct FailureGuard {
    consecutive: usize,
    limit: usize,
}

impl FailureGuard {
    fn new(limit: usize) -> Self {
        Self {
            consecutive: 0,
            limit: limit.max(1),
        }
    }

    fn success(&mut self) {
        self.consecutive = 0;
    }

    /// Record a failure. Returns true when the run should abort.
    fn failure(&mut self, error: &AppError) -> bool {
        if error.is_connectivity() {
            self.consecutive += 1;
        } else {
            self.consecutive = 0;
        }
        self.consecutive >= self.limit
    }
}

/// Run one ingestion pass over `adapters`.
///
/// Sources are fetched concurrently (at most `max_concurrent` at a time)
/// and written one record per transaction. A failed source never affects the
/// others. Safe to call repeatedly.
pub async fn run_ingestion(
    store: &dyn AuctionStore,
    geocoder: Option<&Geocoder>,
    adapters: &[Box<dyn SourceAdapter>],
    config: &IngestionConfig,
    max_concurrent: usize,
) -> IngestionSummary {
    let run_start = Utc::now();
    let mut summary = IngestionSummary::default();

    let normalizer = match Normalizer::new(config.source_utc_offset_hours) {
        Ok(normalizer) => normalizer,
        Err(e) => {
            log::error!("Cannot start ingestion: {}", e);
            summary.aborted = true;
            return summary;
        }
    };

    report::step(1, 3, &format!("Fetching {} sources", adapters.len()));
    let fetched = fetch_all(adapters, config, max_concurrent).await;

    report::step(2, 3, "Normalizing and storing auctions");
    let breaker = CircuitBreaker::with_config(config.into());
    let seen_before = run_start - config.grace_period();
    let mut guard = FailureGuard::new(config.max_consecutive_store_failures);

    for (adapter, result) in fetched {
        let info = adapter.info();
        let records = match result {
            Ok(records) => records,
            Err(e) => {
                log::warn!("Source {} failed: {}", info.name, e);
                summary.sources_failed += 1;
                continue;
            }
        };

        let source_id = match store.ensure_source(info).await {
            Ok(id) => {
                guard.success();
                id
            }
            Err(e) => {
                log::error!("Cannot register source {}: {}", info.name, e);
                summary.sources_failed += 1;
                if guard.failure(&e) {
                    summary.aborted = true;
                    break;
                }
                continue;
            }
        };

        let active_before = match store.count_active_for_source(source_id).await {
            Ok(count) => Some(count),
            Err(e) => {
                log::warn!("Cannot count active auctions for {}: {}", info.name, e);
                None
            }
        };

        let mut source_failures = 0;
        for raw in &records {
            let now = Utc::now();
            let auction = match normalizer.normalize(info, raw, now) {
                Ok(auction) => auction,
                Err(e) => {
                    log::debug!("[{}] Skipping record: {}", info.key, e);
                    summary.skipped += 1;
                    continue;
                }
            };

            match store.upsert_auction(source_id, &auction, now).await {
                Ok(outcome) => {
                    guard.success();
                    if outcome.created {
                        summary.created += 1;
                    } else {
                        summary.updated += 1;
                    }
                }
                Err(e) => {
                    log::warn!("[{}] Failed to store '{}': {}", info.key, auction.title, e);
                    summary.failed += 1;
                    source_failures += 1;
                    if guard.failure(&e) {
                        log::error!(
                            "Aborting ingestion after {} consecutive store failures",
                            guard.consecutive
                        );
                        summary.aborted = true;
                        break;
                    }
                }
            }
        }

        if summary.aborted {
            break;
        }
        summary.sources_ok += 1;

        // Partial writes leave some auctions with an old last_seen_at.
        if source_failures > 0 {
            log::warn!(
                "[{}] {} write failures; skipping stale cleanup",
                info.key,
                source_failures
            );
            continue;
        }
        let Some(active_before) = active_before else {
            continue;
        };
        if breaker.allow_cleanup(&info.key, records.len(), active_before) {
            match store.mark_stale_ended(source_id, seen_before, Utc::now()).await {
                Ok(ended) => {
                    if ended > 0 {
                        log::info!("[{}] Marked {} absent auctions ended", info.key, ended);
                    }
                    summary.marked_ended += ended;
                }
                Err(e) => log::warn!("[{}] Stale cleanup failed: {}", info.key, e),
            }
        }
    }

    report::step(3, 3, "Geocoding new locations");
    if let Some(geocoder) = geocoder.filter(|_| !summary.aborted) {
        let (resolved, _) = geocode_pending(store, geocoder, GEOCODE_BATCH).await;
        summary.geocoded = resolved;
    }

    summary.report(run_start, Utc::now());
    summary
}

async fn fetch_all<'a>(
    adapters: &'a [Box<dyn SourceAdapter>],
    config: &IngestionConfig,
    max_concurrent: usize,
) -> Vec<(&'a dyn SourceAdapter, Result<Vec<RawRecord>>)> {
    let limit = Duration::from_secs(config.adapter_timeout_secs);

    stream::iter(adapters.iter())
        .map(|adapter| async move {
            let adapter: &dyn SourceAdapter = adapter.as_ref();
            let result = match tokio::time::timeout(limit, adapter.fetch()).await {
                Ok(result) => result,
                Err(_) => Err(AppError::timeout(
                    format!("fetching {}", adapter.info().name),
                    limit.as_secs(),
                )),
            };
            if let Ok(records) = &result {
                log::info!("[{}] fetched {} records", adapter.info().key, records.len());
            }
            (adapter, result)
        })
        .buffer_unordered(max_concurrent.max(1))
        .collect()
        .await
}

/// Geocode stored locations that have no coordinates yet.
///
/// Returns `(resolved, failed)`. Failures are logged and left for a later
/// attempt.
pub async fn geocode_pending(
    store: &dyn AuctionStore,
    geocoder: &Geocoder,
    limit: u32,
) -> (usize, usize) {
    let pending = match store.locations_missing_coordinates(limit).await {
        Ok(pending) => pending,
        Err(e) => {
            log::warn!("Cannot list locations to geocode: {}", e);
            return (0, 0);
        }
    };

    let (mut resolved, mut failed) = (0, 0);
    for location in pending {
        let input = LocationInput {
            city: location.city.clone(),
            state: location.state.clone(),
            zip_code: location.zip_code.clone(),
            ..LocationInput::default()
        };
        match geocoder.resolve_location(&input).await {
            Ok(Some(coords)) => {
                match store
                    .set_location_coordinates(location.location_id, coords)
                    .await
                {
                    Ok(_) => resolved += 1,
                    Err(e) => {
                        log::warn!("Cannot save coordinates: {}", e);
                        failed += 1;
                    }
                }
            }
            Ok(None) => {}
            Err(e) => {
                log::debug!("Geocode failed for location {}: {}", location.location_id, e);
                failed += 1;
            }
        }
    }
    (resolved, failed)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::geo::{Coordinates, GeocodingClient};
    use crate::models::{AuctionStatus, DatabaseConfig, RawValue, SourceInfo, raw_record};
    use crate::storage::SqliteStore;

    struct StaticAdapter {
        info: SourceInfo,
        records: Option<Vec<RawRecord>>,
        delay: Duration,
    }

    impl StaticAdapter {
        fn new(key: &str, records: Vec<RawRecord>) -> Self {
            Self {
                info: SourceInfo {
                    key: key.into(),
                    name: format!("{key} auctions"),
                    website_url: format!("https://{key}.example.com/"),
                    description: None,
                    is_government: false,
                },
                records: Some(records),
                delay: Duration::ZERO,
            }
        }

        fn failing(key: &str) -> Self {
            Self {
                records: None,
                ..Self::new(key, vec![])
            }
        }
    }

    #[async_trait]
    impl SourceAdapter for StaticAdapter {
        fn info(&self) -> &SourceInfo {
            &self.info
        }

        async fn fetch(&self) -> Result<Vec<RawRecord>> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.records
                .clone()
                .ok_or_else(|| AppError::adapter(&self.info.key, "site unreachable"))
        }
    }

    struct FixedClient(AtomicUsize);

    #[async_trait]
    impl GeocodingClient for FixedClient {
        async fn lookup(&self, _query: &str) -> Result<Coordinates> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(Coordinates::new(30.27, -97.74))
        }
    }

    fn listing(id: u32, end: &str, price: &str) -> RawRecord {
        raw_record([
            ("title", RawValue::from(format!("Pickup truck #{id}"))),
            ("url", RawValue::from(format!("/lot/{id}"))),
            ("end_date", RawValue::from(end)),
            ("current_price", RawValue::from(price)),
            ("location", RawValue::from("Austin, TX 78701")),
        ])
    }

    async fn store() -> Arc<SqliteStore> {
        let store = SqliteStore::connect("sqlite::memory:", &DatabaseConfig::default())
            .await
            .unwrap();
        store.create_schema().await.unwrap();
        Arc::new(store)
    }

    fn config() -> IngestionConfig {
        IngestionConfig {
            ended_grace_days: 0,
            ..IngestionConfig::default()
        }
    }

    #[tokio::test]
    async fn repeated_runs_are_idempotent() {
        let store = store().await;
        let adapters: Vec<Box<dyn SourceAdapter>> = vec![Box::new(StaticAdapter::new(
            "alpha",
            vec![
                listing(1, "2099-01-01T00:00:00Z", "$100"),
                listing(2, "2099-01-02T00:00:00Z", "$200"),
                raw_record([("title", RawValue::from("No end date"))]),
            ],
        ))];

        let first = run_ingestion(store.as_ref(), None, &adapters, &config(), 2).await;
        assert_eq!((first.created, first.updated, first.skipped), (2, 0, 1));
        assert!(first.is_success());

        let second = run_ingestion(store.as_ref(), None, &adapters, &config(), 2).await;
        assert_eq!((second.created, second.updated, second.skipped), (0, 2, 1));
        assert_eq!(store.count_auctions(None).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn failed_source_does_not_block_others() {
        let store = store().await;
        let adapters: Vec<Box<dyn SourceAdapter>> = vec![
            Box::new(StaticAdapter::failing("broken")),
            Box::new(StaticAdapter::new(
                "beta",
                vec![listing(7, "2099-01-01T00:00:00Z", "$5")],
            )),
        ];

        let summary = run_ingestion(store.as_ref(), None, &adapters, &config(), 2).await;
        assert_eq!(summary.sources_failed, 1);
        assert_eq!(summary.sources_ok, 1);
        assert_eq!(summary.created, 1);
        assert!(!summary.is_success());
    }

    #[tokio::test]
    async fn slow_sources_time_out() {
        let store = store().await;
        let mut slow = StaticAdapter::new("slow", vec![listing(1, "2099-01-01T00:00:00Z", "$1")]);
        slow.delay = Duration::from_secs(5);
        let adapters: Vec<Box<dyn SourceAdapter>> = vec![Box::new(slow)];
        let config = IngestionConfig {
            adapter_timeout_secs: 1,
            ..config()
        };

        let summary = run_ingestion(store.as_ref(), None, &adapters, &config, 1).await;
        assert_eq!(summary.sources_failed, 1);
        assert_eq!(summary.created, 0);
    }

    #[tokio::test]
    async fn absent_auctions_end_unless_the_breaker_trips() {
        let store = store().await;
        let full: Vec<RawRecord> = (1..=12)
            .map(|i| listing(i, "2099-01-01T00:00:00Z", "$10"))
            .collect();
        let adapters: Vec<Box<dyn SourceAdapter>> =
            vec![Box::new(StaticAdapter::new("gamma", full.clone()))];
        run_ingestion(store.as_ref(), None, &adapters, &config(), 1).await;
        assert_eq!(
            store
                .count_auctions(Some(AuctionStatus::Active))
                .await
                .unwrap(),
            12
        );

        // Two listings fewer: within tolerance, the missing two end.
        tokio::time::sleep(Duration::from_millis(5)).await;
        let adapters: Vec<Box<dyn SourceAdapter>> =
            vec![Box::new(StaticAdapter::new("gamma", full[..10].to_vec()))];
        let summary = run_ingestion(store.as_ref(), None, &adapters, &config(), 1).await;
        assert_eq!(summary.marked_ended, 2);

        // Collapse to one listing: the breaker leaves the rest alone.
        tokio::time::sleep(Duration::from_millis(5)).await;
        let adapters: Vec<Box<dyn SourceAdapter>> =
            vec![Box::new(StaticAdapter::new("gamma", full[..1].to_vec()))];
        let summary = run_ingestion(store.as_ref(), None, &adapters, &config(), 1).await;
        assert_eq!(summary.marked_ended, 0);
        assert_eq!(
            store
                .count_auctions(Some(AuctionStatus::Active))
                .await
                .unwrap(),
            10
        );
    }

    #[tokio::test]
    async fn new_locations_are_geocoded_once() {
        let store = store().await;
        let client = Arc::new(FixedClient(AtomicUsize::new(0)));
        let geocoder = Geocoder::new(
            store.clone().geocode_cache(),
            client.clone(),
            Duration::from_secs(1),
        );
        let adapters: Vec<Box<dyn SourceAdapter>> = vec![Box::new(StaticAdapter::new(
            "delta",
            vec![
                listing(1, "2099-01-01T00:00:00Z", "$10"),
                listing(2, "2099-01-01T00:00:00Z", "$10"),
            ],
        ))];

        let summary =
            run_ingestion(store.as_ref(), Some(&geocoder), &adapters, &config(), 1).await;
        assert_eq!(summary.geocoded, 1);
        assert_eq!(client.0.load(Ordering::SeqCst), 1);
        assert!(store.locations_missing_coordinates(10).await.unwrap().is_empty());
    }

    #[test]
    fn failure_guard_counts_only_consecutive_connectivity_errors() {
        let mut guard = FailureGuard::new(2);
        let io = || AppError::Persistence(sqlx::Error::PoolTimedOut);
        assert!(!guard.failure(&io()));
        guard.success();
        assert!(!guard.failure(&io()));
        assert!(!guard.failure(&AppError::validation("bad row")));
        assert!(!guard.failure(&io()));
        assert!(guard.failure(&io()));
    }
}
