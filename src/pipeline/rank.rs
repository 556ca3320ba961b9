// src/pipeline/rank.rs

//! Ranked read views: soonest-ending and nearest-first.
//!
//! Both views degrade to an empty page instead of surfacing storage or
//! geocoding errors to the caller. Reads never geocode stored locations;
//! ingestion fills coordinates in, and anything still missing them marks
//! the page partial.

use std::sync::Arc;

use serde::Serialize;

use crate::geo::Geocoder;
use crate::models::{AuctionStatus, AuctionSummary, RankingConfig};
use crate::storage::AuctionStore;

/// Parameters of one proximity query.
#[derive(Debug, Clone, PartialEq)]
pub struct ProximityRequest {
    pub zip: String,
    pub max_miles: f64,
    /// 1-based
    pub page: u32,
    pub page_size: u32,
}

impl ProximityRequest {
    /// First page with the configured page size.
    pub fn new(zip: impl Into<String>, max_miles: f64, config: &RankingConfig) -> Self {
        Self {
            zip: zip.into(),
            max_miles,
            page: 1,
            page_size: config.page_size,
        }
    }
}

/// One page of ranked auctions.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedPage {
    pub auctions: Vec<AuctionSummary>,
    /// Some auctions may be missing because their location (or the origin)
    /// could not be geocoded
    pub partial: bool,
    pub page: u32,
    pub page_size: u32,
}

impl RankedPage {
    fn empty(page: u32, page_size: u32, partial: bool) -> Self {
        Self {
            auctions: Vec::new(),
            partial,
            page,
            page_size,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.auctions.is_empty()
    }
}

/// Serves the ranked views over a store.
pub struct Rankings {
    store: Arc<dyn AuctionStore>,
    /// Resolves the request origin only
    geocoder: Geocoder,
}

impl Rankings {
    pub fn new(store: Arc<dyn AuctionStore>, geocoder: Geocoder) -> Self {
        Self { store, geocoder }
    }

    /// Active auctions, soonest end first.
    pub async fn ending_soon(&self, page: u32, page_size: u32) -> RankedPage {
        let page = page.max(1);
        match self
            .store
            .get_by_end_time_ascending(page, page_size, AuctionStatus::Active)
            .await
        {
            Ok(auctions) => RankedPage {
                auctions,
                partial: false,
                page,
                page_size,
            },
            Err(e) => {
                log::error!("Ending-soon query failed: {}", e);
                RankedPage::empty(page, page_size, false)
            }
        }
    }

    /// Active auctions within `max_miles` of the request ZIP, nearest first.
    pub async fn nearby(&self, request: &ProximityRequest) -> RankedPage {
        let page = request.page.max(1);
        let page_size = request.page_size;

        if !request.max_miles.is_finite() || request.max_miles < 0.0 {
            log::warn!("Ignoring proximity request with distance {}", request.max_miles);
            return RankedPage::empty(page, page_size, false);
        }

        let origin = match self.geocoder.resolve(&request.zip).await {
            Ok(origin) => origin,
            Err(e) => {
                log::warn!("Cannot resolve origin {}: {}", request.zip, e);
                return RankedPage::empty(page, page_size, true);
            }
        };

        // Locations without coordinates are excluded from this page.
        let partial = match self.store.locations_missing_coordinates(1).await {
            Ok(pending) => !pending.is_empty(),
            Err(e) => {
                log::warn!("Cannot check pending locations: {}", e);
                true
            }
        };

        match self
            .store
            .get_by_proximity_ascending(origin, request.max_miles, page, page_size)
            .await
        {
            Ok(auctions) => RankedPage {
                auctions,
                partial,
                page,
                page_size,
            },
            Err(e) => {
                log::error!("Proximity query failed: {}", e);
                RankedPage::empty(page, page_size, partial)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::error::{AppError, Result};
    use crate::geo::{Coordinates, GeocodingClient};
    use crate::models::{DatabaseConfig, RawValue, SourceInfo, raw_record};
    use crate::pipeline::ingest::geocode_pending;
    use crate::pipeline::normalize::Normalizer;
    use crate::storage::SqliteStore;

    struct TableClient {
        table: HashMap<&'static str, Coordinates>,
        lookups: AtomicUsize,
    }

    impl TableClient {
        fn texas() -> Self {
            Self {
                table: HashMap::from([
                    ("78232", Coordinates::new(29.5830, -98.4690)),
                    ("78701", Coordinates::new(30.2711, -97.7437)),
                    ("79901", Coordinates::new(31.7587, -106.4869)),
                    ("boerne, tx", Coordinates::new(29.7947, -98.7320)),
                ]),
                lookups: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl GeocodingClient for TableClient {
        async fn lookup(&self, query: &str) -> Result<Coordinates> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            self.table
                .get(query)
                .copied()
                .ok_or_else(|| AppError::geocode(query, "no match"))
        }
    }

    fn source() -> SourceInfo {
        SourceInfo {
            key: "test".into(),
            name: "Test Auctions".into(),
            website_url: "https://test.example.com/".into(),
            description: None,
            is_government: true,
        }
    }

    /// Stores the listings and geocodes them the way an ingestion run does.
    async fn rankings_with_client(locations: &[(&str, &str)]) -> (Rankings, Arc<TableClient>) {
        let store = Arc::new(
            SqliteStore::connect("sqlite::memory:", &DatabaseConfig::default())
                .await
                .unwrap(),
        );
        store.create_schema().await.unwrap();
        let source_id = store.ensure_source(&source()).await.unwrap();

        let now = Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap();
        let normalizer = Normalizer::new(0).unwrap();
        for (i, (title, location)) in locations.iter().enumerate() {
            let raw = raw_record([
                ("title", RawValue::from(*title)),
                ("url", RawValue::from(format!("/lot/{i}"))),
                ("end_date", RawValue::from(format!("2099-01-{:02}", i + 1))),
                ("location", RawValue::from(*location)),
            ]);
            let auction = normalizer.normalize(&source(), &raw, now).unwrap();
            store.upsert_auction(source_id, &auction, now).await.unwrap();
        }

        let ingest_geocoder = Geocoder::new(
            store.clone().geocode_cache(),
            Arc::new(TableClient::texas()),
            Duration::from_secs(1),
        );
        geocode_pending(store.as_ref(), &ingest_geocoder, 100).await;

        let client = Arc::new(TableClient::texas());
        let geocoder = Geocoder::new(
            store.clone().geocode_cache(),
            client.clone(),
            Duration::from_secs(1),
        );
        (Rankings::new(store, geocoder), client)
    }

    async fn rankings(locations: &[(&str, &str)]) -> Rankings {
        rankings_with_client(locations).await.0
    }

    fn titles(page: &RankedPage) -> Vec<&str> {
        page.auctions.iter().map(|a| a.title.as_str()).collect()
    }

    #[tokio::test]
    async fn nearby_orders_by_distance_within_radius() {
        let rankings = rankings(&[
            ("Austin truck", "Austin, TX 78701"),
            ("El Paso tractor", "El Paso, TX 79901"),
            ("Local desk", "San Antonio, TX 78232"),
            ("Boerne chairs", "Boerne, TX"),
        ])
        .await;

        let request = ProximityRequest::new("78232", 100.0, &RankingConfig::default());
        let page = rankings.nearby(&request).await;

        assert_eq!(
            titles(&page),
            vec!["Local desk", "Boerne chairs", "Austin truck"]
        );
        assert!(!page.partial);
        let distances: Vec<f64> = page
            .auctions
            .iter()
            .map(|a| a.distance_miles.unwrap())
            .collect();
        assert!(distances.windows(2).all(|w| w[0] <= w[1]));
        assert!(distances.iter().all(|d| *d <= 100.0));
    }

    #[tokio::test]
    async fn unresolvable_locations_make_the_page_partial() {
        let rankings = rankings(&[
            ("Local desk", "San Antonio, TX 78232"),
            ("Mystery lot", "Nowhere, TX"),
        ])
        .await;

        let page = rankings
            .nearby(&ProximityRequest::new("78232", 50.0, &RankingConfig::default()))
            .await;
        assert_eq!(titles(&page), vec!["Local desk"]);
        assert!(page.partial);
    }

    #[tokio::test]
    async fn requests_only_look_up_the_origin() {
        let (rankings, client) = rankings_with_client(&[
            ("Local desk", "San Antonio, TX 78232"),
            ("Mystery lot", "Nowhere, TX"),
            ("Ghost lot", "Faraway, TX"),
        ])
        .await;

        let request = ProximityRequest::new("78232", 50.0, &RankingConfig::default());
        for _ in 0..3 {
            let page = rankings.nearby(&request).await;
            assert_eq!(titles(&page), vec!["Local desk"]);
            assert!(page.partial);
        }
        // The origin was cached by ingestion; pending locations are never retried here.
        assert_eq!(client.lookups.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unknown_origin_yields_an_empty_partial_page() {
        let rankings = rankings(&[("Local desk", "San Antonio, TX 78232")]).await;

        let page = rankings
            .nearby(&ProximityRequest::new("00000", 50.0, &RankingConfig::default()))
            .await;
        assert!(page.is_empty());
        assert!(page.partial);

        let page = rankings
            .nearby(&ProximityRequest::new("782", 50.0, &RankingConfig::default()))
            .await;
        assert!(page.is_empty());
    }

    #[tokio::test]
    async fn ending_soon_pages_in_end_order() {
        let rankings = rankings(&[
            ("first", "Austin, TX 78701"),
            ("second", "Austin, TX 78701"),
            ("third", "Austin, TX 78701"),
        ])
        .await;

        let one = rankings.ending_soon(1, 2).await;
        let two = rankings.ending_soon(2, 2).await;
        assert_eq!(titles(&one), vec!["first", "second"]);
        assert_eq!(titles(&two), vec!["third"]);
        assert!(rankings.ending_soon(1, 0).await.is_empty());
    }
}
