// src/storage/sql.rs

//! [`AuctionStore`] over `sqlx::AnyPool`, shared by both engines.

use std::collections::{HashMap, HashSet};
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::any::{AnyArguments, AnyPoolOptions, AnyRow};
use sqlx::{Any, AnyConnection, AnyPool, Row};
use sqlx::query::Query;

use super::dialect::{self, Dialect};
use super::{AuctionStore, decode_timestamp, encode_timestamp, schema};
use crate::error::{AppError, Result};
use crate::geo::{Coordinates, GeocodeCache};
use crate::models::{
    AuctionStatus, AuctionSummary, DEFAULT_CATEGORIES, DatabaseConfig, DedupKey, DetailInput,
    ImageInput, LocationInput, NormalizedAuction, PendingLocation, SourceInfo, UpsertOutcome,
};

/// SQLite-backed store.
pub type SqliteStore = SqlStore<dialect::Sqlite>;

/// PostgreSQL-backed store.
pub type PostgresStore = SqlStore<dialect::Postgres>;

const SUMMARY_SELECT: &str = "SELECT a.auction_id, a.source_id, s.name AS source_name, \
     a.external_id, a.title, a.description, a.start_date, a.end_date, \
     a.current_price, a.starting_price, a.url, a.status, c.name AS category_name, \
     l.city, l.state, l.zip_code, l.latitude, l.longitude, a.created_at, a.updated_at \
     FROM auctions a \
     JOIN auction_sources s ON s.source_id = a.source_id \
     LEFT JOIN auction_categories c ON c.category_id = a.category_id \
     LEFT JOIN locations l ON l.location_id = a.location_id";

/// Relational auction store for any [`Dialect`].
pub struct SqlStore<D: Dialect> {
    pool: AnyPool,
    _dialect: PhantomData<D>,
}

impl<D: Dialect> SqlStore<D> {
    /// Open a pool for `url`.
    ///
    /// In-memory SQLite databases live and die with their connection, so
    /// they get exactly one that never expires.
    pub async fn connect(url: &str, config: &DatabaseConfig) -> Result<Self> {
        sqlx::any::install_default_drivers();

        let in_memory = url.contains(":memory:") || url.contains("mode=memory");
        if url.starts_with("sqlite:") && !in_memory {
            ensure_sqlite_dir(url).await?;
        }

        let mut options = AnyPoolOptions::new()
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs));
        options = if in_memory {
            options
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            options.max_connections(config.max_connections)
        };

        let pool = options.connect(url).await?;
        log::info!("Connected to {} database", D::NAME);
        Ok(Self::from_pool(pool))
    }

    pub fn from_pool(pool: AnyPool) -> Self {
        Self {
            pool,
            _dialect: PhantomData,
        }
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    async fn attach_images(&self, summaries: &mut [AuctionSummary]) -> Result<()> {
        if summaries.is_empty() {
            return Ok(());
        }

        let marks = vec!["?"; summaries.len()].join(", ");
        let sql = D::translate(&format!(
            "SELECT auction_id, image_url FROM auction_images WHERE auction_id IN ({marks}) \
             ORDER BY auction_id, is_primary DESC, image_id"
        ));
        let mut query = sqlx::query(&sql);
        for summary in summaries.iter() {
            query = query.bind(summary.auction_id);
        }

        let mut by_auction: HashMap<i64, Vec<String>> = HashMap::new();
        for row in query.fetch_all(&self.pool).await? {
            by_auction
                .entry(row.try_get("auction_id")?)
                .or_default()
                .push(row.try_get("image_url")?);
        }
        for summary in summaries.iter_mut() {
            if let Some(images) = by_auction.remove(&summary.auction_id) {
                summary.images = images;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl<D: Dialect> AuctionStore for SqlStore<D> {
    fn dialect_name(&self) -> &'static str {
        D::NAME
    }

    fn geocode_cache(self: Arc<Self>) -> Arc<dyn GeocodeCache> {
        self
    }

    async fn create_schema(&self) -> Result<()> {
        for statement in schema::statements::<D>() {
            sqlx::query(&statement).execute(&self.pool).await?;
        }

        let now = encode_timestamp(Utc::now());
        let seed = D::translate(
            "INSERT INTO auction_categories (name, description, created_at, updated_at) \
             VALUES (?, ?, ?, ?) ON CONFLICT (name) DO NOTHING",
        );
        for (name, description) in DEFAULT_CATEGORIES {
            sqlx::query(&seed)
                .bind(*name)
                .bind(*description)
                .bind(now.as_str())
                .bind(now.as_str())
                .execute(&self.pool)
                .await?;
        }
        log::debug!("Schema ready on {}", D::NAME);
        Ok(())
    }

    async fn ensure_source(&self, source: &SourceInfo) -> Result<i64> {
        let now = encode_timestamp(Utc::now());
        let upsert = D::translate(
            "INSERT INTO auction_sources \
                 (name, website_url, description, is_government, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?) \
             ON CONFLICT (name) DO UPDATE SET \
                 website_url = excluded.website_url, \
                 description = excluded.description, \
                 is_government = excluded.is_government, \
                 updated_at = excluded.updated_at",
        );
        sqlx::query(&upsert)
            .bind(source.name.as_str())
            .bind(source.website_url.as_str())
            .bind(source.description.as_deref())
            .bind(source.is_government)
            .bind(now.as_str())
            .bind(now.as_str())
            .execute(&self.pool)
            .await?;

        let select = D::translate("SELECT source_id FROM auction_sources WHERE name = ?");
        let id: i64 = sqlx::query_scalar(&select)
            .bind(source.name.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(id)
    }

    async fn ensure_category_path(&self, path: &[String]) -> Result<Option<i64>> {
        let now = encode_timestamp(Utc::now());
        let mut tx = self.pool.begin().await?;
        let id = ensure_category_path_in::<D>(&mut tx, path, &now).await?;
        tx.commit().await?;
        Ok(id)
    }

    async fn set_category_parent(&self, category_id: i64, parent_id: Option<i64>) -> Result<()> {
        let now = encode_timestamp(Utc::now());
        let mut tx = self.pool.begin().await?;
        assign_parent::<D>(&mut tx, category_id, parent_id, &now).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn category_ancestors(&self, category_id: i64) -> Result<Vec<i64>> {
        let mut conn = self.pool.acquire().await?;
        ancestors_of::<D>(&mut conn, category_id).await
    }

    async fn upsert_auction(
        &self,
        source_id: i64,
        auction: &NormalizedAuction,
        now: DateTime<Utc>,
    ) -> Result<UpsertOutcome> {
        let now = encode_timestamp(now);
        let start_date = auction.start_date.map(encode_timestamp);
        let end_date = encode_timestamp(auction.end_date);

        let mut tx = self.pool.begin().await?;

        let location_id = match &auction.location {
            Some(location) if location.is_meaningful() || location.has_coordinates() => {
                Some(ensure_location::<D>(&mut tx, location, &now).await?)
            }
            _ => None,
        };
        let category_id = ensure_category_path_in::<D>(&mut tx, &auction.category_path, &now).await?;
        let existing = find_existing::<D>(&mut tx, source_id, auction).await?;

        let outcome = match existing {
            Some(auction_id) => {
                let sql = D::translate(
                    "UPDATE auctions SET \
                         external_id = COALESCE(external_id, ?), \
                         title = ?, \
                         description = COALESCE(?, description), \
                         start_date = COALESCE(?, start_date), \
                         end_date = ?, \
                         current_price = COALESCE(?, current_price), \
                         starting_price = COALESCE(?, starting_price), \
                         location_id = COALESCE(?, location_id), \
                         category_id = COALESCE(?, category_id), \
                         url = ?, \
                         status = CASE WHEN status = 'active' THEN ? ELSE status END, \
                         last_seen_at = ?, \
                         updated_at = ? \
                     WHERE auction_id = ?",
                );
                sqlx::query(&sql)
                    .bind(auction.external_id.as_deref())
                    .bind(auction.title.as_str())
                    .bind(auction.description.as_deref())
                    .bind(start_date.as_deref())
                    .bind(end_date.as_str())
                    .bind(auction.current_price)
                    .bind(auction.starting_price)
                    .bind(location_id)
                    .bind(category_id)
                    .bind(auction.url.as_str())
                    .bind(auction.status.as_str())
                    .bind(now.as_str())
                    .bind(now.as_str())
                    .bind(auction_id)
                    .execute(&mut *tx)
                    .await?;
                UpsertOutcome {
                    auction_id,
                    created: false,
                }
            }
            None => {
                let sql = D::insert_sql(
                    "INSERT INTO auctions \
                         (source_id, external_id, title, description, start_date, end_date, \
                          current_price, starting_price, location_id, category_id, url, status, \
                          last_seen_at, created_at, updated_at) \
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                    "auction_id",
                );
                let query = sqlx::query(&sql)
                    .bind(source_id)
                    .bind(auction.external_id.as_deref())
                    .bind(auction.title.as_str())
                    .bind(auction.description.as_deref())
                    .bind(start_date.as_deref())
                    .bind(end_date.as_str())
                    .bind(auction.current_price)
                    .bind(auction.starting_price)
                    .bind(location_id)
                    .bind(category_id)
                    .bind(auction.url.as_str())
                    .bind(auction.status.as_str())
                    .bind(now.as_str())
                    .bind(now.as_str())
                    .bind(now.as_str());
                UpsertOutcome {
                    auction_id: insert_returning_id::<D>(&mut tx, query).await?,
                    created: true,
                }
            }
        };

        write_images::<D>(&mut tx, outcome.auction_id, &auction.images, &now).await?;
        write_details::<D>(&mut tx, outcome.auction_id, &auction.details, &now).await?;
        tx.commit().await?;

        Ok(outcome)
    }

    async fn get_auction(&self, auction_id: i64) -> Result<Option<AuctionSummary>> {
        let sql = D::translate(&format!("{SUMMARY_SELECT} WHERE a.auction_id = ?"));
        let Some(row) = sqlx::query(&sql)
            .bind(auction_id)
            .fetch_optional(&self.pool)
            .await?
        else {
            return Ok(None);
        };

        let mut summaries = vec![summary_from_row(&row)?];
        self.attach_images(&mut summaries).await?;
        Ok(summaries.pop())
    }

    async fn get_by_end_time_ascending(
        &self,
        page: u32,
        page_size: u32,
        status: AuctionStatus,
    ) -> Result<Vec<AuctionSummary>> {
        if page_size == 0 {
            return Ok(Vec::new());
        }

        let sql = D::translate(&format!(
            "{SUMMARY_SELECT} WHERE a.status = ? \
             ORDER BY a.end_date ASC, a.auction_id ASC LIMIT ? OFFSET ?"
        ));
        let rows = sqlx::query(&sql)
            .bind(status.as_str())
            .bind(i64::from(page_size))
            .bind(page_offset(page, page_size) as i64)
            .fetch_all(&self.pool)
            .await?;

        let mut summaries = rows
            .iter()
            .map(summary_from_row)
            .collect::<Result<Vec<_>>>()?;
        self.attach_images(&mut summaries).await?;
        Ok(summaries)
    }

    async fn get_by_proximity_ascending(
        &self,
        origin: Coordinates,
        max_miles: f64,
        page: u32,
        page_size: u32,
    ) -> Result<Vec<AuctionSummary>> {
        if page_size == 0 || !max_miles.is_finite() || max_miles < 0.0 {
            return Ok(Vec::new());
        }

        let bbox = origin.bounding_box(max_miles);
        let mut sql = format!(
            "{SUMMARY_SELECT} WHERE a.status = ? \
             AND l.latitude IS NOT NULL AND l.longitude IS NOT NULL \
             AND l.latitude BETWEEN ? AND ?"
        );
        if bbox.lon_range.is_some() {
            sql.push_str(" AND l.longitude BETWEEN ? AND ?");
        }
        let sql = D::translate(&sql);

        let mut query = sqlx::query(&sql)
            .bind(AuctionStatus::Active.as_str())
            .bind(bbox.min_lat)
            .bind(bbox.max_lat);
        if let Some((min_lon, max_lon)) = bbox.lon_range {
            query = query.bind(min_lon).bind(max_lon);
        }
        let rows = query.fetch_all(&self.pool).await?;

        let mut hits = Vec::new();
        for row in &rows {
            let mut summary = summary_from_row(row)?;
            let (Some(latitude), Some(longitude)) = (summary.latitude, summary.longitude) else {
                continue;
            };
            let distance = origin.distance_to(&Coordinates::new(latitude, longitude));
            if distance <= max_miles {
                summary.distance_miles = Some(distance);
                hits.push(summary);
            }
        }

        hits.sort_by(|a, b| {
            let da = a.distance_miles.unwrap_or(f64::INFINITY);
            let db = b.distance_miles.unwrap_or(f64::INFINITY);
            da.total_cmp(&db)
                .then_with(|| a.end_date.cmp(&b.end_date))
                .then_with(|| a.auction_id.cmp(&b.auction_id))
        });

        let mut page_hits: Vec<AuctionSummary> = hits
            .into_iter()
            .skip(page_offset(page, page_size))
            .take(page_size as usize)
            .collect();
        self.attach_images(&mut page_hits).await?;
        Ok(page_hits)
    }

    async fn locations_missing_coordinates(&self, limit: u32) -> Result<Vec<PendingLocation>> {
        let sql = D::translate(
            "SELECT DISTINCT l.location_id, l.city, l.state, l.zip_code \
             FROM locations l JOIN auctions a ON a.location_id = l.location_id \
             WHERE a.status = ? AND (l.latitude IS NULL OR l.longitude IS NULL) \
             ORDER BY l.location_id LIMIT ?",
        );
        let rows = sqlx::query(&sql)
            .bind(AuctionStatus::Active.as_str())
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| {
                Ok(PendingLocation {
                    location_id: row.try_get("location_id")?,
                    city: row.try_get("city")?,
                    state: row.try_get("state")?,
                    zip_code: row.try_get("zip_code")?,
                })
            })
            .collect()
    }

    async fn set_location_coordinates(
        &self,
        location_id: i64,
        coords: Coordinates,
    ) -> Result<bool> {
        let sql = D::translate(
            "UPDATE locations SET latitude = ?, longitude = ?, updated_at = ? \
             WHERE location_id = ? AND (latitude IS NULL OR longitude IS NULL)",
        );
        let result = sqlx::query(&sql)
            .bind(coords.latitude)
            .bind(coords.longitude)
            .bind(encode_timestamp(Utc::now()))
            .bind(location_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_stale_ended(
        &self,
        source_id: i64,
        seen_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let sql = D::translate(
            "UPDATE auctions SET status = ?, updated_at = ? \
             WHERE source_id = ? AND status = ? AND last_seen_at < ?",
        );
        let result = sqlx::query(&sql)
            .bind(AuctionStatus::Ended.as_str())
            .bind(encode_timestamp(now))
            .bind(source_id)
            .bind(AuctionStatus::Active.as_str())
            .bind(encode_timestamp(seen_before))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn mark_removed(&self, auction_id: i64, now: DateTime<Utc>) -> Result<bool> {
        let sql = D::translate(
            "UPDATE auctions SET status = ?, updated_at = ? WHERE auction_id = ? AND status = ?",
        );
        let result = sqlx::query(&sql)
            .bind(AuctionStatus::Removed.as_str())
            .bind(encode_timestamp(now))
            .bind(auction_id)
            .bind(AuctionStatus::Active.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn purge_ended_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let cutoff = encode_timestamp(cutoff);
        let targets = "SELECT auction_id FROM auctions WHERE status <> ? AND end_date < ?";
        let mut tx = self.pool.begin().await?;

        for child in ["auction_images", "auction_details"] {
            let sql = D::translate(&format!(
                "DELETE FROM {child} WHERE auction_id IN ({targets})"
            ));
            sqlx::query(&sql)
                .bind(AuctionStatus::Active.as_str())
                .bind(cutoff.as_str())
                .execute(&mut *tx)
                .await?;
        }

        let sql = D::translate("DELETE FROM auctions WHERE status <> ? AND end_date < ?");
        let result = sqlx::query(&sql)
            .bind(AuctionStatus::Active.as_str())
            .bind(cutoff.as_str())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(result.rows_affected())
    }

    async fn count_auctions(&self, status: Option<AuctionStatus>) -> Result<u64> {
        let count: i64 = match status {
            Some(status) => {
                let sql = D::translate("SELECT COUNT(*) FROM auctions WHERE status = ?");
                sqlx::query_scalar(&sql)
                    .bind(status.as_str())
                    .fetch_one(&self.pool)
                    .await?
            }
            None => {
                sqlx::query_scalar("SELECT COUNT(*) FROM auctions")
                    .fetch_one(&self.pool)
                    .await?
            }
        };
        Ok(count.max(0) as u64)
    }

    async fn count_active_for_source(&self, source_id: i64) -> Result<u64> {
        let sql = D::translate("SELECT COUNT(*) FROM auctions WHERE source_id = ? AND status = ?");
        let count: i64 = sqlx::query_scalar(&sql)
            .bind(source_id)
            .bind(AuctionStatus::Active.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }
}

#[async_trait]
impl<D: Dialect> GeocodeCache for SqlStore<D> {
    async fn cached_coordinates(&self, key: &str) -> Result<Option<Coordinates>> {
        let sql = D::translate("SELECT latitude, longitude FROM zip_coordinates WHERE query_key = ?");
        let row = sqlx::query(&sql).bind(key).fetch_optional(&self.pool).await?;
        row.map(|row| {
            Ok(Coordinates::new(
                row.try_get("latitude")?,
                row.try_get("longitude")?,
            ))
        })
        .transpose()
    }

    async fn remember_coordinates(&self, key: &str, coords: Coordinates) -> Result<()> {
        let sql = D::translate(
            "INSERT INTO zip_coordinates (query_key, latitude, longitude, updated_at) \
             VALUES (?, ?, ?, ?) \
             ON CONFLICT (query_key) DO UPDATE SET \
                 latitude = excluded.latitude, \
                 longitude = excluded.longitude, \
                 updated_at = excluded.updated_at",
        );
        sqlx::query(&sql)
            .bind(key)
            .bind(coords.latitude)
            .bind(coords.longitude)
            .bind(encode_timestamp(Utc::now()))
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

// --- Helpers ---

fn page_offset(page: u32, page_size: u32) -> usize {
    (page.max(1) as usize - 1) * page_size as usize
}

/// Create the parent directory of a file-backed SQLite URL.
async fn ensure_sqlite_dir(url: &str) -> Result<()> {
    let rest = url.trim_start_matches("sqlite:");
    let rest = rest.strip_prefix("//").unwrap_or(rest);
    let path = rest.split('?').next().unwrap_or_default();
    if let Some(parent) = std::path::Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    Ok(())
}

/// Run an INSERT prepared with [`Dialect::insert_sql`] and return the new id.
async fn insert_returning_id<'q, D: Dialect>(
    conn: &mut AnyConnection,
    query: Query<'q, Any, AnyArguments<'q>>,
) -> Result<i64> {
    if D::RETURNS_INSERTED_ID {
        let row = query.fetch_one(&mut *conn).await?;
        Ok(row.try_get(0)?)
    } else {
        // The Any driver does not surface SQLite's rowid on the result.
        query.execute(&mut *conn).await?;
        let id: i64 = sqlx::query_scalar(D::LAST_INSERT_ID_SQL)
            .fetch_one(&mut *conn)
            .await?;
        Ok(id)
    }
}

fn summary_from_row(row: &AnyRow) -> Result<AuctionSummary> {
    let status: String = row.try_get("status")?;
    let start_date: Option<String> = row.try_get("start_date")?;
    let end_date: String = row.try_get("end_date")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(AuctionSummary {
        auction_id: row.try_get("auction_id")?,
        source_id: row.try_get("source_id")?,
        source_name: row.try_get("source_name")?,
        external_id: row.try_get("external_id")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        start_date: start_date.as_deref().map(decode_timestamp).transpose()?,
        end_date: decode_timestamp(&end_date)?,
        current_price: row.try_get("current_price")?,
        starting_price: row.try_get("starting_price")?,
        url: row.try_get("url")?,
        status: status.parse()?,
        category_name: row.try_get("category_name")?,
        city: row.try_get("city")?,
        state: row.try_get("state")?,
        zip_code: row.try_get("zip_code")?,
        latitude: row.try_get("latitude")?,
        longitude: row.try_get("longitude")?,
        images: Vec::new(),
        distance_miles: None,
        created_at: decode_timestamp(&created_at)?,
        updated_at: decode_timestamp(&updated_at)?,
    })
}

/// Find the stored row for a listing. A listing first seen without an
/// external id is adopted by its URL once the id shows up.
async fn find_existing<D: Dialect>(
    conn: &mut AnyConnection,
    source_id: i64,
    auction: &NormalizedAuction,
) -> Result<Option<i64>> {
    match auction.dedup_key() {
        DedupKey::External(id) => {
            let sql = D::translate(
                "SELECT auction_id FROM auctions WHERE source_id = ? AND external_id = ?",
            );
            let found: Option<i64> = sqlx::query_scalar(&sql)
                .bind(source_id)
                .bind(id.as_str())
                .fetch_optional(&mut *conn)
                .await?;
            if found.is_some() {
                return Ok(found);
            }

            let sql = D::translate(
                "SELECT auction_id FROM auctions \
                 WHERE source_id = ? AND url = ? AND external_id IS NULL \
                 ORDER BY auction_id LIMIT 1",
            );
            let adopted = sqlx::query_scalar(&sql)
                .bind(source_id)
                .bind(auction.url.as_str())
                .fetch_optional(&mut *conn)
                .await?;
            Ok(adopted)
        }
        DedupKey::Url(url) => {
            let sql = D::translate(
                "SELECT auction_id FROM auctions WHERE source_id = ? AND url = ? \
                 ORDER BY auction_id LIMIT 1",
            );
            let id = sqlx::query_scalar(&sql)
                .bind(source_id)
                .bind(url.as_str())
                .fetch_optional(&mut *conn)
                .await?;
            Ok(id)
        }
    }
}

/// Get-or-create a location, matching NULL fields as equal. Coordinates are
/// only filled in when the stored row has none.
async fn ensure_location<D: Dialect>(
    conn: &mut AnyConnection,
    location: &LocationInput,
    now: &str,
) -> Result<i64> {
    let eq = D::null_safe_eq();
    let state = match location.state.trim() {
        "" => "TX",
        state => state,
    };

    let sql = D::translate(&format!(
        "SELECT location_id, latitude, longitude FROM locations \
         WHERE address {eq} ? AND city {eq} ? AND state = ? AND zip_code {eq} ? \
         ORDER BY location_id LIMIT 1"
    ));
    let row = sqlx::query(&sql)
        .bind(location.address.as_deref())
        .bind(location.city.as_deref())
        .bind(state)
        .bind(location.zip_code.as_deref())
        .fetch_optional(&mut *conn)
        .await?;

    if let Some(row) = row {
        let location_id: i64 = row.try_get("location_id")?;
        let latitude: Option<f64> = row.try_get("latitude")?;
        let longitude: Option<f64> = row.try_get("longitude")?;

        if let (None, None, Some(lat), Some(lon)) =
            (latitude, longitude, location.latitude, location.longitude)
        {
            let sql = D::translate(
                "UPDATE locations SET latitude = ?, longitude = ?, updated_at = ? \
                 WHERE location_id = ?",
            );
            sqlx::query(&sql)
                .bind(lat)
                .bind(lon)
                .bind(now)
                .bind(location_id)
                .execute(&mut *conn)
                .await?;
        }
        return Ok(location_id);
    }

    let sql = D::insert_sql(
        "INSERT INTO locations \
             (address, city, state, zip_code, latitude, longitude, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        "location_id",
    );
    let query = sqlx::query(&sql)
        .bind(location.address.as_deref())
        .bind(location.city.as_deref())
        .bind(state)
        .bind(location.zip_code.as_deref())
        .bind(location.latitude)
        .bind(location.longitude)
        .bind(now)
        .bind(now);
    insert_returning_id::<D>(conn, query).await
}

async fn ensure_category_path_in<D: Dialect>(
    conn: &mut AnyConnection,
    path: &[String],
    now: &str,
) -> Result<Option<i64>> {
    let select = D::translate(
        "SELECT category_id, parent_category_id FROM auction_categories WHERE name = ?",
    );
    let insert = D::insert_sql(
        "INSERT INTO auction_categories (name, parent_category_id, created_at, updated_at) \
         VALUES (?, ?, ?, ?)",
        "category_id",
    );

    let mut parent: Option<i64> = None;
    for name in path.iter().map(|n| n.trim()).filter(|n| !n.is_empty()) {
        let row = sqlx::query(&select)
            .bind(name)
            .fetch_optional(&mut *conn)
            .await?;

        let id = match row {
            Some(row) => {
                let id: i64 = row.try_get("category_id")?;
                let current: Option<i64> = row.try_get("parent_category_id")?;
                if current.is_none() && parent.is_some() && parent != Some(id) {
                    match assign_parent::<D>(conn, id, parent, now).await {
                        Ok(()) => {}
                        Err(AppError::Validation(message)) => {
                            log::warn!("Keeping category '{}' unparented: {}", name, message)
                        }
                        Err(e) => return Err(e),
                    }
                }
                id
            }
            None => {
                let query = sqlx::query(&insert)
                    .bind(name)
                    .bind(parent)
                    .bind(now)
                    .bind(now);
                insert_returning_id::<D>(conn, query).await?
            }
        };
        parent = Some(id);
    }
    Ok(parent)
}

async fn assign_parent<D: Dialect>(
    conn: &mut AnyConnection,
    category_id: i64,
    parent_id: Option<i64>,
    now: &str,
) -> Result<()> {
    if let Some(parent) = parent_id {
        if parent == category_id || ancestors_of::<D>(conn, parent).await?.contains(&category_id) {
            return Err(AppError::validation(format!(
                "category {category_id} cannot become its own ancestor via parent {parent}"
            )));
        }
    }

    let sql = D::translate(
        "UPDATE auction_categories SET parent_category_id = ?, updated_at = ? \
         WHERE category_id = ?",
    );
    let result = sqlx::query(&sql)
        .bind(parent_id)
        .bind(now)
        .bind(category_id)
        .execute(&mut *conn)
        .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::validation(format!("unknown category {category_id}")));
    }
    Ok(())
}

async fn ancestors_of<D: Dialect>(conn: &mut AnyConnection, category_id: i64) -> Result<Vec<i64>> {
    let sql = D::translate("SELECT parent_category_id FROM auction_categories WHERE category_id = ?");
    let mut ancestors = Vec::new();
    let mut seen = HashSet::from([category_id]);
    let mut current = category_id;

    loop {
        let parent: Option<Option<i64>> = sqlx::query_scalar(&sql)
            .bind(current)
            .fetch_optional(&mut *conn)
            .await?;
        match parent.flatten() {
            Some(parent) if seen.insert(parent) => {
                ancestors.push(parent);
                current = parent;
            }
            _ => break,
        }
    }
    Ok(ancestors)
}

async fn write_images<D: Dialect>(
    conn: &mut AnyConnection,
    auction_id: i64,
    images: &[ImageInput],
    now: &str,
) -> Result<()> {
    if images.is_empty() {
        return Ok(());
    }

    let count = D::translate(
        "SELECT COUNT(*) FROM auction_images WHERE auction_id = ? AND is_primary = ?",
    );
    let primaries: i64 = sqlx::query_scalar(&count)
        .bind(auction_id)
        .bind(true)
        .fetch_one(&mut *conn)
        .await?;
    let mut primary_taken = primaries > 0;

    let insert = D::translate(
        "INSERT INTO auction_images (auction_id, image_url, is_primary, created_at) \
         VALUES (?, ?, ?, ?) ON CONFLICT (auction_id, image_url) DO NOTHING",
    );
    let mut seen = HashSet::new();
    for image in images {
        if !seen.insert(image.url.as_str()) {
            continue;
        }
        let is_primary = image.is_primary && !primary_taken;
        let result = sqlx::query(&insert)
            .bind(auction_id)
            .bind(image.url.as_str())
            .bind(is_primary)
            .bind(now)
            .execute(&mut *conn)
            .await?;
        if is_primary && result.rows_affected() > 0 {
            primary_taken = true;
        }
    }
    Ok(())
}

async fn write_details<D: Dialect>(
    conn: &mut AnyConnection,
    auction_id: i64,
    details: &[DetailInput],
    now: &str,
) -> Result<()> {
    let sql = D::translate(
        "INSERT INTO auction_details (auction_id, \"key\", \"value\", created_at) \
         VALUES (?, ?, ?, ?) \
         ON CONFLICT (auction_id, \"key\") DO UPDATE SET \"value\" = excluded.\"value\"",
    );
    for detail in details {
        sqlx::query(&sql)
            .bind(auction_id)
            .bind(detail.key.as_str())
            .bind(detail.value.as_str())
            .bind(now)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}
