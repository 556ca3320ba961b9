//! Application configuration structures.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::models::{ListingSelectors, SourceInfo};

/// Longest accepted schedule interval.
pub const MAX_INTERVAL_DAYS: u64 = 365;

/// Longest accepted grace period before absent auctions are ended.
pub const MAX_GRACE_DAYS: i64 = 365;

/// Root application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Database connection settings
    #[serde(default)]
    pub database: DatabaseConfig,

    /// HTTP behavior for source adapters
    #[serde(default)]
    pub http: HttpConfig,

    /// External geocoding service
    #[serde(default)]
    pub geocoder: GeocoderConfig,

    /// Ingestion run behavior
    #[serde(default)]
    pub ingestion: IngestionConfig,

    /// Ranking query defaults
    #[serde(default)]
    pub ranking: RankingConfig,

    /// Auction source definitions
    #[serde(default = "defaults::default_sources")]
    pub sources: Vec<SourceConfig>,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load configuration or return default if loading fails.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(&path).unwrap_or_else(|e| {
            log::warn!(
                "Config load failed from {:?}: {}. Using defaults.",
                path.as_ref(),
                e
            );
            Self::default()
        })
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.database.url.trim().is_empty() {
            return Err(AppError::validation("database.url is empty"));
        }
        if self.http.user_agent.trim().is_empty() {
            return Err(AppError::validation("http.user_agent is empty"));
        }
        if self.http.timeout_secs == 0 {
            return Err(AppError::validation("http.timeout_secs must be > 0"));
        }
        if self.http.max_concurrent == 0 {
            return Err(AppError::validation("http.max_concurrent must be > 0"));
        }
        if self.geocoder.timeout_secs == 0 {
            return Err(AppError::validation("geocoder.timeout_secs must be > 0"));
        }
        if !(1..=MAX_INTERVAL_DAYS).contains(&self.ingestion.interval_days) {
            return Err(AppError::validation(format!(
                "ingestion.interval_days must be within 1..={MAX_INTERVAL_DAYS}"
            )));
        }
        if !(0..=MAX_GRACE_DAYS).contains(&self.ingestion.ended_grace_days) {
            return Err(AppError::validation(format!(
                "ingestion.ended_grace_days must be within 0..={MAX_GRACE_DAYS}"
            )));
        }
        if self.ingestion.adapter_timeout_secs == 0 {
            return Err(AppError::validation(
                "ingestion.adapter_timeout_secs must be > 0",
            ));
        }
        if self.ingestion.max_drop_percent > 100 {
            return Err(AppError::validation(
                "ingestion.max_drop_percent must be within 0-100",
            ));
        }
        if !(-12..=14).contains(&self.ingestion.source_utc_offset_hours) {
            return Err(AppError::validation(
                "ingestion.source_utc_offset_hours must be within -12..=14",
            ));
        }
        if self.ranking.page_size == 0 {
            return Err(AppError::validation("ranking.page_size must be > 0"));
        }
        if self.ranking.default_max_distance_miles < 0.0 {
            return Err(AppError::validation(
                "ranking.default_max_distance_miles must be >= 0",
            ));
        }

        let mut keys = std::collections::HashSet::new();
        for source in &self.sources {
            source.validate()?;
            if !keys.insert(source.key.as_str()) {
                return Err(AppError::validation(format!(
                    "duplicate source key '{}'",
                    source.key
                )));
            }
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            http: HttpConfig::default(),
            geocoder: GeocoderConfig::default(),
            ingestion: IngestionConfig::default(),
            ranking: RankingConfig::default(),
            sources: defaults::default_sources(),
        }
    }
}

/// Database connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Connection URL; the scheme selects the SQL dialect
    #[serde(default = "defaults::database_url")]
    pub url: String,

    /// Maximum pooled connections (file/remote databases only)
    #[serde(default = "defaults::max_connections")]
    pub max_connections: u32,

    /// Seconds to wait for a pooled connection
    #[serde(default = "defaults::acquire_timeout")]
    pub acquire_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: defaults::database_url(),
            max_connections: defaults::max_connections(),
            acquire_timeout_secs: defaults::acquire_timeout(),
        }
    }
}

/// HTTP client settings shared by source adapters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// User-Agent header for HTTP requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Request timeout in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,

    /// Delay between page requests in milliseconds
    #[serde(default = "defaults::request_delay")]
    pub request_delay_ms: u64,

    /// Maximum sources fetched concurrently
    #[serde(default = "defaults::max_concurrent")]
    pub max_concurrent: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: defaults::user_agent(),
            timeout_secs: defaults::timeout(),
            request_delay_ms: defaults::request_delay(),
            max_concurrent: defaults::max_concurrent(),
        }
    }
}

/// Geocoding service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeocoderConfig {
    /// Base URL of a Nominatim-compatible search API
    #[serde(default = "defaults::geocoder_url")]
    pub base_url: String,

    /// Per-lookup timeout in seconds
    #[serde(default = "defaults::geocoder_timeout")]
    pub timeout_secs: u64,

    /// ISO country code restricting results
    #[serde(default = "defaults::country_code")]
    pub country_code: String,

    /// User-Agent required by the Nominatim usage policy
    #[serde(default = "defaults::geocoder_user_agent")]
    pub user_agent: String,
}

impl Default for GeocoderConfig {
    fn default() -> Self {
        Self {
            base_url: defaults::geocoder_url(),
            timeout_secs: defaults::geocoder_timeout(),
            country_code: defaults::country_code(),
            user_agent: defaults::geocoder_user_agent(),
        }
    }
}

/// Ingestion run settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionConfig {
    /// Days between scheduled runs
    #[serde(default = "defaults::interval_days")]
    pub interval_days: u64,

    /// Days an active auction may be absent from refreshes before it is ended
    #[serde(default = "defaults::ended_grace_days")]
    pub ended_grace_days: i64,

    /// Upper bound for a single adapter fetch
    #[serde(default = "defaults::adapter_timeout")]
    pub adapter_timeout_secs: u64,

    /// Consecutive connectivity failures that abort a run
    #[serde(default = "defaults::max_consecutive_store_failures")]
    pub max_consecutive_store_failures: usize,

    /// Largest tolerated drop (percent) in a source's listing count before
    /// absent auctions are left untouched
    #[serde(default = "defaults::max_drop_percent")]
    pub max_drop_percent: u8,

    /// Below this many active auctions the drop check is skipped
    #[serde(default = "defaults::min_baseline")]
    pub min_baseline: usize,

    /// Offset applied to source times that carry no zone
    #[serde(default)]
    pub source_utc_offset_hours: i32,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            interval_days: defaults::interval_days(),
            ended_grace_days: defaults::ended_grace_days(),
            adapter_timeout_secs: defaults::adapter_timeout(),
            max_consecutive_store_failures: defaults::max_consecutive_store_failures(),
            max_drop_percent: defaults::max_drop_percent(),
            min_baseline: defaults::min_baseline(),
            source_utc_offset_hours: 0,
        }
    }
}

impl IngestionConfig {
    /// Time between scheduled runs, clamped to the accepted range.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_days.clamp(1, MAX_INTERVAL_DAYS) * 86_400)
    }

    /// Absence tolerated before an active auction is ended, clamped to the
    /// accepted range.
    pub fn grace_period(&self) -> chrono::Duration {
        chrono::Duration::days(self.ended_grace_days.clamp(0, MAX_GRACE_DAYS))
    }
}

/// Ranking query defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankingConfig {
    #[serde(default = "defaults::default_zip")]
    pub default_zip: String,

    #[serde(default = "defaults::default_max_distance")]
    pub default_max_distance_miles: f64,

    #[serde(default = "defaults::page_size")]
    pub page_size: u32,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            default_zip: defaults::default_zip(),
            default_max_distance_miles: defaults::default_max_distance(),
            page_size: defaults::page_size(),
        }
    }
}

/// How a source's listings are obtained.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Scrape HTML listing pages with CSS selectors
    Html,
    /// Read a saved scrape file
    JsonFile,
}

/// One configured auction source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Stable short key (e.g., "public_surplus")
    pub key: String,

    /// Display name
    pub name: String,

    pub website_url: String,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub is_government: bool,

    /// Disabled sources are skipped by ingestion
    #[serde(default = "defaults::enabled")]
    pub enabled: bool,

    pub kind: SourceKind,

    /// Listing pages (html sources)
    #[serde(default)]
    pub pages: Vec<String>,

    /// Scrape file path (json_file sources)
    #[serde(default)]
    pub path: Option<String>,

    /// Row selectors (html sources)
    #[serde(default)]
    pub selectors: Option<ListingSelectors>,

    /// Free-text location used when a listing has none
    #[serde(default)]
    pub default_location: Option<String>,
}

impl SourceConfig {
    /// Source identity as stored in the database.
    pub fn info(&self) -> SourceInfo {
        SourceInfo {
            key: self.key.clone(),
            name: self.name.clone(),
            website_url: self.website_url.clone(),
            description: self.description.clone(),
            is_government: self.is_government,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.key.trim().is_empty() || self.name.trim().is_empty() {
            return Err(AppError::validation("source key and name must be set"));
        }
        match self.kind {
            SourceKind::Html => {
                if self.pages.is_empty() {
                    return Err(AppError::validation(format!(
                        "source '{}' has no pages",
                        self.key
                    )));
                }
                if self.selectors.is_none() {
                    return Err(AppError::validation(format!(
                        "source '{}' has no selectors",
                        self.key
                    )));
                }
            }
            SourceKind::JsonFile => {
                if self.path.as_deref().is_none_or(|p| p.trim().is_empty()) {
                    return Err(AppError::validation(format!(
                        "source '{}' has no path",
                        self.key
                    )));
                }
            }
        }
        Ok(())
    }
}

mod defaults {
    use super::{SourceConfig, SourceKind};
    use crate::models::ListingSelectors;

    // Database defaults
    pub fn database_url() -> String {
        "sqlite://data/texas_auctions.db?mode=rwc".into()
    }
    pub fn max_connections() -> u32 {
        5
    }
    pub fn acquire_timeout() -> u64 {
        10
    }

    // HTTP defaults
    pub fn user_agent() -> String {
        "Mozilla/5.0 (compatible; txauctions/0.1)".into()
    }
    pub fn timeout() -> u64 {
        30
    }
    pub fn request_delay() -> u64 {
        1000
    }
    pub fn max_concurrent() -> usize {
        3
    }

    // Geocoder defaults
    pub fn geocoder_url() -> String {
        "https://nominatim.openstreetmap.org".into()
    }
    pub fn geocoder_timeout() -> u64 {
        10
    }
    pub fn country_code() -> String {
        "us".into()
    }
    pub fn geocoder_user_agent() -> String {
        "texas_auction_database".into()
    }

    // Ingestion defaults
    pub fn interval_days() -> u64 {
        3
    }
    pub fn ended_grace_days() -> i64 {
        2
    }
    pub fn adapter_timeout() -> u64 {
        120
    }
    pub fn max_consecutive_store_failures() -> usize {
        5
    }
    pub fn max_drop_percent() -> u8 {
        50
    }
    pub fn min_baseline() -> usize {
        10
    }

    // Ranking defaults
    pub fn default_zip() -> String {
        "78232".into()
    }
    pub fn default_max_distance() -> f64 {
        100.0
    }
    pub fn page_size() -> u32 {
        20
    }

    pub fn enabled() -> bool {
        true
    }

    // Source defaults
    pub fn default_sources() -> Vec<SourceConfig> {
        vec![
            SourceConfig {
                key: "public_surplus".into(),
                name: "Public Surplus - Texas Facilities Commission".into(),
                website_url: "https://www.publicsurplus.com/sms/state,tx/list/current?orgid=871876"
                    .into(),
                description: Some(
                    "Government surplus auctions from Texas Facilities Commission".into(),
                ),
                is_government: true,
                enabled: true,
                kind: SourceKind::Html,
                path: None,
                pages: vec![
                    "https://www.publicsurplus.com/sms/all,tx/browse/cataucs?catid=4".into(),
                    "https://www.publicsurplus.com/sms/all,tx/browse/cataucs?slth=y&catid=4&page=1&sortBy=timeLeft&sortDesc=N".into(),
                ],
                selectors: Some(ListingSelectors {
                    row_selector: "table.table-striped tbody tr".into(),
                    title_selector: "td:nth-child(2) a".into(),
                    id_selector: Some("td:nth-child(1)".into()),
                    end_date_selector: None,
                    time_left_selector: Some("td:nth-child(3)".into()),
                    price_selector: Some("td:nth-child(4)".into()),
                    ..ListingSelectors::fallback()
                }),
                default_location: Some("Austin, TX".into()),
            },
            SourceConfig {
                key: "gaston_sheehan".into(),
                name: "Gaston and Sheehan Auctioneers".into(),
                website_url: "https://www.txauction.com/".into(),
                description: Some(
                    "Private auction house specializing in government and private auctions in Texas"
                        .into(),
                ),
                is_government: false,
                enabled: true,
                kind: SourceKind::Html,
                path: None,
                pages: vec![
                    "https://www.txauction.com/".into(),
                    "https://www.txauction.com/auctions".into(),
                ],
                selectors: Some(ListingSelectors {
                    row_selector: ".auction-item".into(),
                    title_selector: "h3".into(),
                    link_selector: Some("a.btn".into()),
                    end_date_selector: Some("p strong".into()),
                    description_selector: Some("p:not(:has(strong))".into()),
                    image_selector: Some("img".into()),
                    ..ListingSelectors::fallback()
                }),
                default_location: None,
            },
            SourceConfig {
                key: "govdeals".into(),
                name: "GovDeals - Texas".into(),
                website_url: "https://www.govdeals.com/texas".into(),
                description: Some("Government surplus auctions from various Texas agencies".into()),
                is_government: true,
                enabled: true,
                kind: SourceKind::Html,
                path: None,
                pages: vec![
                    "https://www.allsurplus.com/search?isAdvSearch=1&timing=bySimple&timeType=atauction&ps=120&locationType=miles&zipcode=78232&miles=250&sf=auctionclose&so=asc".into(),
                ],
                selectors: Some(ListingSelectors {
                    row_selector: ".card-search".into(),
                    title_selector: ".card-title a".into(),
                    end_date_selector: Some(".card-close-date".into()),
                    price_selector: Some(".card-amount".into()),
                    location_selector: Some(".card-location".into()),
                    image_selector: Some("img.card-img-top".into()),
                    ..ListingSelectors::fallback()
                }),
                default_location: None,
            },
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_default_config_ok() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn validate_rejects_empty_user_agent() {
        let mut config = Config::default();
        config.http.user_agent = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_bounds_schedule_and_grace_days() {
        let mut config = Config::default();
        config.ingestion.interval_days = u64::MAX;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.ingestion.ended_grace_days = i64::MAX;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.ingestion.ended_grace_days = -1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn out_of_range_durations_are_clamped() {
        let ingestion = IngestionConfig {
            interval_days: u64::MAX,
            ended_grace_days: i64::MAX,
            ..IngestionConfig::default()
        };
        assert_eq!(ingestion.interval(), Duration::from_secs(365 * 86_400));
        assert_eq!(ingestion.grace_period(), chrono::Duration::days(365));
        assert_eq!(
            IngestionConfig::default().interval(),
            Duration::from_secs(3 * 86_400)
        );
    }

    #[test]
    fn validate_rejects_zero_concurrency() {
        let mut config = Config::default();
        config.http.max_concurrent = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_duplicate_source_keys() {
        let mut config = Config::default();
        let first = config.sources[0].clone();
        config.sources.push(first);
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_json_source_without_path() {
        let mut config = Config::default();
        config.sources = vec![SourceConfig {
            key: "saved".into(),
            name: "Saved scrape".into(),
            website_url: "https://example.com".into(),
            description: None,
            is_government: false,
            enabled: true,
            kind: SourceKind::JsonFile,
            pages: vec![],
            path: None,
            selectors: None,
            default_location: None,
        }];
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [database]
            url = "postgres://localhost/auctions"

            [ranking]
            default_zip = "78701"

            [[sources]]
            key = "saved"
            name = "Saved scrape"
            website_url = "https://example.com"
            kind = "json_file"
            path = "data/saved.json"
            "#,
        )
        .unwrap();

        assert_eq!(config.database.url, "postgres://localhost/auctions");
        assert_eq!(config.ranking.default_zip, "78701");
        assert_eq!(config.ranking.page_size, 20);
        assert_eq!(config.ingestion.interval_days, 3);
        assert_eq!(config.sources.len(), 1);
        assert_eq!(config.sources[0].kind, SourceKind::JsonFile);
        assert!(config.validate().is_ok());
    }
}
