//! Canonical auction entities.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Lifecycle status of an auction.
///
/// Only `Active -> Ended` and `Active -> Removed` are legal transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuctionStatus {
    Active,
    Ended,
    Removed,
}

impl AuctionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuctionStatus::Active => "active",
            AuctionStatus::Ended => "ended",
            AuctionStatus::Removed => "removed",
        }
    }
}

impl fmt::Display for AuctionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuctionStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "active" | "open" | "live" => Ok(AuctionStatus::Active),
            "ended" | "closed" | "sold" => Ok(AuctionStatus::Ended),
            "removed" | "withdrawn" | "cancelled" | "canceled" => Ok(AuctionStatus::Removed),
            other => Err(AppError::validation(format!("unknown auction status '{other}'"))),
        }
    }
}

/// Top-level categories seeded into every database, with descriptions.
pub const DEFAULT_CATEGORIES: &[(&str, &str)] = &[
    (
        "vehicles",
        "Vehicles including cars, trucks, motorcycles, and other automotive items",
    ),
    ("equipment", "Heavy equipment, machinery, and tools"),
    ("electronics", "Computers, phones, and other electronic devices"),
    ("furniture", "Office and home furniture"),
    ("real_estate", "Land, buildings, and property"),
    ("jewelry", "Jewelry, watches, and precious metals"),
    ("other", "Miscellaneous items"),
];

/// Identity and metadata of an auction source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceInfo {
    /// Stable short key (e.g., "public_surplus")
    pub key: String,

    /// Display name, unique across sources
    pub name: String,

    pub website_url: String,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub is_government: bool,
}

/// Location parsed from a listing, before it is stored.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LocationInput {
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: String,
    pub zip_code: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl LocationInput {
    /// True when there is enough to geocode or display.
    pub fn is_meaningful(&self) -> bool {
        self.city.is_some() || self.zip_code.is_some() || self.address.is_some()
    }

    pub fn has_coordinates(&self) -> bool {
        self.latitude.is_some() && self.longitude.is_some()
    }
}

/// An image reference attached to an auction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImageInput {
    pub url: String,
    pub is_primary: bool,
}

/// A free-form key/value attribute attached to an auction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DetailInput {
    pub key: String,
    pub value: String,
}

/// Key used to decide whether a record is new or an update.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DedupKey {
    External(String),
    Url(String),
}

/// The canonical, source-agnostic representation of one listing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NormalizedAuction {
    pub external_id: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: DateTime<Utc>,
    pub current_price: Option<f64>,
    pub starting_price: Option<f64>,
    pub location: Option<LocationInput>,
    /// Category names from root to leaf; empty means uncategorized
    pub category_path: Vec<String>,
    pub url: String,
    pub status: AuctionStatus,
    pub images: Vec<ImageInput>,
    pub details: Vec<DetailInput>,
}

impl NormalizedAuction {
    /// De-duplication key within a source.
    pub fn dedup_key(&self) -> DedupKey {
        match &self.external_id {
            Some(id) => DedupKey::External(id.clone()),
            None => DedupKey::Url(self.url.clone()),
        }
    }
}

/// Result of an upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub auction_id: i64,
    pub created: bool,
}

/// A stored auction joined with its source, category, location and images,
/// as returned by the ranking queries.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuctionSummary {
    pub auction_id: i64,
    pub source_id: i64,
    pub source_name: String,
    pub external_id: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: DateTime<Utc>,
    pub current_price: Option<f64>,
    pub starting_price: Option<f64>,
    pub url: String,
    pub status: AuctionStatus,
    pub category_name: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip_code: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub images: Vec<String>,
    /// Miles from the request origin, set only by proximity queries
    pub distance_miles: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A stored location whose coordinates are still unknown.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingLocation {
    pub location_id: i64,
    pub city: Option<String>,
    pub state: String,
    pub zip_code: Option<String>,
}
