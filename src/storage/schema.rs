// src/storage/schema.rs

//! The shared relational schema. Only the primary-key declaration varies
//! between engines.

use super::dialect::Dialect;

/// DDL statements in dependency order, all idempotent.
pub fn statements<D: Dialect>() -> Vec<String> {
    let mut out = vec![
        format!(
            "CREATE TABLE IF NOT EXISTS auction_sources (
                {},
                name TEXT NOT NULL UNIQUE,
                website_url TEXT NOT NULL,
                description TEXT,
                is_government BOOLEAN NOT NULL DEFAULT FALSE,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            D::id_column("source_id")
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS locations (
                {},
                address TEXT,
                city TEXT,
                state TEXT NOT NULL DEFAULT 'TX',
                zip_code TEXT,
                latitude DOUBLE PRECISION,
                longitude DOUBLE PRECISION,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            D::id_column("location_id")
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS auction_categories (
                {},
                name TEXT NOT NULL UNIQUE,
                description TEXT,
                parent_category_id BIGINT REFERENCES auction_categories(category_id),
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            D::id_column("category_id")
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS auctions (
                {},
                source_id BIGINT NOT NULL REFERENCES auction_sources(source_id),
                external_id TEXT,
                title TEXT NOT NULL,
                description TEXT,
                start_date TEXT,
                end_date TEXT NOT NULL,
                current_price DOUBLE PRECISION,
                starting_price DOUBLE PRECISION,
                location_id BIGINT REFERENCES locations(location_id),
                category_id BIGINT REFERENCES auction_categories(category_id),
                url TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'active'
                    CHECK (status IN ('active', 'ended', 'removed')),
                last_seen_at TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            D::id_column("auction_id")
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS auction_images (
                {},
                auction_id BIGINT NOT NULL REFERENCES auctions(auction_id) ON DELETE CASCADE,
                image_url TEXT NOT NULL,
                is_primary BOOLEAN NOT NULL DEFAULT FALSE,
                created_at TEXT NOT NULL,
                UNIQUE (auction_id, image_url)
            )",
            D::id_column("image_id")
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS auction_details (
                {},
                auction_id BIGINT NOT NULL REFERENCES auctions(auction_id) ON DELETE CASCADE,
                \"key\" TEXT NOT NULL,
                \"value\" TEXT,
                created_at TEXT NOT NULL,
                UNIQUE (auction_id, \"key\")
            )",
            D::id_column("detail_id")
        ),
        "CREATE TABLE IF NOT EXISTS zip_coordinates (
            query_key TEXT PRIMARY KEY,
            latitude DOUBLE PRECISION NOT NULL,
            longitude DOUBLE PRECISION NOT NULL,
            updated_at TEXT NOT NULL
        )"
        .to_string(),
    ];

    out.extend(INDEXES.iter().map(|s| s.to_string()));
    out
}

const INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_auctions_end_date ON auctions(end_date)",
    "CREATE INDEX IF NOT EXISTS idx_locations_coordinates ON locations(latitude, longitude)",
    "CREATE INDEX IF NOT EXISTS idx_auctions_category ON auctions(category_id)",
    "CREATE INDEX IF NOT EXISTS idx_auctions_source ON auctions(source_id)",
    "CREATE INDEX IF NOT EXISTS idx_auctions_status ON auctions(status)",
    "CREATE INDEX IF NOT EXISTS idx_auctions_status_end_date ON auctions(status, end_date)",
    "CREATE INDEX IF NOT EXISTS idx_auctions_source_url ON auctions(source_id, url)",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_auctions_source_external ON auctions(source_id, external_id)",
];
