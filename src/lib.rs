// src/lib.rs

//! Texas auction aggregator library.
//!
//! Scrapes public auction listings, normalizes them into one schema, stores
//! them in SQLite or PostgreSQL, and ranks them by end time or distance.

pub mod error;
pub mod geo;
pub mod models;
pub mod pipeline;
pub mod services;
pub mod storage;
pub mod utils;
