// src/services/json_file.rs

//! Adapter for previously saved scrape files.
//!
//! Accepts either `{"auctions": [...]}` or a bare JSON array of objects.

use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{AppError, Result};
use crate::models::{RawRecord, SourceConfig, SourceInfo};
use crate::services::SourceAdapter;

/// Reads listings from a JSON file on disk.
pub struct JsonFileAdapter {
    info: SourceInfo,
    path: PathBuf,
}

impl JsonFileAdapter {
    pub fn new(config: &SourceConfig) -> Result<Self> {
        let path = config
            .path
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| AppError::adapter(&config.key, "no scrape file path configured"))?;

        Ok(Self {
            info: config.info(),
            path: PathBuf::from(path),
        })
    }

    /// Parse the contents of a scrape file.
    pub fn parse(&self, content: &str) -> Result<Vec<RawRecord>> {
        let items = match serde_json::from_str::<Value>(content)? {
            Value::Array(items) => items,
            Value::Object(mut map) => match map.remove("auctions") {
                Some(Value::Array(items)) => items,
                _ => {
                    return Err(AppError::adapter(
                        &self.info.key,
                        "expected an \"auctions\" array",
                    ));
                }
            },
            _ => {
                return Err(AppError::adapter(
                    &self.info.key,
                    "expected a JSON array or object",
                ));
            }
        };

        let mut records = Vec::with_capacity(items.len());
        for (i, item) in items.into_iter().enumerate() {
            if !item.is_object() {
                log::warn!("[{}] Skipping non-object entry #{}", self.info.key, i);
                continue;
            }
            records.push(serde_json::from_value::<RawRecord>(item)?);
        }
        Ok(records)
    }
}

#[async_trait]
impl SourceAdapter for JsonFileAdapter {
    fn info(&self) -> &SourceInfo {
        &self.info
    }

    async fn fetch(&self) -> Result<Vec<RawRecord>> {
        let content = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            AppError::adapter(&self.info.key, format!("{}: {}", self.path.display(), e))
        })?;
        self.parse(&content)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::models::{RawValue, SourceKind};

    fn config(path: &str) -> SourceConfig {
        SourceConfig {
            key: "saved".into(),
            name: "Saved Scrape".into(),
            website_url: "https://example.com/".into(),
            description: None,
            is_government: false,
            enabled: true,
            kind: SourceKind::JsonFile,
            pages: vec![],
            path: Some(path.into()),
            selectors: None,
            default_location: None,
        }
    }

    #[tokio::test]
    async fn reads_wrapped_auction_lists() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"auctions": [
                {{"title": "Tractor", "url": "https://example.com/1", "current_price": 900}},
                {{"title": "Boat", "url": "https://example.com/2", "featured": true}},
                "garbage"
            ]}}"#
        )
        .unwrap();

        let adapter = JsonFileAdapter::new(&config(file.path().to_str().unwrap())).unwrap();
        let records = adapter.fetch().await.unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["current_price"], RawValue::Number(900.0));
        assert_eq!(records[1]["featured"], RawValue::Text("true".into()));
    }

    #[test]
    fn bare_arrays_are_accepted() {
        let adapter = JsonFileAdapter::new(&config("unused.json")).unwrap();
        let records = adapter.parse(r#"[{"title": "Desk"}]"#).unwrap();
        assert_eq!(records.len(), 1);
        assert!(adapter.parse(r#"{"items": []}"#).is_err());
    }

    #[tokio::test]
    async fn missing_file_is_an_adapter_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("none.json");
        let adapter = JsonFileAdapter::new(&config(missing.to_str().unwrap())).unwrap();
        assert!(matches!(
            adapter.fetch().await,
            Err(AppError::SourceAdapter { .. })
        ));
    }
}
