//! Source adapters.
//!
//! Each configured source is fetched by one adapter:
//! - HTML listing pages scraped with CSS selectors (`HtmlListingAdapter`)
//! - Saved scrape files (`JsonFileAdapter`)
//!
//! Adapters fail independently; one broken source never stops the others.

mod html;
mod json_file;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{Config, RawRecord, SourceInfo, SourceKind};
use crate::utils::http::create_async_client;

pub use html::{HtmlListingAdapter, parse_selector};
pub use json_file::JsonFileAdapter;

/// Fetches raw listing records from one auction source.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Identity of the source this adapter reads.
    fn info(&self) -> &SourceInfo;

    async fn fetch(&self) -> Result<Vec<RawRecord>>;
}

/// Build adapters for every enabled source in the configuration.
pub fn build_adapters(config: &Config) -> Result<Vec<Box<dyn SourceAdapter>>> {
    let client = create_async_client(&config.http)?;
    let delay = Duration::from_millis(config.http.request_delay_ms);

    let mut adapters: Vec<Box<dyn SourceAdapter>> = Vec::new();
    for source in config.sources.iter().filter(|s| s.enabled) {
        let adapter: Box<dyn SourceAdapter> = match source.kind {
            SourceKind::Html => Box::new(HtmlListingAdapter::new(source, client.clone(), delay)?),
            SourceKind::JsonFile => Box::new(JsonFileAdapter::new(source)?),
        };
        adapters.push(adapter);
    }
    Ok(adapters)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_sources_build() {
        let adapters = build_adapters(&Config::default()).unwrap();
        assert_eq!(adapters.len(), 3);
        assert_eq!(adapters[0].info().key, "public_surplus");
    }

    #[test]
    fn disabled_sources_are_skipped() {
        let mut config = Config::default();
        config.sources[1].enabled = false;
        let keys: Vec<_> = build_adapters(&config)
            .unwrap()
            .iter()
            .map(|a| a.info().key.clone())
            .collect();
        assert_eq!(keys, vec!["public_surplus", "govdeals"]);
    }
}
