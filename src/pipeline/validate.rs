// src/pipeline/validate.rs

use crate::error::Result;
use crate::models::Config;
use crate::pipeline::normalize::Normalizer;
use crate::services::build_adapters;
use crate::utils::report;

/// Validate configuration values, source selectors and adapter setup.
pub fn run_validate(config: &Config) -> Result<()> {
    report::header("Validating configuration");

    let checked = config
        .validate()
        .and_then(|_| Normalizer::new(config.ingestion.source_utc_offset_hours))
        .and_then(|_| build_adapters(config));

    match checked {
        Ok(adapters) => {
            log::info!("✓ Config OK");
            report::sub_item(&format!("Database: {}", database_scheme(&config.database.url)));
            report::sub_item(&format!("User agent: {}", config.http.user_agent));
            report::sub_item(&format!("Timeout: {}s", config.http.timeout_secs));
            report::sub_item(&format!("Max concurrent: {}", config.http.max_concurrent));
            report::sub_item(&format!("Geocoder: {}", config.geocoder.base_url));

            log::info!("✓ Sources OK");
            for adapter in &adapters {
                let info = adapter.info();
                report::sub_item(&format!("{} ({})", info.name, info.key));
            }
            let disabled = config.sources.iter().filter(|s| !s.enabled).count();
            if disabled > 0 {
                report::sub_item(&format!("{disabled} disabled"));
            }
            Ok(())
        }
        Err(e) => {
            log::error!("Validation failed: {}", e);
            Err(e)
        }
    }
}

/// Scheme part of a database URL; credentials are never logged.
fn database_scheme(url: &str) -> &str {
    url.split(':').next().unwrap_or_default()
}
