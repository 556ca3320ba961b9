//! Nominatim (OpenStreetMap) geocoding over HTTP.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::{AppError, Result};
use crate::geo::{Coordinates, GeocodingClient};
use crate::models::GeocoderConfig;

/// One entry of a Nominatim `/search` response. Coordinates come back as strings.
#[derive(Debug, Deserialize)]
struct SearchHit {
    lat: String,
    lon: String,
}

/// Geocoding client for a Nominatim-compatible `/search` endpoint.
pub struct NominatimClient {
    client: reqwest::Client,
    search_url: String,
    country_code: String,
}

impl NominatimClient {
    pub fn new(config: &GeocoderConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            search_url: format!("{}/search", config.base_url.trim_end_matches('/')),
            country_code: config.country_code.clone(),
        })
    }
}

#[async_trait]
impl GeocodingClient for NominatimClient {
    async fn lookup(&self, query: &str) -> Result<Coordinates> {
        let is_zip = query.len() == 5 && query.chars().all(|c| c.is_ascii_digit());
        let search_key = if is_zip { "postalcode" } else { "q" };

        let response = self
            .client
            .get(&self.search_url)
            .query(&[
                (search_key, query),
                ("countrycodes", self.country_code.as_str()),
                ("format", "json"),
                ("limit", "1"),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AppError::geocode(
                query,
                format!("geocoder returned HTTP {}", response.status()),
            ));
        }

        let hits: Vec<SearchHit> = response.json().await?;
        let hit = hits
            .into_iter()
            .next()
            .ok_or_else(|| AppError::geocode(query, "no results"))?;

        let latitude = hit
            .lat
            .parse::<f64>()
            .map_err(|e| AppError::geocode(query, format!("bad latitude '{}': {}", hit.lat, e)))?;
        let longitude = hit
            .lon
            .parse::<f64>()
            .map_err(|e| AppError::geocode(query, format!("bad longitude '{}': {}", hit.lon, e)))?;

        Ok(Coordinates::new(latitude, longitude))
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn client_for(server: &MockServer) -> NominatimClient {
        let config = GeocoderConfig {
            base_url: server.uri(),
            ..GeocoderConfig::default()
        };
        NominatimClient::new(&config).unwrap()
    }

    #[tokio::test]
    async fn zip_lookup_uses_postalcode_parameter() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .and(query_param("postalcode", "78232"))
            .and(query_param("countrycodes", "us"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"lat": "29.5794", "lon": "-98.4982", "display_name": "78232, San Antonio"}
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let coords = client_for(&server).lookup("78232").await.unwrap();
        assert_eq!(coords, Coordinates::new(29.5794, -98.4982));
    }

    #[tokio::test]
    async fn city_lookup_uses_free_text_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .and(query_param("q", "austin, tx"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!([{"lat": "30.2672", "lon": "-97.7431"}])),
            )
            .mount(&server)
            .await;

        let coords = client_for(&server).lookup("austin, tx").await.unwrap();
        assert_eq!(coords, Coordinates::new(30.2672, -97.7431));
    }

    #[tokio::test]
    async fn empty_result_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .mount(&server)
            .await;

        let err = client_for(&server).lookup("00000").await.unwrap_err();
        assert!(matches!(err, AppError::GeocodeUnavailable { .. }));
    }

    #[tokio::test]
    async fn server_error_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = client_for(&server).lookup("78232").await.unwrap_err();
        assert!(matches!(err, AppError::GeocodeUnavailable { .. }));
    }
}
