//! Cached ZIP/city geocoding.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{AppError, Result};
use crate::geo::Coordinates;
use crate::models::LocationInput;

/// External geocoding collaborator.
#[async_trait]
pub trait GeocodingClient: Send + Sync {
    /// Resolve a ZIP code or "City, ST" query.
    async fn lookup(&self, query: &str) -> Result<Coordinates>;
}

/// Persistent query-to-coordinates cache.
///
/// Writes are last-write-wins so concurrent misses for the same key are harmless.
#[async_trait]
pub trait GeocodeCache: Send + Sync {
    async fn cached_coordinates(&self, key: &str) -> Result<Option<Coordinates>>;

    async fn remember_coordinates(&self, key: &str, coords: Coordinates) -> Result<()>;
}

/// Normalize a ZIP code to its five-digit form.
pub fn zip_key(zip: &str) -> Result<String> {
    let digits: String = zip
        .trim()
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    if digits.len() == 5 {
        Ok(digits)
    } else {
        Err(AppError::validation(format!("invalid ZIP code '{zip}'")))
    }
}

/// The cache key / lookup query for a location: ZIP when known, else "city, st".
pub fn location_query(city: Option<&str>, state: &str, zip: Option<&str>) -> Option<String> {
    if let Some(key) = zip.and_then(|z| zip_key(z).ok()) {
        return Some(key);
    }
    let city = city.map(str::trim).filter(|c| !c.is_empty())?;
    Some(format!("{}, {}", city, state.trim()).to_lowercase())
}

/// ZIP/city resolver backed by a persistent cache and an external client.
#[derive(Clone)]
pub struct Geocoder {
    cache: Arc<dyn GeocodeCache>,
    client: Arc<dyn GeocodingClient>,
    timeout: Duration,
}

impl Geocoder {
    pub fn new(
        cache: Arc<dyn GeocodeCache>,
        client: Arc<dyn GeocodingClient>,
        timeout: Duration,
    ) -> Self {
        Self {
            cache,
            client,
            timeout,
        }
    }

    /// Resolve a ZIP code, consulting the cache first.
    pub async fn resolve(&self, zip: &str) -> Result<Coordinates> {
        let key = zip_key(zip)?;
        self.resolve_key(&key).await
    }

    /// Resolve a listing location. `Ok(None)` when there is nothing to look up.
    pub async fn resolve_location(&self, location: &LocationInput) -> Result<Option<Coordinates>> {
        if let (Some(latitude), Some(longitude)) = (location.latitude, location.longitude) {
            return Ok(Some(Coordinates::new(latitude, longitude)));
        }
        match location_query(
            location.city.as_deref(),
            &location.state,
            location.zip_code.as_deref(),
        ) {
            Some(key) => self.resolve_key(&key).await.map(Some),
            None => Ok(None),
        }
    }

    /// Force a fresh lookup for a ZIP code, overwriting the cached value.
    pub async fn refresh(&self, zip: &str) -> Result<Coordinates> {
        let key = zip_key(zip)?;
        let coords = self.lookup(&key).await?;
        self.cache.remember_coordinates(&key, coords).await?;
        log::info!("Refreshed geocode for {}", key);
        Ok(coords)
    }

    async fn resolve_key(&self, key: &str) -> Result<Coordinates> {
        match self.cache.cached_coordinates(key).await {
            Ok(Some(coords)) => return Ok(coords),
            Ok(None) => {}
            Err(e) => log::warn!("Geocode cache read failed for {}: {}", key, e),
        }

        let coords = self.lookup(key).await?;
        if let Err(e) = self.cache.remember_coordinates(key, coords).await {
            log::warn!("Geocode cache write failed for {}: {}", key, e);
        }
        log::debug!(
            "Geocoded {} to {}, {}",
            key,
            coords.latitude,
            coords.longitude
        );
        Ok(coords)
    }

    async fn lookup(&self, key: &str) -> Result<Coordinates> {
        let coords = match tokio::time::timeout(self.timeout, self.client.lookup(key)).await {
            Ok(Ok(coords)) => coords,
            Ok(Err(AppError::GeocodeUnavailable { query, message })) => {
                return Err(AppError::GeocodeUnavailable { query, message });
            }
            Ok(Err(e)) => return Err(AppError::geocode(key, e)),
            Err(_) => {
                return Err(AppError::geocode(
                    key,
                    format!("lookup timed out after {}s", self.timeout.as_secs()),
                ));
            }
        };
        if !coords.is_valid() {
            return Err(AppError::geocode(key, "lookup returned out-of-range coordinates"));
        }
        Ok(coords)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[derive(Default)]
    struct MemoryCache {
        entries: Mutex<HashMap<String, Coordinates>>,
    }

    #[async_trait]
    impl GeocodeCache for MemoryCache {
        async fn cached_coordinates(&self, key: &str) -> Result<Option<Coordinates>> {
            Ok(self.entries.lock().unwrap().get(key).copied())
        }

        async fn remember_coordinates(&self, key: &str, coords: Coordinates) -> Result<()> {
            self.entries.lock().unwrap().insert(key.to_string(), coords);
            Ok(())
        }
    }

    struct CountingClient {
        calls: AtomicUsize,
        result: Option<Coordinates>,
        delay: Duration,
    }

    impl CountingClient {
        fn returning(coords: Coordinates) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                result: Some(coords),
                delay: Duration::ZERO,
            }
        }

        fn failing() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                result: None,
                delay: Duration::ZERO,
            }
        }
    }

    #[async_trait]
    impl GeocodingClient for CountingClient {
        async fn lookup(&self, query: &str) -> Result<Coordinates> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.result
                .ok_or_else(|| AppError::geocode(query, "service unavailable"))
        }
    }

    fn geocoder(client: Arc<CountingClient>, cache: Arc<MemoryCache>) -> Geocoder {
        Geocoder::new(cache, client, Duration::from_secs(1))
    }

    #[tokio::test]
    async fn cache_hit_skips_the_client() {
        let client = Arc::new(CountingClient::returning(Coordinates::new(29.58, -98.49)));
        let cache = Arc::new(MemoryCache::default());
        let geocoder = geocoder(client.clone(), cache.clone());

        let first = geocoder.resolve("78232").await.unwrap();
        let second = geocoder.resolve("78232-1234").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
        assert!(cache.entries.lock().unwrap().contains_key("78232"));
    }

    #[tokio::test]
    async fn client_failure_is_geocode_unavailable() {
        let client = Arc::new(CountingClient::failing());
        let geocoder = geocoder(client, Arc::new(MemoryCache::default()));

        let err = geocoder.resolve("78232").await.unwrap_err();
        assert!(matches!(err, AppError::GeocodeUnavailable { .. }));
    }

    #[tokio::test]
    async fn slow_client_times_out() {
        let client = Arc::new(CountingClient {
            delay: Duration::from_millis(200),
            ..CountingClient::returning(Coordinates::new(29.58, -98.49))
        });
        let geocoder = Geocoder::new(
            Arc::new(MemoryCache::default()),
            client,
            Duration::from_millis(20),
        );

        let err = geocoder.resolve("78232").await.unwrap_err();
        assert!(matches!(err, AppError::GeocodeUnavailable { .. }));
    }

    #[tokio::test]
    async fn location_without_zip_uses_city_query() {
        let client = Arc::new(CountingClient::returning(Coordinates::new(30.27, -97.74)));
        let cache = Arc::new(MemoryCache::default());
        let geocoder = geocoder(client, cache.clone());

        let location = LocationInput {
            city: Some("Austin".into()),
            state: "TX".into(),
            ..LocationInput::default()
        };
        let coords = geocoder.resolve_location(&location).await.unwrap();

        assert_eq!(coords, Some(Coordinates::new(30.27, -97.74)));
        assert!(cache.entries.lock().unwrap().contains_key("austin, tx"));
    }

    #[tokio::test]
    async fn empty_location_needs_no_lookup() {
        let client = Arc::new(CountingClient::failing());
        let geocoder = geocoder(client.clone(), Arc::new(MemoryCache::default()));

        let location = LocationInput {
            state: "TX".into(),
            ..LocationInput::default()
        };
        assert_eq!(geocoder.resolve_location(&location).await.unwrap(), None);
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn refresh_bypasses_the_cache() {
        let client = Arc::new(CountingClient::returning(Coordinates::new(29.58, -98.49)));
        let cache = Arc::new(MemoryCache::default());
        cache
            .remember_coordinates("78232", Coordinates::new(0.0, 0.0))
            .await
            .unwrap();
        let geocoder = geocoder(client.clone(), cache.clone());

        let coords = geocoder.refresh("78232").await.unwrap();
        assert_eq!(coords, Coordinates::new(29.58, -98.49));
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            cache.cached_coordinates("78232").await.unwrap(),
            Some(Coordinates::new(29.58, -98.49))
        );
    }

    #[test]
    fn zip_key_rejects_garbage() {
        assert_eq!(zip_key(" 78232 ").unwrap(), "78232");
        assert!(zip_key("7823").is_err());
        assert!(zip_key("abcde").is_err());
    }
}
