//! Great-circle distance and geocoding.
//!
//! Distances are advisory sorting aids computed with the haversine formula
//! over a spherical Earth of radius 3958.8 miles.

mod geocoder;
mod nominatim;

use serde::{Deserialize, Serialize};

pub use geocoder::{GeocodeCache, Geocoder, GeocodingClient, location_query, zip_key};
pub use nominatim::NominatimClient;

/// Mean Earth radius in miles.
pub const EARTH_RADIUS_MILES: f64 = 3958.8;

/// A latitude/longitude pair in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Whether both components are finite and within range.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }

    /// Miles to another point.
    pub fn distance_to(&self, other: &Coordinates) -> f64 {
        distance_miles(
            self.latitude,
            self.longitude,
            other.latitude,
            other.longitude,
        )
    }

    /// Smallest lat/lon box containing every point within `miles`.
    pub fn bounding_box(&self, miles: f64) -> BoundingBox {
        bounding_box(*self, miles)
    }
}

/// Haversine distance in miles between two points given in degrees.
pub fn distance_miles(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let lat1 = lat1.to_radians();
    let lat2 = lat2.to_radians();
    let d_lat = lat2 - lat1;
    let d_lon = lon2.to_radians() - lon1.to_radians();

    let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_MILES * c
}

/// A superset filter for points within a radius. `lon_range` is `None` when
/// the circle touches a pole or crosses the antimeridian.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub lon_range: Option<(f64, f64)>,
}

// Slack for rounding so boundary points are never filtered out early.
const BOX_MARGIN_DEG: f64 = 1e-6;

fn bounding_box(origin: Coordinates, miles: f64) -> BoundingBox {
    let angular = miles.max(0.0) / EARTH_RADIUS_MILES;
    let lat = origin.latitude.to_radians();

    let min_lat = (lat - angular).to_degrees() - BOX_MARGIN_DEG;
    let max_lat = (lat + angular).to_degrees() + BOX_MARGIN_DEG;

    if min_lat <= -90.0 || max_lat >= 90.0 {
        return BoundingBox {
            min_lat: min_lat.max(-90.0),
            max_lat: max_lat.min(90.0),
            lon_range: None,
        };
    }

    let ratio = angular.sin() / lat.cos();
    if ratio >= 1.0 {
        return BoundingBox {
            min_lat,
            max_lat,
            lon_range: None,
        };
    }

    let delta = ratio.asin().to_degrees() + BOX_MARGIN_DEG;
    let min_lon = origin.longitude - delta;
    let max_lon = origin.longitude + delta;
    let lon_range = (min_lon >= -180.0 && max_lon <= 180.0).then_some((min_lon, max_lon));

    BoundingBox {
        min_lat,
        max_lat,
        lon_range,
    }
}
