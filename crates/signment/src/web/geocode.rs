//! Checkpoint geocoding for the tracking map.
//!
//! Checkpoint entries look like `YYYY-MM-DD HH:MM - <location> - <note>`;
//! the middle segment is geocoded through geocode.maps.co. Results are
//! cached for a day and requests are throttled to one per second, the
//! provider's free-tier limit. A failed lookup skips the coordinate and
//! never fails the caller.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};

use crate::core::config;
use crate::storage::ShipmentCache;

/// One geocoded checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Coord {
    pub lat: f64,
    pub lon: f64,
    /// The full checkpoint entry this coordinate belongs to
    pub desc: String,
}

/// Provider response row (only the fields we read).
#[derive(Debug, Deserialize)]
struct GeocodeResult {
    lat: String,
    lon: String,
}

static LAST_REQUEST: Lazy<Mutex<Option<Instant>>> = Lazy::new(|| Mutex::new(None));

/// Extracts the location from a checkpoint entry, if it has one.
pub fn checkpoint_location(checkpoint: &str) -> Option<&str> {
    let mut parts = checkpoint.split(" - ");
    let _timestamp = parts.next()?;
    parts.next().map(str::trim)
}

/// Geocodes every checkpoint that has a parsable location. Returns one
/// coordinate per successfully resolved checkpoint, in order.
pub async fn geocode_checkpoints(cache: &ShipmentCache, http: &reqwest::Client, checkpoints: &[String]) -> Vec<Coord> {
    let api_key = config::GEOCODING_API_KEY.as_str();
    if api_key.is_empty() {
        return Vec::new();
    }

    let mut coords = Vec::new();
    for checkpoint in checkpoints {
        let Some(location) = checkpoint_location(checkpoint) else {
            continue;
        };

        if let Some(cached) = cache.get_geocode(location).await {
            if let Ok(mut coord) = serde_json::from_str::<Coord>(&cached) {
                coord.desc = checkpoint.clone();
                coords.push(coord);
                continue;
            }
        }

        throttle().await;

        match fetch_coordinate(http, location, api_key).await {
            Some((lat, lon)) => {
                let coord = Coord {
                    lat,
                    lon,
                    desc: checkpoint.clone(),
                };
                if let Ok(json) = serde_json::to_string(&coord) {
                    cache.set_geocode(location, &json).await;
                }
                coords.push(coord);
            }
            None => {
                log::warn!("No geocode result for {}", location);
            }
        }
    }
    coords
}

/// Enforces the 1 request/second provider limit across the process.
async fn throttle() {
    let mut last = LAST_REQUEST.lock().await;
    if let Some(previous) = *last {
        let elapsed = previous.elapsed();
        if elapsed < Duration::from_secs(1) {
            tokio::time::sleep(Duration::from_secs(1) - elapsed).await;
        }
    }
    *last = Some(Instant::now());
}

async fn fetch_coordinate(http: &reqwest::Client, location: &str, api_key: &str) -> Option<(f64, f64)> {
    let url = format!("https://geocode.maps.co/search?q={}&api_key={}", location, api_key);
    let response = match http.get(&url).send().await {
        Ok(response) => response,
        Err(e) => {
            log::warn!("Geocoding failed for {}: {}", location, e);
            return None;
        }
    };

    if !response.status().is_success() {
        log::warn!("Geocoding for {} returned HTTP {}", location, response.status());
        return None;
    }

    let results: Vec<GeocodeResult> = match response.json().await {
        Ok(results) => results,
        Err(e) => {
            log::warn!("Unreadable geocoding response for {}: {}", location, e);
            return None;
        }
    };

    let first = results.first()?;
    Some((first.lat.parse().ok()?, first.lon.parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_checkpoint_location_parsing() {
        assert_eq!(
            checkpoint_location("2025-01-01 12:00 - Lagos, NG - Processed"),
            Some("Lagos, NG")
        );
        assert_eq!(
            checkpoint_location("2025-01-01 12:00 - Abuja, NG - Delayed due to weather"),
            Some("Abuja, NG")
        );
        assert_eq!(checkpoint_location("no separators here"), None);
    }

    #[tokio::test]
    async fn test_geocode_without_api_key_is_empty() {
        // GEOCODING_API_KEY defaults to empty in the test environment
        let cache = ShipmentCache::in_memory();
        let http = reqwest::Client::new();
        let coords = geocode_checkpoints(
            &cache,
            &http,
            &["2025-01-01 12:00 - Lagos, NG - Processed".to_string()],
        )
        .await;
        assert!(coords.is_empty());
    }

    #[test]
    fn test_coord_serialization() {
        let coord = Coord {
            lat: 6.45,
            lon: 3.39,
            desc: "2025-01-01 12:00 - Lagos, NG - Processed".to_string(),
        };
        let json = serde_json::to_value(&coord).unwrap();
        assert_eq!(json["lat"], 6.45);
        assert_eq!(json["desc"].as_str().unwrap(), coord.desc);
    }
}
