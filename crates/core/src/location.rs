//! The user's position, as far as the session knows it.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, RwLock};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Location {
    pub coordinates: Coordinates,
    pub city: Option<String>,
    pub address: Option<String>,
}

impl Location {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self {
            coordinates: Coordinates { lat, lon },
            city: None,
            address: None,
        }
    }

    pub fn with_city(mut self, city: impl Into<String>) -> Self {
        self.city = Some(city.into());
        self
    }

    /// Extracts a location from a provider payload.
    ///
    /// Accepts `lat`/`lon` or `latitude`/`longitude`, optionally nested under
    /// `data`. Reverse-geocoder style `address.city|town|village` and
    /// `display_name` fields are picked up when present.
    pub fn from_json(value: &Value) -> Option<Self> {
        let body = value.get("data").unwrap_or(value);
        let number = |keys: &[&str]| keys.iter().find_map(|k| body.get(*k).and_then(Value::as_f64));
        let lat = number(&["lat", "latitude"])?;
        let lon = number(&["lon", "lng", "longitude"])?;
        if !lat.is_finite() || !lon.is_finite() || (lat == 0.0 && lon == 0.0) {
            return None;
        }
        Some(Self {
            coordinates: Coordinates { lat, lon },
            city: city_of(body),
            address: body
                .get("address")
                .and_then(Value::as_str)
                .or_else(|| body.get("display_name").and_then(Value::as_str))
                .map(str::to_string),
        })
    }

    /// Fills in missing place names from a reverse-geocoding payload.
    pub fn enrich(&mut self, value: &Value) {
        let body = value.get("data").unwrap_or(value);
        if self.city.is_none() {
            self.city = city_of(body);
        }
        if self.address.is_none() {
            self.address = body
                .get("display_name")
                .or_else(|| body.get("address").filter(|a| a.is_string()))
                .and_then(Value::as_str)
                .map(str::to_string);
        }
    }

    /// Human readable place, falling back to raw coordinates.
    pub fn describe(&self) -> String {
        match (&self.address, &self.city) {
            (Some(address), _) => address.clone(),
            (None, Some(city)) => city.clone(),
            (None, None) => format!(
                "{:.5}, {:.5}",
                self.coordinates.lat, self.coordinates.lon
            ),
        }
    }
}

fn city_of(body: &Value) -> Option<String> {
    let direct = body.get("city").and_then(Value::as_str);
    let nested = body.get("address").and_then(|a| {
        ["city", "town", "village"]
            .iter()
            .find_map(|k| a.get(*k).and_then(Value::as_str))
    });
    direct
        .or(nested)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
}

/// Session-scoped location cache, filled by context priming or a live lookup.
#[derive(Debug, Clone, Default)]
pub struct LocationCache {
    inner: Arc<RwLock<Option<Location>>>,
}

impl LocationCache {
    pub fn get(&self) -> Option<Location> {
        match self.inner.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn set(&self, location: Location) {
        match self.inner.write() {
            Ok(mut guard) => *guard = Some(location),
            Err(poisoned) => *poisoned.into_inner() = Some(location),
        }
    }
}
