//! Provides a client for the OpenWeatherMap air-pollution history API.
//!
//! The provider returns hourly component concentrations. Its own 1-5 index is not a CPCB AQI
//! and is ignored; AQI is computed downstream.

use crate::error::{AppError, Result};
use crate::models::{City, OwmHistoryResponse, OwmItem, PollutantReading};
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const BASE_URL: &str = "https://api.openweathermap.org";

/// An asynchronous client for the air-pollution history endpoint.
pub struct OwmClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl OwmClient {
    /// Creates a new `OwmClient` with a bounded request timeout.
    pub fn new(api_key: String, timeout: Duration) -> Result<Self> {
        Self::with_base_url(api_key, BASE_URL, timeout)
    }

    /// Creates a client against a custom base URL (used with a mock server in tests).
    pub fn with_base_url(api_key: String, base_url: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Fetches hourly readings for `city` over the `hours` hours ending at `end`.
    ///
    /// # Arguments
    ///
    /// * `city` - Resolved city; its coordinates are sent upstream.
    /// * `hours` - Length of the window.
    /// * `end` - End of the window (usually now).
    ///
    /// # Errors
    ///
    /// Transport, HTTP status and JSON errors are returned as-is. Malformed items inside an
    /// otherwise valid payload are skipped and counted, not treated as errors.
    pub async fn fetch_history(
        &self,
        city: &City,
        hours: u32,
        end: DateTime<Utc>,
    ) -> Result<Vec<PollutantReading>> {
        let start = end - ChronoDuration::hours(i64::from(hours.max(1)));
        info!(
            "Fetching air-pollution history for {} from {} to {}",
            city.name, start, end
        );

        let url = format!("{}/data/2.5/air_pollution/history", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("lat", city.latitude.to_string()),
                ("lon", city.longitude.to_string()),
                ("start", start.timestamp().to_string()),
                ("end", end.timestamp().to_string()),
                ("appid", self.api_key.clone()),
            ])
            .send()
            .await
            .map_err(|e| {
                error!("Error fetching history for {}: {}", city.name, e);
                AppError::from(e)
            })?;

        let response = match response.error_for_status() {
            Ok(resp) => resp,
            Err(e) => {
                let status = e.status();
                error!(
                    "History request failed with status {}: {}",
                    status.unwrap_or_default(),
                    e
                );
                if status == Some(reqwest::StatusCode::UNAUTHORIZED) {
                    error!("Received 401. Check OPENWEATHERMAP_API_KEY validity.");
                }
                return Err(AppError::Api(Arc::new(e)));
            },
        };

        let body: OwmHistoryResponse = response.json().await.map_err(|e| {
            error!("Error parsing history JSON: {}", e);
            AppError::from(e)
        })?;

        let (readings, skipped) = normalize_items(body.list);
        if skipped > 0 {
            warn!(
                "Skipped {} malformed history items for {}",
                skipped, city.name
            );
        }
        debug!("Received {} hourly readings for {}", readings.len(), city.name);
        Ok(readings)
    }
}

/// Converts provider items into readings. Returns the readings and the number skipped.
pub fn normalize_items(items: Vec<OwmItem>) -> (Vec<PollutantReading>, usize) {
    let total = items.len();
    let readings: Vec<PollutantReading> = items
        .into_iter()
        .filter_map(|item| {
            let ts = Utc.timestamp_opt(item.dt?, 0).single()?;
            let c = item.components?;
            let non_negative = |v: Option<f64>| v.filter(|v| v.is_finite() && *v >= 0.0);
            Some(PollutantReading {
                timestamp: ts,
                pm2_5: non_negative(c.pm2_5),
                pm10: non_negative(c.pm10),
                no2: non_negative(c.no2),
                co: non_negative(c.co),
                o3: non_negative(c.o3),
                so2: non_negative(c.so2),
                ..Default::default()
            })
        })
        .collect();

    let skipped = total - readings.len();
    (readings, skipped)
}
