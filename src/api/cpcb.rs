//! Provides a client for the government (data.gov.in / CPCB) real-time station feed.
//!
//! The feed returns one row per (station, pollutant). Rows are grouped into per-station
//! snapshots, and snapshots are reduced to a single city reading with a trimmed mean so one
//! hotspot or unusually clean station cannot drag the city value.

use crate::error::{AppError, Result};
use crate::models::{ist_offset, City, CpcbRecord, CpcbResponse, Pollutant, PollutantReading};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use reqwest::Client;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const BASE_URL: &str = "https://api.data.gov.in";
/// Real-time AQI resource of the open government data platform.
const RESOURCE_ID: &str = "3b01bcb8-0b14-4abf-b6f2-c1bfd384ba69";
const PAGE_LIMIT: &str = "1000";
const LAST_UPDATE_FORMAT: &str = "%d-%m-%Y %H:%M:%S";

/// Trimmed mean needs at least this many PM2.5-reporting stations; below it the median is used.
pub const TRIM_MIN_STATIONS: usize = 4;

/// Pollutant snapshot of a single monitoring station.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StationSnapshot {
    pub name: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub reading: PollutantReading,
}

/// An asynchronous client for the government station feed.
pub struct CpcbClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl CpcbClient {
    /// Creates a new `CpcbClient` with a bounded request timeout.
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

    /// Fetches the raw feed rows for `city`.
    pub async fn fetch_records(&self, city: &City) -> Result<Vec<CpcbRecord>> {
        let feed_city = feed_city_name(&city.name);
        info!("Fetching station feed for {}", feed_city);

        let url = format!("{}/resource/{}", self.base_url, RESOURCE_ID);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("api-key", self.api_key.as_str()),
                ("format", "json"),
                ("limit", PAGE_LIMIT),
                ("filters[city]", feed_city),
            ])
            .send()
            .await
            .map_err(|e| {
                error!("Error fetching station feed for {}: {}", feed_city, e);
                AppError::from(e)
            })?;

        let response = match response.error_for_status() {
            Ok(resp) => resp,
            Err(e) => {
                let status = e.status();
                error!(
                    "Station feed request failed with status {}: {}",
                    status.unwrap_or_default(),
                    e
                );
                if status == Some(reqwest::StatusCode::UNAUTHORIZED)
                    || status == Some(reqwest::StatusCode::FORBIDDEN)
                {
                    error!("Received 401/403. Check CPCB_API_KEY validity.");
                }
                return Err(AppError::Api(Arc::new(e)));
            },
        };

        let body: CpcbResponse = response.json().await.map_err(|e| {
            error!("Error parsing station feed JSON: {}", e);
            AppError::from(e)
        })?;

        debug!("Received {} feed rows for {}", body.records.len(), feed_city);
        Ok(body.records)
    }

    /// Fetches and groups the feed into per-station snapshots.
    pub async fn fetch_stations(&self, city: &City) -> Result<Vec<StationSnapshot>> {
        let records = self.fetch_records(city).await?;
        let (stations, skipped) = group_stations(&records, Utc::now());
        if skipped > 0 {
            warn!(
                "Skipped {} malformed station rows for {}",
                skipped, city.name
            );
        }
        Ok(stations)
    }

    /// Fetches the feed and reduces it to a single city reading.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::UpstreamUnavailable`] when no station reports a usable pollutant.
    pub async fn fetch_city_reading(&self, city: &City) -> Result<PollutantReading> {
        let stations = self.fetch_stations(city).await?;
        let reading = aggregate_stations(&stations).ok_or_else(|| {
            AppError::UpstreamUnavailable(format!("no station data for {}", city.name))
        })?;
        info!(
            "Aggregated {} stations into a city reading for {}",
            stations.len(),
            city.name
        );
        Ok(reading)
    }
}

/// City spelling used by the feed.
fn feed_city_name(name: &str) -> &str {
    match name {
        "Bangalore" => "Bengaluru",
        other => other,
    }
}

/// Parses the feed's IST `dd-mm-YYYY HH:MM:SS` timestamp.
fn parse_last_update(raw: &str) -> Option<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(raw.trim(), LAST_UPDATE_FORMAT).ok()?;
    ist_offset()
        .from_local_datetime(&naive)
        .single()
        .map(|ts| ts.with_timezone(&Utc))
}

/// Groups feed rows by station.
///
/// CO arrives in mg/m³ and is converted to µg/m³. Rows without a station name or pollutant id
/// are malformed and counted; rows for pollutants outside the standard (NH3) or with an `NA`
/// value are ignored. Stations without a parseable `last_update` are stamped `fallback_ts`.
///
/// Returns the snapshots (sorted by name) and the number of malformed rows.
pub fn group_stations(
    records: &[CpcbRecord],
    fallback_ts: DateTime<Utc>,
) -> (Vec<StationSnapshot>, usize) {
    let mut stations: BTreeMap<String, StationSnapshot> = BTreeMap::new();
    let mut skipped = 0;

    for record in records {
        let (Some(name), Some(label)) = (record.station.as_deref(), record.pollutant_id.as_deref())
        else {
            skipped += 1;
            continue;
        };

        let ts = record.last_update.as_deref().and_then(parse_last_update);
        let entry = stations
            .entry(name.to_string())
            .or_insert_with(|| StationSnapshot {
                name: name.to_string(),
                latitude: record.latitude,
                longitude: record.longitude,
                reading: PollutantReading::new(ts.unwrap_or(fallback_ts)),
            });
        if let Some(ts) = ts {
            if entry.reading.timestamp == fallback_ts || ts > entry.reading.timestamp {
                entry.reading.timestamp = ts;
            }
        }

        let (Some(pollutant), Some(value)) = (Pollutant::from_label(label), record.avg_value)
        else {
            continue;
        };
        if value < 0.0 {
            continue;
        }
        let value = match pollutant {
            Pollutant::Co => value * 1000.0,
            _ => value,
        };
        entry.reading.set(pollutant, Some(value));
    }

    (stations.into_values().collect(), skipped)
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

/// Reduces station snapshots to a single city reading.
///
/// With at least [`TRIM_MIN_STATIONS`] stations reporting PM2.5, stations are ranked by PM2.5
/// and `n/4` are dropped from each end; every pollutant is then averaged over the retained
/// stations. Stations without PM2.5 take no part in the ranking and keep contributing their
/// other pollutants. With fewer PM2.5 stations, each pollutant is the median over all stations.
///
/// The city timestamp is the latest station timestamp. Returns `None` when no station carries
/// any pollutant.
pub fn aggregate_stations(stations: &[StationSnapshot]) -> Option<PollutantReading> {
    let latest = stations.iter().map(|s| s.reading.timestamp).max()?;

    let mut ranked: Vec<&StationSnapshot> =
        stations.iter().filter(|s| s.reading.pm2_5.is_some()).collect();
    let unranked = stations.iter().filter(|s| s.reading.pm2_5.is_none());

    let mut reading = PollutantReading::new(latest);

    if ranked.len() >= TRIM_MIN_STATIONS {
        ranked.sort_by(|a, b| {
            a.reading
                .pm2_5
                .unwrap_or_default()
                .total_cmp(&b.reading.pm2_5.unwrap_or_default())
        });
        let trim = ranked.len() / 4;
        let retained: Vec<&StationSnapshot> = ranked[trim..ranked.len() - trim]
            .iter()
            .copied()
            .chain(unranked)
            .collect();
        debug!(
            "Trimmed mean over {} of {} PM2.5 stations",
            ranked.len() - 2 * trim,
            ranked.len()
        );

        for pollutant in Pollutant::ALL {
            let values: Vec<f64> = retained.iter().filter_map(|s| s.reading.get(pollutant)).collect();
            reading.set(pollutant, mean(&values));
        }
    } else {
        debug!(
            "Only {} PM2.5 stations; using per-pollutant median",
            ranked.len()
        );
        for pollutant in Pollutant::ALL {
            let values: Vec<f64> = stations.iter().filter_map(|s| s.reading.get(pollutant)).collect();
            reading.set(pollutant, median(&values));
        }
    }

    let has_any = reading.present().next().is_some();
    has_any.then_some(reading)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use serde_json::json;

    fn station(name: &str, pm25: Option<f64>, no2: Option<f64>) -> StationSnapshot {
        let mut reading = PollutantReading::new(Utc.with_ymd_and_hms(2025, 1, 10, 6, 0, 0).unwrap());
        reading.pm2_5 = pm25;
        reading.no2 = no2;
        StationSnapshot {
            name: name.to_string(),
            latitude: None,
            longitude: None,
            reading,
        }
    }

    fn row(station: &str, pollutant: &str, value: &str) -> serde_json::Value {
        json!({
            "city": "Delhi",
            "station": station,
            "last_update": "10-01-2025 11:00:00",
            "pollutant_id": pollutant,
            "avg_value": value
        })
    }

    #[test]
    fn test_trimmed_mean_discards_extremes() {
        let stations = vec![
            station("a", Some(10.0), Some(10.0)),
            station("b", Some(100.0), Some(20.0)),
            station("c", Some(120.0), Some(30.0)),
            station("d", Some(900.0), Some(40.0)),
        ];

        let reading = aggregate_stations(&stations).unwrap();

        // n=4 drops one from each end: b and c remain.
        assert_eq!(reading.pm2_5, Some(110.0));
        assert_eq!(reading.no2, Some(25.0));
    }

    #[test]
    fn test_stations_without_pm25_keep_contributing() {
        let stations = vec![
            station("a", Some(10.0), None),
            station("b", Some(100.0), None),
            station("c", Some(120.0), None),
            station("d", Some(900.0), None),
            station("e", None, Some(44.0)),
        ];

        let reading = aggregate_stations(&stations).unwrap();

        assert_eq!(reading.pm2_5, Some(110.0));
        assert_eq!(reading.no2, Some(44.0));
    }

    #[test]
    fn test_median_below_trim_threshold() {
        let stations = vec![
            station("a", Some(10.0), Some(5.0)),
            station("b", Some(40.0), None),
            station("c", Some(700.0), Some(15.0)),
        ];

        let reading = aggregate_stations(&stations).unwrap();

        assert_eq!(reading.pm2_5, Some(40.0));
        assert_eq!(reading.no2, Some(10.0));
        assert_eq!(reading.pm10, None);
    }

    #[test]
    fn test_aggregate_empty_is_none() {
        assert!(aggregate_stations(&[]).is_none());
        assert!(aggregate_stations(&[station("a", None, None)]).is_none());
    }

    #[test]
    fn test_group_stations_converts_co_and_counts_malformed_rows() {
        let records: Vec<CpcbRecord> = serde_json::from_value(json!([
            row("ITO", "PM2.5", "187"),
            row("ITO", "CO", "1.5"),
            row("ITO", "NH3", "12"),
            row("ITO", "NO2", "NA"),
            {"station": "ITO", "avg_value": "3"},
            row("Anand Vihar", "OZONE", "33")
        ]))
        .unwrap();

        let (stations, skipped) = group_stations(&records, Utc::now());

        assert_eq!(skipped, 1);
        assert_eq!(stations.len(), 2);
        let ito = stations.iter().find(|s| s.name == "ITO").unwrap();
        assert_eq!(ito.reading.pm2_5, Some(187.0));
        assert_eq!(ito.reading.co, Some(1500.0));
        assert_eq!(ito.reading.no2, None);
        // 11:00 IST is 05:30 UTC.
        assert_eq!(
            ito.reading.timestamp,
            Utc.with_ymd_and_hms(2025, 1, 10, 5, 30, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn test_fetch_city_reading_from_mock_server() {
        let mut server = mockito::Server::new_async().await;
        let body = json!({
            "total": 3,
            "records": [
                row("ITO", "PM2.5", "250"),
                row("ITO", "PM10", "300"),
                row("Mandir Marg", "PM2.5", "150")
            ]
        });
        let mock = server
            .mock("GET", format!("/resource/{}", RESOURCE_ID).as_str())
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("api-key".into(), "test-key-123".into()),
                Matcher::UrlEncoded("filters[city]".into(), "Delhi".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body.to_string())
            .create_async()
            .await;

        let client = CpcbClient::with_base_url(
            "test-key-123".to_string(),
            &server.url(),
            Duration::from_secs(5),
        )
        .unwrap();
        let reading = client.fetch_city_reading(&City::lookup("Delhi")).await.unwrap();

        mock.assert_async().await;
        assert_eq!(reading.pm2_5, Some(200.0));
        assert_eq!(reading.pm10, Some(300.0));
    }

    #[tokio::test]
    async fn test_http_error_is_reported() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", Matcher::Any)
            .with_status(403)
            .create_async()
            .await;

        let client =
            CpcbClient::with_base_url("bad-key-123".to_string(), &server.url(), Duration::from_secs(5))
                .unwrap();
        let result = client.fetch_records(&City::lookup("Pune")).await;

        assert!(matches!(result, Err(AppError::Api(_))));
    }
}
