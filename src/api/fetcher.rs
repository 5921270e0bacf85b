//! Multi-source data fetcher.
//!
//! Produces a series for a city from a prioritized chain: government station feed, commercial
//! air-pollution history, synthetic generator. A tier that errors or yields nothing usable
//! falls through to the next one, so the chain always ends with some data.

use super::cpcb::{CpcbClient, StationSnapshot};
use super::mock::SyntheticGenerator;
use super::openweather::OwmClient;
use crate::aqi::{fill_batch, to_record};
use crate::config::Settings;
use crate::error::{AppError, Result};
use crate::models::{AqiRecord, City, CityTimeSeries, DataSource};
use chrono::Utc;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Longest window served by the history call.
pub const MAX_HISTORY_DAYS: u32 = 7;

/// Network tiers a single chain walk may wait on, one request each.
pub const NETWORK_TIERS: u32 = 2;
/// Headroom on top of the per-request budgets for parsing and the synthetic tier.
const CHAIN_SLACK: Duration = Duration::from_secs(5);

/// Upper bound on a whole chain walk when each request is bounded by `per_request`.
///
/// Always longer than every network tier timing out in turn, so a hung tier falls through to
/// the next one before an outer guard gives up on the chain.
pub fn chain_timeout(per_request: Duration) -> Duration {
    per_request * NETWORK_TIERS + CHAIN_SLACK
}

/// A fetched series with its provenance.
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub series: CityTimeSeries,
    pub source: DataSource,
}

/// Station snapshots with their provenance.
#[derive(Debug, Clone)]
pub struct StationFetch {
    pub stations: Vec<StationSnapshot>,
    pub source: DataSource,
}

/// Source of city series consumed by the cache and the service.
///
/// Implementations may fail; callers treat an error like an empty result.
pub trait SeriesFetcher: Send + Sync + 'static {
    /// Recent readings for the realtime view.
    fn fetch_realtime(&self, city: &City) -> impl Future<Output = Result<FetchResult>> + Send;

    /// Readings covering the last `days` days (clamped to `1..=7`).
    fn fetch_history(
        &self,
        city: &City,
        days: u32,
    ) -> impl Future<Output = Result<FetchResult>> + Send;

    /// Per-station snapshots for rankings.
    fn fetch_stations(&self, city: &City) -> impl Future<Output = Result<StationFetch>> + Send {
        let name = city.name.clone();
        async move {
            Err(AppError::UpstreamUnavailable(format!(
                "no station source for {}",
                name
            )))
        }
    }
}

/// The production fetch chain.
pub struct MultiSourceFetcher {
    cpcb: Option<CpcbClient>,
    owm: Option<OwmClient>,
    synthetic: SyntheticGenerator,
    realtime_hours: u32,
}

impl MultiSourceFetcher {
    pub fn new(cpcb: Option<CpcbClient>, owm: Option<OwmClient>, realtime_hours: u32) -> Self {
        Self {
            cpcb,
            owm,
            synthetic: SyntheticGenerator::new(),
            realtime_hours: realtime_hours.max(1),
        }
    }

    /// Builds the chain from settings; tiers without a configured key are left out.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let cpcb = settings
            .cpcb_api_key
            .clone()
            .map(|key| CpcbClient::new(key, settings.fetch_timeout))
            .transpose()?;
        let owm = settings
            .owm_api_key
            .clone()
            .map(|key| OwmClient::new(key, settings.fetch_timeout))
            .transpose()?;

        info!(
            "Fetch chain: station feed {}, history API {}, synthetic always",
            if cpcb.is_some() { "on" } else { "off" },
            if owm.is_some() { "on" } else { "off" }
        );
        Ok(Self::new(cpcb, owm, settings.realtime_hours))
    }

    async fn try_cpcb(&self, city: &City) -> Option<FetchResult> {
        let client = self.cpcb.as_ref()?;
        match client.fetch_city_reading(city).await {
            Ok(reading) => Some(FetchResult {
                series: CityTimeSeries::from_records(&city.name, vec![to_record(reading)]),
                source: DataSource::Cpcb,
            }),
            Err(e) => {
                warn!("Station feed failed for {}: {}; falling through", city.name, e);
                None
            },
        }
    }

    async fn try_owm(&self, city: &City, hours: u32) -> Option<FetchResult> {
        let client = self.owm.as_ref()?;
        match client.fetch_history(city, hours, Utc::now()).await {
            Ok(readings) if !readings.is_empty() => {
                let mut records: Vec<AqiRecord> =
                    readings.into_iter().map(AqiRecord::pending).collect();
                fill_batch(&mut records);
                Some(FetchResult {
                    series: CityTimeSeries::from_records(&city.name, records),
                    source: DataSource::OpenWeather,
                })
            },
            Ok(_) => {
                warn!("History API returned no rows for {}; falling through", city.name);
                None
            },
            Err(e) => {
                warn!("History API failed for {}: {}; falling through", city.name, e);
                None
            },
        }
    }

    fn synthetic_hours(&self, city: &City, hours: u32) -> FetchResult {
        let records = self
            .synthetic
            .hourly(city, hours, Utc::now(), &mut rand::thread_rng());
        info!(
            "Using {} synthetic hourly rows for {}",
            records.len(),
            city.name
        );
        FetchResult {
            series: CityTimeSeries::from_records(&city.name, records),
            source: DataSource::Synthetic,
        }
    }
}

impl SeriesFetcher for MultiSourceFetcher {
    async fn fetch_realtime(&self, city: &City) -> Result<FetchResult> {
        if let Some(result) = self.try_cpcb(city).await {
            debug!("Realtime data for {} from {}", city.name, result.source);
            return Ok(result);
        }
        if let Some(result) = self.try_owm(city, self.realtime_hours).await {
            debug!("Realtime data for {} from {}", city.name, result.source);
            return Ok(result);
        }
        Ok(self.synthetic_hours(city, self.realtime_hours))
    }

    async fn fetch_history(&self, city: &City, days: u32) -> Result<FetchResult> {
        let hours = days.clamp(1, MAX_HISTORY_DAYS) * 24;
        if let Some(result) = self.try_owm(city, hours).await {
            return Ok(result);
        }
        Ok(self.synthetic_hours(city, hours))
    }

    async fn fetch_stations(&self, city: &City) -> Result<StationFetch> {
        if let Some(client) = self.cpcb.as_ref() {
            match client.fetch_stations(city).await {
                Ok(stations) if !stations.is_empty() => {
                    return Ok(StationFetch {
                        stations,
                        source: DataSource::Cpcb,
                    })
                },
                Ok(_) => warn!("Station feed has no stations for {}", city.name),
                Err(e) => warn!("Station feed failed for {}: {}", city.name, e),
            }
        }

        let stations = self
            .synthetic
            .stations(city, Utc::now(), &mut rand::thread_rng());
        Ok(StationFetch {
            stations,
            source: DataSource::Synthetic,
        })
    }
}
