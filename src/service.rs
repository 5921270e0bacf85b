//! Consumer-facing operations.
//!
//! Every operation returns an [`Outcome`] so callers can tell real data from a best-effort
//! fallback without parsing log output. Only [`AirQualityService::forecast`] may return
//! [`Outcome::Unavailable`]; the citizen views always carry data, simulated if need be.

use crate::api::{chain_timeout, MultiSourceFetcher, SeedStore, SeriesFetcher, StationSnapshot, SyntheticGenerator};
use crate::aqi::fill_batch;
use crate::cache::{AqiCache, CacheSnapshot, Freshness};
use crate::config::Settings;
use crate::error::{AppError, Result};
use crate::forecast::{run_forecast, ModelRegistry, HISTORY_WINDOW};
use crate::insights::{
    best_time_windows, clean_air_score, station_rankings, CleanAirScore, StationRanking, TimeSlot,
};
use crate::models::{AqiRecord, City, CityTimeSeries, DataSource, ForecastPoint};
use chrono::{Duration, Utc};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Below this many cached rows, forecast history is topped up from the seed dataset.
pub const MIN_FORECAST_HISTORY: usize = 24;

/// Weather assumed when the starting snapshot has none.
const DEFAULT_TEMPERATURE: f64 = 25.0;
const DEFAULT_HUMIDITY: f64 = 50.0;
const DEFAULT_WIND_SPEED: f64 = 5.0;

/// Why a result is not first-hand, current data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Degradation {
    /// Every upstream tier fell through to the synthetic generator.
    Simulated,
    /// A refresh failed and the previous cache entry was served.
    Stale { age_minutes: i64 },
    /// Nothing was ever fetched for the city; the cache holds an emergency series.
    EmergencySimulation,
    /// The operation itself failed and mock data was substituted.
    MockFallback,
    /// Some forecast steps repeated the previous value.
    PartialForecast { failed_steps: usize },
}

impl fmt::Display for Degradation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Degradation::Simulated => write!(f, "simulated data (no upstream source available)"),
            Degradation::Stale { age_minutes } => {
                write!(f, "stale data ({} min old)", age_minutes)
            },
            Degradation::EmergencySimulation => {
                write!(f, "emergency simulation (all sources failed)")
            },
            Degradation::MockFallback => write!(f, "mock data"),
            Degradation::PartialForecast { failed_steps } => {
                write!(f, "partial forecast ({} steps repeated)", failed_steps)
            },
        }
    }
}

/// Result of a consumer operation.
#[derive(Debug, Clone)]
pub enum Outcome<T> {
    Fresh(T),
    Degraded(T, Degradation),
    Unavailable(AppError),
}

impl<T> Outcome<T> {
    fn from_parts(data: T, degradation: Option<Degradation>) -> Self {
        match degradation {
            Some(reason) => Outcome::Degraded(data, reason),
            None => Outcome::Fresh(data),
        }
    }

    pub fn data(&self) -> Option<&T> {
        match self {
            Outcome::Fresh(data) | Outcome::Degraded(data, _) => Some(data),
            Outcome::Unavailable(_) => None,
        }
    }

    pub fn into_data(self) -> Option<T> {
        match self {
            Outcome::Fresh(data) | Outcome::Degraded(data, _) => Some(data),
            Outcome::Unavailable(_) => None,
        }
    }

    pub fn degradation(&self) -> Option<&Degradation> {
        match self {
            Outcome::Degraded(_, reason) => Some(reason),
            _ => None,
        }
    }

    pub fn is_fresh(&self) -> bool {
        matches!(self, Outcome::Fresh(_))
    }

    pub fn map<U, M: FnOnce(T) -> U>(self, f: M) -> Outcome<U> {
        match self {
            Outcome::Fresh(data) => Outcome::Fresh(f(data)),
            Outcome::Degraded(data, reason) => Outcome::Degraded(f(data), reason),
            Outcome::Unavailable(e) => Outcome::Unavailable(e),
        }
    }
}

/// Maps cache provenance onto a degradation reason.
fn snapshot_degradation(snapshot: &CacheSnapshot) -> Option<Degradation> {
    match snapshot.freshness {
        Freshness::Stale { age_minutes } => Some(Degradation::Stale { age_minutes }),
        Freshness::Emergency => Some(Degradation::EmergencySimulation),
        Freshness::Fresh if snapshot.source == DataSource::Synthetic => {
            Some(Degradation::Simulated)
        },
        Freshness::Fresh => None,
    }
}

fn source_degradation(source: DataSource) -> Option<Degradation> {
    (!source.is_real()).then_some(Degradation::Simulated)
}

/// Owns the cache, model registry and seed store, and serves every consumer operation.
pub struct AirQualityService<F = MultiSourceFetcher> {
    cache: AqiCache<F>,
    models: Arc<ModelRegistry>,
    seeds: Arc<SeedStore>,
    synthetic: SyntheticGenerator,
    /// Bound on a whole fetch chain walk.
    chain_budget: std::time::Duration,
}

impl AirQualityService<MultiSourceFetcher> {
    /// Builds the production service: fetch chain from the configured keys, models loaded
    /// once from `model_dir`, seeds read lazily from `data_dir`.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let fetcher = MultiSourceFetcher::from_settings(settings)?;
        let models = ModelRegistry::load(&settings.model_dir, &settings.cities);
        info!("Forecast models available for: {:?}", models.cities());
        let seeds = SeedStore::new(settings.data_dir.clone());
        Ok(Self::new(
            Arc::new(fetcher),
            Arc::new(models),
            Arc::new(seeds),
            settings,
        ))
    }
}

impl<F: SeriesFetcher> AirQualityService<F> {
    pub fn new(
        fetcher: Arc<F>,
        models: Arc<ModelRegistry>,
        seeds: Arc<SeedStore>,
        settings: &Settings,
    ) -> Self {
        Self {
            cache: AqiCache::new(
                fetcher,
                Duration::minutes(settings.cache_ttl_minutes),
                settings.fetch_timeout,
                settings.realtime_hours,
            ),
            models,
            seeds,
            synthetic: SyntheticGenerator::new(),
            chain_budget: chain_timeout(settings.fetch_timeout),
        }
    }

    pub fn models(&self) -> &ModelRegistry {
        &self.models
    }

    pub fn cache(&self) -> &AqiCache<F> {
        &self.cache
    }

    /// Latest record for `city`. Always returns data.
    pub async fn current_aqi(&self, city: &str) -> Outcome<AqiRecord> {
        let city = City::lookup(city);
        let snapshot = self.cache.get_or_refresh(&city).await;

        match snapshot.series.latest().filter(|r| r.aqi.is_some()) {
            Some(record) => Outcome::from_parts(record.clone(), snapshot_degradation(&snapshot)),
            None => {
                warn!("No usable record cached for {}; returning mock reading", city.name);
                Outcome::Degraded(self.mock_record(&city), Degradation::MockFallback)
            },
        }
    }

    /// Forecast of `hours` hourly points for `city`.
    ///
    /// Returns `Unavailable` when no model is loaded for the city or there is no AQI history
    /// at all. `hours == 0` yields an empty forecast.
    pub async fn forecast(&self, city: &str, hours: usize) -> Outcome<Vec<ForecastPoint>> {
        let city = City::lookup(city);
        let Some(artifact) = self.models.get(&city) else {
            warn!("Forecast requested for {} but no model is loaded", city.name);
            return Outcome::Unavailable(AppError::ModelUnavailable { city: city.name });
        };
        if hours == 0 {
            return Outcome::Fresh(Vec::new());
        }

        let snapshot = self.cache.get_or_refresh(&city).await;
        let history = self.forecast_history(&city, &snapshot.series);

        let values = history.aqi_values();
        let values = values[values.len().saturating_sub(HISTORY_WINDOW)..].to_vec();
        let Some(mut start) = history.latest().map(|r| r.reading.clone()) else {
            return Outcome::Unavailable(AppError::InsufficientData { city: city.name });
        };
        if values.is_empty() {
            return Outcome::Unavailable(AppError::InsufficientData { city: city.name });
        }
        start.temperature.get_or_insert(DEFAULT_TEMPERATURE);
        start.humidity.get_or_insert(DEFAULT_HUMIDITY);
        start.wind_speed.get_or_insert(DEFAULT_WIND_SPEED);

        let now = Utc::now();
        let task = tokio::task::spawn_blocking(move || {
            run_forecast(&artifact, &values, start, hours, now, rand::thread_rng())
        });

        match task.await {
            Ok(run) => {
                info!(
                    "Forecast for {}: {} points, {} failed steps",
                    city.name,
                    run.points.len(),
                    run.failed_steps
                );
                let degradation = if run.failed_steps > 0 {
                    Some(Degradation::PartialForecast {
                        failed_steps: run.failed_steps,
                    })
                } else {
                    snapshot_degradation(&snapshot)
                };
                Outcome::from_parts(run.points, degradation)
            },
            Err(e) => {
                error!("Forecast task for {} failed: {}", city.name, e);
                Outcome::Unavailable(AppError::Prediction(format!(
                    "forecast task for {} failed: {}",
                    city.name, e
                )))
            },
        }
    }

    /// Records covering the last `days` days (clamped to `1..=7`). Always returns data.
    pub async fn history(&self, city: &str, days: u32) -> Outcome<Vec<AqiRecord>> {
        let city = City::lookup(city);
        let fetch = tokio::time::timeout(
            self.chain_budget,
            self.cache.fetcher().fetch_history(&city, days),
        )
        .await;

        match fetch {
            Ok(Ok(result)) if !result.series.is_empty() => {
                debug!(
                    "History for {}: {} rows from {}",
                    city.name,
                    result.series.len(),
                    result.source
                );
                let degradation = source_degradation(result.source);
                Outcome::from_parts(result.series.into_records(), degradation)
            },
            other => {
                match other {
                    Ok(Ok(_)) => warn!("History for {} came back empty; using mock data", city.name),
                    Ok(Err(e)) => warn!("History for {} failed: {}; using mock data", city.name, e),
                    Err(_) => warn!("History for {} timed out; using mock data", city.name),
                }
                let hours = days.clamp(1, crate::api::MAX_HISTORY_DAYS) * 24;
                let records =
                    self.synthetic
                        .hourly(&city, hours, Utc::now(), &mut rand::thread_rng());
                Outcome::Degraded(records, Degradation::MockFallback)
            },
        }
    }

    /// Weekly clean-air score from the cached series. Always returns data.
    pub async fn clean_air_score(&self, city: &str) -> Outcome<CleanAirScore> {
        let city = City::lookup(city);
        let snapshot = self.cache.get_or_refresh(&city).await;

        if let Some(score) = clean_air_score(&snapshot.series) {
            return Outcome::from_parts(score, snapshot_degradation(&snapshot));
        }

        warn!("Cannot score cached series for {}; scoring mock week", city.name);
        let records = self.synthetic.daily(
            &city,
            crate::insights::SCORE_DAYS as u32,
            Utc::now(),
            &mut rand::thread_rng(),
        );
        let series = CityTimeSeries::from_records(&city.name, records);
        match clean_air_score(&series) {
            Some(score) => Outcome::Degraded(score, Degradation::MockFallback),
            None => Outcome::Unavailable(AppError::InsufficientData { city: city.name }),
        }
    }

    /// Hourly outlook for the next twelve hours, projected from the current AQI.
    pub async fn best_time(&self, city: &str) -> Outcome<Vec<TimeSlot>> {
        self.current_aqi(city).await.map(|record| {
            best_time_windows(record.aqi.unwrap_or_default(), Utc::now())
        })
    }

    /// Stations ranked worst first. Always returns data.
    pub async fn station_rankings(&self, city: &str) -> Outcome<Vec<StationRanking>> {
        let city = City::lookup(city);
        let fetch = tokio::time::timeout(
            self.chain_budget,
            self.cache.fetcher().fetch_stations(&city),
        )
        .await;

        if let Ok(Ok(fetched)) = fetch {
            let ranked = station_rankings(&fetched.stations);
            if !ranked.is_empty() {
                return Outcome::from_parts(ranked, source_degradation(fetched.source));
            }
            warn!("No station for {} has a computable AQI", city.name);
        } else {
            warn!("Station fetch for {} failed; ranking mock stations", city.name);
        }

        let stations: Vec<StationSnapshot> =
            self.synthetic
                .stations(&city, Utc::now(), &mut rand::thread_rng());
        Outcome::Degraded(station_rankings(&stations), Degradation::MockFallback)
    }

    /// Forecast history: the cached series, topped up from the seed dataset when short.
    fn forecast_history(&self, city: &City, cached: &CityTimeSeries) -> CityTimeSeries {
        let mut records: Vec<AqiRecord> = Vec::new();
        if cached.len() < MIN_FORECAST_HISTORY {
            if let Some(seed) = self.seeds.get(city) {
                debug!(
                    "Cached series for {} has {} rows; prepending {} seed rows",
                    city.name,
                    cached.len(),
                    seed.len()
                );
                records.extend(seed.records().iter().cloned());
            }
        }
        // Cached rows go last so they win on equal timestamps.
        records.extend(cached.records().iter().cloned());
        fill_batch(&mut records);
        CityTimeSeries::from_records(&city.name, records)
    }

    fn mock_record(&self, city: &City) -> AqiRecord {
        let mut rng = rand::thread_rng();
        let reading = self.synthetic.reading_at(city, Utc::now(), &mut rng);
        crate::aqi::to_record(reading)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{FetchResult, StationFetch};
    use crate::forecast::{ModelArtifact, RegressionModel, StandardScaler, MAX_INTERNAL_STEPS};
    use crate::models::{Pollutant, PollutantReading};
    use chrono::{DateTime, DurationRound};
    use std::fs;

    /// Serves a fixed number of hourly rows ending at the current hour, or always fails.
    struct FixedFetcher {
        rows: Option<i64>,
        source: DataSource,
    }

    impl FixedFetcher {
        fn rows(rows: i64) -> Self {
            Self {
                rows: Some(rows),
                source: DataSource::OpenWeather,
            }
        }

        fn failing() -> Self {
            Self {
                rows: None,
                source: DataSource::OpenWeather,
            }
        }

        fn series(&self, city: &City, rows: i64) -> CityTimeSeries {
            let end = hour_start(Utc::now());
            let records = (0..rows)
                .map(|i| {
                    let reading = PollutantReading::new(end - Duration::hours(rows - 1 - i))
                        .with(Pollutant::Pm25, 60.0 + i as f64);
                    AqiRecord::with_aqi(reading, 100.0 + i as f64)
                })
                .collect();
            CityTimeSeries::from_records(&city.name, records)
        }
    }

    fn hour_start(ts: DateTime<Utc>) -> DateTime<Utc> {
        ts.duration_trunc(Duration::hours(1)).unwrap()
    }

    impl SeriesFetcher for FixedFetcher {
        async fn fetch_realtime(&self, city: &City) -> Result<FetchResult> {
            match self.rows {
                Some(rows) => Ok(FetchResult {
                    series: self.series(city, rows),
                    source: self.source,
                }),
                None => Err(AppError::UpstreamUnavailable("down".to_string())),
            }
        }

        async fn fetch_history(&self, city: &City, days: u32) -> Result<FetchResult> {
            match self.rows {
                Some(_) => Ok(FetchResult {
                    series: self.series(city, i64::from(days) * 24),
                    source: self.source,
                }),
                None => Err(AppError::UpstreamUnavailable("down".to_string())),
            }
        }

        async fn fetch_stations(&self, _city: &City) -> Result<StationFetch> {
            let now = Utc::now();
            Ok(StationFetch {
                stations: vec![
                    StationSnapshot {
                        name: "Clean".to_string(),
                        latitude: Some(28.6),
                        longitude: Some(77.2),
                        reading: PollutantReading::new(now).with(Pollutant::Pm25, 20.0),
                    },
                    StationSnapshot {
                        name: "Hotspot".to_string(),
                        latitude: Some(28.7),
                        longitude: Some(77.1),
                        reading: PollutantReading::new(now).with(Pollutant::Pm25, 200.0),
                    },
                ],
                source: DataSource::Cpcb,
            })
        }
    }

    fn persistence_model() -> ModelArtifact {
        ModelArtifact {
            model: RegressionModel::Linear {
                intercept: 0.0,
                coefficients: vec![1.0],
            },
            scaler: StandardScaler {
                mean: vec![0.0],
                scale: vec![1.0],
            },
            feature_names: vec!["aqi_lag_1h".to_string()],
        }
    }

    fn service_with(fetcher: FixedFetcher, data_dir: &std::path::Path) -> AirQualityService<FixedFetcher> {
        let mut models = ModelRegistry::default();
        models.insert(&City::lookup("Delhi"), persistence_model());
        AirQualityService::new(
            Arc::new(fetcher),
            Arc::new(models),
            Arc::new(SeedStore::new(data_dir)),
            &Settings::default(),
        )
    }

    #[tokio::test]
    async fn test_forecast_without_model_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let service = service_with(FixedFetcher::rows(48), dir.path());

        let outcome = service.forecast("Pune", 24).await;

        assert!(matches!(
            outcome,
            Outcome::Unavailable(AppError::ModelUnavailable { ref city }) if city == "Pune"
        ));
    }

    #[tokio::test]
    async fn test_forecast_twice_returns_24_points_each_time() {
        let dir = tempfile::tempdir().unwrap();
        let service = service_with(FixedFetcher::rows(48), dir.path());

        for _ in 0..2 {
            let outcome = service.forecast("delhi", 24).await;
            assert!(outcome.is_fresh());
            let points = outcome.into_data().unwrap();
            assert_eq!(points.len(), 24);
            assert!(points.iter().all(|p| (0.0..=500.0).contains(&p.predicted_aqi)));
        }
    }

    #[tokio::test]
    async fn test_forecast_zero_and_huge_requests() {
        let dir = tempfile::tempdir().unwrap();
        let service = service_with(FixedFetcher::rows(48), dir.path());

        let empty = service.forecast("Delhi", 0).await;
        assert!(matches!(empty, Outcome::Fresh(ref p) if p.is_empty()));

        let huge = service.forecast("Delhi", 10_000).await.into_data().unwrap();
        assert!(!huge.is_empty());
        assert!(huge.len() <= MAX_INTERNAL_STEPS);
    }

    #[tokio::test]
    async fn test_forecast_on_emergency_data_is_degraded() {
        let dir = tempfile::tempdir().unwrap();
        let service = service_with(FixedFetcher::failing(), dir.path());

        let outcome = service.forecast("Delhi", 6).await;

        assert_eq!(outcome.degradation(), Some(&Degradation::EmergencySimulation));
        assert_eq!(outcome.data().map(Vec::len), Some(6));
    }

    #[tokio::test]
    async fn test_current_aqi_fresh_and_emergency() {
        let dir = tempfile::tempdir().unwrap();

        let live = service_with(FixedFetcher::rows(3), dir.path());
        let outcome = live.current_aqi("Delhi").await;
        assert!(outcome.is_fresh());
        assert_eq!(outcome.data().and_then(|r| r.aqi), Some(102.0));

        let down = service_with(FixedFetcher::failing(), dir.path());
        let outcome = down.current_aqi("Delhi").await;
        assert_eq!(outcome.degradation(), Some(&Degradation::EmergencySimulation));
        assert!(outcome.data().and_then(|r| r.aqi).is_some());
    }

    #[tokio::test]
    async fn test_history_falls_back_to_mock() {
        let dir = tempfile::tempdir().unwrap();

        let live = service_with(FixedFetcher::rows(1), dir.path());
        let outcome = live.history("Delhi", 2).await;
        assert!(outcome.is_fresh());
        assert_eq!(outcome.data().map(Vec::len), Some(48));

        let down = service_with(FixedFetcher::failing(), dir.path());
        let outcome = down.history("Delhi", 30).await;
        assert_eq!(outcome.degradation(), Some(&Degradation::MockFallback));
        assert_eq!(outcome.data().map(Vec::len), Some(7 * 24));
    }

    #[tokio::test]
    async fn test_station_rankings_from_feed() {
        let dir = tempfile::tempdir().unwrap();
        let service = service_with(FixedFetcher::rows(3), dir.path());

        let ranked = service.station_rankings("Delhi").await;

        assert!(ranked.is_fresh());
        let ranked = ranked.into_data().unwrap();
        assert_eq!(ranked[0].name, "Hotspot");
        assert_eq!(ranked.len(), 2);
    }

    #[tokio::test]
    async fn test_best_time_and_score_carry_data() {
        let dir = tempfile::tempdir().unwrap();
        let service = service_with(FixedFetcher::rows(48), dir.path());

        let slots = service.best_time("Delhi").await.into_data().unwrap();
        assert_eq!(slots.len(), 12);
        assert_eq!(slots[0].label, "Now");

        let score = service.clean_air_score("Delhi").await;
        assert!(score.is_fresh());
        assert!(score.data().unwrap().score <= 100);
    }

    #[test]
    fn test_short_history_is_topped_up_from_seed() {
        let dir = tempfile::tempdir().unwrap();
        let service = service_with(FixedFetcher::rows(2), dir.path());
        let city = City::lookup("Delhi");
        let cached = FixedFetcher::rows(2).series(&city, 2);
        let latest = cached.latest().unwrap().timestamp();

        // Seed rows: one older than the cache, one at the cache's latest timestamp.
        let to_seed = |ts: DateTime<Utc>| {
            crate::models::to_ist(ts).format("%Y-%m-%d %H:%M:%S").to_string()
        };
        let csv = format!(
            "Datetime,PM2_5_ugm3,AQI_computed\n{},30,50\n{},30,50\n",
            to_seed(latest - Duration::hours(10)),
            to_seed(latest)
        );
        fs::write(dir.path().join("delhi.csv"), csv).unwrap();

        let history = service.forecast_history(&city, &cached);

        assert_eq!(history.len(), 3);
        assert_eq!(history.aqi_values(), vec![50.0, 100.0, 101.0]);
    }
}
