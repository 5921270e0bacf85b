//! Per-city cache of the realtime series, with TTL refresh and blending.
//!
//! Entries are immutable once built and swapped as a whole (`Arc` per city), so a reader never
//! sees a half-updated series. Two callers refreshing the same city at once both fetch; the
//! last write wins.

use crate::api::{chain_timeout, FetchResult, SeriesFetcher, SyntheticGenerator};
use crate::error::{AppError, Result};
use crate::models::{AqiRecord, City, CityTimeSeries, DataSource};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// Days of daily history a single real reading is blended onto (the real row included).
pub const BLEND_DAYS: u32 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryKind {
    Fetched,
    Emergency,
}

#[derive(Debug)]
struct CacheEntry {
    series: Arc<CityTimeSeries>,
    source: DataSource,
    fetched_at: DateTime<Utc>,
    kind: EntryKind,
}

/// How current a snapshot is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Within the TTL, or just refreshed.
    Fresh,
    /// Refresh failed; the previous entry is served.
    Stale { age_minutes: i64 },
    /// Nothing could be fetched and nothing was cached; the series is generated.
    Emergency,
}

/// What the cache hands out: a shared, read-only series plus provenance.
#[derive(Debug, Clone)]
pub struct CacheSnapshot {
    pub series: Arc<CityTimeSeries>,
    pub source: DataSource,
    pub fetched_at: DateTime<Utc>,
    pub freshness: Freshness,
}

impl CacheSnapshot {
    fn from_entry(entry: &CacheEntry, freshness: Freshness) -> Self {
        Self {
            series: Arc::clone(&entry.series),
            source: entry.source,
            fetched_at: entry.fetched_at,
            freshness,
        }
    }
}

/// Cache/blend layer over a [`SeriesFetcher`].
pub struct AqiCache<F> {
    fetcher: Arc<F>,
    entries: RwLock<HashMap<String, Arc<CacheEntry>>>,
    ttl: Duration,
    refresh_timeout: std::time::Duration,
    emergency_hours: u32,
    synthetic: SyntheticGenerator,
}

impl<F: SeriesFetcher> AqiCache<F> {
    /// Creates an empty cache.
    ///
    /// # Arguments
    ///
    /// * `fetcher` - Shared fetch chain.
    /// * `ttl` - Age after which an entry is refreshed.
    /// * `request_timeout` - Bound on a single upstream request. A whole refresh gets
    ///   [`chain_timeout`] of it, so one hung tier still falls through to the next; exceeding
    ///   that counts as a failure.
    /// * `emergency_hours` - Length of the synthetic series built when nothing else exists.
    pub fn new(
        fetcher: Arc<F>,
        ttl: Duration,
        request_timeout: std::time::Duration,
        emergency_hours: u32,
    ) -> Self {
        Self {
            fetcher,
            entries: RwLock::new(HashMap::new()),
            ttl,
            refresh_timeout: chain_timeout(request_timeout),
            emergency_hours: emergency_hours.max(1),
            synthetic: SyntheticGenerator::new(),
        }
    }

    pub fn fetcher(&self) -> &Arc<F> {
        &self.fetcher
    }

    /// Returns the cached series for `city`, refreshing it when missing or older than the TTL.
    pub async fn get_or_refresh(&self, city: &City) -> CacheSnapshot {
        self.get_or_refresh_at(city, Utc::now()).await
    }

    /// [`get_or_refresh`](Self::get_or_refresh) with an explicit clock.
    pub async fn get_or_refresh_at(&self, city: &City, now: DateTime<Utc>) -> CacheSnapshot {
        let key = city.key();
        let existing = self.entries.read().await.get(&key).cloned();

        if let Some(entry) = existing.as_ref() {
            if now - entry.fetched_at <= self.ttl {
                debug!("Cache hit for {}", city.name);
                let freshness = match entry.kind {
                    EntryKind::Fetched => Freshness::Fresh,
                    EntryKind::Emergency => Freshness::Emergency,
                };
                return CacheSnapshot::from_entry(entry, freshness);
            }
            info!("Cache entry for {} expired; refreshing", city.name);
        } else {
            info!("Cache miss for {}; fetching", city.name);
        }

        match self.fetch(city).await {
            Ok(result) => {
                let entry = Arc::new(self.build_entry(city, result, now));
                self.entries.write().await.insert(key, Arc::clone(&entry));
                CacheSnapshot::from_entry(&entry, Freshness::Fresh)
            },
            Err(e) => match existing {
                Some(entry) => {
                    let age_minutes = (now - entry.fetched_at).num_minutes();
                    warn!(
                        "{}; serving cached data",
                        AppError::StaleData {
                            city: city.name.clone(),
                            age_minutes
                        }
                    );
                    debug!("Refresh error for {}: {}", city.name, e);
                    CacheSnapshot::from_entry(&entry, Freshness::Stale { age_minutes })
                },
                None => {
                    error!(
                        "All sources failed for {} with no cached data ({}); building emergency synthetic series",
                        city.name, e
                    );
                    let records = self.synthetic.hourly(
                        city,
                        self.emergency_hours,
                        now,
                        &mut rand::thread_rng(),
                    );
                    let entry = Arc::new(CacheEntry {
                        series: Arc::new(CityTimeSeries::from_records(&city.name, records)),
                        source: DataSource::Synthetic,
                        fetched_at: now,
                        kind: EntryKind::Emergency,
                    });
                    self.entries.write().await.insert(key, Arc::clone(&entry));
                    CacheSnapshot::from_entry(&entry, Freshness::Emergency)
                },
            },
        }
    }

    /// Drops the entry for `city`, forcing the next call to fetch.
    pub async fn invalidate(&self, city: &City) {
        self.entries.write().await.remove(&city.key());
    }

    /// One bounded fetch. Timeouts, errors and empty results all count as failure.
    async fn fetch(&self, city: &City) -> Result<FetchResult> {
        let result = tokio::time::timeout(self.refresh_timeout, self.fetcher.fetch_realtime(city))
            .await
            .map_err(|_| {
                AppError::Timeout(format!(
                    "refresh for {} exceeded {:?}",
                    city.name, self.refresh_timeout
                ))
            })??;

        if result.series.is_empty() {
            return Err(AppError::UpstreamUnavailable(format!(
                "fetch for {} returned no rows",
                city.name
            )));
        }
        Ok(result)
    }

    fn build_entry(&self, city: &City, result: FetchResult, now: DateTime<Utc>) -> CacheEntry {
        let FetchResult { series, source } = result;

        let (series, source) = if series.len() == 1 {
            let records = series.into_records();
            (blend_single(&self.synthetic, city, records), DataSource::Blended)
        } else {
            (series, source)
        };

        info!(
            "Cached {} rows for {} (source: {})",
            series.len(),
            city.name,
            source
        );
        CacheEntry {
            series: Arc::new(series),
            source,
            fetched_at: now,
            kind: EntryKind::Fetched,
        }
    }
}

/// Places a single real record on top of [`BLEND_DAYS`]` - 1` days of synthetic daily history.
///
/// The synthetic days end the day before the real record's IST date, so the real record is
/// always last and keeps its values.
fn blend_single(
    synthetic: &SyntheticGenerator,
    city: &City,
    mut real: Vec<AqiRecord>,
) -> CityTimeSeries {
    let Some(anchor) = real.last().map(|r| r.timestamp()) else {
        return CityTimeSeries::from_records(&city.name, real);
    };

    let mut records = synthetic.daily(city, BLEND_DAYS, anchor, &mut rand::thread_rng());
    // Drop the synthetic row for the real record's own day.
    records.pop();
    debug!(
        "Blending 1 real row for {} onto {} synthetic days",
        city.name,
        records.len()
    );
    records.append(&mut real);
    CityTimeSeries::from_records(&city.name, records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aqi::to_record;
    use crate::models::{Pollutant, PollutantReading};
    use chrono::TimeZone;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct StubFetcher {
        responses: Mutex<VecDeque<Result<FetchResult>>>,
        calls: AtomicUsize,
        delay: Option<std::time::Duration>,
    }

    impl StubFetcher {
        fn new(responses: Vec<Result<FetchResult>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                calls: AtomicUsize::new(0),
                delay: None,
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl SeriesFetcher for StubFetcher {
        async fn fetch_realtime(&self, _city: &City) -> Result<FetchResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let next = self.responses.lock().unwrap().pop_front();
            next.unwrap_or_else(|| Err(AppError::UpstreamUnavailable("exhausted".to_string())))
        }

        async fn fetch_history(&self, _city: &City, _days: u32) -> Result<FetchResult> {
            Err(AppError::UpstreamUnavailable("not stubbed".to_string()))
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 10, 8, 15, 0).unwrap()
    }

    fn single_row(ts: DateTime<Utc>, pm25: f64) -> FetchResult {
        let record = to_record(PollutantReading::new(ts).with(Pollutant::Pm25, pm25));
        FetchResult {
            series: CityTimeSeries::from_records("Delhi", vec![record]),
            source: DataSource::Cpcb,
        }
    }

    fn hourly_rows(end: DateTime<Utc>, n: i64) -> FetchResult {
        let records = (0..n)
            .map(|i| AqiRecord::with_aqi(PollutantReading::new(end - Duration::hours(n - 1 - i)), 100.0 + i as f64))
            .collect();
        FetchResult {
            series: CityTimeSeries::from_records("Delhi", records),
            source: DataSource::OpenWeather,
        }
    }

    fn cache(stub: StubFetcher) -> AqiCache<StubFetcher> {
        AqiCache::new(
            Arc::new(stub),
            Duration::minutes(30),
            std::time::Duration::from_secs(30),
            48,
        )
    }

    #[tokio::test]
    async fn test_single_row_is_blended_into_seven_days() {
        let cache = cache(StubFetcher::new(vec![Ok(single_row(t0(), 250.0))]));

        let snapshot = cache.get_or_refresh_at(&City::lookup("Delhi"), t0()).await;

        assert_eq!(snapshot.freshness, Freshness::Fresh);
        assert_eq!(snapshot.source, DataSource::Blended);
        assert_eq!(snapshot.series.len(), 7);
        let last = snapshot.series.latest().unwrap();
        assert_eq!(last.timestamp(), t0());
        assert_eq!(last.aqi, Some(400.0));
        assert_eq!(last.reading.pm2_5, Some(250.0));
    }

    #[tokio::test]
    async fn test_multi_row_fetch_is_used_directly() {
        let cache = cache(StubFetcher::new(vec![Ok(hourly_rows(t0(), 24))]));

        let snapshot = cache.get_or_refresh_at(&City::lookup("Delhi"), t0()).await;

        assert_eq!(snapshot.source, DataSource::OpenWeather);
        assert_eq!(snapshot.series.len(), 24);
    }

    #[tokio::test]
    async fn test_refresh_only_after_ttl() {
        let cache = cache(StubFetcher::new(vec![
            Ok(hourly_rows(t0(), 3)),
            Ok(hourly_rows(t0() + Duration::minutes(31), 5)),
        ]));
        let delhi = City::lookup("delhi");

        cache.get_or_refresh_at(&delhi, t0()).await;
        let within = cache
            .get_or_refresh_at(&delhi, t0() + Duration::minutes(30))
            .await;
        assert_eq!(cache.fetcher().calls(), 1);
        assert_eq!(within.series.len(), 3);

        let after = cache
            .get_or_refresh_at(&delhi, t0() + Duration::minutes(31))
            .await;
        assert_eq!(cache.fetcher().calls(), 2);
        assert_eq!(after.series.len(), 5);
    }

    #[tokio::test]
    async fn test_failed_refresh_serves_stale_entry() {
        let cache = cache(StubFetcher::new(vec![Ok(hourly_rows(t0(), 3))]));
        let delhi = City::lookup("Delhi");

        let first = cache.get_or_refresh_at(&delhi, t0()).await;
        let stale = cache
            .get_or_refresh_at(&delhi, t0() + Duration::minutes(45))
            .await;

        assert_eq!(stale.freshness, Freshness::Stale { age_minutes: 45 });
        assert!(Arc::ptr_eq(&first.series, &stale.series));
    }

    #[tokio::test]
    async fn test_total_failure_without_entry_builds_emergency_series() {
        let cache = cache(StubFetcher::new(vec![]));

        let snapshot = cache.get_or_refresh_at(&City::lookup("Pune"), t0()).await;

        assert_eq!(snapshot.freshness, Freshness::Emergency);
        assert_eq!(snapshot.source, DataSource::Synthetic);
        assert_eq!(snapshot.series.len(), 48);
        assert!(snapshot.series.records().iter().all(|r| r.aqi.is_some()));

        // The emergency series is cached like any other entry.
        let again = cache
            .get_or_refresh_at(&City::lookup("Pune"), t0() + Duration::minutes(5))
            .await;
        assert_eq!(again.freshness, Freshness::Emergency);
        assert_eq!(cache.fetcher().calls(), 1);
    }

    #[tokio::test]
    async fn test_empty_fetch_counts_as_failure() {
        let empty = FetchResult {
            series: CityTimeSeries::from_records("Delhi", Vec::new()),
            source: DataSource::OpenWeather,
        };
        let cache = cache(StubFetcher::new(vec![Ok(empty)]));

        let snapshot = cache.get_or_refresh_at(&City::lookup("Delhi"), t0()).await;

        assert_eq!(snapshot.freshness, Freshness::Emergency);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_fetch_times_out() {
        let mut stub = StubFetcher::new(vec![Ok(hourly_rows(t0(), 3))]);
        stub.delay = Some(std::time::Duration::from_secs(120));
        let cache = cache(stub);

        let snapshot = cache.get_or_refresh_at(&City::lookup("Delhi"), t0()).await;

        assert_eq!(snapshot.freshness, Freshness::Emergency);
    }

    #[tokio::test]
    async fn test_hung_first_tier_still_yields_next_tier_data() {
        use crate::api::{CpcbClient, MultiSourceFetcher, OwmClient};
        use mockito::Matcher;
        use serde_json::json;

        // Accepts the connection but never answers.
        let hung = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let hung_url = format!("http://{}", hung.local_addr().unwrap());

        let mut server = mockito::Server::new_async().await;
        let now = Utc::now().timestamp();
        let _owm = server
            .mock("GET", "/data/2.5/air_pollution/history")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({"list": [
                    {"dt": now - 7200, "components": {"pm2_5": 45.0}},
                    {"dt": now - 3600, "components": {"pm2_5": 75.0}}
                ]})
                .to_string(),
            )
            .create_async()
            .await;

        let request_timeout = std::time::Duration::from_secs(1);
        let fetcher = MultiSourceFetcher::new(
            Some(CpcbClient::with_base_url("cpcb-key-1".into(), &hung_url, request_timeout).unwrap()),
            Some(OwmClient::with_base_url("owm-key-12".into(), &server.url(), request_timeout).unwrap()),
            2,
        );
        let cache = AqiCache::new(Arc::new(fetcher), Duration::minutes(30), request_timeout, 48);

        let snapshot = cache.get_or_refresh(&City::lookup("Delhi")).await;

        assert_eq!(snapshot.freshness, Freshness::Fresh);
        assert_eq!(snapshot.source, DataSource::OpenWeather);
        assert_eq!(snapshot.series.len(), 2);
    }

    #[tokio::test]
    async fn test_invalidate_forces_fetch() {
        let cache = cache(StubFetcher::new(vec![
            Ok(hourly_rows(t0(), 3)),
            Ok(hourly_rows(t0(), 4)),
        ]));
        let delhi = City::lookup("Delhi");

        cache.get_or_refresh_at(&delhi, t0()).await;
        cache.invalidate(&delhi).await;
        let snapshot = cache.get_or_refresh_at(&delhi, t0()).await;

        assert_eq!(cache.fetcher().calls(), 2);
        assert_eq!(snapshot.series.len(), 4);
    }
}
