//! Provides a synthetic data generator for plausible hourly pollutant readings.
//!
//! This is the final tier of the fetch chain and the source of the history blended under a
//! single real reading. Values follow a seasonal base level (high in winter, low during the
//! monsoon), a diurnal rush-hour profile, a per-city pollution factor and bounded random noise,
//! so a generated series is never flat.

use super::cpcb::StationSnapshot;
use crate::aqi::to_record;
use crate::models::{to_ist, AqiRecord, City, PollutantReading};
use chrono::{DateTime, Datelike, Duration, DurationRound, NaiveDate, TimeZone, Timelike, Utc};
use rand::Rng;
use tracing::debug;

/// Base PM2.5 level (µg/m³) for a month (1-12).
fn seasonal_base_pm25(month: u32) -> f64 {
    match month {
        11 | 12 | 1 | 2 => 200.0,
        6..=9 => 80.0,
        _ => 120.0,
    }
}

/// Diurnal multiplier for an hour of day (0-23): rush hours peak, pre-dawn dips.
fn diurnal_factor(hour: u32) -> f64 {
    match hour {
        7..=9 | 18..=20 => 1.2,
        2..=5 => 0.8,
        _ => 1.0,
    }
}

/// Zero-mean noise bounded to `±2·spread`.
fn noise<R: Rng + ?Sized>(rng: &mut R, spread: f64) -> f64 {
    rng.gen_range(-2.0 * spread..=2.0 * spread)
}

/// Generates synthetic readings for a city.
///
/// Randomness is injected by the caller so tests can use a seeded generator.
#[derive(Debug, Clone, Default)]
pub struct SyntheticGenerator;

impl SyntheticGenerator {
    /// Creates a new `SyntheticGenerator`.
    pub fn new() -> Self {
        debug!("Creating SyntheticGenerator");
        Self
    }

    /// Generates one reading at `timestamp`.
    ///
    /// Seasonal and diurnal factors use IST wall-clock time. Every pollutant is floored at a
    /// physically plausible minimum so noise cannot drive it negative.
    pub fn reading_at<R: Rng + ?Sized>(
        &self,
        city: &City,
        timestamp: DateTime<Utc>,
        rng: &mut R,
    ) -> PollutantReading {
        let local = to_ist(timestamp);
        let base = seasonal_base_pm25(local.month()) * city.pollution_factor;
        let factor = diurnal_factor(local.hour());

        let pm_noise = noise(rng, 15.0);
        let pm2_5 = (base * factor + pm_noise).max(10.0);

        PollutantReading {
            timestamp,
            pm2_5: Some(pm2_5),
            pm10: Some((pm2_5 * 1.7 + noise(rng, 20.0)).max(20.0)),
            no2: Some((60.0 * factor * city.pollution_factor + noise(rng, 10.0)).max(10.0)),
            co: Some((1500.0 * factor * city.pollution_factor + noise(rng, 200.0)).max(200.0)),
            // Ozone moves against particulates.
            o3: Some((40.0 - pm_noise * 0.3).max(5.0)),
            so2: Some((25.0 + noise(rng, 8.0)).max(5.0)),
            temperature: Some(22.0 + noise(rng, 3.0)),
            humidity: Some((65.0 + noise(rng, 10.0)).clamp(30.0, 100.0)),
            wind_speed: Some((10.0 + noise(rng, 4.0)).max(1.0)),
        }
    }

    /// Generates `hours` hourly records ending at the hour containing `end`, oldest first.
    ///
    /// At least one record is always produced.
    pub fn hourly<R: Rng + ?Sized>(
        &self,
        city: &City,
        hours: u32,
        end: DateTime<Utc>,
        rng: &mut R,
    ) -> Vec<AqiRecord> {
        let hours = hours.max(1);
        let end = end.duration_trunc(Duration::hours(1)).unwrap_or(end);
        debug!(
            "Generating {} synthetic hourly readings for {} ending {}",
            hours, city.name, end
        );

        (0..hours)
            .rev()
            .map(|back| {
                let ts = end - Duration::hours(i64::from(back));
                to_record(self.reading_at(city, ts, rng))
            })
            .collect()
    }

    /// Generates one record per day at local noon for the `days` days ending on the IST date
    /// of `now`, oldest first.
    pub fn daily<R: Rng + ?Sized>(
        &self,
        city: &City,
        days: u32,
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> Vec<AqiRecord> {
        let today = to_ist(now).date_naive();
        debug!(
            "Generating {} synthetic daily readings for {} up to {}",
            days, city.name, today
        );

        (0..days)
            .rev()
            .filter_map(|back| today.checked_sub_signed(Duration::days(i64::from(back))))
            .filter_map(local_noon)
            .map(|ts| to_record(self.reading_at(city, ts, rng)))
            .collect()
    }

    /// Generates snapshots for a handful of made-up stations scattered around the city centre.
    ///
    /// Each station gets its own local offset on top of the city-wide level so rankings are
    /// not uniform.
    pub fn stations<R: Rng + ?Sized>(
        &self,
        city: &City,
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> Vec<StationSnapshot> {
        let count = rng.gen_range(MIN_STATIONS..=MAX_STATIONS);
        let ts = now.duration_trunc(Duration::hours(1)).unwrap_or(now);
        debug!("Generating {} synthetic stations for {}", count, city.name);

        (1..=count)
            .map(|i| {
                let local_factor = rng.gen_range(0.7..1.3);
                let reading = self.reading_at(city, ts, rng).scaled(local_factor);
                StationSnapshot {
                    name: format!("{} Station {}", city.name, i),
                    latitude: Some(city.latitude + rng.gen_range(-0.05..0.05)),
                    longitude: Some(city.longitude + rng.gen_range(-0.05..0.05)),
                    reading,
                }
            })
            .collect()
    }
}

const MIN_STATIONS: usize = 6;
const MAX_STATIONS: usize = 12;

/// 12:00 IST on `date`, as UTC.
fn local_noon(date: NaiveDate) -> Option<DateTime<Utc>> {
    let naive = date.and_hms_opt(12, 0, 0)?;
    crate::models::ist_offset()
        .from_local_datetime(&naive)
        .single()
        .map(|ts| ts.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aqi::Category;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn delhi() -> City {
        City::lookup("Delhi")
    }

    #[test]
    fn test_hourly_is_contiguous_and_ends_at_current_hour() {
        let mut rng = StdRng::seed_from_u64(7);
        let end = Utc.with_ymd_and_hms(2025, 1, 15, 10, 42, 0).unwrap();

        let records = SyntheticGenerator::new().hourly(&delhi(), 48, end, &mut rng);

        assert_eq!(records.len(), 48);
        assert_eq!(
            records.last().unwrap().timestamp(),
            Utc.with_ymd_and_hms(2025, 1, 15, 10, 0, 0).unwrap()
        );
        for pair in records.windows(2) {
            assert_eq!(pair[1].timestamp() - pair[0].timestamp(), Duration::hours(1));
        }
    }

    #[test]
    fn test_series_is_never_static_and_values_are_plausible() {
        let mut rng = StdRng::seed_from_u64(11);
        let end = Utc.with_ymd_and_hms(2025, 7, 1, 0, 0, 0).unwrap();

        let records = SyntheticGenerator::new().hourly(&delhi(), 24, end, &mut rng);
        let aqi: Vec<f64> = records.iter().filter_map(|r| r.aqi).collect();

        assert_eq!(aqi.len(), 24);
        assert!(aqi.windows(2).any(|w| w[0] != w[1]));
        for record in &records {
            assert!(record.reading.pm2_5.unwrap() >= 10.0);
            assert!(record.reading.co.unwrap() >= 200.0);
            let humidity = record.reading.humidity.unwrap();
            assert!((30.0..=100.0).contains(&humidity));
        }
    }

    #[test]
    fn test_winter_is_dirtier_than_monsoon() {
        let generator = SyntheticGenerator::new();
        let mut rng = StdRng::seed_from_u64(3);
        let mean = |records: Vec<AqiRecord>| {
            let values: Vec<f64> = records.iter().filter_map(|r| r.reading.pm2_5).collect();
            values.iter().sum::<f64>() / values.len() as f64
        };

        let winter = mean(generator.hourly(
            &delhi(),
            72,
            Utc.with_ymd_and_hms(2025, 1, 10, 0, 0, 0).unwrap(),
            &mut rng,
        ));
        let monsoon = mean(generator.hourly(
            &delhi(),
            72,
            Utc.with_ymd_and_hms(2025, 8, 10, 0, 0, 0).unwrap(),
            &mut rng,
        ));

        assert!(winter > monsoon);
    }

    #[test]
    fn test_daily_rows_fall_on_local_noon() {
        let mut rng = StdRng::seed_from_u64(5);
        let now = Utc.with_ymd_and_hms(2025, 3, 20, 15, 0, 0).unwrap();

        let records = SyntheticGenerator::new().daily(&delhi(), 7, now, &mut rng);

        assert_eq!(records.len(), 7);
        for record in &records {
            let local = to_ist(record.timestamp());
            assert_eq!((local.hour(), local.minute()), (12, 0));
            assert_ne!(record.category, Category::Unknown);
        }
        assert_eq!(
            to_ist(records[6].timestamp()).date_naive(),
            to_ist(now).date_naive()
        );
    }

    #[test]
    fn test_stations_scatter_around_city() {
        let mut rng = StdRng::seed_from_u64(9);
        let city = City::lookup("Kolkata");

        let stations = SyntheticGenerator::new().stations(&city, Utc::now(), &mut rng);

        assert!((MIN_STATIONS..=MAX_STATIONS).contains(&stations.len()));
        for station in &stations {
            assert!((station.latitude.unwrap() - city.latitude).abs() < 0.05);
            assert!(station.reading.pm2_5.is_some());
        }
    }

    #[test]
    fn test_round_trip_categories_match_threshold_table() {
        let mut rng = StdRng::seed_from_u64(42);
        let records =
            SyntheticGenerator::new().hourly(&City::lookup("Bangalore"), 96, Utc::now(), &mut rng);

        for record in records {
            let aqi = record.aqi.unwrap();
            assert!((0.0..=500.0).contains(&aqi));
            assert_eq!(record.category, Category::from_aqi(Some(aqi)));
        }
    }
}
