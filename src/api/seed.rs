//! Loader for the per-city historical seed datasets (`{data_dir}/{city}.csv`).
//!
//! The seed series bootstraps forecast history when the live series is too short.

use crate::aqi::fill_batch;
use crate::error::Result;
use crate::models::{ist_offset, AqiRecord, City, CityTimeSeries, PollutantReading, SeedRow};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Accepted naive (IST) timestamp layouts.
const TIMESTAMP_FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"];

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    let naive = TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())?;
    ist_offset()
        .from_local_datetime(&naive)
        .single()
        .map(|ts| ts.with_timezone(&Utc))
}

fn row_to_record(row: SeedRow) -> Option<AqiRecord> {
    let reading = PollutantReading {
        timestamp: parse_timestamp(&row.timestamp)?,
        pm2_5: row.pm2_5,
        pm10: row.pm10,
        no2: row.no2,
        co: row.co,
        o3: row.o3,
        so2: row.so2,
        temperature: row.temperature,
        humidity: row.humidity,
        wind_speed: row.wind_speed,
    };
    Some(match row.aqi {
        Some(aqi) if aqi > 0.0 => AqiRecord::with_aqi(reading, aqi),
        _ => AqiRecord::pending(reading),
    })
}

/// Reads a seed CSV into a series, filling missing AQI values.
///
/// Rows that fail to deserialize or carry an unparseable timestamp are skipped.
///
/// # Returns
///
/// The series and the number of skipped rows.
///
/// # Errors
///
/// Returns an error when the file cannot be opened or its header cannot be read.
pub fn load_seed_csv(path: &Path, city: &str) -> Result<(CityTimeSeries, usize)> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_path(path)?;

    let mut records = Vec::new();
    let mut skipped = 0;
    for result in reader.deserialize::<SeedRow>() {
        match result.ok().and_then(row_to_record) {
            Some(record) => records.push(record),
            None => skipped += 1,
        }
    }

    if skipped > 0 {
        warn!("Skipped {} malformed rows in {}", skipped, path.display());
    }
    fill_batch(&mut records);
    Ok((CityTimeSeries::from_records(city, records), skipped))
}

/// Lazily loads and keeps seed series, one per city.
///
/// A missing or unreadable file is remembered as absent so the disk is read once per city.
pub struct SeedStore {
    data_dir: PathBuf,
    loaded: Mutex<HashMap<String, Option<Arc<CityTimeSeries>>>>,
}

impl SeedStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            loaded: Mutex::new(HashMap::new()),
        }
    }

    /// Path of the seed file for `city`.
    pub fn path_for(&self, city: &City) -> PathBuf {
        self.data_dir.join(format!("{}.csv", city.key()))
    }

    /// Returns the seed series for `city`, loading it on first use.
    pub fn get(&self, city: &City) -> Option<Arc<CityTimeSeries>> {
        let key = city.key();
        if let Ok(loaded) = self.loaded.lock() {
            if let Some(entry) = loaded.get(&key) {
                return entry.clone();
            }
        }

        let path = self.path_for(city);
        let entry = if path.exists() {
            match load_seed_csv(&path, &city.name) {
                Ok((series, _)) => {
                    info!(
                        "Loaded {} seed rows for {} from {}",
                        series.len(),
                        city.name,
                        path.display()
                    );
                    Some(Arc::new(series))
                },
                Err(e) => {
                    warn!("Could not read seed data {}: {}", path.display(), e);
                    None
                },
            }
        } else {
            debug!("No seed dataset at {}", path.display());
            None
        };

        if let Ok(mut loaded) = self.loaded.lock() {
            loaded.insert(key, entry.clone());
        }
        entry
    }
}
