//! Canonical record types shared by every stage of the pipeline.
//!
//! Includes structs for:
//! - A single timestamped observation (`PollutantReading`) and its AQI-annotated form (`AqiRecord`).
//! - The per-city chronological series owned by the cache (`CityTimeSeries`).
//! - Forecaster output (`ForecastPoint`).
//! - The city registry (`City`) and data provenance (`DataSource`).
//!
//! Every upstream payload is converted into these types at its ingestion boundary; pollutant
//! labels go through [`Pollutant::from_label`] so the rest of the crate never sees `"PM2.5"` vs
//! `pm2_5` spellings.

use crate::aqi::Category;
use chrono::{DateTime, FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

/// Offset of Indian Standard Time from UTC, in seconds.
const IST_OFFSET_SECS: i32 = 5 * 3600 + 30 * 60;

/// Returns the IST offset used for hour-of-day, weekday and month computations.
pub fn ist_offset() -> FixedOffset {
    FixedOffset::east_opt(IST_OFFSET_SECS).unwrap_or_else(|| Utc.fix())
}

/// Converts a UTC instant into IST wall-clock time.
pub fn to_ist(ts: DateTime<Utc>) -> DateTime<FixedOffset> {
    ts.with_timezone(&ist_offset())
}

// --- Pollutants ---

/// The six pollutants covered by the national AQI standard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pollutant {
    Pm25,
    Pm10,
    No2,
    Co,
    O3,
    So2,
}

impl Pollutant {
    /// All pollutants in a fixed order.
    pub const ALL: [Pollutant; 6] = [
        Pollutant::Pm25,
        Pollutant::Pm10,
        Pollutant::No2,
        Pollutant::Co,
        Pollutant::O3,
        Pollutant::So2,
    ];

    /// Normalizes any label seen at an ingestion boundary into a `Pollutant`.
    ///
    /// Accepts the display names used by the government feed (`PM2.5`, `OZONE`), the component
    /// keys of the commercial API (`pm2_5`) and the seed CSV column names (`PM2_5_ugm3`).
    /// Returns `None` for labels outside the standard (e.g. `NH3`).
    pub fn from_label(label: &str) -> Option<Self> {
        let normalized: String = label
            .trim()
            .to_ascii_lowercase()
            .trim_end_matches("_ugm3")
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect();

        match normalized.as_str() {
            "pm25" => Some(Pollutant::Pm25),
            "pm10" => Some(Pollutant::Pm10),
            "no2" => Some(Pollutant::No2),
            "co" => Some(Pollutant::Co),
            "o3" | "ozone" => Some(Pollutant::O3),
            "so2" => Some(Pollutant::So2),
            _ => None,
        }
    }

    /// Human-readable label.
    pub fn label(&self) -> &'static str {
        match self {
            Pollutant::Pm25 => "PM2.5",
            Pollutant::Pm10 => "PM10",
            Pollutant::No2 => "NO2",
            Pollutant::Co => "CO",
            Pollutant::O3 => "O3",
            Pollutant::So2 => "SO2",
        }
    }

    /// Feature-vector name for this pollutant's concentration.
    pub fn feature_name(&self) -> &'static str {
        match self {
            Pollutant::Pm25 => "pm2_5",
            Pollutant::Pm10 => "pm10",
            Pollutant::No2 => "no2",
            Pollutant::Co => "co",
            Pollutant::O3 => "o3",
            Pollutant::So2 => "so2",
        }
    }

    /// Converts an internal µg/m³ concentration into its presentation value and unit.
    /// CO is shown in mg/m³, everything else in µg/m³.
    pub fn presentation(&self, concentration: f64) -> (f64, &'static str) {
        match self {
            Pollutant::Co => (concentration / 1000.0, "mg/m³"),
            _ => (concentration, "µg/m³"),
        }
    }
}

impl fmt::Display for Pollutant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

// --- Readings and records ---

/// One timestamped observation. Missing values stay `None`; they are never coerced to zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PollutantReading {
    pub timestamp: DateTime<Utc>,
    pub pm2_5: Option<f64>,
    pub pm10: Option<f64>,
    pub no2: Option<f64>,
    /// Carbon monoxide in µg/m³.
    pub co: Option<f64>,
    pub o3: Option<f64>,
    pub so2: Option<f64>,
    /// Temperature in °C.
    pub temperature: Option<f64>,
    /// Relative humidity in percent.
    pub humidity: Option<f64>,
    /// Wind speed in km/h.
    pub wind_speed: Option<f64>,
}

impl PollutantReading {
    /// Creates an empty reading at `timestamp`.
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            ..Default::default()
        }
    }

    /// Returns the concentration recorded for `pollutant`, if any.
    pub fn get(&self, pollutant: Pollutant) -> Option<f64> {
        match pollutant {
            Pollutant::Pm25 => self.pm2_5,
            Pollutant::Pm10 => self.pm10,
            Pollutant::No2 => self.no2,
            Pollutant::Co => self.co,
            Pollutant::O3 => self.o3,
            Pollutant::So2 => self.so2,
        }
    }

    /// Sets (or clears) the concentration for `pollutant`.
    pub fn set(&mut self, pollutant: Pollutant, value: Option<f64>) {
        let slot = match pollutant {
            Pollutant::Pm25 => &mut self.pm2_5,
            Pollutant::Pm10 => &mut self.pm10,
            Pollutant::No2 => &mut self.no2,
            Pollutant::Co => &mut self.co,
            Pollutant::O3 => &mut self.o3,
            Pollutant::So2 => &mut self.so2,
        };
        *slot = value;
    }

    /// Builder-style variant of [`set`](Self::set).
    pub fn with(mut self, pollutant: Pollutant, value: f64) -> Self {
        self.set(pollutant, Some(value));
        self
    }

    /// Iterates over the pollutants that carry a value.
    pub fn present(&self) -> impl Iterator<Item = (Pollutant, f64)> + '_ {
        Pollutant::ALL
            .iter()
            .filter_map(move |p| self.get(*p).map(|v| (*p, v)))
    }

    /// Returns a copy with every pollutant concentration multiplied by `factor`.
    /// Weather fields are carried over unscaled.
    pub fn scaled(&self, factor: f64) -> Self {
        let mut out = self.clone();
        for pollutant in Pollutant::ALL {
            out.set(pollutant, self.get(pollutant).map(|v| v * factor));
        }
        out
    }
}

/// A reading plus its computed AQI and category.
///
/// `aqi` is `None` when no sub-index could be computed; it is never silently `0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AqiRecord {
    #[serde(flatten)]
    pub reading: PollutantReading,
    pub aqi: Option<f64>,
    pub category: Category,
}

impl AqiRecord {
    /// Wraps a reading whose AQI has not been computed yet.
    pub fn pending(reading: PollutantReading) -> Self {
        Self {
            reading,
            aqi: None,
            category: Category::Unknown,
        }
    }

    /// Wraps a reading with an AQI supplied by an authoritative source.
    pub fn with_aqi(reading: PollutantReading, aqi: f64) -> Self {
        Self {
            reading,
            aqi: Some(aqi),
            category: Category::from_aqi(Some(aqi)),
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.reading.timestamp
    }

    /// Colour code of the record's category.
    pub fn color(&self) -> &'static str {
        self.category.color()
    }
}

/// Chronological, timestamp-deduplicated series of records for one city.
///
/// Construction is the only way to set the records, so a series handed out by the cache is
/// effectively read-only.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CityTimeSeries {
    city: String,
    records: Vec<AqiRecord>,
}

impl CityTimeSeries {
    /// Builds a series, sorting by timestamp and deduplicating.
    ///
    /// When two records share a timestamp the one that appears later in `records` wins, so
    /// callers append fresher data last.
    pub fn from_records(city: &str, mut records: Vec<AqiRecord>) -> Self {
        // Stable sort keeps insertion order among equal timestamps.
        records.sort_by_key(|r| r.timestamp());

        let mut deduped: Vec<AqiRecord> = Vec::with_capacity(records.len());
        for record in records {
            match deduped.last_mut() {
                Some(last) if last.timestamp() == record.timestamp() => *last = record,
                _ => deduped.push(record),
            }
        }

        Self {
            city: city.to_string(),
            records: deduped,
        }
    }

    pub fn city(&self) -> &str {
        &self.city
    }

    pub fn records(&self) -> &[AqiRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Most recent record.
    pub fn latest(&self) -> Option<&AqiRecord> {
        self.records.last()
    }

    /// AQI values of the records that have one, oldest first.
    pub fn aqi_values(&self) -> Vec<f64> {
        self.records.iter().filter_map(|r| r.aqi).collect()
    }

    /// Consumes the series, returning its records.
    pub fn into_records(self) -> Vec<AqiRecord> {
        self.records
    }
}

/// One forecast hour.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForecastPoint {
    pub timestamp: DateTime<Utc>,
    pub predicted_aqi: f64,
    pub category: Category,
}

// --- Cities and provenance ---

/// A city the pipeline can serve.
#[derive(Debug, Clone, PartialEq)]
pub struct City {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Relative pollution level used by the synthetic generator (Delhi = 1.0).
    pub pollution_factor: f64,
}

/// Known cities: (name, latitude, longitude, pollution factor).
const KNOWN_CITIES: [(&str, f64, f64, f64); 5] = [
    ("Delhi", 28.7041, 77.1025, 1.0),
    ("Mumbai", 19.0760, 72.8777, 0.6),
    ("Bangalore", 12.9716, 77.5946, 0.45),
    ("Kolkata", 22.5726, 88.3639, 0.85),
    ("Pune", 18.5204, 73.8567, 0.55),
];

impl City {
    /// Resolves a city name case-insensitively.
    ///
    /// Unknown names keep their own name (and therefore their own cache key) but borrow Delhi's
    /// coordinates so upstream calls still have a location.
    pub fn lookup(name: &str) -> Self {
        let trimmed = name.trim();
        if let Some((known, lat, lon, factor)) = KNOWN_CITIES
            .iter()
            .find(|(known, ..)| known.eq_ignore_ascii_case(trimmed))
        {
            return Self {
                name: known.to_string(),
                latitude: *lat,
                longitude: *lon,
                pollution_factor: *factor,
            };
        }

        warn!(
            "Unknown city '{}'; using Delhi coordinates for upstream queries",
            trimmed
        );
        let (_, lat, lon, _) = KNOWN_CITIES[0];
        Self {
            name: trimmed.to_string(),
            latitude: lat,
            longitude: lon,
            pollution_factor: 0.8,
        }
    }

    /// Names of all known cities.
    pub fn known_names() -> Vec<&'static str> {
        KNOWN_CITIES.iter().map(|(name, ..)| *name).collect()
    }

    /// Cache / directory key (lowercase name).
    pub fn key(&self) -> String {
        self.name.to_lowercase()
    }
}

/// Where a series came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DataSource {
    /// Government per-station feed.
    Cpcb,
    /// Commercial air-pollution history API.
    OpenWeather,
    /// Synthetic generator.
    Synthetic,
    /// A real single reading blended onto synthetic history.
    Blended,
}

impl DataSource {
    /// Whether the data originates (at least partly) from a real measurement.
    pub fn is_real(&self) -> bool {
        !matches!(self, DataSource::Synthetic)
    }
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataSource::Cpcb => write!(f, "cpcb_api"),
            DataSource::OpenWeather => write!(f, "openweathermap"),
            DataSource::Synthetic => write!(f, "simulation"),
            DataSource::Blended => write!(f, "blended"),
        }
    }
}
