//! Feature builder for the forecast models.
//!
//! Computes temporal, pollutant, lag and rolling features from an AQI history and a reading
//! snapshot, and lays them out in the order a model artifact expects.

use crate::models::{to_ist, Pollutant, PollutantReading};
use chrono::{DateTime, Datelike, Timelike, Utc};
use std::collections::HashMap;
use std::f64::consts::PI;

/// Lag offsets in hours.
pub const LAG_HOURS: [usize; 5] = [1, 3, 6, 12, 24];
/// Rolling window lengths in hours.
pub const ROLLING_WINDOWS: [usize; 4] = [3, 6, 12, 24];

/// Named feature values for one prediction step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Features {
    values: HashMap<String, f64>,
}

impl Features {
    fn insert(&mut self, name: impl Into<String>, value: f64) {
        self.values.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Lays features out in `names` order. Names that were not computed become 0.
    pub fn to_vector(&self, names: &[String]) -> Vec<f64> {
        names
            .iter()
            .map(|name| self.get(name).unwrap_or(0.0))
            .collect()
    }
}

/// Summary statistics of a rolling window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RollingStats {
    pub mean: f64,
    /// Population standard deviation; 0 for a single value.
    pub std: f64,
    pub max: f64,
    pub min: f64,
}

/// Statistics over the last `window` values of `history` (all of it when shorter).
/// Returns `None` for an empty history.
pub fn rolling_stats(history: &[f64], window: usize) -> Option<RollingStats> {
    let start = history.len().saturating_sub(window);
    let values = &history[start..];
    if values.is_empty() {
        return None;
    }

    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let std = if values.len() > 1 {
        (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt()
    } else {
        0.0
    };

    Some(RollingStats {
        mean,
        std,
        max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        min: values.iter().copied().fold(f64::INFINITY, f64::min),
    })
}

/// Value `lag` steps back; the oldest value when the history is shorter than `lag`.
pub fn lag_value(history: &[f64], lag: usize) -> Option<f64> {
    if lag >= 1 && lag <= history.len() {
        Some(history[history.len() - lag])
    } else {
        history.first().copied()
    }
}

/// Builds the full feature set for `target`.
///
/// # Arguments
///
/// * `history` - AQI values, oldest first.
/// * `snapshot` - Pollutant and weather values assumed at `target`.
/// * `target` - Timestamp being predicted; temporal features use IST.
pub fn build_features(
    history: &[f64],
    snapshot: &PollutantReading,
    target: DateTime<Utc>,
) -> Features {
    let mut features = Features::default();

    let local = to_ist(target);
    let hour = f64::from(local.hour());
    let month = f64::from(local.month());
    let day_of_week = local.weekday().num_days_from_monday();
    features.insert("hour", hour);
    features.insert("day_of_week", f64::from(day_of_week));
    features.insert("month", month);
    features.insert("is_weekend", if day_of_week >= 5 { 1.0 } else { 0.0 });
    features.insert("hour_sin", (2.0 * PI * hour / 24.0).sin());
    features.insert("hour_cos", (2.0 * PI * hour / 24.0).cos());
    features.insert("month_sin", (2.0 * PI * month / 12.0).sin());
    features.insert("month_cos", (2.0 * PI * month / 12.0).cos());

    for (pollutant, value) in snapshot.present() {
        features.insert(pollutant.feature_name(), value);
    }
    let weather = [
        ("temperature", snapshot.temperature),
        ("humidity", snapshot.humidity),
        ("wind_speed", snapshot.wind_speed),
    ];
    for (name, value) in weather {
        if let Some(value) = value {
            features.insert(name, value);
        }
    }

    for lag in LAG_HOURS {
        if let Some(value) = lag_value(history, lag) {
            features.insert(format!("aqi_lag_{}h", lag), value);
        }
    }

    for window in ROLLING_WINDOWS {
        if let Some(stats) = rolling_stats(history, window) {
            features.insert(format!("aqi_rolling_mean_{}h", window), stats.mean);
            features.insert(format!("aqi_rolling_std_{}h", window), stats.std);
            features.insert(format!("aqi_rolling_max_{}h", window), stats.max);
            features.insert(format!("aqi_rolling_min_{}h", window), stats.min);
        }
    }

    features
}

/// Every feature name the builder can produce, in a stable order.
pub fn supported_feature_names() -> Vec<String> {
    let mut names: Vec<String> = [
        "hour",
        "day_of_week",
        "month",
        "is_weekend",
        "hour_sin",
        "hour_cos",
        "month_sin",
        "month_cos",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    names.extend(Pollutant::ALL.iter().map(|p| p.feature_name().to_string()));
    names.extend(["temperature", "humidity", "wind_speed"].map(String::from));
    names.extend(LAG_HOURS.iter().map(|lag| format!("aqi_lag_{}h", lag)));
    for window in ROLLING_WINDOWS {
        for stat in ["mean", "std", "max", "min"] {
            names.push(format!("aqi_rolling_{}_{}h", stat, window));
        }
    }
    names
}
