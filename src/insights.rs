//! Derived views over AQI series and forecasts.
//!
//! Includes the weekly clean-air score, the best-time-to-go-outside planner, station rankings
//! and per-day forecast summaries with a health advisory.

use crate::api::StationSnapshot;
use crate::aqi::{breakdown, Category};
use crate::models::{to_ist, CityTimeSeries, ForecastPoint, Pollutant};
use chrono::{DateTime, Duration, NaiveDate, Timelike, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Days covered by the clean-air score.
pub const SCORE_DAYS: i64 = 7;
/// Slots covered by the best-time planner.
pub const BEST_TIME_SLOTS: u32 = 12;
/// AQI below which a slot counts as safe.
pub const SAFE_AQI: f64 = 150.0;
/// Station rankings are cut to this many entries.
pub const MAX_RANKED_STATIONS: usize = 40;

/// Typical AQI multiplier per hour of day (IST), relative to the daily mean.
const HOURLY_PROFILE: [f64; 24] = [
    0.8, 0.7, 0.6, 0.6, 0.7, 0.8, // 00-05
    0.9, 1.1, 1.3, 1.3, 1.1, 1.0, // 06-11
    0.9, 0.8, 0.75, 0.8, 0.9, 1.1, // 12-17
    1.2, 1.3, 1.2, 1.1, 1.0, 0.9, // 18-23
];

fn hourly_profile(hour: u32) -> f64 {
    HOURLY_PROFILE.get(hour as usize).copied().unwrap_or(1.0)
}

// --- Clean-air score ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Trend {
    Up,
    Down,
    Stable,
}

impl fmt::Display for Trend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trend::Up => write!(f, "up"),
            Trend::Down => write!(f, "down"),
            Trend::Stable => write!(f, "stable"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyScore {
    pub date: NaiveDate,
    pub mean_aqi: f64,
    pub score: f64,
}

/// Weekly clean-air score (0-100, higher is cleaner).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CleanAirScore {
    pub score: u32,
    pub trend: Trend,
    /// Absolute percentage change between the first and last day's score.
    pub change_percent: u32,
    pub days: Vec<DailyScore>,
}

/// Score of one day's mean AQI.
pub fn day_score(mean_aqi: f64) -> f64 {
    (100.0 - mean_aqi / 5.0).max(0.0)
}

/// Computes the clean-air score over the last [`SCORE_DAYS`] IST dates of the series.
///
/// The window ends at the series' last date, not at today. Returns `None` when no record in
/// the window has an AQI.
pub fn clean_air_score(series: &CityTimeSeries) -> Option<CleanAirScore> {
    let end = to_ist(series.latest()?.timestamp()).date_naive();
    let start = end - Duration::days(SCORE_DAYS - 1);

    let mut by_day: BTreeMap<NaiveDate, (f64, usize)> = BTreeMap::new();
    for record in series.records() {
        let date = to_ist(record.timestamp()).date_naive();
        let Some(aqi) = record.aqi else { continue };
        if date < start || date > end {
            continue;
        }
        let slot = by_day.entry(date).or_insert((0.0, 0));
        slot.0 += aqi;
        slot.1 += 1;
    }

    let days: Vec<DailyScore> = by_day
        .into_iter()
        .map(|(date, (sum, n))| {
            let mean_aqi = sum / n as f64;
            DailyScore {
                date,
                mean_aqi,
                score: day_score(mean_aqi),
            }
        })
        .collect();

    let first = days.first()?.score;
    let last = days.last()?.score;
    let mean_score = days.iter().map(|d| d.score).sum::<f64>() / days.len() as f64;

    let (trend, change_percent) = if days.len() < 2 {
        (Trend::Stable, 0)
    } else {
        let change = last - first;
        let trend = if change > 0.0 {
            Trend::Up
        } else if change < 0.0 {
            Trend::Down
        } else {
            Trend::Stable
        };
        let pct = if first != 0.0 {
            (change / first * 100.0).abs().trunc() as u32
        } else {
            0
        };
        (trend, pct)
    };

    Some(CleanAirScore {
        score: mean_score.trunc() as u32,
        trend,
        change_percent,
        days,
    })
}

// --- Best time to go outside ---

/// Sky conditions implied by an AQI level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Conditions {
    Clear,
    Haze,
    Smog,
}

impl Conditions {
    pub fn from_aqi(aqi: f64) -> Self {
        if aqi < 150.0 {
            Conditions::Clear
        } else if aqi < 300.0 {
            Conditions::Haze
        } else {
            Conditions::Smog
        }
    }
}

impl fmt::Display for Conditions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Conditions::Clear => "Clear",
            Conditions::Haze => "Haze",
            Conditions::Smog => "Smog",
        };
        write!(f, "{}", label)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeSlot {
    /// IST hour of day.
    pub hour: u32,
    /// "Now" for the first slot, otherwise a 12-hour clock label.
    pub label: String,
    pub aqi: f64,
    pub conditions: Conditions,
    pub safe: bool,
    pub recommended: bool,
}

fn hour_label(hour: u32) -> String {
    let period = if hour < 12 { "AM" } else { "PM" };
    let display = match hour {
        0 => 12,
        1..=12 => hour,
        _ => hour - 12,
    };
    format!("{} {}", display, period)
}

/// Projects the current AQI over the next [`BEST_TIME_SLOTS`] hours using the typical diurnal
/// profile, and marks the three cleanest slots as recommended.
pub fn best_time_windows(current_aqi: f64, now: DateTime<Utc>) -> Vec<TimeSlot> {
    let current_hour = to_ist(now).hour();
    let base = current_aqi / hourly_profile(current_hour);

    let mut slots: Vec<TimeSlot> = (0..BEST_TIME_SLOTS)
        .map(|i| {
            let hour = (current_hour + i) % 24;
            let aqi = (base * hourly_profile(hour)).floor();
            TimeSlot {
                hour,
                label: if i == 0 {
                    "Now".to_string()
                } else {
                    hour_label(hour)
                },
                aqi,
                conditions: Conditions::from_aqi(aqi),
                safe: aqi < SAFE_AQI,
                recommended: false,
            }
        })
        .collect();

    let mut order: Vec<usize> = (0..slots.len()).collect();
    order.sort_by(|a, b| slots[*a].aqi.total_cmp(&slots[*b].aqi));
    for index in order.into_iter().take(3) {
        slots[index].recommended = true;
    }
    slots
}

// --- Station rankings ---

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StationRanking {
    pub rank: usize,
    pub name: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub aqi: f64,
    pub category: Category,
    pub controlling: Option<Pollutant>,
}

/// Ranks stations by AQI, worst first, keeping at most [`MAX_RANKED_STATIONS`].
/// Stations without a computable AQI are left out.
pub fn station_rankings(stations: &[StationSnapshot]) -> Vec<StationRanking> {
    let mut ranked: Vec<StationRanking> = stations
        .iter()
        .filter_map(|station| {
            let detail = breakdown(&station.reading);
            let aqi = detail.aqi.filter(|aqi| *aqi > 0.0)?;
            Some(StationRanking {
                rank: 0,
                name: station.name.clone(),
                latitude: station.latitude,
                longitude: station.longitude,
                aqi,
                category: Category::from_aqi(Some(aqi)),
                controlling: detail.controlling,
            })
        })
        .collect();

    ranked.sort_by(|a, b| b.aqi.total_cmp(&a.aqi));
    ranked.truncate(MAX_RANKED_STATIONS);
    for (i, entry) in ranked.iter_mut().enumerate() {
        entry.rank = i + 1;
    }
    ranked
}

// --- Forecast summaries ---

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailySummary {
    pub date: NaiveDate,
    pub mean_aqi: f64,
    pub min_aqi: f64,
    pub max_aqi: f64,
    /// IST hour of the day's highest value.
    pub peak_hour: u32,
    pub category: Category,
}

/// Groups forecast points by IST date.
pub fn daily_summary(points: &[ForecastPoint]) -> Vec<DailySummary> {
    let mut by_day: BTreeMap<NaiveDate, Vec<&ForecastPoint>> = BTreeMap::new();
    for point in points {
        by_day
            .entry(to_ist(point.timestamp).date_naive())
            .or_default()
            .push(point);
    }

    by_day
        .into_iter()
        .filter_map(|(date, day)| {
            let peak = day
                .iter()
                .max_by(|a, b| a.predicted_aqi.total_cmp(&b.predicted_aqi))?;
            let mean_aqi = day.iter().map(|p| p.predicted_aqi).sum::<f64>() / day.len() as f64;
            Some(DailySummary {
                date,
                mean_aqi,
                min_aqi: day
                    .iter()
                    .map(|p| p.predicted_aqi)
                    .fold(f64::INFINITY, f64::min),
                max_aqi: peak.predicted_aqi,
                peak_hour: to_ist(peak.timestamp).hour(),
                category: Category::from_aqi(Some(mean_aqi)),
            })
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthAdvisory {
    pub headline: &'static str,
    pub advice: Vec<&'static str>,
}

/// Advisory for the mean AQI over a whole forecast. `None` for an empty forecast.
pub fn health_advisory(points: &[ForecastPoint]) -> Option<HealthAdvisory> {
    if points.is_empty() {
        return None;
    }
    let mean = points.iter().map(|p| p.predicted_aqi).sum::<f64>() / points.len() as f64;

    let advisory = if mean <= 100.0 {
        HealthAdvisory {
            headline: "Air quality expected to be satisfactory",
            advice: vec!["Normal outdoor activities can continue."],
        }
    } else if mean <= 200.0 {
        HealthAdvisory {
            headline: "Air quality expected to be moderate",
            advice: vec!["Sensitive groups should limit prolonged outdoor exertion."],
        }
    } else if mean <= 300.0 {
        HealthAdvisory {
            headline: "Air quality expected to be poor",
            advice: vec![
                "Everyone should reduce prolonged outdoor exertion.",
                "Sensitive groups should stay indoors.",
            ],
        }
    } else {
        HealthAdvisory {
            headline: "Air quality expected to be very poor to severe",
            advice: vec![
                "Avoid outdoor activities and use air purifiers indoors.",
                "Wear an N95 mask if going outside is necessary.",
            ],
        }
    };
    Some(advisory)
}
