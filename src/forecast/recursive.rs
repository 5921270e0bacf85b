//! Recursive multi-step forecaster.
//!
//! Each step predicts one hour ahead from lag and rolling features of the AQI history, then
//! appends its own prediction to that history, so later steps build on earlier predictions.
//! The forecaster is an [`Iterator`] over emitted [`ForecastPoint`]s.

use super::features::build_features;
use super::model::ModelArtifact;
use crate::aqi::{Category, AQI_MAX};
use crate::error::AppError;
use crate::models::{to_ist, ForecastPoint, PollutantReading};
use chrono::{DateTime, Duration, Timelike, Utc};
use rand::Rng;
use std::collections::VecDeque;
use tracing::{debug, warn};

/// Number of AQI values kept as history.
pub const HISTORY_WINDOW: usize = 48;
/// Longest forecast a caller is expected to ask for, in hours.
pub const MAX_FORECAST_HOURS: usize = 72;
/// Hours of catch-up allowed when the input data lags behind the clock.
pub const MAX_CATCH_UP_HOURS: usize = 240;
/// Hard bound on internal steps.
pub const MAX_INTERNAL_STEPS: usize = MAX_FORECAST_HOURS + MAX_CATCH_UP_HOURS;
/// Relative jitter applied to each prediction.
pub const JITTER: f64 = 0.02;

/// Deterministic diurnal multiplier for an IST hour of day.
pub fn diurnal_multiplier(hour: u32) -> f64 {
    match hour {
        7..=9 | 18..=20 => 1.1,
        2..=5 => 0.9,
        _ => 1.0,
    }
}

/// Step-by-step forecast state.
pub struct RecursiveForecast<'a, R> {
    artifact: &'a ModelArtifact,
    history: VecDeque<f64>,
    snapshot: PollutantReading,
    cursor: DateTime<Utc>,
    now: DateTime<Utc>,
    remaining: usize,
    steps: usize,
    failed_steps: usize,
    rng: R,
}

impl<'a, R: Rng> RecursiveForecast<'a, R> {
    /// Sets up a forecast.
    ///
    /// # Arguments
    ///
    /// * `artifact` - Model used for every step.
    /// * `history` - AQI values, oldest first; only the last [`HISTORY_WINDOW`] are kept.
    /// * `snapshot` - Last known reading. Its timestamp is the starting point; pollutants and
    ///   weather persist from it.
    /// * `hours` - Number of points to emit.
    /// * `now` - Points stamped before this instant are computed but not emitted.
    /// * `rng` - Source of the jitter.
    pub fn new(
        artifact: &'a ModelArtifact,
        history: &[f64],
        snapshot: PollutantReading,
        hours: usize,
        now: DateTime<Utc>,
        rng: R,
    ) -> Self {
        let start = history.len().saturating_sub(HISTORY_WINDOW);
        debug!(
            "Forecasting {} hours from {} with {} history values",
            hours,
            snapshot.timestamp,
            history.len() - start
        );
        Self {
            artifact,
            history: history[start..].iter().copied().collect(),
            cursor: snapshot.timestamp,
            snapshot,
            now,
            remaining: hours,
            steps: 0,
            failed_steps: 0,
            rng,
        }
    }

    /// Number of steps whose prediction failed and repeated the previous value.
    pub fn failed_steps(&self) -> usize {
        self.failed_steps
    }

    /// Internal steps taken so far, emitted or not.
    pub fn steps(&self) -> usize {
        self.steps
    }

    /// Computes the value for `target` without touching the history.
    fn predict_step(&mut self, target: DateTime<Utc>) -> f64 {
        let multiplier = diurnal_multiplier(to_ist(target).hour());
        let mut snapshot = self.snapshot.scaled(multiplier);
        snapshot.timestamp = target;

        let history: Vec<f64> = self.history.iter().copied().collect();
        let features = build_features(&history, &snapshot, target);
        let vector = features.to_vector(&self.artifact.feature_names);

        let prediction = self.artifact.predict(&vector).and_then(|raw| {
            if raw.is_finite() {
                Ok(raw)
            } else {
                Err(AppError::Prediction(format!("model returned {}", raw)))
            }
        });

        match prediction {
            Ok(raw) => {
                let jitter = 1.0 + self.rng.gen_range(-JITTER..=JITTER);
                (raw * multiplier * jitter).clamp(0.0, AQI_MAX)
            },
            Err(e) => {
                self.failed_steps += 1;
                let previous = self.history.back().copied().unwrap_or(0.0);
                warn!(
                    "Forecast step for {} failed ({}); repeating previous value {:.1}",
                    target, e, previous
                );
                previous.clamp(0.0, AQI_MAX)
            },
        }
    }
}

impl<'a, R: Rng> Iterator for RecursiveForecast<'a, R> {
    type Item = ForecastPoint;

    fn next(&mut self) -> Option<ForecastPoint> {
        while self.remaining > 0 && self.steps < MAX_INTERNAL_STEPS {
            self.steps += 1;
            self.cursor += Duration::hours(1);
            let target = self.cursor;

            let value = self.predict_step(target);
            self.history.push_back(value);
            while self.history.len() > HISTORY_WINDOW {
                self.history.pop_front();
            }

            if target >= self.now {
                self.remaining -= 1;
                return Some(ForecastPoint {
                    timestamp: target,
                    predicted_aqi: value,
                    category: Category::from_aqi(Some(value)),
                });
            }
        }

        if self.remaining > 0 {
            debug!(
                "Forecast stopped at the {}-step bound with {} points outstanding",
                MAX_INTERNAL_STEPS, self.remaining
            );
            self.remaining = 0;
        }
        None
    }
}

/// Result of a complete forecast run.
#[derive(Debug, Clone)]
pub struct ForecastRun {
    pub points: Vec<ForecastPoint>,
    pub failed_steps: usize,
}

/// Runs a forecast to completion.
pub fn run_forecast<R: Rng>(
    artifact: &ModelArtifact,
    history: &[f64],
    snapshot: PollutantReading,
    hours: usize,
    now: DateTime<Utc>,
    rng: R,
) -> ForecastRun {
    let mut forecast = RecursiveForecast::new(artifact, history, snapshot, hours, now, rng);
    let points: Vec<ForecastPoint> = forecast.by_ref().collect();
    ForecastRun {
        points,
        failed_steps: forecast.failed_steps(),
    }
}
