//! Sub-index calculator and AQI aggregator.
//!
//! The sub-index of one pollutant is a linear interpolation inside its breakpoint tier; the AQI
//! of a reading is the maximum sub-index over the pollutants it carries (the "controlling"
//! pollutant dominates). A batch variant fills a whole series in parallel and reports coverage.

use super::breakpoints::{table_for, Category};
use crate::models::{AqiRecord, Pollutant, PollutantReading};
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info};

/// Highest value on the AQI scale.
pub const AQI_MAX: f64 = 500.0;

/// Rounds to two decimals, matching the precision CPCB publishes sub-indices with.
fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Computes the sub-index of `pollutant` at `concentration`.
///
/// Returns `None` when the concentration is absent, NaN or negative. Concentrations above the
/// top breakpoint are capped at 500 instead of being extrapolated. Shared tier boundaries
/// belong to the lower tier (first match wins).
pub fn sub_index(pollutant: Pollutant, concentration: Option<f64>) -> Option<f64> {
    let c = concentration.filter(|c| c.is_finite() && *c >= 0.0)?;
    let table = table_for(pollutant);

    if let Some(tier) = table.iter().find(|tier| tier.contains(c)) {
        return Some(round2(tier.interpolate(c)).clamp(0.0, AQI_MAX));
    }

    // Not inside any tier and non-negative: above the top breakpoint.
    Some(AQI_MAX)
}

/// Label-based entry point for callers holding raw upstream names.
/// Unknown labels have no table and yield `None`.
pub fn sub_index_for_label(label: &str, concentration: Option<f64>) -> Option<f64> {
    Pollutant::from_label(label).and_then(|p| sub_index(p, concentration))
}

/// Per-pollutant detail behind an aggregated AQI.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AqiBreakdown {
    pub aqi: Option<f64>,
    pub controlling: Option<Pollutant>,
    pub sub_indices: Vec<(Pollutant, f64)>,
}

/// Computes every available sub-index of `reading` and picks the maximum.
pub fn breakdown(reading: &PollutantReading) -> AqiBreakdown {
    let sub_indices: Vec<(Pollutant, f64)> = Pollutant::ALL
        .iter()
        .filter_map(|p| sub_index(*p, reading.get(*p)).map(|idx| (*p, idx)))
        .collect();

    let controlling = sub_indices
        .iter()
        .copied()
        .max_by(|a, b| a.1.total_cmp(&b.1));

    AqiBreakdown {
        aqi: controlling.map(|(_, idx)| idx),
        controlling: controlling.map(|(p, _)| p),
        sub_indices,
    }
}

/// AQI of a reading: the maximum computable sub-index, or `None` when nothing is computable.
pub fn aggregate_aqi(reading: &PollutantReading) -> Option<f64> {
    breakdown(reading).aqi
}

/// Builds a fully annotated record from a reading.
pub fn to_record(reading: PollutantReading) -> AqiRecord {
    let aqi = aggregate_aqi(&reading);
    AqiRecord {
        reading,
        aqi,
        category: Category::from_aqi(aqi),
    }
}

/// What [`fill_record`] did to a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillOutcome {
    /// The record already carried an authoritative AQI; it was left untouched.
    Preexisting,
    /// AQI was missing (or the `0` sentinel) and has been computed.
    Computed,
    /// AQI was missing and no pollutant allowed computing one.
    Uncomputable,
}

/// Fills the AQI of a record when it is missing or carries the `0` "not yet computed" sentinel.
/// An existing non-zero AQI is never overwritten. The category is always refreshed.
pub fn fill_record(record: &mut AqiRecord) -> FillOutcome {
    let outcome = match record.aqi {
        Some(value) if value != 0.0 && !value.is_nan() => FillOutcome::Preexisting,
        _ => {
            record.aqi = aggregate_aqi(&record.reading);
            if record.aqi.is_some() {
                FillOutcome::Computed
            } else {
                FillOutcome::Uncomputable
            }
        },
    };
    record.category = Category::from_aqi(record.aqi);
    outcome
}

/// Coverage statistics reported by the batch aggregator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CoverageStats {
    pub total: usize,
    pub preexisting: usize,
    pub computed: usize,
    pub uncomputable: usize,
}

impl CoverageStats {
    /// Rows that end up with an AQI value.
    pub fn with_aqi(&self) -> usize {
        self.preexisting + self.computed
    }

    /// Percentage of rows with an AQI value.
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.with_aqi() as f64 / self.total as f64 * 100.0
    }
}

/// Fills AQI across a batch of records in parallel and reports coverage.
pub fn fill_batch(records: &mut [AqiRecord]) -> CoverageStats {
    let outcomes: Vec<FillOutcome> = records.par_iter_mut().map(fill_record).collect();

    let mut stats = CoverageStats {
        total: records.len(),
        ..Default::default()
    };
    for outcome in outcomes {
        match outcome {
            FillOutcome::Preexisting => stats.preexisting += 1,
            FillOutcome::Computed => stats.computed += 1,
            FillOutcome::Uncomputable => stats.uncomputable += 1,
        }
    }

    info!(
        "Computed AQI for {} / {} rows ({:.1}%), {} kept from source",
        stats.with_aqi(),
        stats.total,
        stats.percent(),
        stats.preexisting
    );
    if stats.uncomputable > 0 {
        debug!("{} rows have no computable pollutant", stats.uncomputable);
    }
    stats
}
