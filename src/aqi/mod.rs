//! National (CPCB) AQI computation.
//!
//! - `breakpoints`: static per-pollutant breakpoint tables and the category table.
//! - `calculator`: sub-index interpolation, max-aggregation and batch coverage.

mod breakpoints;
mod calculator;

pub use breakpoints::*;
pub use calculator::*;
