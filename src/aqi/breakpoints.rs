//! CPCB national AQI breakpoint tables and the category table.
//!
//! Each pollutant's table is an ordered list of `(c_lo, c_hi, i_lo, i_hi)` tiers. Consecutive
//! tiers share their boundary concentration so the tables partition `[0, top]` without gaps;
//! concentrations above the top tier are capped at 500 by the calculator.
//! All concentrations are µg/m³ (CO included).

use crate::models::Pollutant;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One tier of a breakpoint table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Breakpoint {
    pub c_lo: f64,
    pub c_hi: f64,
    pub i_lo: f64,
    pub i_hi: f64,
}

impl Breakpoint {
    const fn new(c_lo: f64, c_hi: f64, i_lo: f64, i_hi: f64) -> Self {
        Self {
            c_lo,
            c_hi,
            i_lo,
            i_hi,
        }
    }

    /// Inclusive on both ends; overlap at shared boundaries is resolved by table order.
    pub fn contains(&self, concentration: f64) -> bool {
        self.c_lo <= concentration && concentration <= self.c_hi
    }

    /// Linear interpolation inside this tier.
    pub fn interpolate(&self, concentration: f64) -> f64 {
        (self.i_hi - self.i_lo) / (self.c_hi - self.c_lo) * (concentration - self.c_lo) + self.i_lo
    }
}

const PM25: [Breakpoint; 6] = [
    Breakpoint::new(0.0, 30.0, 0.0, 50.0),
    Breakpoint::new(30.0, 60.0, 50.0, 100.0),
    Breakpoint::new(60.0, 90.0, 100.0, 200.0),
    Breakpoint::new(90.0, 120.0, 200.0, 300.0),
    Breakpoint::new(120.0, 250.0, 300.0, 400.0),
    Breakpoint::new(250.0, 380.0, 400.0, 500.0),
];

const PM10: [Breakpoint; 6] = [
    Breakpoint::new(0.0, 50.0, 0.0, 50.0),
    Breakpoint::new(50.0, 100.0, 50.0, 100.0),
    Breakpoint::new(100.0, 250.0, 100.0, 200.0),
    Breakpoint::new(250.0, 350.0, 200.0, 300.0),
    Breakpoint::new(350.0, 430.0, 300.0, 400.0),
    Breakpoint::new(430.0, 510.0, 400.0, 500.0),
];

const NO2: [Breakpoint; 6] = [
    Breakpoint::new(0.0, 40.0, 0.0, 50.0),
    Breakpoint::new(40.0, 80.0, 50.0, 100.0),
    Breakpoint::new(80.0, 180.0, 100.0, 200.0),
    Breakpoint::new(180.0, 280.0, 200.0, 300.0),
    Breakpoint::new(280.0, 400.0, 300.0, 400.0),
    Breakpoint::new(400.0, 520.0, 400.0, 500.0),
];

// CPCB publishes CO in mg/m³; the table is kept in µg/m³ like every other pollutant.
const CO: [Breakpoint; 6] = [
    Breakpoint::new(0.0, 1_000.0, 0.0, 50.0),
    Breakpoint::new(1_000.0, 2_000.0, 50.0, 100.0),
    Breakpoint::new(2_000.0, 10_000.0, 100.0, 200.0),
    Breakpoint::new(10_000.0, 17_000.0, 200.0, 300.0),
    Breakpoint::new(17_000.0, 34_000.0, 300.0, 400.0),
    Breakpoint::new(34_000.0, 50_000.0, 400.0, 500.0),
];

const O3: [Breakpoint; 6] = [
    Breakpoint::new(0.0, 50.0, 0.0, 50.0),
    Breakpoint::new(50.0, 100.0, 50.0, 100.0),
    Breakpoint::new(100.0, 168.0, 100.0, 200.0),
    Breakpoint::new(168.0, 208.0, 200.0, 300.0),
    Breakpoint::new(208.0, 748.0, 300.0, 400.0),
    Breakpoint::new(748.0, 1_000.0, 400.0, 500.0),
];

const SO2: [Breakpoint; 6] = [
    Breakpoint::new(0.0, 40.0, 0.0, 50.0),
    Breakpoint::new(40.0, 80.0, 50.0, 100.0),
    Breakpoint::new(80.0, 380.0, 100.0, 200.0),
    Breakpoint::new(380.0, 800.0, 200.0, 300.0),
    Breakpoint::new(800.0, 1_600.0, 300.0, 400.0),
    Breakpoint::new(1_600.0, 2_100.0, 400.0, 500.0),
];

/// Returns the breakpoint table for `pollutant`.
pub fn table_for(pollutant: Pollutant) -> &'static [Breakpoint] {
    match pollutant {
        Pollutant::Pm25 => &PM25,
        Pollutant::Pm10 => &PM10,
        Pollutant::No2 => &NO2,
        Pollutant::Co => &CO,
        Pollutant::O3 => &O3,
        Pollutant::So2 => &SO2,
    }
}

// --- Categories ---

/// AQI category with its display colour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    Good,
    Satisfactory,
    Moderate,
    Poor,
    VeryPoor,
    Severe,
    Unknown,
}

/// Upper (inclusive) AQI bound of each category, in ascending order.
const CATEGORY_BOUNDS: [(f64, Category); 6] = [
    (50.0, Category::Good),
    (100.0, Category::Satisfactory),
    (200.0, Category::Moderate),
    (300.0, Category::Poor),
    (400.0, Category::VeryPoor),
    (500.0, Category::Severe),
];

impl Category {
    /// Threshold lookup: `[0,50]` Good, `(50,100]` Satisfactory, `(100,200]` Moderate,
    /// `(200,300]` Poor, `(300,400]` Very Poor, `(400,500]` Severe. `None` (or NaN) is Unknown.
    pub fn from_aqi(aqi: Option<f64>) -> Self {
        let Some(value) = aqi.filter(|v| !v.is_nan()) else {
            return Category::Unknown;
        };

        CATEGORY_BOUNDS
            .iter()
            .find(|(upper, _)| value <= *upper)
            .map(|(_, category)| *category)
            // Above 500 should not happen after capping, but stays Severe if it does.
            .unwrap_or(Category::Severe)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Category::Good => "Good",
            Category::Satisfactory => "Satisfactory",
            Category::Moderate => "Moderate",
            Category::Poor => "Poor",
            Category::VeryPoor => "Very Poor",
            Category::Severe => "Severe",
            Category::Unknown => "Unknown",
        }
    }

    /// Hex colour code for UI display.
    pub fn color(&self) -> &'static str {
        match self {
            Category::Good => "#22c55e",
            Category::Satisfactory => "#84cc16",
            Category::Moderate => "#f59e0b",
            Category::Poor => "#f97316",
            Category::VeryPoor => "#ef4444",
            Category::Severe => "#7f1d1d",
            Category::Unknown => "#cccccc",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}
