//! AQI computation, multi-source ingestion and recursive forecasting for Indian cities.
//!
//! The binary in `main.rs` is a thin CLI over [`service::AirQualityService`]; everything else
//! lives here so the pipeline can be embedded elsewhere.

pub mod api;
pub mod aqi;
pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod forecast;
pub mod insights;
pub mod models;
pub mod service;
