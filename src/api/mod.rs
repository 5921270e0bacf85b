//! Provides clients and utilities for the upstream data sources.
//!
//! Includes:
//! - `cpcb`: Client for the government station feed and station aggregation.
//! - `openweather`: Client for the commercial air-pollution history API.
//! - `mock`: Synthetic generator used as the last fallback tier.
//! - `seed`: Loader for the per-city CSV seed datasets.
//! - `fetcher`: The multi-source fetch chain tying the tiers together.

mod cpcb;
mod fetcher;
mod mock;
mod openweather;
mod seed;

pub use cpcb::*;
pub use fetcher::*;
pub use mock::*;
pub use openweather::*;
pub use seed::*;
