//! Defines the data structures and models used throughout the pipeline.
//!
//! This includes the canonical reading/record/series types every stage works on and the
//! wire structures received from upstream sources.

mod reading;
mod upstream;

pub use reading::*;
pub use upstream::*;
