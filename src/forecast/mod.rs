//! AQI forecasting: model artifacts, feature engineering and the recursive forecaster.

mod features;
mod model;
mod recursive;

pub use features::*;
pub use model::*;
pub use recursive::*;
