//! Pre-trained model artifacts and the per-city registry.
//!
//! An artifact lives in `{model_dir}/{city}/` as three JSON files:
//! - `model.json`: the regression model (linear or a tree ensemble).
//! - `scaler.json`: a standard scaler applied before prediction.
//! - `feature_names.json`: the ordered feature names the model was trained on.

use crate::error::{AppError, Result};
use crate::models::City;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info};

pub const MODEL_FILE: &str = "model.json";
pub const SCALER_FILE: &str = "scaler.json";
pub const FEATURES_FILE: &str = "feature_names.json";

/// One node of a regression tree. Node 0 is the root; `x[feature] < threshold` goes left.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TreeNode {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf(f64),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tree {
    pub nodes: Vec<TreeNode>,
}

impl Tree {
    fn predict(&self, x: &[f64]) -> Result<f64> {
        let mut index = 0;
        // A well-formed tree reaches a leaf in fewer hops than it has nodes.
        for _ in 0..=self.nodes.len() {
            match self.nodes.get(index) {
                Some(TreeNode::Leaf(value)) => return Ok(*value),
                Some(TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                }) => {
                    let value = x.get(*feature).ok_or_else(|| {
                        AppError::Prediction(format!(
                            "tree references feature {} but vector has {}",
                            feature,
                            x.len()
                        ))
                    })?;
                    index = if *value < *threshold { *left } else { *right };
                },
                None => {
                    return Err(AppError::Prediction(format!(
                        "tree node {} does not exist",
                        index
                    )))
                },
            }
        }
        Err(AppError::Prediction("tree contains a cycle".to_string()))
    }
}

/// A serialized regression model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RegressionModel {
    Linear {
        intercept: f64,
        coefficients: Vec<f64>,
    },
    TreeEnsemble {
        base_score: f64,
        trees: Vec<Tree>,
    },
}

impl RegressionModel {
    /// Predicts from an already scaled feature vector.
    pub fn predict(&self, x: &[f64]) -> Result<f64> {
        match self {
            RegressionModel::Linear {
                intercept,
                coefficients,
            } => {
                if coefficients.len() != x.len() {
                    return Err(AppError::Prediction(format!(
                        "model expects {} features, got {}",
                        coefficients.len(),
                        x.len()
                    )));
                }
                Ok(intercept + coefficients.iter().zip(x).map(|(c, v)| c * v).sum::<f64>())
            },
            RegressionModel::TreeEnsemble { base_score, trees } => {
                let mut total = *base_score;
                for tree in trees {
                    total += tree.predict(x)?;
                }
                Ok(total)
            },
        }
    }
}

/// Standard scaler: `(x - mean) / scale`. A zero scale is treated as 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
}

impl StandardScaler {
    pub fn transform(&self, x: &[f64]) -> Result<Vec<f64>> {
        if self.mean.len() != x.len() || self.scale.len() != x.len() {
            return Err(AppError::Prediction(format!(
                "scaler fitted on {} features, got {}",
                self.mean.len(),
                x.len()
            )));
        }
        Ok(x.iter()
            .zip(self.mean.iter().zip(&self.scale))
            .map(|(v, (m, s))| {
                let s = if *s == 0.0 { 1.0 } else { *s };
                (v - m) / s
            })
            .collect())
    }
}

/// Immutable per-city model bundle.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelArtifact {
    pub model: RegressionModel,
    pub scaler: StandardScaler,
    pub feature_names: Vec<String>,
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let raw = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

impl ModelArtifact {
    /// Loads an artifact from its directory.
    ///
    /// # Errors
    ///
    /// I/O and JSON errors are returned as-is; an empty feature list is a `Config` error.
    pub fn load_dir(dir: &Path) -> Result<Self> {
        let artifact = Self {
            model: read_json(&dir.join(MODEL_FILE))?,
            scaler: read_json(&dir.join(SCALER_FILE))?,
            feature_names: read_json(&dir.join(FEATURES_FILE))?,
        };
        if artifact.feature_names.is_empty() {
            return Err(AppError::Config(format!(
                "{} lists no features",
                dir.join(FEATURES_FILE).display()
            )));
        }
        Ok(artifact)
    }

    /// Writes the artifact to `dir` (created if missing).
    pub fn save_dir(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)?;
        fs::write(dir.join(MODEL_FILE), serde_json::to_string_pretty(&self.model)?)?;
        fs::write(dir.join(SCALER_FILE), serde_json::to_string_pretty(&self.scaler)?)?;
        fs::write(
            dir.join(FEATURES_FILE),
            serde_json::to_string_pretty(&self.feature_names)?,
        )?;
        Ok(())
    }

    /// Scales the raw feature vector and runs the model.
    pub fn predict(&self, raw: &[f64]) -> Result<f64> {
        let scaled = self.scaler.transform(raw)?;
        self.model.predict(&scaled)
    }
}

/// Models loaded at startup, keyed by city.
#[derive(Debug, Default)]
pub struct ModelRegistry {
    models: HashMap<String, Arc<ModelArtifact>>,
}

impl ModelRegistry {
    /// Loads the artifact of every listed city from `root`.
    ///
    /// A city without a directory is simply absent; a corrupt artifact is logged and left out.
    pub fn load(root: &Path, cities: &[String]) -> Self {
        let mut registry = Self::default();
        for name in cities {
            let city = City::lookup(name);
            let dir = root.join(city.key());
            if !dir.is_dir() {
                info!("No model for {} at {}", city.name, dir.display());
                continue;
            }
            match ModelArtifact::load_dir(&dir) {
                Ok(artifact) => {
                    info!(
                        "Loaded model for {} ({} features)",
                        city.name,
                        artifact.feature_names.len()
                    );
                    registry.insert(&city, artifact);
                },
                Err(e) => error!("Failed to load model for {} from {}: {}", city.name, dir.display(), e),
            }
        }
        debug!("{} models loaded", registry.models.len());
        registry
    }

    pub fn insert(&mut self, city: &City, artifact: ModelArtifact) {
        self.models.insert(city.key(), Arc::new(artifact));
    }

    pub fn get(&self, city: &City) -> Option<Arc<ModelArtifact>> {
        self.models.get(&city.key()).cloned()
    }

    /// Keys of the cities with a loaded model, sorted.
    pub fn cities(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.models.keys().cloned().collect();
        keys.sort();
        keys
    }
}
