use serde::Deserialize;
use std::path::Path;
use tracing::debug;

use crate::error::AppError;
use crate::features::{FeatureVector, FEATURE_NAMES};

/// Min-max scaler fitted offline, stored as JSON.
///
/// `x' = (x - data_min) / (data_max - data_min) * (hi - lo) + lo`, where a
/// zero-width column divides by one. Values are not clipped, so unseen
/// magnitudes scale past the fitted range.
#[derive(Debug, Clone, Deserialize)]
pub struct MinMaxScaler {
    pub feature_names: Vec<String>,
    pub data_min: Vec<f64>,
    pub data_max: Vec<f64>,
    #[serde(default = "unit_range")]
    pub feature_range: (f64, f64),
}

fn unit_range() -> (f64, f64) {
    (0.0, 1.0)
}

impl MinMaxScaler {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, AppError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Artifact(format!("cannot read scaler {}: {}", path.display(), e)))?;
        let scaler: MinMaxScaler = serde_json::from_str(&content)
            .map_err(|e| AppError::Artifact(format!("invalid scaler {}: {}", path.display(), e)))?;
        scaler.validate()?;
        debug!("Loaded scaler from {}: {} columns", path.display(), scaler.feature_names.len());
        Ok(scaler)
    }

    fn validate(&self) -> Result<(), AppError> {
        let n = self.feature_names.len();
        if self.data_min.len() != n || self.data_max.len() != n {
            return Err(AppError::Artifact(format!(
                "scaler has {} names but {} minima and {} maxima",
                n,
                self.data_min.len(),
                self.data_max.len()
            )));
        }
        Ok(())
    }

    /// Names and order must equal the feature schema exactly.
    pub fn check_schema(&self) -> Result<(), AppError> {
        if self.feature_names.len() != FEATURE_NAMES.len() {
            return Err(AppError::SchemaMismatch(format!(
                "scaler expects {} columns, extractor produces {}",
                self.feature_names.len(),
                FEATURE_NAMES.len()
            )));
        }
        for (i, (expected, actual)) in self.feature_names.iter().zip(FEATURE_NAMES).enumerate() {
            if expected.as_str() != *actual {
                return Err(AppError::SchemaMismatch(format!(
                    "column {i}: scaler expects '{expected}', extractor produces '{actual}'"
                )));
            }
        }
        Ok(())
    }

    pub fn transform(&self, vector: &FeatureVector) -> Result<Vec<f64>, AppError> {
        self.check_schema()?;
        let (lo, hi) = self.feature_range;
        let scaled = vector
            .as_slice()
            .iter()
            .zip(self.data_min.iter().zip(&self.data_max))
            .map(|(x, (min, max))| {
                let range = max - min;
                let range = if range == 0.0 { 1.0 } else { range };
                (x - min) / range * (hi - lo) + lo
            })
            .collect();
        Ok(scaled)
    }
}
