use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::explain::Explanation;
use crate::features::FeatureVector;

#[derive(Debug, Clone, Deserialize)]
pub struct PredictRequest {
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PredictResponse {
    /// Mean phishing probability; `null` when every model failed.
    pub final_probability: Option<f64>,
    pub shap_explanations: Explanation,
    pub review_ticket: Uuid,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Safe,
    Unsafe,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FeatureContribution {
    pub feature: String,
    pub shap_value: f64,
    pub direction: Direction,
}

impl FeatureContribution {
    pub fn new(feature: &str, shap_value: f64) -> Self {
        let direction = if shap_value < 0.0 {
            Direction::Safe
        } else {
            Direction::Unsafe
        };
        Self {
            feature: feature.to_string(),
            shap_value,
            direction,
        }
    }
}

/// Ground truth supplied by a reviewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i8", into = "i8")]
pub enum Verdict {
    Safe,
    Phishing,
    Other,
}

impl TryFrom<i8> for Verdict {
    type Error = String;

    fn try_from(value: i8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Verdict::Safe),
            1 => Ok(Verdict::Phishing),
            -1 => Ok(Verdict::Other),
            other => Err(format!("label must be 0, 1 or -1, got {other}")),
        }
    }
}

impl From<Verdict> for i8 {
    fn from(verdict: Verdict) -> Self {
        match verdict {
            Verdict::Safe => 0,
            Verdict::Phishing => 1,
            Verdict::Other => -1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LabelRequest {
    pub ticket_id: Uuid,
    /// Raw label, validated into a [`Verdict`] by the handler.
    pub actual: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelResponse {
    pub ticket_id: Uuid,
    pub recorded: bool,
    pub message: String,
}

/// A prediction awaiting a reviewer's label.
#[derive(Debug, Clone, Serialize)]
pub struct ReviewTicket {
    pub ticket_id: Uuid,
    pub url: String,
    pub features: FeatureVector,
    pub predicted_probability: Option<f64>,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub models: Vec<String>,
    pub model_count: usize,
    pub pending_reviews: usize,
    /// Redis list mirroring the reviews, when one is configured.
    pub review_queue: Option<String>,
    pub uptime_secs: u64,
}
