use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::ArtifactConfig;
use crate::error::AppError;
use crate::explain::{self, Explanation};
use crate::features::{FeatureVector, FEATURE_COUNT, FEATURE_NAMES};
use crate::scaler::MinMaxScaler;

#[derive(Debug, Error, PartialEq)]
pub enum ModelError {
    #[error("expected {expected} features, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("tree {tree}: node index {node} out of range")]
    BadNode { tree: usize, node: usize },

    #[error("tree {tree}: decision path does not terminate")]
    Cycle { tree: usize },

    #[error("tree {tree}: split node {node} has no value, cannot attribute")]
    MissingNodeValue { tree: usize, node: usize },

    #[error("non-finite model output")]
    NonFinite,
}

/// Per-feature signed contributions in log-odds space.
pub trait Explainer {
    fn contributions(&self, x: &[f64]) -> Result<Vec<f64>, ModelError>;
}

/// A binary classifier producing P(phishing) from a scaled vector.
pub trait Classifier: Explainer + Send + Sync {
    fn predict_proba(&self, x: &[f64]) -> Result<f64, ModelError>;
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

fn check_dimension(x: &[f64]) -> Result<(), ModelError> {
    if x.len() != FEATURE_COUNT {
        return Err(ModelError::DimensionMismatch {
            expected: FEATURE_COUNT,
            got: x.len(),
        });
    }
    Ok(())
}

fn finite(p: f64) -> Result<f64, ModelError> {
    if p.is_finite() {
        Ok(p)
    } else {
        Err(ModelError::NonFinite)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogisticModel {
    pub intercept: f64,
    pub weights: Vec<f64>,
    /// Column name of each weight; reordered to the feature schema on load.
    pub feature_order: Vec<String>,
}

impl LogisticModel {
    /// Reorders weights into schema order. Every schema column must be named once.
    fn into_schema_order(self) -> Result<Self, String> {
        if self.weights.len() != self.feature_order.len() {
            return Err(format!(
                "{} weights for {} feature names",
                self.weights.len(),
                self.feature_order.len()
            ));
        }
        let by_name: BTreeMap<&str, f64> = self
            .feature_order
            .iter()
            .map(String::as_str)
            .zip(self.weights.iter().copied())
            .collect();
        let weights = FEATURE_NAMES
            .iter()
            .map(|name| {
                by_name
                    .get(name)
                    .copied()
                    .ok_or_else(|| format!("no weight for feature '{name}'"))
            })
            .collect::<Result<Vec<f64>, String>>()?;
        Ok(Self {
            intercept: self.intercept,
            weights,
            feature_order: FEATURE_NAMES.iter().map(|s| s.to_string()).collect(),
        })
    }

    /// Weights are in schema order after loading, so only `x` needs checking.
    fn margin(&self, x: &[f64]) -> Result<f64, ModelError> {
        check_dimension(x)?;
        Ok(self.intercept + self.weights.iter().zip(x).map(|(w, v)| w * v).sum::<f64>())
    }
}

impl Explainer for LogisticModel {
    fn contributions(&self, x: &[f64]) -> Result<Vec<f64>, ModelError> {
        check_dimension(x)?;
        Ok(self.weights.iter().zip(x).map(|(w, v)| w * v).collect())
    }
}

impl Classifier for LogisticModel {
    fn predict_proba(&self, x: &[f64]) -> Result<f64, ModelError> {
        finite(sigmoid(self.margin(x)?))
    }
}

/// How a split compares a feature against its threshold to go left.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SplitRule {
    /// `x < threshold` (XGBoost)
    #[default]
    Less,
    /// `x <= threshold` (scikit-learn)
    LessOrEqual,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Node {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
        /// Expected tree output at this node, needed for path attribution.
        #[serde(default)]
        value: Option<f64>,
    },
    Leaf {
        leaf: f64,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct Tree {
    pub nodes: Vec<Node>,
}

/// Gradient-boosted trees summed in log-odds space.
#[derive(Debug, Clone, Deserialize)]
pub struct TreeEnsemble {
    pub base_score: f64,
    #[serde(default)]
    pub split_rule: SplitRule,
    pub trees: Vec<Tree>,
}

impl TreeEnsemble {
    fn goes_left(&self, x: f64, threshold: f64) -> bool {
        match self.split_rule {
            SplitRule::Less => x < threshold,
            SplitRule::LessOrEqual => x <= threshold,
        }
    }

    /// Node indices visited from the root to a leaf, leaf included.
    fn decision_path(&self, tree_idx: usize, x: &[f64]) -> Result<Vec<usize>, ModelError> {
        let tree = &self.trees[tree_idx];
        let mut path = Vec::new();
        let mut idx = 0;
        loop {
            if path.len() > tree.nodes.len() {
                return Err(ModelError::Cycle { tree: tree_idx });
            }
            let node = tree.nodes.get(idx).ok_or(ModelError::BadNode {
                tree: tree_idx,
                node: idx,
            })?;
            path.push(idx);
            match node {
                Node::Leaf { .. } => return Ok(path),
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                    ..
                } => {
                    let value = x.get(*feature).copied().ok_or(ModelError::DimensionMismatch {
                        expected: feature + 1,
                        got: x.len(),
                    })?;
                    idx = if self.goes_left(value, *threshold) {
                        *left
                    } else {
                        *right
                    };
                }
            }
        }
    }

    fn margin(&self, x: &[f64]) -> Result<f64, ModelError> {
        check_dimension(x)?;
        let mut margin = self.base_score;
        for tree_idx in 0..self.trees.len() {
            let path = self.decision_path(tree_idx, x)?;
            if let Some(Node::Leaf { leaf }) =
                path.last().and_then(|i| self.trees[tree_idx].nodes.get(*i))
            {
                margin += leaf;
            }
        }
        Ok(margin)
    }
}

fn node_value(tree: &Tree, tree_idx: usize, idx: usize) -> Result<f64, ModelError> {
    match tree.nodes.get(idx) {
        Some(Node::Leaf { leaf }) => Ok(*leaf),
        Some(Node::Split { value: Some(v), .. }) => Ok(*v),
        Some(Node::Split { value: None, .. }) => Err(ModelError::MissingNodeValue {
            tree: tree_idx,
            node: idx,
        }),
        None => Err(ModelError::BadNode {
            tree: tree_idx,
            node: idx,
        }),
    }
}

impl Explainer for TreeEnsemble {
    /// Path attribution: each step down a tree credits the change in expected
    /// output to the feature the parent split on.
    fn contributions(&self, x: &[f64]) -> Result<Vec<f64>, ModelError> {
        check_dimension(x)?;
        let mut contributions = vec![0.0; x.len()];
        for (tree_idx, tree) in self.trees.iter().enumerate() {
            let path = self.decision_path(tree_idx, x)?;
            for pair in path.windows(2) {
                let (parent, child) = (pair[0], pair[1]);
                if let Some(Node::Split { feature, .. }) = tree.nodes.get(parent) {
                    let delta = node_value(tree, tree_idx, child)?
                        - node_value(tree, tree_idx, parent)?;
                    contributions[*feature] += delta;
                }
            }
        }
        Ok(contributions)
    }
}

impl Classifier for TreeEnsemble {
    fn predict_proba(&self, x: &[f64]) -> Result<f64, ModelError> {
        finite(sigmoid(self.margin(x)?))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelSpec {
    Logistic(LogisticModel),
    TreeEnsemble(TreeEnsemble),
}

#[derive(Debug, Clone, Deserialize)]
struct ModelArtifact {
    #[serde(default)]
    name: Option<String>,
    #[serde(flatten)]
    model: ModelSpec,
}

/// A named model loaded from an artifact file.
pub struct NamedModel {
    pub name: String,
    pub model: Arc<dyn Classifier>,
}

impl NamedModel {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, AppError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Artifact(format!("cannot read model {}: {}", path.display(), e)))?;
        let artifact: ModelArtifact = serde_json::from_str(&content)
            .map_err(|e| AppError::Artifact(format!("invalid model {}: {}", path.display(), e)))?;

        let name = artifact.name.unwrap_or_else(|| {
            path.file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "model".to_string())
        });
        let model: Arc<dyn Classifier> = match artifact.model {
            ModelSpec::Logistic(m) => Arc::new(
                m.into_schema_order()
                    .map_err(|e| AppError::Artifact(format!("model {name}: {e}")))?,
            ),
            ModelSpec::TreeEnsemble(m) => {
                if let Some((t, n)) = first_out_of_range_feature(&m) {
                    return Err(AppError::Artifact(format!(
                        "model {name}: tree {t} node {n} splits on a feature outside the schema"
                    )));
                }
                Arc::new(m)
            }
        };
        debug!("Loaded model {} from {}", name, path.display());
        Ok(Self { name, model })
    }
}

fn first_out_of_range_feature(ensemble: &TreeEnsemble) -> Option<(usize, usize)> {
    ensemble.trees.iter().enumerate().find_map(|(t, tree)| {
        tree.nodes.iter().enumerate().find_map(|(n, node)| match node {
            Node::Split { feature, .. } if *feature >= FEATURE_COUNT => Some((t, n)),
            _ => None,
        })
    })
}

/// Result of scoring one vector against every model.
#[derive(Debug, Clone)]
pub struct Scored {
    /// Per-model probability in load order; `None` when the model failed.
    pub probabilities: Vec<(String, Option<f64>)>,
    pub aggregate: Option<f64>,
    pub explanation: Explanation,
}

/// Mean of the present probabilities; `None` when every model failed.
pub fn aggregate(probabilities: &[Option<f64>]) -> Option<f64> {
    let present: Vec<f64> = probabilities.iter().flatten().copied().collect();
    if present.is_empty() {
        return None;
    }
    Some(present.iter().sum::<f64>() / present.len() as f64)
}

/// Scaler plus model ensemble, built once at startup and shared read-only.
pub struct ScoringContext {
    scaler: MinMaxScaler,
    models: Vec<NamedModel>,
    explain_model: Option<String>,
}

impl ScoringContext {
    pub fn new(scaler: MinMaxScaler, models: Vec<NamedModel>, explain_model: Option<String>) -> Self {
        Self {
            scaler,
            models,
            explain_model,
        }
    }

    pub fn load(config: &ArtifactConfig) -> Result<Self, AppError> {
        let scaler = MinMaxScaler::load_from_file(&config.scaler_path)?;
        if let Err(e) = scaler.check_schema() {
            warn!("Scaler does not match the feature schema, every prediction will fail: {}", e);
        }

        let models = config
            .model_paths
            .iter()
            .map(NamedModel::load_from_file)
            .collect::<Result<Vec<_>, _>>()?;
        if models.is_empty() {
            return Err(AppError::Artifact("no models configured".to_string()));
        }
        info!(
            "Scoring context ready: {} models ({})",
            models.len(),
            models.iter().map(|m| m.name.as_str()).collect::<Vec<_>>().join(", ")
        );
        Ok(Self::new(scaler, models, config.explain_model.clone()))
    }

    pub fn model_count(&self) -> usize {
        self.models.len()
    }

    pub fn model_names(&self) -> Vec<&str> {
        self.models.iter().map(|m| m.name.as_str()).collect()
    }

    fn explainer(&self) -> Option<&NamedModel> {
        match &self.explain_model {
            Some(name) => self.models.iter().find(|m| &m.name == name),
            None => self.models.first(),
        }
    }

    pub fn score(&self, vector: &FeatureVector) -> Result<Scored, AppError> {
        let scaled = self.scaler.transform(vector)?;

        let probabilities: Vec<(String, Option<f64>)> = self
            .models
            .iter()
            .map(|m| {
                let p = match m.model.predict_proba(&scaled) {
                    Ok(p) => {
                        debug!("{} probability: {:.4}", m.name, p);
                        Some(p)
                    }
                    Err(e) => {
                        warn!("Model {} failed: {}", m.name, e);
                        metrics::counter!("model_failures_total", "model" => m.name.clone())
                            .increment(1);
                        None
                    }
                };
                (m.name.clone(), p)
            })
            .collect();

        let aggregate = aggregate(&probabilities.iter().map(|(_, p)| *p).collect::<Vec<_>>());
        match aggregate {
            Some(p) => info!("Mean probability of phishing: {:.4}", p),
            None => warn!("Every model failed, no aggregate probability"),
        }

        let explanation = match self.explainer() {
            Some(named) => match named.model.contributions(&scaled) {
                Ok(contributions) => explain::rank(&contributions),
                Err(e) => {
                    warn!("Explanation with {} failed: {}", named.name, e);
                    Explanation::default()
                }
            },
            None => {
                warn!(
                    "Explanation model {:?} is not loaded",
                    self.explain_model.as_deref().unwrap_or_default()
                );
                Explanation::default()
            }
        };

        Ok(Scored {
            probabilities,
            aggregate,
            explanation,
        })
    }
}
