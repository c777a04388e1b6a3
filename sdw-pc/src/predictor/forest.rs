//! Decision forest predictor
//!
//! Loads a forest of binary classification trees from JSON:
//!
//! ```json
//! {
//!   "model_type": "RandomForestClassifier",
//!   "trees": [
//!     { "feature": 0, "threshold": 3.5,
//!       "left":  { "value": [2.0, 8.0] },
//!       "right": { "value": [9.0, 1.0] } }
//!   ]
//! }
//! ```
//!
//! A sample goes left when `x[feature] <= threshold`. Each leaf holds class
//! weights `[off, on]`. The forest output is the mean of the normalized leaf
//! distributions; the label is the argmax (ties go to OFF) and the confidence
//! is the winning class's probability.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::warn;

use super::{Features, ModelInfo, Prediction, PumpPredictor, RuleBasedPredictor, FEATURE_NAMES};
use crate::error::{Error, Result};

/// One tree node
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum TreeNode {
    Split {
        feature: usize,
        threshold: f64,
        left: Box<TreeNode>,
        right: Box<TreeNode>,
    },
    Leaf {
        value: [f64; 2],
    },
}

impl TreeNode {
    fn validate(&self, depth: usize) -> std::result::Result<(), String> {
        match self {
            TreeNode::Split {
                feature,
                threshold,
                left,
                right,
            } => {
                if *feature >= FEATURE_NAMES.len() {
                    return Err(format!(
                        "feature index {} out of range at depth {}",
                        feature, depth
                    ));
                }
                if !threshold.is_finite() {
                    return Err(format!("non-finite threshold at depth {}", depth));
                }
                left.validate(depth + 1)?;
                right.validate(depth + 1)
            }
            TreeNode::Leaf { value } => {
                let total = value[0] + value[1];
                if value.iter().any(|v| !v.is_finite() || *v < 0.0) || total <= 0.0 {
                    return Err(format!("invalid leaf weights {:?} at depth {}", value, depth));
                }
                Ok(())
            }
        }
    }

    /// Normalized `[off, on]` distribution for `x`, or None on a bad index
    fn classify(&self, x: &[f64; 5]) -> Option<[f64; 2]> {
        let mut node = self;
        loop {
            match node {
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    let value = x.get(*feature)?;
                    node = if *value <= *threshold { left } else { right };
                }
                TreeNode::Leaf { value } => {
                    let total = value[0] + value[1];
                    return Some([value[0] / total, value[1] / total]);
                }
            }
        }
    }
}

/// Deserialized forest file
#[derive(Debug, Clone, Deserialize)]
pub struct ForestModel {
    #[serde(default = "default_model_type")]
    pub model_type: String,
    pub trees: Vec<TreeNode>,
}

fn default_model_type() -> String {
    "DecisionForest".to_string()
}

impl ForestModel {
    pub fn from_json(json: &str) -> Result<Self> {
        let model: ForestModel = serde_json::from_str(json)
            .map_err(|e| Error::Predictor(format!("Failed to parse forest: {}", e)))?;
        model.validate()?;
        Ok(model)
    }

    pub fn validate(&self) -> Result<()> {
        if self.trees.is_empty() {
            return Err(Error::Predictor("Forest has no trees".to_string()));
        }
        for (index, tree) in self.trees.iter().enumerate() {
            tree.validate(0)
                .map_err(|e| Error::Predictor(format!("Tree {}: {}", index, e)))?;
        }
        Ok(())
    }

    /// Mean `[off, on]` probabilities, or None if any tree cannot classify `x`
    pub fn predict_proba(&self, x: &[f64; 5]) -> Option<[f64; 2]> {
        let mut sum = [0.0, 0.0];
        for tree in &self.trees {
            let dist = tree.classify(x)?;
            sum[0] += dist[0];
            sum[1] += dist[1];
        }
        let n = self.trees.len() as f64;
        Some([sum[0] / n, sum[1] / n])
    }
}

/// Predictor backed by a [`ForestModel`], with the rule-based predictor for
/// inputs the forest cannot score
pub struct ForestPredictor {
    model: ForestModel,
    model_path: PathBuf,
    fallback: RuleBasedPredictor,
}

impl ForestPredictor {
    pub fn load(path: &Path, fallback: RuleBasedPredictor) -> Result<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            Error::Predictor(format!("Failed to read model {}: {}", path.display(), e))
        })?;
        let model = ForestModel::from_json(&json)?;
        Ok(Self::new(model, path.to_path_buf(), fallback))
    }

    pub fn new(model: ForestModel, model_path: PathBuf, fallback: RuleBasedPredictor) -> Self {
        Self {
            model,
            model_path,
            fallback,
        }
    }

    pub fn tree_count(&self) -> usize {
        self.model.trees.len()
    }
}

impl PumpPredictor for ForestPredictor {
    fn predict(&self, features: &Features) -> Prediction {
        if !features.is_finite() {
            warn!("Non-finite predictor input {:?}, using rule-based fallback", features);
            return self.fallback.predict(features);
        }

        match self.model.predict_proba(&features.to_array()) {
            Some([off, on]) if on > off => Prediction::on(on),
            Some([off, _]) => Prediction::off(off),
            None => {
                warn!("Forest could not score {:?}, using rule-based fallback", features);
                self.fallback.predict(features)
            }
        }
    }

    fn info(&self) -> ModelInfo {
        let fallback = self.fallback.info();
        ModelInfo {
            model_loaded: true,
            model_path: Some(self.model_path.clone()),
            model_type: self.model.model_type.clone(),
            ..fallback
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const STUMP_FOREST: &str = r#"{
        "model_type": "RandomForestClassifier",
        "trees": [
            { "feature": 0, "threshold": 3.5,
              "left":  { "value": [1.0, 9.0] },
              "right": { "value": [8.0, 2.0] } },
            { "feature": 2, "threshold": 0.15,
              "left":  { "value": [10.0, 0.0] },
              "right": { "value": [3.0, 7.0] } }
        ]
    }"#;

    fn features(water_level: f64, solar_historical: f64) -> Features {
        Features {
            water_level,
            rain: 0.0,
            solar_historical,
            time_of_day: 1,
            diesel_cost: 18.5,
        }
    }

    fn predictor() -> ForestPredictor {
        ForestPredictor::new(
            ForestModel::from_json(STUMP_FOREST).unwrap(),
            PathBuf::from("forest.json"),
            RuleBasedPredictor::new(3.5, 6.0),
        )
    }

    #[test]
    fn test_forest_averages_trees() {
        // Tree 1: [0.1, 0.9]; tree 2: [0.3, 0.7] → on = 0.8
        let p = predictor().predict(&features(2.0, 0.4));
        assert_eq!(p.label, 1);
        assert!((p.confidence - 0.8).abs() < 1e-9);

        // Tree 1: [0.8, 0.2]; tree 2: [1.0, 0.0] → off = 0.9
        let p = predictor().predict(&features(5.0, 0.1));
        assert_eq!(p.label, 0);
        assert!((p.confidence - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_split_goes_left_on_equal() {
        let p = predictor().predict(&features(3.5, 0.4));
        assert_eq!(p.label, 1);
    }

    #[test]
    fn test_tie_goes_to_off() {
        let model = ForestModel::from_json(r#"{"trees": [{"value": [1.0, 1.0]}]}"#).unwrap();
        let p = ForestPredictor::new(model, PathBuf::new(), RuleBasedPredictor::new(3.5, 6.0))
            .predict(&features(1.0, 0.5));
        assert_eq!(p, Prediction::off(0.5));
    }

    #[test]
    fn test_non_finite_input_uses_fallback() {
        let p = predictor().predict(&features(f64::NAN, 0.4));
        assert_eq!(p, Prediction::off(0.90));
    }

    #[test]
    fn test_invalid_models_rejected() {
        assert!(ForestModel::from_json(r#"{"trees": []}"#).is_err());
        assert!(ForestModel::from_json(
            r#"{"trees": [{"feature": 7, "threshold": 1.0,
                "left": {"value": [1.0, 0.0]}, "right": {"value": [0.0, 1.0]}}]}"#
        )
        .is_err());
        assert!(ForestModel::from_json(r#"{"trees": [{"value": [0.0, 0.0]}]}"#).is_err());
        assert!(ForestModel::from_json("not json").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(STUMP_FOREST.as_bytes()).unwrap();

        let forest = ForestPredictor::load(file.path(), RuleBasedPredictor::new(3.5, 6.0)).unwrap();
        assert_eq!(forest.tree_count(), 2);

        let info = forest.info();
        assert!(info.model_loaded);
        assert_eq!(info.model_type, "RandomForestClassifier");
        assert_eq!(info.model_path.as_deref(), Some(file.path()));
        assert_eq!(info.pump_threshold, 3.5);
    }
}
