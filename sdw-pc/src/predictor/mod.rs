//! Pump predictor
//!
//! Recommends pump ON (1) or OFF (0) with a confidence in [0, 1] from five
//! environmental features. Two implementations:
//!
//! - [`RuleBasedPredictor`]: fixed rule, used when no model is configured
//! - [`ForestPredictor`]: decision forest exported to JSON
//!
//! Predictors never fail toward the caller. Model loading does, and is a
//! startup error.

mod forest;
mod rules;

pub use forest::{ForestModel, ForestPredictor, TreeNode};
pub use rules::RuleBasedPredictor;

use sdw_common::config::{ControlConfig, PredictorConfig};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use crate::error::Result;

/// Feature names in model input order
pub const FEATURE_NAMES: [&str; 5] = [
    "water_level",
    "rain",
    "solar_historical",
    "time_of_day",
    "diesel_cost",
];

/// One predictor input row
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Features {
    pub water_level: f64,
    /// Rainfall (mm)
    pub rain: f64,
    /// Irradiance scaled by 0.001
    pub solar_historical: f64,
    /// Quarter-of-day bucket, 0..=3
    pub time_of_day: u8,
    pub diesel_cost: f64,
}

impl Features {
    pub fn to_array(&self) -> [f64; 5] {
        [
            self.water_level,
            self.rain,
            self.solar_historical,
            f64::from(self.time_of_day),
            self.diesel_cost,
        ]
    }

    pub fn is_finite(&self) -> bool {
        self.to_array().iter().all(|v| v.is_finite())
    }
}

/// Predictor output
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    /// 1 = run the pump, 0 = stop it
    pub label: u8,
    pub confidence: f64,
}

impl Prediction {
    pub fn on(confidence: f64) -> Self {
        Self {
            label: 1,
            confidence,
        }
    }

    pub fn off(confidence: f64) -> Self {
        Self {
            label: 0,
            confidence,
        }
    }
}

/// Metadata reported on the AI status endpoint
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ModelInfo {
    pub model_loaded: bool,
    pub model_path: Option<PathBuf>,
    pub model_type: String,
    pub features: Vec<String>,
    pub container_height: f64,
    pub pump_threshold: f64,
}

/// Pump ON/OFF recommendation source
pub trait PumpPredictor: Send + Sync {
    /// Must not panic and must return a label in {0, 1}
    fn predict(&self, features: &Features) -> Prediction;

    fn info(&self) -> ModelInfo;
}

/// Build the configured predictor
///
/// No model path: rule-based. A model path that cannot be loaded is an error.
pub fn from_config(
    predictor: &PredictorConfig,
    control: &ControlConfig,
) -> Result<Arc<dyn PumpPredictor>> {
    let rules = RuleBasedPredictor::new(control.pump_on_threshold, control.container_height);

    match &predictor.model_path {
        Some(path) => {
            let forest = ForestPredictor::load(path, rules)?;
            info!(
                "Loaded decision forest from {} ({} trees)",
                path.display(),
                forest.tree_count()
            );
            Ok(Arc::new(forest))
        }
        None => {
            info!("No predictor model configured, using rule-based predictor");
            Ok(Arc::new(rules))
        }
    }
}
