//! Model training over the scaled feature matrix.
//!
//! Trains the fixed six-model roster sequentially: each model is trained,
//! handed to the registry for serialization, and its heavy in-memory state
//! released before the next begins. That discipline caps peak memory while
//! several row-snapshot models exist; it is not a performance choice.

pub mod models;

use serde::{Deserialize, Serialize};

use crate::config::TrainingConfig;
use crate::error::{Error, Result};
use models::{
    DecisionTreeModel, DeepModel, GradientBoostModel, LinearModel, Predictor, RandomForestModel,
    XgbModel, MODEL_ROSTER,
};

/// Accuracy metrics over the training set.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelMetrics {
    pub r2: f64,
    pub mse: f64,
    pub mae: f64,
}

impl ModelMetrics {
    /// R² = 1 − SS_res/SS_tot, alongside MSE and MAE.
    pub fn compute(predictions: &[f64], targets: &[f64]) -> Self {
        let n = targets.len().max(1) as f64;
        let mean = targets.iter().sum::<f64>() / n;
        let ss_tot: f64 = targets.iter().map(|t| (t - mean).powi(2)).sum();
        let ss_res: f64 = predictions
            .iter()
            .zip(targets)
            .map(|(p, t)| (p - t).powi(2))
            .sum();
        let mae = predictions
            .iter()
            .zip(targets)
            .map(|(p, t)| (p - t).abs())
            .sum::<f64>()
            / n;
        let r2 = if ss_tot > 0.0 { 1.0 - ss_res / ss_tot } else { 0.0 };
        Self {
            r2,
            mse: ss_res / n,
            mae,
        }
    }
}

/// A freshly trained model: name, metrics, and the live predictor. The
/// registry takes ownership when the artifact is persisted.
pub struct TrainedModel {
    pub name: &'static str,
    pub metrics: ModelMetrics,
    pub predictor: Box<dyn Predictor>,
}

/// Per-model outcome reported back to the training caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingSummary {
    pub model: String,
    pub trained: bool,
    pub r2_score: f64,
    pub mse: f64,
    pub mae: f64,
}

#[derive(Debug, Clone)]
pub struct ModelTrainer {
    config: TrainingConfig,
}

impl ModelTrainer {
    pub fn new(config: TrainingConfig) -> Self {
        Self { config }
    }

    pub fn roster() -> [&'static str; 6] {
        MODEL_ROSTER
    }

    /// Train one roster member against the scaled matrix and target vector.
    pub fn train_one(
        &self,
        name: &str,
        features: &[Vec<f64>],
        targets: &[f64],
    ) -> Result<TrainedModel> {
        if features.is_empty() || features.len() != targets.len() {
            return Err(Error::EmptyDataset);
        }
        let predictor: Box<dyn Predictor> = match name {
            models::LINEAR_REGRESSION => {
                Box::new(LinearModel::train(features, targets, self.config.epochs))
            }
            models::DECISION_TREE => Box::new(DecisionTreeModel::train(features, targets)),
            models::RANDOM_FOREST => {
                Box::new(RandomForestModel::train(targets, self.config.forest_trees))
            }
            models::GRADIENT_BOOSTING => Box::new(GradientBoostModel::train(
                features,
                targets,
                self.config.boost_rounds,
                self.config.learning_rate,
            )),
            models::XGBOOST => Box::new(XgbModel::train(features, targets)),
            models::DEEP_LEARNING => {
                Box::new(DeepModel::train(features, targets, self.config.epochs))
            }
            other => {
                return Err(Error::Prediction(format!("unknown model family: {other}")))
            }
        };

        let predictions: Vec<f64> = features
            .iter()
            .map(|row| predictor.predict(row))
            .collect::<Result<_>>()?;
        let metrics = ModelMetrics::compute(&predictions, targets);
        tracing::info!(
            model = predictor.name(),
            r2 = metrics.r2,
            mse = metrics.mse,
            mae = metrics.mae,
            "trained model"
        );

        Ok(TrainedModel {
            name: predictor.name(),
            metrics,
            predictor,
        })
    }
}

/// Index of the best entry by R²; ties go to the earliest-trained entry.
pub fn best_by_r2(metrics: &[ModelMetrics]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (i, m) in metrics.iter().enumerate() {
        match best {
            Some(b) if metrics[b].r2 >= m.r2 => {}
            _ => best = Some(i),
        }
    }
    best
}
