//! The six regressor families.
//!
//! These are deliberately simplified approximations of well-known algorithm
//! families, not faithful re-implementations. The contract each one honors:
//! training produces a name, metrics over the training set, and a `predict`
//! function over the fixed 15-slot scaled feature vector.
//!
//! The tree/forest/boosting variants are table-driven: each owns a snapshot
//! of (feature, target) rows plus a small similarity/averaging strategy.
//! Those rows exist only in the process that trained them; across a restart
//! such artifacts reload as metadata-only stubs (see the registry).

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::data::{FEATURE_COUNT, LOCATION_FEATURE, SIZE_FEATURE};
use crate::error::{Error, Result};

pub const LINEAR_REGRESSION: &str = "linear_regression";
pub const DECISION_TREE: &str = "decision_tree";
pub const RANDOM_FOREST: &str = "random_forest";
pub const GRADIENT_BOOSTING: &str = "gradient_boosting";
pub const XGBOOST: &str = "xgboost";
pub const DEEP_LEARNING: &str = "deep_learning";

/// Fixed training roster. Order doubles as the selection tie-break:
/// earlier-trained wins on equal R².
pub const MODEL_ROSTER: [&str; 6] = [
    LINEAR_REGRESSION,
    DECISION_TREE,
    RANDOM_FOREST,
    GRADIENT_BOOSTING,
    XGBOOST,
    DEEP_LEARNING,
];

/// A trained regressor over the scaled feature space.
pub trait Predictor: Send + Sync {
    fn name(&self) -> &'static str;
    fn predict(&self, features: &[f64]) -> Result<f64>;

    /// Serializable parameters, for families whose state is more than the
    /// training rows. Table-driven models return `None` and persist only
    /// their metadata.
    fn params_json(&self) -> Option<serde_json::Value> {
        None
    }
}

/// One training row snapshotted by the table-driven models.
#[derive(Debug, Clone)]
pub struct TrainRow {
    pub features: Vec<f64>,
    pub target: f64,
    /// Fitted value after boosting rounds; equals `target` pre-boosting.
    pub fitted: f64,
}

/// Neighborhood tolerance in z-score units.
const SIMILARITY_TOL: f64 = 0.25;

fn check_width(features: &[f64]) -> Result<()> {
    if features.len() != FEATURE_COUNT {
        return Err(Error::Prediction(format!(
            "expected {FEATURE_COUNT} features, got {}",
            features.len()
        )));
    }
    Ok(())
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

// ---------------------------------------------------------------------------
// Linear

/// Gradient-trained linear model on scaled features and z-scored targets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearModel {
    pub weights: Vec<f64>,
    pub bias: f64,
    pub target_mean: f64,
    pub target_std: f64,
}

impl LinearModel {
    pub fn train(features: &[Vec<f64>], targets: &[f64], epochs: usize) -> Self {
        let n = targets.len().max(1) as f64;
        let target_mean = mean(targets);
        let target_std = (targets
            .iter()
            .map(|t| (t - target_mean).powi(2))
            .sum::<f64>()
            / n)
            .sqrt()
            .max(1e-9);
        let normalized: Vec<f64> = targets.iter().map(|t| (t - target_mean) / target_std).collect();

        let mut weights = vec![0.0; FEATURE_COUNT];
        let mut bias = 0.0;
        let lr = 0.01;
        for _ in 0..epochs.max(1) {
            let mut grad_w = vec![0.0; FEATURE_COUNT];
            let mut grad_b = 0.0;
            for (row, y) in features.iter().zip(&normalized) {
                let pred: f64 =
                    row.iter().zip(&weights).map(|(x, w)| x * w).sum::<f64>() + bias;
                let err = pred - y;
                for (g, x) in grad_w.iter_mut().zip(row) {
                    *g += err * x;
                }
                grad_b += err;
            }
            for (w, g) in weights.iter_mut().zip(&grad_w) {
                *w -= lr * 2.0 * g / n;
            }
            bias -= lr * 2.0 * grad_b / n;
        }

        Self {
            weights,
            bias,
            target_mean,
            target_std,
        }
    }
}

impl Predictor for LinearModel {
    fn name(&self) -> &'static str {
        LINEAR_REGRESSION
    }

    fn predict(&self, features: &[f64]) -> Result<f64> {
        check_width(features)?;
        let z: f64 = features
            .iter()
            .zip(&self.weights)
            .map(|(x, w)| x * w)
            .sum::<f64>()
            + self.bias;
        Ok(z * self.target_std + self.target_mean)
    }

    fn params_json(&self) -> Option<serde_json::Value> {
        serde_json::to_value(self).ok()
    }
}

// ---------------------------------------------------------------------------
// Decision tree (single-split approximation)

/// Predicts the mean target of rows whose size feature is within a small
/// tolerance of the query row.
pub struct DecisionTreeModel {
    pub rows: Vec<TrainRow>,
    pub global_mean: f64,
}

impl DecisionTreeModel {
    pub fn train(features: &[Vec<f64>], targets: &[f64]) -> Self {
        let rows = snapshot_rows(features, targets);
        Self {
            global_mean: mean(targets),
            rows,
        }
    }
}

impl Predictor for DecisionTreeModel {
    fn name(&self) -> &'static str {
        DECISION_TREE
    }

    fn predict(&self, features: &[f64]) -> Result<f64> {
        check_width(features)?;
        let neighbors: Vec<f64> = self
            .rows
            .iter()
            .filter(|r| (r.features[SIZE_FEATURE] - features[SIZE_FEATURE]).abs() <= SIMILARITY_TOL)
            .map(|r| r.target)
            .collect();
        if neighbors.is_empty() {
            Ok(self.global_mean)
        } else {
            Ok(mean(&neighbors))
        }
    }
}

// ---------------------------------------------------------------------------
// Random forest (bootstrap-mean approximation)

/// Each "tree" carries the target mean of one bootstrap sample of 80% of
/// the rows; the prediction is the grand average across trees.
pub struct RandomForestModel {
    pub tree_means: Vec<f64>,
}

impl RandomForestModel {
    pub fn train(targets: &[f64], trees: usize) -> Self {
        let mut rng = rand::rng();
        let sample_size = ((targets.len() as f64) * 0.8).ceil().max(1.0) as usize;
        let tree_means = (0..trees.max(1))
            .map(|_| {
                let sum: f64 = (0..sample_size)
                    .map(|_| targets[rng.random_range(0..targets.len())])
                    .sum();
                sum / sample_size as f64
            })
            .collect();
        Self { tree_means }
    }
}

impl Predictor for RandomForestModel {
    fn name(&self) -> &'static str {
        RANDOM_FOREST
    }

    fn predict(&self, features: &[f64]) -> Result<f64> {
        check_width(features)?;
        Ok(mean(&self.tree_means))
    }
}

// ---------------------------------------------------------------------------
// Gradient boosting (residual-fitting approximation)

/// Starts from the global target mean and repeatedly fits the mean residual
/// of size-or-location-similar rows at a fixed learning rate. Rows carry
/// their accumulated fitted values; inference averages the fitted values of
/// rows similar to the query.
pub struct GradientBoostModel {
    pub rows: Vec<TrainRow>,
    pub base: f64,
}

fn similar_on_size_or_location(a: &[f64], b: &[f64]) -> bool {
    (a[SIZE_FEATURE] - b[SIZE_FEATURE]).abs() <= SIMILARITY_TOL
        || (a[LOCATION_FEATURE] - b[LOCATION_FEATURE]).abs() <= SIMILARITY_TOL
}

impl GradientBoostModel {
    pub fn train(
        features: &[Vec<f64>],
        targets: &[f64],
        rounds: usize,
        learning_rate: f64,
    ) -> Self {
        let base = mean(targets);
        let mut rows = snapshot_rows(features, targets);
        for row in &mut rows {
            row.fitted = base;
        }

        for _ in 0..rounds.max(1) {
            let residuals: Vec<f64> = rows.iter().map(|r| r.target - r.fitted).collect();
            let updates: Vec<f64> = rows
                .iter()
                .map(|row| {
                    let similar: Vec<f64> = rows
                        .iter()
                        .zip(&residuals)
                        .filter(|(other, _)| {
                            similar_on_size_or_location(&row.features, &other.features)
                        })
                        .map(|(_, res)| *res)
                        .collect();
                    learning_rate * mean(&similar)
                })
                .collect();
            for (row, update) in rows.iter_mut().zip(updates) {
                row.fitted += update;
            }
        }

        Self { rows, base }
    }
}

impl Predictor for GradientBoostModel {
    fn name(&self) -> &'static str {
        GRADIENT_BOOSTING
    }

    fn predict(&self, features: &[f64]) -> Result<f64> {
        check_width(features)?;
        let similar: Vec<f64> = self
            .rows
            .iter()
            .filter(|r| similar_on_size_or_location(features, &r.features))
            .map(|r| r.fitted)
            .collect();
        if similar.is_empty() {
            Ok(self.base)
        } else {
            Ok(mean(&similar))
        }
    }
}

// ---------------------------------------------------------------------------
// XGBoost (regularized similarity-kernel approximation)

/// Fixed importance weights across the feature slots; encoded categoricals
/// and the raw size dominate, coordinates contribute least.
const KERNEL_WEIGHTS: [f64; FEATURE_COUNT] = [
    0.8, // property type
    1.0, // location
    0.6, // city
    0.3, // province
    0.1, // purpose
    0.6, // area category
    0.2, // latitude
    0.2, // longitude
    0.5, // baths
    0.7, // bedrooms
    1.0, // area (marla)
    0.9, // location premium
    0.4, // property age
    0.3, // bath/bedroom ratio
    0.6, // normalized size
];

/// Weighted multi-feature similarity kernel with an L2-style denominator
/// dampening the similarity mass.
pub struct XgbModel {
    pub rows: Vec<TrainRow>,
    pub lambda: f64,
    pub global_mean: f64,
}

impl XgbModel {
    pub fn train(features: &[Vec<f64>], targets: &[f64]) -> Self {
        Self {
            rows: snapshot_rows(features, targets),
            lambda: 1.0,
            global_mean: mean(targets),
        }
    }

    fn kernel(a: &[f64], b: &[f64]) -> f64 {
        let distance: f64 = a
            .iter()
            .zip(b)
            .zip(KERNEL_WEIGHTS)
            .map(|((x, y), w)| w * (x - y).powi(2))
            .sum();
        1.0 / (1.0 + distance)
    }
}

impl Predictor for XgbModel {
    fn name(&self) -> &'static str {
        XGBOOST
    }

    fn predict(&self, features: &[f64]) -> Result<f64> {
        check_width(features)?;
        let mut weighted = 0.0;
        let mut mass = 0.0;
        for row in &self.rows {
            let sim = Self::kernel(features, &row.features);
            weighted += sim * row.target;
            mass += sim;
        }
        if mass < 1e-12 {
            return Ok(self.global_mean);
        }
        // L2 dampening pulls thin-neighborhood predictions toward zero
        // mass, so blend the shrunk estimate with the global mean.
        let shrink = mass / (mass + self.lambda);
        Ok(shrink * (weighted / mass) + (1.0 - shrink) * self.global_mean)
    }
}

// ---------------------------------------------------------------------------
// Deep learning (feed-forward network)

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Layer {
    /// weights[out][in]
    pub weights: Vec<Vec<f64>>,
    pub biases: Vec<f64>,
}

/// 15→32→16→8→1 feed-forward regressor with ReLU hidden layers, trained by
/// SGD on z-scored targets with inverted dropout on hidden activations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeepModel {
    pub layers: Vec<Layer>,
    pub target_mean: f64,
    pub target_std: f64,
}

const HIDDEN_SIZES: [usize; 4] = [32, 16, 8, 1];
const DROPOUT_P: f64 = 0.1;

impl DeepModel {
    pub fn train(features: &[Vec<f64>], targets: &[f64], epochs: usize) -> Self {
        let mut rng = rand::rng();
        let n = targets.len().max(1) as f64;
        let target_mean = mean(targets);
        let target_std = (targets
            .iter()
            .map(|t| (t - target_mean).powi(2))
            .sum::<f64>()
            / n)
            .sqrt()
            .max(1e-9);
        let normalized: Vec<f64> = targets.iter().map(|t| (t - target_mean) / target_std).collect();

        let mut layers = Vec::new();
        let mut fan_in = FEATURE_COUNT;
        for size in HIDDEN_SIZES {
            let scale = 1.0 / (fan_in as f64).sqrt();
            let weights = (0..size)
                .map(|_| (0..fan_in).map(|_| rng.random_range(-scale..scale)).collect())
                .collect();
            layers.push(Layer {
                weights,
                biases: vec![0.0; size],
            });
            fan_in = size;
        }
        let mut model = Self {
            layers,
            target_mean,
            target_std,
        };

        let lr = 0.001;
        for _ in 0..epochs.max(1) {
            for (row, y) in features.iter().zip(&normalized) {
                model.sgd_step(row, *y, lr, &mut rng);
            }
        }
        model
    }

    /// One forward/backward pass with inverted dropout on hidden layers.
    fn sgd_step(&mut self, input: &[f64], target: f64, lr: f64, rng: &mut impl Rng) {
        let last = self.layers.len() - 1;
        // Forward, remembering activations and dropout masks.
        let mut activations: Vec<Vec<f64>> = vec![input.to_vec()];
        let mut masks: Vec<Vec<f64>> = Vec::new();
        for (i, layer) in self.layers.iter().enumerate() {
            let prev = activations.last().expect("input activation present");
            let mut out: Vec<f64> = layer
                .weights
                .iter()
                .zip(&layer.biases)
                .map(|(w, b)| w.iter().zip(prev).map(|(wi, x)| wi * x).sum::<f64>() + b)
                .collect();
            let mask: Vec<f64> = if i < last {
                out.iter_mut().for_each(|v| *v = v.max(0.0));
                out.iter_mut()
                    .map(|v| {
                        if rng.random_range(0.0..1.0) < DROPOUT_P {
                            *v = 0.0;
                            0.0
                        } else {
                            *v /= 1.0 - DROPOUT_P;
                            1.0 / (1.0 - DROPOUT_P)
                        }
                    })
                    .collect()
            } else {
                vec![1.0; out.len()]
            };
            masks.push(mask);
            activations.push(out);
        }

        // Backward.
        let output = activations.last().expect("forward pass produced output")[0];
        let mut delta = vec![2.0 * (output - target)];
        for i in (0..self.layers.len()).rev() {
            let prev_activation = activations[i].clone();
            let next_delta = {
                let layer = &self.layers[i];
                let mut next = vec![0.0; prev_activation.len()];
                for (j, row) in layer.weights.iter().enumerate() {
                    for (k, w) in row.iter().enumerate() {
                        next[k] += delta[j] * w;
                    }
                }
                next
            };
            let layer = &mut self.layers[i];
            for (j, row) in layer.weights.iter_mut().enumerate() {
                for (k, w) in row.iter_mut().enumerate() {
                    *w -= lr * delta[j] * prev_activation[k];
                }
                layer.biases[j] -= lr * delta[j];
            }
            if i > 0 {
                // Propagate through the previous layer's ReLU and dropout.
                delta = next_delta
                    .iter()
                    .zip(&activations[i])
                    .zip(&masks[i - 1])
                    .map(|((d, a), m)| if *a > 0.0 { d * m } else { 0.0 })
                    .collect();
            }
        }
    }

    fn forward(&self, input: &[f64]) -> f64 {
        let last = self.layers.len() - 1;
        let mut current = input.to_vec();
        for (i, layer) in self.layers.iter().enumerate() {
            let mut out: Vec<f64> = layer
                .weights
                .iter()
                .zip(&layer.biases)
                .map(|(w, b)| {
                    w.iter().zip(&current).map(|(wi, x)| wi * x).sum::<f64>() + b
                })
                .collect();
            if i < last {
                out.iter_mut().for_each(|v| *v = v.max(0.0));
            }
            current = out;
        }
        current[0]
    }
}

impl Predictor for DeepModel {
    fn name(&self) -> &'static str {
        DEEP_LEARNING
    }

    fn predict(&self, features: &[f64]) -> Result<f64> {
        check_width(features)?;
        Ok(self.forward(features) * self.target_std + self.target_mean)
    }

    fn params_json(&self) -> Option<serde_json::Value> {
        serde_json::to_value(self).ok()
    }
}

// ---------------------------------------------------------------------------

/// Metadata-only stub standing in for a table-driven artifact whose training
/// rows did not survive a process restart. Any predict call errors, which
/// routes the request into the service's rule-based fallback.
pub struct UntrainedStub {
    pub model_name: &'static str,
}

impl Predictor for UntrainedStub {
    fn name(&self) -> &'static str {
        self.model_name
    }

    fn predict(&self, _features: &[f64]) -> Result<f64> {
        Err(Error::Prediction(format!(
            "{} holds no training rows in this process; retrain to restore it",
            self.model_name
        )))
    }
}

fn snapshot_rows(features: &[Vec<f64>], targets: &[f64]) -> Vec<TrainRow> {
    features
        .iter()
        .zip(targets)
        .map(|(f, t)| TrainRow {
            features: f.clone(),
            target: *t,
            fitted: *t,
        })
        .collect()
}
