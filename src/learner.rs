//! Base learner capability consumed by the reduction.
//!
//! The reduction is agnostic to the underlying learner, it only requires a
//! weighted binary classification fit and a predict that returns scores in
//! [0, 1]. Two small deterministic learners are provided, mostly as working
//! references and for testing: a weighted decision stump and a weighted
//! majority vote.
use crate::data::Matrix;
use crate::errors::FairgradError;

/// A trained deterministic base classifier.
pub trait Predictor: Send + Sync {
    /// Predict a score in [0, 1] for every row of `data`.
    fn predict(&self, data: &Matrix<f64>) -> Vec<f64>;
}

/// A binary classification learner supporting sample weights.
///
/// * `fit` consumes features, relabeled targets in {0, 1} and non-negative
///   sample weights, and returns a fresh trained classifier. Each call must
///   train an independent classifier, the reduction keeps every one it gets.
pub trait Learner {
    fn fit(&self, data: &Matrix<f64>, y: &[f64], sample_weight: &[f64]) -> Result<Box<dyn Predictor>, FairgradError>;
}

/// A single axis-aligned threshold split, or a constant when no split
/// improves on the weighted majority vote.
#[derive(Debug, Clone)]
pub struct Stump {
    pub feature: usize,
    pub threshold: f64,
    /// Prediction when the feature value is below the threshold.
    pub below: f64,
    /// Prediction otherwise.
    pub above: f64,
}

impl Predictor for Stump {
    fn predict(&self, data: &Matrix<f64>) -> Vec<f64> {
        data.get_col(self.feature)
            .iter()
            .map(|v| if *v < self.threshold { self.below } else { self.above })
            .collect()
    }
}

/// Exhaustive weighted decision stump learner.
///
/// Scans every feature and every midpoint between adjacent distinct values,
/// both polarities, plus the two constant classifiers, and keeps the split
/// with the lowest weighted misclassification. Deterministic: ties are broken
/// toward the first candidate encountered.
#[derive(Debug, Clone, Copy, Default)]
pub struct DecisionStumpLearner;

impl Learner for DecisionStumpLearner {
    fn fit(&self, data: &Matrix<f64>, y: &[f64], sample_weight: &[f64]) -> Result<Box<dyn Predictor>, FairgradError> {
        if y.len() != data.rows || sample_weight.len() != data.rows {
            return Err(FairgradError::Learner(format!(
                "stump learner requires {} labels and weights, got {} and {}",
                data.rows,
                y.len(),
                sample_weight.len()
            )));
        }

        let total_w1: f64 = y.iter().zip(sample_weight).map(|(y_, w_)| y_ * w_).sum();
        let total_w0: f64 = y.iter().zip(sample_weight).map(|(y_, w_)| (1.0 - y_) * w_).sum();

        // Constant classifiers as the baseline candidates.
        let mut best_err = total_w0;
        let mut best = Stump {
            feature: 0,
            threshold: f64::NEG_INFINITY,
            below: 1.0,
            above: 1.0,
        };
        if total_w1 < best_err {
            best_err = total_w1;
            best = Stump {
                feature: 0,
                threshold: f64::NEG_INFINITY,
                below: 0.0,
                above: 0.0,
            };
        }

        for feature in 0..data.cols {
            let col = data.get_col(feature);
            let mut order: Vec<usize> = (0..data.rows).collect();
            order.sort_by(|a, b| col[*a].total_cmp(&col[*b]));

            let mut below_w1 = 0.0;
            let mut below_w0 = 0.0;
            for k in 1..data.rows {
                let prev = order[k - 1];
                below_w1 += y[prev] * sample_weight[prev];
                below_w0 += (1.0 - y[prev]) * sample_weight[prev];
                if col[order[k]] <= col[prev] {
                    continue;
                }
                let threshold = 0.5 * (col[prev] + col[order[k]]);
                // below -> 0, above -> 1
                let err_above_one = below_w1 + (total_w0 - below_w0);
                if err_above_one < best_err {
                    best_err = err_above_one;
                    best = Stump {
                        feature,
                        threshold,
                        below: 0.0,
                        above: 1.0,
                    };
                }
                // below -> 1, above -> 0
                let err_below_one = below_w0 + (total_w1 - below_w1);
                if err_below_one < best_err {
                    best_err = err_below_one;
                    best = Stump {
                        feature,
                        threshold,
                        below: 1.0,
                        above: 0.0,
                    };
                }
            }
        }

        Ok(Box::new(best))
    }
}

/// Weighted majority vote, ignores the features entirely.
#[derive(Debug, Clone, Copy, Default)]
pub struct MajorityVoteLearner;

struct ConstantPredictor {
    value: f64,
}

impl Predictor for ConstantPredictor {
    fn predict(&self, data: &Matrix<f64>) -> Vec<f64> {
        vec![self.value; data.rows]
    }
}

impl Learner for MajorityVoteLearner {
    fn fit(&self, data: &Matrix<f64>, y: &[f64], sample_weight: &[f64]) -> Result<Box<dyn Predictor>, FairgradError> {
        if y.len() != data.rows || sample_weight.len() != data.rows {
            return Err(FairgradError::Learner(format!(
                "majority vote learner requires {} labels and weights, got {} and {}",
                data.rows,
                y.len(),
                sample_weight.len()
            )));
        }
        let w1: f64 = y.iter().zip(sample_weight).map(|(y_, w_)| y_ * w_).sum();
        let w0: f64 = y.iter().zip(sample_weight).map(|(y_, w_)| (1.0 - y_) * w_).sum();
        let value = if w1 >= w0 { 1.0 } else { 0.0 };
        Ok(Box::new(ConstantPredictor { value }))
    }
}
