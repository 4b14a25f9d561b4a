//! Exponentiated-gradient reduction for fair binary classification.
//!
//! Runs the two-player game between an error-minimizing primal player and a
//! constraint-pricing dual player: the dual ascends by multiplicative weight
//! updates on the constraint violations of each best response, the primal
//! answers through the base learner, and from the second iteration on an LP
//! over the discovered classifiers proposes a refined saddle-point candidate.
//! The iterate with the smallest duality gap wins.
use crate::constants::{
    ACCURACY_MUL, DEFAULT_EPS, DEFAULT_ETA_MUL, DEFAULT_MAX_ITERATIONS, MIN_ITERATIONS, PRECISION,
    REGRET_CHECK_INCREASE_T, REGRET_CHECK_START_T, SHRINK_ETA, SHRINK_REGRET,
};
use crate::data::Matrix;
use crate::errors::FairgradError;
use crate::lagrangian::{GapResult, Lagrangian};
use crate::learner::{Learner, Predictor};
use crate::moments::Moment;
use crate::utils::{
    sample_std, validate_labels, validate_positive_float_parameter, validate_positive_int_parameter,
    validate_rows,
};
use log::{debug, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Hyperparameters of the reduction. All fields fall back to defaults when
/// absent from a serialized config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpGradConfig {
    /// Allowed constraint violation; the dual budget is its inverse.
    #[serde(default = "default_eps")]
    pub eps: f64,
    /// Iteration budget.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    /// Duality-gap convergence threshold. When absent it is derived at the
    /// first iteration from the statistical uncertainty of the error.
    #[serde(default)]
    pub nu: Option<f64>,
    /// Initial learning rate is `eta_mul / B`.
    #[serde(default = "default_eta_mul")]
    pub eta_mul: f64,
    /// Whether to run the LP refinement from the second iteration on.
    #[serde(default = "default_run_lp_step")]
    pub run_lp_step: bool,
    /// Convergence is not declared before this many iterations.
    #[serde(default = "default_min_iterations")]
    pub min_iterations: usize,
    /// First iteration at which learning-rate regret is checked.
    #[serde(default = "default_regret_check_start")]
    pub regret_check_start: usize,
    /// Geometric spacing between regret checkpoints, must exceed 1.
    #[serde(default = "default_regret_check_increase")]
    pub regret_check_increase: f64,
    /// Regret is deemed stalled when the best gap has not shrunk by this
    /// factor since the previous checkpoint.
    #[serde(default = "default_shrink_regret")]
    pub shrink_regret: f64,
    /// Learning-rate multiplier applied on a stalled checkpoint.
    #[serde(default = "default_shrink_eta")]
    pub shrink_eta: f64,
    /// Seed for the randomized predict threshold.
    #[serde(default)]
    pub seed: u64,
}

fn default_eps() -> f64 {
    DEFAULT_EPS
}
fn default_max_iterations() -> usize {
    DEFAULT_MAX_ITERATIONS
}
fn default_eta_mul() -> f64 {
    DEFAULT_ETA_MUL
}
fn default_run_lp_step() -> bool {
    true
}
fn default_min_iterations() -> usize {
    MIN_ITERATIONS
}
fn default_regret_check_start() -> usize {
    REGRET_CHECK_START_T
}
fn default_regret_check_increase() -> f64 {
    REGRET_CHECK_INCREASE_T
}
fn default_shrink_regret() -> f64 {
    SHRINK_REGRET
}
fn default_shrink_eta() -> f64 {
    SHRINK_ETA
}

impl Default for ExpGradConfig {
    fn default() -> Self {
        ExpGradConfig {
            eps: DEFAULT_EPS,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            nu: None,
            eta_mul: DEFAULT_ETA_MUL,
            run_lp_step: true,
            min_iterations: MIN_ITERATIONS,
            regret_check_start: REGRET_CHECK_START_T,
            regret_check_increase: REGRET_CHECK_INCREASE_T,
            shrink_regret: SHRINK_REGRET,
            shrink_eta: SHRINK_ETA,
            seed: 0,
        }
    }
}

impl ExpGradConfig {
    pub fn validate(&self) -> Result<(), FairgradError> {
        validate_positive_float_parameter(self.eps, "eps")?;
        validate_positive_int_parameter(self.max_iterations, "max_iterations")?;
        if let Some(nu) = self.nu {
            validate_positive_float_parameter(nu, "nu")?;
        }
        validate_positive_float_parameter(self.eta_mul, "eta_mul")?;
        validate_positive_int_parameter(self.regret_check_start, "regret_check_start")?;
        if !(self.regret_check_increase > 1.0) {
            return Err(FairgradError::InvalidParameter(
                "regret_check_increase".to_string(),
                "a real value greater than 1".to_string(),
                self.regret_check_increase.to_string(),
            ));
        }
        for (value, name) in [
            (self.shrink_regret, "shrink_regret"),
            (self.shrink_eta, "shrink_eta"),
        ] {
            if !(value > 0.0 && value < 1.0) {
                return Err(FairgradError::InvalidParameter(
                    name.to_string(),
                    "a real value strictly between 0 and 1".to_string(),
                    value.to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// How a fit terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FitStatus {
    /// The duality gap dropped below the tolerance.
    Converged,
    /// The iteration budget ran out first.
    Exhausted,
}

/// Per-iteration winner between the averaged iterate and the LP refinement.
enum Candidate {
    Averaged {
        q: Vec<f64>,
        lambda: Vec<f64>,
        result: GapResult,
    },
    Refined {
        q: Vec<f64>,
        lambda: Vec<f64>,
        result: GapResult,
    },
}

impl Candidate {
    /// The LP refinement wins whenever its gap is at least as small as the
    /// averaged iterate's, ties included.
    fn select(
        averaged: (Vec<f64>, Vec<f64>, GapResult),
        refined: Option<(Vec<f64>, Vec<f64>, GapResult)>,
    ) -> Candidate {
        let (q_eg, lambda_eg, result_eg) = averaged;
        match refined {
            Some((q, lambda, result)) if result.gap() <= result_eg.gap() => {
                Candidate::Refined { q, lambda, result }
            }
            _ => Candidate::Averaged {
                q: q_eg,
                lambda: lambda_eg,
                result: result_eg,
            },
        }
    }

    fn into_parts(self) -> (Vec<f64>, Vec<f64>, GapResult) {
        match self {
            Candidate::Averaged { q, lambda, result } | Candidate::Refined { q, lambda, result } => {
                (q, lambda, result)
            }
        }
    }
}

/// Running tally of how often each classifier was the best response. The
/// normalized counts are the averaged primal iterate.
#[derive(Debug, Clone, Default)]
pub(crate) struct SelectionCounts {
    counts: Vec<f64>,
}

impl SelectionCounts {
    pub(crate) fn bump(&mut self, idx: usize, n_classifiers: usize) {
        if self.counts.len() < n_classifiers {
            self.counts.resize(n_classifiers, 0.0);
        }
        self.counts[idx] += 1.0;
    }

    pub(crate) fn distribution(&self) -> Vec<f64> {
        let total: f64 = self.counts.iter().sum();
        self.counts.iter().map(|c| c / total).collect()
    }
}

/// Everything the fit produced: the winning mixture, the discovered
/// classifiers with their cached evaluations, and the full iteration record.
pub struct ExpGradResult {
    /// Mixture weights over the discovered classifiers, sums to one.
    pub weights: Vec<f64>,
    /// Smallest duality gap reached.
    pub best_gap: f64,
    /// Iteration whose candidate won.
    pub best_iteration: usize,
    /// Last iteration executed.
    pub last_iteration: usize,
    /// Actual base-learner invocations, cache hits excluded.
    pub n_oracle_calls: usize,
    /// Wall-clock time of every oracle call, in call order.
    pub oracle_call_times: Vec<Duration>,
    /// Dual vector played at each iteration.
    pub lambda_history: Vec<Vec<f64>>,
    /// Chosen candidate's gap at each iteration.
    pub gaps: Vec<f64>,
    pub status: FitStatus,
    /// Convergence tolerance used, auto-derived when not configured.
    pub nu: f64,
    /// Dual vector of the winning candidate.
    pub best_lambda: Vec<f64>,
    /// Gap decomposition of the winning candidate.
    pub best_result: GapResult,
    /// Cached error of each discovered classifier.
    pub predictor_errors: Vec<f64>,
    /// Cached violation vector of each discovered classifier.
    pub predictor_gammas: Vec<Vec<f64>>,
    classifiers: Vec<Box<dyn Predictor>>,
}

impl ExpGradResult {
    pub fn n_classifiers(&self) -> usize {
        self.classifiers.len()
    }

    pub fn classifiers(&self) -> &[Box<dyn Predictor>] {
        &self.classifiers
    }

    /// Scores of the fitted mixture on `data`: the weight-averaged member
    /// predictions, in [0, 1]. Members with zero weight are skipped.
    pub fn mixture_scores(&self, data: &Matrix<f64>) -> Vec<f64> {
        let partials: Vec<Vec<f64>> = self
            .classifiers
            .par_iter()
            .zip(self.weights.par_iter())
            .filter(|(_, w)| **w > 0.0)
            .map(|(h, w)| h.predict(data).into_iter().map(|p| p * w).collect())
            .collect();
        let mut scores = vec![0.0; data.rows];
        for partial in partials {
            for (acc, v) in scores.iter_mut().zip(partial) {
                *acc += v;
            }
        }
        scores
    }
}

/// The reduction itself: wraps a base learner and a fairness moment, and
/// after `fit` exposes a randomized classifier honoring the constraints.
pub struct ExponentiatedGradient<L: Learner, M: Moment> {
    estimator: L,
    constraints: M,
    config: ExpGradConfig,
    result: Option<ExpGradResult>,
}

impl<L: Learner, M: Moment> ExponentiatedGradient<L, M> {
    pub fn new(estimator: L, constraints: M, config: ExpGradConfig) -> Result<Self, FairgradError> {
        config.validate()?;
        Ok(ExponentiatedGradient {
            estimator,
            constraints,
            config,
            result: None,
        })
    }

    pub fn config(&self) -> &ExpGradConfig {
        &self.config
    }

    /// Run the reduction on training data. `sensitive` holds one group label
    /// per row; `control` optionally stratifies the constraints into cohorts.
    pub fn fit(
        &mut self,
        data: &Matrix<f64>,
        y: &[f64],
        sensitive: &[String],
        control: Option<&[String]>,
    ) -> Result<(), FairgradError> {
        validate_labels(y)?;
        validate_rows("y", y.len(), data.rows)?;
        validate_rows("sensitive_features", sensitive.len(), data.rows)?;
        if let Some(control) = control {
            validate_rows("control_features", control.len(), data.rows)?;
        }
        self.constraints.load_data(y, sensitive, control)?;
        let result = run(&self.estimator, &self.constraints, &self.config, data, y)?;
        self.result = Some(result);
        Ok(())
    }

    pub fn result(&self) -> Option<&ExpGradResult> {
        self.result.as_ref()
    }

    /// Mixture scores in [0, 1], one per row.
    pub fn predict_proba(&self, data: &Matrix<f64>) -> Result<Vec<f64>, FairgradError> {
        let result = self
            .result
            .as_ref()
            .ok_or_else(|| FairgradError::NotFitted("predict_proba".to_string()))?;
        Ok(result.mixture_scores(data))
    }

    /// Randomized hard predictions: each row draws against its mixture score
    /// with a generator seeded from the config, so repeated calls agree.
    pub fn predict(&self, data: &Matrix<f64>) -> Result<Vec<f64>, FairgradError> {
        let scores = self.predict_proba(data)?;
        let mut rng = StdRng::seed_from_u64(self.config.seed);
        Ok(scores
            .into_iter()
            .map(|p| f64::from(u8::from(rng.gen::<f64>() < p)))
            .collect())
    }
}

/// Dual vector from the mirror-descent state: `B * exp(theta)` normalized
/// with an implicit zero-cost slack dimension reserving budget.
fn lambda_from_theta(theta: &[f64], b: f64) -> Vec<f64> {
    let m = theta.iter().cloned().fold(0.0_f64, f64::max);
    let exps: Vec<f64> = theta.iter().map(|t| (t - m).exp()).collect();
    let denom = (-m).exp() + exps.iter().sum::<f64>();
    exps.iter().map(|e| b * e / denom).collect()
}

fn run<L: Learner, M: Moment>(
    estimator: &L,
    constraints: &M,
    config: &ExpGradConfig,
    data: &Matrix<f64>,
    y: &[f64],
) -> Result<ExpGradResult, FairgradError> {
    let n = data.rows;
    let b = 1.0 / config.eps;
    let n_constraints = constraints.index().len();
    let mut lagrangian = Lagrangian::new(data, y, estimator, constraints, config.eps, b);

    let mut theta = vec![0.0; n_constraints];
    let mut lambda_sum = vec![0.0; n_constraints];
    let mut counts = SelectionCounts::default();

    let mut lambda_history: Vec<Vec<f64>> = Vec::new();
    let mut gaps_eg: Vec<f64> = Vec::new();
    let mut gaps: Vec<f64> = Vec::new();
    let mut qs: Vec<Vec<f64>> = Vec::new();
    let mut lambdas: Vec<Vec<f64>> = Vec::new();
    let mut results: Vec<GapResult> = Vec::new();

    let mut nu = config.nu.unwrap_or(0.0);
    let mut eta = config.eta_mul / b;
    let mut last_regret_checked = config.regret_check_start as f64;
    let mut last_gap = f64::INFINITY;
    let mut status = FitStatus::Exhausted;
    let mut last_iteration = 0;

    for t in 0..config.max_iterations {
        last_iteration = t;
        let lambda_vec = lambda_from_theta(&theta, b);
        for (acc, l_) in lambda_sum.iter_mut().zip(&lambda_vec) {
            *acc += l_;
        }
        let lambda_eg: Vec<f64> = lambda_sum.iter().map(|s| s / (t + 1) as f64).collect();
        lambda_history.push(lambda_vec.clone());

        let h_idx = lagrangian.best_h(&lambda_vec, t)?;

        if t == 0 {
            if config.nu.is_none() {
                // Half the standard error of the first best response's
                // training error, the finest gap the data can resolve.
                let scores = lagrangian.train_scores(h_idx);
                let residuals: Vec<f64> =
                    scores.iter().zip(y).map(|(s, y_)| (s - y_).abs()).collect();
                nu = ACCURACY_MUL * sample_std(&residuals) / (n as f64).sqrt();
            }
            info!(
                "fit: eps={}, B={:.6}, nu={:.6}, T={}, eta_min={:.9}",
                config.eps,
                b,
                nu,
                config.max_iterations,
                nu / (2.0 * b)
            );
        }

        let gamma_h = lagrangian.hs[h_idx].gamma.clone();
        counts.bump(h_idx, lagrangian.hs.len());
        let q_eg = counts.distribution();
        let result_eg = lagrangian.eval_gap(&q_eg, &lambda_eg, nu);
        let gap_eg = result_eg.gap();
        gaps_eg.push(gap_eg);

        let refined = if config.run_lp_step && t > 0 {
            Some(lagrangian.solve_linprog(nu, t)?)
        } else {
            None
        };
        let candidate = Candidate::select((q_eg, lambda_eg, result_eg), refined);
        let (q_t, lambda_t, result_t) = candidate.into_parts();
        let gap_t = result_t.gap();
        debug!(
            "iter={:03}: eta={:.6}, gap_EG={:.6}, gap={:.6}, err={:.4}, disp={:.4}",
            t,
            eta,
            gap_eg,
            gap_t,
            result_t.error,
            result_t
                .gamma
                .iter()
                .cloned()
                .fold(f64::NEG_INFINITY, f64::max)
        );
        gaps.push(gap_t);
        qs.push(q_t);
        lambdas.push(lambda_t);
        results.push(result_t);

        if gap_t < nu && t >= config.min_iterations {
            status = FitStatus::Converged;
            break;
        }

        if t as f64 >= last_regret_checked * config.regret_check_increase {
            let best_gap = gaps_eg.iter().cloned().fold(f64::INFINITY, f64::min);
            if best_gap > last_gap * config.shrink_regret {
                eta *= config.shrink_eta;
                debug!("iter={:03}: regret stalled, eta shrunk to {:.6}", t, eta);
            }
            last_regret_checked = t as f64;
            last_gap = best_gap;
        }

        for (th, g) in theta.iter_mut().zip(&gamma_h) {
            *th += eta * (g - config.eps);
        }
    }

    let min_gap = gaps.iter().cloned().fold(f64::INFINITY, f64::min);
    let best_iteration = gaps
        .iter()
        .rposition(|g| *g <= min_gap + PRECISION)
        .unwrap_or(0);
    let best_gap = gaps[best_iteration];

    let n_hs = lagrangian.hs.len();
    let mut weights = qs[best_iteration].clone();
    weights.resize(n_hs, 0.0);

    match status {
        FitStatus::Converged => info!(
            "fit converged at iteration {} with gap {:.6} < nu {:.6}, {} classifiers, {} oracle calls",
            last_iteration, best_gap, nu, n_hs, lagrangian.n_oracle_calls
        ),
        FitStatus::Exhausted => info!(
            "fit exhausted {} iterations, best gap {:.6} vs nu {:.6}, {} classifiers, {} oracle calls",
            config.max_iterations, best_gap, nu, n_hs, lagrangian.n_oracle_calls
        ),
    }

    let n_oracle_calls = lagrangian.n_oracle_calls;
    let oracle_call_times = std::mem::take(&mut lagrangian.oracle_call_times);
    let hs = std::mem::take(&mut lagrangian.hs);
    let mut predictor_errors = Vec::with_capacity(hs.len());
    let mut predictor_gammas = Vec::with_capacity(hs.len());
    let mut classifiers = Vec::with_capacity(hs.len());
    for record in hs {
        predictor_errors.push(record.error);
        predictor_gammas.push(record.gamma);
        classifiers.push(record.predictor);
    }

    Ok(ExpGradResult {
        weights,
        best_gap,
        best_iteration,
        last_iteration,
        n_oracle_calls,
        oracle_call_times,
        lambda_history,
        gaps,
        status,
        nu,
        best_lambda: lambdas[best_iteration].clone(),
        best_result: results[best_iteration].clone(),
        predictor_errors,
        predictor_gammas,
        classifiers,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lagrangian::eval_mixture;
    use crate::learner::DecisionStumpLearner;
    use crate::metrics;
    use crate::moments::UtilityParity;
    use approx::assert_relative_eq;

    // 200 rows in two equal groups with selection rates 0.3 and 0.7. Feature
    // 0 is the group indicator, feature 1 is the label with 10 symmetric
    // flips per group, keeping the rates intact while forcing a 10% error
    // floor on any feature-driven classifier.
    fn disparate_dataset() -> (Vec<f64>, Vec<f64>, Vec<String>) {
        let mut group_col = Vec::new();
        let mut signal_col = Vec::new();
        let mut y = Vec::new();
        let mut sensitive = Vec::new();
        for i in 0..200usize {
            let group = usize::from(i >= 100);
            let label = f64::from(u8::from(if group == 0 { i < 30 } else { i - 100 < 70 }));
            let flip = if group == 0 {
                i < 5 || (30..35).contains(&i)
            } else {
                (100..105).contains(&i) || (170..175).contains(&i)
            };
            let signal = if flip { 1.0 - label } else { label };
            group_col.push(group as f64);
            signal_col.push(signal);
            y.push(label);
            sensitive.push(if group == 0 { "a".to_string() } else { "b".to_string() });
        }
        let mut data = group_col;
        data.extend(signal_col);
        (data, y, sensitive)
    }

    fn fit_model(
        config: ExpGradConfig,
        constraints: UtilityParity,
    ) -> (
        ExponentiatedGradient<DecisionStumpLearner, UtilityParity>,
        Vec<f64>,
        Vec<f64>,
        Vec<String>,
    ) {
        let (data, y, sensitive) = disparate_dataset();
        let mut model = ExponentiatedGradient::new(DecisionStumpLearner, constraints, config).unwrap();
        {
            let matrix = Matrix::new(&data, 200, 2);
            model.fit(&matrix, &y, &sensitive, None).unwrap();
        }
        (model, data, y, sensitive)
    }

    #[test]
    fn test_converges_under_demographic_parity() {
        let config = ExpGradConfig {
            eps: 0.05,
            seed: 7,
            ..ExpGradConfig::default()
        };
        let (model, data, _y, sensitive) = fit_model(config, UtilityParity::demographic_parity());
        let r = model.result().unwrap();

        assert_eq!(r.status, FitStatus::Converged);
        assert!(r.best_gap < r.nu);
        assert!(r.nu > 0.0);
        assert_relative_eq!(r.weights.iter().sum::<f64>(), 1.0, epsilon = 1e-6);
        assert!(r.weights.iter().all(|w| *w >= 0.0));
        assert_eq!(r.gaps.len(), r.last_iteration + 1);
        assert_eq!(r.lambda_history.len(), r.last_iteration + 1);
        assert_eq!(r.oracle_call_times.len(), r.n_oracle_calls);

        // The mixture trades some accuracy for fairness but stays well clear
        // of the trivial 0.5.
        assert!(r.best_result.error >= 0.1 - 1e-9);
        assert!(r.best_result.error <= 0.35);
        let max_gamma = r
            .best_result
            .gamma
            .iter()
            .cloned()
            .fold(f64::NEG_INFINITY, f64::max);
        assert!(max_gamma <= 0.05 + r.nu + 1e-6, "violation {max_gamma}");

        let matrix = Matrix::new(&data, 200, 2);
        let scores = model.predict_proba(&matrix).unwrap();
        assert!(scores.iter().all(|p| (0.0..=1.0).contains(p)));
        let dp = metrics::demographic_parity_difference(&scores, &sensitive);
        assert!(dp <= 2.0 * (0.05 + r.nu) + 1e-6, "dp difference {dp}");
    }

    #[test]
    fn test_converges_with_majority_vote_learner() {
        // A feature-blind learner can only produce constant classifiers,
        // which are trivially fair; the fit converges onto them.
        let (data, y, sensitive) = disparate_dataset();
        let config = ExpGradConfig {
            eps: 0.05,
            ..ExpGradConfig::default()
        };
        let mut model = ExponentiatedGradient::new(
            crate::learner::MajorityVoteLearner,
            UtilityParity::demographic_parity(),
            config,
        )
        .unwrap();
        let matrix = Matrix::new(&data, 200, 2);
        model.fit(&matrix, &y, &sensitive, None).unwrap();
        let r = model.result().unwrap();
        assert_eq!(r.status, FitStatus::Converged);
        assert!(r.best_gap < r.nu);

        let scores = model.predict_proba(&matrix).unwrap();
        let dp = metrics::demographic_parity_difference(&scores, &sensitive);
        assert!(dp <= 0.05 + 2.0 * r.best_gap + 1e-6, "dp difference {dp}");
    }

    #[test]
    fn test_converges_under_tpr_parity_when_feasible() {
        // The error minimizer already satisfies TPR parity at eps = 0.1, so
        // the fit keeps it at (almost) full weight.
        let config = ExpGradConfig {
            eps: 0.1,
            ..ExpGradConfig::default()
        };
        let (model, _, _, _) = fit_model(config, UtilityParity::true_positive_rate_parity());
        let r = model.result().unwrap();
        assert_eq!(r.status, FitStatus::Converged);
        assert!(r.best_result.error <= 0.11);
    }

    #[test]
    fn test_single_iteration_budget_exhausts() {
        let config = ExpGradConfig {
            eps: 0.05,
            max_iterations: 1,
            ..ExpGradConfig::default()
        };
        let (model, _, _, _) = fit_model(config, UtilityParity::demographic_parity());
        let r = model.result().unwrap();
        assert_eq!(r.status, FitStatus::Exhausted);
        assert_eq!(r.last_iteration, 0);
        assert_eq!(r.gaps.len(), 1);
        assert_eq!(r.n_oracle_calls, 1);
    }

    #[test]
    fn test_tiny_eps_reports_exhausted_honestly() {
        let config = ExpGradConfig {
            eps: 1e-9,
            max_iterations: 5,
            run_lp_step: false,
            ..ExpGradConfig::default()
        };
        let (model, _, _, _) = fit_model(config, UtilityParity::demographic_parity());
        let r = model.result().unwrap();
        assert_eq!(r.status, FitStatus::Exhausted);
        assert!(r.best_gap.is_finite());
        assert!(r.nu > 0.0);
        assert!(r.best_gap > r.nu);
    }

    #[test]
    fn test_tiny_eps_lp_candidate_stays_honest() {
        // With a tiny violation budget the one-classifier hull at iteration 1
        // cannot absorb the violation. The LP refinement is on by default;
        // its lower-bound oracle calls must uncover the response outside the
        // hull and keep the reported gap large instead of letting the
        // restricted saddle certify itself with a zero gap.
        let config = ExpGradConfig {
            eps: 1e-9,
            max_iterations: 2,
            ..ExpGradConfig::default()
        };
        assert!(config.run_lp_step);
        let (model, _, _, _) = fit_model(config, UtilityParity::demographic_parity());
        let r = model.result().unwrap();
        assert_eq!(r.status, FitStatus::Exhausted);
        assert!(r.best_gap > r.nu, "gap {} vs nu {}", r.best_gap, r.nu);
        // The best response at the dual optimum added the group-indicator
        // stump to the arena.
        assert!(r.n_classifiers() >= 2);
    }

    #[test]
    fn test_deterministic_and_roundtrips_through_json() {
        let config: ExpGradConfig = serde_json::from_str(r#"{"eps":0.05,"seed":3}"#).unwrap();
        assert_eq!(config.max_iterations, crate::constants::DEFAULT_MAX_ITERATIONS);
        assert_eq!(config.nu, None);
        assert!(config.run_lp_step);

        let reparsed: ExpGradConfig =
            serde_json::from_str(&serde_json::to_string(&config).unwrap()).unwrap();
        assert_eq!(config, reparsed);

        let (model1, data, _, _) = fit_model(config.clone(), UtilityParity::demographic_parity());
        let (model2, _, _, _) = fit_model(reparsed, UtilityParity::demographic_parity());
        let r1 = model1.result().unwrap();
        let r2 = model2.result().unwrap();
        assert_eq!(r1.best_gap, r2.best_gap);
        assert_eq!(r1.weights, r2.weights);
        assert_eq!(r1.gaps, r2.gaps);

        let matrix = Matrix::new(&data, 200, 2);
        assert_eq!(model1.predict(&matrix).unwrap(), model2.predict(&matrix).unwrap());
    }

    #[test]
    fn test_best_iteration_reconstructs_from_caches() {
        let config = ExpGradConfig {
            eps: 0.05,
            ..ExpGradConfig::default()
        };
        let (model, _, _, _) = fit_model(config, UtilityParity::demographic_parity());
        let r = model.result().unwrap();

        let b = 1.0 / 0.05;
        let (l, l_high, gamma, error) = eval_mixture(
            &r.weights,
            &r.best_lambda,
            &r.predictor_errors,
            &r.predictor_gammas,
            0.05,
            b,
        );
        assert_relative_eq!(l, r.best_result.l, epsilon = 1e-9);
        assert_relative_eq!(l_high, r.best_result.l_high, epsilon = 1e-9);
        assert_relative_eq!(error, r.best_result.error, epsilon = 1e-9);
        for (a, b_) in gamma.iter().zip(&r.best_result.gamma) {
            assert_relative_eq!(a, b_, epsilon = 1e-9);
        }
        let gap = (l_high - l).max(l - r.best_result.l_low);
        assert_relative_eq!(gap, r.best_gap, epsilon = 1e-9);

        // Best iteration is the last one within precision of the minimum.
        let min_gap = r.gaps.iter().cloned().fold(f64::INFINITY, f64::min);
        assert!(r.best_gap <= min_gap + PRECISION);
        assert_eq!(
            r.best_iteration,
            r.gaps.iter().rposition(|g| *g <= min_gap + PRECISION).unwrap()
        );
    }

    struct AlwaysPositive;
    struct One;

    impl Predictor for One {
        fn predict(&self, data: &Matrix<f64>) -> Vec<f64> {
            vec![1.0; data.rows]
        }
    }

    impl Learner for AlwaysPositive {
        fn fit(
            &self,
            _data: &Matrix<f64>,
            _y: &[f64],
            _sample_weight: &[f64],
        ) -> Result<Box<dyn Predictor>, FairgradError> {
            Ok(Box::new(One))
        }
    }

    #[test]
    fn test_dual_insensitive_oracle_collapses_to_one_classifier() {
        let (data, y, sensitive) = disparate_dataset();
        let config = ExpGradConfig {
            eps: 0.05,
            max_iterations: 4,
            run_lp_step: false,
            ..ExpGradConfig::default()
        };
        let mut model =
            ExponentiatedGradient::new(AlwaysPositive, UtilityParity::demographic_parity(), config)
                .unwrap();
        let matrix = Matrix::new(&data, 200, 2);
        model.fit(&matrix, &y, &sensitive, None).unwrap();
        let r = model.result().unwrap();
        assert_eq!(r.status, FitStatus::Exhausted);
        assert_eq!(r.n_classifiers(), 1);
        assert_eq!(r.weights, vec![1.0]);
        assert_relative_eq!(r.best_result.error, 0.5);
    }

    struct Failing;

    impl Learner for Failing {
        fn fit(
            &self,
            _data: &Matrix<f64>,
            _y: &[f64],
            _sample_weight: &[f64],
        ) -> Result<Box<dyn Predictor>, FairgradError> {
            Err(FairgradError::Learner("synthetic failure".to_string()))
        }
    }

    #[test]
    fn test_failing_learner_surfaces_with_iteration() {
        let (data, y, sensitive) = disparate_dataset();
        let mut model = ExponentiatedGradient::new(
            Failing,
            UtilityParity::demographic_parity(),
            ExpGradConfig::default(),
        )
        .unwrap();
        let matrix = Matrix::new(&data, 200, 2);
        let err = model.fit(&matrix, &y, &sensitive, None).unwrap_err();
        assert!(matches!(err, FairgradError::LearnerFailure { iteration: 0, .. }));
    }

    #[test]
    fn test_invalid_inputs_rejected() {
        let bad = ExpGradConfig {
            eps: 0.0,
            ..ExpGradConfig::default()
        };
        let Err(err) = ExponentiatedGradient::new(
            DecisionStumpLearner,
            UtilityParity::demographic_parity(),
            bad,
        ) else {
            panic!("eps of zero must be rejected");
        };
        assert!(matches!(err, FairgradError::InvalidParameter(_, _, _)));

        let (data, y, sensitive) = disparate_dataset();
        let matrix = Matrix::new(&data, 200, 2);
        let mut model = ExponentiatedGradient::new(
            DecisionStumpLearner,
            UtilityParity::demographic_parity(),
            ExpGradConfig::default(),
        )
        .unwrap();

        let err = model.fit(&matrix, &y[..100], &sensitive, None).unwrap_err();
        assert!(matches!(err, FairgradError::DimensionMismatch(_, _, _)));

        let err = model.fit(&matrix, &y, &sensitive[..100], None).unwrap_err();
        assert!(matches!(err, FairgradError::DimensionMismatch(_, _, _)));

        let mut bad_y = y.clone();
        bad_y[17] = 0.5;
        let err = model.fit(&matrix, &bad_y, &sensitive, None).unwrap_err();
        assert!(matches!(err, FairgradError::InvalidLabel(17, _)));

        let err = model.predict(&matrix).unwrap_err();
        assert!(matches!(err, FairgradError::NotFitted(_)));
    }

    #[test]
    fn test_lambda_from_theta() {
        let b = 20.0;
        let lambda = lambda_from_theta(&[0.0; 4], b);
        for l_ in &lambda {
            assert_relative_eq!(*l_, b / 5.0, epsilon = 1e-12);
        }

        // Large positive state saturates toward the budget without overflow.
        let lambda = lambda_from_theta(&[800.0, 0.0], 10.0);
        assert!(lambda.iter().all(|l_| l_.is_finite()));
        assert_relative_eq!(lambda[0], 10.0, epsilon = 1e-9);
        assert!(lambda[1] < 1e-9);
        assert!(lambda.iter().sum::<f64>() <= 10.0 + 1e-9);
    }

    fn gap_result_with(l_low: f64, l: f64, l_high: f64) -> GapResult {
        GapResult {
            l_low,
            l,
            l_high,
            gamma: vec![0.0],
            error: 0.0,
            nu: 1e-3,
        }
    }

    #[test]
    fn test_lp_candidate_wins_gap_ties() {
        let averaged = (vec![1.0], vec![0.0], gap_result_with(0.0, 0.5, 1.0));
        let tied = Some((vec![0.5, 0.5], vec![0.1], gap_result_with(0.0, 0.5, 1.0)));
        assert!(matches!(
            Candidate::select(averaged, tied),
            Candidate::Refined { .. }
        ));

        let averaged = (vec![1.0], vec![0.0], gap_result_with(0.0, 0.5, 1.0));
        let worse = Some((vec![0.5, 0.5], vec![0.1], gap_result_with(0.0, 0.5, 2.0)));
        assert!(matches!(
            Candidate::select(averaged, worse),
            Candidate::Averaged { .. }
        ));

        let averaged = (vec![1.0], vec![0.0], gap_result_with(0.0, 0.5, 1.0));
        assert!(matches!(
            Candidate::select(averaged, None),
            Candidate::Averaged { .. }
        ));
    }

    #[test]
    fn test_selection_counts_distribution() {
        let mut counts = SelectionCounts::default();
        counts.bump(0, 1);
        assert_eq!(counts.distribution(), vec![1.0]);
        counts.bump(1, 2);
        assert_eq!(counts.distribution(), vec![0.5, 0.5]);
        counts.bump(1, 2);
        let dist = counts.distribution();
        assert_relative_eq!(dist[0], 1.0 / 3.0, epsilon = 1e-12);
        assert_relative_eq!(dist[1], 2.0 / 3.0, epsilon = 1e-12);
    }
}
