//! Lagrangian game state.
//!
//! Owns the growing arena of base classifiers discovered by best-response
//! calls, together with their cached constraint-violation vectors and errors.
//! Classifiers are referenced by integer index everywhere else. Also owns the
//! best-response cache that deduplicates oracle calls for cost vectors
//! already seen.
use crate::constants::{CACHE_KEY_SCALE, LOWER_BOUND_MULS, PRECISION};
use crate::data::Matrix;
use crate::errors::FairgradError;
use crate::learner::{Learner, Predictor};
use crate::linprog::{solve_dual, solve_primal};
use crate::moments::{ErrorRate, Moment};
use crate::utils::dot;
use hashbrown::HashMap;
use log::debug;
use std::time::{Duration, Instant};

/// One discovered base classifier with its cached evaluation. Immutable once
/// created, the gamma vector and error are computed exactly once.
pub struct ClassifierRecord {
    pub predictor: Box<dyn Predictor>,
    pub gamma: Vec<f64>,
    pub error: f64,
}

/// Duality-gap decomposition for one candidate mixture.
#[derive(Debug, Clone)]
pub struct GapResult {
    /// Lower bound on the Lagrangian value achievable against this dual.
    pub l_low: f64,
    /// Lagrangian value of the candidate mixture.
    pub l: f64,
    /// Lagrangian value if the dual spent its whole budget on the worst
    /// violated constraint.
    pub l_high: f64,
    /// Expected constraint violations of the mixture.
    pub gamma: Vec<f64>,
    /// Expected classification error of the mixture.
    pub error: f64,
    /// Convergence tolerance the result was computed under.
    pub nu: f64,
}

impl GapResult {
    /// Distance from the candidate to worst-case optimal play on both sides.
    pub fn gap(&self) -> f64 {
        (self.l_high - self.l).max(self.l - self.l_low)
    }
}

fn lagrangian_bounds(error: f64, gamma: &[f64], lambda: &[f64], eps: f64, b: f64) -> (f64, f64) {
    let priced: f64 = lambda.iter().zip(gamma).map(|(l_, g_)| l_ * (g_ - eps)).sum();
    let l = error + priced;
    let max_gamma = gamma.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let l_high = if max_gamma < eps {
        error
    } else {
        error + b * (max_gamma - eps)
    };
    (l, l_high)
}

/// Lagrangian value and bounds of a mixture over classifiers given by their
/// cached errors and gamma vectors. Returns `(l, l_high, gamma, error)`.
pub fn eval_mixture(
    q: &[f64],
    lambda: &[f64],
    errors: &[f64],
    gammas: &[Vec<f64>],
    eps: f64,
    b: f64,
) -> (f64, f64, Vec<f64>, f64) {
    let n_constraints = gammas.first().map_or(0, |g| g.len());
    let mut gamma = vec![0.0; n_constraints];
    let mut error = 0.0;
    for ((q_, e_), g_) in q.iter().zip(errors).zip(gammas) {
        error += q_ * e_;
        for (acc, v) in gamma.iter_mut().zip(g_) {
            *acc += q_ * v;
        }
    }
    let (l, l_high) = lagrangian_bounds(error, &gamma, lambda, eps, b);
    (l, l_high, gamma, error)
}

/// The two-player game state shared by the exponentiated-gradient driver and
/// the LP refinement step.
pub struct Lagrangian<'a, L: Learner, M: Moment> {
    data: &'a Matrix<'a, f64>,
    y: &'a [f64],
    learner: &'a L,
    moment: &'a M,
    objective: ErrorRate,
    obj_weights: Vec<f64>,
    eps: f64,
    b: f64,
    /// Discovered classifiers, append only.
    pub hs: Vec<ClassifierRecord>,
    /// Number of times the base learner was actually invoked.
    pub n_oracle_calls: usize,
    /// Wall-clock time of every oracle call, in call order.
    pub oracle_call_times: Vec<Duration>,
    cache: HashMap<Vec<i64>, usize>,
    last_linprog_n_hs: usize,
    last_linprog: Option<(Vec<f64>, Vec<f64>, GapResult)>,
}

impl<'a, L: Learner, M: Moment> Lagrangian<'a, L, M> {
    pub fn new(data: &'a Matrix<'a, f64>, y: &'a [f64], learner: &'a L, moment: &'a M, eps: f64, b: f64) -> Self {
        let objective = ErrorRate::new(y);
        let obj_weights = objective.signed_weights();
        Lagrangian {
            data,
            y,
            learner,
            moment,
            objective,
            obj_weights,
            eps,
            b,
            hs: Vec::new(),
            n_oracle_calls: 0,
            oracle_call_times: Vec::new(),
            cache: HashMap::new(),
            last_linprog_n_hs: 0,
            last_linprog: None,
        }
    }

    pub fn n_constraints(&self) -> usize {
        self.moment.index().len()
    }

    /// Scores of a discovered classifier on the training rows.
    pub fn train_scores(&self, idx: usize) -> Vec<f64> {
        self.hs[idx].predictor.predict(self.data)
    }

    /// Lagrangian value of a single discovered classifier against a dual.
    fn value_of(&self, idx: usize, lambda: &[f64]) -> f64 {
        let record = &self.hs[idx];
        record.error
            + lambda
                .iter()
                .zip(&record.gamma)
                .map(|(l_, g_)| l_ * (g_ - self.eps))
                .sum::<f64>()
    }

    fn eval(&self, q: &[f64], lambda: &[f64]) -> (f64, f64, Vec<f64>, f64) {
        let mut gamma = vec![0.0; self.n_constraints()];
        let mut error = 0.0;
        for (q_, record) in q.iter().zip(&self.hs) {
            error += q_ * record.error;
            for (acc, v) in gamma.iter_mut().zip(&record.gamma) {
                *acc += q_ * v;
            }
        }
        let (l, l_high) = lagrangian_bounds(error, &gamma, lambda, self.eps, self.b);
        (l, l_high, gamma, error)
    }

    /// Duality-gap decomposition of a mixture against a dual vector.
    ///
    /// The lower bound is the best discovered classifier's value against the
    /// dual, which bounds the mixture from below since the Lagrangian is
    /// linear in the mixture weights. Pure function of the inputs and the
    /// immutable classifier records.
    pub fn eval_gap(&self, q: &[f64], lambda: &[f64], nu: f64) -> GapResult {
        let (l, l_high, gamma, error) = self.eval(q, lambda);
        let l_low = (0..self.hs.len())
            .map(|idx| self.value_of(idx, lambda))
            .fold(l, f64::min);

        GapResult {
            l_low,
            l,
            l_high,
            gamma,
            error,
            nu,
        }
    }

    /// Best response of the oracle to a cost vector.
    ///
    /// Canonicalizes the cost vector and looks it up in the prior-call table;
    /// on a hit the cached index is returned without touching the learner. On
    /// a miss the data is re-weighted and re-labeled according to the signed
    /// weights, a fresh classifier is fit, and its gamma vector and error are
    /// computed and cached. The new classifier is only kept when it improves
    /// on every previously discovered one by more than the numeric precision.
    pub fn best_h(&mut self, lambda: &[f64], iteration: usize) -> Result<usize, FairgradError> {
        let key = cache_key(lambda);
        if let Some(idx) = self.cache.get(&key) {
            return Ok(*idx);
        }

        let constraint_weights = self.moment.signed_weights(lambda);
        let signed: Vec<f64> = self
            .obj_weights
            .iter()
            .zip(&constraint_weights)
            .map(|(o, c)| o + c)
            .collect();
        let red_y: Vec<f64> = signed.iter().map(|w| if *w > 0.0 { 1.0 } else { 0.0 }).collect();
        let total: f64 = signed.iter().map(|w| w.abs()).sum();
        let scale = if total > 0.0 { self.y.len() as f64 / total } else { 1.0 };
        let red_w: Vec<f64> = signed.iter().map(|w| w.abs() * scale).collect();

        let start = Instant::now();
        let predictor = self
            .learner
            .fit(self.data, &red_y, &red_w)
            .map_err(|e| FairgradError::LearnerFailure {
                iteration,
                message: e.to_string(),
            })?;
        self.oracle_call_times.push(start.elapsed());
        self.n_oracle_calls += 1;

        let scores = predictor.predict(self.data);
        let error = self.objective.error(&scores);
        let gamma = self.moment.gamma(&scores);
        let h_value = error + dot(lambda, &gamma);

        let mut best_idx = None;
        let mut best_value = f64::INFINITY;
        for idx in 0..self.hs.len() {
            let value = self.hs[idx].error + dot(lambda, &self.hs[idx].gamma);
            if value < best_value - PRECISION {
                best_idx = Some(idx);
                best_value = value;
            }
        }

        let idx = match best_idx {
            Some(idx) if h_value >= best_value - PRECISION => idx,
            _ => {
                self.hs.push(ClassifierRecord {
                    predictor,
                    gamma,
                    error,
                });
                self.hs.len() - 1
            }
        };
        debug!(
            "...best_h: iter={}, idx={}, value={:.6}, n_oracle_calls={}",
            iteration, idx, h_value, self.n_oracle_calls
        );
        self.cache.insert(key, idx);
        Ok(idx)
    }

    /// Saddle point of the game restricted to the convex hull of discovered
    /// classifiers, via the primal/dual linear programs.
    ///
    /// At its own dual optimum the restricted saddle certifies itself with a
    /// zero gap by strong duality, even when a better response exists outside
    /// the hull. The lower bound is therefore tightened with best responses
    /// at scaled copies of the dual optimum, stopping as soon as the gap is
    /// conclusive. Memoized on the number of discovered classifiers, so a
    /// best response that grows the arena invalidates the memo.
    pub fn solve_linprog(
        &mut self,
        nu: f64,
        iteration: usize,
    ) -> Result<(Vec<f64>, Vec<f64>, GapResult), FairgradError> {
        if self.last_linprog_n_hs == self.hs.len() {
            if let Some(cached) = &self.last_linprog {
                return Ok(cached.clone());
            }
        }
        let n_hs = self.hs.len();
        let errors: Vec<f64> = self.hs.iter().map(|h| h.error).collect();
        let gammas: Vec<Vec<f64>> = self.hs.iter().map(|h| h.gamma.clone()).collect();

        let (q, _slack) = solve_primal(&errors, &gammas, self.eps, self.b)?;
        let lambda = solve_dual(&errors, &gammas, self.eps, self.b)?;
        let mut result = self.eval_gap(&q, &lambda, nu);
        for mul in LOWER_BOUND_MULS {
            let scaled: Vec<f64> = lambda.iter().map(|v| mul * v).collect();
            let idx = self.best_h(&scaled, iteration)?;
            result.l_low = result.l_low.min(self.value_of(idx, &lambda));
            if result.gap() > nu + PRECISION {
                break;
            }
        }

        self.last_linprog_n_hs = n_hs;
        self.last_linprog = Some((q.clone(), lambda.clone(), result.clone()));
        Ok((q, lambda, result))
    }
}

fn cache_key(lambda: &[f64]) -> Vec<i64> {
    lambda
        .iter()
        .map(|v| {
            (v * CACHE_KEY_SCALE)
                .round()
                .clamp(i64::MIN as f64, i64::MAX as f64) as i64
        })
        .collect()
}
