//! Moment constraints.
//!
//! A moment turns labels plus a sensitive-feature assignment into a vector of
//! signed constraint violations ("gamma") for any classifier, and into the
//! per-row signed weights that reduce the constrained problem to weighted
//! binary classification. Each fairness constraint decomposes into a "+" and
//! a "-" signed half so that a one-sided cost vector can bound it from both
//! sides. Optional control features partition the data into cohorts that are
//! constrained independently.
use crate::errors::FairgradError;
use crate::utils::validate_rows;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Which signed half of a two-sided constraint an identifier refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sign {
    Plus,
    Minus,
}

/// Identifier of one signed constraint dimension.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConstraintKey {
    /// Event the rate is conditioned on, e.g. "all" or "label=1".
    pub event: String,
    /// Control-feature cohort, when control features are supplied.
    pub cohort: Option<String>,
    /// Sensitive-feature group.
    pub group: String,
    pub sign: Sign,
}

impl fmt::Display for ConstraintKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let sign = match self.sign {
            Sign::Plus => '+',
            Sign::Minus => '-',
        };
        match &self.cohort {
            Some(c) => write!(f, "{}|{}|{}|{}", sign, self.event, c, self.group),
            None => write!(f, "{}|{}|{}", sign, self.event, self.group),
        }
    }
}

/// The constraint oracle consumed by the Lagrangian game state.
///
/// `load_data` binds the training rows once per fit; the remaining methods
/// are pure functions of that bound data.
pub trait Moment {
    /// Bind labels, sensitive features and optional control features.
    fn load_data(&mut self, y: &[f64], sensitive: &[String], control: Option<&[String]>)
        -> Result<(), FairgradError>;
    /// The signed constraint identifiers, fixed after `load_data`.
    fn index(&self) -> &[ConstraintKey];
    /// Signed constraint violations of a classifier, given its scores on the
    /// training rows, in the order of `index`.
    fn gamma(&self, scores: &[f64]) -> Vec<f64>;
    /// Per-row signed weights of the cost vector `lambda` for the
    /// best-response reduction, scaled by the number of rows.
    fn signed_weights(&self, lambda: &[f64]) -> Vec<f64>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EventKind {
    /// Every row.
    All,
    /// Rows whose label equals the given value.
    Label(u8),
}

impl EventKind {
    fn contains(&self, y: f64) -> bool {
        match self {
            EventKind::All => true,
            EventKind::Label(l) => y == f64::from(*l),
        }
    }

    fn name(&self) -> String {
        match self {
            EventKind::All => "all".to_string(),
            EventKind::Label(l) => format!("label={}", l),
        }
    }
}

struct GroupCell {
    rows: Vec<usize>,
    prob: f64,
}

struct EventCell {
    rows: Vec<usize>,
    prob: f64,
    groups: Vec<GroupCell>,
}

/// Generic conditional-rate parity moment.
///
/// For every event, cohort and sensitive group present in the data, it bounds
/// `E[h | group, event, cohort] - E[h | event, cohort]` from both sides.
/// Demographic parity conditions on the trivial event; equalized odds
/// conditions on each label value.
pub struct UtilityParity {
    events: Vec<EventKind>,
    cells: Vec<EventCell>,
    index: Vec<ConstraintKey>,
    n: usize,
}

impl UtilityParity {
    fn new(events: Vec<EventKind>) -> Self {
        UtilityParity {
            events,
            cells: Vec::new(),
            index: Vec::new(),
            n: 0,
        }
    }

    /// Bound the difference between group-wise and overall selection rates.
    pub fn demographic_parity() -> Self {
        Self::new(vec![EventKind::All])
    }

    /// Bound the difference between group-wise and overall true positive rates.
    pub fn true_positive_rate_parity() -> Self {
        Self::new(vec![EventKind::Label(1)])
    }

    /// Bound the difference between group-wise and overall false positive rates.
    pub fn false_positive_rate_parity() -> Self {
        Self::new(vec![EventKind::Label(0)])
    }

    /// Bound both true and false positive rate differences.
    pub fn equalized_odds() -> Self {
        Self::new(vec![EventKind::Label(1), EventKind::Label(0)])
    }
}

impl Moment for UtilityParity {
    fn load_data(
        &mut self,
        y: &[f64],
        sensitive: &[String],
        control: Option<&[String]>,
    ) -> Result<(), FairgradError> {
        let n = y.len();
        validate_rows("sensitive_features", sensitive.len(), n)?;
        if let Some(control) = control {
            validate_rows("control_features", control.len(), n)?;
        }

        self.n = n;
        self.cells.clear();
        self.index.clear();

        let cohorts: Vec<Option<String>> = match control {
            Some(control) => {
                let unique: BTreeSet<&String> = control.iter().collect();
                unique.into_iter().map(|c| Some(c.clone())).collect()
            }
            None => vec![None],
        };

        for event in &self.events {
            for cohort in &cohorts {
                let rows: Vec<usize> = (0..n)
                    .filter(|i| {
                        event.contains(y[*i])
                            && match (&cohort, control) {
                                (Some(c), Some(control)) => &control[*i] == c,
                                _ => true,
                            }
                    })
                    .collect();
                if rows.is_empty() {
                    continue;
                }
                let prob = rows.len() as f64 / n as f64;

                let groups_present: BTreeSet<&String> = rows.iter().map(|i| &sensitive[*i]).collect();
                let mut groups = Vec::new();
                for group in groups_present {
                    let group_rows: Vec<usize> =
                        rows.iter().copied().filter(|i| &sensitive[*i] == group).collect();
                    let group_prob = group_rows.len() as f64 / n as f64;
                    for sign in [Sign::Plus, Sign::Minus] {
                        self.index.push(ConstraintKey {
                            event: event.name(),
                            cohort: cohort.clone(),
                            group: group.clone(),
                            sign,
                        });
                    }
                    groups.push(GroupCell {
                        rows: group_rows,
                        prob: group_prob,
                    });
                }
                self.cells.push(EventCell { rows, prob, groups });
            }
        }

        Ok(())
    }

    fn index(&self) -> &[ConstraintKey] {
        &self.index
    }

    fn gamma(&self, scores: &[f64]) -> Vec<f64> {
        let mut out = Vec::with_capacity(self.index.len());
        for cell in &self.cells {
            let cell_mean =
                cell.rows.iter().map(|i| scores[*i]).sum::<f64>() / cell.rows.len() as f64;
            for group in &cell.groups {
                let group_mean =
                    group.rows.iter().map(|i| scores[*i]).sum::<f64>() / group.rows.len() as f64;
                let g = group_mean - cell_mean;
                out.push(g);
                out.push(-g);
            }
        }
        out
    }

    fn signed_weights(&self, lambda: &[f64]) -> Vec<f64> {
        debug_assert_eq!(lambda.len(), self.index.len());
        let mut weights = vec![0.0; self.n];
        let mut k = 0;
        for cell in &self.cells {
            let mus: Vec<f64> = cell
                .groups
                .iter()
                .map(|_| {
                    let mu = lambda[k] - lambda[k + 1];
                    k += 2;
                    mu
                })
                .collect();
            let mu_sum: f64 = mus.iter().sum();
            for (group, mu) in cell.groups.iter().zip(&mus) {
                let adjust = mu_sum / cell.prob - mu / group.prob;
                for i in &group.rows {
                    weights[*i] += adjust;
                }
            }
        }
        weights
    }
}

/// Misclassification-error objective moment.
pub struct ErrorRate {
    y: Vec<f64>,
}

impl ErrorRate {
    pub fn new(y: &[f64]) -> Self {
        ErrorRate { y: y.to_vec() }
    }

    /// Expected 0/1 error of the given scores against the bound labels.
    pub fn error(&self, scores: &[f64]) -> f64 {
        self.y
            .iter()
            .zip(scores)
            .map(|(y_, s_)| (s_ - y_).abs())
            .sum::<f64>()
            / self.y.len() as f64
    }

    /// Signed weights of the error objective, scaled by the number of rows.
    pub fn signed_weights(&self) -> Vec<f64> {
        self.y.iter().map(|y_| 2.0 * y_ - 1.0).collect()
    }
}
