//! Errors
//!
//! Custom error types used throughout the `fairgrad` crate.
use thiserror::Error;

/// Errors that can occur while fitting or predicting with the reduction.
#[derive(Debug, Error)]
pub enum FairgradError {
    /// First value is the name of the parameter, second is expected, third is what was passed.
    #[error("Invalid parameter value passed for {0}, expected {1} but {2} provided.")]
    InvalidParameter(String, String, String),
    /// Inputs with differing row counts.
    #[error("Row count mismatch: {0} has {1} rows, but {2} rows were expected.")]
    DimensionMismatch(String, usize, usize),
    /// A label outside of {0, 1}.
    #[error("Label at row {0} is {1}, labels must be either 0 or 1.")]
    InvalidLabel(usize, f64),
    /// The base learner failed. Raised by `Learner` implementations.
    #[error("Base learner failed: {0}")]
    Learner(String),
    /// The base learner failed during a best-response call at a known iteration.
    #[error("Base learner failed at iteration {iteration}: {message}")]
    LearnerFailure { iteration: usize, message: String },
    /// The refinement linear program was infeasible or unbounded. The program
    /// is feasible by construction, so this is an internal invariant violation.
    #[error(
        "Linear program over {n_classifiers} classifiers and {n_constraints} constraints failed: {message}"
    )]
    InfeasibleProgram {
        n_classifiers: usize,
        n_constraints: usize,
        message: String,
    },
    /// A method requiring a fitted model was called before fit.
    #[error("The model must be fit before calling {0}.")]
    NotFitted(String),
}
