// Modules
pub mod constants;
pub mod data;
pub mod errors;
pub mod expgrad;
pub mod lagrangian;
pub mod learner;
pub mod linprog;
pub mod metrics;
pub mod moments;
pub mod utils;

// Individual classes, and functions
pub use data::Matrix;
pub use errors::FairgradError;
pub use expgrad::{ExpGradConfig, ExpGradResult, ExponentiatedGradient, FitStatus};
pub use learner::{DecisionStumpLearner, Learner, MajorityVoteLearner, Predictor};
pub use moments::{ConstraintKey, Moment, UtilityParity};
