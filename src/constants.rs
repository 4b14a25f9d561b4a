pub const DEFAULT_EPS: f64 = 0.01;
pub const DEFAULT_MAX_ITERATIONS: usize = 50;
pub const DEFAULT_ETA_MUL: f64 = 2.0;
// Multiplier on the error-measurement standard deviation when nu is auto-derived.
pub const ACCURACY_MUL: f64 = 0.5;
pub const MIN_ITERATIONS: usize = 5;
pub const REGRET_CHECK_START_T: usize = 5;
pub const REGRET_CHECK_INCREASE_T: f64 = 1.6;
pub const SHRINK_REGRET: f64 = 0.8;
pub const SHRINK_ETA: f64 = 0.8;
// Scaled copies of the dual optimum the oracle is asked about when
// tightening the gap lower bound.
pub const LOWER_BOUND_MULS: [f64; 4] = [1.0, 2.0, 5.0, 10.0];
pub const PRECISION: f64 = 1e-8;
// Decimal scale used to canonicalize cost vectors for the best-response cache.
pub const CACHE_KEY_SCALE: f64 = 1e8;
