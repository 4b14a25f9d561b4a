//! Linear-program refinement over the convex hull of discovered classifiers.
//!
//! The primal program finds the mixture Q minimizing expected error plus the
//! dual budget B times the worst constraint violation beyond eps:
//!
//! ```text
//! min  sum_h error_h * Q_h + B * z
//! s.t. sum_h (gamma_hj - eps) * Q_h <= z   for every constraint j
//!      sum_h Q_h = 1,  Q >= 0,  z >= 0
//! ```
//!
//! The dual program recovers the worst-case cost vector for that hull:
//!
//! ```text
//! max  mu
//! s.t. mu <= error_h + sum_j lambda_j * (gamma_hj - eps)   for every h
//!      sum_j lambda_j <= B,  lambda >= 0,  mu free
//! ```
//!
//! Both are feasible by construction, failure to solve is an internal
//! invariant violation.
use crate::errors::FairgradError;
use good_lp::{constraint, default_solver, variable, variables, Expression, Solution, SolverModel};

/// Solve the primal program, returning the optimal mixture weights and the
/// violation slack.
pub fn solve_primal(
    errors: &[f64],
    gammas: &[Vec<f64>],
    eps: f64,
    b: f64,
) -> Result<(Vec<f64>, f64), FairgradError> {
    let n_hs = errors.len();
    let n_constraints = gammas.first().map_or(0, |g| g.len());

    let mut vars = variables!();
    let q: Vec<_> = (0..n_hs).map(|_| vars.add(variable().min(0.0))).collect();
    let z = vars.add(variable().min(0.0));

    let objective = q
        .iter()
        .zip(errors)
        .map(|(v, e)| *e * *v)
        .sum::<Expression>()
        + b * z;

    let mut model = vars.minimise(objective).using(default_solver);
    for j in 0..n_constraints {
        let violation = q
            .iter()
            .zip(gammas)
            .map(|(v, g)| (g[j] - eps) * *v)
            .sum::<Expression>();
        model = model.with(constraint!(violation - z <= 0.0));
    }
    let total = q.iter().map(|v| 1.0 * *v).sum::<Expression>();
    model = model.with(constraint!(total == 1.0));

    let solution = model.solve().map_err(|e| FairgradError::InfeasibleProgram {
        n_classifiers: n_hs,
        n_constraints,
        message: format!("primal: {e}"),
    })?;

    let weights = q.iter().map(|v| solution.value(*v).max(0.0)).collect();
    Ok((weights, solution.value(z).max(0.0)))
}

/// Solve the dual program, returning the worst-case cost vector over the
/// hull of the given classifiers.
pub fn solve_dual(
    errors: &[f64],
    gammas: &[Vec<f64>],
    eps: f64,
    b: f64,
) -> Result<Vec<f64>, FairgradError> {
    let n_hs = errors.len();
    let n_constraints = gammas.first().map_or(0, |g| g.len());

    let mut vars = variables!();
    let lambda: Vec<_> = (0..n_constraints)
        .map(|_| vars.add(variable().min(0.0)))
        .collect();
    let mu = vars.add(variable());

    let mut model = vars.maximise(mu).using(default_solver);
    for (error, gamma) in errors.iter().zip(gammas) {
        let priced = lambda
            .iter()
            .zip(gamma)
            .map(|(l, g)| (g - eps) * *l)
            .sum::<Expression>();
        model = model.with(constraint!(mu - priced <= *error));
    }
    let budget = lambda.iter().map(|l| 1.0 * *l).sum::<Expression>();
    model = model.with(constraint!(budget <= b));

    let solution = model.solve().map_err(|e| FairgradError::InfeasibleProgram {
        n_classifiers: n_hs,
        n_constraints,
        message: format!("dual: {e}"),
    })?;

    Ok(lambda.iter().map(|l| solution.value(*l).max(0.0)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::dot;
    use approx::assert_relative_eq;

    // Two classifiers, one two-sided constraint (gamma, -gamma).
    // h0 is accurate but unfair, h1 is fair but useless.
    fn toy_hull() -> (Vec<f64>, Vec<Vec<f64>>) {
        let errors = vec![0.1, 0.5];
        let gammas = vec![vec![0.4, -0.4], vec![0.0, 0.0]];
        (errors, gammas)
    }

    #[test]
    fn test_primal_mixes_toward_feasibility() {
        let (errors, gammas) = toy_hull();
        let eps = 0.05;
        let b = 1.0 / eps;
        let (q, z) = solve_primal(&errors, &gammas, eps, b).unwrap();

        assert_relative_eq!(q.iter().sum::<f64>(), 1.0, epsilon = 1e-6);
        // With B = 20 and error slope 1, violating is never worth it.
        assert!(z < 1e-6);
        // The feasibility boundary is q0 * 0.4 <= eps, so q0 = 0.125.
        assert_relative_eq!(q[0], 0.125, epsilon = 1e-6);
        // Mixture violation stays within eps.
        let mixed_gamma = q[0] * gammas[0][0] + q[1] * gammas[1][0];
        assert!(mixed_gamma <= eps + 1e-9);
    }

    #[test]
    fn test_strong_duality_on_toy_hull() {
        let (errors, gammas) = toy_hull();
        let eps = 0.05;
        let b = 1.0 / eps;
        let (q, z) = solve_primal(&errors, &gammas, eps, b).unwrap();
        let lambda = solve_dual(&errors, &gammas, eps, b).unwrap();

        assert!(lambda.iter().all(|l| *l >= 0.0));
        assert!(lambda.iter().sum::<f64>() <= b + 1e-6);

        let primal = dot(&q, &errors) + b * z;
        let dual = errors
            .iter()
            .zip(&gammas)
            .map(|(e, g)| e + lambda.iter().zip(g).map(|(l, gj)| l * (gj - eps)).sum::<f64>())
            .fold(f64::INFINITY, f64::min);
        assert_relative_eq!(primal, dual, epsilon = 1e-6);
    }

    #[test]
    fn test_single_classifier_hull_is_degenerate() {
        let errors = vec![0.2];
        let gammas = vec![vec![0.3, -0.3]];
        let eps = 0.1;
        let b = 10.0;
        let (q, z) = solve_primal(&errors, &gammas, eps, b).unwrap();
        assert_relative_eq!(q[0], 1.0, epsilon = 1e-6);
        // The slack must absorb the full violation of the only vertex.
        assert_relative_eq!(z, 0.2, epsilon = 1e-6);

        let lambda = solve_dual(&errors, &gammas, eps, b).unwrap();
        // The dual spends its whole budget on the violated half.
        assert_relative_eq!(lambda.iter().sum::<f64>(), b, epsilon = 1e-6);
    }
}
