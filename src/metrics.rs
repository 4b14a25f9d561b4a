//! Disaggregated fairness metrics for evaluating fitted classifiers.
//!
//! Scores may be hard 0/1 predictions or probabilities; every metric treats
//! them as expected positive rates.
use crate::utils::mean;
use std::collections::BTreeMap;

/// Fraction of positive predictions.
pub fn selection_rate(scores: &[f64]) -> f64 {
    mean(scores)
}

/// Selection rate per sensitive group, keyed and ordered by group label.
pub fn selection_rates_by_group(scores: &[f64], sensitive: &[String]) -> BTreeMap<String, f64> {
    grouped_mean(scores.iter().cloned().zip(sensitive))
}

/// Largest difference in selection rate between any two groups.
pub fn demographic_parity_difference(scores: &[f64], sensitive: &[String]) -> f64 {
    spread(selection_rates_by_group(scores, sensitive))
}

/// Fraction of actual positives predicted positive.
pub fn true_positive_rate(y: &[f64], scores: &[f64]) -> f64 {
    let positives: Vec<f64> = scores
        .iter()
        .zip(y)
        .filter(|(_, y_)| **y_ == 1.0)
        .map(|(s, _)| *s)
        .collect();
    mean(&positives)
}

/// True positive rate per sensitive group, keyed and ordered by group label.
pub fn true_positive_rates_by_group(
    y: &[f64],
    scores: &[f64],
    sensitive: &[String],
) -> BTreeMap<String, f64> {
    grouped_mean(
        scores
            .iter()
            .cloned()
            .zip(sensitive)
            .zip(y)
            .filter(|(_, y_)| **y_ == 1.0)
            .map(|(pair, _)| pair),
    )
}

/// Largest difference in true positive rate between any two groups.
pub fn true_positive_rate_difference(y: &[f64], scores: &[f64], sensitive: &[String]) -> f64 {
    spread(true_positive_rates_by_group(y, scores, sensitive))
}

fn grouped_mean<'a, I>(pairs: I) -> BTreeMap<String, f64>
where
    I: Iterator<Item = (f64, &'a String)>,
{
    let mut sums: BTreeMap<String, (f64, usize)> = BTreeMap::new();
    for (score, group) in pairs {
        let entry = sums.entry(group.clone()).or_insert((0.0, 0));
        entry.0 += score;
        entry.1 += 1;
    }
    sums.into_iter()
        .map(|(group, (sum, count))| (group, sum / count as f64))
        .collect()
}

fn spread(rates: BTreeMap<String, f64>) -> f64 {
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for rate in rates.values() {
        min = min.min(*rate);
        max = max.max(*rate);
    }
    if rates.is_empty() {
        0.0
    } else {
        max - min
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn groups(labels: &[&str]) -> Vec<String> {
        labels.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_selection_rates() {
        let scores = vec![1.0, 0.0, 1.0, 1.0, 0.0, 0.0];
        let sensitive = groups(&["a", "a", "a", "b", "b", "b"]);
        assert_relative_eq!(selection_rate(&scores), 0.5);

        let by_group = selection_rates_by_group(&scores, &sensitive);
        assert_relative_eq!(by_group["a"], 2.0 / 3.0, epsilon = 1e-12);
        assert_relative_eq!(by_group["b"], 1.0 / 3.0, epsilon = 1e-12);
        assert_relative_eq!(
            demographic_parity_difference(&scores, &sensitive),
            1.0 / 3.0,
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_probabilistic_scores() {
        let scores = vec![0.5, 0.5, 1.0, 0.0];
        let sensitive = groups(&["a", "a", "b", "b"]);
        let by_group = selection_rates_by_group(&scores, &sensitive);
        assert_relative_eq!(by_group["a"], 0.5);
        assert_relative_eq!(by_group["b"], 0.5);
        assert_relative_eq!(demographic_parity_difference(&scores, &sensitive), 0.0);
    }

    #[test]
    fn test_true_positive_rates() {
        let y = vec![1.0, 1.0, 0.0, 1.0, 1.0, 0.0];
        let scores = vec![1.0, 0.0, 1.0, 1.0, 1.0, 0.0];
        let sensitive = groups(&["a", "a", "a", "b", "b", "b"]);
        assert_relative_eq!(true_positive_rate(&y, &scores), 0.75);

        let by_group = true_positive_rates_by_group(&y, &scores, &sensitive);
        assert_relative_eq!(by_group["a"], 0.5);
        assert_relative_eq!(by_group["b"], 1.0);
        assert_relative_eq!(
            true_positive_rate_difference(&y, &scores, &sensitive),
            0.5
        );
    }

    #[test]
    fn test_empty_inputs() {
        assert_eq!(selection_rate(&[]), 0.0);
        assert_eq!(demographic_parity_difference(&[], &[]), 0.0);
    }
}
