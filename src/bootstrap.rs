use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::dataset::Dataset;
use crate::stats::{mean, percentile, population_std};

pub const DEFAULT_ITERATIONS: usize = 10_000;

/// Summary of a bootstrap distribution. Rates are in percent, means in the
/// units of the input.
#[derive(Debug, Clone)]
pub struct BootstrapSummary {
    pub mean: f64,
    pub std: f64,
    pub ci_low: f64,
    pub ci_high: f64,
}

impl BootstrapSummary {
    fn from_distribution(distribution: &[f64], alpha: f64) -> Self {
        Self {
            mean: mean(distribution),
            std: population_std(distribution),
            ci_low: percentile(distribution, alpha / 2.0 * 100.0),
            ci_high: percentile(distribution, (1.0 - alpha / 2.0) * 100.0),
        }
    }

    fn zero() -> Self {
        Self {
            mean: 0.0,
            std: 0.0,
            ci_low: 0.0,
            ci_high: 0.0,
        }
    }

    fn nan() -> Self {
        Self {
            mean: f64::NAN,
            std: f64::NAN,
            ci_low: f64::NAN,
            ci_high: f64::NAN,
        }
    }
}

/// Bootstrap confidence interval for a rate over success/failure outcomes,
/// reported in percent. Empty input gives a zero summary.
pub fn bootstrap_rate(data: &[bool], n_iterations: usize, alpha: f64, seed: u64) -> BootstrapSummary {
    if data.is_empty() {
        return BootstrapSummary::zero();
    }
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let n = data.len();
    let mut rates = Vec::with_capacity(n_iterations);
    for _ in 0..n_iterations {
        let successes = (0..n).filter(|_| data[rng.gen_range(0..n)]).count();
        rates.push(successes as f64 / n as f64 * 100.0);
    }
    BootstrapSummary::from_distribution(&rates, alpha)
}

/// Bootstrap confidence interval for a mean. Non-finite inputs are dropped
/// first; nothing left gives a NaN summary.
pub fn bootstrap_mean(
    values: &[f64],
    n_iterations: usize,
    alpha: f64,
    seed: u64,
) -> BootstrapSummary {
    let clean: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if clean.is_empty() {
        return BootstrapSummary::nan();
    }
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let n = clean.len();
    let mut means = Vec::with_capacity(n_iterations);
    for _ in 0..n_iterations {
        let sum: f64 = (0..n).map(|_| clean[rng.gen_range(0..n)]).sum();
        means.push(sum / n as f64);
    }
    BootstrapSummary::from_distribution(&means, alpha)
}

/// Headline bootstrap results for one dataset: CE occurrence over the full
/// population, survival over the CE events, and the lambda mean.
#[derive(Debug, Clone)]
pub struct DatasetBootstrap {
    pub n_total: usize,
    pub n_ce: usize,
    pub n_lambda: usize,
    pub ce_rate: BootstrapSummary,
    pub survival: BootstrapSummary,
    pub lambda_mean: BootstrapSummary,
}

/// Bootstrap the dataset's headline rates. Each quantity draws from its own
/// seeded stream so the results are stable per dataset.
pub fn bootstrap_dataset(
    dataset: &Dataset,
    n_iterations: usize,
    alpha: f64,
    seed: u64,
) -> DatasetBootstrap {
    let ce_flags: Vec<bool> = dataset.records.iter().map(|r| r.ce_occurred).collect();
    let outcomes: Vec<bool> = dataset
        .ce_events()
        .iter()
        .map(|r| r.survived_ce)
        .collect();
    let lambdas: Vec<f64> = dataset
        .ce_events_with_lambda()
        .iter()
        .filter_map(|r| r.lambda_ce)
        .collect();

    DatasetBootstrap {
        n_total: ce_flags.len(),
        n_ce: outcomes.len(),
        n_lambda: lambdas.len(),
        ce_rate: bootstrap_rate(&ce_flags, n_iterations, alpha, seed),
        survival: bootstrap_rate(&outcomes, n_iterations, alpha, seed.wrapping_add(1)),
        lambda_mean: bootstrap_mean(&lambdas, n_iterations, alpha, seed.wrapping_add(2)),
    }
}

/// Bootstrapped survival probability per lambda bin.
#[derive(Debug, Clone)]
pub struct LambdaBinBootstrap {
    pub bin_label: String,
    pub lambda_min: f64,
    pub lambda_max: f64,
    pub n_systems: usize,
    pub survival: BootstrapSummary,
}

/// Bootstrap survival probabilities over lambda bins `[lo, hi)` given
/// (lambda, survived) pairs. Empty bins are skipped.
pub fn bootstrap_survival_by_lambda(
    events: &[(f64, bool)],
    bin_edges: &[f64],
    n_iterations: usize,
    alpha: f64,
    seed: u64,
) -> Vec<LambdaBinBootstrap> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut results = Vec::new();

    for window in bin_edges.windows(2) {
        let (lo, hi) = (window[0], window[1]);
        let bin: Vec<bool> = events
            .iter()
            .filter(|(lambda, _)| *lambda >= lo && *lambda < hi)
            .map(|(_, survived)| *survived)
            .collect();
        if bin.is_empty() {
            continue;
        }

        let n = bin.len();
        let mut rates = Vec::with_capacity(n_iterations);
        for _ in 0..n_iterations {
            let survived = (0..n).filter(|_| bin[rng.gen_range(0..n)]).count();
            rates.push(survived as f64 / n as f64 * 100.0);
        }

        results.push(LambdaBinBootstrap {
            bin_label: format!("{lo:.2}-{hi:.2}"),
            lambda_min: lo,
            lambda_max: hi,
            n_systems: n,
            survival: BootstrapSummary::from_distribution(&rates, alpha),
        });
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_bootstrap_is_reproducible() {
        let data: Vec<bool> = (0..40).map(|i| i % 5 == 0).collect();
        let a = bootstrap_rate(&data, 500, 0.05, 42);
        let b = bootstrap_rate(&data, 500, 0.05, 42);
        let c = bootstrap_rate(&data, 500, 0.05, 7);
        assert_eq!(a.mean, b.mean);
        assert_eq!(a.ci_low, b.ci_low);
        assert_ne!(a.mean, c.mean);
    }

    #[test]
    fn degenerate_samples_collapse_the_interval() {
        let all_true = vec![true; 30];
        let s = bootstrap_rate(&all_true, 200, 0.05, 1);
        assert_eq!(s.mean, 100.0);
        assert_eq!(s.ci_low, 100.0);
        assert_eq!(s.ci_high, 100.0);

        let all_false = vec![false; 30];
        let s = bootstrap_rate(&all_false, 200, 0.05, 1);
        assert_eq!(s.mean, 0.0);
        assert_eq!(s.ci_high, 0.0);
    }

    #[test]
    fn empty_inputs_are_handled() {
        let s = bootstrap_rate(&[], 100, 0.05, 1);
        assert_eq!(s.mean, 0.0);
        let s = bootstrap_mean(&[f64::NAN, f64::INFINITY], 100, 0.05, 1);
        assert!(s.mean.is_nan());
    }

    #[test]
    fn mean_bootstrap_stays_near_sample_mean() {
        let values: Vec<f64> = (0..50).map(|i| 0.1 + 0.002 * i as f64).collect();
        let s = bootstrap_mean(&values, 2000, 0.05, 3);
        let m = mean(&values);
        assert!((s.mean - m).abs() < 0.01);
        assert!(s.ci_low <= s.mean && s.mean <= s.ci_high);
    }

    #[test]
    fn dataset_bootstrap_covers_ce_occurrence() {
        let mut records = Vec::new();
        for i in 0..40 {
            let mut r = crate::dataset::tests::record(0.006);
            // half the population never reaches a CE
            if i % 2 == 0 {
                r.ce_occurred = false;
                r.lambda_ce = None;
                r.donor_state = None;
            }
            records.push(r);
        }
        let ds = Dataset {
            label: "Mid (alpha=0.5)".to_string(),
            z: 0.006,
            alpha_ce: 0.5,
            records,
        };

        let b = bootstrap_dataset(&ds, 1000, 0.05, 42);
        assert_eq!(b.n_total, 40);
        assert_eq!(b.n_ce, 20);
        assert_eq!(b.n_lambda, 20);
        assert!((b.ce_rate.mean - 50.0).abs() < 5.0);
        assert!(b.ce_rate.ci_low < 50.0 && b.ce_rate.ci_high > 50.0);
        // all CE events in the fixture merge
        assert_eq!(b.survival.mean, 0.0);

        let again = bootstrap_dataset(&ds, 1000, 0.05, 42);
        assert_eq!(b.ce_rate.mean, again.ce_rate.mean);
        assert_eq!(b.ce_rate.ci_high, again.ce_rate.ci_high);
    }

    #[test]
    fn lambda_bins_skip_empty_ranges() {
        let events = vec![(0.02, false), (0.04, true), (0.05, false), (0.9, true)];
        let edges = [0.0, 0.03, 0.06, 0.10, 1.0];
        let bins = bootstrap_survival_by_lambda(&events, &edges, 200, 0.05, 11);
        let labels: Vec<&str> = bins.iter().map(|b| b.bin_label.as_str()).collect();
        assert_eq!(labels, vec!["0.00-0.03", "0.03-0.06", "0.10-1.00"]);
        assert_eq!(bins[1].n_systems, 2);
    }
}
