use statrs::distribution::{Beta, ContinuousCDF};

/// Exact (Clopper-Pearson) confidence interval for a binomial proportion,
/// returned as percent bounds.
///
/// Edge cases follow the study's convention: zero trials give (0, 0); at
/// k = 0 and k = n the rule-of-three style closed forms replace the beta
/// quantile so the interval never degenerates.
pub fn binomial_ci(k: usize, n: usize, alpha: f64) -> (f64, f64) {
    if n == 0 {
        return (0.0, 0.0);
    }
    let nf = n as f64;
    let (lower, upper) = if k == 0 {
        (0.0, 1.0 - alpha.powf(1.0 / nf))
    } else if k == n {
        (alpha.powf(1.0 / nf), 1.0)
    } else {
        let kf = k as f64;
        let lower = Beta::new(kf, nf - kf + 1.0)
            .map(|d| d.inverse_cdf(alpha / 2.0))
            .unwrap_or(0.0);
        let upper = Beta::new(kf + 1.0, nf - kf)
            .map(|d| d.inverse_cdf(1.0 - alpha / 2.0))
            .unwrap_or(1.0);
        (lower, upper)
    };
    (lower * 100.0, upper * 100.0)
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation (ddof = 0), matching what the bootstrap
/// distributions report.
pub fn population_std(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let m = mean(values);
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    var.sqrt()
}

/// Sample standard deviation (ddof = 1), used for raw lambda spreads.
pub fn sample_std(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return f64::NAN;
    }
    let m = mean(values);
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    var.sqrt()
}

/// Percentile of a sample by linear interpolation, `q` in [0, 100].
pub fn percentile(values: &[f64], q: f64) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let rank = q / 100.0 * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        return sorted[lo];
    }
    let frac = rank - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}
