use anyhow::{Context, Result};
use std::path::Path;

use crate::dataset::{fmt_opt, Dataset};
use crate::stats::{binomial_ci, mean, sample_std};

/// Lambda bin edges used throughout the survival breakdowns. The last bin
/// is an overflow catch-all; lambda above 1 is not expected physically.
pub const LAMBDA_BIN_EDGES: [f64; 7] = [0.0, 0.03, 0.06, 0.10, 0.15, 0.25, 1.0];

/// Mass-ratio bins: six linear bins over the sampled q range.
pub const Q_BIN_EDGES: [f64; 7] = [0.4, 0.5, 0.6, 0.7, 0.8, 0.9, 1.0];

/// Orbital-period bins: six log-spaced bins over the sampled period range,
/// in days.
pub fn period_bin_edges() -> [f64; 7] {
    let lo = 50.0f64.log10();
    let hi = 5000.0f64.log10();
    let mut edges = [0.0; 7];
    for (i, edge) in edges.iter_mut().enumerate() {
        *edge = 10f64.powf(lo + (hi - lo) * i as f64 / 6.0);
    }
    edges
}

/// Per-dataset headline numbers: CE incidence, survival, and the lambda
/// distribution, with exact binomial intervals in percent.
#[derive(Debug, Clone)]
pub struct DatasetSummary {
    pub label: String,
    pub z: f64,
    pub alpha_ce: f64,
    pub n_total: usize,
    pub n_ce: usize,
    pub ce_rate: f64,
    pub ce_rate_ci: (f64, f64),
    pub n_survived: usize,
    pub survival_rate: f64,
    pub survival_ci: (f64, f64),
    pub n_with_lambda: usize,
    pub lambda_mean: Option<f64>,
    pub lambda_std: Option<f64>,
    pub lambda_min: Option<f64>,
    pub lambda_max: Option<f64>,
}

pub fn summarize(dataset: &Dataset, alpha: f64) -> DatasetSummary {
    let n_total = dataset.records.len();
    let n_ce = dataset.ce_events().len();
    let n_survived = dataset.survivors();

    let lambdas: Vec<f64> = dataset
        .ce_events_with_lambda()
        .iter()
        .filter_map(|r| r.lambda_ce)
        .collect();

    let (lambda_mean, lambda_std, lambda_min, lambda_max) = if lambdas.is_empty() {
        (None, None, None, None)
    } else {
        (
            Some(mean(&lambdas)),
            Some(sample_std(&lambdas)).filter(|s| s.is_finite()),
            lambdas.iter().copied().reduce(f64::min),
            lambdas.iter().copied().reduce(f64::max),
        )
    };

    DatasetSummary {
        label: dataset.label.clone(),
        z: dataset.z,
        alpha_ce: dataset.alpha_ce,
        n_total,
        n_ce,
        ce_rate: rate(n_ce, n_total),
        ce_rate_ci: binomial_ci(n_ce, n_total, alpha),
        n_survived,
        survival_rate: rate(n_survived, n_ce),
        survival_ci: binomial_ci(n_survived, n_ce, alpha),
        n_with_lambda: lambdas.len(),
        lambda_mean,
        lambda_std,
        lambda_min,
        lambda_max,
    }
}

fn rate(k: usize, n: usize) -> f64 {
    if n == 0 {
        0.0
    } else {
        k as f64 / n as f64 * 100.0
    }
}

/// One bin of a binned survival breakdown.
#[derive(Debug, Clone)]
pub struct SurvivalBin {
    pub bin_label: String,
    pub lo: f64,
    pub hi: f64,
    pub n_systems: usize,
    pub n_survived: usize,
    pub survival_rate: f64,
    pub ci: (f64, f64),
}

fn bin_survival(events: &[(f64, bool)], edges: &[f64], alpha: f64, label_dp: usize) -> Vec<SurvivalBin> {
    let mut bins = Vec::new();
    for window in edges.windows(2) {
        let (lo, hi) = (window[0], window[1]);
        let in_bin: Vec<bool> = events
            .iter()
            .filter(|(v, _)| *v >= lo && *v < hi)
            .map(|(_, s)| *s)
            .collect();
        if in_bin.is_empty() {
            continue;
        }
        let n = in_bin.len();
        let k = in_bin.iter().filter(|s| **s).count();
        bins.push(SurvivalBin {
            bin_label: format!("{lo:.label_dp$}-{hi:.label_dp$}"),
            lo,
            hi,
            n_systems: n,
            n_survived: k,
            survival_rate: rate(k, n),
            ci: binomial_ci(k, n, alpha),
        });
    }
    bins
}

/// Survival fraction of CE events binned by lambda. Only events with a
/// finite lambda contribute.
pub fn lambda_binned_survival(dataset: &Dataset, alpha: f64) -> Vec<SurvivalBin> {
    let events: Vec<(f64, bool)> = dataset
        .ce_events_with_lambda()
        .iter()
        .filter_map(|r| r.lambda_ce.map(|l| (l, r.survived_ce)))
        .collect();
    bin_survival(&events, &LAMBDA_BIN_EDGES, alpha, 2)
}

/// Survival fraction of CE events binned by initial mass ratio.
pub fn mass_ratio_survival(dataset: &Dataset, alpha: f64) -> Vec<SurvivalBin> {
    let events: Vec<(f64, bool)> = dataset
        .ce_events()
        .iter()
        .map(|r| (r.q_initial, r.survived_ce))
        .collect();
    bin_survival(&events, &Q_BIN_EDGES, alpha, 1)
}

/// Survival fraction of CE events binned by initial orbital period (days,
/// log-spaced bins).
pub fn period_survival(dataset: &Dataset, alpha: f64) -> Vec<SurvivalBin> {
    let events: Vec<(f64, bool)> = dataset
        .ce_events()
        .iter()
        .map(|r| (r.p_initial, r.survived_ce))
        .collect();
    bin_survival(&events, &period_bin_edges(), alpha, 0)
}

/// Donor classification at CE onset, from the engine's stellar state
/// strings: shell vs core, split by the burning fuel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DonorClass {
    ShellHBurning,
    ShellHeBurning,
    CoreHBurning,
    CoreHeBurning,
    Other,
}

impl DonorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            DonorClass::ShellHBurning => "shell_H_burning",
            DonorClass::ShellHeBurning => "shell_He_burning",
            DonorClass::CoreHBurning => "core_H_burning",
            DonorClass::CoreHeBurning => "core_He_burning",
            DonorClass::Other => "other",
        }
    }
}

/// Classify a donor state string: shell vs core (central counts as core)
/// first, then the fuel. The He check is on the full `he_burning` token, so
/// hydrogen shell burners never shadow it.
pub fn classify_donor(state: &str) -> DonorClass {
    let s = state.to_ascii_lowercase();
    let he = s.contains("he_burning") || s.contains("he-burning");
    if s.contains("shell") {
        if he {
            DonorClass::ShellHeBurning
        } else {
            DonorClass::ShellHBurning
        }
    } else if s.contains("core") || s.contains("central") {
        if he {
            DonorClass::CoreHeBurning
        } else {
            DonorClass::CoreHBurning
        }
    } else {
        DonorClass::Other
    }
}

/// Survival and lambda statistics per raw donor state label.
#[derive(Debug, Clone)]
pub struct DonorStateRow {
    pub state: String,
    pub n_systems: usize,
    pub n_survived: usize,
    pub survival_rate: f64,
    pub ci: (f64, f64),
    pub lambda_mean: Option<f64>,
    pub lambda_std: Option<f64>,
}

/// Survival broken down by the engine's donor state labels, sorted by
/// occupancy. Lambda stats cover the events in each state that carry one.
pub fn donor_state_survival(dataset: &Dataset, alpha: f64) -> Vec<DonorStateRow> {
    let mut states: Vec<String> = Vec::new();
    for r in dataset.ce_events() {
        if let Some(s) = r.donor_state.as_deref() {
            if !states.iter().any(|known| known == s) {
                states.push(s.to_string());
            }
        }
    }

    let mut rows: Vec<DonorStateRow> = states
        .into_iter()
        .map(|state| {
            let in_state: Vec<&crate::dataset::CeRecord> = dataset
                .records
                .iter()
                .filter(|r| r.ce_occurred && r.donor_state.as_deref() == Some(state.as_str()))
                .collect();
            let n = in_state.len();
            let k = in_state.iter().filter(|r| r.survived_ce).count();
            let lambdas: Vec<f64> = in_state
                .iter()
                .filter_map(|r| r.lambda_ce.filter(|l| l.is_finite()))
                .collect();
            DonorStateRow {
                state,
                n_systems: n,
                n_survived: k,
                survival_rate: rate(k, n),
                ci: binomial_ci(k, n, alpha),
                lambda_mean: (!lambdas.is_empty()).then(|| mean(&lambdas)),
                lambda_std: Some(sample_std(&lambdas)).filter(|s| s.is_finite()),
            }
        })
        .collect();
    rows.sort_by(|a, b| b.n_systems.cmp(&a.n_systems));
    rows
}

/// Survival broken down by donor class.
#[derive(Debug, Clone)]
pub struct DonorBreakdown {
    pub class: DonorClass,
    pub n_systems: usize,
    pub n_survived: usize,
    pub survival_rate: f64,
    pub ci: (f64, f64),
}

pub fn donor_class_survival(dataset: &Dataset, alpha: f64) -> Vec<DonorBreakdown> {
    let classes = [
        DonorClass::ShellHBurning,
        DonorClass::ShellHeBurning,
        DonorClass::CoreHBurning,
        DonorClass::CoreHeBurning,
        DonorClass::Other,
    ];
    let events: Vec<(DonorClass, bool)> = dataset
        .ce_events()
        .iter()
        .filter_map(|r| {
            r.donor_state
                .as_deref()
                .map(|s| (classify_donor(s), r.survived_ce))
        })
        .collect();

    classes
        .iter()
        .filter_map(|class| {
            let in_class: Vec<bool> = events
                .iter()
                .filter(|(c, _)| c == class)
                .map(|(_, s)| *s)
                .collect();
            if in_class.is_empty() {
                return None;
            }
            let n = in_class.len();
            let k = in_class.iter().filter(|s| **s).count();
            Some(DonorBreakdown {
                class: *class,
                n_systems: n,
                n_survived: k,
                survival_rate: rate(k, n),
                ci: binomial_ci(k, n, alpha),
            })
        })
        .collect()
}

pub fn write_summary_csv(path: &Path, summaries: &[DatasetSummary]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    writer.write_record([
        "dataset",
        "Z",
        "alpha_CE",
        "n_total",
        "n_CE",
        "CE_rate_pct",
        "CE_rate_ci_low",
        "CE_rate_ci_high",
        "n_survived",
        "survival_pct",
        "survival_ci_low",
        "survival_ci_high",
        "n_with_lambda",
        "lambda_mean",
        "lambda_std",
        "lambda_min",
        "lambda_max",
    ])?;
    for s in summaries {
        writer.write_record([
            s.label.clone(),
            format!("{}", s.z),
            format!("{}", s.alpha_ce),
            s.n_total.to_string(),
            s.n_ce.to_string(),
            format!("{:.4}", s.ce_rate),
            format!("{:.4}", s.ce_rate_ci.0),
            format!("{:.4}", s.ce_rate_ci.1),
            s.n_survived.to_string(),
            format!("{:.4}", s.survival_rate),
            format!("{:.4}", s.survival_ci.0),
            format!("{:.4}", s.survival_ci.1),
            s.n_with_lambda.to_string(),
            fmt_opt(s.lambda_mean),
            fmt_opt(s.lambda_std),
            fmt_opt(s.lambda_min),
            fmt_opt(s.lambda_max),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_bins_csv(path: &Path, dataset_label: &str, bins: &[SurvivalBin]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    writer.write_record([
        "dataset",
        "bin",
        "bin_low",
        "bin_high",
        "n_systems",
        "n_survived",
        "survival_pct",
        "ci_low",
        "ci_high",
    ])?;
    for bin in bins {
        writer.write_record([
            dataset_label.to_string(),
            bin.bin_label.clone(),
            format!("{:.6}", bin.lo),
            format!("{:.6}", bin.hi),
            bin.n_systems.to_string(),
            bin.n_survived.to_string(),
            format!("{:.4}", bin.survival_rate),
            format!("{:.4}", bin.ci.0),
            format!("{:.4}", bin.ci.1),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_donor_class_csv(
    path: &Path,
    dataset_label: &str,
    rows: &[DonorBreakdown],
) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    writer.write_record([
        "dataset",
        "donor_class",
        "n_systems",
        "n_survived",
        "survival_pct",
        "ci_low",
        "ci_high",
    ])?;
    for row in rows {
        writer.write_record([
            dataset_label.to_string(),
            row.class.as_str().to_string(),
            row.n_systems.to_string(),
            row.n_survived.to_string(),
            format!("{:.4}", row.survival_rate),
            format!("{:.4}", row.ci.0),
            format!("{:.4}", row.ci.1),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_donor_state_csv(
    path: &Path,
    dataset_label: &str,
    rows: &[DonorStateRow],
) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    writer.write_record([
        "dataset",
        "donor_state",
        "n_systems",
        "n_survived",
        "survival_pct",
        "ci_low",
        "ci_high",
        "lambda_mean",
        "lambda_std",
    ])?;
    for row in rows {
        writer.write_record([
            dataset_label.to_string(),
            row.state.clone(),
            row.n_systems.to_string(),
            row.n_survived.to_string(),
            format!("{:.4}", row.survival_rate),
            format!("{:.4}", row.ci.0),
            format!("{:.4}", row.ci.1),
            fmt_opt(row.lambda_mean),
            fmt_opt(row.lambda_std),
        ])?;
    }
    writer.flush()?;
    Ok(())
}
