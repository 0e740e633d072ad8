use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Flat per-binary result record, one row per simulated system. Column
/// names follow the study's established table schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CeRecord {
    #[serde(rename = "M1_initial")]
    pub m1_initial: f64,
    #[serde(rename = "M2_initial")]
    pub m2_initial: f64,
    #[serde(rename = "P_initial")]
    pub p_initial: f64,
    #[serde(rename = "Z")]
    pub z: f64,
    #[serde(rename = "q_initial")]
    pub q_initial: f64,
    #[serde(rename = "alpha_CE")]
    pub alpha_ce: f64,
    #[serde(rename = "CE_occurred")]
    pub ce_occurred: bool,
    #[serde(rename = "lambda_CE")]
    pub lambda_ce: Option<f64>,
    pub donor_state: Option<String>,
    #[serde(rename = "survived_CE")]
    pub survived_ce: bool,
    pub final_state: Option<String>,
    #[serde(rename = "final_M1")]
    pub final_m1: Option<f64>,
    #[serde(rename = "final_M2")]
    pub final_m2: Option<f64>,
    #[serde(rename = "final_P")]
    pub final_p: Option<f64>,
    /// Set when evolution failed; all outcome fields are unset then.
    pub error: Option<String>,
}

/// Columns a table must carry to count as a valid population result.
pub const REQUIRED_COLUMNS: [&str; 4] = ["M1_initial", "M2_initial", "P_initial", "Z"];

/// Outcome of a table validity check, used by the sweep runner to decide
/// whether a job can be skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableCheck {
    Valid { rows: usize },
    Invalid { reason: String },
}

pub fn write_records(path: &Path, records: &[CeRecord]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
    }

    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("failed to open CSV path {}", path.display()))?;
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn load_records(path: &Path) -> Result<Vec<CeRecord>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("failed to open result table {}", path.display()))?;
    let mut records = Vec::new();
    for row in reader.deserialize() {
        let record: CeRecord =
            row.with_context(|| format!("malformed row in {}", path.display()))?;
        records.push(record);
    }
    if records.is_empty() {
        bail!("result table {} is empty", path.display());
    }
    Ok(records)
}

/// Check that a table exists, parses, is non-empty, and carries the
/// required columns. Never errors; invalid tables report why.
pub fn check_table(path: &Path) -> TableCheck {
    let mut reader = match csv::Reader::from_path(path) {
        Ok(r) => r,
        Err(e) => {
            return TableCheck::Invalid {
                reason: format!("unreadable: {e}"),
            }
        }
    };

    let headers = match reader.headers() {
        Ok(h) => h.clone(),
        Err(e) => {
            return TableCheck::Invalid {
                reason: format!("bad header: {e}"),
            }
        }
    };
    let missing: Vec<&str> = REQUIRED_COLUMNS
        .iter()
        .copied()
        .filter(|col| !headers.iter().any(|h| h == *col))
        .collect();
    if !missing.is_empty() {
        return TableCheck::Invalid {
            reason: format!("missing columns: {}", missing.join(", ")),
        };
    }

    let mut rows = 0usize;
    for row in reader.records() {
        match row {
            Ok(_) => rows += 1,
            Err(e) => {
                return TableCheck::Invalid {
                    reason: format!("malformed row: {e}"),
                }
            }
        }
    }
    if rows == 0 {
        return TableCheck::Invalid {
            reason: "empty table".to_string(),
        };
    }
    TableCheck::Valid { rows }
}

/// A loaded result table plus its grouping keys.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub label: String,
    pub z: f64,
    pub alpha_ce: f64,
    pub records: Vec<CeRecord>,
}

impl Dataset {
    pub fn ce_events(&self) -> Vec<&CeRecord> {
        self.records.iter().filter(|r| r.ce_occurred).collect()
    }

    /// CE events that carry a finite lambda.
    pub fn ce_events_with_lambda(&self) -> Vec<&CeRecord> {
        self.records
            .iter()
            .filter(|r| r.ce_occurred && r.lambda_ce.map_or(false, f64::is_finite))
            .collect()
    }

    pub fn survivors(&self) -> usize {
        self.records.iter().filter(|r| r.survived_ce).count()
    }
}

/// Standard table of the study: (file name, label, Z, alpha, required).
pub const STANDARD_TABLES: [(&str, &str, f64, f64, bool); 7] = [
    ("ce_fixed_lambda.csv", "Solar", 0.014, 0.5, true),
    ("mid_Z_lambda.csv", "Mid", 0.006, 0.5, true),
    ("low_Z_lambda.csv", "Low", 0.001, 0.5, true),
    ("mid_Z_alpha1p0.csv", "Mid", 0.006, 1.0, false),
    ("mid_Z_alpha2p0.csv", "Mid", 0.006, 2.0, false),
    ("low_Z_alpha1p0.csv", "Low", 0.001, 1.0, false),
    ("low_Z_alpha2p0.csv", "Low", 0.001, 2.0, false),
];

/// Load the study's standard tables from `data_dir`. Required tables must
/// load; alpha-sweep tables are skipped silently when absent unless
/// `include_alpha` asks for them and they exist.
pub fn load_standard_datasets(data_dir: &Path, include_alpha: bool) -> Result<Vec<Dataset>> {
    let mut datasets = Vec::new();
    for (file, label, z, alpha, required) in STANDARD_TABLES {
        if !required && !include_alpha {
            continue;
        }
        let path: PathBuf = data_dir.join(file);
        if !path.exists() {
            if required {
                bail!(
                    "required table {} not found; run the population synthesis first",
                    path.display()
                );
            }
            continue;
        }
        let records = load_records(&path)?;
        datasets.push(Dataset {
            label: format!("{label} (alpha={alpha})"),
            z,
            alpha_ce: alpha,
            records,
        });
    }
    Ok(datasets)
}

/// Format an optional value for the explicit CSV writers, "NA" when unset.
pub fn fmt_opt(v: Option<f64>) -> String {
    match v {
        Some(x) if x.is_finite() => format!("{x:.6}"),
        _ => "NA".to_string(),
    }
}
