use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Sampling ranges for the initial-condition grid.
///
/// Primary and secondary masses are sampled linearly, the orbital period
/// logarithmically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridSpec {
    pub m1_min: f64,
    pub m1_max: f64,
    pub m1_samples: usize,
    pub m2_min: f64,
    pub m2_max: f64,
    pub m2_samples: usize,
    pub p_min: f64,
    pub p_max: f64,
    pub p_samples: usize,
}

impl Default for GridSpec {
    fn default() -> Self {
        Self {
            m1_min: 8.0,
            m1_max: 20.0,
            m1_samples: 10,
            m2_min: 8.0,
            m2_max: 20.0,
            m2_samples: 10,
            p_min: 100.0,
            p_max: 5000.0,
            p_samples: 10,
        }
    }
}

impl GridSpec {
    pub fn validate(&self) -> Result<()> {
        if self.m1_samples == 0 || self.m2_samples == 0 || self.p_samples == 0 {
            bail!("grid sample counts must all be > 0");
        }
        if self.m1_min <= 0.0 || self.m2_min <= 0.0 {
            bail!("grid masses must be > 0");
        }
        if self.m1_max < self.m1_min {
            bail!("m1_max must be >= m1_min");
        }
        if self.m2_max < self.m2_min {
            bail!("m2_max must be >= m2_min");
        }
        if self.p_min <= 0.0 {
            bail!("p_min must be > 0 (periods are log-spaced)");
        }
        if self.p_max < self.p_min {
            bail!("p_max must be >= p_min");
        }
        Ok(())
    }
}

/// External evolution engine invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Command to execute per binary.
    pub command: String,
    /// Fixed arguments prepended to every invocation.
    #[serde(default)]
    pub args: Vec<String>,
    /// Wall-clock limit per binary, in seconds.
    #[serde(default = "default_engine_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_engine_timeout_secs() -> u64 {
    600
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.command.trim().is_empty() {
            bail!("engine command must be non-empty");
        }
        if self.timeout_secs == 0 {
            bail!("engine timeout_secs must be > 0");
        }
        Ok(())
    }
}

/// Configuration for a single population run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PopulationConfig {
    #[serde(default)]
    pub grid: GridSpec,
    /// Metallicity values to evolve (one grid per value).
    pub metallicity: Vec<f64>,
    /// CE efficiency parameter passed to the engine.
    #[serde(default = "default_alpha_ce")]
    pub alpha_ce: f64,
    /// Randomly subsample this many systems from the full grid.
    #[serde(default)]
    pub n_systems: Option<usize>,
    /// Seed for the subsampling RNG.
    #[serde(default = "default_sample_seed")]
    pub sample_seed: u64,
    pub engine: EngineConfig,
}

fn default_alpha_ce() -> f64 {
    1.0
}

fn default_sample_seed() -> u64 {
    42
}

impl PopulationConfig {
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let cfg: PopulationConfig = toml::from_str(&raw)
            .with_context(|| format!("failed to parse TOML config: {}", path.display()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        self.grid.validate()?;
        self.engine.validate()?;
        if self.metallicity.is_empty() {
            bail!("metallicity list must be non-empty");
        }
        if self.metallicity.iter().any(|&z| z <= 0.0) {
            bail!("all metallicity values must be > 0");
        }
        if self.alpha_ce <= 0.0 {
            bail!("alpha_ce must be > 0");
        }
        if let Some(n) = self.n_systems {
            if n == 0 {
                bail!("n_systems must be > 0 when set");
            }
        }
        Ok(())
    }
}

/// One entry in the batch sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepJob {
    /// Human-readable job name, also the checkpoint key.
    pub name: String,
    pub metallicity: f64,
    pub alpha_ce: f64,
    pub n_systems: usize,
    /// Output CSV table for this job.
    pub output: PathBuf,
    #[serde(default)]
    pub grid: GridSpec,
}

/// Configuration for the checkpointed sweep runner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepConfig {
    #[serde(default = "default_checkpoint_file")]
    pub checkpoint_file: PathBuf,
    #[serde(default = "default_log_file")]
    pub log_file: PathBuf,
    /// Wall-clock limit per job, in seconds.
    #[serde(default = "default_job_timeout_secs")]
    pub job_timeout_secs: u64,
    /// Baseline tables expected to exist before the sweep; missing ones are
    /// reported but do not block.
    #[serde(default)]
    pub baseline_tables: Vec<PathBuf>,
    pub engine: EngineConfig,
    pub jobs: Vec<SweepJob>,
}

fn default_checkpoint_file() -> PathBuf {
    PathBuf::from("alpha_sweep_progress.json")
}

fn default_log_file() -> PathBuf {
    PathBuf::from("alpha_sweep.log")
}

fn default_job_timeout_secs() -> u64 {
    7200
}

impl SweepConfig {
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read sweep config: {}", path.display()))?;
        let cfg: SweepConfig = toml::from_str(&raw)
            .with_context(|| format!("failed to parse TOML sweep config: {}", path.display()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        self.engine.validate()?;
        if self.jobs.is_empty() {
            bail!("sweep requires at least one job");
        }
        if self.job_timeout_secs == 0 {
            bail!("job_timeout_secs must be > 0");
        }
        let mut names: Vec<&str> = self.jobs.iter().map(|j| j.name.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        if names.len() != self.jobs.len() {
            bail!("sweep job names must be unique (they key the checkpoint)");
        }
        for job in &self.jobs {
            if job.name.trim().is_empty() {
                bail!("sweep job names must be non-empty");
            }
            if job.metallicity <= 0.0 {
                bail!("job '{}': metallicity must be > 0", job.name);
            }
            if job.alpha_ce <= 0.0 {
                bail!("job '{}': alpha_ce must be > 0", job.name);
            }
            if job.n_systems == 0 {
                bail!("job '{}': n_systems must be > 0", job.name);
            }
            job.grid
                .validate()
                .with_context(|| format!("job '{}': invalid grid", job.name))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> EngineConfig {
        EngineConfig {
            command: "posydon-evolve".to_string(),
            args: vec![],
            timeout_secs: 60,
        }
    }

    #[test]
    fn default_grid_validates() {
        GridSpec::default().validate().unwrap();
    }

    #[test]
    fn inverted_mass_range_rejected() {
        let spec = GridSpec {
            m1_max: 5.0,
            ..GridSpec::default()
        };
        assert!(spec.validate().is_err());
    }

    #[test]
    fn zero_period_rejected() {
        let spec = GridSpec {
            p_min: 0.0,
            ..GridSpec::default()
        };
        assert!(spec.validate().is_err());
    }

    #[test]
    fn population_requires_metallicity() {
        let cfg = PopulationConfig {
            grid: GridSpec::default(),
            metallicity: vec![],
            alpha_ce: 1.0,
            n_systems: None,
            sample_seed: 42,
            engine: engine(),
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn sweep_rejects_duplicate_job_names() {
        let job = SweepJob {
            name: "Low Z, alpha=1.0".to_string(),
            metallicity: 0.001,
            alpha_ce: 1.0,
            n_systems: 200,
            output: PathBuf::from("data/low_Z_alpha1p0.csv"),
            grid: GridSpec::default(),
        };
        let cfg = SweepConfig {
            checkpoint_file: default_checkpoint_file(),
            log_file: default_log_file(),
            job_timeout_secs: 7200,
            baseline_tables: vec![],
            engine: engine(),
            jobs: vec![job.clone(), job],
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn population_toml_round_trip() {
        let cfg = PopulationConfig {
            grid: GridSpec::default(),
            metallicity: vec![0.014, 0.001],
            alpha_ce: 0.5,
            n_systems: Some(200),
            sample_seed: 42,
            engine: engine(),
        };
        let raw = toml::to_string(&cfg).unwrap();
        let parsed: PopulationConfig = toml::from_str(&raw).unwrap();
        parsed.validate().unwrap();
        assert_eq!(parsed.metallicity, cfg.metallicity);
        assert_eq!(parsed.n_systems, Some(200));
    }
}
