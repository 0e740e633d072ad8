use anyhow::{Context, Result};
use chrono::Local;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::process::Command;
use std::time::Duration;

use crate::config::{EngineConfig, SweepConfig, SweepJob};
use crate::dataset::{check_table, TableCheck};
use crate::engine::{run_with_timeout, RunOutcome};
use crate::runlog::RunLog;

/// Checkpoint entry for one job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobStatus {
    pub status: String,
    pub message: String,
    pub timestamp: String,
}

pub const STATUS_COMPLETE: &str = "complete";
pub const STATUS_FAILED: &str = "failed";

/// Job name -> status, persisted as JSON between runs.
pub type Checkpoint = BTreeMap<String, JobStatus>;

pub fn load_checkpoint(path: &Path) -> Checkpoint {
    let Ok(raw) = fs::read_to_string(path) else {
        return Checkpoint::new();
    };
    serde_json::from_str(&raw).unwrap_or_default()
}

pub fn save_checkpoint(path: &Path, checkpoint: &Checkpoint) -> Result<()> {
    let payload =
        serde_json::to_string_pretty(checkpoint).context("failed to serialize checkpoint")?;
    fs::write(path, payload)
        .with_context(|| format!("failed to write checkpoint {}", path.display()))
}

/// Arguments of the `run` subcommand invocation for one sweep job.
pub fn job_command_args(job: &SweepJob, engine: &EngineConfig) -> Vec<String> {
    let grid = &job.grid;
    let mut args = vec![
        "run".to_string(),
        "--metallicity".to_string(),
        job.metallicity.to_string(),
        "--alpha-ce".to_string(),
        job.alpha_ce.to_string(),
        "--n-systems".to_string(),
        job.n_systems.to_string(),
        "--output".to_string(),
        job.output.display().to_string(),
        "--m1-min".to_string(),
        grid.m1_min.to_string(),
        "--m1-max".to_string(),
        grid.m1_max.to_string(),
        "--m1-samples".to_string(),
        grid.m1_samples.to_string(),
        "--m2-min".to_string(),
        grid.m2_min.to_string(),
        "--m2-max".to_string(),
        grid.m2_max.to_string(),
        "--m2-samples".to_string(),
        grid.m2_samples.to_string(),
        "--p-min".to_string(),
        grid.p_min.to_string(),
        "--p-max".to_string(),
        grid.p_max.to_string(),
        "--p-samples".to_string(),
        grid.p_samples.to_string(),
        "--engine-cmd".to_string(),
        engine.command.clone(),
        "--engine-timeout-secs".to_string(),
        engine.timeout_secs.to_string(),
        "--quiet".to_string(),
    ];
    for arg in &engine.args {
        args.push("--engine-arg".to_string());
        args.push(arg.clone());
    }
    args
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SweepOptions {
    pub resume: bool,
    pub dry_run: bool,
    pub stop_on_error: bool,
    pub skip_checks: bool,
}

#[derive(Debug, Clone, Default)]
pub struct SweepReport {
    pub successes: usize,
    pub failures: usize,
    pub skipped: usize,
}

/// Split the configured jobs into those needing a run and those already
/// complete (valid output table, or checkpoint says complete).
pub fn plan_jobs<'a>(
    cfg: &'a SweepConfig,
    checkpoint: &Checkpoint,
    log: &mut RunLog,
) -> (Vec<&'a SweepJob>, Vec<&'a SweepJob>) {
    let mut to_run = Vec::new();
    let mut skipped = Vec::new();

    for job in &cfg.jobs {
        if job.output.exists() {
            match check_table(&job.output) {
                TableCheck::Valid { rows } => {
                    log.info(&format!(
                        "{}: already complete ({}; {rows} systems)",
                        job.name,
                        job.output.display()
                    ));
                    skipped.push(job);
                    continue;
                }
                TableCheck::Invalid { reason } => {
                    log.warn(&format!(
                        "{}: output exists but invalid ({reason}), will re-run",
                        job.name
                    ));
                }
            }
        }

        if checkpoint
            .get(&job.name)
            .is_some_and(|s| s.status == STATUS_COMPLETE)
        {
            log.info(&format!("{}: marked complete in checkpoint", job.name));
            skipped.push(job);
            continue;
        }

        to_run.push(job);
    }

    (to_run, skipped)
}

fn run_job(job: &SweepJob, cfg: &SweepConfig, log: &mut RunLog) -> (bool, String) {
    log.info(&format!("Starting: {}", job.name));
    log.info(&format!("  Metallicity: {}", job.metallicity));
    log.info(&format!("  Alpha CE: {}", job.alpha_ce));
    log.info(&format!("  Output: {}", job.output.display()));
    log.info(&format!("  Systems: {}", job.n_systems));

    let exe = match std::env::current_exe() {
        Ok(path) => path,
        Err(e) => return (false, format!("cannot locate own executable: {e}")),
    };
    let args = job_command_args(job, &cfg.engine);
    log.info(&format!("Command: {} {}", exe.display(), args.join(" ")));

    let mut command = Command::new(&exe);
    command.args(&args);

    let timeout = Duration::from_secs(cfg.job_timeout_secs);
    match run_with_timeout(command, None, timeout) {
        Ok(RunOutcome::Completed(output)) => {
            let minutes = output.elapsed.as_secs_f64() / 60.0;
            if output.status_code == Some(0) {
                log.info(&format!("Simulation completed in {minutes:.1} minutes"));
                match check_table(&job.output) {
                    TableCheck::Valid { .. } => (true, format!("Success ({minutes:.1} min)")),
                    TableCheck::Invalid { reason } => {
                        log.error(&format!("Output validation failed: {reason}"));
                        (false, "Output validation failed".to_string())
                    }
                }
            } else {
                log.error(&format!(
                    "Simulation failed with exit {:?}",
                    output.status_code
                ));
                log.error(&format!("stderr: {}", output.stderr.trim()));
                (false, format!("Exit code {:?}", output.status_code))
            }
        }
        Ok(RunOutcome::TimedOut) => {
            log.error(&format!(
                "Simulation timed out after {}s",
                cfg.job_timeout_secs
            ));
            (false, "Timeout".to_string())
        }
        Err(e) => {
            log.error(&format!("Unexpected error: {e:#}"));
            (false, e.to_string())
        }
    }
}

/// Run the configured sweep with checkpointing. Returns the per-job tally;
/// the caller decides how hard to fail on `failures > 0`.
pub fn run_sweep(cfg: &SweepConfig, opts: SweepOptions, log: &mut RunLog) -> Result<SweepReport> {
    log.info("ALPHA SWEEP - CHECKPOINTED RUNNER");

    if !opts.skip_checks {
        for table in &cfg.baseline_tables {
            if !table.exists() {
                log.warn(&format!(
                    "baseline table not found: {} (optional, used for comparison)",
                    table.display()
                ));
            }
        }
    }

    let mut checkpoint = if opts.resume {
        let cp = load_checkpoint(&cfg.checkpoint_file);
        if !cp.is_empty() {
            log.info(&format!(
                "Resuming from checkpoint: {} jobs tracked",
                cp.len()
            ));
        }
        cp
    } else {
        Checkpoint::new()
    };

    log.info("Scanning simulation status...");
    let (to_run, skipped) = plan_jobs(cfg, &checkpoint, log);

    log.info(&format!(
        "Simulation plan: {} to run, {} skipped (complete)",
        to_run.len(),
        skipped.len()
    ));

    if to_run.is_empty() {
        log.info("All simulations complete!");
        return Ok(SweepReport {
            skipped: skipped.len(),
            ..SweepReport::default()
        });
    }

    if opts.dry_run {
        log.info("DRY RUN - simulations to execute:");
        for job in &to_run {
            log.info(&format!("  - {}", job.name));
        }
        return Ok(SweepReport {
            skipped: skipped.len(),
            ..SweepReport::default()
        });
    }

    let mut report = SweepReport {
        skipped: skipped.len(),
        ..SweepReport::default()
    };

    let total = to_run.len();
    for (i, job) in to_run.into_iter().enumerate() {
        log.info(&format!("[{}/{total}] {}", i + 1, job.name));

        let (success, message) = run_job(job, cfg, log);

        checkpoint.insert(
            job.name.clone(),
            JobStatus {
                status: if success { STATUS_COMPLETE } else { STATUS_FAILED }.to_string(),
                message,
                timestamp: Local::now().to_rfc3339(),
            },
        );
        save_checkpoint(&cfg.checkpoint_file, &checkpoint)?;
        log.info(&format!(
            "Checkpoint saved to {}",
            cfg.checkpoint_file.display()
        ));

        if success {
            report.successes += 1;
        } else {
            report.failures += 1;
            if opts.stop_on_error {
                log.error("Stopping due to error (--stop-on-error)");
                break;
            }
        }
    }

    log.info("SIMULATION SWEEP COMPLETE");
    log.info(&format!(
        "Successes: {} | Failures: {} | Skipped: {}",
        report.successes, report.failures, report.skipped
    ));
    if report.failures > 0 {
        log.warn("Some simulations failed. Check the log for details.");
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GridSpec;
    use crate::dataset::write_records;
    use std::path::PathBuf;
    use tempfile::tempdir;

    fn job(name: &str, output: PathBuf) -> SweepJob {
        SweepJob {
            name: name.to_string(),
            metallicity: 0.001,
            alpha_ce: 1.0,
            n_systems: 200,
            output,
            grid: GridSpec::default(),
        }
    }

    fn sweep_cfg(dir: &Path, jobs: Vec<SweepJob>) -> SweepConfig {
        SweepConfig {
            checkpoint_file: dir.join("progress.json"),
            log_file: dir.join("sweep.log"),
            job_timeout_secs: 7200,
            baseline_tables: vec![],
            engine: EngineConfig {
                command: "posydon-evolve".to_string(),
                args: vec!["--grids".to_string(), "v2".to_string()],
                timeout_secs: 600,
            },
            jobs,
        }
    }

    #[test]
    fn checkpoint_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("progress.json");
        let mut cp = Checkpoint::new();
        cp.insert(
            "Low Z, alpha=1.0".to_string(),
            JobStatus {
                status: STATUS_COMPLETE.to_string(),
                message: "Success (91.4 min)".to_string(),
                timestamp: "2025-11-02T10:00:00+00:00".to_string(),
            },
        );
        save_checkpoint(&path, &cp).unwrap();
        assert_eq!(load_checkpoint(&path), cp);
    }

    #[test]
    fn missing_checkpoint_is_empty() {
        let dir = tempdir().unwrap();
        assert!(load_checkpoint(&dir.path().join("nope.json")).is_empty());
    }

    #[test]
    fn plan_skips_jobs_with_valid_output() {
        let dir = tempdir().unwrap();
        let done = dir.path().join("done.csv");
        write_records(&done, &[crate::dataset::tests::record(0.001)]).unwrap();

        let cfg = sweep_cfg(
            dir.path(),
            vec![job("done", done), job("pending", dir.path().join("pending.csv"))],
        );
        let mut log = RunLog::console_only();
        let (to_run, skipped) = plan_jobs(&cfg, &Checkpoint::new(), &mut log);
        assert_eq!(skipped.len(), 1);
        assert_eq!(to_run.len(), 1);
        assert_eq!(to_run[0].name, "pending");
    }

    #[test]
    fn plan_honors_checkpoint_completions() {
        let dir = tempdir().unwrap();
        let cfg = sweep_cfg(dir.path(), vec![job("a", dir.path().join("a.csv"))]);
        let mut cp = Checkpoint::new();
        cp.insert(
            "a".to_string(),
            JobStatus {
                status: STATUS_COMPLETE.to_string(),
                message: String::new(),
                timestamp: String::new(),
            },
        );
        let mut log = RunLog::console_only();
        let (to_run, skipped) = plan_jobs(&cfg, &cp, &mut log);
        assert!(to_run.is_empty());
        assert_eq!(skipped.len(), 1);
    }

    #[test]
    fn invalid_output_forces_rerun() {
        let dir = tempdir().unwrap();
        let bad = dir.path().join("bad.csv");
        std::fs::write(&bad, "a,b\n1,2\n").unwrap();
        let cfg = sweep_cfg(dir.path(), vec![job("bad", bad)]);
        let mut log = RunLog::console_only();
        let (to_run, skipped) = plan_jobs(&cfg, &Checkpoint::new(), &mut log);
        assert_eq!(to_run.len(), 1);
        assert!(skipped.is_empty());
    }

    #[test]
    fn job_args_cover_grid_and_engine() {
        let dir = tempdir().unwrap();
        let cfg = sweep_cfg(dir.path(), vec![job("a", dir.path().join("a.csv"))]);
        let args = job_command_args(&cfg.jobs[0], &cfg.engine);
        assert_eq!(args[0], "run");
        assert!(args.contains(&"--metallicity".to_string()));
        assert!(args.contains(&"0.001".to_string()));
        assert!(args.contains(&"--engine-cmd".to_string()));
        assert!(args.contains(&"posydon-evolve".to_string()));
        // engine args travel as repeated --engine-arg flags
        let idx = args.iter().position(|a| a == "--engine-arg").unwrap();
        assert_eq!(args[idx + 1], "--grids");
    }

    #[test]
    fn dry_run_executes_nothing() {
        let dir = tempdir().unwrap();
        let cfg = sweep_cfg(dir.path(), vec![job("a", dir.path().join("a.csv"))]);
        let mut log = RunLog::console_only();
        let report = run_sweep(
            &cfg,
            SweepOptions {
                dry_run: true,
                ..SweepOptions::default()
            },
            &mut log,
        )
        .unwrap();
        assert_eq!(report.successes + report.failures, 0);
        assert!(!cfg.checkpoint_file.exists());
        assert!(!dir.path().join("a.csv").exists());
    }
}
