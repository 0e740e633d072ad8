use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};

use ce_popsyn::analysis::{
    donor_class_survival, donor_state_survival, lambda_binned_survival, mass_ratio_survival,
    period_survival, summarize, write_bins_csv, write_donor_class_csv, write_donor_state_csv,
    write_summary_csv, LAMBDA_BIN_EDGES,
};
use ce_popsyn::bootstrap::{
    bootstrap_dataset, bootstrap_survival_by_lambda, BootstrapSummary, DEFAULT_ITERATIONS,
};
use ce_popsyn::config::{EngineConfig, GridSpec, PopulationConfig, SweepConfig};
use ce_popsyn::dataset::{load_standard_datasets, write_records};
use ce_popsyn::engine::{EvolutionEngine, ExternalEngine};
use ce_popsyn::grid::{build_grid, subsample};
use ce_popsyn::history::{error_record, extract_record};
use ce_popsyn::obs::{
    catalog_z_stats, compare_with_catalog, critical_redshift, evolution_track,
    write_comparison_csv, write_dns_catalog_csv, write_evolution_csv,
};
use ce_popsyn::plot;
use ce_popsyn::runlog::RunLog;
use ce_popsyn::stats::binomial_ci;
use ce_popsyn::sweep::{run_sweep, SweepOptions};

#[derive(Debug, Parser)]
#[command(name = "ce-popsyn")]
#[command(about = "Common-envelope survival population synthesis and analysis")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Evolve a population grid through the external engine
    Run(RunArgs),
    /// Run the checkpointed alpha-sweep batch
    Sweep(SweepArgs),
    /// Survival and lambda analysis over the standard tables
    Analyze(AnalyzeArgs),
    /// Bootstrap confidence intervals for the headline rates
    Bootstrap(BootstrapArgs),
    /// Compare survival against the Galactic DNS population
    Compare(CompareArgs),
}

#[derive(Debug, Parser)]
struct RunArgs {
    /// Population config TOML; flags below override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Metallicity values to evolve (repeatable)
    #[arg(long)]
    metallicity: Vec<f64>,

    #[arg(long)]
    alpha_ce: Option<f64>,

    /// Subsample this many systems from the full grid
    #[arg(long)]
    n_systems: Option<usize>,

    /// Seed for the subsampling RNG
    #[arg(long)]
    seed: Option<u64>,

    /// Output CSV table
    #[arg(long, default_value = "data/population.csv")]
    output: PathBuf,

    #[arg(long)]
    m1_min: Option<f64>,
    #[arg(long)]
    m1_max: Option<f64>,
    #[arg(long)]
    m1_samples: Option<usize>,
    #[arg(long)]
    m2_min: Option<f64>,
    #[arg(long)]
    m2_max: Option<f64>,
    #[arg(long)]
    m2_samples: Option<usize>,
    #[arg(long)]
    p_min: Option<f64>,
    #[arg(long)]
    p_max: Option<f64>,
    #[arg(long)]
    p_samples: Option<usize>,

    /// External engine command
    #[arg(long)]
    engine_cmd: Option<String>,

    /// Fixed argument passed to the engine (repeatable)
    #[arg(long)]
    engine_arg: Vec<String>,

    /// Wall-clock limit per binary, in seconds
    #[arg(long)]
    engine_timeout_secs: Option<u64>,

    /// Suppress per-system progress output
    #[arg(long, default_value_t = false)]
    quiet: bool,
}

#[derive(Debug, Parser)]
struct SweepArgs {
    #[arg(long, default_value = "configs/sweep.toml")]
    config: PathBuf,

    /// Pick up from the existing checkpoint file
    #[arg(long, default_value_t = false)]
    resume: bool,

    /// List pending jobs without running them
    #[arg(long, default_value_t = false)]
    dry_run: bool,

    /// Abort the sweep at the first failed job
    #[arg(long, default_value_t = false)]
    stop_on_error: bool,

    /// Skip the baseline-table existence checks
    #[arg(long, default_value_t = false)]
    skip_checks: bool,
}

#[derive(Debug, Parser)]
struct AnalyzeArgs {
    /// Directory holding the standard result tables
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,

    #[arg(long, default_value = "output-analysis")]
    outdir: PathBuf,

    /// Include the alpha-sweep tables when present
    #[arg(long, default_value_t = false)]
    include_alpha: bool,

    /// Significance level for the binomial intervals
    #[arg(long, default_value_t = 0.05)]
    alpha: f64,

    /// Skip figure rendering
    #[arg(long, default_value_t = false)]
    no_figures: bool,
}

#[derive(Debug, Parser)]
struct BootstrapArgs {
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,

    #[arg(long, default_value = "output-bootstrap")]
    outdir: PathBuf,

    #[arg(long, default_value_t = false)]
    include_alpha: bool,

    #[arg(long, default_value_t = DEFAULT_ITERATIONS)]
    iterations: usize,

    #[arg(long, default_value_t = 0.05)]
    alpha: f64,

    #[arg(long, default_value_t = 42)]
    seed: u64,
}

#[derive(Debug, Parser)]
struct CompareArgs {
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,

    #[arg(long, default_value = "output-comparison")]
    outdir: PathBuf,

    #[arg(long, default_value_t = false)]
    include_alpha: bool,

    /// Significance level for the binomial intervals
    #[arg(long, default_value_t = 0.05)]
    alpha: f64,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => run_population(args),
        Commands::Sweep(args) => sweep(args),
        Commands::Analyze(args) => analyze(args),
        Commands::Bootstrap(args) => bootstrap(args),
        Commands::Compare(args) => compare(args),
    }
}

fn run_population(args: RunArgs) -> Result<()> {
    let mut cfg = match &args.config {
        Some(path) => PopulationConfig::from_toml_file(path)?,
        None => PopulationConfig {
            grid: GridSpec::default(),
            metallicity: Vec::new(),
            alpha_ce: 1.0,
            n_systems: None,
            sample_seed: 42,
            engine: EngineConfig {
                command: String::new(),
                args: Vec::new(),
                timeout_secs: 600,
            },
        },
    };

    if !args.metallicity.is_empty() {
        cfg.metallicity = args.metallicity.clone();
    }
    if let Some(v) = args.alpha_ce {
        cfg.alpha_ce = v;
    }
    if let Some(v) = args.n_systems {
        cfg.n_systems = Some(v);
    }
    if let Some(v) = args.seed {
        cfg.sample_seed = v;
    }
    if let Some(v) = args.m1_min {
        cfg.grid.m1_min = v;
    }
    if let Some(v) = args.m1_max {
        cfg.grid.m1_max = v;
    }
    if let Some(v) = args.m1_samples {
        cfg.grid.m1_samples = v;
    }
    if let Some(v) = args.m2_min {
        cfg.grid.m2_min = v;
    }
    if let Some(v) = args.m2_max {
        cfg.grid.m2_max = v;
    }
    if let Some(v) = args.m2_samples {
        cfg.grid.m2_samples = v;
    }
    if let Some(v) = args.p_min {
        cfg.grid.p_min = v;
    }
    if let Some(v) = args.p_max {
        cfg.grid.p_max = v;
    }
    if let Some(v) = args.p_samples {
        cfg.grid.p_samples = v;
    }
    if let Some(v) = args.engine_cmd {
        cfg.engine.command = v;
    }
    if !args.engine_arg.is_empty() {
        cfg.engine.args = args.engine_arg.clone();
    }
    if let Some(v) = args.engine_timeout_secs {
        cfg.engine.timeout_secs = v;
    }
    cfg.validate()?;

    let grid = build_grid(&cfg.grid, &cfg.metallicity);
    let systems = match cfg.n_systems {
        Some(n) => subsample(grid, n, cfg.sample_seed),
        None => grid,
    };
    let total = systems.len();
    if !args.quiet {
        println!(
            "Evolving {total} systems (alpha_CE = {}, Z = {:?})",
            cfg.alpha_ce, cfg.metallicity
        );
    }

    let engine = ExternalEngine::new(cfg.engine.clone());
    let mut records = Vec::with_capacity(total);
    let mut failures = 0usize;
    for (i, ic) in systems.iter().enumerate() {
        if !args.quiet && (i + 1) % 25 == 0 {
            println!("[{}/{total}] evolving...", i + 1);
        }
        let record = match engine.evolve(ic, cfg.alpha_ce) {
            Ok(outcome) => extract_record(ic, cfg.alpha_ce, &outcome),
            Err(e) => {
                failures += 1;
                if !args.quiet {
                    eprintln!(
                        "system {} (M1={:.2}, M2={:.2}, P={:.1}): {e:#}",
                        i + 1,
                        ic.m1,
                        ic.m2,
                        ic.p_orb
                    );
                }
                error_record(ic, cfg.alpha_ce, &format!("{e:#}"))
            }
        };
        records.push(record);
    }

    write_records(&args.output, &records)?;

    let n_ce = records.iter().filter(|r| r.ce_occurred).count();
    let n_survived = records.iter().filter(|r| r.survived_ce).count();
    let (lo, hi) = binomial_ci(n_survived, n_ce, 0.05);
    println!("Population written to {}", args.output.display());
    println!("Systems evolved: {total} ({failures} failed)");
    println!(
        "CE events: {n_ce} ({:.1}% of population)",
        pct(n_ce, total)
    );
    println!(
        "CE survivors: {n_survived} ({:.1}% of CE events, 95% CI {lo:.1}-{hi:.1}%)",
        pct(n_survived, n_ce)
    );
    Ok(())
}

fn pct(k: usize, n: usize) -> f64 {
    if n == 0 {
        0.0
    } else {
        k as f64 / n as f64 * 100.0
    }
}

fn sweep(args: SweepArgs) -> Result<()> {
    let cfg = SweepConfig::from_toml_file(&args.config)?;
    let mut log = RunLog::open(&cfg.log_file, args.resume)?;
    let report = run_sweep(
        &cfg,
        SweepOptions {
            resume: args.resume,
            dry_run: args.dry_run,
            stop_on_error: args.stop_on_error,
            skip_checks: args.skip_checks,
        },
        &mut log,
    )?;
    if report.failures > 0 {
        anyhow::bail!("{} sweep job(s) failed", report.failures);
    }
    Ok(())
}

fn slug(label: &str) -> String {
    label
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}

fn analyze(args: AnalyzeArgs) -> Result<()> {
    let datasets = load_standard_datasets(&args.data_dir, args.include_alpha)?;
    fs::create_dir_all(&args.outdir)
        .with_context(|| format!("failed to create {}", args.outdir.display()))?;

    let summaries: Vec<_> = datasets.iter().map(|d| summarize(d, args.alpha)).collect();
    write_summary_csv(&args.outdir.join("survival_summary.csv"), &summaries)?;

    for (dataset, summary) in datasets.iter().zip(&summaries) {
        let tag = slug(&dataset.label);
        write_bins_csv(
            &args.outdir.join(format!("lambda_survival_{tag}.csv")),
            &dataset.label,
            &lambda_binned_survival(dataset, args.alpha),
        )?;
        write_bins_csv(
            &args.outdir.join(format!("mass_ratio_survival_{tag}.csv")),
            &dataset.label,
            &mass_ratio_survival(dataset, args.alpha),
        )?;
        write_bins_csv(
            &args.outdir.join(format!("period_survival_{tag}.csv")),
            &dataset.label,
            &period_survival(dataset, args.alpha),
        )?;
        write_donor_class_csv(
            &args.outdir.join(format!("donor_class_survival_{tag}.csv")),
            &dataset.label,
            &donor_class_survival(dataset, args.alpha),
        )?;
        write_donor_state_csv(
            &args.outdir.join(format!("donor_state_survival_{tag}.csv")),
            &dataset.label,
            &donor_state_survival(dataset, args.alpha),
        )?;

        println!(
            "{}: {} systems, {} CE events ({:.1}%), survival {:.1}% (CI {:.1}-{:.1}%)",
            summary.label,
            summary.n_total,
            summary.n_ce,
            summary.ce_rate,
            summary.survival_rate,
            summary.survival_ci.0,
            summary.survival_ci.1
        );
    }

    if !args.no_figures {
        let figures = args.outdir.join("figures");
        plot::plot_lambda_vs_metallicity(&summaries, &figures.join("lambda_vs_metallicity.png"))?;
        plot::plot_survival_rates(&summaries, &figures.join("survival_rates.png"))?;
        for dataset in &datasets {
            let tag = slug(&dataset.label);
            let lambdas: Vec<f64> = dataset
                .ce_events_with_lambda()
                .iter()
                .filter_map(|r| r.lambda_ce)
                .collect();
            if !lambdas.is_empty() {
                plot::plot_lambda_histogram(
                    &lambdas,
                    &dataset.label,
                    &figures.join(format!("lambda_hist_{tag}.png")),
                )?;
            }
            let bins = lambda_binned_survival(dataset, args.alpha);
            if !bins.is_empty() {
                plot::plot_binned_survival(
                    &bins,
                    &dataset.label,
                    &figures.join(format!("lambda_survival_{tag}.png")),
                )?;
            }
        }
        println!("Figures written to {}", figures.display());
    }

    println!(
        "Analysis written to {}",
        args.outdir.join("survival_summary.csv").display()
    );
    Ok(())
}

fn write_bootstrap_csv(
    path: &Path,
    rows: &[(String, String, usize, BootstrapSummary)],
) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    writer.write_record(["dataset", "quantity", "n", "mean", "std", "ci_low", "ci_high"])?;
    for (dataset, quantity, n, summary) in rows {
        writer.write_record([
            dataset.clone(),
            quantity.clone(),
            n.to_string(),
            format!("{:.4}", summary.mean),
            format!("{:.4}", summary.std),
            format!("{:.4}", summary.ci_low),
            format!("{:.4}", summary.ci_high),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

fn bootstrap(args: BootstrapArgs) -> Result<()> {
    let datasets = load_standard_datasets(&args.data_dir, args.include_alpha)?;
    fs::create_dir_all(&args.outdir)
        .with_context(|| format!("failed to create {}", args.outdir.display()))?;

    let mut headline = Vec::new();
    let mut bin_rows = Vec::new();
    for (i, dataset) in datasets.iter().enumerate() {
        let seed = args.seed.wrapping_add(i as u64);

        let b = bootstrap_dataset(dataset, args.iterations, args.alpha, seed);
        println!(
            "{}: CE rate {:.1}% (CI {:.1}-{:.1}%), survival {:.1}% +/- {:.1}% (CI {:.1}-{:.1}%)",
            dataset.label,
            b.ce_rate.mean,
            b.ce_rate.ci_low,
            b.ce_rate.ci_high,
            b.survival.mean,
            b.survival.std,
            b.survival.ci_low,
            b.survival.ci_high
        );
        headline.push((
            dataset.label.clone(),
            "ce_rate_pct".to_string(),
            b.n_total,
            b.ce_rate,
        ));
        headline.push((
            dataset.label.clone(),
            "survival_pct".to_string(),
            b.n_ce,
            b.survival,
        ));
        headline.push((
            dataset.label.clone(),
            "lambda_mean".to_string(),
            b.n_lambda,
            b.lambda_mean,
        ));

        let events: Vec<(f64, bool)> = dataset
            .ce_events_with_lambda()
            .iter()
            .filter_map(|r| r.lambda_ce.map(|l| (l, r.survived_ce)))
            .collect();
        for bin in bootstrap_survival_by_lambda(
            &events,
            &LAMBDA_BIN_EDGES,
            args.iterations,
            args.alpha,
            seed,
        ) {
            bin_rows.push((
                dataset.label.clone(),
                format!("survival_lambda_{}", bin.bin_label),
                bin.n_systems,
                bin.survival,
            ));
        }
    }

    write_bootstrap_csv(&args.outdir.join("bootstrap_summary.csv"), &headline)?;
    write_bootstrap_csv(&args.outdir.join("bootstrap_lambda_bins.csv"), &bin_rows)?;
    println!(
        "Bootstrap results ({} iterations) written to {}",
        args.iterations,
        args.outdir.display()
    );
    Ok(())
}

fn compare(args: CompareArgs) -> Result<()> {
    let datasets = load_standard_datasets(&args.data_dir, args.include_alpha)?;
    fs::create_dir_all(&args.outdir)
        .with_context(|| format!("failed to create {}", args.outdir.display()))?;

    write_dns_catalog_csv(&args.outdir.join("galactic_dns.csv"))?;
    let z_stats = catalog_z_stats();
    println!(
        "Galactic DNS catalog: Z mean {:.4}, median {:.4}, std {:.4}",
        z_stats.mean, z_stats.median, z_stats.std
    );

    let track = evolution_track(2.0, 100);
    write_evolution_csv(&args.outdir.join("cosmic_evolution.csv"), &track)?;

    let summaries: Vec<_> = datasets.iter().map(|d| summarize(d, args.alpha)).collect();
    let rows = compare_with_catalog(&summaries);
    write_comparison_csv(&args.outdir.join("dns_comparison.csv"), &rows)?;

    for row in &rows {
        println!(
            "{}: survival {:.1}% (CI {:.1}-{:.1}%), {} of 7 DNS within 1 sigma of Z={}",
            row.dataset,
            row.survival_rate,
            row.survival_ci.0,
            row.survival_ci.1,
            row.n_dns_compatible,
            row.z
        );
    }
    for threshold in [0.006, 0.014] {
        let zc = critical_redshift(threshold, 2.0, 100);
        println!("Mean metallicity closest to {threshold} at z ~ {zc:.2}");
    }

    println!("Comparison written to {}", args.outdir.display());
    Ok(())
}
