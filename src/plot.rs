use std::fs;
use std::path::Path;

use plotters::prelude::*;

use crate::analysis::{DatasetSummary, SurvivalBin};

fn prepare(path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

/// Mean lambda against metallicity, one point per dataset with the sample
/// spread as vertical error bars.
pub fn plot_lambda_vs_metallicity(summaries: &[DatasetSummary], path: &Path) -> anyhow::Result<()> {
    prepare(path)?;

    let root = BitMapBackend::new(path, (1280, 720)).into_drawing_area();
    root.fill(&WHITE)?;

    let points: Vec<(f64, f64, f64)> = summaries
        .iter()
        .filter_map(|s| {
            s.lambda_mean
                .map(|m| (s.z, m, s.lambda_std.unwrap_or(0.0)))
        })
        .collect();

    let max_z = points.iter().map(|p| p.0).fold(0.016, f64::max);
    let max_lambda = points
        .iter()
        .map(|p| p.1 + p.2)
        .fold(0.1_f64, f64::max);

    let mut chart = ChartBuilder::on(&root)
        .caption(
            "Common-Envelope Lambda vs Metallicity",
            ("sans-serif", 34).into_font(),
        )
        .margin(20)
        .x_label_area_size(50)
        .y_label_area_size(70)
        .build_cartesian_2d(0.0..max_z * 1.1, 0.0..max_lambda * 1.2)?;

    chart
        .configure_mesh()
        .x_desc("Metallicity Z")
        .y_desc("Mean lambda_CE")
        .draw()?;

    chart.draw_series(points.iter().map(|&(z, m, s)| {
        ErrorBar::new_vertical(z, (m - s).max(0.0), m, m + s, BLUE.filled(), 12)
    }))?;
    chart.draw_series(
        points
            .iter()
            .map(|&(z, m, _)| Circle::new((z, m), 5, BLUE.filled())),
    )?;

    root.present()?;
    Ok(())
}

/// CE survival rate per dataset as bars, with the exact binomial interval
/// as whiskers.
pub fn plot_survival_rates(summaries: &[DatasetSummary], path: &Path) -> anyhow::Result<()> {
    prepare(path)?;

    let root = BitMapBackend::new(path, (1280, 720)).into_drawing_area();
    root.fill(&WHITE)?;

    let max_rate = summaries
        .iter()
        .map(|s| s.survival_ci.1)
        .fold(10.0_f64, f64::max);

    let mut chart = ChartBuilder::on(&root)
        .caption("CE Survival by Dataset", ("sans-serif", 34).into_font())
        .margin(20)
        .x_label_area_size(60)
        .y_label_area_size(70)
        .build_cartesian_2d(-0.5..summaries.len() as f64 - 0.5, 0.0..max_rate * 1.1)?;

    chart
        .configure_mesh()
        .x_labels(summaries.len())
        .x_label_formatter(&|x| {
            let i = x.round() as usize;
            summaries
                .get(i)
                .map(|s| s.label.clone())
                .unwrap_or_default()
        })
        .y_desc("Survival [%]")
        .draw()?;

    chart.draw_series(summaries.iter().enumerate().map(|(i, s)| {
        Rectangle::new(
            [(i as f64 - 0.3, 0.0), (i as f64 + 0.3, s.survival_rate)],
            BLUE.mix(0.5).filled(),
        )
    }))?;
    chart.draw_series(summaries.iter().enumerate().map(|(i, s)| {
        ErrorBar::new_vertical(
            i as f64,
            s.survival_ci.0,
            s.survival_rate,
            s.survival_ci.1,
            BLACK.filled(),
            12,
        )
    }))?;

    root.present()?;
    Ok(())
}

/// Histogram of lambda values for one dataset.
pub fn plot_lambda_histogram(
    lambdas: &[f64],
    dataset_label: &str,
    path: &Path,
) -> anyhow::Result<()> {
    prepare(path)?;

    let root = BitMapBackend::new(path, (1280, 720)).into_drawing_area();
    root.fill(&WHITE)?;

    let max_lambda = lambdas.iter().copied().fold(0.25_f64, f64::max);
    let n_bins = 25usize;
    let width = max_lambda / n_bins as f64;
    let mut counts = vec![0u32; n_bins];
    for &l in lambdas {
        let idx = ((l / width) as usize).min(n_bins - 1);
        counts[idx] += 1;
    }
    let max_count = counts.iter().copied().max().unwrap_or(1).max(1);

    let mut chart = ChartBuilder::on(&root)
        .caption(
            format!("Lambda Distribution - {dataset_label}"),
            ("sans-serif", 34).into_font(),
        )
        .margin(20)
        .x_label_area_size(50)
        .y_label_area_size(60)
        .build_cartesian_2d(0.0..max_lambda, 0u32..max_count + 1)?;

    chart
        .configure_mesh()
        .x_desc("lambda_CE")
        .y_desc("Systems")
        .draw()?;

    chart.draw_series(counts.iter().enumerate().map(|(i, &c)| {
        Rectangle::new(
            [(i as f64 * width, 0), ((i + 1) as f64 * width, c)],
            BLUE.mix(0.6).filled(),
        )
    }))?;

    root.present()?;
    Ok(())
}

/// Survival probability across lambda bins, points at bin centers with the
/// binomial interval as whiskers.
pub fn plot_binned_survival(
    bins: &[SurvivalBin],
    dataset_label: &str,
    path: &Path,
) -> anyhow::Result<()> {
    prepare(path)?;

    let root = BitMapBackend::new(path, (1280, 720)).into_drawing_area();
    root.fill(&WHITE)?;

    let max_lambda = bins.iter().map(|b| b.hi).fold(0.25_f64, f64::max);

    let mut chart = ChartBuilder::on(&root)
        .caption(
            format!("Survival vs Lambda - {dataset_label}"),
            ("sans-serif", 34).into_font(),
        )
        .margin(20)
        .x_label_area_size(50)
        .y_label_area_size(70)
        .build_cartesian_2d(0.0..max_lambda, 0.0..100.0_f64)?;

    chart
        .configure_mesh()
        .x_desc("lambda_CE")
        .y_desc("Survival [%]")
        .draw()?;

    chart.draw_series(bins.iter().map(|b| {
        let center = (b.lo + b.hi) / 2.0;
        ErrorBar::new_vertical(center, b.ci.0, b.survival_rate, b.ci.1, RED.filled(), 12)
    }))?;
    chart.draw_series(LineSeries::new(
        bins.iter()
            .map(|b| ((b.lo + b.hi) / 2.0, b.survival_rate)),
        &RED,
    ))?;

    root.present()?;
    Ok(())
}
