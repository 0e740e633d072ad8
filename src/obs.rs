use anyhow::{Context, Result};
use std::path::Path;

use crate::analysis::DatasetSummary;
use crate::stats::{mean, percentile, sample_std};

/// Solar metallicity (mass fraction), the anchor for the Z(z) relation.
pub const Z_SUN: f64 = 0.014;

/// A Galactic double neutron star with an estimated progenitor
/// metallicity.
#[derive(Debug, Clone)]
pub struct DnsSystem {
    pub name: &'static str,
    pub z_estimate: f64,
    pub z_uncertainty: f64,
    pub reference: &'static str,
}

/// Known Galactic DNS systems used in the comparison. Metallicity
/// estimates come from the cited discovery and timing papers.
pub const GALACTIC_DNS: [DnsSystem; 7] = [
    DnsSystem {
        name: "J0737-3039",
        z_estimate: 0.014,
        z_uncertainty: 0.003,
        reference: "Tauris et al. 2017",
    },
    DnsSystem {
        name: "J1756-2251",
        z_estimate: 0.012,
        z_uncertainty: 0.004,
        reference: "Faulkner et al. 2005",
    },
    DnsSystem {
        name: "J1906+0746",
        z_estimate: 0.015,
        z_uncertainty: 0.005,
        reference: "van Leeuwen et al. 2015",
    },
    DnsSystem {
        name: "J1913+1102",
        z_estimate: 0.010,
        z_uncertainty: 0.003,
        reference: "Lazarus et al. 2016",
    },
    DnsSystem {
        name: "J1757-1854",
        z_estimate: 0.013,
        z_uncertainty: 0.004,
        reference: "Cameron et al. 2018",
    },
    DnsSystem {
        name: "B1534+12",
        z_estimate: 0.016,
        z_uncertainty: 0.005,
        reference: "Stairs et al. 1998",
    },
    DnsSystem {
        name: "B1913+16",
        z_estimate: 0.014,
        z_uncertainty: 0.003,
        reference: "Weisberg et al. 2010",
    },
];

/// Mean, median and sample spread of the catalog's metallicity estimates.
#[derive(Debug, Clone, Copy)]
pub struct CatalogZStats {
    pub mean: f64,
    pub median: f64,
    pub std: f64,
}

pub fn catalog_z_stats() -> CatalogZStats {
    let zs: Vec<f64> = GALACTIC_DNS.iter().map(|d| d.z_estimate).collect();
    CatalogZStats {
        mean: mean(&zs),
        median: percentile(&zs, 50.0),
        std: sample_std(&zs),
    }
}

/// Cosmic star-formation rate density (Madau & Dickinson 2014), in
/// M_sun / yr / Mpc^3.
pub fn cosmic_sfr(z: f64) -> f64 {
    0.015 * (1.0 + z).powf(2.7) / (1.0 + ((1.0 + z) / 2.9).powf(5.6))
}

/// Mean metallicity at redshift `z`: Z_sun * 10^(-0.2 z).
pub fn metallicity_at_redshift(z: f64) -> f64 {
    Z_SUN * 10f64.powf(-0.2 * z)
}

/// One point on the cosmic-evolution track.
#[derive(Debug, Clone, Copy)]
pub struct EvolutionPoint {
    pub redshift: f64,
    pub sfr: f64,
    pub metallicity: f64,
}

/// Sample the SFR and metallicity tracks over `0 <= z <= z_max`.
pub fn evolution_track(z_max: f64, n_points: usize) -> Vec<EvolutionPoint> {
    (0..n_points)
        .map(|i| {
            let z = z_max * i as f64 / (n_points - 1) as f64;
            EvolutionPoint {
                redshift: z,
                sfr: cosmic_sfr(z),
                metallicity: metallicity_at_redshift(z),
            }
        })
        .collect()
}

/// Redshift of the scan point whose mean metallicity is closest to
/// `z_threshold`, over `n_points` samples of [0, z_max]. A threshold never
/// reached resolves to the nearest edge of the scan.
pub fn critical_redshift(z_threshold: f64, z_max: f64, n_points: usize) -> f64 {
    evolution_track(z_max, n_points)
        .into_iter()
        .min_by(|a, b| {
            (a.metallicity - z_threshold)
                .abs()
                .total_cmp(&(b.metallicity - z_threshold).abs())
        })
        .map(|p| p.redshift)
        .unwrap_or(0.0)
}

pub fn write_dns_catalog_csv(path: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    writer.write_record(["system", "Z_estimate", "Z_uncertainty", "Z_over_Zsun", "reference"])?;
    for dns in &GALACTIC_DNS {
        writer.write_record([
            dns.name.to_string(),
            format!("{:.4}", dns.z_estimate),
            format!("{:.4}", dns.z_uncertainty),
            format!("{:.3}", dns.z_estimate / Z_SUN),
            dns.reference.to_string(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_evolution_csv(path: &Path, track: &[EvolutionPoint]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    writer.write_record(["redshift", "sfr_msun_yr_mpc3", "metallicity"])?;
    for p in track {
        writer.write_record([
            format!("{:.4}", p.redshift),
            format!("{:.6e}", p.sfr),
            format!("{:.6}", p.metallicity),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

/// Compare each simulated dataset's survival rate against the DNS
/// metallicity distribution: how many catalog systems fall within one
/// sigma of the dataset's metallicity.
#[derive(Debug, Clone)]
pub struct ObsComparison {
    pub dataset: String,
    pub z: f64,
    pub survival_rate: f64,
    pub survival_ci: (f64, f64),
    pub n_dns_compatible: usize,
}

pub fn compare_with_catalog(summaries: &[DatasetSummary]) -> Vec<ObsComparison> {
    summaries
        .iter()
        .map(|s| {
            let n_compatible = GALACTIC_DNS
                .iter()
                .filter(|dns| (dns.z_estimate - s.z).abs() <= dns.z_uncertainty)
                .count();
            ObsComparison {
                dataset: s.label.clone(),
                z: s.z,
                survival_rate: s.survival_rate,
                survival_ci: s.survival_ci,
                n_dns_compatible: n_compatible,
            }
        })
        .collect()
}

pub fn write_comparison_csv(path: &Path, rows: &[ObsComparison]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    writer.write_record([
        "dataset",
        "Z",
        "survival_pct",
        "ci_low",
        "ci_high",
        "n_dns_compatible",
    ])?;
    for row in rows {
        writer.write_record([
            row.dataset.clone(),
            format!("{}", row.z),
            format!("{:.4}", row.survival_rate),
            format!("{:.4}", row.survival_ci.0),
            format!("{:.4}", row.survival_ci.1),
            row.n_dns_compatible.to_string(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sfr_peaks_near_redshift_two() {
        let at_peak = cosmic_sfr(1.9);
        assert!(at_peak > cosmic_sfr(0.0));
        assert!(at_peak > cosmic_sfr(6.0));
    }

    #[test]
    fn metallicity_declines_with_redshift() {
        assert!((metallicity_at_redshift(0.0) - Z_SUN).abs() < 1e-12);
        let z1 = metallicity_at_redshift(1.0);
        assert!((z1 - Z_SUN * 10f64.powf(-0.2)).abs() < 1e-12);
        assert!(metallicity_at_redshift(2.0) < z1);
    }

    #[test]
    fn critical_redshift_takes_the_nearest_scan_point() {
        // Z crosses 0.006 at z ~ 1.84
        let zc = critical_redshift(0.006, 2.0, 100);
        assert!(zc > 1.8 && zc < 1.9);
        assert!((metallicity_at_redshift(zc) - 0.006).abs() < 1e-4);
        // no neighboring scan point sits closer to the threshold
        let step = 2.0 / 99.0;
        for neighbor in [zc - step, zc + step] {
            assert!(
                (metallicity_at_redshift(neighbor) - 0.006).abs()
                    >= (metallicity_at_redshift(zc) - 0.006).abs()
            );
        }

        // solar threshold sits at z = 0
        assert_eq!(critical_redshift(Z_SUN, 2.0, 100), 0.0);

        // 0.001 is never reached by z = 2; the scan edge is nearest
        assert_eq!(critical_redshift(0.001, 2.0, 100), 2.0);
    }

    #[test]
    fn catalog_has_seven_systems_near_solar() {
        assert_eq!(GALACTIC_DNS.len(), 7);
        for dns in &GALACTIC_DNS {
            assert!(dns.z_estimate > 0.005 && dns.z_estimate < 0.02);
            assert!(dns.z_uncertainty > 0.0);
        }
        let stats = catalog_z_stats();
        assert!((stats.median - 0.014).abs() < 1e-12);
        assert!(stats.mean > 0.012 && stats.mean < 0.015);
        assert!(stats.std > 0.0 && stats.std < 0.005);
    }

    #[test]
    fn compatibility_count_tracks_metallicity() {
        let solar = DatasetSummary {
            label: "Solar (alpha=0.5)".to_string(),
            z: 0.014,
            alpha_ce: 0.5,
            n_total: 100,
            n_ce: 50,
            ce_rate: 50.0,
            ce_rate_ci: (40.0, 60.0),
            n_survived: 10,
            survival_rate: 20.0,
            survival_ci: (10.0, 33.0),
            n_with_lambda: 50,
            lambda_mean: Some(0.1),
            lambda_std: Some(0.02),
            lambda_min: Some(0.05),
            lambda_max: Some(0.2),
        };
        let mut low = solar.clone();
        low.label = "Low (alpha=0.5)".to_string();
        low.z = 0.001;

        let rows = compare_with_catalog(&[solar, low]);
        assert!(rows[0].n_dns_compatible >= 6);
        assert_eq!(rows[1].n_dns_compatible, 0);
    }
}
