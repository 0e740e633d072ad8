use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::config::GridSpec;

/// Initial conditions for one binary. Masses in solar masses, period in
/// days, metallicity as mass fraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitialConditions {
    pub m1: f64,
    pub m2: f64,
    pub p_orb: f64,
    pub z: f64,
    /// Mass ratio q = M2 / M1.
    pub q: f64,
}

fn linspace(min: f64, max: f64, n: usize) -> Vec<f64> {
    if n == 0 {
        return Vec::new();
    }
    if n == 1 {
        return vec![min];
    }
    let step = (max - min) / (n - 1) as f64;
    (0..n).map(|i| min + step * i as f64).collect()
}

fn logspace(min: f64, max: f64, n: usize) -> Vec<f64> {
    if n == 1 {
        return vec![min];
    }
    linspace(min.log10(), max.log10(), n)
        .into_iter()
        .map(|e| 10f64.powf(e))
        .collect()
}

/// Build the full Cartesian grid for the given metallicities, keeping only
/// pairs where the primary is at least as massive as the secondary.
pub fn build_grid(spec: &GridSpec, metallicities: &[f64]) -> Vec<InitialConditions> {
    let m1_grid = linspace(spec.m1_min, spec.m1_max, spec.m1_samples);
    let m2_grid = linspace(spec.m2_min, spec.m2_max, spec.m2_samples);
    let p_grid = logspace(spec.p_min, spec.p_max, spec.p_samples);

    let mut grid = Vec::new();
    for &z in metallicities {
        for &m1 in &m1_grid {
            for &m2 in &m2_grid {
                if m1 < m2 {
                    continue;
                }
                for &p_orb in &p_grid {
                    grid.push(InitialConditions {
                        m1,
                        m2,
                        p_orb,
                        z,
                        q: m2 / m1,
                    });
                }
            }
        }
    }
    grid
}

/// Deterministically subsample `n` systems without replacement. Returns the
/// grid unchanged when `n` covers it.
pub fn subsample(mut grid: Vec<InitialConditions>, n: usize, seed: u64) -> Vec<InitialConditions> {
    if n >= grid.len() {
        return grid;
    }
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    grid.partial_shuffle(&mut rng, n);
    grid.truncate(n);
    grid
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> GridSpec {
        GridSpec {
            m1_min: 10.0,
            m1_max: 20.0,
            m1_samples: 3,
            m2_min: 8.0,
            m2_max: 15.0,
            m2_samples: 3,
            p_min: 50.0,
            p_max: 500.0,
            p_samples: 4,
        }
    }

    #[test]
    fn grid_filters_inverted_mass_pairs() {
        let grid = build_grid(&spec(), &[0.014]);
        assert!(!grid.is_empty());
        assert!(grid.iter().all(|b| b.m1 >= b.m2));
        assert!(grid.iter().all(|b| b.q <= 1.0 && b.q > 0.0));
    }

    #[test]
    fn grid_repeats_per_metallicity() {
        let one = build_grid(&spec(), &[0.014]);
        let two = build_grid(&spec(), &[0.014, 0.001]);
        assert_eq!(two.len(), 2 * one.len());
        assert!(two.iter().filter(|b| b.z == 0.001).count() == one.len());
    }

    #[test]
    fn logspace_hits_endpoints() {
        let grid = build_grid(&spec(), &[0.014]);
        let p_min = grid.iter().map(|b| b.p_orb).fold(f64::INFINITY, f64::min);
        let p_max = grid.iter().map(|b| b.p_orb).fold(0.0, f64::max);
        assert!((p_min - 50.0).abs() < 1e-9);
        assert!((p_max - 500.0).abs() < 1e-6);
    }

    #[test]
    fn single_sample_collapses_to_lower_bound() {
        let spec = GridSpec {
            m1_samples: 1,
            m2_samples: 1,
            p_samples: 1,
            ..spec()
        };
        let grid = build_grid(&spec, &[0.014]);
        assert_eq!(grid.len(), 1);
        assert_eq!(grid[0].m1, 10.0);
        assert_eq!(grid[0].p_orb, 50.0);
    }

    #[test]
    fn subsample_is_reproducible() {
        let grid = build_grid(&spec(), &[0.014]);
        let a = subsample(grid.clone(), 5, 42);
        let b = subsample(grid.clone(), 5, 42);
        let c = subsample(grid, 5, 7);
        assert_eq!(a.len(), 5);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn subsample_keeps_small_grids_whole() {
        let grid = build_grid(&spec(), &[0.014]);
        let n = grid.len();
        assert_eq!(subsample(grid, n + 10, 42).len(), n);
    }
}
