//! Population activity statistics of the analysed spike trains.

use crate::error::{AnalysisError, Result};

/// Hoyer sparseness `(sqrt(n) - L1/L2) / (sqrt(n) - 1)` of a count vector.
///
/// 1 when a single cell fires, 0 when all cells fire equally. A silent
/// population counts as maximally sparse; a single cell as not sparse at all.
pub fn hoyer_sparseness(counts: &[usize]) -> f64 {
    let n = counts.len();
    if n < 2 {
        return 0.0;
    }
    let l1: f64 = counts.iter().map(|&c| c as f64).sum();
    if l1 == 0.0 {
        return 1.0;
    }
    let l2 = counts.iter().map(|&c| (c as f64).powi(2)).sum::<f64>().sqrt();
    let root_n = (n as f64).sqrt();
    (root_n - l1 / l2) / (root_n - 1.0)
}

/// Fraction of silent cells.
pub fn activity_sparseness(counts: &[usize]) -> f64 {
    if counts.is_empty() {
        return 1.0;
    }
    counts.iter().filter(|&&c| c == 0).count() as f64 / counts.len() as f64
}

/// Spike counts and sparseness per observation.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ActivityStats {
    n_cells: usize,
    /// Row-major `n_obs x n_cells` spike counts.
    levels: Vec<f64>,
    hoyer: Vec<f64>,
    activity: Vec<f64>,
}

impl ActivityStats {
    pub fn from_counts(counts: &[Vec<usize>]) -> Result<Self> {
        let n_cells = counts.first().map_or(0, Vec::len);
        if counts.iter().any(|row| row.len() != n_cells) {
            return Err(AnalysisError::integrity(
                "spike count rows differ in cell count",
            ));
        }
        Ok(Self {
            n_cells,
            levels: counts.iter().flatten().map(|&c| c as f64).collect(),
            hoyer: counts.iter().map(|row| hoyer_sparseness(row)).collect(),
            activity: counts.iter().map(|row| activity_sparseness(row)).collect(),
        })
    }

    pub(crate) fn from_parts(
        n_cells: usize,
        levels: Vec<f64>,
        hoyer: Vec<f64>,
        activity: Vec<f64>,
    ) -> Result<Self> {
        if hoyer.len() != activity.len() || levels.len() != hoyer.len() * n_cells {
            return Err(AnalysisError::integrity(
                "activity datasets disagree on the observation count",
            ));
        }
        Ok(Self {
            n_cells,
            levels,
            hoyer,
            activity,
        })
    }

    pub fn n_cells(&self) -> usize {
        self.n_cells
    }

    pub fn n_observations(&self) -> usize {
        self.hoyer.len()
    }

    pub fn levels(&self) -> &[f64] {
        &self.levels
    }

    pub fn hoyer(&self) -> &[f64] {
        &self.hoyer
    }

    pub fn activity(&self) -> &[f64] {
        &self.activity
    }

    pub fn mean_hoyer(&self) -> f64 {
        mean(&self.hoyer)
    }

    pub fn mean_activity(&self) -> f64 {
        mean(&self.activity)
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hoyer_extremes() {
        assert!((hoyer_sparseness(&[0, 0, 5, 0]) - 1.0).abs() < 1e-12);
        assert!(hoyer_sparseness(&[3, 3, 3, 3]).abs() < 1e-12);
        assert_eq!(hoyer_sparseness(&[0, 0, 0]), 1.0);
        assert_eq!(hoyer_sparseness(&[4]), 0.0);
    }

    #[test]
    fn activity_counts_silent_cells() {
        assert_eq!(activity_sparseness(&[0, 2, 0, 1]), 0.5);
        assert_eq!(activity_sparseness(&[]), 1.0);
    }

    #[test]
    fn stats_per_observation() {
        let stats = ActivityStats::from_counts(&[vec![1, 0], vec![2, 2]]).unwrap();
        assert_eq!(stats.n_observations(), 2);
        assert_eq!(stats.levels(), &[1.0, 0.0, 2.0, 2.0]);
        assert_eq!(stats.activity(), &[0.5, 0.0]);
        assert!((stats.mean_hoyer() - 0.5).abs() < 1e-12);
        assert!(ActivityStats::from_counts(&[vec![1], vec![1, 2]]).is_err());
    }
}
