//! Multineuron distance and the condensed pairwise distance matrix.

use log::info;

use crate::error::{AnalysisError, Result, Stage};
use crate::field::Field;

/// Distance between two fields with tunable cross-cell mixing.
///
/// With `delta = P - Q` and Gram matrix `E = delta * delta^T` (cells x cells),
/// the squared distance is `sum_i E_ii + c * sum_{i != j} E_ij`. `c = 0` treats
/// cells as independent channels, `c = 1` is the plain population Euclidean
/// distance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MultineuronMetric {
    mixing: f64,
}

impl MultineuronMetric {
    pub fn new(mixing: f64) -> Self {
        Self { mixing }
    }

    pub fn mixing(&self) -> f64 {
        self.mixing
    }

    /// Weighted Gram sum, before the square root.
    ///
    /// Evaluated per time bin as `(1 - c) * sum_i d_i^2 + c * (sum_i d_i)^2`,
    /// which equals the Gram form without materializing the cells x cells matrix.
    pub fn squared(&self, p: &Field, q: &Field) -> f64 {
        debug_assert_eq!(p.shape(), q.shape());
        let c = self.mixing;
        let n_t = p.n_timepoints();
        let mut within = 0.0;
        let mut column_sums = vec![0.0; n_t];
        for (pc, qc) in p.cells().zip(q.cells()) {
            for ((a, b), s) in pc.iter().zip(qc).zip(column_sums.iter_mut()) {
                let d = a - b;
                within += d * d;
                *s += d;
            }
        }
        if c == 0.0 {
            return within;
        }
        let total: f64 = column_sums.iter().map(|s| s * s).sum();
        (1.0 - c) * within + c * total
    }

    /// `sqrt(max(sum, 0))`. A negative sum from cancellation is reported as 0;
    /// NaN inputs give NaN, which callers turn into a degeneracy error.
    pub fn distance(&self, p: &Field, q: &Field) -> f64 {
        let sum = self.squared(p, q);
        if sum < 0.0 {
            0.0
        } else {
            sum.sqrt()
        }
    }
}

/// Upper triangle (without diagonal) of a symmetric `n x n` distance matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct CondensedMatrix {
    n: usize,
    data: Vec<f64>,
}

impl CondensedMatrix {
    pub fn from_vec(n: usize, data: Vec<f64>) -> Result<Self> {
        if data.len() != n * n.saturating_sub(1) / 2 {
            return Err(AnalysisError::integrity(format!(
                "condensed matrix for {n} points needs {} entries, got {}",
                n * n.saturating_sub(1) / 2,
                data.len()
            )));
        }
        Ok(Self { n, data })
    }

    /// Pairwise distances between `fields`, row by row (`(0,1), (0,2), ..., (n-2,n-1)`).
    pub fn pairwise(fields: &[Field], metric: &MultineuronMetric) -> Result<Self> {
        let n = fields.len();
        let mut data = Vec::with_capacity(n * n.saturating_sub(1) / 2);
        for i in 0..n {
            for j in (i + 1)..n {
                let d = metric.distance(&fields[i], &fields[j]);
                if !d.is_finite() {
                    return Err(AnalysisError::degenerate(
                        Stage::TrainingDistances,
                        format!("distance between training observations {i} and {j} is {d}"),
                    ));
                }
                data.push(d);
            }
        }
        info!("computed {} distances between {} training observations", data.len(), n);
        Ok(Self { n, data })
    }

    pub fn n(&self) -> usize {
        self.n
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    #[inline]
    pub fn index(n: usize, i: usize, j: usize) -> usize {
        debug_assert!(i < j && j < n);
        n * i - i * (i + 1) / 2 + (j - i - 1)
    }

    /// Distance between points `i` and `j`; zero on the diagonal.
    pub fn get(&self, i: usize, j: usize) -> f64 {
        match i.cmp(&j) {
            std::cmp::Ordering::Equal => 0.0,
            std::cmp::Ordering::Less => self.data[Self::index(self.n, i, j)],
            std::cmp::Ordering::Greater => self.data[Self::index(self.n, j, i)],
        }
    }

    pub(crate) fn set(&mut self, i: usize, j: usize, value: f64) {
        let (a, b) = if i < j { (i, j) } else { (j, i) };
        let idx = Self::index(self.n, a, b);
        self.data[idx] = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(rows: &[&[f64]]) -> Field {
        Field::from_rows(rows.iter().map(|r| r.to_vec()).collect()).unwrap()
    }

    fn gram_reference(p: &Field, q: &Field, c: f64) -> f64 {
        let n = p.n_cells();
        let mut sum = 0.0;
        for i in 0..n {
            for j in 0..n {
                let e: f64 = p
                    .cell(i)
                    .iter()
                    .zip(q.cell(i))
                    .zip(p.cell(j).iter().zip(q.cell(j)))
                    .map(|((a, b), (x, y))| (a - b) * (x - y))
                    .sum();
                sum += if i == j { e } else { c * e };
            }
        }
        sum.max(0.0).sqrt()
    }

    #[test]
    fn self_distance_is_zero() {
        let p = field(&[&[1.0, 2.0, 3.0], &[0.5, -1.0, 4.0]]);
        for c in [0.0, 0.3, 1.0, 2.5] {
            assert_eq!(MultineuronMetric::new(c).distance(&p, &p), 0.0);
        }
    }

    #[test]
    fn independent_cells_sum_squared_per_cell_distances() {
        let p = field(&[&[1.0, 2.0], &[0.0, 0.0]]);
        let q = field(&[&[4.0, 6.0], &[1.0, 0.0]]);
        let d = MultineuronMetric::new(0.0).distance(&p, &q);
        // per-cell Euclidean distances 5 and 1
        assert!((d * d - (25.0 + 1.0)).abs() < 1e-12);

        let r = field(&[&[4.0, 6.0], &[0.0, 0.0]]);
        assert!((MultineuronMetric::new(0.0).distance(&p, &r) - 5.0).abs() < 1e-12);
    }

    #[test]
    fn full_mixing_is_population_euclidean() {
        let p = field(&[&[1.0, 2.0], &[0.0, 3.0]]);
        let q = field(&[&[0.0, 0.0], &[2.0, 1.0]]);
        // summed difference per bin: (1 - 2, 2 + 2) = (-1, 4)
        let d = MultineuronMetric::new(1.0).distance(&p, &q);
        assert!((d - 17.0f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn matches_explicit_gram_matrix() {
        let p = field(&[&[1.0, 0.5, 2.0], &[0.0, 3.0, 1.0], &[2.0, 2.0, 0.0]]);
        let q = field(&[&[0.0, 1.5, 1.0], &[1.0, 0.0, 1.0], &[0.5, 2.0, 3.0]]);
        for c in [0.0, 0.25, 0.5, 1.0] {
            let m = MultineuronMetric::new(c);
            assert!((m.distance(&p, &q) - gram_reference(&p, &q, c)).abs() < 1e-9);
        }
    }

    #[test]
    fn symmetric_for_any_mixing() {
        let p = field(&[&[1.0, 0.5], &[0.0, 3.0]]);
        let q = field(&[&[0.2, 1.5], &[1.0, 0.0]]);
        for c in [-0.5, 0.0, 0.7, 1.0, 3.0] {
            let m = MultineuronMetric::new(c);
            assert_eq!(m.distance(&p, &q), m.distance(&q, &p));
        }
    }

    #[test]
    fn negative_sum_reports_zero_not_nan() {
        // anti-correlated cells with strong negative mixing push the sum below zero
        let p = field(&[&[1.0], &[-1.0]]);
        let q = field(&[&[0.0], &[0.0]]);
        let m = MultineuronMetric::new(-2.0);
        assert!(m.squared(&p, &q) > 0.0);
        let p = field(&[&[1.0], &[1.0]]);
        assert!(m.squared(&p, &q) < 0.0);
        assert_eq!(m.distance(&p, &q), 0.0);
    }

    #[test]
    fn condensed_indexing() {
        let fields: Vec<Field> = [0.0, 1.0, 3.0, 7.0]
            .iter()
            .map(|&x| field(&[&[x]]))
            .collect();
        let m = CondensedMatrix::pairwise(&fields, &MultineuronMetric::new(0.0)).unwrap();
        assert_eq!(m.as_slice(), &[1.0, 3.0, 7.0, 2.0, 6.0, 4.0]);
        assert_eq!(m.get(3, 1), 6.0);
        assert_eq!(m.get(2, 2), 0.0);
    }

    #[test]
    fn nan_training_distance_is_degenerate() {
        let fields = vec![field(&[&[f64::NAN]]), field(&[&[1.0]])];
        let err = CondensedMatrix::pairwise(&fields, &MultineuronMetric::new(0.0));
        assert!(matches!(
            err,
            Err(AnalysisError::NumericDegeneracy {
                stage: Stage::TrainingDistances,
                ..
            })
        ));
    }
}
