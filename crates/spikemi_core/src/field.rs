//! Temporal convolution encoder.
//!
//! Each cell's spike train is convolved with a causal exponential kernel sampled
//! on a uniform grid, giving one fixed-length trace per cell. Stacking the traces
//! of all cells yields a [`Field`], the population-activity vector of one
//! observation.

use crate::error::{AnalysisError, Result};
use crate::spikes::{Observation, SpikeTrain};

/// Kernel support in units of the time constant. exp(-10) < 5e-5.
pub const KERNEL_SUPPORT_TAUS: f64 = 10.0;

/// Dense `(n_cells, n_timepoints)` tensor, row-major by cell.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    n_cells: usize,
    n_timepoints: usize,
    data: Vec<f64>,
}

impl Field {
    pub fn zeros(n_cells: usize, n_timepoints: usize) -> Self {
        Self {
            n_cells,
            n_timepoints,
            data: vec![0.0; n_cells * n_timepoints],
        }
    }

    pub fn from_rows(rows: Vec<Vec<f64>>) -> Result<Self> {
        let n_timepoints = rows.first().map_or(0, Vec::len);
        if rows.iter().any(|r| r.len() != n_timepoints) {
            return Err(AnalysisError::integrity("field rows differ in length"));
        }
        Ok(Self {
            n_cells: rows.len(),
            n_timepoints,
            data: rows.into_iter().flatten().collect(),
        })
    }

    pub fn n_cells(&self) -> usize {
        self.n_cells
    }

    pub fn n_timepoints(&self) -> usize {
        self.n_timepoints
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.n_cells, self.n_timepoints)
    }

    pub fn cell(&self, index: usize) -> &[f64] {
        let start = index * self.n_timepoints;
        &self.data[start..start + self.n_timepoints]
    }

    pub fn cells(&self) -> impl Iterator<Item = &[f64]> {
        // not chunks_exact: a zero-width field still has n_cells empty rows
        (0..self.n_cells).map(move |c| self.cell(c))
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    /// `(a * wa + b * wb) / (wa + wb)`, element-wise.
    pub fn weighted_mean(a: &Field, wa: f64, b: &Field, wb: f64) -> Field {
        debug_assert_eq!(a.shape(), b.shape());
        let total = wa + wb;
        Field {
            n_cells: a.n_cells,
            n_timepoints: a.n_timepoints,
            data: a
                .data
                .iter()
                .zip(&b.data)
                .map(|(x, y)| (x * wa + y * wb) / total)
                .collect(),
        }
    }
}

/// Causal exponential kernel `exp(-x / tau)` sampled every `dt`, truncated at `10 tau`.
#[derive(Debug, Clone)]
pub struct ExponentialKernel {
    tau: f64,
    dt: f64,
    samples: Vec<f64>,
}

impl ExponentialKernel {
    pub fn new(tau: f64, dt: f64) -> Result<Self> {
        if !(tau > 0.0 && tau.is_finite()) || !(dt > 0.0 && dt.is_finite()) {
            return Err(AnalysisError::InvalidConfig(format!(
                "kernel needs positive tau and dt (got tau={tau}, dt={dt})"
            )));
        }
        let len = (KERNEL_SUPPORT_TAUS * tau / dt).floor() as usize;
        let samples = (0..len).map(|i| (-(i as f64) * dt / tau).exp()).collect();
        Ok(Self { tau, dt, samples })
    }

    pub fn tau(&self) -> f64 {
        self.tau
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }

    pub fn support(&self) -> f64 {
        KERNEL_SUPPORT_TAUS * self.tau
    }

    pub fn samples(&self) -> &[f64] {
        &self.samples
    }
}

/// Converts spike trains into fields over `[0, simulation_length + 10 tau)`.
#[derive(Debug, Clone)]
pub struct FieldEncoder {
    kernel: ExponentialKernel,
    n_bins: usize,
}

impl FieldEncoder {
    pub fn new(kernel: ExponentialKernel, simulation_length: f64) -> Self {
        let n_bins = (simulation_length / kernel.dt()).floor() as usize;
        Self { kernel, n_bins }
    }

    /// `floor(simulation_length / dt) + floor(10 tau / dt)`.
    pub fn n_timepoints(&self) -> usize {
        self.n_bins + self.kernel.samples().len()
    }

    /// Convolves one cell's spike train into `out`, which must be zeroed.
    ///
    /// Spikes after the nominal simulation length still add their kernel; the
    /// part that falls past the end of the grid is dropped.
    fn convolve_into(&self, train: &SpikeTrain, out: &mut [f64]) {
        let kernel = self.kernel.samples();
        for &t in train.times() {
            let start = (t / self.kernel.dt()).floor() as usize;
            if start >= out.len() {
                continue;
            }
            let end = (start + kernel.len()).min(out.len());
            for (bin, k) in out[start..end].iter_mut().zip(kernel) {
                *bin += k;
            }
        }
    }

    pub fn encode_train(&self, train: &SpikeTrain) -> Vec<f64> {
        let mut out = vec![0.0; self.n_timepoints()];
        self.convolve_into(train, &mut out);
        out
    }

    pub fn encode(&self, observation: &Observation) -> Field {
        let mut field = Field::zeros(observation.len(), self.n_timepoints());
        let width = field.n_timepoints;
        for (c, train) in observation.iter().enumerate() {
            self.convolve_into(train, &mut field.data[c * width..(c + 1) * width]);
        }
        field
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoder(tau: f64, dt: f64, length: f64) -> FieldEncoder {
        FieldEncoder::new(ExponentialKernel::new(tau, dt).unwrap(), length)
    }

    #[test]
    fn output_length_matches_grid() {
        let enc = encoder(5.0, 2.0, 100.0);
        assert_eq!(enc.n_timepoints(), 50 + 25);
        assert_eq!(enc.encode_train(&SpikeTrain::empty()), vec![0.0; 75]);
    }

    #[test]
    fn spike_at_zero_starts_at_peak_and_decays() {
        let enc = encoder(5.0, 1.0, 50.0);
        let trace = enc.encode_train(&SpikeTrain::new(vec![0.0]).unwrap());
        assert_eq!(trace[0], 1.0);
        let kernel_len = enc.kernel.samples().len();
        for i in 1..kernel_len {
            assert!(trace[i] < trace[i - 1]);
        }
        assert!((trace[1] - (-0.2f64).exp()).abs() < 1e-12);
        assert!(trace[kernel_len..].iter().all(|&v| v == 0.0));
    }

    #[test]
    fn truncation_error_is_negligible() {
        let kernel = ExponentialKernel::new(3.0, 0.5).unwrap();
        let last = *kernel.samples().last().unwrap();
        assert!(last < 1e-4);
        assert!((-KERNEL_SUPPORT_TAUS).exp() < 5e-5);
    }

    #[test]
    fn spikes_past_simulation_length_still_contribute() {
        let enc = encoder(5.0, 2.0, 20.0);
        let trace = enc.encode_train(&SpikeTrain::new(vec![24.0]).unwrap());
        assert_eq!(trace.len(), 10 + 25);
        assert_eq!(trace[12], 1.0);
        assert!(trace[..12].iter().all(|&v| v == 0.0));
    }

    #[test]
    fn overlapping_spikes_add_up() {
        let enc = encoder(5.0, 2.0, 20.0);
        let trace = enc.encode_train(&SpikeTrain::new(vec![1.0, 1.5]).unwrap());
        assert_eq!(trace[0], 2.0);
    }

    #[test]
    fn encode_stacks_cells() {
        let enc = encoder(2.0, 1.0, 10.0);
        let obs = vec![SpikeTrain::empty(), SpikeTrain::new(vec![3.0]).unwrap()];
        let field = enc.encode(&obs);
        assert_eq!(field.shape(), (2, 30));
        assert!(field.cell(0).iter().all(|&v| v == 0.0));
        assert_eq!(field.cell(1)[3], 1.0);
    }

    #[test]
    fn weighted_mean_of_fields() {
        let a = Field::from_rows(vec![vec![0.0, 4.0]]).unwrap();
        let b = Field::from_rows(vec![vec![3.0, 1.0]]).unwrap();
        let m = Field::weighted_mean(&a, 1.0, &b, 2.0);
        assert_eq!(m.as_slice(), &[2.0, 2.0]);
    }
}
