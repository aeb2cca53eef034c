//! Spike-train data model and the loader contract.
//!
//! The simulator and its archive live outside this crate. All the analysis needs
//! is a [`SpikeSource`] that, for a list of `(pattern, trial)` observations,
//! returns one ordered spike train per cell.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

use crate::error::{AnalysisError, Result};

/// Spike times (ms) of one cell in one observation, sorted ascending.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpikeTrain(Vec<f64>);

impl SpikeTrain {
    /// Builds a train, checking the times are finite, non-negative and sorted.
    pub fn new(times: Vec<f64>) -> Result<Self> {
        if let Some(bad) = times.iter().find(|t| !t.is_finite() || **t < 0.0) {
            return Err(AnalysisError::integrity(format!(
                "spike time {bad} is negative or non-finite"
            )));
        }
        if times.windows(2).any(|w| w[1] < w[0]) {
            return Err(AnalysisError::integrity("spike train is not sorted"));
        }
        Ok(SpikeTrain(times))
    }

    pub fn empty() -> Self {
        SpikeTrain(Vec::new())
    }

    pub fn times(&self) -> &[f64] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Keeps spikes at or after `start`, re-referenced so `start` becomes 0.
    pub fn windowed(&self, start: f64) -> SpikeTrain {
        SpikeTrain(
            self.0
                .iter()
                .filter(|&&t| t >= start)
                .map(|&t| t - start)
                .collect(),
        )
    }
}

/// `(stimulus_pattern_index, trial_index)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObservationId {
    pub pattern: usize,
    pub trial: usize,
}

impl ObservationId {
    pub fn new(pattern: usize, trial: usize) -> Self {
        Self { pattern, trial }
    }

    /// Row-major index with trials grouped by pattern.
    pub fn flat_index(&self, n_trials: usize) -> usize {
        self.pattern * n_trials + self.trial
    }
}

impl std::fmt::Display for ObservationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:03}/{:02}", self.pattern, self.trial)
    }
}

/// One spike train per cell, in cell order.
pub type Observation = Vec<SpikeTrain>;

/// Supplier of raw spike times. Must be deterministic for a given backing state.
pub trait SpikeSource {
    /// Number of cells of the given population; fixed across the dataset.
    fn n_cells(&self, cell_type: &str) -> Result<usize>;

    /// Simulated duration of each trial (ms).
    fn sim_duration(&self) -> f64;

    /// Spike trains for every requested observation.
    fn get_spikes(
        &self,
        observations: &[ObservationId],
        cell_type: &str,
    ) -> Result<BTreeMap<ObservationId, Observation>>;
}

/// Checks every requested observation is present with exactly `n_cells` trains.
pub fn check_observations(
    requested: &[ObservationId],
    spikes: &BTreeMap<ObservationId, Observation>,
    n_cells: usize,
) -> Result<()> {
    for id in requested {
        let obs = spikes
            .get(id)
            .ok_or_else(|| AnalysisError::integrity(format!("observation {id} is missing")))?;
        if obs.len() != n_cells {
            return Err(AnalysisError::integrity(format!(
                "observation {id} has {} cells, expected {n_cells}",
                obs.len()
            )));
        }
    }
    Ok(())
}

/// Spike counts per cell, one row per observation.
pub fn spike_counts(observations: &[&Observation]) -> Vec<Vec<usize>> {
    observations
        .iter()
        .map(|obs| obs.iter().map(SpikeTrain::len).collect())
        .collect()
}

/// Spike source backed by an in-memory map.
#[derive(Debug, Clone, Default)]
pub struct InMemorySpikes {
    n_cells: HashMap<String, usize>,
    sim_duration: f64,
    data: HashMap<String, BTreeMap<ObservationId, Observation>>,
}

impl InMemorySpikes {
    pub fn new(sim_duration: f64) -> Self {
        Self {
            n_cells: HashMap::new(),
            sim_duration,
            data: HashMap::new(),
        }
    }

    /// Adds one observation; the first insert for a population fixes its cell count.
    pub fn insert(&mut self, cell_type: &str, id: ObservationId, cells: Observation) -> Result<()> {
        let expected = *self
            .n_cells
            .entry(cell_type.to_string())
            .or_insert(cells.len());
        if cells.len() != expected {
            return Err(AnalysisError::integrity(format!(
                "observation {id} has {} {cell_type} cells, expected {expected}",
                cells.len()
            )));
        }
        self.data
            .entry(cell_type.to_string())
            .or_default()
            .insert(id, cells);
        Ok(())
    }
}

impl SpikeSource for InMemorySpikes {
    fn n_cells(&self, cell_type: &str) -> Result<usize> {
        self.n_cells
            .get(cell_type)
            .copied()
            .ok_or_else(|| AnalysisError::integrity(format!("no '{cell_type}' cells recorded")))
    }

    fn sim_duration(&self) -> f64 {
        self.sim_duration
    }

    fn get_spikes(
        &self,
        observations: &[ObservationId],
        cell_type: &str,
    ) -> Result<BTreeMap<ObservationId, Observation>> {
        let population = self
            .data
            .get(cell_type)
            .ok_or_else(|| AnalysisError::integrity(format!("no '{cell_type}' cells recorded")))?;
        let mut out = BTreeMap::new();
        for id in observations {
            if let Some(obs) = population.get(id) {
                out.insert(*id, obs.clone());
            }
        }
        Ok(out)
    }
}

/// On-disk record of one observation in a [`JsonSpikeFile`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservationRecord {
    pub pattern: usize,
    pub trial: usize,
    pub cell_type: String,
    pub cells: Vec<Vec<f64>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SpikeFileContents {
    sim_duration: f64,
    observations: Vec<ObservationRecord>,
}

/// Spike source read from a JSON export of the simulation archive.
///
/// ```text
/// { "sim_duration": 300.0,
///   "observations": [ { "pattern": 0, "trial": 0, "cell_type": "grc",
///                       "cells": [[12.5, 40.1], [], ...] }, ... ] }
/// ```
#[derive(Debug, Clone)]
pub struct JsonSpikeFile {
    inner: InMemorySpikes,
}

impl JsonSpikeFile {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let bytes = fs::read(path)?;
        Self::from_slice(&bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let contents: SpikeFileContents = serde_json::from_slice(bytes)?;
        let mut inner = InMemorySpikes::new(contents.sim_duration);
        for record in contents.observations {
            let cells = record
                .cells
                .into_iter()
                .map(SpikeTrain::new)
                .collect::<Result<Vec<_>>>()?;
            inner.insert(
                &record.cell_type,
                ObservationId::new(record.pattern, record.trial),
                cells,
            )?;
        }
        Ok(Self { inner })
    }
}

impl SpikeSource for JsonSpikeFile {
    fn n_cells(&self, cell_type: &str) -> Result<usize> {
        self.inner.n_cells(cell_type)
    }

    fn sim_duration(&self) -> f64 {
        self.inner.sim_duration()
    }

    fn get_spikes(
        &self,
        observations: &[ObservationId],
        cell_type: &str,
    ) -> Result<BTreeMap<ObservationId, Observation>> {
        self.inner.get_spikes(observations, cell_type)
    }
}
