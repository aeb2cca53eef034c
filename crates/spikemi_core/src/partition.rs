//! Balanced train/test partition of the observations.
//!
//! Every stimulus pattern contributes the same number of trials to the training
//! set and the same number to the test set; trials inside a pattern are either
//! drawn at random (seeded) or given explicitly.

use rand::seq::index::sample;
use rand::Rng;

use crate::error::{AnalysisError, Result};
use crate::spikes::ObservationId;

#[derive(Debug, Clone, PartialEq)]
pub struct TrialSplit {
    n_stim_patterns: usize,
    n_trials: usize,
    /// Training trials per pattern, sorted.
    train: Vec<Vec<usize>>,
}

impl TrialSplit {
    /// Draws `training_size` distinct trials per pattern.
    pub fn balanced<R: Rng + ?Sized>(
        n_stim_patterns: usize,
        n_trials: usize,
        training_size: usize,
        rng: &mut R,
    ) -> Result<Self> {
        if training_size == 0 || training_size >= n_trials {
            return Err(AnalysisError::integrity(format!(
                "cannot draw {training_size} training trials out of {n_trials}"
            )));
        }
        let train = (0..n_stim_patterns)
            .map(|_| {
                let mut picked = sample(rng, n_trials, training_size).into_vec();
                picked.sort_unstable();
                picked
            })
            .collect();
        Ok(Self {
            n_stim_patterns,
            n_trials,
            train,
        })
    }

    /// Uses the given training trials for each pattern; the rest are test trials.
    pub fn explicit(n_trials: usize, train: Vec<Vec<usize>>) -> Result<Self> {
        let mut split = Self {
            n_stim_patterns: train.len(),
            n_trials,
            train,
        };
        for trials in &mut split.train {
            trials.sort_unstable();
        }
        split.validate()?;
        Ok(split)
    }

    /// Checks per-pattern balance and that training trials are distinct and in range.
    pub fn validate(&self) -> Result<()> {
        let Some(first) = self.train.first() else {
            return Err(AnalysisError::integrity("partition has no stimulus patterns"));
        };
        let per_pattern = first.len();
        if per_pattern == 0 || per_pattern >= self.n_trials {
            return Err(AnalysisError::integrity(format!(
                "{per_pattern} training trials per pattern leaves no valid test set out of {}",
                self.n_trials
            )));
        }
        for (pattern, trials) in self.train.iter().enumerate() {
            if trials.len() != per_pattern {
                return Err(AnalysisError::integrity(format!(
                    "pattern {pattern} has {} training trials, pattern 0 has {per_pattern}",
                    trials.len()
                )));
            }
            if trials.windows(2).any(|w| w[0] == w[1]) {
                return Err(AnalysisError::integrity(format!(
                    "pattern {pattern} lists a training trial twice"
                )));
            }
            if let Some(&t) = trials.iter().find(|&&t| t >= self.n_trials) {
                return Err(AnalysisError::integrity(format!(
                    "pattern {pattern} trial {t} is out of range"
                )));
            }
        }
        Ok(())
    }

    pub fn n_stim_patterns(&self) -> usize {
        self.n_stim_patterns
    }

    pub fn n_train_per_pattern(&self) -> usize {
        self.train.first().map_or(0, Vec::len)
    }

    pub fn n_test_per_pattern(&self) -> usize {
        self.n_trials - self.n_train_per_pattern()
    }

    /// Training observations, grouped by pattern.
    pub fn train_ids(&self) -> Vec<ObservationId> {
        self.train
            .iter()
            .enumerate()
            .flat_map(|(p, trials)| trials.iter().map(move |&t| ObservationId::new(p, t)))
            .collect()
    }

    /// Test observations (the complement), grouped by pattern.
    pub fn test_ids(&self) -> Vec<ObservationId> {
        self.train
            .iter()
            .enumerate()
            .flat_map(|(p, trials)| {
                (0..self.n_trials)
                    .filter(move |t| trials.binary_search(t).is_err())
                    .map(move |t| ObservationId::new(p, t))
            })
            .collect()
    }

    /// Flat indices (`pattern * n_trials + trial`) of the training observations.
    pub fn train_indexes(&self) -> Vec<usize> {
        self.train_ids()
            .iter()
            .map(|id| id.flat_index(self.n_trials))
            .collect()
    }
}
