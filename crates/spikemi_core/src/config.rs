use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[cfg(feature = "cli")]
use clap::{Args, ValueEnum};

use crate::error::{AnalysisError, Result};

/// Agglomeration rule used to update inter-cluster distances after a merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "cli", derive(ValueEnum))]
pub enum LinkageMethod {
    Single,
    Complete,
    Average,
    Weighted,
    Ward,
}

impl LinkageMethod {
    pub fn name(&self) -> &'static str {
        match self {
            LinkageMethod::Single => "single",
            LinkageMethod::Complete => "complete",
            LinkageMethod::Average => "average",
            LinkageMethod::Weighted => "weighted",
            LinkageMethod::Ward => "ward",
        }
    }

    /// Legacy numeric codes used by older parameter files (0: ward, 1: weighted).
    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            0 => Ok(LinkageMethod::Ward),
            1 => Ok(LinkageMethod::Weighted),
            other => Err(AnalysisError::InvalidConfig(format!(
                "unknown linkage method code {other}"
            ))),
        }
    }
}

impl fmt::Display for LinkageMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for LinkageMethod {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "single" => Ok(LinkageMethod::Single),
            "complete" => Ok(LinkageMethod::Complete),
            "average" => Ok(LinkageMethod::Average),
            "weighted" => Ok(LinkageMethod::Weighted),
            "ward" => Ok(LinkageMethod::Ward),
            code if code.chars().all(|c| c.is_ascii_digit()) && !code.is_empty() => code
                .parse::<u8>()
                .map_err(|e| AnalysisError::InvalidConfig(e.to_string()))
                .and_then(Self::from_code),
            other => Err(AnalysisError::InvalidConfig(format!(
                "unknown linkage method '{other}'"
            ))),
        }
    }
}

/// Parameters of one analysis point.
///
/// Every run receives its own copy; nothing here is process-wide.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "cli", derive(Args))]
#[serde(default)]
pub struct AnalysisConfig {
    /// Number of distinct stimulus patterns
    #[cfg_attr(feature = "cli", arg(long, global = true, default_value_t = 20))]
    pub n_stim_patterns: usize,

    /// Trials recorded per stimulus pattern
    #[cfg_attr(feature = "cli", arg(long, global = true, default_value_t = 20))]
    pub n_trials: usize,

    /// Simulated duration of each trial (ms)
    #[cfg_attr(feature = "cli", arg(long, global = true, default_value_t = 300.0))]
    pub sim_duration: f64,

    /// Trailing part of each trial that is analysed (ms)
    #[cfg_attr(feature = "cli", arg(long, global = true, default_value_t = 300.0))]
    pub ana_duration: f64,

    /// Training trials drawn per stimulus pattern
    #[cfg_attr(feature = "cli", arg(long, global = true, default_value_t = 10))]
    pub training_size: usize,

    /// Weight of cross-cell terms in the multineuron distance
    #[cfg_attr(feature = "cli", arg(long, global = true, default_value_t = 0.0))]
    pub multineuron_metric_mixing: f64,

    /// Linkage rule for hierarchical clustering
    #[cfg_attr(feature = "cli", arg(long, global = true, value_enum, default_value_t = LinkageMethod::Weighted))]
    pub linkage_method: LinkageMethod,

    /// Exponential kernel time constant (ms)
    #[cfg_attr(feature = "cli", arg(long, global = true, default_value_t = 5.0))]
    pub tau: f64,

    /// Sampling step of the convolved fields (ms)
    #[cfg_attr(feature = "cli", arg(long, global = true, default_value_t = 2.0))]
    pub dt: f64,

    /// Seed for the train/test split and QE subsampling
    #[cfg_attr(feature = "cli", arg(long, global = true, default_value_t = 0))]
    pub seed: u64,

    /// Cell population whose spikes are analysed
    #[cfg_attr(feature = "cli", arg(long, global = true, default_value = "grc"))]
    pub cell_type: String,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            n_stim_patterns: 20,
            n_trials: 20,
            sim_duration: 300.0,
            ana_duration: 300.0,
            training_size: 10,
            multineuron_metric_mixing: 0.0,
            linkage_method: LinkageMethod::Weighted,
            tau: 5.0,
            dt: 2.0,
            seed: 0,
            cell_type: "grc".to_string(),
        }
    }
}

impl AnalysisConfig {
    pub fn validate(&self) -> Result<()> {
        let bad = |msg: String| Err(AnalysisError::InvalidConfig(msg));
        if self.n_stim_patterns == 0 {
            return bad("n_stim_patterns must be at least 1".into());
        }
        if self.training_size == 0 || self.training_size >= self.n_trials {
            return bad(format!(
                "training_size must be in 1..{} (got {})",
                self.n_trials, self.training_size
            ));
        }
        if self.n_stim_patterns * self.training_size < 2 {
            return bad("the training set needs at least two observations".into());
        }
        if !(self.tau.is_finite() && self.tau > 0.0) {
            return bad(format!("tau must be positive (got {})", self.tau));
        }
        if !(self.dt.is_finite() && self.dt > 0.0) {
            return bad(format!("dt must be positive (got {})", self.dt));
        }
        if !(self.sim_duration.is_finite() && self.sim_duration > 0.0) {
            return bad(format!(
                "sim_duration must be positive (got {})",
                self.sim_duration
            ));
        }
        if !(self.ana_duration > 0.0 && self.ana_duration <= self.sim_duration) {
            return bad(format!(
                "ana_duration must be in (0, {}] (got {})",
                self.sim_duration, self.ana_duration
            ));
        }
        if !self.multineuron_metric_mixing.is_finite() {
            return bad("multineuron_metric_mixing must be finite".into());
        }
        Ok(())
    }

    pub fn n_train(&self) -> usize {
        self.n_stim_patterns * self.training_size
    }

    pub fn n_test(&self) -> usize {
        self.n_stim_patterns * (self.n_trials - self.training_size)
    }

    /// Start of the analysis window inside each simulated trial.
    pub fn window_start(&self) -> f64 {
        self.sim_duration - self.ana_duration
    }

    pub fn parameter_key(&self) -> ParameterKey {
        ParameterKey::from(self)
    }
}

/// Full parameter tuple identifying one analysis point in the results archive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ParameterKey(String);

impl ParameterKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Filesystem-safe rendering (path separators flattened).
    pub fn file_stem(&self) -> String {
        self.0.replace('/', "_")
    }
}

impl From<&AnalysisConfig> for ParameterKey {
    fn from(c: &AnalysisConfig) -> Self {
        ParameterKey(format!(
            "sp{}/t{}/sdur{}/adur{}/train{}/mix{:.2}/method_{}/tau{}/dt{}",
            c.n_stim_patterns,
            c.n_trials,
            c.sim_duration,
            c.ana_duration,
            c.training_size,
            c.multineuron_metric_mixing,
            c.linkage_method,
            c.tau,
            c.dt
        ))
    }
}

impl fmt::Display for ParameterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(AnalysisConfig::default().validate().is_ok());
    }

    #[test]
    fn training_size_must_leave_test_trials() {
        let config = AnalysisConfig {
            training_size: 20,
            ..AnalysisConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(AnalysisError::InvalidConfig(_))
        ));
    }

    #[test]
    fn rejects_non_positive_kernel() {
        let config = AnalysisConfig {
            tau: 0.0,
            ..AnalysisConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn linkage_parses_names_and_codes() {
        assert_eq!("Ward".parse::<LinkageMethod>().unwrap(), LinkageMethod::Ward);
        assert_eq!("1".parse::<LinkageMethod>().unwrap(), LinkageMethod::Weighted);
        assert!("7".parse::<LinkageMethod>().is_err());
        assert!("median".parse::<LinkageMethod>().is_err());
    }

    #[test]
    fn parameter_key_covers_full_tuple() {
        let key = AnalysisConfig::default().parameter_key();
        assert_eq!(
            key.as_str(),
            "sp20/t20/sdur300/adur300/train10/mix0.00/method_weighted/tau5/dt2"
        );
        assert!(!key.file_stem().contains('/'));
    }
}
