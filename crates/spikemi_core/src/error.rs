//! Error taxonomy for the analysis pipeline.
//!
//! Integrity and degeneracy errors are fatal: they mean the configuration or the
//! upstream data is wrong, and a run never retries them. Estimation edge cases
//! (empty cells of the joint table) are not errors at all; they are resolved
//! inline by the `0 * log 0 = 0` convention in [`crate::information`].

use thiserror::Error;

/// Pipeline stage at which a numeric degeneracy was detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Pairwise distances between training fields.
    TrainingDistances,
    /// Test-to-alphabet distance column fill.
    AlphabetDistances,
    /// Nearest-symbol decoding of a test observation.
    Decode,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::TrainingDistances => write!(f, "training distances"),
            Stage::AlphabetDistances => write!(f, "alphabet distances"),
            Stage::Decode => write!(f, "decode"),
        }
    }
}

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("data integrity violation: {0}")]
    DataIntegrity(String),

    #[error("numeric degeneracy during {stage}: {detail}")]
    NumericDegeneracy { stage: Stage, detail: String },

    #[error("stored dataset '{name}' under '{key}' failed its integrity check")]
    CorruptDataset { key: String, name: String },

    #[error("archive I/O error: {0}")]
    Archive(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AnalysisError {
    pub(crate) fn integrity(msg: impl Into<String>) -> Self {
        AnalysisError::DataIntegrity(msg.into())
    }

    pub(crate) fn degenerate(stage: Stage, detail: impl Into<String>) -> Self {
        AnalysisError::NumericDegeneracy {
            stage,
            detail: detail.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, AnalysisError>;
