use anyhow::Context;
use serde::{Deserialize, Serialize};
use spikemi_core::AnalysisConfig;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Returns the ~/.spikemi directory, creating it if needed.
/// Falls back to a local `.spikemi` directory if the home directory cannot be determined.
pub fn spikemi_data_dir() -> PathBuf {
    match dirs::home_dir() {
        Some(mut path) => {
            path.push(".spikemi");
            if let Err(e) = fs::create_dir_all(&path) {
                warn!(error = %e, "Could not create ~/.spikemi, falling back to local .spikemi");
                return local_fallback();
            }
            path
        }
        None => {
            warn!("Could not determine home directory, falling back to local .spikemi");
            local_fallback()
        }
    }
}

fn local_fallback() -> PathBuf {
    let fallback = PathBuf::from(".spikemi");
    let _ = fs::create_dir_all(&fallback);
    fallback
}

/// Contents of a runner TOML file.
///
/// ```toml
/// archive_dir = "/data/spikemi"
///
/// [analysis]
/// n_stim_patterns = 20
/// training_size = 10
/// linkage_method = "weighted"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RunnerConfig {
    #[serde(default)]
    pub analysis: AnalysisConfig,
    /// Results archive root; `~/.spikemi/results` when absent
    #[serde(default)]
    pub archive_dir: Option<PathBuf>,
}

impl RunnerConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: RunnerConfig = toml::from_str(&content)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config)
    }

    pub fn archive_dir(&self) -> PathBuf {
        self.archive_dir
            .clone()
            .unwrap_or_else(|| spikemi_data_dir().join("results"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spikemi_core::LinkageMethod;

    #[test]
    fn partial_toml_keeps_defaults() {
        let config: RunnerConfig = toml::from_str(
            r#"
            archive_dir = "/tmp/spikemi-results"

            [analysis]
            n_stim_patterns = 4
            linkage_method = "ward"
            "#,
        )
        .unwrap();
        assert_eq!(config.analysis.n_stim_patterns, 4);
        assert_eq!(config.analysis.linkage_method, LinkageMethod::Ward);
        assert_eq!(config.analysis.n_trials, AnalysisConfig::default().n_trials);
        assert_eq!(
            config.archive_dir(),
            PathBuf::from("/tmp/spikemi-results")
        );
    }

    #[test]
    fn empty_toml_is_default() {
        let config: RunnerConfig = toml::from_str("").unwrap();
        assert_eq!(config.analysis, AnalysisConfig::default());
        assert!(config.archive_dir.is_none());
    }
}
