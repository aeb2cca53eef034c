//! Clustering-based decoding and mutual-information estimation for the spike
//! trains of a simulated neural population.
//!
//! A run turns spike trains into exponentially filtered population fields,
//! clusters the training fields hierarchically under a multineuron distance,
//! then replays the merge tree one step at a time to decode the held-out test
//! set with a shrinking alphabet of cluster centroids. At every alphabet size
//! the mutual information between decoded symbol and stimulus is estimated
//! with a plugin and a bias-corrected (QE) estimator.
//!
//! ```no_run
//! use spikemi_core::{run_or_load, AnalysisConfig, DirectoryArchive, JsonSpikeFile};
//!
//! # fn main() -> spikemi_core::Result<()> {
//! let config = AnalysisConfig::default();
//! let spikes = JsonSpikeFile::open("spikes.json")?;
//! let archive = DirectoryArchive::open("results")?;
//! let results = run_or_load(&config, &spikes, &archive, false)?;
//! println!("{:?}", results.decoded_plugin.values());
//! # Ok(())
//! # }
//! ```

pub mod activity;
pub mod archive;
pub mod config;
pub mod decoder;
pub mod direct;
pub mod distance;
pub mod error;
pub mod field;
pub mod information;
pub mod linkage;
pub mod partition;
pub mod pipeline;
pub mod results;
pub mod spikes;

pub use archive::{Dataset, DirectoryArchive, MemoryArchive, ResultsArchive};
pub use config::{AnalysisConfig, LinkageMethod, ParameterKey};
pub use error::{AnalysisError, Result, Stage};
pub use partition::TrialSplit;
pub use pipeline::{load_results, run_analysis, run_or_load, run_with_split, store_results};
pub use results::{datasets, AnalysisResults, CurveKind, MiCurve, MiPoint};
pub use spikes::{InMemorySpikes, JsonSpikeFile, ObservationId, SpikeSource, SpikeTrain};
