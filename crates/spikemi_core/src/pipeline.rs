//! Single analysis-run entry points.
//!
//! One call runs one parameter point from raw spikes to the three MI curves.
//! All state lives in the call; nothing survives between runs.

use log::{info, warn};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeMap;

use crate::activity::ActivityStats;
use crate::archive::ResultsArchive;
use crate::config::AnalysisConfig;
use crate::decoder::decoded_information;
use crate::direct::direct_information;
use crate::distance::{CondensedMatrix, MultineuronMetric};
use crate::error::{AnalysisError, Result};
use crate::field::{ExponentialKernel, Field, FieldEncoder};
use crate::linkage::linkage;
use crate::partition::TrialSplit;
use crate::results::{datasets, AnalysisResults, CurveKind, MiCurve};
use crate::spikes::{check_observations, spike_counts, Observation, ObservationId, SpikeSource};

/// Runs the analysis with a seeded random train/test split.
pub fn run_analysis(config: &AnalysisConfig, source: &dyn SpikeSource) -> Result<AnalysisResults> {
    config.validate()?;
    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    let split = TrialSplit::balanced(
        config.n_stim_patterns,
        config.n_trials,
        config.training_size,
        &mut rng,
    )?;
    analyse(config, source, &split, &mut rng)
}

/// Runs the analysis with a fixed train/test split.
pub fn run_with_split(
    config: &AnalysisConfig,
    source: &dyn SpikeSource,
    split: &TrialSplit,
) -> Result<AnalysisResults> {
    config.validate()?;
    split.validate()?;
    if split.n_stim_patterns() != config.n_stim_patterns
        || split.n_train_per_pattern() != config.training_size
        || split.n_train_per_pattern() + split.n_test_per_pattern() != config.n_trials
    {
        return Err(AnalysisError::integrity(format!(
            "split of {} patterns x {} training trials does not match the configuration",
            split.n_stim_patterns(),
            split.n_train_per_pattern()
        )));
    }
    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    analyse(config, source, split, &mut rng)
}

fn analyse(
    config: &AnalysisConfig,
    source: &dyn SpikeSource,
    split: &TrialSplit,
    rng: &mut ChaCha8Rng,
) -> Result<AnalysisResults> {
    let key = config.parameter_key();
    info!("analysing {key}");

    if (source.sim_duration() - config.sim_duration).abs() > 1e-9 {
        return Err(AnalysisError::integrity(format!(
            "spike source simulates {} ms, configuration expects {} ms",
            source.sim_duration(),
            config.sim_duration
        )));
    }
    let n_cells = source.n_cells(&config.cell_type)?;
    let all_ids: Vec<ObservationId> = (0..config.n_stim_patterns)
        .flat_map(|p| (0..config.n_trials).map(move |t| ObservationId::new(p, t)))
        .collect();
    let raw = source.get_spikes(&all_ids, &config.cell_type)?;
    check_observations(&all_ids, &raw, n_cells)?;

    let start = config.window_start();
    let windowed: BTreeMap<ObservationId, Observation> = raw
        .into_iter()
        .map(|(id, cells)| (id, cells.iter().map(|c| c.windowed(start)).collect()))
        .collect();

    let ordered: Vec<&Observation> = all_ids.iter().map(|id| &windowed[id]).collect();
    let activity = ActivityStats::from_counts(&spike_counts(&ordered))?;

    let encoder = FieldEncoder::new(ExponentialKernel::new(config.tau, config.dt)?, config.ana_duration);
    let encode = |ids: &[ObservationId]| -> (Vec<Field>, Vec<usize>) {
        ids.iter()
            .map(|id| (encoder.encode(&windowed[id]), id.pattern))
            .unzip()
    };
    let train_ids = split.train_ids();
    let test_ids = split.test_ids();
    let (train_fields, train_classes) = encode(&train_ids);
    let (test_fields, test_classes) = encode(&test_ids);
    info!(
        "{} training and {} test fields of {} cells x {} timepoints",
        train_fields.len(),
        test_fields.len(),
        n_cells,
        encoder.n_timepoints()
    );

    let metric = MultineuronMetric::new(config.multineuron_metric_mixing);
    let distances = CondensedMatrix::pairwise(&train_fields, &metric)?;
    let tree = linkage(&distances, config.linkage_method)?;

    let n_train = train_fields.len();
    let direct = direct_information(&tree, &train_classes, config.n_stim_patterns)?;
    let decoded = decoded_information(
        &tree,
        &train_fields,
        &test_fields,
        &test_classes,
        config.n_stim_patterns,
        metric,
        rng,
    )?;

    let results = AnalysisResults {
        key,
        n_stim_patterns: config.n_stim_patterns,
        tr_indexes: split.train_indexes(),
        tr_linkage: tree.to_rows(),
        direct: MiCurve::from_points(CurveKind::DirectPlugin, &direct, n_train - 1)?,
        decoded_plugin: MiCurve::from_points(CurveKind::DecodedPlugin, &decoded, n_train)?,
        decoded_qe: MiCurve::from_points(CurveKind::DecodedQe, &decoded, n_train)?,
        activity,
    };
    if let Some(mi) = results.point_mi(CurveKind::DecodedPlugin) {
        info!(
            "decoded MI at {} symbols: {mi:.4} bits (qe {:.4})",
            config.n_stim_patterns,
            results.point_mi(CurveKind::DecodedQe).unwrap_or(f64::NAN)
        );
    }
    Ok(results)
}

/// Stores every dataset of `results` under its key.
pub fn store_results(archive: &dyn ResultsArchive, results: &AnalysisResults) -> Result<()> {
    for (name, dataset) in results.to_datasets() {
        archive.store_result(&results.key, name, &dataset)?;
    }
    Ok(())
}

/// Loads a complete stored result for `config`, `None` if any dataset is missing.
pub fn load_results(
    config: &AnalysisConfig,
    archive: &dyn ResultsArchive,
) -> Result<Option<AnalysisResults>> {
    let key = config.parameter_key();
    if !archive.is_complete(&key, &datasets::EXPECTED)? {
        return Ok(None);
    }
    let mut stored = BTreeMap::new();
    for name in datasets::EXPECTED {
        match archive.load_result(&key, name)? {
            Some(dataset) => {
                stored.insert(name.to_string(), dataset);
            }
            None => return Ok(None),
        }
    }
    let results = AnalysisResults::from_datasets(key, config.n_stim_patterns, stored)?;
    // the stored tree must still be a valid merge tree
    crate::linkage::MergeTree::from_rows(results.tr_indexes.len(), &results.tr_linkage)?;
    Ok(Some(results))
}

/// Returns the stored result for `config` when complete, otherwise runs and stores it.
///
/// `force` recomputes and overwrites whatever is stored.
pub fn run_or_load(
    config: &AnalysisConfig,
    source: &dyn SpikeSource,
    archive: &dyn ResultsArchive,
    force: bool,
) -> Result<AnalysisResults> {
    config.validate()?;
    if !force {
        match load_results(config, archive) {
            Ok(Some(results)) => {
                info!("loaded stored results for {}", results.key);
                return Ok(results);
            }
            Ok(None) => {}
            Err(AnalysisError::CorruptDataset { key, name }) => {
                warn!("stored dataset '{name}' under '{key}' is corrupt, recomputing");
            }
            Err(e) => return Err(e),
        }
    }
    let results = run_analysis(config, source)?;
    store_results(archive, &results)?;
    Ok(results)
}
