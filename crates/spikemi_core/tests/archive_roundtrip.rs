//! Results survive a trip through the on-disk archive and are reused on the next run.

use std::fs;
use std::path::PathBuf;

use spikemi_core::{
    datasets, load_results, run_or_load, AnalysisConfig, DirectoryArchive, JsonSpikeFile,
    ResultsArchive,
};

fn scratch_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("spikemi-it-{tag}-{}", std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    dir
}

fn spike_file() -> JsonSpikeFile {
    let mut observations = Vec::new();
    for pattern in 0..3 {
        for trial in 0..6 {
            let onset = 10.0 + 30.0 * pattern as f64 + trial as f64;
            observations.push(format!(
                r#"{{"pattern": {pattern}, "trial": {trial}, "cell_type": "grc",
                    "cells": [[{onset}, {}], [], [{}]]}}"#,
                onset + 5.0,
                150.0 - onset
            ));
        }
    }
    let json = format!(
        r#"{{"sim_duration": 150.0, "observations": [{}]}}"#,
        observations.join(",")
    );
    JsonSpikeFile::from_slice(json.as_bytes()).unwrap()
}

fn config() -> AnalysisConfig {
    AnalysisConfig {
        n_stim_patterns: 3,
        n_trials: 6,
        sim_duration: 150.0,
        ana_duration: 150.0,
        training_size: 3,
        multineuron_metric_mixing: 0.5,
        seed: 42,
        ..AnalysisConfig::default()
    }
}

#[test]
fn stored_results_are_reloaded() {
    let root = scratch_dir("reload");
    let archive = DirectoryArchive::open(&root).unwrap();
    let spikes = spike_file();

    let computed = run_or_load(&config(), &spikes, &archive, false).unwrap();
    let key = config().parameter_key();
    assert!(archive.is_complete(&key, &datasets::EXPECTED).unwrap());
    println!("stored under {}", root.join(key.file_stem()).display());

    let reopened = DirectoryArchive::open(&root).unwrap();
    let loaded = load_results(&config(), &reopened).unwrap().unwrap();
    assert_eq!(loaded, computed);
    assert_eq!(loaded.decoded_plugin.max_alphabet_size(), 9);
    assert_eq!(loaded.direct.max_alphabet_size(), 8);
    assert_eq!(loaded.activity.n_observations(), 18);
    assert_eq!(loaded.activity.n_cells(), 3);

    fs::remove_dir_all(&root).unwrap();
}

#[test]
fn corrupt_dataset_triggers_recompute() {
    let root = scratch_dir("corrupt");
    let archive = DirectoryArchive::open(&root).unwrap();
    let spikes = spike_file();
    let computed = run_or_load(&config(), &spikes, &archive, false).unwrap();

    let key = config().parameter_key();
    let path = root
        .join(key.file_stem())
        .join(format!("{}.json", datasets::TR_DIRECT_MI));
    fs::write(&path, br#"{"shape":[1],"data":[99.0]}"#).unwrap();
    assert!(load_results(&config(), &archive).is_err());

    let recomputed = run_or_load(&config(), &spikes, &archive, false).unwrap();
    assert_eq!(recomputed, computed);
    assert_eq!(load_results(&config(), &archive).unwrap(), Some(computed));

    fs::remove_dir_all(&root).unwrap();
}

#[test]
fn different_parameters_do_not_collide() {
    let root = scratch_dir("keys");
    let archive = DirectoryArchive::open(&root).unwrap();
    let spikes = spike_file();
    run_or_load(&config(), &spikes, &archive, false).unwrap();

    let other = AnalysisConfig {
        multineuron_metric_mixing: 0.0,
        ..config()
    };
    assert_ne!(other.parameter_key(), config().parameter_key());
    assert_eq!(load_results(&other, &archive).unwrap(), None);

    fs::remove_dir_all(&root).unwrap();
}
