//! End-to-end runs on small synthetic populations with known information content.

use spikemi_core::{
    run_analysis, run_with_split, AnalysisConfig, AnalysisError, CurveKind, InMemorySpikes,
    LinkageMethod, ObservationId, SpikeTrain, TrialSplit,
};

fn single_spike(t: f64) -> Vec<SpikeTrain> {
    vec![SpikeTrain::new(vec![t]).unwrap()]
}

#[test]
fn two_patterns_one_cell_carry_one_bit() {
    let mut source = InMemorySpikes::new(100.0);
    for trial in 0..4 {
        source
            .insert("grc", ObservationId::new(0, trial), single_spike(10.0))
            .unwrap();
        source
            .insert("grc", ObservationId::new(1, trial), single_spike(50.0))
            .unwrap();
    }
    let config = AnalysisConfig {
        n_stim_patterns: 2,
        n_trials: 4,
        sim_duration: 100.0,
        ana_duration: 100.0,
        training_size: 2,
        tau: 5.0,
        dt: 2.0,
        ..AnalysisConfig::default()
    };
    let split = TrialSplit::explicit(4, vec![vec![0, 1], vec![0, 1]]).unwrap();

    let results = run_with_split(&config, &source, &split).unwrap();
    println!("decoded plugin: {:?}", results.decoded_plugin.values());
    println!("decoded qe:     {:?}", results.decoded_qe.values());

    assert_eq!(results.decoded_plugin.at(2), Some(1.0));
    assert_eq!(results.point_mi(CurveKind::DecodedPlugin), Some(1.0));
    assert_eq!(results.decoded_plugin.at(1), Some(0.0));
    assert_eq!(results.tr_indexes, vec![0, 1, 4, 5]);
    // training set splits into its two classes at k = 2
    assert!((results.direct.at(2).unwrap() - 1.0).abs() < 1e-12);
}

/// 4 patterns x 10 trials, 4 cells, pattern `p` fires only cell `p`.
fn corner_source(sim_duration: f64) -> InMemorySpikes {
    let mut source = InMemorySpikes::new(sim_duration);
    for pattern in 0..4 {
        for trial in 0..10 {
            let cells = (0..4)
                .map(|cell| {
                    if cell == pattern {
                        // small per-trial jitter keeps fields distinct within a class
                        SpikeTrain::new(vec![20.0 + trial as f64 * 0.5, 60.0]).unwrap()
                    } else {
                        SpikeTrain::empty()
                    }
                })
                .collect();
            source
                .insert("grc", ObservationId::new(pattern, trial), cells)
                .unwrap();
        }
    }
    source
}

fn corner_config(method: LinkageMethod) -> AnalysisConfig {
    AnalysisConfig {
        n_stim_patterns: 4,
        n_trials: 10,
        sim_duration: 100.0,
        ana_duration: 100.0,
        training_size: 5,
        linkage_method: method,
        seed: 7,
        ..AnalysisConfig::default()
    }
}

#[test]
fn separable_corners_decode_two_bits() {
    let results = run_analysis(&corner_config(LinkageMethod::Weighted), &corner_source(100.0)).unwrap();
    let at_four = results.point_mi(CurveKind::DecodedPlugin).unwrap();
    println!("decoded plugin at 4 symbols: {at_four:.4} bits");
    assert!((at_four - 2.0).abs() < 0.05);

    for size in 1..=3 {
        let mi = results.decoded_plugin.at(size).unwrap();
        assert!(at_four + 1e-9 >= mi, "size {size}: {mi} > {at_four}");
    }
    for size in 1..=4 {
        let plugin = results.decoded_plugin.at(size).unwrap();
        let qe = results.decoded_qe.at(size).unwrap();
        assert!(qe <= plugin + 1e-9, "size {size}: qe {qe} > plugin {plugin}");
    }
}

#[test]
fn every_linkage_recovers_the_corners() {
    for method in [
        LinkageMethod::Single,
        LinkageMethod::Complete,
        LinkageMethod::Average,
        LinkageMethod::Weighted,
        LinkageMethod::Ward,
    ] {
        let results = run_analysis(&corner_config(method), &corner_source(100.0)).unwrap();
        let mi = results.point_mi(CurveKind::DecodedPlugin).unwrap();
        assert!((mi - 2.0).abs() < 0.05, "{method}: {mi}");
    }
}

#[test]
fn analysis_window_drops_early_spikes() {
    // a 300 ms trial analysed over its last 100 ms: all spikes fall before the window
    let source = corner_source(300.0);
    let config = AnalysisConfig {
        sim_duration: 300.0,
        ana_duration: 100.0,
        ..corner_config(LinkageMethod::Weighted)
    };
    let results = run_analysis(&config, &source).unwrap();
    assert!(results.activity.levels().iter().all(|&c| c == 0.0));
    assert_eq!(results.activity.mean_activity(), 1.0);
    assert_eq!(results.point_mi(CurveKind::DecodedPlugin), Some(0.0));
}

#[test]
fn cell_count_mismatch_aborts_before_computation() {
    let mut source = corner_source(100.0);
    let err = source.insert("grc", ObservationId::new(0, 0), single_spike(5.0));
    assert!(matches!(err, Err(AnalysisError::DataIntegrity(_))));

    let mut partial = InMemorySpikes::new(100.0);
    partial
        .insert("grc", ObservationId::new(0, 0), single_spike(5.0))
        .unwrap();
    let result = run_analysis(&corner_config(LinkageMethod::Weighted), &partial);
    assert!(matches!(result, Err(AnalysisError::DataIntegrity(_))));
}

#[test]
fn unbalanced_split_is_rejected() {
    let split = TrialSplit::explicit(10, vec![vec![0, 1, 2, 3, 4], vec![0, 1, 2, 3]]);
    assert!(matches!(split, Err(AnalysisError::DataIntegrity(_))));
}

#[test]
fn invalid_kernel_is_a_config_error() {
    let config = AnalysisConfig {
        tau: 0.0,
        ..corner_config(LinkageMethod::Weighted)
    };
    assert!(matches!(
        run_analysis(&config, &corner_source(100.0)),
        Err(AnalysisError::InvalidConfig(_))
    ));
}
