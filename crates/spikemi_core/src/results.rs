//! Result assembly: MI curves indexed by alphabet size.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::activity::ActivityStats;
use crate::archive::Dataset;
use crate::config::ParameterKey;
use crate::error::{AnalysisError, Result};

/// Which curve an MI value belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CurveKind {
    /// True cluster labels of the training set, plugin estimator.
    DirectPlugin,
    /// Decoded test labels, plugin estimator.
    DecodedPlugin,
    /// Decoded test labels, QE bias-corrected estimator.
    DecodedQe,
}

impl CurveKind {
    pub const ALL: [CurveKind; 3] = [
        CurveKind::DirectPlugin,
        CurveKind::DecodedPlugin,
        CurveKind::DecodedQe,
    ];

    pub fn dataset_name(&self) -> &'static str {
        match self {
            CurveKind::DirectPlugin => datasets::TR_DIRECT_MI,
            CurveKind::DecodedPlugin => datasets::TS_DECODED_MI_PLUGIN,
            CurveKind::DecodedQe => datasets::TS_DECODED_MI_QE,
        }
    }
}

/// Dataset names used in the results archive.
pub mod datasets {
    pub const TR_INDEXES: &str = "tr_indexes";
    pub const TR_LINKAGE: &str = "tr_linkage";
    pub const TR_DIRECT_MI: &str = "tr_direct_mi";
    pub const TS_DECODED_MI_PLUGIN: &str = "ts_decoded_mi_plugin";
    pub const TS_DECODED_MI_QE: &str = "ts_decoded_mi_qe";
    pub const O_LEVEL_ARRAY: &str = "o_level_array";
    pub const O_SPARSENESS_HOYER: &str = "o_sparseness_hoyer";
    pub const O_SPARSENESS_ACTIVITY: &str = "o_sparseness_activity";

    /// Every dataset a complete analysis point stores.
    pub const EXPECTED: [&str; 8] = [
        TR_INDEXES,
        TR_LINKAGE,
        TR_DIRECT_MI,
        TS_DECODED_MI_PLUGIN,
        TS_DECODED_MI_QE,
        O_LEVEL_ARRAY,
        O_SPARSENESS_HOYER,
        O_SPARSENESS_ACTIVITY,
    ];
}

/// MI at one alphabet size under one estimator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MiPoint {
    pub alphabet_size: usize,
    pub mi: f64,
    pub kind: CurveKind,
}

/// Dense MI curve: `values[a - 1]` is the MI at alphabet size `a`.
#[derive(Debug, Clone, PartialEq)]
pub struct MiCurve {
    kind: CurveKind,
    values: Vec<f64>,
}

impl MiCurve {
    /// Collects the points of `kind` covering alphabet sizes `1..=max_size` exactly once.
    pub fn from_points(kind: CurveKind, points: &[MiPoint], max_size: usize) -> Result<Self> {
        let mut values = vec![f64::NAN; max_size];
        let mut seen = vec![false; max_size];
        for p in points.iter().filter(|p| p.kind == kind) {
            if p.alphabet_size == 0 || p.alphabet_size > max_size || seen[p.alphabet_size - 1] {
                return Err(AnalysisError::integrity(format!(
                    "unexpected {kind:?} point at alphabet size {}",
                    p.alphabet_size
                )));
            }
            seen[p.alphabet_size - 1] = true;
            values[p.alphabet_size - 1] = p.mi;
        }
        if let Some(missing) = seen.iter().position(|s| !s) {
            return Err(AnalysisError::integrity(format!(
                "{kind:?} curve has no value at alphabet size {}",
                missing + 1
            )));
        }
        Ok(Self { kind, values })
    }

    pub fn from_values(kind: CurveKind, values: Vec<f64>) -> Self {
        Self { kind, values }
    }

    pub fn kind(&self) -> CurveKind {
        self.kind
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn max_alphabet_size(&self) -> usize {
        self.values.len()
    }

    pub fn at(&self, alphabet_size: usize) -> Option<f64> {
        alphabet_size
            .checked_sub(1)
            .and_then(|i| self.values.get(i))
            .copied()
    }

    pub fn points(&self) -> impl Iterator<Item = MiPoint> + '_ {
        self.values.iter().enumerate().map(|(i, &mi)| MiPoint {
            alphabet_size: i + 1,
            mi,
            kind: self.kind,
        })
    }
}

/// Everything one analysis point produces.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisResults {
    pub key: ParameterKey,
    pub n_stim_patterns: usize,
    /// Flat indices of the training observations.
    pub tr_indexes: Vec<usize>,
    /// Merge tree rows `(left, right, distance, size)`.
    pub tr_linkage: Vec<[f64; 4]>,
    /// Alphabet sizes `1..n_train`.
    pub direct: MiCurve,
    /// Alphabet sizes `1..=n_train`.
    pub decoded_plugin: MiCurve,
    pub decoded_qe: MiCurve,
    pub activity: ActivityStats,
}

impl AnalysisResults {
    pub fn curve(&self, kind: CurveKind) -> &MiCurve {
        match kind {
            CurveKind::DirectPlugin => &self.direct,
            CurveKind::DecodedPlugin => &self.decoded_plugin,
            CurveKind::DecodedQe => &self.decoded_qe,
        }
    }

    /// MI at the alphabet size equal to the number of stimulus patterns.
    pub fn point_mi(&self, kind: CurveKind) -> Option<f64> {
        self.curve(kind).at(self.n_stim_patterns)
    }

    pub fn to_datasets(&self) -> Vec<(&'static str, Dataset)> {
        let linkage: Vec<f64> = self.tr_linkage.iter().flatten().copied().collect();
        let n_obs = self.activity.n_observations();
        vec![
            (
                datasets::TR_INDEXES,
                Dataset::vector(self.tr_indexes.iter().map(|&i| i as f64).collect()),
            ),
            (
                datasets::TR_LINKAGE,
                Dataset::new(vec![self.tr_linkage.len(), 4], linkage),
            ),
            (
                datasets::TR_DIRECT_MI,
                Dataset::vector(self.direct.values().to_vec()),
            ),
            (
                datasets::TS_DECODED_MI_PLUGIN,
                Dataset::vector(self.decoded_plugin.values().to_vec()),
            ),
            (
                datasets::TS_DECODED_MI_QE,
                Dataset::vector(self.decoded_qe.values().to_vec()),
            ),
            (
                datasets::O_LEVEL_ARRAY,
                Dataset::new(
                    vec![n_obs, self.activity.n_cells()],
                    self.activity.levels().to_vec(),
                ),
            ),
            (
                datasets::O_SPARSENESS_HOYER,
                Dataset::vector(self.activity.hoyer().to_vec()),
            ),
            (
                datasets::O_SPARSENESS_ACTIVITY,
                Dataset::vector(self.activity.activity().to_vec()),
            ),
        ]
    }

    /// Reassembles results from stored datasets.
    pub fn from_datasets(
        key: ParameterKey,
        n_stim_patterns: usize,
        mut stored: BTreeMap<String, Dataset>,
    ) -> Result<Self> {
        let mut take = |name: &str| {
            stored
                .remove(name)
                .ok_or_else(|| AnalysisError::integrity(format!("dataset '{name}' is missing")))
        };
        let tr_indexes = take(datasets::TR_INDEXES)?
            .data
            .iter()
            .map(|&v| {
                if v.is_finite() && v >= 0.0 && v.fract() == 0.0 {
                    Ok(v as usize)
                } else {
                    Err(AnalysisError::integrity(format!("invalid training index {v}")))
                }
            })
            .collect::<Result<Vec<usize>>>()?;
        if tr_indexes.len() < 2 || tr_indexes.windows(2).any(|w| w[0] >= w[1]) {
            return Err(AnalysisError::integrity(
                "tr_indexes must hold at least two strictly increasing indices",
            ));
        }
        let n_train = tr_indexes.len();
        let linkage = take(datasets::TR_LINKAGE)?;
        if linkage.data.len() % 4 != 0 {
            return Err(AnalysisError::integrity("tr_linkage is not an (n, 4) array"));
        }
        if linkage.data.len() != 4 * (n_train - 1) {
            return Err(AnalysisError::integrity(format!(
                "tr_linkage has {} values, {n_train} training observations need {}",
                linkage.data.len(),
                4 * (n_train - 1)
            )));
        }
        let tr_linkage = linkage
            .data
            .chunks_exact(4)
            .map(|r| [r[0], r[1], r[2], r[3]])
            .collect();
        let direct = MiCurve::from_values(CurveKind::DirectPlugin, take(datasets::TR_DIRECT_MI)?.data);
        let decoded_plugin =
            MiCurve::from_values(CurveKind::DecodedPlugin, take(datasets::TS_DECODED_MI_PLUGIN)?.data);
        let decoded_qe =
            MiCurve::from_values(CurveKind::DecodedQe, take(datasets::TS_DECODED_MI_QE)?.data);
        for (curve, expected) in [
            (&direct, n_train - 1),
            (&decoded_plugin, n_train),
            (&decoded_qe, n_train),
        ] {
            if curve.max_alphabet_size() != expected {
                return Err(AnalysisError::integrity(format!(
                    "{} covers {} alphabet sizes, expected {expected}",
                    curve.kind().dataset_name(),
                    curve.max_alphabet_size()
                )));
            }
        }
        let levels = take(datasets::O_LEVEL_ARRAY)?;
        let n_cells = levels.shape.get(1).copied().unwrap_or(0);
        let activity = ActivityStats::from_parts(
            n_cells,
            levels.data,
            take(datasets::O_SPARSENESS_HOYER)?.data,
            take(datasets::O_SPARSENESS_ACTIVITY)?.data,
        )?;
        Ok(Self {
            key,
            n_stim_patterns,
            tr_indexes,
            tr_linkage,
            direct,
            decoded_plugin,
            decoded_qe,
            activity,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(alphabet_size: usize, mi: f64) -> MiPoint {
        MiPoint {
            alphabet_size,
            mi,
            kind: CurveKind::DecodedPlugin,
        }
    }

    #[test]
    fn curve_from_points_in_any_order() {
        let points = [point(3, 1.5), point(1, 0.0), point(2, 1.0)];
        let curve = MiCurve::from_points(CurveKind::DecodedPlugin, &points, 3).unwrap();
        assert_eq!(curve.values(), &[0.0, 1.0, 1.5]);
        assert_eq!(curve.at(2), Some(1.0));
        assert_eq!(curve.at(0), None);
        assert_eq!(curve.at(4), None);
    }

    #[test]
    fn curve_rejects_gaps_and_duplicates() {
        assert!(MiCurve::from_points(CurveKind::DecodedPlugin, &[point(1, 0.0)], 2).is_err());
        assert!(
            MiCurve::from_points(CurveKind::DecodedPlugin, &[point(1, 0.0), point(1, 0.0)], 1)
                .is_err()
        );
    }

    #[test]
    fn other_kinds_are_ignored() {
        let mut qe = point(1, 9.0);
        qe.kind = CurveKind::DecodedQe;
        let curve =
            MiCurve::from_points(CurveKind::DecodedPlugin, &[qe, point(1, 0.0)], 1).unwrap();
        assert_eq!(curve.values(), &[0.0]);
    }

    fn sample_results() -> AnalysisResults {
        AnalysisResults {
            key: crate::config::AnalysisConfig::default().parameter_key(),
            n_stim_patterns: 2,
            tr_indexes: vec![0, 3],
            tr_linkage: vec![[0.0, 1.0, 0.5, 2.0]],
            direct: MiCurve::from_values(CurveKind::DirectPlugin, vec![0.0]),
            decoded_plugin: MiCurve::from_values(CurveKind::DecodedPlugin, vec![0.0, 1.0]),
            decoded_qe: MiCurve::from_values(CurveKind::DecodedQe, vec![0.0, 0.9]),
            activity: ActivityStats::from_counts(&[vec![1], vec![0]]).unwrap(),
        }
    }

    fn stored(results: &AnalysisResults) -> BTreeMap<String, Dataset> {
        results
            .to_datasets()
            .into_iter()
            .map(|(n, d)| (n.to_string(), d))
            .collect()
    }

    #[test]
    fn malformed_training_indexes_are_rejected() {
        let results = sample_results();
        for bad in [vec![-1.0, 3.0], vec![0.5, 3.0], vec![f64::NAN, 3.0], vec![3.0, 0.0]] {
            let mut sets = stored(&results);
            sets.insert(datasets::TR_INDEXES.to_string(), Dataset::vector(bad.clone()));
            let back = AnalysisResults::from_datasets(results.key.clone(), 2, sets);
            assert!(
                matches!(back, Err(AnalysisError::DataIntegrity(_))),
                "{bad:?} accepted"
            );
        }
    }

    #[test]
    fn curve_lengths_must_match_training_set() {
        let results = sample_results();
        // decoded curve one short, as in a layout that drops the full alphabet
        let mut sets = stored(&results);
        sets.insert(
            datasets::TS_DECODED_MI_PLUGIN.to_string(),
            Dataset::vector(vec![0.0]),
        );
        assert!(matches!(
            AnalysisResults::from_datasets(results.key.clone(), 2, sets),
            Err(AnalysisError::DataIntegrity(_))
        ));

        let mut sets = stored(&results);
        sets.insert(
            datasets::TR_DIRECT_MI.to_string(),
            Dataset::vector(vec![0.0, 1.0]),
        );
        assert!(matches!(
            AnalysisResults::from_datasets(results.key.clone(), 2, sets),
            Err(AnalysisError::DataIntegrity(_))
        ));
    }

    #[test]
    fn datasets_cover_expected_names() {
        let results = sample_results();
        let names: Vec<&str> = results.to_datasets().iter().map(|(n, _)| *n).collect();
        assert_eq!(names, datasets::EXPECTED.to_vec());
        assert_eq!(results.point_mi(CurveKind::DecodedPlugin), Some(1.0));

        let back = AnalysisResults::from_datasets(results.key.clone(), 2, stored(&results)).unwrap();
        assert_eq!(back, results);
    }
}
