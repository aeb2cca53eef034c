//! Incremental nearest-prototype decoder.
//!
//! The merge tree is replayed bottom-up, one merge per step, starting from one
//! symbol per training observation. Each step retires two live symbols, adds
//! their size-weighted centroid as a new symbol, fills exactly one new column
//! of the test-to-alphabet distance matrix and re-decodes the test set. No
//! distance is ever computed twice and no centroid is recomputed from raw
//! training fields.

use log::{debug, info};
use rand::Rng;
use std::collections::BTreeSet;

use crate::distance::MultineuronMetric;
use crate::error::{AnalysisError, Result, Stage};
use crate::field::Field;
use crate::information::{mutual_information, Estimator};
use crate::linkage::MergeTree;
use crate::results::{CurveKind, MiPoint};

/// Node ids that currently partition the training set, in ascending order.
#[derive(Debug, Clone)]
pub struct LiveClusterSet {
    ordered: BTreeSet<usize>,
    present: Vec<bool>,
}

impl LiveClusterSet {
    /// All `n_leaves` leaves live, room for the `n_leaves - 1` internal nodes.
    pub fn leaves(n_leaves: usize) -> Self {
        let mut present = vec![false; (2 * n_leaves).saturating_sub(1)];
        present[..n_leaves].fill(true);
        Self {
            ordered: (0..n_leaves).collect(),
            present,
        }
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    pub fn contains(&self, id: usize) -> bool {
        self.present.get(id).copied().unwrap_or(false)
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.ordered.iter().copied()
    }

    /// Replaces `left` and `right` with `parent`.
    pub fn merge(&mut self, left: usize, right: usize, parent: usize) -> Result<()> {
        for id in [left, right] {
            if !self.contains(id) {
                return Err(AnalysisError::integrity(format!(
                    "node {id} is not live when merging into {parent}"
                )));
            }
        }
        if parent >= self.present.len() || self.present[parent] {
            return Err(AnalysisError::integrity(format!(
                "node {parent} cannot enter the live set"
            )));
        }
        for id in [left, right] {
            self.present[id] = false;
            self.ordered.remove(&id);
        }
        self.present[parent] = true;
        self.ordered.insert(parent);
        Ok(())
    }
}

/// Symbol prototypes indexed by node id.
#[derive(Debug, Clone)]
pub struct Alphabet {
    prototypes: Vec<Option<Field>>,
}

impl Alphabet {
    /// Each leaf's training field is its own prototype.
    pub fn from_leaves(fields: &[Field]) -> Self {
        let n = fields.len();
        let mut prototypes: Vec<Option<Field>> = fields.iter().cloned().map(Some).collect();
        prototypes.resize(2 * n - 1, None);
        Self { prototypes }
    }

    pub fn get(&self, id: usize) -> Option<&Field> {
        self.prototypes.get(id).and_then(Option::as_ref)
    }

    /// Prototype of the node created by merge `index`: the average of its
    /// children's prototypes weighted by their leaf counts. The children leave
    /// the live set with this merge, so their prototypes are released.
    fn insert_merge(&mut self, tree: &MergeTree, index: usize) -> Result<()> {
        let m = tree.merges()[index];
        let node = tree.n_leaves() + index;
        let (Some(left), Some(right)) = (self.get(m.left), self.get(m.right)) else {
            return Err(AnalysisError::integrity(format!(
                "merge {index} joins node {} and {} before both have prototypes",
                m.left, m.right
            )));
        };
        let merged = Field::weighted_mean(
            left,
            tree.size_of(m.left) as f64,
            right,
            tree.size_of(m.right) as f64,
        );
        self.prototypes[node] = Some(merged);
        self.prototypes[m.left] = None;
        self.prototypes[m.right] = None;
        Ok(())
    }
}

/// `(n_test, 2 n_train - 1)` distances, allocated once, filled column by column.
#[derive(Debug, Clone)]
pub struct AlphabetDistances {
    n_test: usize,
    n_columns: usize,
    data: Vec<f64>,
    filled: Vec<bool>,
}

impl AlphabetDistances {
    pub fn new(n_test: usize, n_columns: usize) -> Self {
        Self {
            n_test,
            n_columns,
            data: vec![f64::NAN; n_test * n_columns],
            filled: vec![false; n_columns],
        }
    }

    pub fn n_test(&self) -> usize {
        self.n_test
    }

    pub fn get(&self, row: usize, column: usize) -> f64 {
        self.data[row * self.n_columns + column]
    }

    pub fn is_filled(&self, column: usize) -> bool {
        self.filled[column]
    }

    /// Distances from every test field to `prototype`. Each column is filled once.
    ///
    /// A NaN distance is a degeneracy error naming the test row and column.
    pub fn fill_column(
        &mut self,
        column: usize,
        tests: &[Field],
        prototype: &Field,
        metric: &MultineuronMetric,
    ) -> Result<()> {
        if self.filled[column] {
            return Err(AnalysisError::integrity(format!(
                "distance column {column} filled twice"
            )));
        }
        for (row, test) in tests.iter().enumerate() {
            let d = metric.distance(test, prototype);
            if d.is_nan() {
                return Err(AnalysisError::degenerate(
                    Stage::AlphabetDistances,
                    format!("distance from test observation {row} to symbol {column} is NaN"),
                ));
            }
            self.data[row * self.n_columns + column] = d;
        }
        self.filled[column] = true;
        Ok(())
    }

    /// Nearest live symbol for every test row.
    ///
    /// Live columns are scanned in ascending id order with a strict `<`, so
    /// ties go to the lowest id. Infinite distances are skipped; a row with no
    /// finite candidate is a degeneracy error.
    pub fn decode(&self, live: &LiveClusterSet) -> Result<Vec<usize>> {
        (0..self.n_test)
            .map(|row| {
                let mut best: Option<(usize, f64)> = None;
                for column in live.iter() {
                    debug_assert!(self.filled[column], "live column {column} not filled");
                    let d = self.get(row, column);
                    if !d.is_finite() {
                        continue;
                    }
                    if best.map_or(true, |(_, b)| d < b) {
                        best = Some((column, d));
                    }
                }
                best.map(|(column, _)| column).ok_or_else(|| {
                    AnalysisError::degenerate(
                        Stage::Decode,
                        format!(
                            "test observation {row} has no finite distance to any of {} live symbols",
                            live.len()
                        ),
                    )
                })
            })
            .collect()
    }
}

/// Replay state: live symbols, their prototypes and the test distances.
pub struct IncrementalDecoder<'a> {
    tree: &'a MergeTree,
    tests: &'a [Field],
    metric: MultineuronMetric,
    alphabet: Alphabet,
    live: LiveClusterSet,
    distances: AlphabetDistances,
    applied: usize,
}

impl<'a> IncrementalDecoder<'a> {
    /// Initial state: one symbol per training field, all leaf columns filled.
    pub fn new(
        tree: &'a MergeTree,
        training: &[Field],
        tests: &'a [Field],
        metric: MultineuronMetric,
    ) -> Result<Self> {
        tree.validate()?;
        let n = tree.n_leaves();
        if training.len() != n {
            return Err(AnalysisError::integrity(format!(
                "tree has {n} leaves but {} training fields were given",
                training.len()
            )));
        }
        let shape = training[0].shape();
        if let Some(bad) = training.iter().chain(tests).find(|f| f.shape() != shape) {
            return Err(AnalysisError::integrity(format!(
                "field shape {:?} differs from {:?}",
                bad.shape(),
                shape
            )));
        }

        let alphabet = Alphabet::from_leaves(training);
        let mut distances = AlphabetDistances::new(tests.len(), 2 * n - 1);
        for (leaf, field) in training.iter().enumerate() {
            distances.fill_column(leaf, tests, field, &metric)?;
        }
        Ok(Self {
            tree,
            tests,
            metric,
            alphabet,
            live: LiveClusterSet::leaves(n),
            distances,
            applied: 0,
        })
    }

    pub fn alphabet_size(&self) -> usize {
        self.live.len()
    }

    /// Merges consumed so far.
    pub fn steps_applied(&self) -> usize {
        self.applied
    }

    pub fn live(&self) -> &LiveClusterSet {
        &self.live
    }

    pub fn alphabet(&self) -> &Alphabet {
        &self.alphabet
    }

    pub fn distances(&self) -> &AlphabetDistances {
        &self.distances
    }

    pub fn decode(&self) -> Result<Vec<usize>> {
        self.distances.decode(&self.live)
    }

    /// Applies the next merge. Returns `false` once only the root is live.
    pub fn advance(&mut self) -> Result<bool> {
        let n = self.tree.n_leaves();
        if self.applied == n - 1 {
            return Ok(false);
        }
        let index = self.applied;
        let m = self.tree.merges()[index];
        let node = n + index;

        self.live.merge(m.left, m.right, node)?;
        self.alphabet.insert_merge(self.tree, index)?;
        let prototype = self
            .alphabet
            .get(node)
            .ok_or_else(|| AnalysisError::integrity(format!("node {node} has no prototype")))?;
        self.distances
            .fill_column(node, self.tests, prototype, &self.metric)?;
        self.applied += 1;

        if self.live.len() != n - self.applied {
            return Err(AnalysisError::integrity(format!(
                "after {} merges {} symbols are live, expected {}",
                self.applied,
                self.live.len(),
                n - self.applied
            )));
        }
        Ok(true)
    }
}

/// Decoded MI curves (plugin and QE) for alphabet sizes `n_train` down to 1.
///
/// `test_classes[i]` is the stimulus pattern of `tests[i]`.
pub fn decoded_information<R: Rng + ?Sized>(
    tree: &MergeTree,
    training: &[Field],
    tests: &[Field],
    test_classes: &[usize],
    n_classes: usize,
    metric: MultineuronMetric,
    rng: &mut R,
) -> Result<Vec<MiPoint>> {
    if tests.len() != test_classes.len() {
        return Err(AnalysisError::integrity(format!(
            "{} test fields but {} test labels",
            tests.len(),
            test_classes.len()
        )));
    }
    let mut decoder = IncrementalDecoder::new(tree, training, tests, metric)?;
    let mut points = Vec::with_capacity(2 * tree.n_leaves());
    loop {
        let alphabet_size = decoder.alphabet_size();
        let decoded = decoder.decode().map_err(|e| match e {
            AnalysisError::NumericDegeneracy { stage, detail } => AnalysisError::NumericDegeneracy {
                stage,
                detail: format!("{detail} (alphabet size {alphabet_size})"),
            },
            other => other,
        })?;
        let plugin = mutual_information(Estimator::Plugin, &decoded, test_classes, n_classes, rng);
        let qe = mutual_information(Estimator::Qe, &decoded, test_classes, n_classes, rng);
        debug!("alphabet size {alphabet_size}: plugin {plugin:.4} bits, qe {qe:.4} bits");
        points.push(MiPoint {
            alphabet_size,
            mi: plugin,
            kind: CurveKind::DecodedPlugin,
        });
        points.push(MiPoint {
            alphabet_size,
            mi: qe,
            kind: CurveKind::DecodedQe,
        });
        if !decoder.advance()? {
            break;
        }
    }
    info!(
        "decoded {} test observations over {} alphabet sizes",
        tests.len(),
        tree.n_leaves()
    );
    Ok(points)
}
