//! MI between the clustering of the training set and its true stimulus labels.

use log::debug;

use crate::error::{AnalysisError, Result};
use crate::information::plugin_mi;
use crate::linkage::MergeTree;
use crate::results::{CurveKind, MiPoint};

/// Plugin MI of the flat clustering at every alphabet size `1..n_train`.
///
/// `train_classes[leaf]` is the stimulus pattern of training observation `leaf`.
/// The all-singletons clustering is left out: it always carries the full
/// class entropy and says nothing about the tree.
pub fn direct_information(
    tree: &MergeTree,
    train_classes: &[usize],
    n_classes: usize,
) -> Result<Vec<MiPoint>> {
    let n = tree.n_leaves();
    if train_classes.len() != n {
        return Err(AnalysisError::integrity(format!(
            "tree has {n} leaves but {} training labels were given",
            train_classes.len()
        )));
    }
    (1..n)
        .map(|k| {
            let labels = tree.cut(k)?;
            let mi = plugin_mi(&labels, train_classes, n_classes);
            debug!("direct clustering into {k} clusters: {mi:.4} bits");
            Ok(MiPoint {
                alphabet_size: k,
                mi,
                kind: CurveKind::DirectPlugin,
            })
        })
        .collect()
}
