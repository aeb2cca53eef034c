//! Mutual information between a discrete output symbol and the stimulus class.
//!
//! Inputs are "sorted": the stimulus class of every observation is known and
//! the class sizes are fixed by the experiment design. Only the output symbol is
//! estimated from data. All values are in bits.

use log::debug;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Mutual-information estimator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Estimator {
    /// Empirical frequencies, no correction.
    Plugin,
    /// Plugin estimates on 1, 2 and 4 disjoint data fractions, extrapolated to
    /// infinite sample size.
    Qe,
}

/// `-sum p log2 p` over non-zero counts.
fn entropy(counts: impl Iterator<Item = usize>, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let n = total as f64;
    counts
        .filter(|&c| c > 0)
        .map(|c| {
            let p = c as f64 / n;
            -p * p.log2()
        })
        .sum()
}

/// Plugin estimate of `I(output; class) = H(output) - H(output | class)`.
///
/// `outputs[i]` and `classes[i]` describe observation `i`; output symbols may
/// be arbitrary ids. Joint cells with no observations contribute `0 * log 0 = 0`.
pub fn plugin_mi(outputs: &[usize], classes: &[usize], n_classes: usize) -> f64 {
    debug_assert_eq!(outputs.len(), classes.len());
    let total = outputs.len();
    if total == 0 {
        return 0.0;
    }

    let mut symbol_index: HashMap<usize, usize> = HashMap::new();
    for &o in outputs {
        let next = symbol_index.len();
        symbol_index.entry(o).or_insert(next);
    }
    let n_symbols = symbol_index.len();

    // joint[class * n_symbols + symbol]
    let mut joint = vec![0usize; n_classes * n_symbols];
    let mut marginal = vec![0usize; n_symbols];
    let mut class_sizes = vec![0usize; n_classes];
    for (&o, &y) in outputs.iter().zip(classes) {
        let x = symbol_index[&o];
        joint[y * n_symbols + x] += 1;
        marginal[x] += 1;
        class_sizes[y] += 1;
    }

    let h_x = entropy(marginal.iter().copied(), total);
    let h_x_given_y: f64 = class_sizes
        .iter()
        .enumerate()
        .filter(|&(_, &n_y)| n_y > 0)
        .map(|(y, &n_y)| {
            let row = &joint[y * n_symbols..(y + 1) * n_symbols];
            (n_y as f64 / total as f64) * entropy(row.iter().copied(), n_y)
        })
        .sum();

    let empty_cells = joint.iter().filter(|&&c| c == 0).count();
    if empty_cells > 0 {
        debug!(
            "{empty_cells} of {} joint cells empty ({n_symbols} symbols x {n_classes} classes)",
            joint.len()
        );
    }
    h_x - h_x_given_y
}

/// Bias-corrected MI by extrapolation over data fractions.
///
/// The observations of each class are shuffled once, then split into 2 and 4
/// near-equal disjoint parts. With `I_f` the mean plugin estimate over the `f`
/// parts, a quadratic in `1/N` through `(1/N, I_1)`, `(2/N, I_2)`, `(4/N, I_4)`
/// evaluated at `1/N = 0` gives `8/3 I_1 - 2 I_2 + 1/3 I_4`. Classes with fewer
/// than four observations fall back to the linear form `2 I_1 - I_2`, and with
/// fewer than two the plugin value is returned as is.
pub fn qe_mi<R: Rng + ?Sized>(
    outputs: &[usize],
    classes: &[usize],
    n_classes: usize,
    rng: &mut R,
) -> f64 {
    let mut by_class: Vec<Vec<usize>> = vec![Vec::new(); n_classes];
    for (i, &y) in classes.iter().enumerate() {
        by_class[y].push(i);
    }
    let smallest = by_class
        .iter()
        .filter(|members| !members.is_empty())
        .map(Vec::len)
        .min()
        .unwrap_or(0);

    let i_1 = plugin_mi(outputs, classes, n_classes);
    if smallest < 2 {
        return i_1;
    }
    for members in &mut by_class {
        members.shuffle(rng);
    }
    let i_2 = fraction_mi(outputs, classes, n_classes, &by_class, 2);
    if smallest < 4 {
        return 2.0 * i_1 - i_2;
    }
    let i_4 = fraction_mi(outputs, classes, n_classes, &by_class, 4);
    8.0 / 3.0 * i_1 - 2.0 * i_2 + i_4 / 3.0
}

/// Mean plugin MI over `parts` disjoint subsets, each taking a contiguous slice
/// of every class's (shuffled) members.
fn fraction_mi(
    outputs: &[usize],
    classes: &[usize],
    n_classes: usize,
    by_class: &[Vec<usize>],
    parts: usize,
) -> f64 {
    let mut sub_outputs = Vec::new();
    let mut sub_classes = Vec::new();
    let mut sum = 0.0;
    for part in 0..parts {
        sub_outputs.clear();
        sub_classes.clear();
        for members in by_class {
            let m = members.len();
            for &i in &members[part * m / parts..(part + 1) * m / parts] {
                sub_outputs.push(outputs[i]);
                sub_classes.push(classes[i]);
            }
        }
        sum += plugin_mi(&sub_outputs, &sub_classes, n_classes);
    }
    sum / parts as f64
}

/// MI estimate under the chosen estimator.
pub fn mutual_information<R: Rng + ?Sized>(
    estimator: Estimator,
    outputs: &[usize],
    classes: &[usize],
    n_classes: usize,
    rng: &mut R,
) -> f64 {
    match estimator {
        Estimator::Plugin => plugin_mi(outputs, classes, n_classes),
        Estimator::Qe => qe_mi(outputs, classes, n_classes, rng),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn classes(n_classes: usize, per_class: usize) -> Vec<usize> {
        (0..n_classes)
            .flat_map(|c| std::iter::repeat(c).take(per_class))
            .collect()
    }

    #[test]
    fn perfect_code_carries_log2_classes() {
        let y = classes(4, 6);
        let x: Vec<usize> = y.iter().map(|c| c + 100).collect();
        assert!((plugin_mi(&x, &y, 4) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn constant_output_carries_nothing() {
        let y = classes(3, 5);
        assert_eq!(plugin_mi(&vec![7; 15], &y, 3), 0.0);
    }

    #[test]
    fn merged_classes_lose_one_bit() {
        let y = classes(4, 4);
        let x: Vec<usize> = y.iter().map(|c| c / 2).collect();
        assert!((plugin_mi(&x, &y, 4) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn empty_joint_cells_do_not_produce_nan() {
        let y = vec![0, 0, 1, 1];
        let x = vec![0, 1, 2, 2];
        let mi = plugin_mi(&x, &y, 3);
        assert!(mi.is_finite());
        assert!((mi - 1.0).abs() < 1e-12);
    }

    #[test]
    fn qe_matches_plugin_for_deterministic_code() {
        let y = classes(4, 8);
        let x: Vec<usize> = y.iter().map(|c| c % 2).collect();
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let qe = qe_mi(&x, &y, 4, &mut rng);
        assert!((qe - plugin_mi(&x, &y, 4)).abs() < 1e-9);
    }

    #[test]
    fn qe_reduces_bias_of_random_code() {
        // outputs independent of class: true MI is 0, plugin is biased upwards
        let y = classes(4, 16);
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let (mut plugin, mut qe) = (0.0, 0.0);
        for _ in 0..20 {
            let x: Vec<usize> = y.iter().map(|_| rng.gen_range(0..8)).collect();
            plugin += plugin_mi(&x, &y, 4);
            qe += qe_mi(&x, &y, 4, &mut rng);
        }
        assert!(plugin > 0.0);
        assert!(qe.abs() < plugin);
    }

    #[test]
    fn qe_with_tiny_classes_falls_back() {
        let y = vec![0, 1];
        let x = vec![0, 1];
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        assert_eq!(qe_mi(&x, &y, 2, &mut rng), plugin_mi(&x, &y, 2));

        let y = vec![0, 0, 1, 1];
        let x = vec![0, 0, 1, 1];
        assert!((qe_mi(&x, &y, 2, &mut rng) - 1.0).abs() < 1e-12);
    }
}
