//! Agglomerative hierarchical clustering.
//!
//! Builds a [`MergeTree`] from a condensed distance matrix with the
//! nearest-neighbour-chain algorithm (O(n^2) time for every supported linkage,
//! all of which are reducible), then orders the merges by distance and assigns
//! internal node ids `n..2n-2` in that order.
//!
//! Leaf ids are `0..n`; merge `i` creates node `n + i`.

use log::{debug, info};

use crate::config::LinkageMethod;
use crate::distance::CondensedMatrix;
use crate::error::{AnalysisError, Result};

/// One agglomeration step: `left` and `right` join at `distance` into a node of `size` leaves.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Merge {
    pub left: usize,
    pub right: usize,
    pub distance: f64,
    pub size: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MergeTree {
    n_leaves: usize,
    merges: Vec<Merge>,
}

impl MergeTree {
    /// Builds and validates a tree from explicit merge records.
    pub fn new(n_leaves: usize, merges: Vec<Merge>) -> Result<Self> {
        let tree = Self { n_leaves, merges };
        tree.validate()?;
        Ok(tree)
    }

    /// Rebuilds a tree from `(left, right, distance, size)` rows, as persisted.
    pub fn from_rows(n_leaves: usize, rows: &[[f64; 4]]) -> Result<Self> {
        let as_id = |v: f64| -> Result<usize> {
            if v >= 0.0 && v.fract() == 0.0 && v.is_finite() {
                Ok(v as usize)
            } else {
                Err(AnalysisError::integrity(format!("invalid node id {v} in linkage row")))
            }
        };
        let merges = rows
            .iter()
            .map(|r| {
                Ok(Merge {
                    left: as_id(r[0])?,
                    right: as_id(r[1])?,
                    distance: r[2],
                    size: as_id(r[3])?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Self::new(n_leaves, merges)
    }

    pub fn to_rows(&self) -> Vec<[f64; 4]> {
        self.merges
            .iter()
            .map(|m| [m.left as f64, m.right as f64, m.distance, m.size as f64])
            .collect()
    }

    pub fn n_leaves(&self) -> usize {
        self.n_leaves
    }

    pub fn merges(&self) -> &[Merge] {
        &self.merges
    }

    pub fn root(&self) -> usize {
        2 * self.n_leaves - 2
    }

    pub fn is_leaf(&self, id: usize) -> bool {
        id < self.n_leaves
    }

    /// Number of leaves under `id`.
    pub fn size_of(&self, id: usize) -> usize {
        if self.is_leaf(id) {
            1
        } else {
            self.merges[id - self.n_leaves].size
        }
    }

    /// Checks structure and ordering of the merges.
    ///
    /// Each merge must join two distinct nodes that exist and are still
    /// unmerged, its size must be the sum of its children's sizes, and merge
    /// distances must be non-decreasing so that node ids follow merge order.
    pub fn validate(&self) -> Result<()> {
        let n = self.n_leaves;
        if n < 2 {
            return Err(AnalysisError::integrity(format!(
                "a merge tree needs at least two leaves, got {n}"
            )));
        }
        if self.merges.len() != n - 1 {
            return Err(AnalysisError::integrity(format!(
                "{} leaves need {} merges, got {}",
                n,
                n - 1,
                self.merges.len()
            )));
        }
        let mut consumed = vec![false; 2 * n - 1];
        let mut previous = f64::NEG_INFINITY;
        for (i, m) in self.merges.iter().enumerate() {
            let node = n + i;
            for child in [m.left, m.right] {
                if child >= node {
                    return Err(AnalysisError::integrity(format!(
                        "merge {i} references node {child} before it exists"
                    )));
                }
                if consumed[child] {
                    return Err(AnalysisError::integrity(format!(
                        "merge {i} reuses node {child}"
                    )));
                }
                consumed[child] = true;
            }
            if m.left == m.right {
                return Err(AnalysisError::integrity(format!("merge {i} joins a node with itself")));
            }
            let expected = self.size_of(m.left) + self.size_of(m.right);
            if m.size != expected {
                return Err(AnalysisError::integrity(format!(
                    "node {node} records size {}, children sum to {expected}",
                    m.size
                )));
            }
            if m.distance.is_nan() || m.distance < previous {
                return Err(AnalysisError::integrity(format!(
                    "non-monotonic merge tree: merge {i} at distance {} follows {previous}",
                    m.distance
                )));
            }
            previous = m.distance;
        }
        Ok(())
    }

    /// Flat clustering with exactly `k` clusters, labels in `1..=k`.
    ///
    /// Clusters are the components left after applying the first `n - k`
    /// merges, labelled in order of their smallest leaf. `k == n` is the
    /// all-singletons clustering and is built directly from the leaves.
    pub fn cut(&self, k: usize) -> Result<Vec<usize>> {
        let n = self.n_leaves;
        if k == 0 || k > n {
            return Err(AnalysisError::InvalidConfig(format!(
                "cannot cut {n} leaves into {k} clusters"
            )));
        }
        if k == n {
            return Ok((1..=n).collect());
        }
        let mut sets = LeafUnion::new(n);
        // a leaf below each node, so a node's component can be addressed by a leaf
        let mut leaf_of: Vec<usize> = (0..n).collect();
        for m in &self.merges[..n - k] {
            let (a, b) = (leaf_of[m.left], leaf_of[m.right]);
            sets.union(a, b);
            leaf_of.push(a);
        }
        let mut label_of_root = vec![0usize; n];
        let mut next = 0;
        Ok((0..n)
            .map(|leaf| {
                let root = sets.find(leaf);
                if label_of_root[root] == 0 {
                    next += 1;
                    label_of_root[root] = next;
                }
                label_of_root[root]
            })
            .collect())
    }
}

/// Union-find over leaf indices with path halving.
struct LeafUnion {
    parent: Vec<usize>,
}

impl LeafUnion {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            let (lo, hi) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[hi] = lo;
        }
    }
}

/// Lance-Williams update: distance from `k` to the union of `i` and `j`.
fn lance_williams(
    method: LinkageMethod,
    d_ki: f64,
    d_kj: f64,
    d_ij: f64,
    n_i: f64,
    n_j: f64,
    n_k: f64,
) -> f64 {
    match method {
        LinkageMethod::Single => d_ki.min(d_kj),
        LinkageMethod::Complete => d_ki.max(d_kj),
        LinkageMethod::Average => (n_i * d_ki + n_j * d_kj) / (n_i + n_j),
        LinkageMethod::Weighted => 0.5 * (d_ki + d_kj),
        LinkageMethod::Ward => {
            let t = n_i + n_j + n_k;
            (((n_i + n_k) * d_ki * d_ki + (n_j + n_k) * d_kj * d_kj - n_k * d_ij * d_ij) / t)
                .max(0.0)
                .sqrt()
        }
    }
}

/// Clusters `n` points given their condensed pairwise distances.
pub fn linkage(distances: &CondensedMatrix, method: LinkageMethod) -> Result<MergeTree> {
    let n = distances.n();
    if n < 2 {
        return Err(AnalysisError::integrity(format!(
            "clustering needs at least two observations, got {n}"
        )));
    }
    let mut d = distances.clone();
    let mut size = vec![1usize; n];
    let mut active = vec![true; n];
    let mut chain: Vec<usize> = Vec::with_capacity(n);
    // (slot_a, slot_b, distance), slots are leaf indices standing for their cluster
    let mut raw: Vec<(usize, usize, f64)> = Vec::with_capacity(n - 1);

    for _ in 0..n - 1 {
        if chain.is_empty() {
            let start = active.iter().position(|&a| a).unwrap_or(0);
            chain.push(start);
        }
        let (x, y, dist) = loop {
            let x = chain[chain.len() - 1];
            let prev = if chain.len() > 1 {
                Some(chain[chain.len() - 2])
            } else {
                None
            };
            let (mut best, mut best_d) = match prev {
                Some(p) => (p, d.get(x, p)),
                None => (usize::MAX, f64::INFINITY),
            };
            for k in (0..n).filter(|&k| active[k] && k != x) {
                let dk = d.get(x, k);
                if dk < best_d {
                    best = k;
                    best_d = dk;
                }
            }
            if best == usize::MAX {
                // all remaining distances are infinite
                best = (0..n)
                    .find(|&k| active[k] && k != x)
                    .ok_or_else(|| AnalysisError::integrity("no cluster left to merge"))?;
                best_d = d.get(x, best);
            }
            if Some(best) == prev {
                chain.truncate(chain.len() - 2);
                break (x, best, best_d);
            }
            chain.push(best);
        };

        // the union lives on in the larger slot index
        let (gone, keep) = if x < y { (x, y) } else { (y, x) };
        let (n_i, n_j) = (size[gone] as f64, size[keep] as f64);
        for k in 0..n {
            if !active[k] || k == gone || k == keep {
                continue;
            }
            let updated = lance_williams(
                method,
                d.get(k, gone),
                d.get(k, keep),
                dist,
                n_i,
                n_j,
                size[k] as f64,
            );
            // x and y are reciprocal nearest neighbours, so only rounding can undercut `dist`
            d.set(k, keep, updated.max(dist));
        }
        active[gone] = false;
        size[keep] += size[gone];
        raw.push((gone, keep, dist));
    }

    // reducible linkages: sorting by distance yields a valid merge order
    raw.sort_by(|a, b| a.2.total_cmp(&b.2));

    let mut node_of = LinkNodes::new(n);
    let mut merges = Vec::with_capacity(n - 1);
    for (i, &(a, b, dist)) in raw.iter().enumerate() {
        let (na, nb) = (node_of.find(a), node_of.find(b));
        let (left, right) = if na < nb { (na, nb) } else { (nb, na) };
        let node = n + i;
        let merged = node_of.size[left] + node_of.size[right];
        node_of.join(left, right, node, merged);
        merges.push(Merge {
            left,
            right,
            distance: dist,
            size: merged,
        });
        debug!("merge {i}: {left} + {right} -> {node} at {dist:.6} (size {merged})");
    }
    info!("built {} linkage over {} observations", method, n);
    MergeTree::new(n, merges)
}

/// Union-find whose representatives are tree node ids (leaves then internal nodes).
struct LinkNodes {
    parent: Vec<usize>,
    size: Vec<usize>,
}

impl LinkNodes {
    fn new(n: usize) -> Self {
        let total = 2 * n - 1;
        Self {
            parent: (0..total).collect(),
            size: (0..total).map(|i| usize::from(i < n)).collect(),
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        while self.parent[x] != root {
            let next = self.parent[x];
            self.parent[x] = root;
            x = next;
        }
        root
    }

    fn join(&mut self, a: usize, b: usize, node: usize, size: usize) {
        self.parent[a] = node;
        self.parent[b] = node;
        self.size[node] = size;
    }
}
