use nalgebra::DMatrix;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

/// One agglomeration step. Leaves are `0..n`, the cluster created by step `k`
/// gets id `n + k`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Merge {
    pub left: usize,
    pub right: usize,
    pub distance: f64,
    pub size: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Dendrogram {
    pub n_leaves: usize,
    pub merges: Vec<Merge>,
}

impl Dendrogram {
    /// Average linkage (UPGMA) over a square distance matrix.
    ///
    /// Ties resolve to the pair with the smallest ids, so identical input gives
    /// an identical tree. Zero distances merge first like any other pair.
    pub fn average_linkage(distances: &DMatrix<f64>) -> Result<Self, String> {
        let n = distances.nrows();
        if distances.ncols() != n {
            return Err(format!("distance matrix must be square, got {}x{}", n, distances.ncols()));
        }

        let total = (2 * n).saturating_sub(1);
        let mut d = vec![vec![0.0f64; total]; total];
        for i in 0..n {
            for j in 0..n {
                d[i][j] = distances[(i, j)];
            }
        }

        let mut size = vec![1usize; total];
        let mut active: Vec<usize> = (0..n).collect();
        let mut merges = Vec::with_capacity(n.saturating_sub(1));

        for step in 0..n.saturating_sub(1) {
            let mut best: Option<(usize, usize, OrderedFloat<f64>)> = None;
            for (ai, &a) in active.iter().enumerate() {
                for &b in &active[ai + 1..] {
                    let candidate = OrderedFloat(d[a][b]);
                    if best.map_or(true, |(_, _, current)| candidate < current) {
                        best = Some((a, b, candidate));
                    }
                }
            }
            let Some((a, b, distance)) = best else { break };

            let merged = n + step;
            size[merged] = size[a] + size[b];
            for &c in &active {
                if c == a || c == b {
                    continue;
                }
                let average = (size[a] as f64 * d[a][c] + size[b] as f64 * d[b][c]) / size[merged] as f64;
                d[merged][c] = average;
                d[c][merged] = average;
            }

            active.retain(|&c| c != a && c != b);
            active.push(merged);

            merges.push(Merge {
                left: a.min(b),
                right: a.max(b),
                distance: distance.0.max(0.0),
                size: size[merged],
            });
        }

        Ok(Dendrogram { n_leaves: n, merges })
    }

    pub fn root(&self) -> Option<usize> {
        match self.n_leaves {
            0 => None,
            n => Some(n + self.merges.len() - 1),
        }
    }

    pub fn is_leaf(&self, node: usize) -> bool {
        node < self.n_leaves
    }

    pub fn children(&self, node: usize) -> Option<(usize, usize)> {
        if self.is_leaf(node) {
            return None;
        }
        self.merges.get(node - self.n_leaves).map(|m| (m.left, m.right))
    }

    /// Leaves below `node`, left subtree first.
    pub fn leaves_under(&self, node: usize) -> Vec<usize> {
        let mut leaves = Vec::new();
        let mut stack = vec![node];
        while let Some(current) = stack.pop() {
            match self.children(current) {
                Some((left, right)) => {
                    stack.push(right);
                    stack.push(left);
                }
                None => leaves.push(current),
            }
        }
        leaves
    }

    /// In-order leaf sequence of the whole tree.
    pub fn leaves_list(&self) -> Vec<usize> {
        self.root().map(|root| self.leaves_under(root)).unwrap_or_default()
    }
}
