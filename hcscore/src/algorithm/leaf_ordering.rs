//! Optimal leaf ordering of a dendrogram (Bar-Joseph, Gifford & Jaakkola 2001).
//!
//! Every internal node may flip its two subtrees, giving 2^(n-1) linear orders
//! that are consistent with the tree. The dynamic program below finds the one
//! maximizing the summed similarity of adjacent leaves.
//!
//! For node `v` with subtrees `L` and `R`, `M(v, i, j)` is the best score of an
//! ordering of `v`'s leaves that starts at `i ∈ L` and ends at `j ∈ R`:
//!
//! ```text
//! M(v, i, j) = max_{k, l} M(L, i, k) + S(k, l) + M(R, l, j)
//! ```
//!
//! where `k` ranges over the valid right ends of `L` starting at `i` and `l`
//! over the valid left ends of `R` ending at `j`. Splitting the maximization
//! into an inner max over `k` per `l` brings a node down to
//! `O(|L|·|R|·(|L|+|R|))`.

use std::collections::HashMap;

use nalgebra::DMatrix;

use crate::algorithm::linkage::Dendrogram;

/// Best score and the chosen inner boundary `(k, l)` for an endpoint pair.
type Table = HashMap<(usize, usize), (f64, usize, usize)>;

struct Solver<'a, S: Fn(usize, usize) -> f64> {
    tree: &'a Dendrogram,
    similarity: S,
    leaves: Vec<Vec<usize>>,
    tables: Vec<Table>,
}

impl<'a, S: Fn(usize, usize) -> f64> Solver<'a, S> {
    fn new(tree: &'a Dendrogram, similarity: S) -> Self {
        let nodes = tree.n_leaves + tree.merges.len();
        let mut leaves: Vec<Vec<usize>> = (0..tree.n_leaves).map(|i| vec![i]).collect();
        for merge in &tree.merges {
            let mut under = leaves[merge.left].clone();
            under.extend_from_slice(&leaves[merge.right]);
            leaves.push(under);
        }
        Solver { tree, similarity, leaves, tables: vec![HashMap::new(); nodes] }
    }

    /// `M(node, i, j)` for endpoints on opposite sides, or `i == j` on a leaf.
    fn score(&self, node: usize, i: usize, j: usize) -> Option<f64> {
        if self.tree.is_leaf(node) {
            return (i == node && j == node).then_some(0.0);
        }
        let table = &self.tables[node];
        table.get(&(i, j)).or_else(|| table.get(&(j, i))).map(|entry| entry.0)
    }

    /// Leaves that can close an ordering of `node` starting at `i`.
    fn ends(&self, node: usize, i: usize) -> Vec<usize> {
        match self.tree.children(node) {
            None => vec![node],
            Some((left, right)) => {
                if self.leaves[left].contains(&i) {
                    self.leaves[right].clone()
                } else {
                    self.leaves[left].clone()
                }
            }
        }
    }

    fn solve_node(&mut self, node: usize) {
        let Some((left, right)) = self.tree.children(node) else { return };
        let mut table = Table::new();

        for &i in &self.leaves[left] {
            // best right end k of L for every candidate first leaf l of R
            let mut inner: HashMap<usize, (f64, usize)> = HashMap::new();
            let left_ends = self.ends(left, i);
            for &l in &self.leaves[right] {
                let mut best: Option<(f64, usize)> = None;
                for &k in &left_ends {
                    if let Some(m) = self.score(left, i, k) {
                        let value = m + (self.similarity)(k, l);
                        if best.map_or(true, |(b, _)| value > b) {
                            best = Some((value, k));
                        }
                    }
                }
                if let Some(best) = best {
                    inner.insert(l, best);
                }
            }

            for &j in &self.leaves[right] {
                let mut best: Option<(f64, usize, usize)> = None;
                for l in self.ends(right, j) {
                    let (Some(&(partial, k)), Some(m)) = (inner.get(&l), self.score(right, l, j)) else {
                        continue;
                    };
                    let value = partial + m;
                    if best.map_or(true, |(b, _, _)| value > b) {
                        best = Some((value, k, l));
                    }
                }
                if let Some(best) = best {
                    table.insert((i, j), best);
                }
            }
        }

        self.tables[node] = table;
    }

    /// Leaf sequence of `node` running from `i` to `j`.
    fn order(&self, node: usize, i: usize, j: usize) -> Vec<usize> {
        let Some((left, right)) = self.tree.children(node) else {
            return vec![node];
        };

        if let Some(&(_, k, l)) = self.tables[node].get(&(i, j)) {
            let mut sequence = self.order(left, i, k);
            sequence.extend(self.order(right, l, j));
            sequence
        } else if self.tables[node].contains_key(&(j, i)) {
            let mut sequence = self.order(node, j, i);
            sequence.reverse();
            sequence
        } else {
            self.tree.leaves_under(node)
        }
    }
}

/// Leaf order of `tree` that maximizes `sum S(o[t], o[t + 1])` among all
/// orders obtained by flipping subtrees.
pub fn optimal_leaf_order<S: Fn(usize, usize) -> f64>(tree: &Dendrogram, similarity: S) -> Vec<usize> {
    let Some(root) = tree.root() else {
        return Vec::new();
    };
    if tree.is_leaf(root) {
        return vec![root];
    }

    let mut solver = Solver::new(tree, similarity);
    // merges are stored bottom-up, children always precede their parent
    for node in tree.n_leaves..=root {
        solver.solve_node(node);
    }

    let Some((left, right)) = tree.children(root) else {
        return tree.leaves_list();
    };

    let mut best: Option<(f64, usize, usize)> = None;
    for &i in &solver.leaves[left] {
        for &j in &solver.leaves[right] {
            if let Some(&(value, _, _)) = solver.tables[root].get(&(i, j)) {
                if best.map_or(true, |(b, _, _)| value > b) {
                    best = Some((value, i, j));
                }
            }
        }
    }

    match best {
        Some((_, i, j)) => solver.order(root, i, j),
        None => tree.leaves_list(),
    }
}

/// Optimal order with the similarity `exp(-distance)`.
pub fn optimal_order_for_distances(tree: &Dendrogram, distances: &DMatrix<f64>) -> Vec<usize> {
    optimal_leaf_order(tree, |i, j| (-distances[(i, j)]).exp())
}

/// Sum of adjacent similarities of an order.
pub fn order_score<S: Fn(usize, usize) -> f64>(order: &[usize], similarity: S) -> f64 {
    order.windows(2).map(|w| similarity(w[0], w[1])).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(order: &[usize], leaf: usize) -> usize {
        order.iter().position(|l| *l == leaf).unwrap()
    }

    #[test]
    fn test_near_pairs_stay_adjacent() {
        let distances = DMatrix::from_row_slice(4, 4, &[
            0.0, 1.0, 9.0, 9.0,
            1.0, 0.0, 9.0, 9.0,
            9.0, 9.0, 0.0, 1.0,
            9.0, 9.0, 1.0, 0.0,
        ]);
        let tree = Dendrogram::average_linkage(&distances).unwrap();
        let order = optimal_order_for_distances(&tree, &distances);

        let mut sorted = order.clone();
        sorted.sort();
        assert_eq!(sorted, vec![0, 1, 2, 3]);
        assert_eq!(position(&order, 0).abs_diff(position(&order, 1)), 1);
        assert_eq!(position(&order, 2).abs_diff(position(&order, 3)), 1);
    }

    #[test]
    fn test_flips_subtree_towards_its_neighbour() {
        // 0 and 1 merge first, 1 is much closer to 2 than 0 is
        let distances = DMatrix::from_row_slice(3, 3, &[
            0.0, 1.0, 5.0,
            1.0, 0.0, 2.0,
            5.0, 2.0, 0.0,
        ]);
        let tree = Dendrogram::average_linkage(&distances).unwrap();
        assert_eq!(tree.leaves_list(), vec![2, 0, 1]);

        let order = optimal_order_for_distances(&tree, &distances);
        assert_eq!(position(&order, 1).abs_diff(position(&order, 2)), 1);
        assert_eq!(position(&order, 0).abs_diff(position(&order, 1)), 1);

        let similarity = |i: usize, j: usize| (-distances[(i, j)]).exp();
        assert!(order_score(&order, similarity) > order_score(&tree.leaves_list(), similarity));
    }

    #[test]
    fn test_matches_exhaustive_search() {
        // six points on a line with a deliberately irregular spacing
        let coords: [f64; 6] = [0.0, 0.7, 3.1, 3.3, 6.0, 9.5];
        let n = coords.len();
        let distances = DMatrix::from_fn(n, n, |i, j| (coords[i] - coords[j]).abs());
        let tree = Dendrogram::average_linkage(&distances).unwrap();
        let similarity = |i: usize, j: usize| (-distances[(i, j)]).exp();

        // enumerate every flip combination of the tree
        fn all_orders(tree: &Dendrogram, node: usize) -> Vec<Vec<usize>> {
            match tree.children(node) {
                None => vec![vec![node]],
                Some((l, r)) => {
                    let mut out = Vec::new();
                    for a in all_orders(tree, l) {
                        for b in all_orders(tree, r) {
                            out.push([a.clone(), b.clone()].concat());
                            out.push([b.clone(), a.clone()].concat());
                        }
                    }
                    out
                }
            }
        }

        let best = all_orders(&tree, tree.root().unwrap())
            .iter()
            .map(|o| order_score(o, similarity))
            .fold(f64::NEG_INFINITY, f64::max);

        let order = optimal_order_for_distances(&tree, &distances);
        assert!((order_score(&order, similarity) - best).abs() < 1e-12);
    }

    #[test]
    fn test_trivial_trees() {
        let empty = Dendrogram::average_linkage(&DMatrix::<f64>::zeros(0, 0)).unwrap();
        assert!(optimal_order_for_distances(&empty, &DMatrix::<f64>::zeros(0, 0)).is_empty());

        let single = Dendrogram::average_linkage(&DMatrix::<f64>::zeros(1, 1)).unwrap();
        assert_eq!(optimal_order_for_distances(&single, &DMatrix::<f64>::zeros(1, 1)), vec![0]);

        let pair = DMatrix::from_row_slice(2, 2, &[0.0, 0.3, 0.3, 0.0]);
        let tree = Dendrogram::average_linkage(&pair).unwrap();
        let mut order = optimal_order_for_distances(&tree, &pair);
        order.sort();
        assert_eq!(order, vec![0, 1]);
    }
}
