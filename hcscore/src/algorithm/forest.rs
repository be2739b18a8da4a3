//! Random forest classifier.
//!
//! An ensemble of fully grown CART trees (Gini impurity) fitted on bootstrap
//! draws of the training rows, with a random feature subset considered at
//! every split. Class weights can be balanced so that small populations weigh
//! as much as large ones. Every tree derives its own RNG from the forest seed
//! and its index, which keeps the fitted forest independent of how rayon
//! schedules the trees.

use std::collections::BTreeSet;

use ordered_float::OrderedFloat;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::data::population::PopulationId;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ForestParams {
    pub n_trees: usize,
    /// Features considered per split, `None` means `floor(sqrt(n_features))`.
    pub max_features: Option<usize>,
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    /// Weight classes by `n_rows / (n_classes * class_rows)`.
    pub balanced: bool,
    pub bootstrap: bool,
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_trees: 10,
            max_features: None,
            max_depth: None,
            min_samples_split: 2,
            balanced: true,
            bootstrap: true,
            seed: 42,
        }
    }
}

/// Labeled rows, stored row-major.
///
/// Anchored rows are part of every tree's sample regardless of the bootstrap
/// draw, so the forest always fits them.
#[derive(Clone, Debug, Default)]
pub struct TrainingSet {
    pub values: Vec<f32>,
    pub n_features: usize,
    pub labels: Vec<PopulationId>,
    pub anchored: Vec<bool>,
}

impl TrainingSet {
    pub fn new(n_features: usize) -> Self {
        TrainingSet { n_features, ..Default::default() }
    }

    pub fn push(&mut self, row: &[f32], label: PopulationId, anchored: bool) {
        assert_eq!(row.len(), self.n_features, "row width must match the training set");
        self.values.extend_from_slice(row);
        self.labels.push(label);
        self.anchored.push(anchored);
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn classes(&self) -> Vec<PopulationId> {
        self.labels.iter().copied().collect::<BTreeSet<_>>().into_iter().collect()
    }

    fn value(&self, row: usize, feature: usize) -> f32 {
        self.values[row * self.n_features + feature]
    }
}

#[derive(Clone, Debug)]
enum Node {
    Split { feature: usize, threshold: f32, left: usize, right: usize },
    Leaf { distribution: Vec<f64> },
}

struct Split {
    feature: usize,
    threshold: f32,
    impurity: f64,
}

/// Class encoding and weights shared by all trees of one fit.
struct FitContext<'a> {
    data: &'a TrainingSet,
    class_of: Vec<usize>,
    class_weights: Vec<f64>,
    n_classes: usize,
    max_features: usize,
}

fn weighted_gini(class_totals: &[f64], total: f64) -> f64 {
    if total <= 0.0 {
        return 0.0;
    }
    total - class_totals.iter().map(|w| w * w).sum::<f64>() / total
}

fn tree_seed(seed: u64, tree: usize) -> u64 {
    seed ^ (tree as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15)
}

#[derive(Clone, Debug)]
pub struct DecisionTree {
    nodes: Vec<Node>,
}

impl DecisionTree {
    fn fit(ctx: &FitContext, samples: Vec<(usize, f64)>, max_depth: Option<usize>, min_samples_split: usize, rng: &mut StdRng) -> Self {
        let mut nodes = vec![Node::Leaf { distribution: Vec::new() }];
        let mut pending = vec![(0usize, samples, 0usize)];

        while let Some((slot, samples, depth)) = pending.pop() {
            let mut totals = vec![0.0; ctx.n_classes];
            for &(row, weight) in &samples {
                totals[ctx.class_of[row]] += weight;
            }
            let total: f64 = totals.iter().sum();

            let pure = totals.iter().filter(|w| **w > 0.0).count() <= 1;
            let exhausted = samples.len() < min_samples_split || max_depth.is_some_and(|d| depth >= d);

            let split = if pure || exhausted {
                None
            } else {
                best_split(ctx, &samples, &totals, total, rng)
            };

            match split {
                Some(split) => {
                    let (left_samples, right_samples): (Vec<_>, Vec<_>) = samples
                        .into_iter()
                        .partition(|(row, _)| ctx.data.value(*row, split.feature) <= split.threshold);

                    let left = nodes.len();
                    let right = left + 1;
                    nodes.push(Node::Leaf { distribution: Vec::new() });
                    nodes.push(Node::Leaf { distribution: Vec::new() });
                    nodes[slot] = Node::Split { feature: split.feature, threshold: split.threshold, left, right };

                    pending.push((right, right_samples, depth + 1));
                    pending.push((left, left_samples, depth + 1));
                }
                None => {
                    let distribution = if total > 0.0 {
                        totals.iter().map(|w| w / total).collect()
                    } else {
                        totals
                    };
                    nodes[slot] = Node::Leaf { distribution };
                }
            }
        }

        DecisionTree { nodes }
    }

    /// Class distribution of the leaf `row` falls into.
    pub fn predict_proba(&self, row: &[f32]) -> &[f64] {
        let mut index = 0;
        loop {
            match &self.nodes[index] {
                Node::Split { feature, threshold, left, right } => {
                    index = if row[*feature] <= *threshold { *left } else { *right };
                }
                Node::Leaf { distribution } => return distribution,
            }
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

/// Scan the randomly ordered features for the split with the lowest weighted
/// Gini impurity. Like CART implementations usually do, the search keeps
/// going past `max_features` until at least one valid split was found.
fn best_split(ctx: &FitContext, samples: &[(usize, f64)], totals: &[f64], total: f64, rng: &mut StdRng) -> Option<Split> {
    let mut features: Vec<usize> = (0..ctx.data.n_features).collect();
    features.shuffle(rng);

    let mut best: Option<Split> = None;
    let mut sorted: Vec<(f32, usize, f64)> = Vec::with_capacity(samples.len());

    for (visited, &feature) in features.iter().enumerate() {
        if visited >= ctx.max_features && best.is_some() {
            break;
        }

        sorted.clear();
        sorted.extend(samples.iter().map(|&(row, w)| (ctx.data.value(row, feature), ctx.class_of[row], w)));
        sorted.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut left = vec![0.0; ctx.n_classes];
        let mut right = totals.to_vec();
        let mut left_total = 0.0;
        let mut right_total = total;

        for i in 0..sorted.len().saturating_sub(1) {
            let (value, class, weight) = sorted[i];
            left[class] += weight;
            right[class] -= weight;
            left_total += weight;
            right_total -= weight;

            let next = sorted[i + 1].0;
            // equal values cannot be separated, NaN never compares greater
            if !(next > value) {
                continue;
            }

            let impurity = weighted_gini(&left, left_total) + weighted_gini(&right, right_total);
            if best.as_ref().map_or(true, |b| impurity < b.impurity - 1e-12) {
                let mid = value + (next - value) / 2.0;
                let threshold = if mid < next { mid } else { value };
                best = Some(Split { feature, threshold, impurity });
            }
        }
    }

    best
}

#[derive(Clone, Debug)]
pub struct RandomForest {
    classes: Vec<PopulationId>,
    trees: Vec<DecisionTree>,
}

impl RandomForest {
    pub fn fit(data: &TrainingSet, params: &ForestParams) -> Result<Self, String> {
        if data.is_empty() {
            return Err("cannot fit a forest without training rows".to_string());
        }
        if data.n_features == 0 {
            return Err("cannot fit a forest without features".to_string());
        }
        if params.n_trees == 0 {
            return Err("a forest needs at least one tree".to_string());
        }

        let classes = data.classes();
        let class_of: Vec<usize> = data
            .labels
            .iter()
            .map(|label| classes.binary_search(label).unwrap_or_default())
            .collect();

        let mut class_rows = vec![0usize; classes.len()];
        for &class in &class_of {
            class_rows[class] += 1;
        }

        let class_weights: Vec<f64> = if params.balanced {
            class_rows
                .iter()
                .map(|rows| data.len() as f64 / (classes.len() * rows) as f64)
                .collect()
        } else {
            vec![1.0; classes.len()]
        };

        let max_features = params
            .max_features
            .unwrap_or_else(|| (data.n_features as f64).sqrt().floor() as usize)
            .max(1)
            .min(data.n_features);

        let ctx = FitContext { data, class_of, class_weights, n_classes: classes.len(), max_features };

        let trees = (0..params.n_trees)
            .into_par_iter()
            .map(|tree| {
                let mut rng = StdRng::seed_from_u64(tree_seed(params.seed, tree));
                let samples = draw_samples(&ctx, params.bootstrap, &mut rng);
                DecisionTree::fit(&ctx, samples, params.max_depth, params.min_samples_split, &mut rng)
            })
            .collect();

        Ok(RandomForest { classes, trees })
    }

    pub fn classes(&self) -> &[PopulationId] {
        &self.classes
    }

    pub fn trees(&self) -> &[DecisionTree] {
        &self.trees
    }

    /// Mean of the per-tree leaf distributions, indexed like [`Self::classes`].
    pub fn predict_proba(&self, row: &[f32]) -> Vec<f64> {
        let mut probabilities = vec![0.0; self.classes.len()];
        for tree in &self.trees {
            for (p, q) in probabilities.iter_mut().zip(tree.predict_proba(row)) {
                *p += q;
            }
        }
        let n = self.trees.len() as f64;
        probabilities.iter_mut().for_each(|p| *p /= n);
        probabilities
    }

    /// Most probable class, only if its probability exceeds `threshold`.
    /// Ties go to the smaller population id.
    pub fn predict_confident(&self, row: &[f32], threshold: f64) -> Option<PopulationId> {
        let probabilities = self.predict_proba(row);
        let (best, probability) = probabilities
            .iter()
            .enumerate()
            .max_by(|a, b| OrderedFloat(*a.1).cmp(&OrderedFloat(*b.1)).then(b.0.cmp(&a.0)))?;

        if *probability > threshold {
            Some(self.classes[best])
        } else {
            None
        }
    }
}

/// Bootstrap row multiplicities times class weight, anchored rows forced in.
fn draw_samples(ctx: &FitContext, bootstrap: bool, rng: &mut StdRng) -> Vec<(usize, f64)> {
    let n = ctx.data.len();
    let mut counts = vec![0u32; n];

    if bootstrap {
        for _ in 0..n {
            counts[rng.gen_range(0..n)] += 1;
        }
    } else {
        counts.fill(1);
    }

    for (count, anchored) in counts.iter_mut().zip(&ctx.data.anchored) {
        if *anchored && *count == 0 {
            *count = 1;
        }
    }

    counts
        .iter()
        .enumerate()
        .filter(|(_, count)| **count > 0)
        .map(|(row, count)| (row, *count as f64 * ctx.class_weights[ctx.class_of[row]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_blobs() -> TrainingSet {
        let mut data = TrainingSet::new(2);
        for i in 0..20 {
            let jitter = i as f32 * 0.005;
            data.push(&[0.1 + jitter, 0.2 - jitter], 0, false);
            data.push(&[0.9 - jitter, 0.8 + jitter], 1, false);
        }
        data
    }

    #[test]
    fn test_separable_blobs() {
        let forest = RandomForest::fit(&two_blobs(), &ForestParams::default()).unwrap();
        assert_eq!(forest.classes(), &[0, 1]);
        assert_eq!(forest.trees().len(), 10);
        assert_eq!(forest.predict_confident(&[0.05, 0.1], 0.5), Some(0));
        assert_eq!(forest.predict_confident(&[0.95, 0.9], 0.5), Some(1));

        let p = forest.predict_proba(&[0.05, 0.1]);
        assert!((p.iter().sum::<f64>() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_fit_is_deterministic_for_a_seed() {
        let data = two_blobs();
        let params = ForestParams { n_trees: 25, ..Default::default() };
        let a = RandomForest::fit(&data, &params).unwrap();
        let b = RandomForest::fit(&data, &params).unwrap();
        for x in [0.0f32, 0.3, 0.5, 0.52, 0.7, 1.0] {
            assert_eq!(a.predict_proba(&[x, x]), b.predict_proba(&[x, x]));
        }
    }

    #[test]
    fn test_anchored_rows_fit_themselves() {
        // a single anchored row of class 7 among many class 3 rows
        let mut data = TrainingSet::new(2);
        for i in 0..50 {
            data.push(&[i as f32 / 50.0, 0.5], 3, false);
        }
        data.push(&[0.31, 0.9], 7, true);

        let params = ForestParams { n_trees: 15, seed: 7, ..Default::default() };
        let forest = RandomForest::fit(&data, &params).unwrap();
        assert_eq!(forest.predict_proba(&[0.31, 0.9])[1], 1.0);
        assert_eq!(forest.predict_confident(&[0.31, 0.9], 0.99), Some(7));
    }

    #[test]
    fn test_threshold_yields_none() {
        let mut data = TrainingSet::new(1);
        // identical rows with conflicting labels cannot be separated
        data.push(&[0.5], 0, false);
        data.push(&[0.5], 1, false);
        let params = ForestParams { bootstrap: false, ..Default::default() };
        let forest = RandomForest::fit(&data, &params).unwrap();
        assert_eq!(forest.predict_proba(&[0.5]), vec![0.5, 0.5]);
        assert_eq!(forest.predict_confident(&[0.5], 0.5), None);
        assert_eq!(forest.predict_confident(&[0.5], 0.4), Some(0));
    }

    #[test]
    fn test_fit_rejects_empty_input() {
        assert!(RandomForest::fit(&TrainingSet::new(2), &ForestParams::default()).is_err());
        let mut no_features = TrainingSet::new(0);
        no_features.push(&[], 0, false);
        assert!(RandomForest::fit(&no_features, &ForestParams::default()).is_err());
    }
}
