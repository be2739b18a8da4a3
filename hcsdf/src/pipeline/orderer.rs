use hcscore::algorithm::correlation::{correlation_distance, correlation_matrix};
use hcscore::algorithm::leaf_ordering::optimal_order_for_distances;
use hcscore::algorithm::linkage::Dendrogram;
use log::info;
use rayon::prelude::*;

use crate::data::dataset::Dataset;
use crate::error::{EngineError, Result};
use crate::pipeline::scaler::{AdaptiveScaler, Scaler};

pub trait FeatureOrderer: Send + Sync {
    /// Image features of `dataset`, correlated features next to each other.
    fn order_features(&self, dataset: &Dataset) -> Result<Vec<String>>;
}

/// Orders features by average linkage over `1 - |pearson|` on a fixed sample.
#[derive(Clone, Debug)]
pub struct CorrelationOrderer<S: Scaler = AdaptiveScaler> {
    scaler: S,
    pub sample_size: usize,
    /// Refine the dendrogram order with optimal leaf ordering.
    pub optimal: bool,
}

impl Default for CorrelationOrderer<AdaptiveScaler> {
    fn default() -> Self {
        CorrelationOrderer { scaler: AdaptiveScaler, sample_size: 1000, optimal: true }
    }
}

impl<S: Scaler> CorrelationOrderer<S> {
    pub fn new(scaler: S, sample_size: usize, optimal: bool) -> Self {
        CorrelationOrderer { scaler, sample_size, optimal }
    }

    /// Permutation of `0..n_features` for a distance matrix.
    pub fn leaf_order(&self, distances: &nalgebra::DMatrix<f64>) -> Result<Vec<usize>> {
        let tree = Dendrogram::average_linkage(distances).map_err(EngineError::DataUnavailable)?;
        Ok(if self.optimal {
            optimal_order_for_distances(&tree, distances)
        } else {
            tree.leaves_list()
        })
    }
}

impl<S: Scaler> FeatureOrderer for CorrelationOrderer<S> {
    fn order_features(&self, dataset: &Dataset) -> Result<Vec<String>> {
        let features = dataset.feature_names();
        if features.len() < 2 {
            return Ok(features);
        }

        let sample = dataset.store().sample_object_ids(self.sample_size);
        let columns = features
            .par_iter()
            .map(|feature| {
                let scaled = self.scaler.scale(dataset, feature)?;
                Ok(sample.iter().map(|&object| scaled[object]).collect::<Vec<f32>>())
            })
            .collect::<Result<Vec<_>>>()?;

        let distances = correlation_distance(&correlation_matrix(&columns));
        let order = self.leaf_order(&distances)?;
        info!("{}: ordered {} features on {} sampled objects", dataset.id, features.len(), sample.len());

        Ok(order.into_iter().map(|i| features[i].clone()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::config::DatasetConfig;
    use crate::data::store::InMemoryStore;
    use nalgebra::DMatrix;
    use std::sync::Arc;

    fn position(order: &[String], name: &str) -> usize {
        order.iter().position(|f| f == name).unwrap()
    }

    #[test]
    fn test_correlated_features_end_up_adjacent() {
        let base: Vec<f64> = (0..200).map(|i| ((i * 37) % 101) as f64).collect();
        let other: Vec<f64> = (0..200).map(|i| ((i * 53) % 97) as f64).collect();
        let store = InMemoryStore::new(200)
            .with_column("A1", base.clone())
            .unwrap()
            .with_column("B1", other.clone())
            .unwrap()
            .with_column("A2", base.iter().map(|v| 2.0 * v + 1.0).collect())
            .unwrap()
            .with_column("B2", other.iter().map(|v| 500.0 - v).collect())
            .unwrap()
            .with_column("Flat", vec![1.0; 200])
            .unwrap();
        let dataset = Dataset::new("order", DatasetConfig::default(), Arc::new(store)).unwrap();

        let order = CorrelationOrderer::default().order_features(&dataset).unwrap();
        let mut sorted = order.clone();
        sorted.sort();
        assert_eq!(sorted, dataset.feature_names());
        assert_eq!(position(&order, "A1").abs_diff(position(&order, "A2")), 1);
        assert_eq!(position(&order, "B1").abs_diff(position(&order, "B2")), 1);
    }

    #[test]
    fn test_pairs_matrix_keeps_pairs_together() {
        let distances = DMatrix::from_row_slice(4, 4, &[
            0.0, 1.0, 9.0, 9.0,
            1.0, 0.0, 9.0, 9.0,
            9.0, 9.0, 0.0, 1.0,
            9.0, 9.0, 1.0, 0.0,
        ]);
        for optimal in [true, false] {
            let orderer = CorrelationOrderer::new(AdaptiveScaler, 10, optimal);
            let order = orderer.leaf_order(&distances).unwrap();
            let at = |leaf: usize| order.iter().position(|l| *l == leaf).unwrap();
            assert_eq!(at(0).abs_diff(at(1)), 1);
            assert_eq!(at(2).abs_diff(at(3)), 1);
        }
    }

    #[test]
    fn test_single_feature_is_unchanged() {
        let store = InMemoryStore::new(3).with_column("Only", vec![1.0, 2.0, 3.0]).unwrap();
        let dataset = Dataset::new("one", DatasetConfig::default(), Arc::new(store)).unwrap();
        assert_eq!(CorrelationOrderer::default().order_features(&dataset).unwrap(), vec!["Only".to_string()]);
    }
}
