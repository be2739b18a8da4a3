use std::collections::{BTreeMap, HashMap};
use std::fmt;

use hcscore::data::contour::{contour_map, to_rows};
use hcscore::data::histogram::{histogram_1d, Histogram};
use hcscore::data::population::{ObjectId, Population, PopulationAssignment};
use itertools::Itertools;
use log::debug;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::data::dataset::Dataset;
use crate::data::store::WellCoordinate;
use crate::error::{EngineError, Result};
use crate::pipeline::scaler::{AdaptiveScaler, ScaledColumn, Scaler};
use crate::pipeline::worker::fan_out;

/// population key -> feature -> histogram
pub type FeatureHistograms = BTreeMap<String, BTreeMap<String, Histogram>>;

/// first feature -> second feature -> population key -> grid rows
pub type ContourMatrix = BTreeMap<String, BTreeMap<String, BTreeMap<String, Vec<Vec<i32>>>>>;

/// well key -> share table
pub type WellShares = BTreeMap<String, WellShare>;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WellShare {
    /// Fraction of the well's objects per population key.
    pub shares: BTreeMap<String, f64>,
    pub count: usize,
    /// `count` relative to the most populated well.
    pub objects: f64,
}

pub trait Aggregator: Send + Sync {
    /// Histograms of every image feature for every assigned population.
    fn feature_histograms(&self, dataset: &Dataset, assignment: &PopulationAssignment, bins: usize) -> Result<FeatureHistograms>;

    /// Contour maps of every pair of `features`, both orientations.
    fn contour_matrix(
        &self,
        dataset: &Dataset,
        features: &[String],
        assignment: &PopulationAssignment,
        bins: usize,
        outline: bool,
    ) -> Result<ContourMatrix>;

    fn well_cluster_shares(&self, dataset: &Dataset, assignment: &PopulationAssignment) -> Result<WellShares>;
}

struct FeaturePair<'a> {
    x: (usize, &'a str),
    y: (usize, &'a str),
}

impl fmt::Display for FeaturePair<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} x {}", self.x.1, self.y.1)
    }
}

fn keyed_partition(assignment: &PopulationAssignment, unsure_key: &str) -> Vec<(String, Vec<ObjectId>)> {
    assignment
        .partition()
        .into_iter()
        .map(|(population, objects)| (population.key(unsure_key), objects))
        .collect()
}

/// Aggregation stage fanning out over the installed rayon pool.
#[derive(Clone, Debug, Default)]
pub struct PoolAggregator<S: Scaler = AdaptiveScaler> {
    scaler: S,
}

impl<S: Scaler> PoolAggregator<S> {
    pub fn new(scaler: S) -> Self {
        PoolAggregator { scaler }
    }

    fn check_length(dataset: &Dataset, assignment: &PopulationAssignment) -> Result<()> {
        if assignment.len() != dataset.object_count() {
            return Err(EngineError::DataUnavailable(format!(
                "assignment covers {} objects, {} has {}",
                assignment.len(),
                dataset.id,
                dataset.object_count()
            )));
        }
        Ok(())
    }
}

impl<S: Scaler> Aggregator for PoolAggregator<S> {
    fn feature_histograms(&self, dataset: &Dataset, assignment: &PopulationAssignment, bins: usize) -> Result<FeatureHistograms> {
        Self::check_length(dataset, assignment)?;
        let features = dataset.feature_names();
        let partition = keyed_partition(assignment, &dataset.config.unsure_key);

        let per_feature = fan_out(&features, |feature| {
            let column = self.scaler.scale(dataset, feature)?;
            Ok(partition
                .par_iter()
                .map(|(key, objects)| (key.clone(), histogram_1d(&column, objects, bins)))
                .collect::<Vec<_>>())
        })?;

        let mut histograms = FeatureHistograms::new();
        for (feature, populations) in features.iter().zip(per_feature) {
            for (key, histogram) in populations {
                histograms.entry(key).or_default().insert(feature.clone(), histogram);
            }
        }

        debug!("{}: {} histograms per population", dataset.id, features.len());
        Ok(histograms)
    }

    fn contour_matrix(
        &self,
        dataset: &Dataset,
        features: &[String],
        assignment: &PopulationAssignment,
        bins: usize,
        outline: bool,
    ) -> Result<ContourMatrix> {
        Self::check_length(dataset, assignment)?;
        let features = if features.is_empty() { dataset.feature_names() } else { features.to_vec() };
        let features: Vec<String> = features.into_iter().unique().collect();
        let partition = keyed_partition(assignment, &dataset.config.unsure_key);

        let columns: Vec<ScaledColumn> = fan_out(&features, |feature| self.scaler.scale(dataset, feature))?;

        let pairs: Vec<FeaturePair> = features
            .iter()
            .enumerate()
            .tuple_combinations()
            .map(|((i, x), (j, y))| FeaturePair { x: (i, x.as_str()), y: (j, y.as_str()) })
            .collect();

        let grids = fan_out(&pairs, |pair| {
            let (x, y) = (&columns[pair.x.0], &columns[pair.y.0]);
            Ok(partition
                .par_iter()
                .map(|(key, objects)| (key.clone(), contour_map(x, y, objects, bins, outline)))
                .collect::<Vec<_>>())
        })?;

        let mut matrix = ContourMatrix::new();
        for feature in &features {
            matrix.entry(feature.clone()).or_default().insert(feature.clone(), BTreeMap::new());
        }
        for (pair, populations) in pairs.iter().zip(grids) {
            for (key, grid) in populations {
                let transposed = to_rows(&grid.transpose());
                matrix
                    .entry(pair.x.1.to_string())
                    .or_default()
                    .entry(pair.y.1.to_string())
                    .or_default()
                    .insert(key.clone(), to_rows(&grid));
                matrix
                    .entry(pair.y.1.to_string())
                    .or_default()
                    .entry(pair.x.1.to_string())
                    .or_default()
                    .insert(key, transposed);
            }
        }

        debug!("{}: {} contour pairs over {} populations", dataset.id, pairs.len(), partition.len());
        Ok(matrix)
    }

    fn well_cluster_shares(&self, dataset: &Dataset, assignment: &PopulationAssignment) -> Result<WellShares> {
        Self::check_length(dataset, assignment)?;
        let wells = dataset.well_coordinates()?;

        let counts: HashMap<WellCoordinate, BTreeMap<Population, usize>> = assignment
            .labels
            .par_iter()
            .zip(wells.par_iter())
            .fold(HashMap::new, |mut acc: HashMap<WellCoordinate, BTreeMap<Population, usize>>, (label, well)| {
                *acc.entry(*well).or_default().entry(*label).or_default() += 1;
                acc
            })
            .reduce(HashMap::new, |mut left, right| {
                for (well, populations) in right {
                    let entry = left.entry(well).or_default();
                    for (population, count) in populations {
                        *entry.entry(population).or_default() += count;
                    }
                }
                left
            });

        let max_count = counts.values().map(|p| p.values().sum::<usize>()).max().unwrap_or(0).max(1);
        let unsure_key = &dataset.config.unsure_key;

        Ok(counts
            .into_iter()
            .map(|(well, populations)| {
                let count: usize = populations.values().sum();
                let shares = populations
                    .into_iter()
                    .map(|(population, n)| (population.key(unsure_key), n as f64 / count as f64))
                    .collect();
                (well.key(), WellShare { shares, count, objects: count as f64 / max_count as f64 })
            })
            .collect())
    }
}
