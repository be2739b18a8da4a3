use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use hcscore::data::population::{ExemplarSet, ObjectId, PopulationAssignment};
use log::info;
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::{Deserialize, Serialize};

use crate::data::config::EngineConfig;
use crate::data::dataset::Dataset;
use crate::data::store::WellCoordinate;
use crate::error::{EngineError, Result};
use crate::pipeline::aggregator::{Aggregator, ContourMatrix, FeatureHistograms, PoolAggregator, WellShares};
use crate::pipeline::cache::{RequestKey, ResultCache};
use crate::pipeline::classifier::{Classifier, ForestClassifier};
use crate::pipeline::objects::{attach_feature_values, object_records, select_objects, ObjectRecord};
use crate::pipeline::orderer::{CorrelationOrderer, FeatureOrderer};
use crate::pipeline::scaler::{AdaptiveScaler, Scaler};

/// Label tables and features of a dataset, everything a client needs to lay
/// out the plate view.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DatasetInfo {
    pub id: String,
    pub objects: usize,
    pub plates: Vec<String>,
    pub columns: Vec<String>,
    pub rows: Vec<String>,
    pub features: Vec<String>,
}

/// Population key -> objects, ids ascending.
pub type PopulationTable = BTreeMap<String, Vec<ObjectId>>;

/// Entry point of the analytic backend. Holds the opened datasets, the
/// worker pool, the pipeline stages and one result cache per operation.
pub struct Engine {
    config: EngineConfig,
    datasets: BTreeMap<String, Arc<Dataset>>,
    pool: ThreadPool,
    scaler: Box<dyn Scaler>,
    classifier: Box<dyn Classifier>,
    aggregator: Box<dyn Aggregator>,
    orderer: Box<dyn FeatureOrderer>,
    assignments: ResultCache<PopulationAssignment>,
    orderings: ResultCache<Vec<String>>,
    histograms: ResultCache<FeatureHistograms>,
    contours: ResultCache<ContourMatrix>,
    shares: ResultCache<WellShares>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Result<Self> {
        if config.bins == 0 {
            return Err(EngineError::Config("bins must be at least 1".to_string()));
        }

        let pool = ThreadPoolBuilder::new().num_threads(config.num_threads).build()?;
        info!("Engine started with {} worker threads", pool.current_num_threads());

        let capacity = config.cache_capacity;
        Ok(Engine {
            scaler: Box::new(AdaptiveScaler),
            classifier: Box::new(ForestClassifier::new(AdaptiveScaler)),
            aggregator: Box::new(PoolAggregator::new(AdaptiveScaler)),
            orderer: Box::new(CorrelationOrderer::new(AdaptiveScaler, config.sample_size, config.optimal_ordering)),
            assignments: ResultCache::new(capacity),
            orderings: ResultCache::new(capacity),
            histograms: ResultCache::new(capacity),
            contours: ResultCache::new(capacity),
            shares: ResultCache::new(capacity),
            datasets: BTreeMap::new(),
            config,
            pool,
        })
    }

    pub fn with_classifier(mut self, classifier: Box<dyn Classifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn add_dataset(&mut self, dataset: Dataset) {
        info!("Registered dataset {} with {} objects", dataset.id, dataset.object_count());
        self.datasets.insert(dataset.id.clone(), Arc::new(dataset));
    }

    pub fn open_dataset(&mut self, id: &str, root: &Path) -> Result<()> {
        let dataset = Dataset::open(id, root)?;
        self.add_dataset(dataset);
        Ok(())
    }

    pub fn dataset(&self, id: &str) -> Result<Arc<Dataset>> {
        self.datasets
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::DataUnavailable(format!("no dataset named '{}'", id)))
    }

    pub fn dataset_ids(&self) -> Vec<String> {
        self.datasets.keys().cloned().collect()
    }

    /// Sum of computations over all result caches.
    pub fn computations(&self) -> usize {
        self.assignments.computations()
            + self.orderings.computations()
            + self.histograms.computations()
            + self.contours.computations()
            + self.shares.computations()
    }

    // sorted so that every listing of one feature set computes the same result,
    // an empty selection means every image feature
    fn resolve_features(dataset: &Dataset, features: &[String]) -> Vec<String> {
        if features.is_empty() {
            return dataset.feature_names();
        }
        let mut features = features.to_vec();
        features.sort();
        features.dedup();
        features
    }

    fn resolve_bins(&self, bins: Option<usize>) -> Result<usize> {
        match bins.unwrap_or(self.config.bins) {
            0 => Err(EngineError::Config("bins must be at least 1".to_string())),
            bins => Ok(bins),
        }
    }

    pub fn dataset_info(&self, id: &str) -> Result<DatasetInfo> {
        let dataset = self.dataset(id)?;
        Ok(DatasetInfo {
            id: dataset.id.clone(),
            objects: dataset.object_count(),
            plates: dataset.config.plates.clone(),
            columns: dataset.config.columns.clone(),
            rows: dataset.config.rows.clone(),
            features: dataset.feature_names(),
        })
    }

    pub fn feature_ordering(&self, id: &str) -> Result<Arc<Vec<String>>> {
        let dataset = self.dataset(id)?;
        let key = RequestKey::new("feature_ordering", id);
        self.orderings
            .get_or_compute(&key, || self.pool.install(|| self.orderer.order_features(&dataset)))
    }

    pub fn classify(&self, id: &str, features: &[String], exemplars: &ExemplarSet) -> Result<Arc<PopulationAssignment>> {
        let dataset = self.dataset(id)?;
        let features = Self::resolve_features(&dataset, features);
        let key = RequestKey::new("classify", id).with_features(&features).with_exemplars(exemplars);
        self.assignments.get_or_compute(&key, || {
            self.pool.install(|| self.classifier.classify(&dataset, &features, exemplars))
        })
    }

    /// Classification result grouped by population key.
    pub fn population_table(&self, id: &str, features: &[String], exemplars: &ExemplarSet) -> Result<PopulationTable> {
        let dataset = self.dataset(id)?;
        let assignment = self.classify(id, features, exemplars)?;
        Ok(assignment
            .partition()
            .into_iter()
            .map(|(population, objects)| (population.key(&dataset.config.unsure_key), objects))
            .collect())
    }

    pub fn feature_histograms(
        &self,
        id: &str,
        features: &[String],
        exemplars: &ExemplarSet,
        bins: Option<usize>,
    ) -> Result<Arc<FeatureHistograms>> {
        let dataset = self.dataset(id)?;
        let features = Self::resolve_features(&dataset, features);
        let bins = self.resolve_bins(bins)?;
        let key = RequestKey::new("feature_histograms", id)
            .with_features(&features)
            .with_exemplars(exemplars)
            .with_param(bins as u64);

        self.histograms.get_or_compute(&key, || {
            let assignment = self.classify(id, &features, exemplars)?;
            self.pool.install(|| self.aggregator.feature_histograms(&dataset, &assignment, bins))
        })
    }

    pub fn contour_matrix(
        &self,
        id: &str,
        features: &[String],
        exemplars: &ExemplarSet,
        bins: Option<usize>,
    ) -> Result<Arc<ContourMatrix>> {
        let dataset = self.dataset(id)?;
        let features = Self::resolve_features(&dataset, features);
        let bins = self.resolve_bins(bins)?;
        if bins < 2 {
            return Err(EngineError::Config(format!("contour maps need at least 2 bins, got {}", bins)));
        }
        let outline = self.config.outline_contours;
        let key = RequestKey::new("contour_matrix", id)
            .with_features(&features)
            .with_exemplars(exemplars)
            .with_param(bins as u64)
            .with_param(outline as u64);

        self.contours.get_or_compute(&key, || {
            let assignment = self.classify(id, &features, exemplars)?;
            self.pool
                .install(|| self.aggregator.contour_matrix(&dataset, &features, &assignment, bins, outline))
        })
    }

    pub fn well_cluster_shares(&self, id: &str, features: &[String], exemplars: &ExemplarSet) -> Result<Arc<WellShares>> {
        let dataset = self.dataset(id)?;
        let features = Self::resolve_features(&dataset, features);
        let key = RequestKey::new("well_cluster_shares", id).with_features(&features).with_exemplars(exemplars);

        self.shares.get_or_compute(&key, || {
            let assignment = self.classify(id, &features, exemplars)?;
            self.pool.install(|| self.aggregator.well_cluster_shares(&dataset, &assignment))
        })
    }

    /// Objects of `well` and all exemplars, with population and image URLs.
    pub fn object_info(
        &self,
        id: &str,
        features: &[String],
        exemplars: &ExemplarSet,
        well: Option<&WellCoordinate>,
    ) -> Result<Vec<ObjectRecord>> {
        let dataset = self.dataset(id)?;
        let objects = select_objects(&dataset, well, exemplars)?;
        let assignment = self.classify(id, features, exemplars)?;
        object_records(&dataset, &objects, &assignment)
    }

    /// Like [`Engine::object_info`], with the scaled value of every feature.
    pub fn object_feature_values(
        &self,
        id: &str,
        features: &[String],
        exemplars: &ExemplarSet,
        well: Option<&WellCoordinate>,
    ) -> Result<Vec<ObjectRecord>> {
        let dataset = self.dataset(id)?;
        let mut records = self.object_info(id, features, exemplars, well)?;
        self.pool
            .install(|| attach_feature_values(&dataset, self.scaler.as_ref(), &mut records))?;
        Ok(records)
    }
}
