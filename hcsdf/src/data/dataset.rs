use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

use hcscore::algorithm::scaling::FeatureMetrics;
use hcscore::data::population::{ObjectId, PopulationId};
use log::{debug, warn};
use moka::policy::EvictionPolicy;
use moka::sync::Cache;

use crate::data::config::DatasetConfig;
use crate::data::directory::DirectoryStore;
use crate::data::store::{ColumnStore, WellCoordinate};
use crate::error::Result;

/// Scaled columns kept per dataset.
pub const SCALED_COLUMN_CAPACITY: u64 = 64;

/// One screening dataset: its configuration, its column store, the
/// per-column metrics memo and a bounded memo of scaled columns.
pub struct Dataset {
    pub id: String,
    pub config: DatasetConfig,
    store: Arc<dyn ColumnStore>,
    metrics: RwLock<HashMap<String, FeatureMetrics>>,
    wells: RwLock<Option<Arc<[WellCoordinate]>>>,
    scaled: Cache<String, Arc<[f32]>>,
}

impl Dataset {
    pub fn new(id: &str, config: DatasetConfig, store: Arc<dyn ColumnStore>) -> Result<Self> {
        config.validate()?;
        Ok(Dataset {
            id: id.to_string(),
            config,
            store,
            metrics: RwLock::new(HashMap::new()),
            wells: RwLock::new(None),
            scaled: Cache::builder()
                .max_capacity(SCALED_COLUMN_CAPACITY)
                .eviction_policy(EvictionPolicy::lru())
                .build(),
        })
    }

    /// Open a dataset directory, see [`crate::data::directory`] for the layout.
    pub fn open(id: &str, root: &Path) -> Result<Self> {
        let config_path = root.join("config.json");
        let config = if config_path.exists() {
            DatasetConfig::from_json_file(&config_path)?
        } else {
            warn!("{} has no config.json, using defaults", root.display());
            DatasetConfig::default()
        };
        let store = DirectoryStore::open(root, config.prior_annotation.as_ref())?;
        Dataset::new(id, config, Arc::new(store))
    }

    pub fn store(&self) -> &dyn ColumnStore {
        self.store.as_ref()
    }

    pub fn object_count(&self) -> usize {
        self.store.object_count()
    }

    pub fn feature_names(&self) -> Vec<String> {
        self.store.feature_names()
    }

    /// Min, max and mean of a raw column, computed on first use and kept for
    /// the lifetime of the dataset. A column without finite values reports
    /// all zeros and therefore counts as degenerate.
    pub fn metrics(&self, column: &str) -> Result<FeatureMetrics> {
        if let Some(metrics) = self.metrics.read().unwrap_or_else(PoisonError::into_inner).get(column) {
            return Ok(*metrics);
        }

        let values = self.store.load_column(column)?;
        let metrics = FeatureMetrics::from_values(&values).unwrap_or(FeatureMetrics { min: 0.0, max: 0.0, mean: 0.0 });
        debug!("{}: metrics of {} are {:?}", self.id, column, metrics);

        let mut memo = self.metrics.write().unwrap_or_else(PoisonError::into_inner);
        Ok(*memo.entry(column.to_string()).or_insert(metrics))
    }

    /// Scaled values of `column`, produced by `scale` on a miss. The least
    /// recently used columns are dropped past [`SCALED_COLUMN_CAPACITY`].
    pub fn scaled_column<F>(&self, column: &str, scale: F) -> Result<Arc<[f32]>>
    where
        F: FnOnce() -> Result<Arc<[f32]>>,
    {
        Ok(self.scaled.try_get_with_by_ref(column, scale)?)
    }

    pub fn well_coordinates(&self) -> Result<Arc<[WellCoordinate]>> {
        if let Some(wells) = self.wells.read().unwrap_or_else(PoisonError::into_inner).as_ref() {
            return Ok(wells.clone());
        }

        let wells: Arc<[WellCoordinate]> = self.store.well_coordinates()?.into();
        *self.wells.write().unwrap_or_else(PoisonError::into_inner) = Some(wells.clone());
        Ok(wells)
    }

    pub fn objects_in_well(&self, well: &WellCoordinate) -> Result<Vec<ObjectId>> {
        Ok(self
            .well_coordinates()?
            .iter()
            .enumerate()
            .filter(|(_, w)| *w == well)
            .map(|(object, _)| object)
            .collect())
    }

    /// Population of every object derived from the curated well annotations,
    /// `None` for objects in unannotated wells.
    pub fn prior_labels(&self) -> Result<Vec<Option<PopulationId>>> {
        let Some(annotations) = self.store.prior_annotations() else {
            return Ok(vec![None; self.object_count()]);
        };

        Ok(self
            .well_coordinates()?
            .iter()
            .map(|well| annotations.get(well).copied())
            .collect())
    }
}
