use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use hcscore::algorithm::forest::ForestParams;
use hcscore::data::population::{ExemplarSet, Population, PopulationId};
use serde::{Deserialize, Serialize};

use crate::data::store::WellCoordinate;
use crate::error::{EngineError, Result};

/// Maps one column of the well annotation table onto populations, e.g.
/// category `Type` with `{"Negative": 0, "Positive": 1}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PriorAnnotationConfig {
    pub category: String,
    pub populations: BTreeMap<String, PopulationId>,
}

/// Per-dataset settings, read once when the dataset is opened.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetConfig {
    /// Minimum forest probability for a population to be assigned.
    pub confidence_threshold: f64,
    /// Share of prior-annotated objects kept as training labels.
    pub training_sample_fraction: f64,
    /// Seed of the training label down-sampling and of the forest.
    pub seed: u64,
    pub trees: usize,
    /// Serialized key of objects without a confident population.
    pub unsure_key: String,

    // label tables, index -> display name
    pub plates: Vec<String>,
    pub columns: Vec<String>,
    pub rows: Vec<String>,

    /// Image name to URL template with `{plate}`, `{column}` and `{row}` placeholders.
    pub well_images: BTreeMap<String, String>,
    pub prior_annotation: Option<PriorAnnotationConfig>,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.5,
            training_sample_fraction: 1.0,
            seed: 42,
            trees: 10,
            unsure_key: "-1".to_string(),
            plates: Vec::new(),
            columns: Vec::new(),
            rows: Vec::new(),
            well_images: BTreeMap::new(),
            prior_annotation: None,
        }
    }
}

fn label(labels: &[String], index: u32) -> String {
    labels.get(index as usize).cloned().unwrap_or_else(|| index.to_string())
}

impl DatasetConfig {
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let config: DatasetConfig = serde_json::from_reader(BufReader::new(file))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(EngineError::Config(format!(
                "confidence_threshold must lie in [0, 1], got {}",
                self.confidence_threshold
            )));
        }
        if !(self.training_sample_fraction > 0.0 && self.training_sample_fraction <= 1.0) {
            return Err(EngineError::Config(format!(
                "training_sample_fraction must lie in (0, 1], got {}",
                self.training_sample_fraction
            )));
        }
        if self.trees == 0 {
            return Err(EngineError::Config("trees must be at least 1".to_string()));
        }
        if self.unsure_key.parse::<PopulationId>().is_ok_and(|id| self.populations().contains(&id)) {
            return Err(EngineError::Config(format!(
                "unsure_key '{}' collides with an annotated population id",
                self.unsure_key
            )));
        }
        Ok(())
    }

    /// Exemplar populations must stay distinguishable from the unsure group
    /// once serialized, otherwise two groups share one table key.
    pub fn check_exemplars(&self, exemplars: &ExemplarSet) -> Result<()> {
        for population in exemplars.0.keys() {
            if Population::Member(*population).key(&self.unsure_key) == self.unsure_key {
                return Err(EngineError::Config(format!(
                    "exemplar population {} collides with unsure_key '{}'",
                    population, self.unsure_key
                )));
            }
        }
        Ok(())
    }

    /// Population ids known from the prior annotation mapping.
    pub fn populations(&self) -> Vec<PopulationId> {
        self.prior_annotation
            .as_ref()
            .map(|prior| prior.populations.values().copied().collect())
            .unwrap_or_default()
    }

    pub fn forest_params(&self) -> ForestParams {
        ForestParams { n_trees: self.trees, seed: self.seed, ..Default::default() }
    }

    pub fn plate_label(&self, plate: u32) -> String {
        label(&self.plates, plate)
    }

    pub fn column_label(&self, column: u32) -> String {
        label(&self.columns, column)
    }

    pub fn row_label(&self, row: u32) -> String {
        label(&self.rows, row)
    }

    /// Expand every image template for one well.
    pub fn well_image_urls(&self, well: &WellCoordinate) -> BTreeMap<String, String> {
        self.well_images
            .iter()
            .map(|(name, template)| {
                let url = template
                    .replace("{plate}", &self.plate_label(well.plate))
                    .replace("{column}", &self.column_label(well.column))
                    .replace("{row}", &self.row_label(well.row));
                (name.clone(), url)
            })
            .collect()
    }
}

/// Engine wide settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Worker threads of the aggregation pool, 0 lets rayon decide.
    pub num_threads: usize,
    /// Entries kept per cached operation.
    pub cache_capacity: usize,
    pub bins: usize,
    /// Objects drawn for correlation based feature ordering.
    pub sample_size: usize,
    /// Reduce contour maps to level outlines instead of filled levels.
    pub outline_contours: bool,
    /// Improve the dendrogram order with optimal leaf ordering.
    pub optimal_ordering: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            num_threads: 0,
            cache_capacity: 5,
            bins: 100,
            sample_size: 1000,
            outline_contours: true,
            optimal_ordering: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: DatasetConfig = serde_json::from_str(r#"{"confidence_threshold": 0.7, "plates": ["HT01"]}"#).unwrap();
        assert_eq!(config.confidence_threshold, 0.7);
        assert_eq!(config.training_sample_fraction, 1.0);
        assert_eq!(config.unsure_key, "-1");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let config = DatasetConfig { confidence_threshold: 1.5, ..Default::default() };
        assert!(matches!(config.validate(), Err(EngineError::Config(_))));

        let config = DatasetConfig { training_sample_fraction: 0.0, ..Default::default() };
        assert!(config.validate().is_err());

        let config = DatasetConfig {
            unsure_key: "2".to_string(),
            prior_annotation: Some(PriorAnnotationConfig {
                category: "Type".to_string(),
                populations: BTreeMap::from([("Positive".to_string(), 2)]),
            }),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_exemplar_population_must_differ_from_unsure_key() {
        let config = DatasetConfig { unsure_key: "2".to_string(), ..Default::default() };
        assert!(config.validate().is_ok());
        assert!(config.check_exemplars(&ExemplarSet::from([(0, vec![1]), (1, vec![3])])).is_ok());
        assert!(matches!(
            config.check_exemplars(&ExemplarSet::from([(0, vec![1, 2]), (2, vec![3, 50])])),
            Err(EngineError::Config(_))
        ));
        assert!(DatasetConfig::default().check_exemplars(&ExemplarSet::from([(2, vec![3])])).is_ok());
    }

    #[test]
    fn test_well_image_urls() {
        let config = DatasetConfig {
            plates: vec!["HT01".to_string(), "HT02".to_string()],
            columns: vec!["A".to_string(), "B".to_string()],
            rows: vec!["001".to_string()],
            well_images: BTreeMap::from([(
                "seg".to_string(),
                "images/{plate}/{plate}{column}{row}_seg.jpeg".to_string(),
            )]),
            ..Default::default()
        };
        let urls = config.well_image_urls(&WellCoordinate { plate: 1, column: 0, row: 0 });
        assert_eq!(urls["seg"], "images/HT02/HT02A001_seg.jpeg");

        // missing labels fall back to the numeric index
        let urls = config.well_image_urls(&WellCoordinate { plate: 0, column: 1, row: 7 });
        assert_eq!(urls["seg"], "images/HT01/HT01B7_seg.jpeg");
    }
}
