use hcscore::algorithm::forest::{RandomForest, TrainingSet};
use hcscore::data::population::{ExemplarSet, Population, PopulationAssignment, PopulationId};
use log::{info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;

use crate::data::dataset::Dataset;
use crate::error::{EngineError, Result};
use crate::pipeline::scaler::{AdaptiveScaler, ScaledColumn, Scaler};

pub trait Classifier: Send + Sync {
    /// Population of every object of `dataset`, learned from the prior
    /// annotations and the user exemplars over `features` (all image
    /// features when empty).
    fn classify(&self, dataset: &Dataset, features: &[String], exemplars: &ExemplarSet) -> Result<PopulationAssignment>;
}

/// Sparse training labels of a dataset, one slot per object.
#[derive(Clone, Debug, PartialEq)]
pub struct TrainingLabels {
    pub labels: Vec<Option<PopulationId>>,
    /// Exemplar objects, forced into every tree.
    pub anchored: Vec<bool>,
}

impl TrainingLabels {
    /// Prior labels, down-sampled to `fraction` of the annotated objects,
    /// with the exemplars laid over them.
    pub fn build(dataset: &Dataset, exemplars: &ExemplarSet) -> Result<Self> {
        dataset.config.check_exemplars(exemplars)?;
        let n = dataset.object_count();
        let mut labels = dataset.prior_labels()?;

        let fraction = dataset.config.training_sample_fraction;
        if fraction < 1.0 {
            let annotated: Vec<usize> = (0..n).filter(|i| labels[*i].is_some()).collect();
            let keep = (annotated.len() as f64 * fraction).round() as usize;
            let mut rng = StdRng::seed_from_u64(dataset.config.seed);
            let kept = rand::seq::index::sample(&mut rng, annotated.len(), keep.min(annotated.len()));

            let mut sampled = vec![None; n];
            for index in kept.iter() {
                let object = annotated[index];
                sampled[object] = labels[object];
            }
            labels = sampled;
        }

        let mut anchored = vec![false; n];
        for (population, object) in exemplars.iter() {
            if object >= n {
                return Err(EngineError::DataUnavailable(format!(
                    "exemplar {} of population {} is not an object of {}",
                    object, population, dataset.id
                )));
            }
            labels[object] = Some(population);
            anchored[object] = true;
        }

        Ok(TrainingLabels { labels, anchored })
    }

    pub fn labeled(&self) -> usize {
        self.labels.iter().filter(|l| l.is_some()).count()
    }
}

fn fill_row(row: &mut [f32], columns: &[ScaledColumn], object: usize) {
    for (value, column) in row.iter_mut().zip(columns) {
        *value = column[object];
    }
}

/// Random forest over the scaled feature matrix.
#[derive(Clone, Debug, Default)]
pub struct ForestClassifier<S: Scaler = AdaptiveScaler> {
    scaler: S,
}

impl<S: Scaler> ForestClassifier<S> {
    pub fn new(scaler: S) -> Self {
        ForestClassifier { scaler }
    }

    /// Fit the forest, failing with [`EngineError::InsufficientTrainingData`]
    /// when the labels name fewer than two populations.
    pub fn train(&self, dataset: &Dataset, columns: &[ScaledColumn], exemplars: &ExemplarSet) -> Result<RandomForest> {
        if columns.is_empty() {
            return Err(EngineError::InsufficientTrainingData("no features selected".to_string()));
        }

        let labels = TrainingLabels::build(dataset, exemplars)?;
        let mut training = TrainingSet::new(columns.len());
        let mut row = vec![0.0f32; columns.len()];
        for (object, label) in labels.labels.iter().enumerate() {
            if let Some(label) = label {
                fill_row(&mut row, columns, object);
                training.push(&row, *label, labels.anchored[object]);
            }
        }

        let classes = training.classes();
        if classes.len() < 2 {
            return Err(EngineError::InsufficientTrainingData(format!(
                "{} labeled objects in {} population(s)",
                training.len(),
                classes.len()
            )));
        }

        info!(
            "{}: training forest on {} objects, {} features, populations {:?}",
            dataset.id,
            training.len(),
            columns.len(),
            classes
        );
        let forest = RandomForest::fit(&training, &dataset.config.forest_params())
            .map_err(EngineError::InsufficientTrainingData)?;
        info!("{}: trained {} trees", dataset.id, forest.trees().len());

        Ok(forest)
    }

    pub fn predict(&self, forest: &RandomForest, columns: &[ScaledColumn], object_count: usize, threshold: f64) -> PopulationAssignment {
        let labels = (0..object_count)
            .into_par_iter()
            .map_init(
                || vec![0.0f32; columns.len()],
                |row, object| {
                    fill_row(row, columns, object);
                    match forest.predict_confident(row, threshold) {
                        Some(population) => Population::Member(population),
                        None => Population::Unsure,
                    }
                },
            )
            .collect();

        PopulationAssignment { labels }
    }
}

impl<S: Scaler> Classifier for ForestClassifier<S> {
    fn classify(&self, dataset: &Dataset, features: &[String], exemplars: &ExemplarSet) -> Result<PopulationAssignment> {
        dataset.config.check_exemplars(exemplars)?;
        let n = dataset.object_count();
        let features = if features.is_empty() { dataset.feature_names() } else { features.to_vec() };
        let columns = self.scaler.scale_all(dataset, &features)?;

        match self.train(dataset, &columns, exemplars) {
            Ok(forest) => Ok(self.predict(&forest, &columns, n, dataset.config.confidence_threshold)),
            Err(EngineError::InsufficientTrainingData(reason)) => {
                warn!("{}: {}, every object is unsure", dataset.id, reason);
                Ok(PopulationAssignment::unsure(n))
            }
            Err(e) => Err(e),
        }
    }
}
