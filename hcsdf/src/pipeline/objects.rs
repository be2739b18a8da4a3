use std::collections::{BTreeMap, BTreeSet};

use hcscore::data::population::{ExemplarSet, ObjectId, Population, PopulationAssignment};
use serde::{Deserialize, Serialize};

use crate::data::dataset::Dataset;
use crate::data::store::WellCoordinate;
use crate::error::{EngineError, Result};
use crate::pipeline::scaler::Scaler;

/// One inspected object as shown next to the well images.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ObjectRecord {
    pub id: ObjectId,
    pub plate: u32,
    pub column: u32,
    pub row: u32,
    pub population: String,
    pub images: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub values: Option<BTreeMap<String, f32>>,
}

/// Objects of `well` together with every exemplar object, ascending.
pub fn select_objects(dataset: &Dataset, well: Option<&WellCoordinate>, exemplars: &ExemplarSet) -> Result<Vec<ObjectId>> {
    dataset.config.check_exemplars(exemplars)?;
    let mut selected: BTreeSet<ObjectId> = exemplars.objects();
    if let Some(&last) = selected.last() {
        if last >= dataset.object_count() {
            return Err(EngineError::DataUnavailable(format!("object {} is not part of {}", last, dataset.id)));
        }
    }
    if let Some(well) = well {
        selected.extend(dataset.objects_in_well(well)?);
    }
    Ok(selected.into_iter().collect())
}

pub fn object_records(dataset: &Dataset, objects: &[ObjectId], assignment: &PopulationAssignment) -> Result<Vec<ObjectRecord>> {
    let wells = dataset.well_coordinates()?;
    let unsure_key = &dataset.config.unsure_key;

    objects
        .iter()
        .map(|&id| {
            let well = wells
                .get(id)
                .ok_or_else(|| EngineError::DataUnavailable(format!("object {} is not part of {}", id, dataset.id)))?;
            let population = assignment.get(id).unwrap_or(Population::Unsure);
            Ok(ObjectRecord {
                id,
                plate: well.plate,
                column: well.column,
                row: well.row,
                population: population.key(unsure_key),
                images: dataset.config.well_image_urls(well),
                values: None,
            })
        })
        .collect()
}

/// Attach the scaled value of every image feature to each record.
pub fn attach_feature_values(dataset: &Dataset, scaler: &dyn Scaler, records: &mut [ObjectRecord]) -> Result<()> {
    let features = dataset.feature_names();
    let columns = scaler.scale_all(dataset, &features)?;

    for record in records.iter_mut() {
        record.values = Some(
            features
                .iter()
                .zip(&columns)
                .map(|(feature, column)| (feature.clone(), column[record.id]))
                .collect(),
        );
    }
    Ok(())
}
