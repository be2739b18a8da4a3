use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use hcscore::data::population::{ObjectId, PopulationId};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Columns every object carries besides its image features.
pub const SYSTEM_COLUMNS: [&str; 5] = ["plate", "column", "row", "x", "y"];

/// Seed of the fixed object sample handed out by [`fixed_sample`].
pub const SAMPLE_SEED: u64 = 0x5EED;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WellCoordinate {
    pub plate: u32,
    pub column: u32,
    pub row: u32,
}

impl WellCoordinate {
    pub fn new(plate: u32, column: u32, row: u32) -> Self {
        WellCoordinate { plate, column, row }
    }

    /// `plate_column_row`, the key wells are serialized under.
    pub fn key(&self) -> String {
        format!("{}_{}_{}", self.plate, self.column, self.row)
    }
}

impl fmt::Display for WellCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

impl FromStr for WellCoordinate {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split('_').collect();
        let parse = |part: &str| {
            part.trim()
                .parse::<u32>()
                .map_err(|_| EngineError::Config(format!("invalid well '{}', expected plate_column_row", s)))
        };
        match parts.as_slice() {
            [plate, column, row] => Ok(WellCoordinate::new(parse(plate)?, parse(column)?, parse(row)?)),
            _ => Err(EngineError::Config(format!("invalid well '{}', expected plate_column_row", s))),
        }
    }
}

/// Read access to the immutable object table of one dataset.
///
/// Columns are dense, one value per object id, and never change once loaded,
/// so implementations hand them out as shared slices.
pub trait ColumnStore: Send + Sync {
    // Number of objects, every column has this length
    fn object_count(&self) -> usize;
    // Names of all stored columns, system columns included
    fn column_names(&self) -> Vec<String>;
    // Full column by name
    fn load_column(&self, name: &str) -> Result<Arc<[f64]>>;
    // Fixed random sample of object ids, identical on every call
    fn sample_object_ids(&self, size: usize) -> Vec<ObjectId>;
    // Curated population per well, if the dataset has any
    fn prior_annotations(&self) -> Option<HashMap<WellCoordinate, PopulationId>>;

    /// Image feature columns, sorted by name.
    fn feature_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .column_names()
            .into_iter()
            .filter(|name| !SYSTEM_COLUMNS.contains(&name.as_str()))
            .collect();
        names.sort();
        names
    }

    fn load_columns(&self, names: &[String]) -> Result<Vec<Arc<[f64]>>> {
        names.iter().map(|name| self.load_column(name)).collect()
    }

    /// Well of every object, from the `plate`, `column` and `row` columns.
    fn well_coordinates(&self) -> Result<Vec<WellCoordinate>> {
        let plate = self.load_column("plate")?;
        let column = self.load_column("column")?;
        let row = self.load_column("row")?;

        plate
            .iter()
            .zip(column.iter())
            .zip(row.iter())
            .enumerate()
            .map(|(object, ((p, c), r))| -> Result<WellCoordinate> {
                Ok(WellCoordinate::new(
                    well_index(*p, "plate", object)?,
                    well_index(*c, "column", object)?,
                    well_index(*r, "row", object)?,
                ))
            })
            .collect()
    }
}

// plate, column and row are stored as f64 but must hold non-negative integers
fn well_index(value: f64, name: &str, object: ObjectId) -> Result<u32> {
    if value.is_finite() && value >= 0.0 && value.fract() == 0.0 && value <= u32::MAX as f64 {
        Ok(value as u32)
    } else {
        Err(EngineError::DataUnavailable(format!("object {} has invalid {} {}", object, name, value)))
    }
}

/// Deterministic sample of `size` ids out of `object_count`, ascending.
pub fn fixed_sample(object_count: usize, size: usize, seed: u64) -> Vec<ObjectId> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut ids = rand::seq::index::sample(&mut rng, object_count, size.min(object_count)).into_vec();
    ids.sort_unstable();
    ids
}

/// Column store held entirely in memory, used for synthetic datasets and tests.
#[derive(Clone, Debug, Default)]
pub struct InMemoryStore {
    object_count: usize,
    columns: HashMap<String, Arc<[f64]>>,
    annotations: Option<HashMap<WellCoordinate, PopulationId>>,
}

impl InMemoryStore {
    pub fn new(object_count: usize) -> Self {
        InMemoryStore { object_count, ..Default::default() }
    }

    pub fn with_column(mut self, name: &str, values: Vec<f64>) -> Result<Self> {
        if values.len() != self.object_count {
            return Err(EngineError::DataUnavailable(format!(
                "column '{}' has {} values, expected {}",
                name,
                values.len(),
                self.object_count
            )));
        }
        self.columns.insert(name.to_string(), values.into());
        Ok(self)
    }

    /// Store the well of every object as `plate`, `column` and `row` columns.
    pub fn with_wells(self, wells: &[WellCoordinate]) -> Result<Self> {
        self.with_column("plate", wells.iter().map(|w| w.plate as f64).collect())?
            .with_column("column", wells.iter().map(|w| w.column as f64).collect())?
            .with_column("row", wells.iter().map(|w| w.row as f64).collect())
    }

    pub fn with_prior_annotations(mut self, annotations: HashMap<WellCoordinate, PopulationId>) -> Self {
        self.annotations = Some(annotations);
        self
    }
}

impl ColumnStore for InMemoryStore {
    fn object_count(&self) -> usize {
        self.object_count
    }

    fn column_names(&self) -> Vec<String> {
        self.columns.keys().cloned().collect()
    }

    fn load_column(&self, name: &str) -> Result<Arc<[f64]>> {
        self.columns
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::DataUnavailable(format!("no column named '{}'", name)))
    }

    fn sample_object_ids(&self, size: usize) -> Vec<ObjectId> {
        fixed_sample(self.object_count, size, SAMPLE_SEED)
    }

    fn prior_annotations(&self) -> Option<HashMap<WellCoordinate, PopulationId>> {
        self.annotations.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> InMemoryStore {
        InMemoryStore::new(4)
            .with_column("Nint", vec![1.0, 2.0, 3.0, 4.0])
            .unwrap()
            .with_column("At_con", vec![0.0, 0.0, 1.0, 1.0])
            .unwrap()
            .with_wells(&[
                WellCoordinate::new(0, 1, 2),
                WellCoordinate::new(0, 1, 2),
                WellCoordinate::new(1, 0, 0),
                WellCoordinate::new(1, 0, 0),
            ])
            .unwrap()
    }

    #[test]
    fn test_feature_names_skip_system_columns() {
        assert_eq!(store().feature_names(), vec!["At_con".to_string(), "Nint".to_string()]);
    }

    #[test]
    fn test_missing_column_is_unavailable() {
        assert!(matches!(store().load_column("nope"), Err(EngineError::DataUnavailable(_))));
        assert!(InMemoryStore::new(3).with_column("short", vec![1.0]).is_err());
    }

    #[test]
    fn test_well_coordinates() {
        let wells = store().well_coordinates().unwrap();
        assert_eq!(wells[1], WellCoordinate::new(0, 1, 2));
        assert_eq!(wells[3].key(), "1_0_0");
        assert_eq!("1_0_0".parse::<WellCoordinate>().unwrap(), wells[3]);
        assert!("1_0".parse::<WellCoordinate>().is_err());
    }

    #[test]
    fn test_invalid_well_values_are_unavailable() {
        let store = |plate: f64, row: f64| {
            InMemoryStore::new(2)
                .with_column("plate", vec![0.0, plate])
                .unwrap()
                .with_column("column", vec![1.0, 1.0])
                .unwrap()
                .with_column("row", vec![2.0, row])
                .unwrap()
        };

        assert!(store(3.0, 4.0).well_coordinates().is_ok());
        assert!(matches!(store(f64::NAN, 4.0).well_coordinates(), Err(EngineError::DataUnavailable(_))));
        assert!(matches!(store(1.0, -1.0).well_coordinates(), Err(EngineError::DataUnavailable(_))));
        assert!(matches!(store(1.5, 4.0).well_coordinates(), Err(EngineError::DataUnavailable(_))));
    }

    #[test]
    fn test_sample_is_stable() {
        let store = InMemoryStore::new(1000);
        let a = store.sample_object_ids(50);
        assert_eq!(a, store.sample_object_ids(50));
        assert_eq!(a.len(), 50);
        assert!(a.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(store.sample_object_ids(5000).len(), 1000);
    }
}
