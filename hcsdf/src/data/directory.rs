//! Column store over a dataset directory.
//!
//! ```text
//! <dataset>/config.json          dataset configuration
//! <dataset>/columns/<name>.bin   one column, raw little-endian f64 per object
//! <dataset>/wells.tab            optional well annotations, tab separated
//! ```

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use hcscore::data::population::{ObjectId, PopulationId};
use log::{debug, info, warn};
use memmap2::Mmap;

use crate::data::config::PriorAnnotationConfig;
use crate::data::store::{fixed_sample, ColumnStore, WellCoordinate, SAMPLE_SEED};
use crate::error::{EngineError, Result};

const COLUMN_EXTENSION: &str = "bin";

/// Column files stay mapped read-only; a column is decoded when requested
/// and dropped with its last reader.
pub struct DirectoryStore {
    object_count: usize,
    names: Vec<String>,
    columns: HashMap<String, Mmap>,
    annotations: Option<HashMap<WellCoordinate, PopulationId>>,
}

impl DirectoryStore {
    /// Map every file in `<root>/columns` and read the optional well annotations.
    pub fn open(root: &Path, prior: Option<&PriorAnnotationConfig>) -> Result<Self> {
        let column_path = root.join("columns");
        let mut columns: HashMap<String, Mmap> = HashMap::new();

        for entry in fs::read_dir(&column_path)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(COLUMN_EXTENSION) {
                continue;
            }
            if let Some(name) = path.file_stem().and_then(|s| s.to_str()) {
                let file = File::open(&path)?;
                // column files are written once and must not change while a dataset is open
                let map = unsafe { Mmap::map(&file)? };
                columns.insert(name.to_string(), map);
            }
        }

        let mut names: Vec<String> = columns.keys().cloned().collect();
        names.sort();

        let Some(first) = names.first() else {
            return Err(EngineError::DataUnavailable(format!("no columns in {}", column_path.display())));
        };

        // the plate column defines the object count when present
        let reference = if columns.contains_key("plate") { "plate" } else { first.as_str() };
        let bytes = columns[reference].len();
        let object_count = bytes / 8;

        for name in &names {
            let len = columns[name].len();
            if len != bytes || len % 8 != 0 {
                return Err(EngineError::DataUnavailable(format!(
                    "column '{}' holds {} bytes, expected {}",
                    name, len, bytes
                )));
            }
        }

        let annotations = match prior {
            Some(prior) => {
                let path = root.join("wells.tab");
                if path.exists() {
                    Some(read_well_annotations(&path, prior)?)
                } else {
                    warn!("prior annotations configured but {} is missing", path.display());
                    None
                }
            }
            None => None,
        };

        info!("Opened {} with {} objects and {} columns", root.display(), object_count, names.len());

        Ok(DirectoryStore { object_count, names, columns, annotations })
    }
}

impl ColumnStore for DirectoryStore {
    fn object_count(&self) -> usize {
        self.object_count
    }

    fn column_names(&self) -> Vec<String> {
        self.names.clone()
    }

    fn load_column(&self, name: &str) -> Result<Arc<[f64]>> {
        let map = self
            .columns
            .get(name)
            .ok_or_else(|| EngineError::DataUnavailable(format!("no column named '{}'", name)))?;

        debug!("Decoding column {}", name);
        let mut values = vec![0.0f64; self.object_count];
        LittleEndian::read_f64_into(&map[..self.object_count * 8], &mut values);
        Ok(values.into())
    }

    fn sample_object_ids(&self, size: usize) -> Vec<ObjectId> {
        fixed_sample(self.object_count, size, SAMPLE_SEED)
    }

    fn prior_annotations(&self) -> Option<HashMap<WellCoordinate, PopulationId>> {
        self.annotations.clone()
    }
}

/// Read `plate, column, row, <categories...>` rows and map the configured
/// category onto populations. Multi-valued cells (`a|b`) use their first value.
pub fn read_well_annotations(path: &Path, prior: &PriorAnnotationConfig) -> Result<HashMap<WellCoordinate, PopulationId>> {
    let mut reader = csv::ReaderBuilder::new().delimiter(b'\t').from_path(path)?;
    let headers = reader.headers()?.clone();

    let index = |name: &str| {
        headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| EngineError::Config(format!("{} has no '{}' column", path.display(), name)))
    };
    let (plate, column, row, category) = (index("plate")?, index("column")?, index("row")?, index(prior.category.as_str())?);

    let parse = |value: Option<&str>| -> Result<u32> {
        value
            .and_then(|v| v.trim().parse::<u32>().ok())
            .ok_or_else(|| EngineError::Config(format!("invalid well coordinate in {}", path.display())))
    };

    let mut annotations = HashMap::new();
    for record in reader.records() {
        let record = record?;
        let well = WellCoordinate::new(parse(record.get(plate))?, parse(record.get(column))?, parse(record.get(row))?);
        let value = record.get(category).unwrap_or_default().split('|').next().unwrap_or_default().trim();
        if let Some(population) = prior.populations.get(value) {
            annotations.insert(well, *population);
        }
    }

    Ok(annotations)
}

/// Write one column in the layout [`DirectoryStore`] reads.
pub fn write_column(root: &Path, name: &str, values: &[f64]) -> Result<()> {
    let column_path = root.join("columns");
    fs::create_dir_all(&column_path)?;
    let mut writer = BufWriter::new(File::create(column_path.join(format!("{}.{}", name, COLUMN_EXTENSION)))?);
    for value in values {
        writer.write_f64::<LittleEndian>(*value)?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn prior() -> PriorAnnotationConfig {
        PriorAnnotationConfig {
            category: "Type".to_string(),
            populations: BTreeMap::from([("Negative".to_string(), 0), ("Positive".to_string(), 1)]),
        }
    }

    #[test]
    fn test_round_trip_through_directory() {
        let dir = tempfile::tempdir().unwrap();
        write_column(dir.path(), "plate", &[0.0, 0.0, 1.0]).unwrap();
        write_column(dir.path(), "column", &[0.0, 0.0, 2.0]).unwrap();
        write_column(dir.path(), "row", &[1.0, 1.0, 3.0]).unwrap();
        write_column(dir.path(), "Nint", &[0.5, 1.5, 2.5]).unwrap();
        fs::write(
            dir.path().join("wells.tab"),
            "plate\tcolumn\trow\tType\tTarget\n0\t0\t1\tNegative\t\n1\t2\t3\tPositive\tGENE1|GENE2\n",
        )
        .unwrap();

        let store = DirectoryStore::open(dir.path(), Some(&prior())).unwrap();
        assert_eq!(store.object_count(), 3);
        assert_eq!(store.feature_names(), vec!["Nint".to_string()]);
        assert_eq!(&*store.load_column("Nint").unwrap(), &[0.5, 1.5, 2.5]);
        assert!(store.load_column("missing").is_err());

        let annotations = store.prior_annotations().unwrap();
        assert_eq!(annotations[&WellCoordinate::new(0, 0, 1)], 0);
        assert_eq!(annotations[&WellCoordinate::new(1, 2, 3)], 1);
        assert_eq!(store.well_coordinates().unwrap()[2], WellCoordinate::new(1, 2, 3));
    }

    #[test]
    fn test_columns_are_decoded_per_request() {
        let dir = tempfile::tempdir().unwrap();
        write_column(dir.path(), "plate", &[0.0, 1.0]).unwrap();
        write_column(dir.path(), "Nint", &[-2.5, 7.0]).unwrap();

        let store = DirectoryStore::open(dir.path(), None).unwrap();
        let first = store.load_column("Nint").unwrap();
        let second = store.load_column("Nint").unwrap();
        assert_eq!(&*first, &[-2.5, 7.0]);
        assert_eq!(first, second);
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(store.prior_annotations().is_none());
    }

    #[test]
    fn test_mismatched_column_lengths() {
        let dir = tempfile::tempdir().unwrap();
        write_column(dir.path(), "plate", &[0.0, 0.0, 1.0]).unwrap();
        write_column(dir.path(), "Nint", &[0.5]).unwrap();
        assert!(matches!(DirectoryStore::open(dir.path(), None), Err(EngineError::DataUnavailable(_))));
    }
}
