use std::sync::Arc;

use hcscore::algorithm::scaling::{adaptive_scale_column, DEGENERATE_FILL};
use log::warn;

use crate::data::dataset::Dataset;
use crate::error::{EngineError, Result};

/// Scaled values of one column, shared read-only between workers.
pub type ScaledColumn = Arc<[f32]>;

pub trait Scaler: Send + Sync {
    /// Column mapped into [0, 1]; constant columns become [`DEGENERATE_FILL`].
    fn scale(&self, dataset: &Dataset, column: &str) -> Result<ScaledColumn>;

    fn scale_all(&self, dataset: &Dataset, columns: &[String]) -> Result<Vec<ScaledColumn>> {
        columns.iter().map(|column| self.scale(dataset, column)).collect()
    }
}

/// Min-max scaling with logarithmic compression of right-skewed columns.
#[derive(Clone, Copy, Debug, Default)]
pub struct AdaptiveScaler;

impl AdaptiveScaler {
    /// Like [`Scaler::scale`] but reports a constant column as
    /// [`EngineError::DegenerateColumn`] instead of filling it.
    pub fn scale_strict(&self, dataset: &Dataset, column: &str) -> Result<ScaledColumn> {
        if dataset.metrics(column)?.is_degenerate() {
            return Err(EngineError::DegenerateColumn(column.to_string()));
        }
        self.scale(dataset, column)
    }
}

impl Scaler for AdaptiveScaler {
    fn scale(&self, dataset: &Dataset, column: &str) -> Result<ScaledColumn> {
        dataset.scaled_column(column, || {
            let values = dataset.store().load_column(column)?;
            let metrics = dataset.metrics(column)?;

            if metrics.is_degenerate() {
                warn!("{}: column {} has no range, filling with {}", dataset.id, column, DEGENERATE_FILL);
            }

            Ok(adaptive_scale_column(&values, &metrics).into())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::config::DatasetConfig;
    use crate::data::store::InMemoryStore;

    fn dataset() -> Dataset {
        let store = InMemoryStore::new(5)
            .with_column("Linear", vec![0.0, 1.0, 2.0, 3.0, 4.0])
            .unwrap()
            .with_column("Skewed", vec![0.0, 0.0, 0.0, 0.0, 1000.0])
            .unwrap()
            .with_column("Flat", vec![7.0; 5])
            .unwrap();
        Dataset::new("test", DatasetConfig::default(), Arc::new(store)).unwrap()
    }

    #[test]
    fn test_linear_column() {
        let scaled = AdaptiveScaler.scale(&dataset(), "Linear").unwrap();
        assert_eq!(&*scaled, &[0.0, 0.25, 0.5, 0.75, 1.0]);
    }

    #[test]
    fn test_skewed_column_stays_in_unit_interval() {
        let scaled = AdaptiveScaler.scale(&dataset(), "Skewed").unwrap();
        assert!(scaled.iter().all(|v| (0.0..=1.0).contains(v)));
        assert_eq!(scaled[0], 0.0);
        assert_eq!(scaled[4], 1.0);
    }

    #[test]
    fn test_degenerate_column() {
        let dataset = dataset();
        let scaled = AdaptiveScaler.scale(&dataset, "Flat").unwrap();
        assert!(scaled.iter().all(|v| *v == DEGENERATE_FILL));
        assert!(matches!(AdaptiveScaler.scale_strict(&dataset, "Flat"), Err(EngineError::DegenerateColumn(_))));
        assert!(AdaptiveScaler.scale_strict(&dataset, "Linear").is_ok());
    }

    #[test]
    fn test_repeated_scaling_reuses_the_column() {
        let dataset = dataset();
        let first = AdaptiveScaler.scale(&dataset, "Skewed").unwrap();
        let second = AdaptiveScaler.scale(&dataset, "Skewed").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(!Arc::ptr_eq(&first, &AdaptiveScaler.scale(&dataset, "Linear").unwrap()));
    }

    #[test]
    fn test_missing_column() {
        assert!(matches!(AdaptiveScaler.scale(&dataset(), "nope"), Err(EngineError::DataUnavailable(_))));
    }
}
