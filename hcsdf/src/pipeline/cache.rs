use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use hcscore::data::population::ExemplarSet;
use log::debug;
use moka::policy::EvictionPolicy;
use moka::sync::Cache;
use serde::Serialize;

use crate::data::store::WellCoordinate;
use crate::error::Result;

/// Identity of a cached result. Features and exemplars are sets, so the order
/// a client lists them in does not matter.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct RequestKey {
    pub operation: String,
    pub dataset: String,
    pub features: BTreeSet<String>,
    pub exemplars: ExemplarSet,
    pub well: Option<WellCoordinate>,
    pub params: Vec<u64>,
}

impl RequestKey {
    pub fn new(operation: &str, dataset: &str) -> Self {
        RequestKey {
            operation: operation.to_string(),
            dataset: dataset.to_string(),
            features: BTreeSet::new(),
            exemplars: ExemplarSet::new(),
            well: None,
            params: Vec::new(),
        }
    }

    pub fn with_features(mut self, features: &[String]) -> Self {
        self.features = features.iter().cloned().collect();
        self
    }

    pub fn with_exemplars(mut self, exemplars: &ExemplarSet) -> Self {
        self.exemplars = exemplars.clone();
        self
    }

    pub fn with_well(mut self, well: Option<WellCoordinate>) -> Self {
        self.well = well;
        self
    }

    pub fn with_param(mut self, param: u64) -> Self {
        self.params.push(param);
        self
    }
}

/// Bounded LRU memo with single-flight computation per key.
pub struct ResultCache<V> {
    inner: Cache<RequestKey, Arc<V>>,
    computations: AtomicUsize,
    hits: AtomicUsize,
}

impl<V: Send + Sync + 'static> ResultCache<V> {
    pub fn new(capacity: usize) -> Self {
        ResultCache {
            inner: Cache::builder()
                .max_capacity(capacity as u64)
                .eviction_policy(EvictionPolicy::lru())
                .build(),
            computations: AtomicUsize::new(0),
            hits: AtomicUsize::new(0),
        }
    }

    /// Cached value of `key`, computing it on a miss.
    ///
    /// Concurrent callers with the same key wait for the first one and share
    /// its outcome. A failed computation stores nothing.
    pub fn get_or_compute<F>(&self, key: &RequestKey, compute: F) -> Result<Arc<V>>
    where
        F: FnOnce() -> Result<V>,
    {
        let mut computed = false;
        let value = self.inner.try_get_with_by_ref(key, || {
            computed = true;
            debug!("cache miss for {} on {}", key.operation, key.dataset);
            self.computations.fetch_add(1, Ordering::SeqCst);
            compute().map(Arc::new)
        })?;

        if !computed {
            self.hits.fetch_add(1, Ordering::SeqCst);
            debug!("cache hit for {} on {}", key.operation, key.dataset);
        }
        Ok(value)
    }

    /// Number of computations started, failed ones included.
    pub fn computations(&self) -> usize {
        self.computations.load(Ordering::SeqCst)
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.inner.run_pending_tasks();
        self.inner.entry_count() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.inner.invalidate_all();
        self.inner.run_pending_tasks();
    }
}
