use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Sparse histogram over `[0, 1]` values: bin index to count, empty bins omitted.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Histogram(pub BTreeMap<usize, u64>);

impl Histogram {
    pub fn total(&self) -> u64 {
        self.0.values().sum()
    }

    pub fn count(&self, bin: usize) -> u64 {
        self.0.get(&bin).copied().unwrap_or(0)
    }
}

/// Quantize a scaled value into one of `levels` bins, `floor(value * levels)`.
///
/// The upper boundary `1.0` falls into the last bin and NaN into the first,
/// so every object lands somewhere.
pub fn quantize(value: f32, levels: usize) -> usize {
    if levels == 0 {
        return 0;
    }
    // float to int casts saturate: negatives and NaN become 0
    ((value * levels as f32) as usize).min(levels - 1)
}

/// Histogram of `values` restricted to `objects`.
pub fn histogram_1d(values: &[f32], objects: &[usize], bins: usize) -> Histogram {
    let mut counts = vec![0u64; bins.max(1)];
    for &object in objects {
        counts[quantize(values[object], bins)] += 1;
    }

    Histogram(
        counts
            .into_iter()
            .enumerate()
            .filter(|(_, count)| *count > 0)
            .collect(),
    )
}
