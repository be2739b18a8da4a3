use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a user or model defined population.
pub type PopulationId = u32;

/// Dense object identifier in `[0, N)`.
pub type ObjectId = usize;

/// Label assigned to one object. `Unsure` lives outside the population id space.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Population {
    Member(PopulationId),
    Unsure,
}

impl Population {
    pub fn id(&self) -> Option<PopulationId> {
        match self {
            Population::Member(id) => Some(*id),
            Population::Unsure => None,
        }
    }

    /// String key used in serialized tables; `unsure_key` is dataset specific.
    pub fn key(&self, unsure_key: &str) -> String {
        match self {
            Population::Member(id) => id.to_string(),
            Population::Unsure => unsure_key.to_string(),
        }
    }
}

impl fmt::Display for Population {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Population::Member(id) => write!(f, "{}", id),
            Population::Unsure => write!(f, "unsure"),
        }
    }
}

/// User exemplars: population id to the objects marked for it.
///
/// Both levels are ordered sets, so two requests listing the same exemplars in
/// a different order compare and hash equal.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExemplarSet(pub BTreeMap<PopulationId, BTreeSet<ObjectId>>);

impl ExemplarSet {
    pub fn new() -> Self {
        ExemplarSet(BTreeMap::new())
    }

    pub fn insert(&mut self, population: PopulationId, object: ObjectId) {
        self.0.entry(population).or_default().insert(object);
    }

    pub fn is_empty(&self) -> bool {
        self.0.values().all(|objects| objects.is_empty())
    }

    pub fn iter(&self) -> impl Iterator<Item = (PopulationId, ObjectId)> + '_ {
        self.0
            .iter()
            .flat_map(|(population, objects)| objects.iter().map(move |o| (*population, *o)))
    }

    pub fn objects(&self) -> BTreeSet<ObjectId> {
        self.0.values().flatten().copied().collect()
    }
}

impl<const N: usize> From<[(PopulationId, Vec<ObjectId>); N]> for ExemplarSet {
    fn from(entries: [(PopulationId, Vec<ObjectId>); N]) -> Self {
        let mut set = ExemplarSet::new();
        for (population, objects) in entries {
            for object in objects {
                set.insert(population, object);
            }
        }
        set
    }
}

/// One label per object of a dataset.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PopulationAssignment {
    pub labels: Vec<Population>,
}

impl PopulationAssignment {
    pub fn unsure(object_count: usize) -> Self {
        PopulationAssignment { labels: vec![Population::Unsure; object_count] }
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn get(&self, object: ObjectId) -> Option<Population> {
        self.labels.get(object).copied()
    }

    /// Object ids grouped by assigned population, ids ascending.
    pub fn partition(&self) -> BTreeMap<Population, Vec<ObjectId>> {
        let mut partition: BTreeMap<Population, Vec<ObjectId>> = BTreeMap::new();
        for (object, label) in self.labels.iter().enumerate() {
            partition.entry(*label).or_default().push(object);
        }
        partition
    }
}
