use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Score written for every category when a record could not be annotated.
pub const UNAVAILABLE_SCORE: f64 = -1.0;

/// The closed set of category names requested from the annotator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CategorySchema {
    names: Arc<[String]>,
}

impl CategorySchema {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    /// A score set with every category marked unavailable.
    pub fn unavailable(&self) -> ScoreSet {
        ScoreSet(
            self.names
                .iter()
                .map(|name| (name.clone(), UNAVAILABLE_SCORE))
                .collect(),
        )
    }
}

/// Category name to score.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(transparent)]
pub struct ScoreSet(BTreeMap<String, f64>);

impl ScoreSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, category: impl Into<String>, score: f64) {
        self.0.insert(category.into(), score);
    }

    pub fn get(&self, category: &str) -> Option<f64> {
        self.0.get(category).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True when every category of `schema` carries a real score.
    pub fn covers(&self, schema: &CategorySchema) -> bool {
        schema.names().iter().all(|name| {
            self.get(name).is_some_and(|score| score != UNAVAILABLE_SCORE)
        })
    }
}

impl FromIterator<(String, f64)> for ScoreSet {
    fn from_iter<T: IntoIterator<Item = (String, f64)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}
