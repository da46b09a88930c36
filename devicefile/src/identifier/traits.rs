//! Trait sets: the named axes that distinguish one device variant from another.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Mapping from trait name to trait value for one concrete device,
/// e.g. `{family: "f1", name: "03", pin: "r", size: "b"}`.
///
/// Ordering of the entries carries no meaning; the canonical order for
/// identifier strings and filters comes from the [`IdentifierSchema`].
///
/// [`IdentifierSchema`]: super::IdentifierSchema
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TraitSet(BTreeMap<String, String>);

impl TraitSet {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Builder-style insert.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.0.insert(name.into(), value.into())
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Restrict the set to the given trait names.
    pub fn project<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> Vec<Option<&str>> {
        names.into_iter().map(|n| self.get(n)).collect()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for TraitSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl fmt::Display for TraitSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (name, value)) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: \"{}\"", name, value)?;
        }
        write!(f, "}}")
    }
}
