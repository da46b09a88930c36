//! Valid device lists and the per-run decomposition cache.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use super::schema::IdentifierSchema;
use super::traits::TraitSet;
use crate::core::DeviceFileError;

/// Identifiers of devices that actually exist.
///
/// A schema usually admits far more combinations than a vendor ever
/// produced; this list is what separates the two.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValidDeviceList(BTreeSet<String>);

impl ValidDeviceList {
    pub fn new<S: Into<String>>(identifiers: impl IntoIterator<Item = S>) -> Self {
        Self(identifiers.into_iter().map(Into::into).collect())
    }

    /// Build the list by composing each trait set with `schema`.
    pub fn from_traits<'a>(
        schema: &IdentifierSchema,
        devices: impl IntoIterator<Item = &'a TraitSet>,
    ) -> Result<Self, DeviceFileError> {
        devices
            .into_iter()
            .map(|t| schema.compose(t))
            .collect::<Result<BTreeSet<_>, _>>()
            .map(Self)
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.0.contains(identifier)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn extend<S: Into<String>>(&mut self, identifiers: impl IntoIterator<Item = S>) {
        self.0.extend(identifiers.into_iter().map(Into::into));
    }
}

/// Memoized decompositions for one batch run.
///
/// The cache is only valid for the schema and device list it was first used
/// with; create a fresh one for every run.
#[derive(Debug, Default)]
pub struct DecompositionCache {
    entries: HashMap<(String, String), TraitSet>,
    hits: usize,
}

impl DecompositionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decompose through the cache. Failures are not cached.
    pub fn decompose(
        &mut self,
        schema: &IdentifierSchema,
        identifier: &str,
        valid: &ValidDeviceList,
    ) -> Result<TraitSet, DeviceFileError> {
        let key = (schema.template().to_string(), identifier.to_string());
        if let Some(traits) = self.entries.get(&key) {
            self.hits += 1;
            return Ok(traits.clone());
        }
        let traits = schema.decompose(identifier, valid)?;
        self.entries.insert(key, traits.clone());
        Ok(traits)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn hits(&self) -> usize {
        self.hits
    }
}
