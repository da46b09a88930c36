//! The merged tree: one filtered document for a whole device cluster.

use serde::{Deserialize, Serialize};

use super::node::Node;
use super::sort::SortKeys;
use crate::core::DeviceFileError;
use crate::identifier::{IdentifierSchema, TraitSet, ValidDeviceList};

/// Deduplicated, filter-annotated description of a device cluster.
///
/// Only the merger builds one; afterwards it is read-only. Changing the
/// source data means merging again, never editing a merged tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergedTree {
    cluster: String,
    schema: IdentifierSchema,
    devices: Vec<TraitSet>,
    root: Node,
    #[serde(skip)]
    sort_keys: SortKeys,
}

impl MergedTree {
    pub(crate) fn new(
        cluster: String,
        schema: IdentifierSchema,
        devices: Vec<TraitSet>,
        root: Node,
        sort_keys: SortKeys,
    ) -> Self {
        Self {
            cluster,
            schema,
            devices,
            root,
            sort_keys,
        }
    }

    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    pub fn schema(&self) -> &IdentifierSchema {
        &self.schema
    }

    /// Trait sets of every member device, in merge order.
    pub fn devices(&self) -> &[TraitSet] {
        &self.devices
    }

    pub fn root(&self) -> &Node {
        &self.root
    }

    pub fn sort_keys(&self) -> &SortKeys {
        &self.sort_keys
    }

    /// Sort keys are code, not data, so a tree loaded from disk needs them
    /// registered again before extraction.
    pub fn with_sort_keys(mut self, sort_keys: SortKeys) -> Self {
        self.sort_keys = sort_keys;
        self
    }

    pub fn identifiers(&self) -> Result<Vec<String>, DeviceFileError> {
        self.devices.iter().map(|t| self.schema.compose(t)).collect()
    }

    pub fn valid_devices(&self) -> Result<ValidDeviceList, DeviceFileError> {
        ValidDeviceList::from_traits(&self.schema, &self.devices)
    }

    pub fn contains_device(&self, traits: &TraitSet) -> bool {
        self.devices.iter().any(|t| t == traits)
    }
}

impl PartialEq for MergedTree {
    fn eq(&self, other: &Self) -> bool {
        self.cluster == other.cluster
            && self.schema == other.schema
            && self.devices == other.devices
            && self.root == other.root
    }
}
