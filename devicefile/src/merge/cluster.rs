//! Clusters: the devices that get merged into one tree.
//!
//! Which devices belong together is a curation decision made outside this
//! crate and written down as a [`ClusterDefinition`] (JSON):
//!
//! ```json
//! {
//!   "name": "stm32f1-03",
//!   "schema": {
//!     "template": "stm32{family}{name}{pin}{size}",
//!     "traits": { "family": ["f1"], "name": ["03"], "pin": ["c", "r"], "size": ["8", "b"] }
//!   },
//!   "members": [ { "family": "f1", "name": "03" } ]
//! }
//! ```
//!
//! A member pins some traits to one value or a list of values; traits it
//! leaves out range over their whole domain. Combinations that are not in
//! the valid device list never existed and are dropped.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::source::DeviceSource;
use crate::core::DeviceFileError;
use crate::identifier::{IdentifierSchema, TraitSet, ValidDeviceList};
use crate::tree::Node;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    pub fn values(&self) -> Vec<&str> {
        match self {
            OneOrMany::One(v) => vec![v.as_str()],
            OneOrMany::Many(vs) => vs.iter().map(String::as_str).collect(),
        }
    }
}

/// Curated description of one merge unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterDefinition {
    pub name: String,
    pub schema: IdentifierSchema,
    pub members: Vec<BTreeMap<String, OneOrMany>>,
}

impl ClusterDefinition {
    pub fn from_file(path: &Path) -> Result<Self, DeviceFileError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Expand the members into concrete trait sets of existing devices,
    /// ordered by the position of their trait values in the schema domains.
    pub fn expand(&self, valid: &ValidDeviceList) -> Result<Vec<TraitSet>, DeviceFileError> {
        let mut devices: BTreeMap<String, TraitSet> = BTreeMap::new();

        for member in &self.members {
            if let Some(unknown) = member.keys().find(|k| self.schema.position(k).is_none()) {
                return Err(self.invalid(format!("member uses unknown trait '{}'", unknown)));
            }

            let mut partial = vec![TraitSet::new()];
            for domain in self.schema.domains() {
                let values: Vec<&str> = match member.get(&domain.name) {
                    Some(pinned) => {
                        let values = pinned.values();
                        if let Some(bad) = values.iter().copied().find(|v| !domain.values.iter().any(|d| d == v)) {
                            return Err(self.invalid(format!(
                                "'{}' is not a value of trait '{}'",
                                bad, domain.name
                            )));
                        }
                        values
                    }
                    None => domain.values.iter().map(String::as_str).collect(),
                };
                partial = partial
                    .into_iter()
                    .flat_map(|t| {
                        values
                            .iter()
                            .map(move |v| t.clone().with(domain.name.clone(), *v))
                    })
                    .collect();
            }

            for traits in partial {
                let identifier = self.schema.compose(&traits)?;
                if !valid.contains(&identifier) {
                    continue;
                }
                match devices.get(&identifier) {
                    Some(existing) if *existing != traits => {
                        return Err(DeviceFileError::Schema(format!(
                            "identifier '{}' is spelled by both {} and {}",
                            identifier, existing, traits
                        )));
                    }
                    Some(_) => {}
                    None => {
                        devices.insert(identifier, traits);
                    }
                }
            }
        }

        if devices.is_empty() {
            return Err(self.invalid("no member matches an existing device".to_string()));
        }
        let mut ordered: Vec<TraitSet> = devices.into_values().collect();
        ordered.sort_by_cached_key(|t| self.schema.order_key(t));
        Ok(ordered)
    }

    /// Expand the definition and fetch every member's tree from `source`.
    pub fn load<S>(&self, valid: &ValidDeviceList, source: &S) -> Result<Cluster, DeviceFileError>
    where
        S: DeviceSource + ?Sized,
    {
        let mut cluster = Cluster::new(&self.name, self.schema.clone());
        for traits in self.expand(valid)? {
            let identifier = self.schema.compose(&traits)?;
            let tree = source.load_device(&identifier, &traits)?;
            cluster.add_device(traits, tree)?;
        }
        tracing::info!("Loaded cluster {} with {} devices", self.name, cluster.len());
        Ok(cluster)
    }

    fn invalid(&self, detail: String) -> DeviceFileError {
        DeviceFileError::InvalidCluster {
            cluster: self.name.clone(),
            detail,
        }
    }
}

/// Load cluster definitions from a directory of JSON files.
/// Returns both the definitions that loaded and a message per file that did not.
pub fn load_definitions_from_directory(dir: &Path) -> (Vec<ClusterDefinition>, Vec<String>) {
    let mut definitions = Vec::new();
    let mut errors = Vec::new();

    if !dir.is_dir() {
        errors.push(format!("{:?} is not a directory", dir));
        return (definitions, errors);
    }

    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            errors.push(format!("Failed to read directory {:?}: {}", dir, e));
            return (definitions, errors);
        }
    };

    let mut paths: Vec<_> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.extension().map(|e| e == "json").unwrap_or(false))
        .collect();
    paths.sort();

    for path in paths {
        match ClusterDefinition::from_file(&path) {
            Ok(def) => {
                tracing::info!("Loaded cluster definition {} from {:?}", def.name, path.file_name());
                definitions.push(def);
            }
            Err(e) => {
                let message = format!("Failed to load {:?}: {}", path.file_name(), e);
                tracing::warn!("{}", message);
                errors.push(message);
            }
        }
    }

    (definitions, errors)
}

/// One member device with its normalized source tree.
#[derive(Debug, Clone)]
pub struct SourceDevice {
    pub identifier: String,
    pub traits: TraitSet,
    pub tree: Node,
}

/// The devices of one merge unit, ready for the merger.
#[derive(Debug, Clone)]
pub struct Cluster {
    name: String,
    schema: IdentifierSchema,
    devices: Vec<SourceDevice>,
}

impl Cluster {
    pub fn new(name: impl Into<String>, schema: IdentifierSchema) -> Self {
        Self {
            name: name.into(),
            schema,
            devices: Vec::new(),
        }
    }

    /// Add a device. Its traits must spell a valid identifier under the
    /// cluster's schema, and no other member may share that identifier.
    pub fn add_device(&mut self, traits: TraitSet, tree: Node) -> Result<&SourceDevice, DeviceFileError> {
        let identifier = self.schema.compose(&traits)?;
        if self.devices.iter().any(|d| d.identifier == identifier) {
            return Err(DeviceFileError::InvalidCluster {
                cluster: self.name.clone(),
                detail: format!("device {} added twice", identifier),
            });
        }
        self.devices.push(SourceDevice {
            identifier,
            traits,
            tree,
        });
        let last = self.devices.len() - 1;
        Ok(&self.devices[last])
    }

    pub fn with_device(mut self, traits: TraitSet, tree: Node) -> Result<Self, DeviceFileError> {
        self.add_device(traits, tree)?;
        Ok(self)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &IdentifierSchema {
        &self.schema
    }

    pub fn devices(&self) -> &[SourceDevice] {
        &self.devices
    }

    pub fn device(&self, identifier: &str) -> Option<&SourceDevice> {
        self.devices.iter().find(|d| d.identifier == identifier)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn identifiers(&self) -> BTreeSet<&str> {
        self.devices.iter().map(|d| d.identifier.as_str()).collect()
    }

    /// Members in schema domain order, independent of insertion order.
    pub fn sorted_devices(&self) -> Vec<&SourceDevice> {
        let mut sorted: Vec<&SourceDevice> = self.devices.iter().collect();
        sorted.sort_by_cached_key(|d| self.schema.order_key(&d.traits));
        sorted
    }
}
