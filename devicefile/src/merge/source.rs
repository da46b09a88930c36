//! Where per-device trees come from.
//!
//! Turning vendor data into [`Node`] trees is the job of a format-specific
//! parser living outside this crate. The merger only sees it through
//! [`DeviceSource`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::core::DeviceFileError;
use crate::identifier::TraitSet;
use crate::tree::Node;

/// Supplier of normalized per-device trees.
pub trait DeviceSource {
    /// Load the tree for one device.
    fn load_device(&self, identifier: &str, traits: &TraitSet) -> Result<Node, DeviceFileError>;
}

impl DeviceSource for HashMap<String, Node> {
    fn load_device(&self, identifier: &str, _traits: &TraitSet) -> Result<Node, DeviceFileError> {
        self.get(identifier)
            .cloned()
            .ok_or_else(|| DeviceFileError::UnknownDevice {
                identifier: identifier.to_string(),
            })
    }
}

/// Reads `<identifier>.json` files holding one serialized [`Node`] each.
#[derive(Debug, Clone)]
pub struct JsonDeviceSource {
    dir: PathBuf,
}

impl JsonDeviceSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, identifier: &str) -> PathBuf {
        self.dir.join(format!("{}.json", identifier))
    }
}

impl DeviceSource for JsonDeviceSource {
    fn load_device(&self, identifier: &str, _traits: &TraitSet) -> Result<Node, DeviceFileError> {
        let path = self.path_for(identifier);
        if !path.is_file() {
            return Err(DeviceFileError::UnknownDevice {
                identifier: identifier.to_string(),
            });
        }
        let content = std::fs::read_to_string(&path)?;
        let node = serde_json::from_str(&content)?;
        tracing::debug!("Loaded device {} from {:?}", identifier, path);
        Ok(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_source() {
        let mut source = HashMap::new();
        source.insert("stm32f103c8".to_string(), Node::new("device"));
        let traits = TraitSet::new();
        assert!(source.load_device("stm32f103c8", &traits).is_ok());
        assert!(matches!(
            source.load_device("stm32f103rb", &traits),
            Err(DeviceFileError::UnknownDevice { .. })
        ));
    }

    #[test]
    fn test_json_source() {
        let dir = tempfile::tempdir().unwrap();
        let tree = Node::new("device").with_child(Node::new("core").with_attribute("name", "cortex-m3"));
        std::fs::write(
            dir.path().join("stm32f103c8.json"),
            serde_json::to_string(&tree).unwrap(),
        )
        .unwrap();

        let source = JsonDeviceSource::new(dir.path());
        let loaded = source.load_device("stm32f103c8", &TraitSet::new()).unwrap();
        assert_eq!(loaded, tree);
        assert!(source.load_device("stm32f103rb", &TraitSet::new()).is_err());
    }
}
