//! Reconstructing one device's view from a merged tree.

use crate::core::DeviceFileError;
use crate::identifier::{DecompositionCache, TraitSet};
use crate::tree::{MergedTree, Node, SortKeys};

/// Resolve every filter in `tree` for the device with `traits`.
///
/// Nodes whose filter rejects the device are dropped together with their
/// subtree; kept nodes lose their filter. Fails with `EmptyDevice` when
/// nothing below the root applies, which means the traits do not belong to
/// this cluster.
pub fn extract(tree: &MergedTree, traits: &TraitSet) -> Result<Node, DeviceFileError> {
    let view = resolve(tree.root(), traits, tree.sort_keys());
    if view.children().is_empty() {
        return Err(DeviceFileError::EmptyDevice {
            device: tree
                .schema()
                .compose(traits)
                .unwrap_or_else(|_| traits.to_string()),
        });
    }
    Ok(view)
}

/// [`extract`] for a device named by its identifier string.
///
/// The identifier is decomposed with the tree's own schema and member list,
/// so identifiers of devices outside the cluster are unknown.
pub fn extract_identifier(
    tree: &MergedTree,
    identifier: &str,
    cache: &mut DecompositionCache,
) -> Result<Node, DeviceFileError> {
    let valid = tree.valid_devices()?;
    let traits = cache.decompose(tree.schema(), identifier, &valid)?;
    extract(tree, &traits)
}

fn resolve(node: &Node, traits: &TraitSet, sort_keys: &SortKeys) -> Node {
    let mut view = node.identity().to_node();
    for child in node.children().iter().filter(|c| c.matches(traits)) {
        view.push_child(resolve(child, traits, sort_keys));
    }
    sort_keys.arrange(view.children_mut());
    view
}

impl MergedTree {
    pub fn extract(&self, traits: &TraitSet) -> Result<Node, DeviceFileError> {
        extract(self, traits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::MergeOptions;
    use crate::identifier::IdentifierSchema;
    use crate::merge::{Cluster, DeviceMerger};

    fn merged() -> MergedTree {
        let schema = IdentifierSchema::new(
            "{fam}{size}",
            [("fam", vec!["f1"]), ("size", vec!["8", "b"])],
        )
        .unwrap();
        let device = |size: &str| {
            Node::new("device")
                .with_child(Node::new("core").with_attribute("name", "cortex-m3"))
                .with_child(Node::new("memory").with_attribute("size", size))
        };
        let cluster = Cluster::new("f1", schema)
            .with_device(TraitSet::new().with("fam", "f1").with("size", "8"), device("65536"))
            .unwrap()
            .with_device(TraitSet::new().with("fam", "f1").with("size", "b"), device("131072"))
            .unwrap();
        DeviceMerger::new(&MergeOptions::default()).merge(&cluster).unwrap()
    }

    #[test]
    fn test_extract_drops_other_variants() {
        let tree = merged();
        let view = extract(&tree, &TraitSet::new().with("fam", "f1").with("size", "8")).unwrap();
        let memories = view.find_all("memory");
        assert_eq!(memories.len(), 1);
        assert_eq!(memories[0].attribute("size"), Some("65536"));
        assert_eq!(view.count_filtered(), 0);
    }

    #[test]
    fn test_extract_by_identifier() {
        let tree = merged();
        let mut cache = DecompositionCache::new();
        let view = extract_identifier(&tree, "f1b", &mut cache).unwrap();
        assert_eq!(view.find("memory").and_then(|m| m.attribute("size")), Some("131072"));
        assert!(matches!(
            extract_identifier(&tree, "f1c", &mut cache),
            Err(DeviceFileError::UnknownDevice { .. })
        ));
    }

    #[test]
    fn test_extract_is_deterministic() {
        let tree = merged();
        let traits = TraitSet::new().with("fam", "f1").with("size", "b");
        assert_eq!(tree.extract(&traits).unwrap(), tree.extract(&traits).unwrap());
    }

    #[test]
    fn test_empty_device() {
        let schema = IdentifierSchema::new("{fam}", [("fam", vec!["f1", "f4"])]).unwrap();
        let cluster = Cluster::new("f", schema)
            .with_device(
                TraitSet::new().with("fam", "f1"),
                Node::new("device").with_child(Node::new("core")),
            )
            .unwrap()
            .with_device(TraitSet::new().with("fam", "f4"), Node::new("device"))
            .unwrap();
        let tree = DeviceMerger::new(&MergeOptions::default()).merge(&cluster).unwrap();
        assert!(matches!(
            tree.extract(&TraitSet::new().with("fam", "f4")),
            Err(DeviceFileError::EmptyDevice { .. })
        ));
    }
}
