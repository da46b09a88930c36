//! Round-trip check between a merged tree and the devices it came from.
//!
//! A merged tree is only trusted once extracting every member device gives
//! back exactly the tree that went in. [`VerifiedTree`] is the only thing
//! that can be persisted.

use std::ops::Deref;

use serde::Serialize;

use crate::core::DeviceFileError;
use crate::extract::extract;
use crate::merge::{Cluster, DeviceMerger};
use crate::tree::{MergedTree, Node, NodePath};

/// A merged tree that passed the round-trip check.
///
/// It is built only by [`ConsistencyVerifier::verify`] or by loading an
/// artifact through [`crate::store`]; plain JSON does not deserialize into it:
///
/// ```compile_fail
/// let tree: devicefile::VerifiedTree = serde_json::from_str("{}").unwrap();
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct VerifiedTree(MergedTree);

impl VerifiedTree {
    /// Wrap a tree that was verified before it was persisted.
    pub(crate) fn from_persisted(tree: MergedTree) -> Self {
        Self(tree)
    }

    /// See [`MergedTree::with_sort_keys`].
    pub fn with_sort_keys(self, sort_keys: crate::tree::SortKeys) -> Self {
        Self(self.0.with_sort_keys(sort_keys))
    }

    pub fn into_inner(self) -> MergedTree {
        self.0
    }
}

impl Deref for VerifiedTree {
    type Target = MergedTree;

    fn deref(&self) -> &MergedTree {
        &self.0
    }
}

pub struct ConsistencyVerifier;

impl ConsistencyVerifier {
    /// Check `tree` against every device of `cluster` and seal it.
    pub fn verify(
        tree: MergedTree,
        cluster: &Cluster,
        merger: &DeviceMerger,
    ) -> Result<VerifiedTree, DeviceFileError> {
        Self::check(&tree, cluster, merger)?;
        tracing::info!("Verified cluster {} ({} devices)", cluster.name(), cluster.len());
        Ok(VerifiedTree(tree))
    }

    /// Compare the extraction of every member with its normalized source tree.
    pub fn check(
        tree: &MergedTree,
        cluster: &Cluster,
        merger: &DeviceMerger,
    ) -> Result<(), DeviceFileError> {
        if tree.devices().len() != cluster.len() {
            return Err(DeviceFileError::MergeRoundTrip {
                device: cluster.name().to_string(),
                path: tree.root().label(),
                detail: format!(
                    "tree lists {} devices, cluster has {}",
                    tree.devices().len(),
                    cluster.len()
                ),
            });
        }

        for device in cluster.devices() {
            let expected = merger.normalize(&device.tree);
            let round_trip = |path: String, detail: String| DeviceFileError::MergeRoundTrip {
                device: device.identifier.clone(),
                path,
                detail,
            };

            if !tree.contains_device(&device.traits) {
                return Err(round_trip(
                    expected.label(),
                    "device is missing from the merged tree".to_string(),
                ));
            }
            let actual = extract(tree, &device.traits)
                .map_err(|e| round_trip(expected.label(), format!("extraction failed: {}", e)))?;

            if let Some((path, detail)) = diff(&expected, &actual, &NodePath::root(&expected)) {
                tracing::warn!("Round trip mismatch for {} at {}: {}", device.identifier, path, detail);
                return Err(round_trip(path.to_string(), detail));
            }
        }
        Ok(())
    }
}

/// First difference between two trees, depth first.
pub fn diff(expected: &Node, actual: &Node, path: &NodePath) -> Option<(NodePath, String)> {
    if !expected.same_identity(actual) {
        return Some((
            path.clone(),
            format!("expected '{}', found '{}'", expected.label(), actual.label()),
        ));
    }
    if expected.filter() != actual.filter() {
        return Some((
            path.clone(),
            format!(
                "expected filter {:?}, found {:?}",
                expected.filter().map(ToString::to_string),
                actual.filter().map(ToString::to_string)
            ),
        ));
    }

    let count = expected.children().len().max(actual.children().len());
    for i in 0..count {
        match (expected.children().get(i), actual.children().get(i)) {
            (Some(e), Some(a)) => {
                if !e.same_identity(a) {
                    return Some((
                        path.clone(),
                        format!("child {} is '{}', expected '{}'", i, a.label(), e.label()),
                    ));
                }
                if let Some(found) = diff(e, a, &path.join(e)) {
                    return Some(found);
                }
            }
            (Some(e), None) => {
                return Some((path.clone(), format!("missing child '{}'", e.label())));
            }
            (None, Some(a)) => {
                return Some((path.clone(), format!("unexpected child '{}'", a.label())));
            }
            (None, None) => unreachable!(),
        }
    }
    None
}
