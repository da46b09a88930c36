//! Merging per-device trees into one filtered tree.
//!
//! Children are aligned by identity (category name plus attributes, with
//! repeated identical siblings told apart by occurrence). A child present
//! on every device that reaches its parent stays unfiltered; otherwise it
//! gets the smallest filter that selects exactly the devices having it,
//! measured against the devices that reach the parent. Differences further
//! down are handled the same way one level deeper.
//!
//! Repeated identical siblings align by position among their equals: the
//! n-th `pin` of one device pairs with the n-th `pin` of every other. When
//! devices carry different numbers of such a sibling, the extra copies are
//! the trailing ones. A device whose missing copy sits before a sibling the
//! others place after it (`[pin, x, pin]` against `[x, pin]`) therefore
//! contradicts their order and is reported as a structural mismatch naming
//! the repeated sibling. Tagging the copies with a distinguishing attribute
//! in the source trees resolves it.

use std::collections::HashMap;

use super::cluster::{Cluster, SourceDevice};
use super::minimizer::FilterMinimizer;
use super::ordering;
use crate::core::{DeviceFileError, MergeOptions};
use crate::identifier::TraitSet;
use crate::tree::{natural_cmp, MergedTree, Node, NodeIdentity, NodePath, SortKeys};

pub struct DeviceMerger {
    sort_keys: SortKeys,
    max_filter_traits: usize,
}

/// One aligned child position and the devices contributing to it.
struct ChildGroup<'n> {
    members: Vec<(usize, &'n Node)>,
}

impl DeviceMerger {
    pub fn new(options: &MergeOptions) -> Self {
        Self {
            sort_keys: options.sort_keys.clone(),
            max_filter_traits: options.max_filter_traits,
        }
    }

    pub fn with_sort_keys(mut self, sort_keys: SortKeys) -> Self {
        self.sort_keys = sort_keys;
        self
    }

    pub fn sort_keys(&self) -> &SortKeys {
        &self.sort_keys
    }

    /// Per-device tree as the merged tree is expected to reproduce it:
    /// siblings arranged by the registered sort keys.
    pub fn normalize(&self, tree: &Node) -> Node {
        let mut tree = tree.clone();
        self.sort_keys.arrange_recursive(&mut tree);
        tree
    }

    /// Merge every device of `cluster` into one tree.
    pub fn merge(&self, cluster: &Cluster) -> Result<MergedTree, DeviceFileError> {
        let devices: Vec<&SourceDevice> = cluster.sorted_devices();
        let Some(first) = devices.first() else {
            return Err(DeviceFileError::InvalidCluster {
                cluster: cluster.name().to_string(),
                detail: "cluster has no devices".to_string(),
            });
        };

        let normalized: Vec<Node> = devices.iter().map(|d| self.normalize(&d.tree)).collect();
        let root_path = NodePath::root(&normalized[0]);

        for (device, tree) in devices.iter().zip(&normalized) {
            if !tree.same_identity(&normalized[0]) {
                return Err(DeviceFileError::StructuralMismatch {
                    path: root_path.to_string(),
                    detail: format!(
                        "root of {} is '{}' but root of {} is '{}'",
                        device.identifier,
                        tree.label(),
                        first.identifier,
                        normalized[0].label()
                    ),
                });
            }
            if let Some(path) = first_filtered(tree, &NodePath::root(tree)) {
                return Err(DeviceFileError::StructuralMismatch {
                    path: path.to_string(),
                    detail: format!("source tree of {} already carries a filter", device.identifier),
                });
            }
        }

        let traits: Vec<&TraitSet> = devices.iter().map(|d| &d.traits).collect();
        let members: Vec<(usize, &Node)> = normalized.iter().enumerate().collect();
        let minimizer = FilterMinimizer::new(cluster.schema(), self.max_filter_traits);

        let root = self.merge_node(&minimizer, &traits, &members, &root_path)?;

        tracing::info!(
            "Merged cluster {}: {} devices, {} nodes, {} filtered",
            cluster.name(),
            devices.len(),
            root.count(),
            root.count_filtered()
        );

        Ok(MergedTree::new(
            cluster.name().to_string(),
            cluster.schema().clone(),
            devices.iter().map(|d| d.traits.clone()).collect(),
            root,
            self.sort_keys.clone(),
        ))
    }

    /// Merge the nodes in `members`, which share one identity. Each entry is
    /// (device index, that device's node).
    fn merge_node(
        &self,
        minimizer: &FilterMinimizer<'_>,
        traits: &[&TraitSet],
        members: &[(usize, &Node)],
        path: &NodePath,
    ) -> Result<Node, DeviceFileError> {
        let mut merged = members[0].1.identity().to_node();

        let mut groups: Vec<ChildGroup<'_>> = Vec::new();
        let mut index: HashMap<(NodeIdentity, usize), usize> = HashMap::new();
        let mut sequences: Vec<Vec<usize>> = Vec::with_capacity(members.len());
        let mut counts: Vec<HashMap<NodeIdentity, usize>> = Vec::with_capacity(members.len());

        for &(device, node) in members {
            let mut occurrences: HashMap<NodeIdentity, usize> = HashMap::new();
            let mut sequence = Vec::with_capacity(node.children().len());
            for child in node.children() {
                let identity = child.identity();
                let occurrence = occurrences.entry(identity.clone()).or_insert(0);
                let key = (identity, *occurrence);
                *occurrence += 1;

                let slot = *index.entry(key).or_insert_with(|| {
                    groups.push(ChildGroup { members: Vec::new() });
                    groups.len() - 1
                });
                groups[slot].members.push((device, child));
                sequence.push(slot);
            }
            sequences.push(sequence);
            counts.push(occurrences);
        }

        let chains = self.keyed_chains(&groups);
        let order = ordering::reconcile(groups.len(), &sequences, &chains).map_err(|conflict| {
            let labels: Vec<String> = conflict
                .stuck
                .iter()
                .map(|&g| groups[g].members[0].1.label())
                .collect();
            let mut detail = format!(
                "devices disagree on the order of children {}",
                labels.join(", ")
            );
            if let Some((label, fewest, most)) = uneven_repeat(&groups, &conflict.stuck, &counts) {
                detail.push_str(&format!(
                    "; '{}' repeats {} to {} times across devices and copies align by position",
                    label, fewest, most
                ));
            }
            DeviceFileError::StructuralMismatch {
                path: path.to_string(),
                detail,
            }
        })?;

        for slot in order {
            let group = &groups[slot];
            let child_path = path.join(group.members[0].1);
            let mut child = self.merge_node(minimizer, traits, &group.members, &child_path)?;

            if group.members.len() < members.len() {
                let inside: Vec<&TraitSet> = group.members.iter().map(|&(d, _)| traits[d]).collect();
                let outside: Vec<&TraitSet> = members
                    .iter()
                    .filter(|(d, _)| !group.members.iter().any(|(g, _)| g == d))
                    .map(|&(d, _)| traits[d])
                    .collect();
                let filter = minimizer
                    .minimize(&inside, &outside)
                    .map_err(|e| e.at_path(&child_path))?;
                if let Some(filter) = filter {
                    tracing::debug!("{} -> {}", child_path, filter);
                    child.set_filter(filter);
                }
            }
            merged.push_child(child);
        }

        Ok(merged)
    }

    /// For every sort-keyed category among `groups`, a chain of group
    /// indices in key order. Equal keys are left unconstrained.
    fn keyed_chains(&self, groups: &[ChildGroup<'_>]) -> Vec<Vec<usize>> {
        let mut by_category: HashMap<&str, Vec<(String, usize)>> = HashMap::new();
        for (slot, group) in groups.iter().enumerate() {
            let node = group.members[0].1;
            if let Some(key) = self.sort_keys.key(node) {
                by_category.entry(node.name()).or_default().push((key, slot));
            }
        }

        let mut categories: Vec<&str> = by_category.keys().copied().collect();
        categories.sort_unstable();

        let mut chains = Vec::new();
        for category in categories {
            let mut keyed = by_category.remove(category).unwrap_or_default();
            keyed.sort_by(|a, b| natural_cmp(&a.0, &b.0).then(a.1.cmp(&b.1)));
            for pair in keyed.windows(2) {
                if natural_cmp(&pair[0].0, &pair[1].0).is_lt() {
                    chains.push(vec![pair[0].1, pair[1].1]);
                }
            }
        }
        chains
    }
}

/// A repeated sibling among `stuck` whose count differs between devices.
fn uneven_repeat(
    groups: &[ChildGroup<'_>],
    stuck: &[usize],
    counts: &[HashMap<NodeIdentity, usize>],
) -> Option<(String, usize, usize)> {
    stuck.iter().find_map(|&g| {
        let node = groups[g].members[0].1;
        let identity = node.identity();
        let per_device = counts.iter().map(|c| c.get(&identity).copied().unwrap_or(0));
        let fewest = per_device.clone().min()?;
        let most = per_device.max()?;
        (most > 1 && fewest != most).then(|| (node.label(), fewest, most))
    })
}

fn first_filtered(node: &Node, path: &NodePath) -> Option<NodePath> {
    if node.filter().is_some() {
        return Some(path.clone());
    }
    node.children()
        .iter()
        .find_map(|child| first_filtered(child, &path.join(child)))
}
