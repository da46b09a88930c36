//! The trait-filtered node tree.
//!
//! Every device description, per-device or merged, is a strict tree of
//! [`Node`]s. A node has a category name (`driver`, `memory`, `vector`, ...),
//! plain string attributes, an optional [`FilterExpr`] and ordered children.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::filter::FilterExpr;
use crate::identifier::TraitSet;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    name: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    attributes: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    filter: Option<FilterExpr>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    children: Vec<Node>,
}

/// What makes two nodes "the same feature" across devices: the category
/// name and every attribute. Filters and children are not part of it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeIdentity {
    pub name: String,
    pub attributes: BTreeMap<String, String>,
}

impl Node {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn with_filter(mut self, filter: FilterExpr) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_child(mut self, child: Node) -> Self {
        self.children.push(child);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Replace all attributes.
    pub fn set_attributes(&mut self, attributes: BTreeMap<String, String>) -> &mut Self {
        self.attributes = attributes;
        self
    }

    pub fn filter(&self) -> Option<&FilterExpr> {
        self.filter.as_ref()
    }

    pub fn set_filter(&mut self, filter: FilterExpr) -> &mut Self {
        self.filter = Some(filter);
        self
    }

    pub fn clear_filter(&mut self) -> &mut Self {
        self.filter = None;
        self
    }

    pub fn children(&self) -> &[Node] {
        &self.children
    }

    pub fn children_mut(&mut self) -> &mut Vec<Node> {
        &mut self.children
    }

    /// Append a child and hand it back for further setup.
    pub fn add_child(&mut self, name: impl Into<String>) -> &mut Node {
        self.children.push(Node::new(name));
        let last = self.children.len() - 1;
        &mut self.children[last]
    }

    pub fn push_child(&mut self, child: Node) {
        self.children.push(child);
    }

    /// Does this node apply to a device with `traits`? Unfiltered nodes
    /// apply to every device.
    pub fn matches(&self, traits: &TraitSet) -> bool {
        self.filter.as_ref().map_or(true, |f| f.matches(traits))
    }

    pub fn identity(&self) -> NodeIdentity {
        NodeIdentity {
            name: self.name.clone(),
            attributes: self.attributes.clone(),
        }
    }

    pub fn same_identity(&self, other: &Node) -> bool {
        self.name == other.name && self.attributes == other.attributes
    }

    /// `name[key=value,...]`, the segment this node contributes to a path.
    pub fn label(&self) -> String {
        if self.attributes.is_empty() {
            return self.name.clone();
        }
        let attrs: Vec<String> = self
            .attributes
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        format!("{}[{}]", self.name, attrs.join(","))
    }

    /// Total number of nodes in this subtree, including itself.
    pub fn count(&self) -> usize {
        1 + self.children.iter().map(Node::count).sum::<usize>()
    }

    /// Number of filtered nodes in this subtree.
    pub fn count_filtered(&self) -> usize {
        usize::from(self.filter.is_some())
            + self.children.iter().map(Node::count_filtered).sum::<usize>()
    }

    /// Depth-first search for the first node named `name`.
    pub fn find(&self, name: &str) -> Option<&Node> {
        if self.name == name {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(name))
    }

    /// Every node named `name` in this subtree, depth first.
    pub fn find_all<'a>(&'a self, name: &str) -> Vec<&'a Node> {
        let mut found = Vec::new();
        self.collect_named(name, &mut found);
        found
    }

    fn collect_named<'a>(&'a self, name: &str, found: &mut Vec<&'a Node>) {
        if self.name == name {
            found.push(self);
        }
        for child in &self.children {
            child.collect_named(name, found);
        }
    }
}

impl NodeIdentity {
    pub fn to_node(&self) -> Node {
        Node {
            name: self.name.clone(),
            attributes: self.attributes.clone(),
            ..Default::default()
        }
    }
}

/// Slash-separated location of a node inside a tree, used in error reports.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodePath(Vec<String>);

impl NodePath {
    pub fn root(node: &Node) -> Self {
        Self(vec![node.label()])
    }

    pub fn join(&self, node: &Node) -> Self {
        let mut segments = self.0.clone();
        segments.push(node.label());
        Self(segments)
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("/"))
    }
}
