//! Deterministic sibling ordering.
//!
//! Vendor data arrives in whatever order the upstream tool emitted it. A
//! category with a registered sort key is re-ordered by that key wherever it
//! appears; categories without one keep their insertion order.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::node::Node;

type KeyFn = Arc<dyn Fn(&Node) -> String + Send + Sync>;

/// Registry of per-category sort keys.
#[derive(Clone, Default)]
pub struct SortKeys {
    keys: HashMap<String, KeyFn>,
}

impl SortKeys {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `key` for children named `category`. Replaces an earlier key.
    pub fn add_sort_key<F>(&mut self, category: impl Into<String>, key: F) -> &mut Self
    where
        F: Fn(&Node) -> String + Send + Sync + 'static,
    {
        self.keys.insert(category.into(), Arc::new(key));
        self
    }

    /// Sort `category` by one attribute.
    pub fn by_attribute(mut self, category: &str, attribute: &str) -> Self {
        let attribute = attribute.to_string();
        self.add_sort_key(category, move |node| {
            node.attribute(&attribute).unwrap_or_default().to_string()
        });
        self
    }

    /// Sort `category` by several attributes, most significant first.
    pub fn by_attributes(mut self, category: &str, attributes: &[&str]) -> Self {
        let attributes: Vec<String> = attributes.iter().map(|a| a.to_string()).collect();
        self.add_sort_key(category, move |node| {
            attributes
                .iter()
                .map(|a| node.attribute(a).unwrap_or_default())
                .collect::<Vec<_>>()
                .join("\u{1f}")
        });
        self
    }

    pub fn has_key(&self, category: &str) -> bool {
        self.keys.contains_key(category)
    }

    pub fn key(&self, node: &Node) -> Option<String> {
        self.keys.get(node.name()).map(|f| f(node))
    }

    /// Reorder `children` in place: for every keyed category, the slots that
    /// category occupies are refilled with its members sorted by key. The
    /// sort is stable, so equal keys keep insertion order.
    pub fn arrange(&self, children: &mut [Node]) {
        if self.keys.is_empty() {
            return;
        }
        let mut categories: Vec<&str> = Vec::new();
        for child in children.iter() {
            if self.has_key(child.name()) && !categories.contains(&child.name()) {
                categories.push(child.name());
            }
        }
        let categories: Vec<String> = categories.into_iter().map(str::to_string).collect();

        for category in categories {
            let slots: Vec<usize> = children
                .iter()
                .enumerate()
                .filter(|(_, c)| c.name() == category)
                .map(|(i, _)| i)
                .collect();
            let mut members: Vec<(String, Node)> = slots
                .iter()
                .map(|&i| {
                    let node = std::mem::take(&mut children[i]);
                    (self.key(&node).unwrap_or_default(), node)
                })
                .collect();
            members.sort_by(|a, b| natural_cmp(&a.0, &b.0));
            for (slot, (_, node)) in slots.into_iter().zip(members) {
                children[slot] = node;
            }
        }
    }

    /// [`arrange`](Self::arrange) applied to every level below `node`.
    pub fn arrange_recursive(&self, node: &mut Node) {
        for child in node.children_mut().iter_mut() {
            self.arrange_recursive(child);
        }
        self.arrange(node.children_mut());
    }
}

impl fmt::Debug for SortKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut categories: Vec<&String> = self.keys.keys().collect();
        categories.sort();
        f.debug_struct("SortKeys")
            .field("categories", &categories)
            .finish()
    }
}

/// Compare strings with digit runs compared by numeric value, so that
/// `"2" < "10"` and `"adc2" < "adc10"`.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut a = a.chars().peekable();
    let mut b = b.chars().peekable();
    loop {
        match (a.peek().copied(), b.peek().copied()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) if x.is_ascii_digit() && y.is_ascii_digit() => {
                let mut da = String::new();
                while let Some(c) = a.peek().copied().filter(char::is_ascii_digit) {
                    da.push(c);
                    a.next();
                }
                let mut db = String::new();
                while let Some(c) = b.peek().copied().filter(char::is_ascii_digit) {
                    db.push(c);
                    b.next();
                }
                let ta = da.trim_start_matches('0');
                let tb = db.trim_start_matches('0');
                let ord = ta
                    .len()
                    .cmp(&tb.len())
                    .then_with(|| ta.cmp(tb))
                    .then_with(|| da.len().cmp(&db.len()));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            (Some(x), Some(y)) => {
                if x != y {
                    return x.cmp(&y);
                }
                a.next();
                b.next();
            }
        }
    }
}
