//! Trait-filtered tree model shared by per-device and merged descriptions.

pub mod filter;
pub mod merged;
pub mod node;
pub mod sort;

pub use filter::{Conjunction, FilterExpr};
pub use merged::MergedTree;
pub use node::{Node, NodeIdentity, NodePath};
pub use sort::{natural_cmp, SortKeys};
