//! Building merged trees from clusters of per-device trees.

pub mod cluster;
pub mod merger;
pub mod minimizer;
pub mod ordering;
pub mod source;

pub use cluster::{load_definitions_from_directory, Cluster, ClusterDefinition, OneOrMany, SourceDevice};
pub use merger::DeviceMerger;
pub use minimizer::FilterMinimizer;
pub use source::{DeviceSource, JsonDeviceSource};
