//! devicefile - merged device descriptions for microcontroller families
//!
//! Vendors describe every device variant separately although variants of
//! one family differ in only a few places. This library merges the
//! per-device trees of a cluster into one tree where each divergent node
//! carries a filter over device traits (pin count, memory size, package,
//! ...), verifies that every device can be extracted again unchanged, and
//! persists the result.
//!
//! # Quick Start
//!
//! ```no_run
//! use devicefile::{ClusterDefinition, DeviceFileCore, JsonDeviceSource, MergeOptions, ValidDeviceList};
//! use std::path::Path;
//!
//! let definition = ClusterDefinition::from_file(Path::new("clusters/stm32f1-03.json")).unwrap();
//! let valid = ValidDeviceList::new(["stm32f103c8", "stm32f103rb"]);
//! let source = JsonDeviceSource::new("devices");
//!
//! let tree = DeviceFileCore::merge_definition(&definition, &valid, &source, &MergeOptions::default())
//!     .unwrap();
//! let device = tree.extract(&tree.devices()[0]).unwrap();
//! println!("{} nodes", device.count());
//! ```
//!
//! # Features
//!
//! - **Identifier schemas**: compose and decompose identifiers from trait domains
//! - **Merging**: minimal trait filters for every divergent node
//! - **Verification**: round-trip check before anything is persisted
//! - **Batches**: independent clusters in parallel with a configurable failure policy

pub mod assertion;
pub mod core;
pub mod extract;
pub mod identifier;
pub mod merge;
pub mod store;
pub mod tree;
pub mod verify;

// Re-export main types
pub use assertion::{Assertion, AssertionHandlers, Behavior, Matcher, Outcome, Verdict};
pub use crate::core::{
    BatchReport, ClusterOutcome, ClusterStatus, DeviceFileCore, DeviceFileError, ErrorKind,
    MergeOptions,
};
pub use extract::{extract, extract_identifier};
pub use identifier::{DecompositionCache, IdentifierSchema, TraitSet, ValidDeviceList};
pub use merge::{
    load_definitions_from_directory, Cluster, ClusterDefinition, DeviceMerger, DeviceSource,
    JsonDeviceSource,
};
pub use tree::{FilterExpr, MergedTree, Node, NodePath, SortKeys};
pub use verify::{ConsistencyVerifier, VerifiedTree};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::{
        Cluster, ClusterDefinition, DecompositionCache, DeviceFileCore, DeviceFileError,
        IdentifierSchema, MergeOptions, Node, SortKeys, TraitSet, ValidDeviceList, VerifiedTree,
    };
}
