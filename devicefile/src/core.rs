//! Core API: errors, options and the batch driver shared by every caller.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::assertion::{Assertion, AssertionHandlers, Outcome};
use crate::extract::extract_identifier;
use crate::identifier::{DecompositionCache, ValidDeviceList};
use crate::merge::{Cluster, ClusterDefinition, DeviceMerger, DeviceSource};
use crate::store;
use crate::tree::{Node, SortKeys};
use crate::verify::{ConsistencyVerifier, VerifiedTree};

#[derive(Error, Debug)]
pub enum DeviceFileError {
    #[error("Schema error: {0}")]
    Schema(String),
    #[error("Ambiguous identifier {identifier}: could be {}", .candidates.join(" | "))]
    AmbiguousIdentifier {
        identifier: String,
        candidates: Vec<String>,
    },
    #[error("Unknown device {identifier}")]
    UnknownDevice { identifier: String },
    #[error("Structural mismatch at {path}: {detail}")]
    StructuralMismatch { path: String, detail: String },
    #[error(
        "No filter separates [{}] from [{}] at {}",
        .group.join(", "),
        .complement.join(", "),
        .path
    )]
    UnfilterableGroup {
        path: String,
        group: Vec<String>,
        complement: Vec<String>,
    },
    #[error("Round trip failed for {device} at {path}: {detail}")]
    MergeRoundTrip {
        device: String,
        path: String,
        detail: String,
    },
    #[error("Nothing in the merged tree applies to {device}")]
    EmptyDevice { device: String },
    #[error("Invalid cluster {cluster}: {detail}")]
    InvalidCluster { cluster: String, detail: String },
    #[error("Invalid filter '{0}': {1}")]
    InvalidFilter(String, String),
    #[error("Unsupported artifact format {0}")]
    UnsupportedFormat(u32),
    #[error("Batch abandoned at cluster {cluster}: {reason}")]
    Abandoned { cluster: String, reason: String },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Structured failure kind, for branching without looking at messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    Schema,
    AmbiguousIdentifier,
    UnknownDevice,
    StructuralMismatch,
    UnfilterableGroup,
    MergeRoundTrip,
    EmptyDevice,
    InvalidCluster,
    InvalidFilter,
    UnsupportedFormat,
    Abandoned,
    Io,
    Json,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl DeviceFileError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DeviceFileError::Schema(_) => ErrorKind::Schema,
            DeviceFileError::AmbiguousIdentifier { .. } => ErrorKind::AmbiguousIdentifier,
            DeviceFileError::UnknownDevice { .. } => ErrorKind::UnknownDevice,
            DeviceFileError::StructuralMismatch { .. } => ErrorKind::StructuralMismatch,
            DeviceFileError::UnfilterableGroup { .. } => ErrorKind::UnfilterableGroup,
            DeviceFileError::MergeRoundTrip { .. } => ErrorKind::MergeRoundTrip,
            DeviceFileError::EmptyDevice { .. } => ErrorKind::EmptyDevice,
            DeviceFileError::InvalidCluster { .. } => ErrorKind::InvalidCluster,
            DeviceFileError::InvalidFilter(..) => ErrorKind::InvalidFilter,
            DeviceFileError::UnsupportedFormat(_) => ErrorKind::UnsupportedFormat,
            DeviceFileError::Abandoned { .. } => ErrorKind::Abandoned,
            DeviceFileError::Io(_) => ErrorKind::Io,
            DeviceFileError::Json(_) => ErrorKind::Json,
        }
    }

    /// Node path the error points at, if it points into a tree.
    pub fn path(&self) -> Option<&str> {
        match self {
            DeviceFileError::StructuralMismatch { path, .. }
            | DeviceFileError::UnfilterableGroup { path, .. }
            | DeviceFileError::MergeRoundTrip { path, .. } => Some(path),
            _ => None,
        }
    }

    /// Fill in the node path of a tree error raised without one.
    pub fn at_path(mut self, at: impl fmt::Display) -> Self {
        match &mut self {
            DeviceFileError::StructuralMismatch { path, .. }
            | DeviceFileError::UnfilterableGroup { path, .. }
                if path.is_empty() =>
            {
                *path = at.to_string();
            }
            _ => {}
        }
        self
    }
}

/// Options for merge runs.
#[derive(Clone, Debug)]
pub struct MergeOptions {
    /// Most distinct traits a single filter may reference.
    pub max_filter_traits: usize,
    pub sort_keys: SortKeys,
    /// Where [`DeviceFileCore::process_batch`] writes verified trees.
    pub output_dir: Option<PathBuf>,
    pub pretty: bool,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            max_filter_traits: 2,
            sort_keys: SortKeys::new(),
            output_dir: None,
            pretty: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterStatus {
    Verified,
    Ignored,
}

/// What happened to one cluster of a batch.
#[derive(Debug, Clone, Serialize)]
pub struct ClusterOutcome {
    pub cluster: String,
    pub status: ClusterStatus,
    pub devices: usize,
    pub artifact: Option<PathBuf>,
    pub failure: Option<Assertion>,
    #[serde(skip)]
    pub tree: Option<VerifiedTree>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcomes: Vec<ClusterOutcome>,
}

impl BatchReport {
    pub fn verified(&self) -> usize {
        self.count(ClusterStatus::Verified)
    }

    pub fn ignored(&self) -> usize {
        self.count(ClusterStatus::Ignored)
    }

    pub fn is_clean(&self) -> bool {
        self.ignored() == 0
    }

    pub fn outcome(&self, cluster: &str) -> Option<&ClusterOutcome> {
        self.outcomes.iter().find(|o| o.cluster == cluster)
    }

    pub fn tree(&self, cluster: &str) -> Option<&VerifiedTree> {
        self.outcome(cluster).and_then(|o| o.tree.as_ref())
    }

    fn count(&self, status: ClusterStatus) -> usize {
        self.outcomes.iter().filter(|o| o.status == status).count()
    }
}

/// Stage of the per-cluster pipeline a failure came from, named after the
/// module that raised it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Cluster,
    Merge,
    Verify,
    Store,
}

impl Stage {
    fn module(self) -> &'static str {
        match self {
            Stage::Cluster => "cluster",
            Stage::Merge => "merge",
            Stage::Verify => "verify",
            Stage::Store => "store",
        }
    }
}

/// Core merge API used by every caller.
pub struct DeviceFileCore;

impl DeviceFileCore {
    /// Merge one cluster and verify the result.
    pub fn merge_cluster(
        cluster: &Cluster,
        options: &MergeOptions,
    ) -> Result<VerifiedTree, DeviceFileError> {
        Self::merge_staged(cluster, options).map_err(|(_, e)| e)
    }

    /// Load a cluster definition's devices from `source`, merge and verify.
    pub fn merge_definition<S>(
        definition: &ClusterDefinition,
        valid: &ValidDeviceList,
        source: &S,
        options: &MergeOptions,
    ) -> Result<VerifiedTree, DeviceFileError>
    where
        S: DeviceSource + ?Sized,
    {
        let cluster = definition.load(valid, source)?;
        Self::merge_cluster(&cluster, options)
    }

    /// Merge every definition independently, in parallel.
    ///
    /// Each failing cluster becomes an [`Assertion`] judged by `handlers`.
    /// Ignored failures are recorded in the report; anything else abandons
    /// the whole run. Verified trees are written to `options.output_dir`
    /// when it is set.
    pub fn process_batch<S>(
        definitions: &[ClusterDefinition],
        valid: &ValidDeviceList,
        source: &S,
        options: &MergeOptions,
        handlers: &AssertionHandlers,
    ) -> Result<BatchReport, DeviceFileError>
    where
        S: DeviceSource + Sync + ?Sized,
    {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        tracing::info!("Batch {} started: {} clusters", run_id, definitions.len());

        let results: Vec<Result<VerifiedTree, (Stage, DeviceFileError)>> = definitions
            .par_iter()
            .map(|definition| {
                let cluster = definition
                    .load(valid, source)
                    .map_err(|e| (Stage::Cluster, e))?;
                Self::merge_staged(&cluster, options)
            })
            .collect();

        let mut outcomes = Vec::with_capacity(definitions.len());
        for (definition, result) in definitions.iter().zip(results) {
            let persisted = result.and_then(|tree| match &options.output_dir {
                Some(dir) => store::save_to_dir(&tree, dir, options.pretty)
                    .map(|path| (tree, Some(path)))
                    .map_err(|e| (Stage::Store, e)),
                None => Ok((tree, None)),
            });

            match persisted {
                Ok((tree, artifact)) => {
                    outcomes.push(ClusterOutcome {
                        cluster: definition.name.clone(),
                        status: ClusterStatus::Verified,
                        devices: tree.devices().len(),
                        artifact,
                        failure: None,
                        tree: Some(tree),
                    });
                }
                Err((stage, error)) => {
                    let assertion = Assertion::from_error(stage.module(), &definition.name, &error);
                    let verdict = handlers.evaluate(&assertion);
                    if verdict.outcome == Outcome::Abandon {
                        tracing::warn!("Abandoning batch {}: {}", run_id, assertion);
                        return Err(DeviceFileError::Abandoned {
                            cluster: definition.name.clone(),
                            reason: error.to_string(),
                        });
                    }
                    tracing::warn!(
                        "Cluster {} failed, continuing ({}): {}",
                        definition.name,
                        verdict.decided_by.as_deref().unwrap_or("unnamed handler"),
                        error
                    );
                    outcomes.push(ClusterOutcome {
                        cluster: definition.name.clone(),
                        status: ClusterStatus::Ignored,
                        devices: 0,
                        artifact: None,
                        failure: Some(assertion),
                        tree: None,
                    });
                }
            }
        }

        let report = BatchReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            outcomes,
        };
        tracing::info!(
            "Batch {} finished: {} verified, {} ignored",
            run_id,
            report.verified(),
            report.ignored()
        );
        Ok(report)
    }

    /// Read a persisted tree and extract one device from it.
    pub fn extract_from_file(
        path: &Path,
        identifier: &str,
        options: &MergeOptions,
    ) -> Result<Node, DeviceFileError> {
        let tree = store::load(path)?.with_sort_keys(options.sort_keys.clone());
        let mut cache = DecompositionCache::new();
        extract_identifier(&tree, identifier, &mut cache)
    }

    fn merge_staged(
        cluster: &Cluster,
        options: &MergeOptions,
    ) -> Result<VerifiedTree, (Stage, DeviceFileError)> {
        let merger = DeviceMerger::new(options);
        let tree = merger.merge(cluster).map_err(|e| (Stage::Merge, e))?;
        ConsistencyVerifier::verify(tree, cluster, &merger).map_err(|e| (Stage::Verify, e))
    }
}
