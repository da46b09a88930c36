//! Persisted merged trees.
//!
//! An artifact is a JSON document `{ "format": 1, "tree": ... }`. Only
//! verified trees are written; loading trusts that and hands back a
//! [`VerifiedTree`] again. Sort keys are not stored and have to be
//! registered again with [`VerifiedTree::with_sort_keys`].

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::DeviceFileError;
use crate::tree::MergedTree;
use crate::verify::VerifiedTree;

pub const FORMAT_VERSION: u32 = 1;

#[derive(Serialize)]
struct ArtifactRef<'a> {
    format: u32,
    tree: &'a VerifiedTree,
}

#[derive(Deserialize)]
struct Artifact {
    format: u32,
    tree: MergedTree,
}

pub fn to_json(tree: &VerifiedTree, pretty: bool) -> Result<String, DeviceFileError> {
    let artifact = ArtifactRef {
        format: FORMAT_VERSION,
        tree,
    };
    let json = if pretty {
        serde_json::to_string_pretty(&artifact)?
    } else {
        serde_json::to_string(&artifact)?
    };
    Ok(json)
}

pub fn from_json(json: &str) -> Result<VerifiedTree, DeviceFileError> {
    let artifact: Artifact = serde_json::from_str(json)?;
    if artifact.format != FORMAT_VERSION {
        return Err(DeviceFileError::UnsupportedFormat(artifact.format));
    }
    // member trait sets must still spell identifiers under the stored schema
    artifact.tree.identifiers()?;
    Ok(VerifiedTree::from_persisted(artifact.tree))
}

pub fn save(tree: &VerifiedTree, path: &Path, pretty: bool) -> Result<(), DeviceFileError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, to_json(tree, pretty)?)?;
    tracing::info!("Wrote {} to {:?}", tree.cluster(), path);
    Ok(())
}

/// Save as `<dir>/<cluster>.json` and return the path written.
pub fn save_to_dir(tree: &VerifiedTree, dir: &Path, pretty: bool) -> Result<PathBuf, DeviceFileError> {
    let path = dir.join(format!("{}.json", tree.cluster()));
    save(tree, &path, pretty)?;
    Ok(path)
}

pub fn load(path: &Path) -> Result<VerifiedTree, DeviceFileError> {
    let content = std::fs::read_to_string(path)?;
    let tree = from_json(&content)?;
    tracing::debug!("Loaded {} from {:?}", tree.cluster(), path);
    Ok(tree)
}
