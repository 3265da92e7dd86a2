//! Semantic merge of two conflicting manifests.
//!
//! The change-branch side ("ours") is the starting point. The `version`
//! field and each dependency block are reconciled with
//! [`select_latest`](super::version::select_latest); every other field is
//! kept from ours.

use tracing::{debug, info, instrument};

use crate::errors::ManifestError;
use crate::manifest::document::{DependencyBlock, DependencyManifest, DependencyMap};
use crate::manifest::version::select_latest;

/// A decision taken while merging one versioned field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionDecision {
    /// `version`, or `<block>.<package>`.
    pub field: String,
    pub ours: String,
    pub theirs: String,
    pub chosen: String,
}

/// The merged manifest plus the decisions that differed between sides.
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub manifest: DependencyManifest,
    pub decisions: Vec<VersionDecision>,
}

/// Merge both sides of a conflicted manifest read from the index.
///
/// Either side being absent means its merge stage could not be read.
pub fn merge_sides(
    path: &str,
    ours: Option<DependencyManifest>,
    theirs: Option<DependencyManifest>,
) -> Result<MergeOutcome, ManifestError> {
    let ours = ours.ok_or_else(|| missing(path, crate::git::OURS_STAGE))?;
    let theirs = theirs.ok_or_else(|| missing(path, crate::git::THEIRS_STAGE))?;
    merge(&ours, &theirs)
}

fn missing(path: &str, stage: u8) -> ManifestError {
    ManifestError::MissingMergeSide {
        path: path.to_string(),
        stage,
    }
}

/// Merge `theirs` into a copy of `ours`.
#[instrument(skip_all)]
pub fn merge(
    ours: &DependencyManifest,
    theirs: &DependencyManifest,
) -> Result<MergeOutcome, ManifestError> {
    let mut merged = ours.clone();
    let mut decisions = Vec::new();

    // A non-string version on either side leaves ours untouched.
    match (ours.version(), theirs.version()) {
        (Some(o), Some(t)) => {
            let chosen = select_latest(o, t);
            if o != t {
                info!("package version: PR=\"{o}\" vs Base=\"{t}\" -> \"{chosen}\"");
                decisions.push(VersionDecision {
                    field: "version".into(),
                    ours: o.into(),
                    theirs: t.into(),
                    chosen: chosen.into(),
                });
            }
            merged.set_version(chosen);
        }
        (None, Some(t)) if ours.version_value().is_none() => {
            debug!(version = t, "version only present on base side");
            merged.set_version(t);
        }
        _ => {}
    }

    for block in DependencyBlock::ALL {
        let ours_block = ours.block(block)?;
        let theirs_block = theirs.block(block)?;
        if ours_block.is_none() && theirs_block.is_none() {
            continue;
        }
        let entries = merge_block(block, ours_block, theirs_block, &mut decisions);
        merged.set_block(block, entries);
    }

    debug!(decisions = decisions.len(), "manifest merge complete");
    Ok(MergeOutcome {
        manifest: merged,
        decisions,
    })
}

/// Union of both blocks; shared keys with differing ranges keep the newer.
fn merge_block(
    block: DependencyBlock,
    ours: Option<DependencyMap>,
    theirs: Option<DependencyMap>,
    decisions: &mut Vec<VersionDecision>,
) -> DependencyMap {
    let mut merged = ours.unwrap_or_default();

    for (name, theirs_range) in theirs.unwrap_or_default() {
        match merged.get_mut(&name) {
            None => {
                merged.insert(name, theirs_range);
            }
            Some(ours_range) if *ours_range == theirs_range => {}
            Some(ours_range) => {
                let chosen = select_latest(ours_range, &theirs_range).to_string();
                info!("  {name}: PR=\"{ours_range}\" vs Base=\"{theirs_range}\" -> \"{chosen}\"");
                decisions.push(VersionDecision {
                    field: format!("{block}.{name}"),
                    ours: ours_range.clone(),
                    theirs: theirs_range,
                    chosen: chosen.clone(),
                });
                *ours_range = chosen;
            }
        }
    }

    merged
}
