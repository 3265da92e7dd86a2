//! Conflict classification.
//!
//! Given the paths git reports as unmerged, the classifier decides which
//! kind of supported file each one is, and the fixed policy used to resolve
//! it.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::FilesConfig;
use crate::errors::ClassifyError;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Categorisation of a conflicted path.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    /// Companion lockfile; regenerated, never merged by content.
    Lockfile,
    /// Changelog; the base-branch side is taken verbatim.
    Changelog,
    /// Package manifest; merged semantically.
    Manifest,
    /// Anything else; aborts the resolution.
    Unsupported,
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lockfile => write!(f, "lockfile"),
            Self::Changelog => write!(f, "changelog"),
            Self::Manifest => write!(f, "manifest"),
            Self::Unsupported => write!(f, "unsupported"),
        }
    }
}

/// How a conflicted path of a given kind is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionPolicy {
    /// Left to lockfile regeneration after all other files are resolved.
    Regenerate,
    /// Check out the base-branch ("theirs") side.
    TakeTheirs,
    /// Merge both index stages with the manifest merger.
    SemanticMerge,
    /// Not resolvable; abort.
    Abort,
}

impl ConflictKind {
    pub fn policy(&self) -> ResolutionPolicy {
        match self {
            Self::Lockfile => ResolutionPolicy::Regenerate,
            Self::Changelog => ResolutionPolicy::TakeTheirs,
            Self::Manifest => ResolutionPolicy::SemanticMerge,
            Self::Unsupported => ResolutionPolicy::Abort,
        }
    }
}

/// One classified conflicted path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConflictEntry {
    pub path: String,
    pub kind: ConflictKind,
}

/// Deduplicated conflicted paths in git's reporting order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConflictSet {
    entries: Vec<ConflictEntry>,
    has_manifest_conflict: bool,
    has_lockfile_conflict: bool,
}

impl ConflictSet {
    pub fn entries(&self) -> &[ConflictEntry] {
        &self.entries
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.path.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn has_manifest_conflict(&self) -> bool {
        self.has_manifest_conflict
    }

    pub fn has_lockfile_conflict(&self) -> bool {
        self.has_lockfile_conflict
    }

    /// Paths of the given kind, in order.
    pub fn of_kind(&self, kind: ConflictKind) -> impl Iterator<Item = &str> {
        self.entries
            .iter()
            .filter(move |e| e.kind == kind)
            .map(|e| e.path.as_str())
    }

    /// Whether the conflict touches dependency state at all.
    pub fn needs_regeneration(&self) -> bool {
        self.has_manifest_conflict || self.has_lockfile_conflict
    }
}

// ---------------------------------------------------------------------------
// Classifier
// ---------------------------------------------------------------------------

/// Maps conflicted paths to [`ConflictKind`]s by well-known file name.
#[derive(Debug, Clone)]
pub struct ConflictClassifier {
    manifest: String,
    lockfile: String,
    changelog: String,
}

impl ConflictClassifier {
    pub fn new(files: &FilesConfig) -> Self {
        Self {
            manifest: files.manifest.clone(),
            lockfile: files.lockfile.clone(),
            changelog: files.changelog.clone(),
        }
    }

    /// Kind of a single path. Lockfile matching is by substring; changelog
    /// and manifest matching is by final path component.
    pub fn kind_of(&self, path: &str) -> ConflictKind {
        if path.contains(&self.lockfile) {
            ConflictKind::Lockfile
        } else if is_named(path, &self.changelog) {
            ConflictKind::Changelog
        } else if is_named(path, &self.manifest) {
            ConflictKind::Manifest
        } else {
            ConflictKind::Unsupported
        }
    }

    /// Whether `path` is the repository-root manifest.
    pub fn is_root_manifest(&self, path: &str) -> bool {
        path == self.manifest
    }

    /// Classify the unmerged paths reported by git.
    pub fn classify<I, S>(&self, paths: I) -> Result<ConflictSet, ClassifyError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen = HashSet::new();
        let mut entries = Vec::new();

        for path in paths {
            let path = path.as_ref().trim();
            if path.is_empty() || !seen.insert(path.to_string()) {
                continue;
            }
            let kind = self.kind_of(path);
            debug!(path, %kind, "classified conflicted file");
            entries.push(ConflictEntry {
                path: path.to_string(),
                kind,
            });
        }

        if entries.is_empty() {
            return Err(ClassifyError::Empty);
        }

        let has_manifest_conflict = entries.iter().any(|e| e.kind == ConflictKind::Manifest);
        let has_lockfile_conflict = entries.iter().any(|e| e.kind == ConflictKind::Lockfile);

        info!(
            count = entries.len(),
            has_manifest_conflict,
            has_lockfile_conflict,
            "classified conflicts"
        );

        Ok(ConflictSet {
            entries,
            has_manifest_conflict,
            has_lockfile_conflict,
        })
    }
}

/// `path` is `name` or ends with `/name`.
fn is_named(path: &str, name: &str) -> bool {
    path == name
        || path
            .strip_suffix(name)
            .is_some_and(|prefix| prefix.ends_with('/'))
}
