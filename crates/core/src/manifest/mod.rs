//! Dependency manifests: version ordering, document access and the
//! semantic merge of two conflicting sides.

pub mod document;
pub mod merger;
pub mod version;

pub use document::{DependencyBlock, DependencyManifest, DependencyMap};
pub use merger::{merge, merge_sides, MergeOutcome, VersionDecision};
pub use version::{compare, select_latest, RangeOperator, VersionToken};
