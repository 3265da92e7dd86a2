//! pkgmend core library.
//!
//! Resolves the merge conflicts that publishing leaves behind when a base
//! branch is merged into a change branch: dependency manifests are merged
//! semantically, lockfiles are regenerated, changelogs take the base side.
//! Everything else aborts the resolution.

pub mod command;
pub mod config;
pub mod conflict;
pub mod discovery;
pub mod errors;
pub mod git;
pub mod lockfile;
pub mod manifest;
pub mod models;
pub mod orchestrator;
pub mod report;

// Re-exports for convenience.
pub use command::{CommandRunner, CommandSpec, ProcessRunner};
pub use config::AppConfig;
pub use conflict::ConflictClassifier;
pub use git::{GitHubClient, WorkingTreeContext};
pub use lockfile::LockfileRegenerator;
pub use models::{ChangeRef, ResolutionOutcome};
pub use orchestrator::{MergeOrchestrator, MergeState};
