//! Merge orchestrator: the per-branch resolution state machine.
//!
//! ```text
//! CheckedOut -> UserConfigured -> RemotesConfigured -> MergeAttempted
//!   -> NoConflict                                   (terminal, not resolved)
//!   -> Conflicted -> Classified -> PerFileResolved -> Staged -> Verified
//!        -> EmptyDiff    -> Committed               (terminal, resolved)
//!        -> ChangesStaged -> Committed              (terminal, resolved)
//! any step -> Aborted                               (terminal, error)
//! ```
//!
//! Every error path runs a best-effort `git merge --abort` before returning,
//! and the local hooks override is always restored.

use std::fmt;

use tracing::{debug, error, info, instrument, warn};

use crate::command::CommandRunner;
use crate::config::AppConfig;
use crate::conflict::{ConflictClassifier, ConflictSet, ResolutionPolicy};
use crate::errors::ResolveError;
use crate::git::{HooksState, WorkingTreeContext, OURS_STAGE, THEIRS_STAGE};
use crate::lockfile::LockfileRegenerator;
use crate::manifest::{merge_sides, DependencyManifest};
use crate::models::{ChangeRef, ResolutionOutcome, ResolutionSummary};

// ---------------------------------------------------------------------------
// States
// ---------------------------------------------------------------------------

/// Position of the orchestrator in the resolution state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeState {
    Idle,
    CheckedOut,
    UserConfigured,
    RemotesConfigured,
    MergeAttempted,
    NoConflict,
    Conflicted,
    Classified,
    PerFileResolved,
    Staged,
    Verified,
    EmptyDiff,
    ChangesStaged,
    Committed,
    Aborted,
}

impl MergeState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::NoConflict | Self::Committed | Self::Aborted)
    }
}

impl fmt::Display for MergeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::CheckedOut => "checked_out",
            Self::UserConfigured => "user_configured",
            Self::RemotesConfigured => "remotes_configured",
            Self::MergeAttempted => "merge_attempted",
            Self::NoConflict => "no_conflict",
            Self::Conflicted => "conflicted",
            Self::Classified => "classified",
            Self::PerFileResolved => "per_file_resolved",
            Self::Staged => "staged",
            Self::Verified => "verified",
            Self::EmptyDiff => "empty_diff",
            Self::ChangesStaged => "changes_staged",
            Self::Committed => "committed",
            Self::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Resolves publishing conflicts for one change branch.
///
/// Owns the [`WorkingTreeContext`] for the unit of work; build a new
/// orchestrator per branch.
pub struct MergeOrchestrator<'a, R> {
    ctx: WorkingTreeContext<R>,
    config: &'a AppConfig,
    classifier: ConflictClassifier,
    state: MergeState,
    history: Vec<MergeState>,
    hooks: Option<HooksState>,
}

impl<'a, R: CommandRunner> MergeOrchestrator<'a, R> {
    pub fn new(ctx: WorkingTreeContext<R>, config: &'a AppConfig) -> Self {
        Self {
            ctx,
            config,
            classifier: ConflictClassifier::new(&config.files),
            state: MergeState::Idle,
            history: Vec::new(),
            hooks: None,
        }
    }

    pub fn state(&self) -> MergeState {
        self.state
    }

    /// States visited during the last [`resolve`](Self::resolve), in order.
    pub fn history(&self) -> &[MergeState] {
        &self.history
    }

    pub fn context(&self) -> &WorkingTreeContext<R> {
        &self.ctx
    }

    /// Merge the target branch into `change` and resolve the publishing
    /// conflicts, committing and pushing the result.
    #[instrument(skip(self, change), fields(pr = ?change.number, branch = %change.branch))]
    pub fn resolve(&mut self, change: &ChangeRef) -> Result<ResolutionOutcome, ResolveError> {
        self.state = MergeState::Idle;
        self.history.clear();
        info!(
            "merging {} into {} from {}",
            change.target_branch,
            change.label(),
            change.source_repo
        );

        let result = self.run(change);

        if let Err(e) = &result {
            if e.is_invariant_violation() {
                error!(error = %e, "unexpected merge state; aborting");
            } else {
                warn!(error = %e, "resolution failed; aborting merge");
            }
            self.ctx.abort_merge();
            self.enter(MergeState::Aborted);
        }

        if let Some(hooks) = self.hooks.take() {
            self.ctx.restore_hooks(hooks);
        }
        result
    }

    fn run(&mut self, change: &ChangeRef) -> Result<ResolutionOutcome, ResolveError> {
        self.checkout(change)?;
        self.enter(MergeState::CheckedOut);

        self.ctx.configure_identity().map_err(ResolveError::UserConfig)?;
        self.enter(MergeState::UserConfigured);

        self.configure_remotes(change)?;
        self.enter(MergeState::RemotesConfigured);

        self.hooks = self.ctx.disable_hooks();
        let pre_merge = self.ctx.rev_parse("HEAD")?;

        let merge_ref = format!("{}/{}", self.ctx.settings().base_remote, change.target_branch);
        let merged_cleanly = self.ctx.try_merge(&merge_ref).map_err(ResolveError::Merge)?;
        self.enter(MergeState::MergeAttempted);

        if merged_cleanly {
            info!("{merge_ref} merged without conflicts; nothing to resolve");
            self.ctx.abort_merge();
            self.enter(MergeState::NoConflict);
            return Ok(ResolutionOutcome::NoConflict);
        }
        self.enter(MergeState::Conflicted);

        let unmerged = self.ctx.unmerged_paths()?;
        let conflicts = self.classifier.classify(&unmerged)?;
        info!("conflicted files: {}", conflicts.paths().collect::<Vec<_>>().join(", "));
        self.enter(MergeState::Classified);

        self.resolve_files(&conflicts)?;
        self.enter(MergeState::PerFileResolved);

        self.stage(&conflicts)?;
        self.enter(MergeState::Staged);

        let remaining = self.ctx.unmerged_paths()?;
        if !remaining.is_empty() {
            return Err(ResolveError::ConflictsRemain(remaining));
        }
        self.enter(MergeState::Verified);

        self.commit_and_push(change, &pre_merge)
    }

    fn enter(&mut self, state: MergeState) {
        if state.is_terminal() {
            info!(from = %self.state, to = %state, "orchestrator finished");
        } else {
            debug!(from = %self.state, to = %state, "orchestrator state");
        }
        self.state = state;
        self.history.push(state);
    }

    // -----------------------------------------------------------------------
    // Steps
    // -----------------------------------------------------------------------

    fn checkout(&self, change: &ChangeRef) -> Result<(), ResolveError> {
        let remote = &self.ctx.settings().push_remote;
        self.ctx
            .fetch(remote, &change.branch)
            .and_then(|_| self.ctx.checkout(&change.branch))
            .map_err(|source| ResolveError::Checkout {
                branch: change.branch.clone(),
                source,
            })
    }

    fn configure_remotes(&self, change: &ChangeRef) -> Result<(), ResolveError> {
        let remote = self.ctx.settings().base_remote.clone();
        let url = self.config.github.clone_url(&change.source_repo);
        let to_remote_error = |source| ResolveError::RemoteConfig {
            remote: remote.clone(),
            source,
        };

        let existing = self.ctx.remotes().map_err(to_remote_error)?;
        if existing.iter().any(|r| r == &remote) {
            self.ctx.remove_remote(&remote);
        }
        self.ctx.add_remote(&remote, &url).map_err(to_remote_error)?;
        self.ctx
            .fetch(&remote, &change.target_branch)
            .map_err(to_remote_error)?;
        info!(remote = %remote, url = %url, "configured base remote");
        Ok(())
    }

    /// Apply the per-kind policy to every conflicted path in git's order,
    /// then regenerate lockfiles.
    fn resolve_files(&self, conflicts: &ConflictSet) -> Result<(), ResolveError> {
        for entry in conflicts.entries() {
            match entry.kind.policy() {
                ResolutionPolicy::Regenerate => {
                    info!(path = %entry.path, "deferring lockfile to regeneration");
                }
                ResolutionPolicy::TakeTheirs => {
                    self.ctx
                        .checkout_theirs(&entry.path)
                        .map_err(|source| ResolveError::TakeTheirs {
                            path: entry.path.clone(),
                            source,
                        })?;
                    info!(path = %entry.path, "resolved by taking base branch version");
                }
                ResolutionPolicy::SemanticMerge => self.resolve_manifest(&entry.path)?,
                ResolutionPolicy::Abort => {
                    return Err(ResolveError::UnsupportedFile(entry.path.clone()));
                }
            }
        }

        LockfileRegenerator::new(&self.ctx, &self.config.files, &self.config.package_manager)
            .regenerate_for(conflicts, &self.classifier)?;
        Ok(())
    }

    #[instrument(skip(self))]
    fn resolve_manifest(&self, path: &str) -> Result<(), ResolveError> {
        let ours = self.read_stage(OURS_STAGE, path)?;
        let theirs = self.read_stage(THEIRS_STAGE, path)?;
        let outcome = merge_sides(path, ours, theirs)?;
        outcome.manifest.write_to(&self.ctx.path(path))?;
        info!(
            decisions = outcome.decisions.len(),
            "resolved {path} by semantic merge"
        );
        Ok(())
    }

    fn read_stage(&self, stage: u8, path: &str) -> Result<Option<DependencyManifest>, ResolveError> {
        let Some(text) = self.ctx.show_stage(stage, path)? else {
            return Ok(None);
        };
        Ok(Some(DependencyManifest::parse(path, &text)?))
    }

    fn stage(&self, conflicts: &ConflictSet) -> Result<(), ResolveError> {
        let mut paths: Vec<String> = conflicts
            .paths()
            .filter(|p| self.ctx.path(p).exists())
            .map(str::to_string)
            .collect();

        let root_lockfile = &self.config.files.lockfile;
        if conflicts.has_manifest_conflict()
            && !conflicts.has_lockfile_conflict()
            && self.ctx.path(root_lockfile).exists()
            && !paths.contains(root_lockfile)
        {
            paths.push(root_lockfile.clone());
        }

        self.ctx.add(&paths).map_err(ResolveError::Stage)
    }

    fn commit_and_push(
        &mut self,
        change: &ChangeRef,
        pre_merge: &str,
    ) -> Result<ResolutionOutcome, ResolveError> {
        let unstaged = self.ctx.worktree_names()?;
        if !unstaged.is_empty() {
            self.ctx.add(&unstaged).map_err(ResolveError::Stage)?;
        }

        let staged = self.ctx.staged_names()?;
        let changed = self.ctx.names_changed_since(pre_merge)?;
        let settings = self.ctx.settings().clone();

        let without_changes = staged.is_empty() && changed.is_empty();
        if without_changes {
            info!("resolution matches the branch content; recording an empty resolution commit");
            self.enter(MergeState::EmptyDiff);
            self.ctx
                .commit(&settings.empty_commit_message, true)
                .map_err(ResolveError::CommitPush)?;
        } else {
            self.enter(MergeState::ChangesStaged);
            self.ctx
                .commit(&settings.commit_message, false)
                .map_err(ResolveError::CommitPush)?;
        }

        self.ctx
            .push_head(&change.branch)
            .map_err(ResolveError::CommitPush)?;
        self.enter(MergeState::Committed);

        let summary = self.summarize(pre_merge);
        info!(commit = %summary.commit, files = summary.files.len(), "pushed resolution to {}", change.branch);

        Ok(if without_changes {
            ResolutionOutcome::ResolvedWithoutChanges(summary)
        } else {
            ResolutionOutcome::Committed(summary)
        })
    }

    /// Resulting commit and touched files. Best effort: the push already
    /// succeeded, so lookup failures only thin out the report.
    fn summarize(&self, pre_merge: &str) -> ResolutionSummary {
        let commit = self.ctx.rev_parse("HEAD").unwrap_or_else(|e| {
            warn!(error = %e, "could not read resulting commit");
            String::new()
        });
        let files = self.ctx.names_between(pre_merge, "HEAD").unwrap_or_else(|e| {
            warn!(error = %e, "could not list updated files");
            Vec::new()
        });
        ResolutionSummary { commit, files }
    }
}
