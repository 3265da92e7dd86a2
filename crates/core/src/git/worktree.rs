//! Typed git operations on the working tree of one unit of work.
//!
//! [`WorkingTreeContext`] owns the command runner, the repository root and
//! the git settings. Every orchestration step receives it explicitly, so a
//! context is created per change branch and never shared.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::command::{CommandOutput, CommandRunner, CommandSpec};
use crate::config::GitConfig;
use crate::errors::GitError;

/// Index stage holding the checked-out (change-branch) side of a conflict.
///
/// Valid only because the change branch is checked out and the base branch
/// is merged into it; the stages swap if the merge direction is reversed.
pub const OURS_STAGE: u8 = 2;

/// Index stage holding the merged-in (base-branch) side of a conflict.
pub const THEIRS_STAGE: u8 = 3;

/// `core.hooksPath` value that disables every local hook.
const NULL_HOOKS_PATH: &str = "/dev/null";

/// Git operations bound to one working tree.
pub struct WorkingTreeContext<R> {
    runner: R,
    root: PathBuf,
    settings: GitConfig,
}

impl<R: CommandRunner> WorkingTreeContext<R> {
    pub fn new(runner: R, root: impl Into<PathBuf>, settings: GitConfig) -> Self {
        Self {
            runner,
            root: root.into(),
            settings,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn settings(&self) -> &GitConfig {
        &self.settings
    }

    /// Absolute path of a repository-relative path.
    pub fn path(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.root.join(relative)
    }

    // -----------------------------------------------------------------------
    // Invocation helpers
    // -----------------------------------------------------------------------

    /// Run any command, rooted at the working tree unless it names a cwd.
    pub fn exec(&self, mut spec: CommandSpec) -> Result<CommandOutput, GitError> {
        if spec.cwd.is_none() {
            spec.cwd = Some(self.root.clone());
        }
        self.runner.run(&spec).map_err(|source| GitError::Spawn {
            program: spec.program.clone(),
            source,
        })
    }

    /// Run a command and fail on a non-zero exit.
    pub fn exec_checked(&self, spec: CommandSpec) -> Result<CommandOutput, GitError> {
        let command = spec.display();
        let output = self.exec(spec)?;
        if output.success() {
            Ok(output)
        } else {
            Err(GitError::CommandFailed {
                command,
                exit_code: output.exit_code(),
                stderr: output.stderr.trim().to_string(),
            })
        }
    }

    fn git(&self, args: &[&str]) -> Result<CommandOutput, GitError> {
        self.exec_checked(CommandSpec::git(args.iter().copied()))
    }

    /// Run a git command whose failure is tolerated; returns whether it
    /// succeeded.
    fn git_tolerant(&self, args: &[&str]) -> bool {
        match self.exec(CommandSpec::git(args.iter().copied()).warn_on_failure()) {
            Ok(out) => out.success(),
            Err(e) => {
                warn!(error = %e, "git invocation could not be started");
                false
            }
        }
    }

    /// Environment applied to commit and push so hook managers stand down.
    fn hook_bypass(&self, spec: CommandSpec) -> CommandSpec {
        spec.env(self.settings.skip_hooks_env.clone(), "1")
    }

    // -----------------------------------------------------------------------
    // Branches and identity
    // -----------------------------------------------------------------------

    /// Fetch `branch` from `remote`.
    pub fn fetch(&self, remote: &str, branch: &str) -> Result<(), GitError> {
        self.git(&["fetch", remote, branch]).map(|_| ())
    }

    pub fn checkout(&self, branch: &str) -> Result<(), GitError> {
        self.git(&["checkout", branch]).map(|_| ())
    }

    /// Set the committer identity from the configured bot user.
    pub fn configure_identity(&self) -> Result<(), GitError> {
        self.set_config("user.name", &self.settings.user_name)?;
        self.set_config("user.email", &self.settings.user_email)
    }

    pub fn set_config(&self, key: &str, value: &str) -> Result<(), GitError> {
        self.git(&["config", key, value]).map(|_| ())
    }

    /// Local config value; `None` when unset.
    pub fn get_config(&self, key: &str) -> Result<Option<String>, GitError> {
        let output = self.exec(CommandSpec::git(["config", "--local", "--get", key]).warn_on_failure())?;
        match output.status {
            Some(0) => Ok(Some(output.stdout.trim().to_string())),
            // `git config --get` exits 1 for a missing key.
            Some(1) => Ok(None),
            _ => Err(GitError::CommandFailed {
                command: format!("git config --local --get {key}"),
                exit_code: output.exit_code(),
                stderr: output.stderr.trim().to_string(),
            }),
        }
    }

    // -----------------------------------------------------------------------
    // Hooks
    // -----------------------------------------------------------------------

    /// Point `core.hooksPath` at `/dev/null`, returning the previous value
    /// for [`restore_hooks`](Self::restore_hooks). Failure is a warning.
    pub fn disable_hooks(&self) -> Option<HooksState> {
        if !self.settings.disable_hooks {
            return None;
        }
        let previous = match self.get_config("core.hooksPath") {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "could not read core.hooksPath");
                None
            }
        };
        if self.git_tolerant(&["config", "core.hooksPath", NULL_HOOKS_PATH]) {
            info!("disabled git hooks for this run (core.hooksPath={NULL_HOOKS_PATH})");
            Some(HooksState { previous })
        } else {
            warn!("could not disable git hooks; continuing");
            None
        }
    }

    /// Put `core.hooksPath` back the way [`disable_hooks`](Self::disable_hooks)
    /// found it.
    pub fn restore_hooks(&self, state: HooksState) {
        let restored = match state.previous.as_deref() {
            Some(previous) => self.git_tolerant(&["config", "core.hooksPath", previous]),
            None => self.git_tolerant(&["config", "--unset", "core.hooksPath"]),
        };
        if restored {
            debug!("restored core.hooksPath");
        } else {
            warn!("could not restore core.hooksPath");
        }
    }

    // -----------------------------------------------------------------------
    // Remotes
    // -----------------------------------------------------------------------

    pub fn remotes(&self) -> Result<Vec<String>, GitError> {
        Ok(self.git(&["remote"])?.lines())
    }

    /// Remove a remote; failure is a warning.
    pub fn remove_remote(&self, name: &str) -> bool {
        self.git_tolerant(&["remote", "remove", name])
    }

    pub fn add_remote(&self, name: &str, url: &str) -> Result<(), GitError> {
        self.git(&["remote", "add", name, url]).map(|_| ())
    }

    // -----------------------------------------------------------------------
    // Merge
    // -----------------------------------------------------------------------

    /// Attempt a no-commit, no-fast-forward merge of `reference`.
    ///
    /// Returns `true` when git merged cleanly and `false` when it stopped,
    /// which the caller treats as "conflicts exist".
    pub fn try_merge(&self, reference: &str) -> Result<bool, GitError> {
        let output = self.exec(
            CommandSpec::git(["merge", "--no-commit", "--no-ff", reference])
                .label("merge")
                .warn_on_failure(),
        )?;
        Ok(output.success())
    }

    /// Best-effort `git merge --abort`.
    pub fn abort_merge(&self) -> bool {
        self.git_tolerant(&["merge", "--abort"])
    }

    /// Paths git still reports as unmerged.
    pub fn unmerged_paths(&self) -> Result<Vec<String>, GitError> {
        Ok(self.git(&["diff", "--name-only", "--diff-filter=U", "-z"])?.nul_separated())
    }

    /// Content of `path` at an index stage; `None` when the stage is absent
    /// or empty.
    pub fn show_stage(&self, stage: u8, path: &str) -> Result<Option<String>, GitError> {
        let object = format!(":{stage}:{path}");
        let output = self.exec(CommandSpec::git(["show", object.as_str()]).warn_on_failure())?;
        if !output.success() || output.stdout.trim().is_empty() {
            debug!(path, stage, "merge stage unavailable");
            return Ok(None);
        }
        Ok(Some(output.stdout))
    }

    /// Resolve `path` with the merged-in side.
    pub fn checkout_theirs(&self, path: &str) -> Result<(), GitError> {
        self.git(&["checkout", "--theirs", "--", path]).map(|_| ())
    }

    // -----------------------------------------------------------------------
    // Index and history
    // -----------------------------------------------------------------------

    pub fn add<S: AsRef<str>>(&self, paths: &[S]) -> Result<(), GitError> {
        if paths.is_empty() {
            return Ok(());
        }
        let mut args = vec!["add", "--"];
        args.extend(paths.iter().map(|p| p.as_ref()));
        self.git(&args).map(|_| ())
    }

    /// Stage one path; failure is a warning.
    pub fn add_tolerant(&self, path: &str) -> bool {
        self.git_tolerant(&["add", "--", path])
    }

    /// Paths with staged changes.
    pub fn staged_names(&self) -> Result<Vec<String>, GitError> {
        Ok(self.git(&["diff", "--cached", "--name-only", "-z"])?.nul_separated())
    }

    /// Paths with unstaged working-tree changes.
    pub fn worktree_names(&self) -> Result<Vec<String>, GitError> {
        Ok(self.git(&["diff", "--name-only", "-z"])?.nul_separated())
    }

    /// Paths whose working-tree content differs from `rev`.
    pub fn names_changed_since(&self, rev: &str) -> Result<Vec<String>, GitError> {
        Ok(self.git(&["diff", rev, "--name-only", "-z"])?.nul_separated())
    }

    /// Paths changed between two commits.
    pub fn names_between(&self, from: &str, to: &str) -> Result<Vec<String>, GitError> {
        Ok(self.git(&["diff", "--name-only", from, to, "-z"])?.nul_separated())
    }

    pub fn rev_parse(&self, rev: &str) -> Result<String, GitError> {
        Ok(self.git(&["rev-parse", rev])?.stdout.trim().to_string())
    }

    /// Commit the index, bypassing hooks.
    pub fn commit(&self, message: &str, allow_empty: bool) -> Result<(), GitError> {
        let mut args = vec!["commit", "--no-verify"];
        if allow_empty {
            args.push("--allow-empty");
        }
        args.extend(["-m", message]);
        self.exec_checked(self.hook_bypass(CommandSpec::git(args)))
            .map(|_| ())
    }

    /// Push `HEAD` to `branch` on the configured push remote.
    pub fn push_head(&self, branch: &str) -> Result<(), GitError> {
        let refspec = format!("HEAD:{branch}");
        let remote = self.settings.push_remote.clone();
        let spec = self.hook_bypass(CommandSpec::git(["push", "--no-verify", remote.as_str(), refspec.as_str()]));
        match self.exec_checked(spec) {
            Ok(_) => Ok(()),
            Err(GitError::CommandFailed { stderr, .. })
                if stderr.contains("rejected") || stderr.contains("non-fast-forward") =>
            {
                Err(GitError::PushRejected {
                    branch: branch.to_string(),
                    detail: stderr,
                })
            }
            Err(e) => Err(e),
        }
    }
}

/// `core.hooksPath` as it was before hooks were disabled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HooksState {
    previous: Option<String>,
}
