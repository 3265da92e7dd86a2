//! Error types for the pkgmend core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them all for callers that want a
//! single error type.

use thiserror::Error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Git(#[from] GitError),

    #[error(transparent)]
    GitHub(#[from] GitHubError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Classify(#[from] ClassifyError),

    #[error(transparent)]
    Lockfile(#[from] LockfileError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
}

// ---------------------------------------------------------------------------
// Git errors
// ---------------------------------------------------------------------------

/// Errors from git invocations made through a [`crate::command::CommandRunner`].
#[derive(Debug, Error)]
pub enum GitError {
    /// The `git` binary could not be spawned.
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// A git command exited unsuccessfully.
    #[error("`{command}` failed (exit {exit_code}): {stderr}")]
    CommandFailed {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    /// Push was rejected by the remote.
    #[error("git push rejected for branch '{branch}': {detail}")]
    PushRejected { branch: String, detail: String },
}

// ---------------------------------------------------------------------------
// GitHub API errors
// ---------------------------------------------------------------------------

/// Errors from GitHub REST API interactions.
#[derive(Debug, Error)]
pub enum GitHubError {
    /// HTTP-level transport error (network, TLS, etc.).
    #[error("GitHub HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// The API returned a non-success status code.
    #[error("GitHub API error (HTTP {status}): {body}")]
    ApiError { status: u16, body: String },

    /// Authentication token is missing or invalid.
    #[error("GitHub authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Rate limit exceeded.
    #[error("GitHub rate limit exceeded, resets at {reset_at}")]
    RateLimited { reset_at: String },

    /// JSON deserialization failure.
    #[error("GitHub response parse error: {0}")]
    ParseError(String),
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A required environment variable is not set.
    #[error("required environment variable '{var}' is not set (referenced by config field '{field}')")]
    EnvVarMissing { var: String, field: String },

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Manifest errors
// ---------------------------------------------------------------------------

/// Errors from reading, merging, or writing a dependency manifest.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// One side of the merge could not be read from the index.
    #[error("merge stage {stage} is missing for '{path}'")]
    MissingMergeSide { path: String, stage: u8 },

    /// The document is not a JSON object.
    #[error("manifest '{path}' is not valid JSON: {detail}")]
    Parse { path: String, detail: String },

    /// A dependency block is not a name -> version-string mapping.
    #[error("dependency block '{block}' is malformed: {detail}")]
    MalformedBlock { block: String, detail: String },

    /// Reading or writing the working-tree file failed.
    #[error("manifest I/O error at '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

// ---------------------------------------------------------------------------
// Classifier errors
// ---------------------------------------------------------------------------

/// Errors from the conflict classifier.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClassifyError {
    /// No conflicted paths were supplied.
    #[error("no conflicted paths to classify")]
    Empty,
}

// ---------------------------------------------------------------------------
// Lockfile errors
// ---------------------------------------------------------------------------

/// Errors from lockfile regeneration.
#[derive(Debug, Error)]
pub enum LockfileError {
    /// No sibling manifest exists next to the lockfile.
    #[error("no {manifest} found for lockfile '{lockfile}'")]
    ManifestMissing { lockfile: String, manifest: String },

    /// The sibling manifest is not valid JSON.
    #[error("manifest '{path}' is invalid JSON: {detail}")]
    ManifestInvalid { path: String, detail: String },

    /// The package manager invocation failed.
    #[error("lockfile regeneration for '{lockfile}' failed: {detail}")]
    InstallFailed { lockfile: String, detail: String },
}

// ---------------------------------------------------------------------------
// Resolution errors
// ---------------------------------------------------------------------------

/// Fatal-per-unit failures raised by the merge orchestrator.
///
/// Every variant aborts the unit of work; the caller converts it into a
/// "not resolved" result and moves on to the next change branch.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// Fetching or checking out the change branch failed.
    #[error("failed to check out branch '{branch}': {source}")]
    Checkout {
        branch: String,
        #[source]
        source: GitError,
    },

    /// Configuring the bot identity failed.
    #[error("failed to configure git user: {0}")]
    UserConfig(#[source] GitError),

    /// Adding or fetching the auxiliary remote failed.
    #[error("failed to configure remote '{remote}': {source}")]
    RemoteConfig {
        remote: String,
        #[source]
        source: GitError,
    },

    /// The merge attempt could not be run at all.
    #[error("merge attempt failed to run: {0}")]
    Merge(#[source] GitError),

    /// Git reported a failed merge but no unmerged paths exist.
    #[error("merge reported conflicts but no unmerged files exist")]
    NoUnmergedPaths,

    /// A conflicted file is outside the supported set.
    #[error("unsupported conflicted file: {0}")]
    UnsupportedFile(String),

    /// Taking the base-branch side of a file failed.
    #[error("failed to take base-branch version of '{path}': {source}")]
    TakeTheirs {
        path: String,
        #[source]
        source: GitError,
    },

    /// Semantic manifest merge failed.
    #[error("failed to merge manifest: {0}")]
    Manifest(#[from] ManifestError),

    /// Lockfile regeneration failed.
    #[error(transparent)]
    Lockfile(#[from] LockfileError),

    /// Staging resolved files failed.
    #[error("failed to stage files: {0}")]
    Stage(#[source] GitError),

    /// Unmerged paths remain after resolution.
    #[error("conflicts still present after resolution: {}", .0.join(", "))]
    ConflictsRemain(Vec<String>),

    /// Commit or push failed.
    #[error("failed to commit or push: {0}")]
    CommitPush(#[source] GitError),

    /// Any other git failure during resolution.
    #[error(transparent)]
    Git(#[from] GitError),
}

impl ResolveError {
    /// Whether this error signals a broken invariant rather than an
    /// expected failure mode.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, Self::NoUnmergedPaths)
    }
}

impl From<ClassifyError> for ResolveError {
    fn from(err: ClassifyError) -> Self {
        match err {
            ClassifyError::Empty => Self::NoUnmergedPaths,
        }
    }
}

// ---------------------------------------------------------------------------
// Discovery errors
// ---------------------------------------------------------------------------

/// Process-fatal errors from selecting which change branches to process.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DiscoveryError {
    /// No event name is available.
    #[error("no event name provided; set GITHUB_EVENT_NAME or pass --event")]
    NoEventName,

    /// Single mode without a PR number.
    #[error("PR number is required for {0}")]
    PrNumberRequired(String),

    /// Unknown workflow_dispatch mode.
    #[error("invalid mode '{0}'; must be 'single' or 'all'")]
    InvalidMode(String),

    /// Event type outside the supported set.
    #[error("unsupported event type '{0}'; supported: pull_request_target, push, workflow_dispatch")]
    UnsupportedEvent(String),
}
