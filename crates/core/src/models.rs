//! Domain model types shared by the orchestrator, the runner loop and the
//! reporting layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::git::github::PullRequest;

// ---------------------------------------------------------------------------
// Change reference
// ---------------------------------------------------------------------------

/// A change branch under resolution. Immutable for one unit of work.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChangeRef {
    /// Pull request number, when the branch came from one.
    pub number: Option<u64>,
    /// Branch being kept conflict-free.
    pub branch: String,
    /// `owner/repo` the branch lives in.
    pub source_repo: String,
    /// Base branch merged into `branch`.
    pub target_branch: String,
    /// Only same-repository branches may be pushed to.
    pub pushable: bool,
    pub url: String,
}

impl ChangeRef {
    /// Build from pull-request metadata; `repo` is the configured
    /// `owner/repo` the resolver runs against.
    pub fn from_pull_request(pr: &PullRequest, repo: &str) -> Self {
        let source_repo = pr.head_repo_full_name().to_string();
        Self {
            number: Some(pr.number),
            branch: pr.head.ref_name.clone(),
            pushable: !source_repo.is_empty() && source_repo == repo,
            source_repo,
            target_branch: pr.base.ref_name.clone(),
            url: pr.html_url.clone(),
        }
    }

    /// Short label for logs: `#12 (feature/x)` or the branch name.
    pub fn label(&self) -> String {
        match self.number {
            Some(n) => format!("#{n} ({})", self.branch),
            None => self.branch.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Resolution outcome
// ---------------------------------------------------------------------------

/// Commit and files produced by a successful resolution.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResolutionSummary {
    pub commit: String,
    pub files: Vec<String>,
}

/// Terminal result of one orchestrator run that did not abort.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ResolutionOutcome {
    /// The base branch merged cleanly; nothing was committed.
    NoConflict,
    /// Conflicts resolved to the branch's existing content; an empty commit
    /// records the resolution.
    ResolvedWithoutChanges(ResolutionSummary),
    /// Conflicts resolved and committed.
    Committed(ResolutionSummary),
}

impl ResolutionOutcome {
    /// Whether the branch was resolved (and pushed).
    pub fn resolved(&self) -> bool {
        !matches!(self, Self::NoConflict)
    }

    pub fn summary(&self) -> Option<&ResolutionSummary> {
        match self {
            Self::NoConflict => None,
            Self::ResolvedWithoutChanges(s) | Self::Committed(s) => Some(s),
        }
    }
}

// ---------------------------------------------------------------------------
// Run bookkeeping
// ---------------------------------------------------------------------------

/// What happened to one unit of work in a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    /// Not conflicted according to GitHub.
    Clean,
    /// Skipped because the branch cannot be pushed to.
    Skipped,
    /// Merged cleanly locally; nothing to resolve.
    NoConflict,
    Resolved,
    /// Resolution was attempted and aborted; the branch is unchanged.
    Unresolved,
    /// The unit could not be processed at all, e.g. the PR lookup failed.
    Failed,
}

impl std::fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Clean => write!(f, "clean"),
            Self::Skipped => write!(f, "skipped"),
            Self::NoConflict => write!(f, "no_conflict"),
            Self::Resolved => write!(f, "resolved"),
            Self::Unresolved => write!(f, "unresolved"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Result row for one unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitResult {
    pub number: u64,
    pub branch: Option<String>,
    pub status: UnitStatus,
    pub detail: String,
    pub commit: Option<String>,
}

/// Totals and rows for a whole run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub units: Vec<UnitResult>,
}

impl RunSummary {
    pub fn new() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            completed_at: None,
            units: Vec::new(),
        }
    }

    pub fn record(&mut self, unit: UnitResult) {
        self.units.push(unit);
    }

    pub fn finish(&mut self) {
        self.completed_at = Some(Utc::now());
    }

    /// Units that reached a decision (everything except hard failures).
    pub fn processed(&self) -> usize {
        self.units
            .iter()
            .filter(|u| u.status != UnitStatus::Failed)
            .count()
    }

    pub fn resolved(&self) -> usize {
        self.units
            .iter()
            .filter(|u| u.status == UnitStatus::Resolved)
            .count()
    }
}

impl Default for RunSummary {
    fn default() -> Self {
        Self::new()
    }
}
