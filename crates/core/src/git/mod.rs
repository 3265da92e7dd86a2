//! Git and GitHub operations for pkgmend.

pub mod github;
pub mod worktree;

pub use github::{GitHubClient, PullRequest};
pub use worktree::{HooksState, WorkingTreeContext, OURS_STAGE, THEIRS_STAGE};
