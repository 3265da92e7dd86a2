//! Human-readable reporting of resolution results.

use tracing::{info, warn};

use crate::git::GitHubClient;
use crate::models::{ResolutionOutcome, ResolutionSummary, RunSummary};

const HEADLINE: &str = "✅ Auto-resolved publishing conflicts.";
const FOOTER: &str = "_This was performed by the **pkgmend** conflict resolver._";

/// Markdown body of the pull-request comment for a resolved branch.
pub fn comment_body(outcome: &ResolutionOutcome) -> Option<String> {
    let summary = outcome.summary()?;
    let mut lines = vec![HEADLINE.to_string(), String::new()];
    if matches!(outcome, ResolutionOutcome::ResolvedWithoutChanges(_)) {
        lines.push("The resolved files already matched this branch; an empty commit records the merge.".into());
        lines.push(String::new());
    }
    lines.extend(summary_lines(summary));
    lines.push(FOOTER.to_string());
    Some(lines.join("\n"))
}

fn summary_lines(summary: &ResolutionSummary) -> Vec<String> {
    let commit = if summary.commit.is_empty() {
        "unknown"
    } else {
        &summary.commit
    };
    let mut lines = vec![format!("Commit: `{commit}`"), String::new()];
    if !summary.files.is_empty() {
        lines.push("Updated files:".into());
        lines.extend(summary.files.iter().map(|f| format!("- `{f}`")));
        lines.push(String::new());
    }
    lines
}

/// Post the resolution comment. Failure is a warning; returns whether the
/// comment was created.
pub async fn post_resolution_comment(
    client: &GitHubClient,
    repo: &str,
    number: u64,
    outcome: &ResolutionOutcome,
) -> bool {
    let Some(body) = comment_body(outcome) else {
        return false;
    };
    match client.create_comment(repo, number, &body).await {
        Ok(()) => {
            info!(pr = number, "commented on PR #{number}");
            true
        }
        Err(e) => {
            warn!(pr = number, error = %e, "failed to comment on PR #{number}");
            false
        }
    }
}

/// Final one-line run summary.
pub fn run_totals(run: &RunSummary) -> String {
    format!(
        "Processed {} PR(s), resolved {} conflict(s)",
        run.processed(),
        run.resolved()
    )
}
