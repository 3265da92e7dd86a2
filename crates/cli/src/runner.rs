//! The `resolve` loop: select pull requests, resolve each one in turn,
//! comment on the resolved ones and summarize the run.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use comfy_table::{presets::UTF8_FULL, Cell, ContentArrangement, Table};
use tracing::{error, info, warn};

use pkgmend_core::config::AppConfig;
use pkgmend_core::discovery::{EventContext, EventOverrides, SelectionPlan};
use pkgmend_core::errors::ResolveError;
use pkgmend_core::models::{ChangeRef, RunSummary, UnitResult, UnitStatus};
use pkgmend_core::report;
use pkgmend_core::{
    GitHubClient, MergeOrchestrator, ProcessRunner, ResolutionOutcome, WorkingTreeContext,
};

use crate::style;

/// Options for one `resolve` run.
#[derive(Debug, Clone)]
pub struct ResolveOptions {
    pub workdir: PathBuf,
    pub overrides: EventOverrides,
    pub comment: bool,
}

/// Resolves one change branch in the local working tree.
///
/// Called from a blocking thread, one branch at a time.
pub trait BranchResolver: Send + Sync + 'static {
    fn resolve(&self, change: &ChangeRef) -> Result<ResolutionOutcome, ResolveError>;
}

/// Runs the merge orchestrator with real git and package-manager processes.
pub struct WorkdirResolver {
    config: AppConfig,
    workdir: PathBuf,
}

impl WorkdirResolver {
    pub fn new(config: AppConfig, workdir: PathBuf) -> Self {
        Self { config, workdir }
    }
}

impl BranchResolver for WorkdirResolver {
    fn resolve(&self, change: &ChangeRef) -> Result<ResolutionOutcome, ResolveError> {
        let ctx = WorkingTreeContext::new(
            ProcessRunner::new(&self.workdir),
            &self.workdir,
            self.config.git.clone(),
        );
        MergeOrchestrator::new(ctx, &self.config).resolve(change)
    }
}

/// Run the whole loop. Only process-fatal problems return `Err`; per-PR
/// failures are recorded in the summary.
pub async fn run_resolve(config: AppConfig, options: ResolveOptions) -> Result<RunSummary> {
    let token = config
        .require_token()
        .context("a GitHub token is required")?
        .to_string();
    let (owner, name) = config
        .require_repo()
        .context("the target repository is required")?;
    let repo = format!("{owner}/{name}");
    let client = GitHubClient::new(&config.github.api_url, token)
        .context("failed to create GitHub client")?;

    let mut event = EventContext::from_env();
    event.apply_overrides(&options.overrides);
    let plan = event.plan().context("could not decide which PRs to process")?;

    let numbers = match plan {
        SelectionPlan::Single(n) => vec![n],
        SelectionPlan::AllOpenTargeting(base) => {
            let numbers = client
                .list_open_pull_request_numbers(&repo, &base)
                .await
                .context("failed to fetch open pull requests")?;
            info!("found {} open PR(s) targeting {base}", numbers.len());
            numbers
        }
    };

    if numbers.is_empty() {
        info!("no PRs found to process");
        let mut run = RunSummary::new();
        run.finish();
        return Ok(run);
    }

    let resolver = Arc::new(WorkdirResolver::new(config.clone(), options.workdir.clone()));
    Ok(process_all(&client, &config, &options, &repo, &numbers, resolver).await)
}

/// Process each PR in order. A failure is recorded against its PR and the
/// loop moves on.
pub async fn process_all<B: BranchResolver>(
    client: &GitHubClient,
    config: &AppConfig,
    options: &ResolveOptions,
    repo: &str,
    numbers: &[u64],
    resolver: Arc<B>,
) -> RunSummary {
    let mut run = RunSummary::new();
    for &number in numbers {
        info!(pr = number, "processing PR #{number}");
        let unit = match process_one(client, config, options, repo, number, &resolver).await {
            Ok(unit) => unit,
            Err(e) => {
                error!(pr = number, "failed to process PR #{number}: {e:#}");
                UnitResult {
                    number,
                    branch: None,
                    status: UnitStatus::Failed,
                    detail: format!("{e:#}"),
                    commit: None,
                }
            }
        };
        run.record(unit);
    }

    run.finish();
    info!("{}", report::run_totals(&run));
    run
}

async fn process_one<B: BranchResolver>(
    client: &GitHubClient,
    config: &AppConfig,
    options: &ResolveOptions,
    repo: &str,
    number: u64,
    resolver: &Arc<B>,
) -> Result<UnitResult> {
    let pr = client
        .wait_for_mergeable_state(
            repo,
            number,
            config.github.mergeable_max_attempts,
            Duration::from_millis(config.github.mergeable_poll_delay_ms),
        )
        .await
        .context("failed to fetch pull request")?;
    let change = ChangeRef::from_pull_request(&pr, repo);
    info!(
        pr = number,
        "PR {}: {} (can_push: {})",
        change.label(),
        pr.mergeable_state(),
        change.pushable
    );

    let unit = |status: UnitStatus, detail: &str, commit: Option<String>| UnitResult {
        number,
        branch: Some(change.branch.clone()),
        status,
        detail: detail.to_string(),
        commit,
    };

    if !pr.is_dirty() {
        info!(pr = number, "PR #{number} is not marked as dirty; nothing to do");
        return Ok(unit(UnitStatus::Clean, pr.mergeable_state(), None));
    }
    if !change.pushable {
        info!(pr = number, "PR #{number} comes from a fork; pushing is not allowed");
        return Ok(unit(UnitStatus::Skipped, "head repository is a fork", None));
    }

    let outcome = {
        let resolver = Arc::clone(resolver);
        let change = change.clone();
        tokio::task::spawn_blocking(move || resolver.resolve(&change))
            .await
            .context("resolution task panicked")?
    };

    match outcome {
        Ok(outcome) if outcome.resolved() => {
            if options.comment && config.github.comment_on_success {
                report::post_resolution_comment(client, repo, number, &outcome).await;
            }
            let commit = outcome.summary().map(|s| s.commit.clone());
            Ok(unit(UnitStatus::Resolved, "conflicts resolved and pushed", commit))
        }
        Ok(_) => Ok(unit(UnitStatus::NoConflict, "merged cleanly", None)),
        Err(e) => {
            if e.is_invariant_violation() {
                error!(
                    pr = number,
                    error = %e,
                    "unexpected state while resolving {}",
                    change.label()
                );
            } else {
                warn!(pr = number, error = %e, "could not resolve {}", change.label());
            }
            Ok(unit(UnitStatus::Unresolved, &e.to_string(), None))
        }
    }
}

/// Print the per-PR table and totals.
pub fn print_summary(run: &RunSummary) {
    println!();
    if run.units.is_empty() {
        println!("{}", style::dim("No PRs found to process."));
        return;
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["PR #", "Branch", "Status", "Commit", "Detail"]);

    for unit in &run.units {
        let commit = unit
            .commit
            .as_deref()
            .map(|c| c.chars().take(12).collect::<String>())
            .unwrap_or_else(|| "—".to_string());
        table.add_row(vec![
            Cell::new(format!("#{}", unit.number)),
            Cell::new(unit.branch.as_deref().unwrap_or("—")),
            style::status_cell(&unit.status),
            Cell::new(commit),
            Cell::new(&unit.detail),
        ]);
    }

    println!("{table}");
    println!();
    let totals = report::run_totals(run);
    if run
        .units
        .iter()
        .any(|u| matches!(u.status, UnitStatus::Failed | UnitStatus::Unresolved))
    {
        println!("{}", style::warn(&totals));
    } else {
        println!("{}", style::success(&totals));
    }
}
