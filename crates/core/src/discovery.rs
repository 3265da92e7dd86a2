//! Which pull requests to process, derived from the workflow event.
//!
//! The event name comes from `GITHUB_EVENT_NAME` and the payload from the
//! JSON file at `GITHUB_EVENT_PATH`. Command-line flags may override the
//! dispatch mode, PR number and base branch.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::errors::DiscoveryError;

pub const EVENT_NAME_ENV: &str = "GITHUB_EVENT_NAME";
pub const EVENT_PATH_ENV: &str = "GITHUB_EVENT_PATH";

const DEFAULT_BRANCH: &str = "main";

/// `workflow_dispatch` selection mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DispatchMode {
    Single,
    All,
    /// Anything else; rejected by [`EventContext::plan`].
    Other(String),
}

impl DispatchMode {
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "" | "single" => Self::Single,
            "all" => Self::All,
            other => Self::Other(other.to_string()),
        }
    }
}

/// What the run should process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionPlan {
    /// One pull request by number.
    Single(u64),
    /// Every open pull request whose base is this branch.
    AllOpenTargeting(String),
}

/// Command-line overrides layered over the event payload.
#[derive(Debug, Clone, Default)]
pub struct EventOverrides {
    pub event_name: Option<String>,
    pub mode: Option<String>,
    pub pr_number: Option<u64>,
    pub base_branch: Option<String>,
}

/// Event facts needed to select pull requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventContext {
    pub event_name: Option<String>,
    pub mode: DispatchMode,
    /// Base branch from dispatch inputs or the pushed ref.
    pub base_branch: String,
    /// PR number from dispatch inputs.
    pub pr_number: Option<u64>,
    /// PR number of a pull-request event.
    pub event_pr_number: Option<u64>,
    /// Base ref of a pull-request event, or the pushed branch.
    pub event_base_ref: String,
}

impl Default for EventContext {
    fn default() -> Self {
        Self {
            event_name: None,
            mode: DispatchMode::Single,
            base_branch: DEFAULT_BRANCH.to_string(),
            pr_number: None,
            event_pr_number: None,
            event_base_ref: DEFAULT_BRANCH.to_string(),
        }
    }
}

impl EventContext {
    /// Build from the workflow environment. An unreadable payload is a
    /// warning and leaves the defaults in place.
    pub fn from_env() -> Self {
        let event_name = std::env::var(EVENT_NAME_ENV).ok().filter(|s| !s.is_empty());
        let payload = std::env::var(EVENT_PATH_ENV)
            .ok()
            .filter(|s| !s.is_empty())
            .and_then(|path| read_payload(Path::new(&path)));
        Self::from_payload(event_name, payload.as_ref())
    }

    /// Build from an event name and an already-parsed payload.
    pub fn from_payload(event_name: Option<String>, payload: Option<&Value>) -> Self {
        let mut ctx = Self {
            event_name,
            ..Self::default()
        };
        let Some(payload) = payload else {
            return ctx;
        };

        if let Some(pr) = payload.get("pull_request") {
            ctx.event_pr_number = pr.get("number").and_then(as_number);
            ctx.event_base_ref = pr
                .pointer("/base/ref")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .unwrap_or(DEFAULT_BRANCH)
                .to_string();
        }

        if let Some(reference) = payload.get("ref").and_then(Value::as_str) {
            let branch = reference
                .strip_prefix("refs/heads/")
                .filter(|b| !b.is_empty())
                .unwrap_or(DEFAULT_BRANCH);
            ctx.base_branch = branch.to_string();
            ctx.event_base_ref = branch.to_string();
        }

        if let Some(inputs) = payload.get("inputs") {
            let text = |key: &str| {
                inputs
                    .get(key)
                    .and_then(Value::as_str)
                    .filter(|s| !s.is_empty())
            };
            ctx.mode = DispatchMode::parse(text("mode").unwrap_or("single"));
            ctx.base_branch = text("base_branch").unwrap_or(DEFAULT_BRANCH).to_string();
            ctx.pr_number = inputs.get("pr_number").and_then(as_number);
        }

        ctx
    }

    pub fn apply_overrides(&mut self, overrides: &EventOverrides) {
        if let Some(name) = &overrides.event_name {
            self.event_name = Some(name.clone());
        }
        if let Some(mode) = &overrides.mode {
            self.mode = DispatchMode::parse(mode);
        }
        if let Some(n) = overrides.pr_number {
            self.pr_number = Some(n);
            self.event_pr_number.get_or_insert(n);
        }
        if let Some(branch) = &overrides.base_branch {
            self.base_branch = branch.clone();
        }
    }

    /// Decide what to process.
    pub fn plan(&self) -> Result<SelectionPlan, DiscoveryError> {
        let event = self
            .event_name
            .as_deref()
            .ok_or(DiscoveryError::NoEventName)?;

        let plan = match event {
            "workflow_dispatch" => match &self.mode {
                DispatchMode::Single => self
                    .pr_number
                    .map(SelectionPlan::Single)
                    .ok_or_else(|| DiscoveryError::PrNumberRequired("single mode".into()))?,
                DispatchMode::All => SelectionPlan::AllOpenTargeting(self.base_branch.clone()),
                DispatchMode::Other(mode) => return Err(DiscoveryError::InvalidMode(mode.clone())),
            },
            "push" => SelectionPlan::AllOpenTargeting(self.base_branch.clone()),
            "pull_request_target" => self
                .event_pr_number
                .map(SelectionPlan::Single)
                .ok_or_else(|| DiscoveryError::PrNumberRequired(event.to_string()))?,
            other => return Err(DiscoveryError::UnsupportedEvent(other.to_string())),
        };

        match &plan {
            SelectionPlan::Single(n) => info!(event, "processing PR #{n}"),
            SelectionPlan::AllOpenTargeting(base) => {
                info!(event, "processing all open PRs targeting {base}")
            }
        }
        Ok(plan)
    }
}

fn read_payload(path: &Path) -> Option<Value> {
    let parsed = std::fs::read_to_string(path)
        .map_err(|e| e.to_string())
        .and_then(|text| serde_json::from_str(&text).map_err(|e| e.to_string()));
    match parsed {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(path = %path.display(), "could not read event payload: {e}; using defaults");
            None
        }
    }
}

/// Numbers arrive as JSON numbers in PR payloads and as strings in
/// dispatch inputs.
fn as_number(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
    .filter(|n| *n > 0)
}
