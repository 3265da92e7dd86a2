//! TOML-based configuration system for pkgmend.
//!
//! Every section has built-in defaults, so an absent or partial file is
//! valid. The API token is never stored in the file: `github.token_env`
//! names the environment variable that holds it, resolved at runtime via
//! [`AppConfig::resolve_env_vars`].

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::ConfigError;

/// Environment variable consulted when `github.repo` is not configured.
pub const REPOSITORY_ENV: &str = "GITHUB_REPOSITORY";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level application configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// GitHub repository and API settings.
    #[serde(default)]
    pub github: GitHubConfig,

    /// Git identity, remotes and commit settings.
    #[serde(default)]
    pub git: GitConfig,

    /// Well-known file names the resolver recognises.
    #[serde(default)]
    pub files: FilesConfig,

    /// Package manager used to regenerate lockfiles.
    #[serde(default)]
    pub package_manager: PackageManagerConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

// ---------------------------------------------------------------------------
// GitHub
// ---------------------------------------------------------------------------

/// GitHub repository and API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubConfig {
    /// GitHub API base URL (default `https://api.github.com`).
    #[serde(default = "default_github_api_url")]
    pub api_url: String,

    /// Base URL for git clone/fetch URLs (default `https://github.com`).
    #[serde(default = "default_git_base_url")]
    pub git_base_url: String,

    /// Repository in `owner/repo` format. Falls back to `GITHUB_REPOSITORY`.
    #[serde(default)]
    pub repo: Option<String>,

    /// Environment variable holding the API token.
    #[serde(default = "default_token_env")]
    pub token_env: String,

    /// Attempts made while waiting for GitHub to compute mergeability.
    #[serde(default = "default_mergeable_attempts")]
    pub mergeable_max_attempts: u32,

    /// Delay between mergeability polls, in milliseconds.
    #[serde(default = "default_mergeable_delay")]
    pub mergeable_poll_delay_ms: u64,

    /// Post a comment on the pull request after a successful resolution.
    #[serde(default = "default_true")]
    pub comment_on_success: bool,

    /// Resolved token (populated by `resolve_env_vars`).
    #[serde(skip)]
    pub token: Option<String>,
}

fn default_github_api_url() -> String {
    "https://api.github.com".into()
}
fn default_git_base_url() -> String {
    "https://github.com".into()
}
fn default_token_env() -> String {
    "GITHUB_TOKEN".into()
}
fn default_mergeable_attempts() -> u32 {
    15
}
fn default_mergeable_delay() -> u64 {
    2000
}
fn default_true() -> bool {
    true
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            api_url: default_github_api_url(),
            git_base_url: default_git_base_url(),
            repo: None,
            token_env: default_token_env(),
            mergeable_max_attempts: default_mergeable_attempts(),
            mergeable_poll_delay_ms: default_mergeable_delay(),
            comment_on_success: true,
            token: None,
        }
    }
}

impl GitHubConfig {
    /// Fetch URL for a repository given as `owner/repo`.
    pub fn clone_url(&self, full_name: &str) -> String {
        format!(
            "{}/{}.git",
            self.git_base_url.trim_end_matches('/'),
            full_name
        )
    }
}

// ---------------------------------------------------------------------------
// Git
// ---------------------------------------------------------------------------

/// Git identity, remote and commit configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitConfig {
    /// Name of the auxiliary remote the base branch is fetched from.
    #[serde(default = "default_base_remote")]
    pub base_remote: String,

    /// Remote the resolved branch is pushed to.
    #[serde(default = "default_push_remote")]
    pub push_remote: String,

    /// Committer name for resolution commits.
    #[serde(default = "default_user_name")]
    pub user_name: String,

    /// Committer email for resolution commits.
    #[serde(default = "default_user_email")]
    pub user_email: String,

    /// Message for commits that change files.
    #[serde(default = "default_commit_message")]
    pub commit_message: String,

    /// Message for the empty commit recorded when nothing changed.
    #[serde(default = "default_empty_commit_message")]
    pub empty_commit_message: String,

    /// Environment switch set to `1` on commit and push to bypass hook
    /// managers.
    #[serde(default = "default_skip_hooks_env")]
    pub skip_hooks_env: String,

    /// Point `core.hooksPath` at `/dev/null` for the duration of a run.
    #[serde(default = "default_true")]
    pub disable_hooks: bool,
}

fn default_base_remote() -> String {
    "base".into()
}
fn default_push_remote() -> String {
    "origin".into()
}
fn default_user_name() -> String {
    "github-actions[bot]".into()
}
fn default_user_email() -> String {
    "github-actions[bot]@users.noreply.github.com".into()
}
fn default_commit_message() -> String {
    "chore: auto-resolve package.json, package-lock.json and CHANGELOG.md conflicts".into()
}
fn default_empty_commit_message() -> String {
    "chore: resolve merge conflicts with base branch (no content changes)".into()
}
fn default_skip_hooks_env() -> String {
    "SKIP_HUSKY".into()
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            base_remote: default_base_remote(),
            push_remote: default_push_remote(),
            user_name: default_user_name(),
            user_email: default_user_email(),
            commit_message: default_commit_message(),
            empty_commit_message: default_empty_commit_message(),
            skip_hooks_env: default_skip_hooks_env(),
            disable_hooks: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Files
// ---------------------------------------------------------------------------

/// File names that identify each supported conflict kind.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FilesConfig {
    #[serde(default = "default_manifest")]
    pub manifest: String,

    #[serde(default = "default_lockfile")]
    pub lockfile: String,

    #[serde(default = "default_changelog")]
    pub changelog: String,
}

fn default_manifest() -> String {
    "package.json".into()
}
fn default_lockfile() -> String {
    "package-lock.json".into()
}
fn default_changelog() -> String {
    "CHANGELOG.md".into()
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            manifest: default_manifest(),
            lockfile: default_lockfile(),
            changelog: default_changelog(),
        }
    }
}

// ---------------------------------------------------------------------------
// Package manager
// ---------------------------------------------------------------------------

/// Package manager invocation used for lockfile-only installs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageManagerConfig {
    /// Executable name (default `npm`).
    #[serde(default = "default_pm_program")]
    pub program: String,

    /// Arguments producing a lockfile-only, script-free, audit-free install.
    #[serde(default = "default_lockfile_args")]
    pub lockfile_args: Vec<String>,

    /// Installed-dependency cache directory cleared before regeneration.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: String,

    /// Workspace globs used when the root manifest declares none.
    #[serde(default = "default_workspaces")]
    pub default_workspaces: Vec<String>,
}

fn default_pm_program() -> String {
    "npm".into()
}
fn default_lockfile_args() -> Vec<String> {
    ["install", "--package-lock-only", "--ignore-scripts", "--no-audit"]
        .into_iter()
        .map(String::from)
        .collect()
}
fn default_cache_dir() -> String {
    "node_modules".into()
}
fn default_workspaces() -> Vec<String> {
    vec!["packages/*".into()]
}

impl Default for PackageManagerConfig {
    fn default() -> Self {
        Self {
            program: default_pm_program(),
            lockfile_args: default_lockfile_args(),
            cache_dir: default_cache_dir(),
            default_workspaces: default_workspaces(),
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Minimum tracing level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// ---------------------------------------------------------------------------
// Loading & resolving
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Load an [`AppConfig`] from a TOML file at the given path.
    ///
    /// This does **not** resolve environment variables -- call
    /// [`resolve_env_vars`](Self::resolve_env_vars) afterwards.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        debug!("configuration parsed successfully");
        Ok(config)
    }

    /// Load from `path` when given, otherwise use built-in defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(p) => Self::load_from_file(p),
            None => {
                debug!("no configuration file given, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Resolve the token from `github.token_env` and fill `github.repo` from
    /// `GITHUB_REPOSITORY` when unset.
    ///
    /// Missing values only log a warning; commands that need them call
    /// [`require_token`](Self::require_token) or
    /// [`require_repo`](Self::require_repo).
    pub fn resolve_env_vars(&mut self) -> Result<(), ConfigError> {
        info!("resolving environment variable references in config");

        self.github.token = resolve_optional_env(&self.github.token_env, "github.token_env");

        if self.github.repo.is_none() {
            self.github.repo = resolve_optional_env(REPOSITORY_ENV, "github.repo");
        }

        debug!("environment variable resolution complete");
        Ok(())
    }

    /// The resolved API token, or an error naming the variable to set.
    pub fn require_token(&self) -> Result<&str, ConfigError> {
        self.github
            .token
            .as_deref()
            .ok_or_else(|| ConfigError::EnvVarMissing {
                var: self.github.token_env.clone(),
                field: "github.token_env".into(),
            })
    }

    /// The repository as `(owner, repo)`.
    pub fn require_repo(&self) -> Result<(&str, &str), ConfigError> {
        let full = self
            .github
            .repo
            .as_deref()
            .ok_or_else(|| ConfigError::EnvVarMissing {
                var: REPOSITORY_ENV.into(),
                field: "github.repo".into(),
            })?;
        split_repo(full).ok_or_else(|| ConfigError::InvalidValue {
            field: "github.repo".into(),
            detail: format!("'{full}' is not in 'owner/repo' format"),
        })
    }

    /// Validate that all fields are present and sane.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(repo) = &self.github.repo {
            if split_repo(repo).is_none() {
                return Err(ConfigError::InvalidValue {
                    field: "github.repo".into(),
                    detail: "GitHub repo must be in 'owner/repo' format".into(),
                });
            }
        }
        if self.github.mergeable_max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "github.mergeable_max_attempts".into(),
                detail: "attempts must be > 0".into(),
            });
        }
        for (field, value) in [
            ("files.manifest", &self.files.manifest),
            ("files.lockfile", &self.files.lockfile),
            ("files.changelog", &self.files.changelog),
            ("git.base_remote", &self.git.base_remote),
            ("git.push_remote", &self.git.push_remote),
            ("package_manager.program", &self.package_manager.program),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: field.into(),
                    detail: "must not be empty".into(),
                });
            }
        }
        if self.files.manifest == self.files.lockfile {
            return Err(ConfigError::InvalidValue {
                field: "files.lockfile".into(),
                detail: "lockfile and manifest names must differ".into(),
            });
        }

        Ok(())
    }

    /// Convenience: load (or default), resolve, and validate in one call.
    pub fn load_and_resolve(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = Self::load_or_default(path)?;
        config.resolve_env_vars()?;
        config.validate()?;
        Ok(config)
    }

    /// Generate a default TOML config template string.
    pub fn default_template() -> &'static str {
        r#"# pkgmend configuration
# Every key is optional; the values below are the built-in defaults.

[github]
api_url = "https://api.github.com"
git_base_url = "https://github.com"
# repo = "owner/repo"        # defaults to $GITHUB_REPOSITORY
token_env = "GITHUB_TOKEN"
mergeable_max_attempts = 15
mergeable_poll_delay_ms = 2000
comment_on_success = true

[git]
base_remote = "base"
push_remote = "origin"
user_name = "github-actions[bot]"
user_email = "github-actions[bot]@users.noreply.github.com"
skip_hooks_env = "SKIP_HUSKY"
disable_hooks = true

[files]
manifest = "package.json"
lockfile = "package-lock.json"
changelog = "CHANGELOG.md"

[package_manager]
program = "npm"
lockfile_args = ["install", "--package-lock-only", "--ignore-scripts", "--no-audit"]
cache_dir = "node_modules"
default_workspaces = ["packages/*"]

[logging]
level = "info"
"#
    }
}

/// Split `owner/repo` into its two non-empty halves.
pub fn split_repo(full_name: &str) -> Option<(&str, &str)> {
    let (owner, repo) = full_name.split_once('/')?;
    if owner.is_empty() || repo.is_empty() || repo.contains('/') {
        return None;
    }
    Some((owner, repo))
}

/// Try to read an environment variable by name. Returns `Some(value)` on
/// success; logs a warning and returns `None` if the variable is unset.
fn resolve_optional_env(env_name: &str, field: &str) -> Option<String> {
    match std::env::var(env_name) {
        Ok(val) if !val.is_empty() => {
            debug!(field, env_name, "resolved env var");
            Some(val)
        }
        Ok(_) => {
            warn!(field, env_name, "env var is set but empty");
            None
        }
        Err(_) => {
            warn!(field, env_name, "env var not set");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample_toml() -> &'static str {
        r#"
[github]
repo = "acme/web"
token_env = "ACME_TOKEN"
mergeable_max_attempts = 3
mergeable_poll_delay_ms = 10
comment_on_success = false

[git]
user_name = "resolver-bot"
user_email = "bot@acme.test"

[files]
manifest = "package.json"
lockfile = "npm-shrinkwrap.json"

[package_manager]
program = "pnpm"
lockfile_args = ["install", "--lockfile-only"]

[logging]
level = "debug"
"#
    }

    #[test]
    fn test_parse_full_config() {
        let config: AppConfig = toml::from_str(sample_toml()).expect("failed to parse toml");
        assert_eq!(config.github.repo.as_deref(), Some("acme/web"));
        assert_eq!(config.github.mergeable_max_attempts, 3);
        assert!(!config.github.comment_on_success);
        assert_eq!(config.git.user_name, "resolver-bot");
        assert_eq!(config.git.base_remote, "base");
        assert_eq!(config.files.lockfile, "npm-shrinkwrap.json");
        assert_eq!(config.files.changelog, "CHANGELOG.md");
        assert_eq!(config.package_manager.program, "pnpm");
        assert_eq!(config.package_manager.cache_dir, "node_modules");
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_defaults_from_empty_file() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert_eq!(config.github.api_url, "https://api.github.com");
        assert_eq!(config.github.token_env, "GITHUB_TOKEN");
        assert_eq!(config.github.mergeable_max_attempts, 15);
        assert_eq!(config.github.mergeable_poll_delay_ms, 2000);
        assert_eq!(config.git.push_remote, "origin");
        assert_eq!(config.git.skip_hooks_env, "SKIP_HUSKY");
        assert!(config.git.disable_hooks);
        assert_eq!(config.files, FilesConfig::default());
        assert_eq!(
            config.package_manager.lockfile_args,
            vec!["install", "--package-lock-only", "--ignore-scripts", "--no-audit"]
        );
        assert_eq!(config.package_manager.default_workspaces, vec!["packages/*"]);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pkgmend.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(sample_toml().as_bytes()).unwrap();

        let config = AppConfig::load_from_file(&path).expect("load_from_file failed");
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_file_not_found() {
        let result = AppConfig::load_from_file("/nonexistent/pkgmend.toml");
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_parse_error_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "[github\nrepo = ").unwrap();
        let result = AppConfig::load_from_file(&path);
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_validate_rejects_bad_repo_format() {
        let mut config = AppConfig::default();
        config.github.repo = Some("noslash".into());
        let result = config.validate();
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "github.repo"
        ));
    }

    #[test]
    fn test_validate_rejects_empty_file_name_and_zero_attempts() {
        let mut config = AppConfig::default();
        config.files.changelog = "  ".into();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "files.changelog"
        ));

        let mut config = AppConfig::default();
        config.github.mergeable_max_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.files.lockfile = config.files.manifest.clone();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_resolve_env_vars() {
        std::env::set_var("PKGMEND_TEST_TOKEN", "ghp_abc");

        let mut config: AppConfig = toml::from_str(
            r#"
[github]
repo = "acme/web"
token_env = "PKGMEND_TEST_TOKEN"
"#,
        )
        .unwrap();
        config.resolve_env_vars().unwrap();

        assert_eq!(config.require_token().unwrap(), "ghp_abc");
        assert_eq!(config.require_repo().unwrap(), ("acme", "web"));

        std::env::remove_var("PKGMEND_TEST_TOKEN");
    }

    #[test]
    fn test_require_token_reports_variable() {
        let mut config = AppConfig::default();
        config.github.token_env = "PKGMEND_TEST_UNSET_TOKEN".into();
        config.resolve_env_vars().unwrap();
        match config.require_token() {
            Err(ConfigError::EnvVarMissing { var, .. }) => {
                assert_eq!(var, "PKGMEND_TEST_UNSET_TOKEN")
            }
            other => panic!("expected EnvVarMissing, got {other:?}"),
        }
    }

    #[test]
    fn test_split_repo_and_clone_url() {
        assert_eq!(split_repo("acme/web"), Some(("acme", "web")));
        assert_eq!(split_repo("/web"), None);
        assert_eq!(split_repo("a/b/c"), None);

        let gh = GitHubConfig {
            git_base_url: "https://github.example.com/".into(),
            ..GitHubConfig::default()
        };
        assert_eq!(gh.clone_url("acme/web"), "https://github.example.com/acme/web.git");
    }

    #[test]
    fn test_default_template_is_valid() {
        let config: AppConfig = toml::from_str(AppConfig::default_template())
            .expect("default template should be valid TOML");
        config.validate().unwrap();
        assert_eq!(config.files, FilesConfig::default());
        assert_eq!(config.github.mergeable_max_attempts, 15);
    }
}
