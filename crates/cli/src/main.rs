//! pkgmend command-line tool.
//!
//! Resolves the package.json / package-lock.json / CHANGELOG.md conflicts
//! that publishing leaves on open pull requests, and exposes the manifest
//! merge and version ordering as standalone subcommands.

mod runner;
mod style;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use comfy_table::{presets::UTF8_FULL, Cell, ContentArrangement, Table};
use tracing_subscriber::EnvFilter;

use pkgmend_core::config::AppConfig;
use pkgmend_core::discovery::EventOverrides;
use pkgmend_core::git::{OURS_STAGE, THEIRS_STAGE};
use pkgmend_core::manifest::{self, DependencyManifest, MergeOutcome};
use pkgmend_core::{ProcessRunner, WorkingTreeContext};

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// Auto-resolve publishing conflicts on pull request branches.
#[derive(Parser, Debug)]
#[command(
    name = "pkgmend",
    version,
    about = "Resolve package.json, package-lock.json and CHANGELOG.md merge conflicts"
)]
struct Cli {
    /// Path to the TOML configuration file (built-in defaults when omitted).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level; `RUST_LOG` takes precedence.
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Merge the base branch into the selected PRs and resolve conflicts.
    Resolve {
        /// Repository checkout to work in.
        #[arg(long, default_value = ".")]
        workdir: PathBuf,

        /// Event name; defaults to $GITHUB_EVENT_NAME.
        #[arg(long)]
        event: Option<String>,

        /// workflow_dispatch mode: single or all.
        #[arg(long)]
        mode: Option<String>,

        /// PR number to process.
        #[arg(long)]
        pr: Option<u64>,

        /// Base branch whose open PRs are processed.
        #[arg(long)]
        base_branch: Option<String>,

        /// Do not comment on resolved PRs.
        #[arg(long)]
        no_comment: bool,
    },

    /// Merge a conflicted manifest.
    ///
    /// Reads both sides from merge stages 2 and 3 of the current merge, or
    /// from files when --ours and --theirs are given.
    MergeManifest {
        /// Repository-relative manifest path.
        #[arg(default_value = "package.json")]
        path: String,

        /// Change-branch side as a file.
        #[arg(long, requires = "theirs")]
        ours: Option<PathBuf>,

        /// Base-branch side as a file.
        #[arg(long, requires = "ours")]
        theirs: Option<PathBuf>,

        /// Write the result here instead of `path`.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Repository checkout to work in.
        #[arg(long, default_value = ".")]
        workdir: PathBuf,
    },

    /// Compare two version strings.
    Compare {
        a: String,
        b: String,
    },

    /// Generate a default configuration file.
    Init {
        /// Output path for the generated config file.
        #[arg(short, long, default_value = "./pkgmend.toml")]
        output: PathBuf,
    },

    /// Validate a configuration file.
    Validate,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", style::error(&format!("{e:#}")));
            ExitCode::FAILURE
        }
    }
}

/// `RUST_LOG` wins, then `--log-level`, then `logging.level` from the
/// config file.
fn init_logging(cli: &Cli) {
    let level = cli.log_level.clone().unwrap_or_else(|| {
        cli.config
            .as_deref()
            .and_then(|p| AppConfig::load_from_file(p).ok())
            .map(|c| c.logging.level)
            .unwrap_or_else(|| "info".to_string())
    });
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Init { output } => cmd_init(&output),
        Commands::Validate => cmd_validate(cli.config.as_deref()),
        Commands::Compare { a, b } => {
            cmd_compare(&a, &b);
            Ok(())
        }
        Commands::MergeManifest {
            path,
            ours,
            theirs,
            output,
            workdir,
        } => {
            let config = load_config(cli.config.as_deref())?;
            cmd_merge_manifest(&config, &workdir, &path, ours.zip(theirs), output)
        }
        Commands::Resolve {
            workdir,
            event,
            mode,
            pr,
            base_branch,
            no_comment,
        } => {
            let config = load_config(cli.config.as_deref())?;
            let options = runner::ResolveOptions {
                workdir,
                overrides: EventOverrides {
                    event_name: event,
                    mode,
                    pr_number: pr,
                    base_branch,
                },
                comment: !no_comment,
            };
            let summary = runner::run_resolve(config, options).await?;
            runner::print_summary(&summary);
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// Config helpers
// ---------------------------------------------------------------------------

fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    AppConfig::load_and_resolve(path).context("failed to load configuration")
}

// ---------------------------------------------------------------------------
// Subcommand implementations
// ---------------------------------------------------------------------------

fn cmd_init(output: &Path) -> Result<()> {
    if output.exists() {
        anyhow::bail!(
            "file already exists: {}. Use a different path or remove the existing file.",
            output.display()
        );
    }

    std::fs::write(output, AppConfig::default_template()).context("failed to write config file")?;

    println!("{}", style::success(&format!("Default configuration written to {}", output.display())));
    println!();
    println!("Next steps:");
    println!("  1. Set github.repo or export GITHUB_REPOSITORY");
    println!("  2. Export the token variable named by github.token_env (GITHUB_TOKEN)");
    println!("  3. Validate with: pkgmend validate --config {}", output.display());

    Ok(())
}

fn cmd_validate(config_path: Option<&Path>) -> Result<()> {
    let Some(config_path) = config_path else {
        anyhow::bail!("no configuration file given; pass --config <path>");
    };
    println!("Validating configuration: {}", config_path.display());
    println!();

    let mut config =
        AppConfig::load_from_file(config_path).context("failed to parse configuration")?;
    println!("  [OK] TOML structure is valid");

    config
        .resolve_env_vars()
        .context("failed to resolve environment variables")?;
    println!("  [OK] Environment variable references processed");

    match config.validate() {
        Ok(()) => println!("  [OK] All required fields are valid"),
        Err(e) => {
            println!("  [FAIL] Validation error: {e}");
            anyhow::bail!("configuration validation failed");
        }
    }

    let set = |present: bool| if present { "set" } else { "NOT SET" };
    println!();
    println!("Configuration summary:");
    println!(
        "  GitHub repo     : {}",
        config.github.repo.as_deref().unwrap_or("NOT SET")
    );
    println!("  GitHub token    : {}", set(config.github.token.is_some()));
    println!("  Base remote     : {}", config.git.base_remote);
    println!("  Commit identity : {} <{}>", config.git.user_name, config.git.user_email);
    println!(
        "  Files           : {}, {}, {}",
        config.files.manifest, config.files.lockfile, config.files.changelog
    );
    println!(
        "  Package manager : {} {}",
        config.package_manager.program,
        config.package_manager.lockfile_args.join(" ")
    );
    println!();
    println!("{}", style::success("Configuration is valid."));

    Ok(())
}

fn cmd_compare(a: &str, b: &str) {
    let symbol = match manifest::compare(a, b) {
        std::cmp::Ordering::Greater => ">",
        std::cmp::Ordering::Less => "<",
        std::cmp::Ordering::Equal => "=",
    };
    println!("{a} {symbol} {b}");
    println!("preferred: {}", manifest::select_latest(a, b));
}

fn cmd_merge_manifest(
    config: &AppConfig,
    workdir: &Path,
    path: &str,
    files: Option<(PathBuf, PathBuf)>,
    output: Option<PathBuf>,
) -> Result<()> {
    let ctx = WorkingTreeContext::new(ProcessRunner::new(workdir), workdir, config.git.clone());

    let outcome = match files {
        Some((ours, theirs)) => {
            let ours = DependencyManifest::read_from(&ours).context("failed to read --ours")?;
            let theirs =
                DependencyManifest::read_from(&theirs).context("failed to read --theirs")?;
            manifest::merge(&ours, &theirs)?
        }
        None => {
            let read = |stage| -> Result<Option<DependencyManifest>> {
                match ctx.show_stage(stage, path)? {
                    Some(text) => Ok(Some(DependencyManifest::parse(path, &text)?)),
                    None => Ok(None),
                }
            };
            manifest::merge_sides(path, read(OURS_STAGE)?, read(THEIRS_STAGE)?)?
        }
    };

    let target = output.unwrap_or_else(|| ctx.path(path));
    outcome
        .manifest
        .write_to(&target)
        .with_context(|| format!("failed to write {}", target.display()))?;

    print_decisions(&outcome);
    println!("{}", style::success(&format!("Merged manifest written to {}", target.display())));
    Ok(())
}

fn print_decisions(outcome: &MergeOutcome) {
    if outcome.decisions.is_empty() {
        println!("{}", style::dim("Both sides agree on every version."));
        return;
    }

    println!("{}", style::header("Version decisions"));
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Field", "PR", "Base", "Chosen"]);
    for d in &outcome.decisions {
        table.add_row(vec![
            Cell::new(&d.field),
            Cell::new(&d.ours),
            Cell::new(&d.theirs),
            Cell::new(&d.chosen),
        ]);
    }
    println!("{table}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_resolve_overrides() {
        let cli = Cli::parse_from([
            "pkgmend", "resolve", "--event", "workflow_dispatch", "--mode", "single", "--pr", "12",
            "--no-comment",
        ]);
        match cli.command {
            Commands::Resolve {
                event,
                mode,
                pr,
                no_comment,
                ..
            } => {
                assert_eq!(event.as_deref(), Some("workflow_dispatch"));
                assert_eq!(mode.as_deref(), Some("single"));
                assert_eq!(pr, Some(12));
                assert!(no_comment);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_merge_manifest_from_files() {
        let dir = tempfile::tempdir().unwrap();
        let ours = dir.path().join("ours.json");
        let theirs = dir.path().join("theirs.json");
        let out = dir.path().join("merged.json");
        std::fs::write(&ours, r#"{"name":"a","dependencies":{"lodash":"^4.17.20"}}"#).unwrap();
        std::fs::write(&theirs, r#"{"name":"a","dependencies":{"lodash":"^4.17.21"}}"#).unwrap();

        cmd_merge_manifest(
            &AppConfig::default(),
            dir.path(),
            "package.json",
            Some((ours, theirs)),
            Some(out.clone()),
        )
        .unwrap();

        let merged = DependencyManifest::read_from(&out).unwrap();
        let deps = merged
            .block(pkgmend_core::manifest::DependencyBlock::Dependencies)
            .unwrap()
            .unwrap();
        assert_eq!(deps["lodash"], "^4.17.21");
    }

    #[test]
    fn test_init_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pkgmend.toml");
        cmd_init(&path).unwrap();
        assert!(AppConfig::load_from_file(&path).is_ok());
        assert!(cmd_init(&path).is_err());
    }
}
