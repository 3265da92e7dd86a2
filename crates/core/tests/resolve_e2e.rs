//! End-to-end tests for branch resolution against real git repositories.
//!
//! Each test builds a bare "origin" repository with git2, clones it, and
//! runs the `MergeOrchestrator` with a real `ProcessRunner`:
//! - the base remote URL points at the same bare repository on disk
//! - the package manager is replaced by a harmless `git --version`
//!
//! Tests skip gracefully if `git` is not installed.

use std::collections::BTreeMap;
use std::path::Path;
use std::process::Command;

use git2::{Commit, Oid, Repository, Signature};
use tempfile::TempDir;

use pkgmend_core::config::AppConfig;
use pkgmend_core::errors::ResolveError;
use pkgmend_core::manifest::{DependencyBlock, DependencyManifest};
use pkgmend_core::models::ChangeRef;
use pkgmend_core::{MergeOrchestrator, ProcessRunner, ResolutionOutcome, WorkingTreeContext};

// ===========================================================================
// Helpers
// ===========================================================================

fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Write a tree holding `files`; paths may contain `/`.
fn write_tree(repo: &Repository, files: &[(&str, &str)]) -> Oid {
    let mut builder = repo.treebuilder(None).unwrap();
    let mut dirs: BTreeMap<&str, Vec<(&str, &str)>> = BTreeMap::new();
    for &(path, content) in files {
        match path.split_once('/') {
            Some((dir, rest)) => dirs.entry(dir).or_default().push((rest, content)),
            None => {
                let blob = repo.blob(content.as_bytes()).unwrap();
                builder.insert(path, blob, 0o100644).unwrap();
            }
        }
    }
    for (dir, entries) in dirs {
        let subtree = write_tree(repo, &entries);
        builder.insert(dir, subtree, 0o040000).unwrap();
    }
    builder.write().unwrap()
}

/// Commit a set of files onto `refname` directly in a bare repo.
fn commit_files(repo: &Repository, refname: &str, parents: &[Oid], files: &[(&str, &str)]) -> Oid {
    let sig = Signature::now("Fixture", "fixture@example.com").unwrap();
    let tree = repo.find_tree(write_tree(repo, files)).unwrap();
    let parents: Vec<Commit> = parents.iter().map(|p| repo.find_commit(*p).unwrap()).collect();
    let parent_refs: Vec<&Commit> = parents.iter().collect();
    repo.commit(Some(refname), &sig, &sig, "fixture", &tree, &parent_refs)
        .unwrap()
}

fn blob_at(repo: &Repository, commit: Oid, path: &str) -> String {
    let tree = repo.find_commit(commit).unwrap().tree().unwrap();
    let entry = tree.get_path(Path::new(path)).unwrap();
    let blob = entry.to_object(repo).unwrap().peel_to_blob().unwrap();
    String::from_utf8(blob.content().to_vec()).unwrap()
}

fn manifest(version: &str, deps: &[(&str, &str)]) -> String {
    let deps: serde_json::Map<String, serde_json::Value> = deps
        .iter()
        .map(|(k, v)| (k.to_string(), serde_json::Value::String(v.to_string())))
        .collect();
    let doc = serde_json::json!({
        "name": "web",
        "version": version,
        "dependencies": deps,
    });
    format!("{}\n", serde_json::to_string_pretty(&doc).unwrap())
}

/// A bare origin at `<base>/acme/web.git`, plus a clone to work in.
struct Fixture {
    _tmp: TempDir,
    base_url: String,
    origin: Repository,
    workdir: std::path::PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let base = tmp.path().join("remotes");
        let origin_path = base.join("acme/web.git");
        std::fs::create_dir_all(&origin_path).unwrap();
        let origin = Repository::init_bare(&origin_path).unwrap();
        Self {
            base_url: base.display().to_string(),
            workdir: tmp.path().join("work"),
            _tmp: tmp,
            origin,
        }
    }

    fn clone(&self) {
        Repository::clone(
            self.origin.path().to_str().unwrap(),
            &self.workdir,
        )
        .unwrap();
    }

    fn config(&self) -> AppConfig {
        let mut config = AppConfig::default();
        config.github.git_base_url = self.base_url.clone();
        config.package_manager.program = "git".into();
        config.package_manager.lockfile_args = vec!["--version".into()];
        config
    }

    fn resolve(&self, config: &AppConfig) -> Result<ResolutionOutcome, ResolveError> {
        let ctx = WorkingTreeContext::new(
            ProcessRunner::new(&self.workdir),
            &self.workdir,
            config.git.clone(),
        );
        MergeOrchestrator::new(ctx, config).resolve(&change())
    }

    fn branch_tip(&self, branch: &str) -> Oid {
        self.origin
            .find_reference(&format!("refs/heads/{branch}"))
            .unwrap()
            .target()
            .unwrap()
    }

    fn merge_in_progress(&self) -> bool {
        Path::new(&self.workdir).join(".git/MERGE_HEAD").exists()
    }
}

fn change() -> ChangeRef {
    ChangeRef {
        number: Some(1),
        branch: "feature/x".into(),
        source_repo: "acme/web".into(),
        target_branch: "main".into(),
        pushable: true,
        url: String::new(),
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[test]
fn test_conflicted_manifest_and_changelog_are_resolved_and_pushed() {
    if !git_available() {
        eprintln!("skipping: git not installed");
        return;
    }
    let fx = Fixture::new();
    let base_manifest = manifest("1.0.0", &[("lodash", "^4.17.0")]);
    let main_manifest = manifest("1.1.0", &[("lodash", "^4.17.21")]);
    let feature_manifest = manifest("1.0.1", &[("lodash", "^4.17.20"), ("react", "^18.2.0")]);

    let root = commit_files(
        &fx.origin,
        "refs/heads/main",
        &[],
        &[("package.json", base_manifest.as_str()), ("CHANGELOG.md", "# Changelog\n")],
    );
    let main_tip = commit_files(
        &fx.origin,
        "refs/heads/main",
        &[root],
        &[
            ("package.json", main_manifest.as_str()),
            ("CHANGELOG.md", "# Changelog\n\n## 1.1.0\n"),
        ],
    );
    let feature_tip = commit_files(
        &fx.origin,
        "refs/heads/feature/x",
        &[root],
        &[
            ("package.json", feature_manifest.as_str()),
            ("CHANGELOG.md", "# Changelog\n\n## unreleased\n"),
        ],
    );
    fx.origin.set_head("refs/heads/main").unwrap();
    fx.clone();

    let outcome = fx.resolve(&fx.config()).unwrap();

    let ResolutionOutcome::Committed(summary) = outcome else {
        panic!("expected a committed resolution, got {outcome:?}");
    };
    assert!(summary.files.contains(&"package.json".to_string()));
    assert!(summary.files.contains(&"CHANGELOG.md".to_string()));

    let pushed = fx.branch_tip("feature/x");
    assert_eq!(pushed.to_string(), summary.commit);
    let commit = fx.origin.find_commit(pushed).unwrap();
    assert_eq!(commit.parent_count(), 2);
    assert_eq!(commit.parent_id(0).unwrap(), feature_tip);
    assert_eq!(commit.parent_id(1).unwrap(), main_tip);
    assert_eq!(commit.author().name(), Some("github-actions[bot]"));

    let merged =
        DependencyManifest::parse("package.json", &blob_at(&fx.origin, pushed, "package.json"))
            .unwrap();
    assert_eq!(merged.version(), Some("1.1.0"));
    let deps = merged.block(DependencyBlock::Dependencies).unwrap().unwrap();
    assert_eq!(deps["lodash"], "^4.17.21");
    assert_eq!(deps["react"], "^18.2.0");

    assert_eq!(
        blob_at(&fx.origin, pushed, "CHANGELOG.md"),
        "# Changelog\n\n## 1.1.0\n"
    );
    assert!(!fx.merge_in_progress());

    let hooks = Command::new("git")
        .args(["config", "--local", "--get", "core.hooksPath"])
        .current_dir(&fx.workdir)
        .output()
        .unwrap();
    assert!(!hooks.status.success(), "hooks override must not persist");
}

#[test]
fn test_clean_merge_leaves_branch_untouched() {
    if !git_available() {
        eprintln!("skipping: git not installed");
        return;
    }
    let fx = Fixture::new();
    let pkg = manifest("1.0.0", &[]);
    let root = commit_files(
        &fx.origin,
        "refs/heads/main",
        &[],
        &[("package.json", pkg.as_str()), ("README.md", "hello\n")],
    );
    commit_files(
        &fx.origin,
        "refs/heads/main",
        &[root],
        &[("package.json", pkg.as_str()), ("README.md", "hello world\n")],
    );
    let feature_tip = commit_files(
        &fx.origin,
        "refs/heads/feature/x",
        &[root],
        &[
            ("package.json", pkg.as_str()),
            ("README.md", "hello\n"),
            ("NOTES.md", "n\n"),
        ],
    );
    fx.origin.set_head("refs/heads/main").unwrap();
    fx.clone();

    let outcome = fx.resolve(&fx.config()).unwrap();

    assert_eq!(outcome, ResolutionOutcome::NoConflict);
    assert_eq!(fx.branch_tip("feature/x"), feature_tip);
    assert!(!fx.merge_in_progress());
}

#[test]
fn test_unsupported_conflict_is_aborted() {
    if !git_available() {
        eprintln!("skipping: git not installed");
        return;
    }
    let fx = Fixture::new();
    let root = commit_files(&fx.origin, "refs/heads/main", &[], &[("docs.txt", "a\n")]);
    commit_files(&fx.origin, "refs/heads/main", &[root], &[("docs.txt", "b\n")]);
    let feature_tip =
        commit_files(&fx.origin, "refs/heads/feature/x", &[root], &[("docs.txt", "c\n")]);
    fx.origin.set_head("refs/heads/main").unwrap();
    fx.clone();

    let err = fx.resolve(&fx.config()).unwrap_err();

    assert!(matches!(err, ResolveError::UnsupportedFile(ref p) if p == "docs.txt"));
    assert_eq!(fx.branch_tip("feature/x"), feature_tip);
    assert!(!fx.merge_in_progress());
}

#[test]
fn test_manifest_under_non_ascii_directory_is_merged() {
    if !git_available() {
        eprintln!("skipping: git not installed");
        return;
    }
    let fx = Fixture::new();
    let root_manifest = manifest("1.0.0", &[]);
    let base = manifest("0.1.0", &[("lodash", "^4.17.0")]);
    let main = manifest("0.2.0", &[("lodash", "^4.17.21")]);
    let feature = manifest("0.1.1", &[("lodash", "^4.17.0"), ("zod", "^3.22.0")]);
    let nested = "packages/ü/package.json";

    let root = commit_files(
        &fx.origin,
        "refs/heads/main",
        &[],
        &[("package.json", root_manifest.as_str()), (nested, base.as_str())],
    );
    commit_files(
        &fx.origin,
        "refs/heads/main",
        &[root],
        &[("package.json", root_manifest.as_str()), (nested, main.as_str())],
    );
    commit_files(
        &fx.origin,
        "refs/heads/feature/x",
        &[root],
        &[("package.json", root_manifest.as_str()), (nested, feature.as_str())],
    );
    fx.origin.set_head("refs/heads/main").unwrap();
    fx.clone();

    let outcome = fx.resolve(&fx.config()).unwrap();

    let ResolutionOutcome::Committed(summary) = outcome else {
        panic!("expected a committed resolution, got {outcome:?}");
    };
    assert!(summary.files.iter().any(|f| f == nested), "files: {:?}", summary.files);

    let pushed = fx.branch_tip("feature/x");
    let merged = DependencyManifest::parse(nested, &blob_at(&fx.origin, pushed, nested)).unwrap();
    assert_eq!(merged.version(), Some("0.2.0"));
    let deps = merged.block(DependencyBlock::Dependencies).unwrap().unwrap();
    assert_eq!(deps["lodash"], "^4.17.21");
    assert_eq!(deps["zod"], "^3.22.0");
    assert!(!fx.merge_in_progress());
}
