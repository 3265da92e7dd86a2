//! Lockfile regeneration.
//!
//! Lockfiles are never merged by content. After the manifests are resolved,
//! each conflicted lockfile is deleted and rebuilt by the package manager in
//! lockfile-only mode, with installed-dependency caches cleared first so
//! stale transitive resolutions cannot leak into the new lockfile.

use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument, warn};

use crate::command::{CommandRunner, CommandSpec};
use crate::config::{FilesConfig, PackageManagerConfig};
use crate::conflict::{ConflictClassifier, ConflictKind, ConflictSet};
use crate::errors::LockfileError;
use crate::git::WorkingTreeContext;
use crate::manifest::DependencyManifest;

/// Depth limit when expanding `**` workspace globs.
const MAX_WORKSPACE_DEPTH: usize = 5;

/// What a regeneration pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegenerationReport {
    /// Conflicted lockfiles rebuilt.
    pub regenerated: Vec<String>,
    /// Whether the best-effort root lockfile rebuild succeeded.
    pub root_regenerated: bool,
}

/// Rebuilds lockfiles inside one working tree.
pub struct LockfileRegenerator<'a, R> {
    ctx: &'a WorkingTreeContext<R>,
    files: &'a FilesConfig,
    package_manager: &'a PackageManagerConfig,
}

impl<'a, R: CommandRunner> LockfileRegenerator<'a, R> {
    pub fn new(
        ctx: &'a WorkingTreeContext<R>,
        files: &'a FilesConfig,
        package_manager: &'a PackageManagerConfig,
    ) -> Self {
        Self {
            ctx,
            files,
            package_manager,
        }
    }

    /// Regenerate every conflicted lockfile, plus the root lockfile when a
    /// root manifest conflicted without a lockfile conflict.
    pub fn regenerate_for(
        &self,
        conflicts: &ConflictSet,
        classifier: &ConflictClassifier,
    ) -> Result<RegenerationReport, LockfileError> {
        let mut report = RegenerationReport::default();
        if !conflicts.needs_regeneration() {
            return Ok(report);
        }

        for lockfile in conflicts.of_kind(ConflictKind::Lockfile) {
            self.regenerate(lockfile)?;
            report.regenerated.push(lockfile.to_string());
        }

        if conflicts.has_manifest_conflict() && !conflicts.has_lockfile_conflict() {
            if let Some(root) = conflicts
                .of_kind(ConflictKind::Manifest)
                .find(|p| classifier.is_root_manifest(p))
            {
                report.root_regenerated = self.regenerate_root(root);
            }
        }

        Ok(report)
    }

    /// Delete and rebuild one lockfile from its sibling manifest.
    ///
    /// Fails without touching the lockfile when the sibling manifest is
    /// missing or not valid JSON. A failed install removes any partially
    /// written lockfile.
    #[instrument(skip(self))]
    pub fn regenerate(&self, lockfile: &str) -> Result<(), LockfileError> {
        info!("generating fresh {lockfile}");

        let package_dir = parent_dir(lockfile);
        let manifest_rel = package_dir.join(&self.files.manifest);
        let manifest_abs = self.ctx.path(&manifest_rel);
        let lockfile_abs = self.ctx.path(lockfile);

        if !manifest_abs.is_file() {
            return Err(LockfileError::ManifestMissing {
                lockfile: lockfile.to_string(),
                manifest: manifest_rel.display().to_string(),
            });
        }
        if let Err(e) = DependencyManifest::read_from(&manifest_abs) {
            return Err(LockfileError::ManifestInvalid {
                path: manifest_rel.display().to_string(),
                detail: e.to_string(),
            });
        }

        if lockfile_abs.exists() {
            if let Err(e) = std::fs::remove_file(&lockfile_abs) {
                warn!(error = %e, "could not remove existing {lockfile}, continuing");
            }
        }

        self.clear_caches(&package_dir);
        self.ctx.add_tolerant(&manifest_rel.display().to_string());

        if let Err(detail) = self.install(&package_dir) {
            if lockfile_abs.exists() {
                if let Err(e) = std::fs::remove_file(&lockfile_abs) {
                    warn!(error = %e, "could not clean up partial {lockfile}");
                }
            }
            return Err(LockfileError::InstallFailed {
                lockfile: lockfile.to_string(),
                detail,
            });
        }

        info!("generated fresh {lockfile} from {}", manifest_rel.display());
        Ok(())
    }

    /// Rebuild the root lockfile in place. Failure is logged, not returned.
    #[instrument(skip(self))]
    pub fn regenerate_root(&self, root_manifest: &str) -> bool {
        info!("regenerating root {} to match resolved {root_manifest}", self.files.lockfile);
        self.ctx.add_tolerant(root_manifest);
        self.clear_caches(Path::new(""));

        match self.install(Path::new("")) {
            Ok(()) => {
                info!("regenerated root {}", self.files.lockfile);
                true
            }
            Err(detail) => {
                warn!("could not regenerate root {}: {detail}; continuing", self.files.lockfile);
                false
            }
        }
    }

    fn install(&self, package_dir: &Path) -> Result<(), String> {
        let pm = self.package_manager;
        let spec = CommandSpec::new(pm.program.clone(), pm.lockfile_args.iter().cloned())
            .cwd(self.ctx.path(package_dir))
            .label(pm.program.clone());
        match self.ctx.exec(spec) {
            Ok(out) if out.success() => Ok(()),
            Ok(out) => Err(format!(
                "{} exited with code {}: {}",
                pm.program,
                out.exit_code(),
                out.stderr.trim()
            )),
            Err(e) => Err(e.to_string()),
        }
    }

    /// Remove the cache directory of `package_dir` and of every workspace
    /// package. Failures are warnings.
    fn clear_caches(&self, package_dir: &Path) {
        let mut dirs = vec![self.ctx.path(package_dir)];
        dirs.extend(self.workspace_dirs());
        for dir in dirs {
            let cache = dir.join(&self.package_manager.cache_dir);
            if !cache.exists() {
                continue;
            }
            match std::fs::remove_dir_all(&cache) {
                Ok(()) => debug!(path = %cache.display(), "cleared dependency cache"),
                Err(e) => warn!(path = %cache.display(), error = %e, "could not clear dependency cache"),
            }
        }
    }

    /// Directories matched by the root manifest's `workspaces` globs, or by
    /// the configured defaults when it declares none.
    pub fn workspace_dirs(&self) -> Vec<PathBuf> {
        let root_manifest = self.ctx.path(&self.files.manifest);
        let mut patterns = DependencyManifest::read_from(&root_manifest)
            .map(|m| m.workspaces())
            .unwrap_or_default();
        if patterns.is_empty() {
            patterns = self.package_manager.default_workspaces.clone();
        }

        let patterns: Vec<String> = patterns
            .iter()
            .map(|p| p.trim_start_matches("./").trim_end_matches('/').to_string())
            .filter(|p| !p.is_empty())
            .collect();
        let depth = patterns
            .iter()
            .map(|p| {
                if p.contains("**") {
                    MAX_WORKSPACE_DEPTH
                } else {
                    p.split('/').count()
                }
            })
            .max()
            .unwrap_or(0);

        let mut candidates = Vec::new();
        self.walk(self.ctx.root(), "", depth, &mut candidates);

        candidates
            .into_iter()
            .filter(|rel| patterns.iter().any(|p| glob_match::glob_match(p, rel)))
            .map(|rel| self.ctx.path(rel))
            .collect()
    }

    fn walk(&self, dir: &Path, rel: &str, depth: usize, out: &mut Vec<String>) {
        if depth == 0 {
            return;
        }
        let Ok(entries) = std::fs::read_dir(dir) else {
            return;
        };
        for entry in entries.flatten() {
            if !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if name == ".git" || name == self.package_manager.cache_dir {
                continue;
            }
            let child_rel = if rel.is_empty() {
                name
            } else {
                format!("{rel}/{name}")
            };
            self.walk(&entry.path(), &child_rel, depth - 1, out);
            out.push(child_rel);
        }
    }
}

/// Directory part of a repository-relative path; empty for the root.
fn parent_dir(path: &str) -> PathBuf {
    Path::new(path)
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::fs;

    use super::*;
    use crate::command::fake::{fail, ScriptedRunner};
    use crate::command::CommandOutput;
    use crate::config::GitConfig;

    fn setup() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::write(root.join("package.json"), r#"{"name":"root","workspaces":["packages/*"]}"#).unwrap();
        fs::write(root.join("package-lock.json"), "<<<<<<< conflicted").unwrap();
        fs::create_dir_all(root.join("node_modules/left-pad")).unwrap();
        fs::create_dir_all(root.join("packages/ui/node_modules/react")).unwrap();
        fs::write(root.join("packages/ui/package.json"), r#"{"name":"ui"}"#).unwrap();
        fs::create_dir_all(root.join("docs/node_modules")).unwrap();
        dir
    }

    fn regen<'a, R: CommandRunner>(
        ctx: &'a WorkingTreeContext<R>,
        files: &'a FilesConfig,
        pm: &'a PackageManagerConfig,
    ) -> LockfileRegenerator<'a, R> {
        LockfileRegenerator::new(ctx, files, pm)
    }

    #[test]
    fn test_regenerate_clears_state_and_runs_install() {
        let dir = setup();
        let runner = ScriptedRunner::new();
        let ctx = WorkingTreeContext::new(&runner, dir.path(), GitConfig::default());
        let files = FilesConfig::default();
        let pm = PackageManagerConfig::default();

        regen(&ctx, &files, &pm).regenerate("package-lock.json").unwrap();

        assert!(!dir.path().join("package-lock.json").exists());
        assert!(!dir.path().join("node_modules").exists());
        assert!(!dir.path().join("packages/ui/node_modules").exists());
        assert!(dir.path().join("docs/node_modules").exists(), "non-workspace dirs untouched");

        let specs = runner.specs();
        assert_eq!(specs[0].display(), "git add -- package.json");
        assert_eq!(
            specs[1].display(),
            "npm install --package-lock-only --ignore-scripts --no-audit"
        );
        assert_eq!(specs[1].cwd.as_deref(), Some(dir.path()));
    }

    #[test]
    fn test_nested_lockfile_runs_in_package_dir() {
        let dir = setup();
        fs::write(dir.path().join("packages/ui/package-lock.json"), "{}").unwrap();
        let runner = ScriptedRunner::new();
        let ctx = WorkingTreeContext::new(&runner, dir.path(), GitConfig::default());
        let files = FilesConfig::default();
        let pm = PackageManagerConfig::default();

        regen(&ctx, &files, &pm)
            .regenerate("packages/ui/package-lock.json")
            .unwrap();

        let install = runner.specs().into_iter().find(|s| s.program == "npm").unwrap();
        assert_eq!(install.cwd, Some(dir.path().join("packages/ui")));
        assert!(runner.called("git add -- packages/ui/package.json"));
    }

    #[test]
    fn test_missing_manifest_fails_fast() {
        let dir = setup();
        fs::create_dir_all(dir.path().join("tools")).unwrap();
        fs::write(dir.path().join("tools/package-lock.json"), "{}").unwrap();
        let runner = ScriptedRunner::new();
        let ctx = WorkingTreeContext::new(&runner, dir.path(), GitConfig::default());
        let files = FilesConfig::default();
        let pm = PackageManagerConfig::default();

        let err = regen(&ctx, &files, &pm)
            .regenerate("tools/package-lock.json")
            .unwrap_err();
        assert!(matches!(err, LockfileError::ManifestMissing { .. }));
        assert!(dir.path().join("tools/package-lock.json").exists());
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn test_invalid_manifest_fails_fast() {
        let dir = setup();
        fs::write(dir.path().join("package.json"), "{ \"name\": ").unwrap();
        let runner = ScriptedRunner::new();
        let ctx = WorkingTreeContext::new(&runner, dir.path(), GitConfig::default());
        let files = FilesConfig::default();
        let pm = PackageManagerConfig::default();

        let err = regen(&ctx, &files, &pm).regenerate("package-lock.json").unwrap_err();
        assert!(matches!(err, LockfileError::ManifestInvalid { .. }));
        assert!(dir.path().join("package-lock.json").exists());
    }

    /// Writes a partial lockfile, then fails, like an interrupted install.
    struct PartialInstall {
        lockfile: PathBuf,
        calls: RefCell<Vec<String>>,
    }

    impl CommandRunner for PartialInstall {
        fn run(&self, spec: &CommandSpec) -> std::io::Result<CommandOutput> {
            self.calls.borrow_mut().push(spec.display());
            if spec.program == "npm" {
                fs::write(&self.lockfile, "{ partial")?;
                return Ok(fail(1, "npm ERR! network"));
            }
            Ok(CommandOutput {
                status: Some(0),
                ..CommandOutput::default()
            })
        }
    }

    #[test]
    fn test_failed_install_removes_partial_lockfile() {
        let dir = setup();
        let runner = PartialInstall {
            lockfile: dir.path().join("package-lock.json"),
            calls: RefCell::new(Vec::new()),
        };
        let ctx = WorkingTreeContext::new(&runner, dir.path(), GitConfig::default());
        let files = FilesConfig::default();
        let pm = PackageManagerConfig::default();

        let err = regen(&ctx, &files, &pm).regenerate("package-lock.json").unwrap_err();
        match err {
            LockfileError::InstallFailed { lockfile, detail } => {
                assert_eq!(lockfile, "package-lock.json");
                assert!(detail.contains("npm ERR! network"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!dir.path().join("package-lock.json").exists());
    }

    #[test]
    fn test_root_regeneration_is_best_effort() {
        let dir = setup();
        let runner = ScriptedRunner::new();
        runner.on("npm", fail(1, "boom"));
        let ctx = WorkingTreeContext::new(&runner, dir.path(), GitConfig::default());
        let files = FilesConfig::default();
        let pm = PackageManagerConfig::default();

        assert!(!regen(&ctx, &files, &pm).regenerate_root("package.json"));
        assert!(dir.path().join("package-lock.json").exists(), "root lockfile kept in place");
    }

    #[test]
    fn test_regenerate_for_conflict_set() {
        let dir = setup();
        let files = FilesConfig::default();
        let pm = PackageManagerConfig::default();
        let classifier = ConflictClassifier::new(&files);

        // Root manifest only: best-effort root rebuild.
        let runner = ScriptedRunner::new();
        let ctx = WorkingTreeContext::new(&runner, dir.path(), GitConfig::default());
        let set = classifier.classify(["package.json", "CHANGELOG.md"]).unwrap();
        let report = regen(&ctx, &files, &pm).regenerate_for(&set, &classifier).unwrap();
        assert!(report.regenerated.is_empty());
        assert!(report.root_regenerated);

        // Nested manifest only: nothing to rebuild.
        let runner = ScriptedRunner::new();
        let ctx = WorkingTreeContext::new(&runner, dir.path(), GitConfig::default());
        let set = classifier.classify(["packages/ui/package.json"]).unwrap();
        let report = regen(&ctx, &files, &pm).regenerate_for(&set, &classifier).unwrap();
        assert_eq!(report, RegenerationReport::default());
        assert!(!runner.called("npm"));

        // Changelog only: no regeneration at all.
        let runner = ScriptedRunner::new();
        let ctx = WorkingTreeContext::new(&runner, dir.path(), GitConfig::default());
        let set = classifier.classify(["CHANGELOG.md"]).unwrap();
        regen(&ctx, &files, &pm).regenerate_for(&set, &classifier).unwrap();
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn test_workspace_dirs_from_object_form_and_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("libs/a")).unwrap();
        fs::create_dir_all(root.join("libs/b/nested")).unwrap();
        fs::create_dir_all(root.join("packages/c")).unwrap();
        fs::write(root.join("package.json"), r#"{"workspaces":{"packages":["libs/*"]}}"#).unwrap();

        let runner = ScriptedRunner::new();
        let ctx = WorkingTreeContext::new(&runner, root, GitConfig::default());
        let files = FilesConfig::default();
        let pm = PackageManagerConfig::default();

        let mut found = regen(&ctx, &files, &pm).workspace_dirs();
        found.sort();
        assert_eq!(found, vec![root.join("libs/a"), root.join("libs/b")]);

        fs::write(root.join("package.json"), r#"{"name":"x"}"#).unwrap();
        let found = regen(&ctx, &files, &pm).workspace_dirs();
        assert_eq!(found, vec![root.join("packages/c")]);
    }
}
