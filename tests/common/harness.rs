//! Drives a full create → prepare → apply → revert cycle and checks the
//! fingerprints of the old-named and new-named installation paths after each
//! mutating phase.

use anyhow::{Context, Result};
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Once;
use tempfile::TempDir;

use updater::{
    apply, create_patch, digest_files, prepare_and_validate, revert, FingerprintMap, Patch,
    PatchSpec, ValidationKind,
};

use super::permissions::{RevokeError, RevokedPermissions};
use super::{copy_dir_recursive, newer_tree, older_tree, write_tree};

pub const OLD_ROOT: &str = "app-1.0";
pub const NEW_ROOT: &str = "app-2.0";

/// Paths one scenario works with, all below a private temp directory.
#[derive(Debug, Clone)]
pub struct Fixture {
    pub older_dir: PathBuf,
    pub newer_dir: PathBuf,
    /// The installation being patched: a copy of `older_dir`.
    pub apply_old_dir: PathBuf,
    /// Where the installation ends up once renamed.
    pub apply_new_dir: PathBuf,
    pub patch_file: PathBuf,
    pub backup_dir: PathBuf,
}

/// State handed to hooks. `revoked` is declared first so permissions are
/// restored before the temp directory is removed.
pub struct ScenarioContext {
    pub revoked: Option<RevokedPermissions>,
    pub fixture: Fixture,
    _temp: TempDir,
}

impl ScenarioContext {
    fn new(install_name: &str) -> Result<Self> {
        let temp = tempfile::tempdir().context("Failed to create scenario directory")?;
        let root = temp.path();
        let fixture = Fixture {
            older_dir: root.join("source").join(OLD_ROOT),
            newer_dir: root.join("source").join(NEW_ROOT),
            apply_old_dir: root.join("apply").join(install_name),
            apply_new_dir: root.join("apply").join(NEW_ROOT),
            patch_file: root.join("patch.bin"),
            backup_dir: root.join("backup"),
        };
        write_tree(&fixture.older_dir, &older_tree());
        write_tree(&fixture.newer_dir, &newer_tree());
        copy_dir_recursive(&fixture.older_dir, &fixture.apply_old_dir);
        Ok(Self {
            revoked: None,
            fixture,
            _temp: temp,
        })
    }

    /// Give back access revoked during `before_prepare`, if still held.
    pub fn restore_permissions(&mut self) -> Result<()> {
        if let Some(revoked) = self.revoked.take() {
            revoked.restore()?;
        }
        Ok(())
    }
}

pub type Hook = Box<dyn Fn(&mut ScenarioContext) -> Result<()>>;

/// Which baseline a directory's fingerprints must equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expected {
    /// The installation as it was before apply.
    Original,
    /// The new source tree.
    Target,
    Empty,
}

#[derive(Debug)]
pub enum Outcome {
    Passed,
    Skipped(String),
}

struct Baselines {
    original: FingerprintMap,
    target: FingerprintMap,
}

impl Baselines {
    fn resolve(&self, expected: Expected) -> FingerprintMap {
        match expected {
            Expected::Original => self.original.clone(),
            Expected::Target => self.target.clone(),
            Expected::Empty => FingerprintMap::new(),
        }
    }
}

pub struct Scenario {
    name: &'static str,
    rename_root: bool,
    install_name: &'static str,
    before_prepare: Option<Hook>,
    after_apply: Option<Hook>,
    cleanup: Option<Hook>,
    expected_findings: Vec<ValidationKind>,
    /// (old-named path, new-named path)
    after_apply_expect: (Expected, Expected),
    after_revert_expect: (Expected, Expected),
}

impl Scenario {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            rename_root: true,
            install_name: OLD_ROOT,
            before_prepare: None,
            after_apply: None,
            cleanup: None,
            expected_findings: Vec::new(),
            after_apply_expect: (Expected::Empty, Expected::Target),
            after_revert_expect: (Expected::Original, Expected::Empty),
        }
    }

    pub fn rename_root(mut self, rename: bool) -> Self {
        self.rename_root = rename;
        self
    }

    pub fn install_name(mut self, name: &'static str) -> Self {
        self.install_name = name;
        self
    }

    pub fn before_prepare(
        mut self,
        hook: impl Fn(&mut ScenarioContext) -> Result<()> + 'static,
    ) -> Self {
        self.before_prepare = Some(Box::new(hook));
        self
    }

    pub fn after_apply(
        mut self,
        hook: impl Fn(&mut ScenarioContext) -> Result<()> + 'static,
    ) -> Self {
        self.after_apply = Some(Box::new(hook));
        self
    }

    pub fn cleanup(mut self, hook: impl Fn(&mut ScenarioContext) -> Result<()> + 'static) -> Self {
        self.cleanup = Some(Box::new(hook));
        self
    }

    pub fn expect_findings(mut self, kinds: Vec<ValidationKind>) -> Self {
        self.expected_findings = kinds;
        self
    }

    pub fn expect_after_apply(mut self, old: Expected, new: Expected) -> Self {
        self.after_apply_expect = (old, new);
        self
    }

    pub fn expect_after_revert(mut self, old: Expected, new: Expected) -> Self {
        self.after_revert_expect = (old, new);
        self
    }

    /// Run every phase, then `cleanup`, whatever happened in between
    /// (errors and failed assertions included).
    pub fn run(self) -> Result<Outcome> {
        init_logging();
        let mut ctx = ScenarioContext::new(self.install_name)?;

        let phases = panic::catch_unwind(AssertUnwindSafe(|| self.run_phases(&mut ctx)));
        let cleanup = match &self.cleanup {
            Some(hook) => hook(&mut ctx),
            None => Ok(()),
        };
        drop(ctx);

        let phases = match phases {
            Ok(result) => result,
            Err(payload) => panic::resume_unwind(payload),
        };
        match phases {
            Err(e) if is_environment_limitation(&e) => {
                eprintln!("scenario '{}' skipped: {:#}", self.name, e);
                Ok(Outcome::Skipped(e.to_string()))
            }
            Err(e) => Err(e.context(format!("scenario '{}' failed", self.name))),
            Ok(()) => cleanup.map(|()| Outcome::Passed),
        }
    }

    fn run_phases(&self, ctx: &mut ScenarioContext) -> Result<()> {
        let fx = ctx.fixture.clone();

        let spec = PatchSpec::new(&fx.older_dir, &fx.newer_dir)
            .rename_root_directory(self.rename_root);
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let patch = runtime.block_on(create_patch(&spec, &fx.patch_file))?;

        if let Some(hook) = &self.before_prepare {
            hook(ctx)?;
        }

        let preparation = prepare_and_validate(&fx.patch_file, &fx.apply_old_dir)?;
        let findings: Vec<ValidationKind> = preparation
            .validation_results
            .iter()
            .map(|r| r.kind)
            .collect();
        assert_eq!(findings, self.expected_findings, "validation findings");

        let baselines = Baselines {
            original: digest(&patch, &fx.apply_old_dir)?,
            target: digest(&patch, &fx.newer_dir)?,
        };

        let result = apply(&preparation, &fx.backup_dir)?;
        if let Some(error) = result.error {
            return Err(error.context("apply failed"));
        }

        if let Some(hook) = &self.after_apply {
            hook(ctx)?;
        }

        let patched_old = digest(&patch, &fx.apply_old_dir)?;
        let patched_new = digest(&patch, &fx.apply_new_dir)?;
        let (old, new) = self.after_apply_expect;
        assert_eq!(patched_old, baselines.resolve(old), "old-named path after apply");
        assert_eq!(patched_new, baselines.resolve(new), "new-named path after apply");

        revert(&preparation, &result.applied_actions, &fx.backup_dir)?;

        let reverted_new = digest(&patch, &fx.apply_new_dir)?;
        let reverted_old = digest(&patch, &fx.apply_old_dir)?;
        let (old, new) = self.after_revert_expect;
        assert_eq!(reverted_old, baselines.resolve(old), "old-named path after revert");
        assert_eq!(reverted_new, baselines.resolve(new), "new-named path after revert");

        Ok(())
    }
}

fn digest(patch: &Patch, dir: &std::path::Path) -> Result<FingerprintMap> {
    digest_files(dir, &patch.ignored_files)
}

fn is_environment_limitation(error: &anyhow::Error) -> bool {
    matches!(
        error.downcast_ref::<RevokeError>(),
        Some(RevokeError::PrincipalNotFound)
    )
}

fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Run a scenario, treating a skip as success.
pub fn run_or_skip(scenario: Scenario) {
    match scenario.run() {
        Ok(Outcome::Passed) => {}
        Ok(Outcome::Skipped(reason)) => eprintln!("skipped: {}", reason),
        Err(e) => panic!("{:#}", e),
    }
}
