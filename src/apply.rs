use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::action::PatchAction;
use crate::patch_format::Patch;
use crate::validation::ValidationResult;

/// A patch resolved against a concrete installation directory.
#[derive(Debug)]
pub struct PreparationResult {
    pub patch: Patch,
    pub to_dir: PathBuf,
    pub validation_results: Vec<ValidationResult>,
}

#[derive(Debug)]
pub struct ApplicationResult {
    pub applied: bool,
    /// Actions whose apply was attempted, in application order. Revert uses
    /// exactly these instances since they carry what actually happened.
    pub applied_actions: Vec<PatchAction>,
    pub error: Option<anyhow::Error>,
}

/// Read `patch_path` and validate every applicable action against `to_dir`.
/// Nothing on disk is modified.
pub fn prepare_and_validate(patch_path: &Path, to_dir: &Path) -> Result<PreparationResult> {
    let patch = Patch::read_from(patch_path)?;
    // Symlinks are left unresolved: the root rename matches and moves the
    // target's own name.
    let to_dir = std::path::absolute(to_dir)
        .with_context(|| format!("Failed to resolve target: {}", to_dir.display()))?;
    if !to_dir.is_dir() {
        bail!("Target is not a directory: {}", to_dir.display());
    }

    let validation_results: Vec<ValidationResult> = patch
        .actions
        .iter()
        .filter(|action| action.should_apply(&to_dir))
        .filter_map(|action| action.validate(&to_dir))
        .collect();

    for result in &validation_results {
        warn!(%result, "Validation finding");
    }

    Ok(PreparationResult {
        patch,
        to_dir,
        validation_results,
    })
}

/// Back up, then apply every applicable action in order.
///
/// An action failure stops application and is reported through the result so
/// the caller can revert `applied_actions`.
pub fn apply(preparation: &PreparationResult, backup_dir: &Path) -> Result<ApplicationResult> {
    if !preparation.validation_results.is_empty() {
        bail!(
            "Patch cannot be applied: {} validation finding(s)",
            preparation.validation_results.len()
        );
    }

    let to_dir = &preparation.to_dir;
    let actions: Vec<PatchAction> = preparation
        .patch
        .actions
        .iter()
        .filter(|action| action.should_apply(to_dir))
        .cloned()
        .collect();

    fs::create_dir_all(backup_dir)
        .with_context(|| format!("Failed to create backup directory: {}", backup_dir.display()))?;
    for action in &actions {
        action
            .backup(to_dir, backup_dir)
            .with_context(|| format!("Failed to back up {}", action.path()))?;
    }

    let mut applied_actions = Vec::with_capacity(actions.len());
    for mut action in actions {
        let result = action.apply(&preparation.patch, to_dir);
        let path = action.path().to_string();
        applied_actions.push(action);
        if let Err(e) = result {
            warn!(path = %path, error = %format!("{:#}", e), "Apply failed");
            return Ok(ApplicationResult {
                applied: false,
                applied_actions,
                error: Some(e.context(format!("Failed to apply {}", path))),
            });
        }
    }

    info!(
        target = %to_dir.display(),
        actions = applied_actions.len(),
        "Patch applied"
    );

    Ok(ApplicationResult {
        applied: true,
        applied_actions,
        error: None,
    })
}

/// Undo `applied_actions` in reverse order. Stops at the first failure.
pub fn revert(
    preparation: &PreparationResult,
    applied_actions: &[PatchAction],
    backup_dir: &Path,
) -> Result<()> {
    let to_dir = &preparation.to_dir;
    for action in applied_actions.iter().rev() {
        action
            .revert(to_dir, backup_dir)
            .with_context(|| format!("Failed to revert {} {}", action.kind(), action.path()))?;
    }
    info!(
        target = %to_dir.display(),
        actions = applied_actions.len(),
        "Patch reverted"
    );
    Ok(())
}
