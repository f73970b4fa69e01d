use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::patch_format::Patch;
use crate::rename_root::RenameRootDirectoryAction;
use crate::util;
use crate::validation::{ValidationKind, ValidationResult};

/// Fields every action persists first: the target-relative path and the
/// expected content fingerprint, `None` when no fingerprint check applies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionHeader {
    pub path: String,
    pub checksum: Option<u64>,
}

impl ActionHeader {
    pub fn checked(path: &str, checksum: u64) -> Self {
        Self {
            path: path.to_string(),
            checksum: Some(checksum),
        }
    }

    pub fn unchecked(path: &str) -> Self {
        Self {
            path: path.to_string(),
            checksum: None,
        }
    }
}

/// One reversible step of a patch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PatchAction {
    CreateDir {
        header: ActionHeader,
    },
    /// `header.checksum` is the fingerprint of the new content.
    AddFile {
        header: ActionHeader,
    },
    /// `header.checksum` is the fingerprint the installed file must have.
    ModifyFile {
        header: ActionHeader,
        new_checksum: u64,
    },
    DeleteFile {
        header: ActionHeader,
    },
    DeleteDir {
        header: ActionHeader,
    },
    RenameRoot(RenameRootDirectoryAction),
}

impl PatchAction {
    pub fn header(&self) -> &ActionHeader {
        match self {
            PatchAction::CreateDir { header }
            | PatchAction::AddFile { header }
            | PatchAction::ModifyFile { header, .. }
            | PatchAction::DeleteFile { header }
            | PatchAction::DeleteDir { header } => header,
            PatchAction::RenameRoot(action) => action.header(),
        }
    }

    pub fn path(&self) -> &str {
        &self.header().path
    }

    /// The filesystem object this action operates on under `base_dir`.
    /// The root rename works on the installation directory itself.
    pub fn file(&self, base_dir: &Path) -> PathBuf {
        match self {
            PatchAction::RenameRoot(_) => base_dir.to_path_buf(),
            _ => base_dir.join(self.path()),
        }
    }

    pub fn should_apply(&self, to_dir: &Path) -> bool {
        match self {
            PatchAction::RenameRoot(action) => action.should_apply(to_dir),
            _ => true,
        }
    }

    pub fn validate(&self, to_dir: &Path) -> Option<ValidationResult> {
        let file = self.file(to_dir);
        let path = self.path();
        match self {
            PatchAction::CreateDir { .. } | PatchAction::AddFile { .. } => {
                if util::path_exists_no_follow(&file) {
                    return Some(ValidationResult::new(
                        ValidationKind::AlreadyExists,
                        path,
                        "already exists",
                    ));
                }
                None
            }
            PatchAction::ModifyFile { header, .. } => {
                if !util::path_exists_no_follow(&file) {
                    return Some(ValidationResult::new(
                        ValidationKind::DoesNotExist,
                        path,
                        "missing",
                    ));
                }
                check_fingerprint(&file, path, header.checksum)
            }
            PatchAction::DeleteFile { header } => {
                if !util::path_exists_no_follow(&file) {
                    return None;
                }
                check_fingerprint(&file, path, header.checksum)
            }
            PatchAction::DeleteDir { .. } | PatchAction::RenameRoot(_) => None,
        }
    }

    /// Save whatever `apply` is about to overwrite or remove.
    pub fn backup(&self, to_dir: &Path, backup_dir: &Path) -> Result<()> {
        match self {
            PatchAction::ModifyFile { .. } | PatchAction::DeleteFile { .. } => {
                let file = self.file(to_dir);
                if file.is_file() {
                    util::copy_file_with_parents(&file, &self.file(backup_dir))?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    pub fn apply(&mut self, patch: &Patch, to_dir: &Path) -> Result<()> {
        let file = self.file(to_dir);
        debug!(action = self.kind(), path = self.path(), "Applying");
        match self {
            PatchAction::CreateDir { .. } => fs::create_dir_all(&file)
                .with_context(|| format!("Failed to create directory: {}", file.display())),
            PatchAction::AddFile { header } => {
                let expected = header.checksum;
                write_payload(patch, &header.path, &file, expected)
            }
            PatchAction::ModifyFile {
                header,
                new_checksum,
            } => write_payload(patch, &header.path, &file, Some(*new_checksum)),
            PatchAction::DeleteFile { .. } => util::ignore_not_found(fs::remove_file(&file))
                .with_context(|| format!("Failed to delete file: {}", file.display())),
            PatchAction::DeleteDir { .. } => util::ignore_not_found(fs::remove_dir(&file))
                .with_context(|| format!("Failed to remove directory: {}", file.display())),
            PatchAction::RenameRoot(action) => {
                action.apply(&file);
                Ok(())
            }
        }
    }

    pub fn revert(&self, to_dir: &Path, backup_dir: &Path) -> Result<()> {
        let file = self.file(to_dir);
        debug!(action = self.kind(), path = self.path(), "Reverting");
        match self {
            PatchAction::CreateDir { .. } => util::ignore_not_found(fs::remove_dir(&file))
                .with_context(|| format!("Failed to remove directory: {}", file.display())),
            PatchAction::AddFile { .. } => util::ignore_not_found(fs::remove_file(&file))
                .with_context(|| format!("Failed to delete file: {}", file.display())),
            PatchAction::ModifyFile { .. } | PatchAction::DeleteFile { .. } => {
                let backup = self.file(backup_dir);
                if backup.is_file() {
                    util::copy_file_with_parents(&backup, &file)?;
                }
                Ok(())
            }
            PatchAction::DeleteDir { .. } => fs::create_dir_all(&file)
                .with_context(|| format!("Failed to recreate directory: {}", file.display())),
            PatchAction::RenameRoot(action) => action.revert(&file),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PatchAction::CreateDir { .. } => "create-dir",
            PatchAction::AddFile { .. } => "add-file",
            PatchAction::ModifyFile { .. } => "modify-file",
            PatchAction::DeleteFile { .. } => "delete-file",
            PatchAction::DeleteDir { .. } => "delete-dir",
            PatchAction::RenameRoot(_) => "rename-root",
        }
    }
}

fn check_fingerprint(file: &Path, path: &str, expected: Option<u64>) -> Option<ValidationResult> {
    let expected = expected?;
    match util::fingerprint_file(file) {
        Ok(actual) if actual == expected => None,
        Ok(_) => Some(ValidationResult::new(
            ValidationKind::Modified,
            path,
            "content differs from the patched version",
        )),
        Err(e) => Some(ValidationResult::new(
            ValidationKind::AccessDenied,
            path,
            format!("{:#}", e),
        )),
    }
}

fn write_payload(patch: &Patch, path: &str, file: &Path, expected: Option<u64>) -> Result<()> {
    let data = patch.payload(path)?;
    if let Some(expected) = expected {
        if util::fingerprint_bytes(data) != expected {
            bail!("Fingerprint mismatch for patched file: {}", path);
        }
    }
    if let Some(parent) = file.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(file, data).with_context(|| format!("Failed to write file: {}", file.display()))
}
