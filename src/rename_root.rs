use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::action::ActionHeader;
use crate::util;

/// Renames the installation root itself, e.g. `app-1.0` to `app-2.0`.
///
/// The rename is best effort: it never fails patch application, and it only
/// runs against a root whose name matches the one the patch was built from.
/// `renamed` records whether the move actually happened and is not persisted,
/// so every decoded action starts out unapplied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenameRootDirectoryAction {
    header: ActionHeader,
    old_name: String,
    new_name: String,
    #[serde(skip)]
    renamed: bool,
}

impl RenameRootDirectoryAction {
    pub fn new(old_name: impl Into<String>, new_name: impl Into<String>) -> Self {
        let old_name = old_name.into();
        Self {
            header: ActionHeader::unchecked(&old_name),
            old_name,
            new_name: new_name.into(),
            renamed: false,
        }
    }

    pub fn header(&self) -> &ActionHeader {
        &self.header
    }

    pub fn old_name(&self) -> &str {
        &self.old_name
    }

    pub fn new_name(&self) -> &str {
        &self.new_name
    }

    pub fn renamed(&self) -> bool {
        self.renamed
    }

    /// Only a root still carrying the name the patch was created for is renamed.
    /// A moved or custom-named installation is left alone.
    pub fn should_apply(&self, root: &Path) -> bool {
        root.file_name()
            .is_some_and(|name| name == self.old_name.as_str())
    }

    fn renamed_path(&self, root: &Path) -> PathBuf {
        root.with_file_name(&self.new_name)
    }

    /// Move `root` to its new name. Every failure is logged and swallowed.
    pub fn apply(&mut self, root: &Path) {
        let source = root;
        let target = self.renamed_path(root);

        info!(
            from = %source.display(),
            to = %target.display(),
            "Rename root directory"
        );

        // An existing target may be user data; never replace it.
        if util::path_exists_no_follow(&target) {
            info!(to = %target.display(), "Rename root directory skipped: target path exists");
            return;
        }

        match fs::rename(source, &target) {
            Ok(()) => self.renamed = true,
            Err(e) => {
                info!(error = %e, "Rename root directory skipped");
            }
        }
    }

    /// Undo a rename this action performed. No-op when nothing was renamed
    /// or when the original root is back already.
    pub fn revert(&self, root: &Path) -> Result<()> {
        if !self.renamed || util::path_exists_no_follow(root) {
            return Ok(());
        }
        let source = self.renamed_path(root);
        info!(
            from = %source.display(),
            to = %root.display(),
            "Revert root directory rename"
        );
        fs::rename(&source, root).with_context(|| {
            format!(
                "Failed to move {} back to {}",
                source.display(),
                root.display()
            )
        })
    }
}
