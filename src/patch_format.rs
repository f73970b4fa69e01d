use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::action::PatchAction;
use crate::util;

pub const MAGIC: &[u8; 8] = b"UPDPAT01";
pub const FORMAT_VERSION: u32 = 1;

/// What to build a patch from.
#[derive(Debug, Clone, Default)]
pub struct PatchSpec {
    pub old_folder: PathBuf,
    pub new_folder: PathBuf,
    pub rename_root_directory: bool,
    /// Relative paths excluded from the patch and from digesting.
    pub ignored_files: Vec<String>,
}

impl PatchSpec {
    pub fn new(old_folder: impl Into<PathBuf>, new_folder: impl Into<PathBuf>) -> Self {
        Self {
            old_folder: old_folder.into(),
            new_folder: new_folder.into(),
            ..Self::default()
        }
    }

    pub fn rename_root_directory(mut self, rename: bool) -> Self {
        self.rename_root_directory = rename;
        self
    }

    pub fn ignored_files(mut self, ignored: Vec<String>) -> Self {
        self.ignored_files = ignored;
        self
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Patch {
    pub version: u32,
    pub ignored_files: Vec<String>,
    pub actions: Vec<PatchAction>,
    /// New file contents for `AddFile` and `ModifyFile`, keyed by relative path.
    pub payloads: BTreeMap<String, Vec<u8>>,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct PatchSummary {
    pub dirs_created: usize,
    pub files_added: usize,
    pub files_modified: usize,
    pub files_deleted: usize,
    pub dirs_deleted: usize,
    pub root_renamed: bool,
}

impl Patch {
    pub fn payload(&self, path: &str) -> Result<&[u8]> {
        self.payloads
            .get(path)
            .map(Vec::as_slice)
            .with_context(|| format!("Patch has no content for {}", path))
    }

    pub fn summary(&self) -> PatchSummary {
        let mut summary = PatchSummary::default();
        for action in &self.actions {
            match action {
                PatchAction::CreateDir { .. } => summary.dirs_created += 1,
                PatchAction::AddFile { .. } => summary.files_added += 1,
                PatchAction::ModifyFile { .. } => summary.files_modified += 1,
                PatchAction::DeleteFile { .. } => summary.files_deleted += 1,
                PatchAction::DeleteDir { .. } => summary.dirs_deleted += 1,
                PatchAction::RenameRoot(_) => summary.root_renamed = true,
            }
        }
        summary
    }

    /// Serialize, compress and write the patch behind the magic header.
    pub fn write_to(&self, output: &Path) -> Result<()> {
        let encoded = bincode::serialize(self).context("Failed to serialize patch")?;
        let compressed =
            zstd::bulk::compress(&encoded, 3).context("Failed to compress patch data")?;

        let mut file = std::fs::File::create(output)
            .with_context(|| format!("Failed to create output file: {}", output.display()))?;
        file.write_all(MAGIC)?;
        file.write_all(&compressed)?;
        file.flush()?;
        Ok(())
    }

    /// mmap the patch file, check magic, then stream-decompress into bincode.
    pub fn read_from(patch_path: &Path) -> Result<Patch> {
        let raw = util::mmap_file(patch_path)?;

        if raw.len() < MAGIC.len() || &raw[..MAGIC.len()] != MAGIC {
            bail!("Invalid patch file: missing magic header");
        }

        let decoder =
            zstd::Decoder::new(&raw[MAGIC.len()..]).context("Failed to create zstd decoder")?;
        let patch: Patch =
            bincode::deserialize_from(decoder).context("Failed to deserialize patch")?;

        if patch.version != FORMAT_VERSION {
            bail!(
                "Unsupported patch version: {} (expected {})",
                patch.version,
                FORMAT_VERSION
            );
        }

        Ok(patch)
    }
}
