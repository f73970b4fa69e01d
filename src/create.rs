use anyhow::{Context, Result};
use rayon::prelude::*;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::action::{ActionHeader, PatchAction};
use crate::patch_format::{Patch, PatchSpec, FORMAT_VERSION};
use crate::rename_root::RenameRootDirectoryAction;
use crate::util::{self, EntryKind};

fn root_name(dir: &Path) -> Result<String> {
    let canonical = dir
        .canonicalize()
        .with_context(|| format!("Failed to canonicalize path: {}", dir.display()))?;
    canonical
        .file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .with_context(|| format!("Directory has no usable name: {}", dir.display()))
}

/// Symlinks are neither created nor removed by a patch.
fn skip_symlink(path: &str) {
    warn!(path, "Symlink left out of the patch");
}

/// Create a patch file turning `spec.old_folder` into `spec.new_folder`.
/// Uses Tokio for concurrent directory walks and Rayon for parallel hashing.
pub async fn create_patch(spec: &PatchSpec, output: &Path) -> Result<Patch> {
    // Stage 1: Walk both directories concurrently
    let old_dir = spec.old_folder.clone();
    let new_dir = spec.new_folder.clone();
    let old_ignored = spec.ignored_files.clone();
    let new_ignored = spec.ignored_files.clone();

    let (old_entries, new_entries) = tokio::try_join!(
        tokio::task::spawn_blocking(move || util::walk_directory(&old_dir, &old_ignored)),
        tokio::task::spawn_blocking(move || util::walk_directory(&new_dir, &new_ignored)),
    )?;

    let old_entries = old_entries?;
    let new_entries = new_entries?;

    // Stage 2: Classify changes
    let old_map: HashMap<&str, usize> = old_entries
        .iter()
        .enumerate()
        .map(|(i, e)| (e.relative_path.as_str(), i))
        .collect();
    let new_map: HashMap<&str, usize> = new_entries
        .iter()
        .enumerate()
        .map(|(i, e)| (e.relative_path.as_str(), i))
        .collect();

    let old_paths = util::path_set(&old_entries);
    let new_paths = util::path_set(&new_entries);

    let mut dirs_to_create: Vec<String> = Vec::new();
    let mut files_to_add: Vec<PathBuf> = Vec::new();
    let mut files_to_add_rel: Vec<String> = Vec::new();
    let mut files_maybe_modified: Vec<(String, PathBuf, PathBuf)> = Vec::new();
    let mut files_to_delete: Vec<(String, PathBuf)> = Vec::new();
    let mut dirs_to_delete: Vec<String> = Vec::new();

    for path in new_paths.difference(&old_paths) {
        let entry = &new_entries[new_map[path.as_str()]];
        match entry.kind {
            EntryKind::Dir => dirs_to_create.push(path.clone()),
            EntryKind::File => {
                files_to_add_rel.push(path.clone());
                files_to_add.push(entry.full_path.clone());
            }
            EntryKind::Symlink => skip_symlink(path),
        }
    }

    for path in old_paths.difference(&new_paths) {
        let entry = &old_entries[old_map[path.as_str()]];
        match entry.kind {
            EntryKind::Dir => dirs_to_delete.push(path.clone()),
            EntryKind::File => files_to_delete.push((path.clone(), entry.full_path.clone())),
            EntryKind::Symlink => skip_symlink(path),
        }
    }

    for path in old_paths.intersection(&new_paths) {
        let old = &old_entries[old_map[path.as_str()]];
        let new = &new_entries[new_map[path.as_str()]];
        if old.kind == EntryKind::File && new.kind == EntryKind::File {
            files_maybe_modified.push((path.clone(), old.full_path.clone(), new.full_path.clone()));
        }
    }

    // Stage 3: Fingerprint and capture content (Rayon par_iter inside spawn_blocking).
    let (modified, added, deleted) = tokio::try_join!(
        tokio::task::spawn_blocking(move || -> Result<Vec<(String, u64, u64, Vec<u8>)>> {
            Ok(files_maybe_modified
                .par_iter()
                .map(|(rel, old_path, new_path)| -> Result<Option<(String, u64, u64, Vec<u8>)>> {
                    let old_fp = util::fingerprint_file(old_path)?;
                    let new_fp = util::fingerprint_file(new_path)?;
                    if old_fp == new_fp {
                        return Ok(None);
                    }
                    let data = util::mmap_file(new_path)?.to_vec();
                    Ok(Some((rel.clone(), old_fp, new_fp, data)))
                })
                .collect::<Result<Vec<_>>>()?
                .into_iter()
                .flatten()
                .collect())
        }),
        tokio::task::spawn_blocking(move || -> Result<Vec<(String, u64, Vec<u8>)>> {
            files_to_add_rel
                .par_iter()
                .zip(files_to_add.par_iter())
                .map(|(rel, full)| -> Result<(String, u64, Vec<u8>)> {
                    let data = util::mmap_file(full)?.to_vec();
                    Ok((rel.clone(), util::fingerprint_bytes(&data), data))
                })
                .collect()
        }),
        tokio::task::spawn_blocking(move || -> Result<Vec<(String, u64)>> {
            files_to_delete
                .par_iter()
                .map(|(rel, full)| -> Result<(String, u64)> {
                    Ok((rel.clone(), util::fingerprint_file(full)?))
                })
                .collect()
        }),
    )?;

    let mut modified = modified?;
    let mut added = added?;
    let mut deleted = deleted?;
    modified.sort_by(|a, b| a.0.cmp(&b.0));
    added.sort_by(|a, b| a.0.cmp(&b.0));
    deleted.sort_by(|a, b| a.0.cmp(&b.0));

    // Stage 4: Assemble actions in apply order
    let mut actions: Vec<PatchAction> = Vec::new();
    let mut payloads: BTreeMap<String, Vec<u8>> = BTreeMap::new();

    // 1. CreateDir (parent-first)
    util::sort_dirs_parent_first(&mut dirs_to_create);
    for path in &dirs_to_create {
        actions.push(PatchAction::CreateDir {
            header: ActionHeader::unchecked(path),
        });
    }

    // 2. AddFile
    for (path, fingerprint, data) in added {
        actions.push(PatchAction::AddFile {
            header: ActionHeader::checked(&path, fingerprint),
        });
        payloads.insert(path, data);
    }

    // 3. ModifyFile
    for (path, old_fp, new_fp, data) in modified {
        actions.push(PatchAction::ModifyFile {
            header: ActionHeader::checked(&path, old_fp),
            new_checksum: new_fp,
        });
        payloads.insert(path, data);
    }

    // 4. DeleteFile
    for (path, fingerprint) in &deleted {
        actions.push(PatchAction::DeleteFile {
            header: ActionHeader::checked(path, *fingerprint),
        });
    }

    // 5. DeleteDir (deepest-first)
    util::sort_dirs_deepest_first(&mut dirs_to_delete);
    for path in &dirs_to_delete {
        actions.push(PatchAction::DeleteDir {
            header: ActionHeader::unchecked(path),
        });
    }

    // 6. Root rename goes last: every other action works on the old root path.
    if spec.rename_root_directory {
        let old_name = root_name(&spec.old_folder)?;
        let new_name = root_name(&spec.new_folder)?;
        if old_name != new_name {
            actions.push(PatchAction::RenameRoot(RenameRootDirectoryAction::new(
                old_name, new_name,
            )));
        } else {
            debug!(name = %old_name, "Root directory names match, no rename needed");
        }
    }

    let patch = Patch {
        version: FORMAT_VERSION,
        ignored_files: spec.ignored_files.clone(),
        actions,
        payloads,
    };

    patch.write_to(output)?;
    info!(
        output = %output.display(),
        actions = patch.actions.len(),
        "Patch created"
    );

    Ok(patch)
}
