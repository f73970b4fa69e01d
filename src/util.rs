use anyhow::{Context, Result};
use memmap2::Mmap;
use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Dir,
    /// A symbolic link of any kind. Links are never followed.
    Symlink,
}

#[derive(Debug, Clone)]
pub struct DirEntry {
    pub relative_path: String,
    pub kind: EntryKind,
    pub full_path: PathBuf,
}

/// Walk a directory tree and collect all entries with relative paths,
/// skipping anything covered by `ignored`.
/// Paths use forward slashes so patches stay portable between platforms.
pub fn walk_directory(root: &Path, ignored: &[String]) -> Result<Vec<DirEntry>> {
    let root = root
        .canonicalize()
        .with_context(|| format!("Failed to canonicalize path: {}", root.display()))?;

    let mut entries = Vec::new();
    let mut walker = WalkDir::new(&root).min_depth(1).sort_by_file_name().into_iter();

    while let Some(entry) = walker.next() {
        let entry =
            entry.with_context(|| format!("Failed to read directory entry in {}", root.display()))?;

        let full_path = entry.path().to_path_buf();
        let relative = full_path
            .strip_prefix(&root)
            .with_context(|| "Failed to compute relative path")?;

        let relative_str = relative
            .to_str()
            .with_context(|| format!("Non-UTF8 path: {}", relative.display()))?
            .replace('\\', "/");

        if is_ignored(&relative_str, ignored) {
            if entry.file_type().is_dir() {
                walker.skip_current_dir();
            }
            continue;
        }

        let kind = if entry.path_is_symlink() {
            EntryKind::Symlink
        } else if entry.file_type().is_dir() {
            EntryKind::Dir
        } else {
            EntryKind::File
        };

        entries.push(DirEntry {
            relative_path: relative_str,
            kind,
            full_path,
        });
    }

    Ok(entries)
}

/// True when `relative_path` equals an ignored entry or lies beneath one.
pub fn is_ignored(relative_path: &str, ignored: &[String]) -> bool {
    ignored.iter().any(|ignored| {
        let ignored = ignored.trim_end_matches('/');
        relative_path == ignored
            || relative_path
                .strip_prefix(ignored)
                .is_some_and(|rest| rest.starts_with('/'))
    })
}

/// Memory-map a file for read-only access.
///
/// # Safety
/// The mapping is read-only. Callers must not concurrently truncate or replace
/// the underlying file while the `Mmap` is live.
pub fn mmap_file(path: &Path) -> Result<Mmap> {
    let file = fs::File::open(path)
        .with_context(|| format!("Failed to open file: {}", path.display()))?;
    // SAFETY: We only read from this mapping; no concurrent modification of these files.
    unsafe {
        Mmap::map(&file).with_context(|| format!("Failed to memory-map file: {}", path.display()))
    }
}

/// Content fingerprint: the first 8 bytes of the BLAKE3 hash, little endian.
pub fn fingerprint_bytes(data: &[u8]) -> u64 {
    fingerprint_of(blake3::hash(data))
}

/// Stream-fingerprint a file.
/// Uses a 256 KB BufReader to reduce syscall overhead vs the default 8 KB.
pub fn fingerprint_file(path: &Path) -> Result<u64> {
    let file = fs::File::open(path)
        .with_context(|| format!("Failed to open file for hashing: {}", path.display()))?;
    let mut reader = io::BufReader::with_capacity(256 * 1024, file);
    let mut hasher = blake3::Hasher::new();
    io::copy(&mut reader, &mut hasher)
        .with_context(|| format!("Failed to hash file: {}", path.display()))?;
    Ok(fingerprint_of(hasher.finalize()))
}

/// Fingerprint a symlink by the text of its target, without following it.
pub fn fingerprint_link(path: &Path) -> Result<u64> {
    let target = fs::read_link(path)
        .with_context(|| format!("Failed to read symlink: {}", path.display()))?;
    Ok(fingerprint_bytes(target.as_os_str().as_encoded_bytes()))
}

fn fingerprint_of(hash: blake3::Hash) -> u64 {
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&hash.as_bytes()[..8]);
    u64::from_le_bytes(prefix)
}

/// Whether anything exists at `path`, without following a final symlink.
pub fn path_exists_no_follow(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

/// Copy `from` to `to`, creating the destination's parent directories.
pub fn copy_file_with_parents(from: &Path, to: &Path) -> Result<()> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    fs::copy(from, to)
        .with_context(|| format!("Failed to copy {} to {}", from.display(), to.display()))?;
    Ok(())
}

/// Treat a missing path as success for idempotent removals.
pub fn ignore_not_found(result: io::Result<()>) -> io::Result<()> {
    match result {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// Collect just the relative paths as a set for fast lookup.
pub fn path_set(entries: &[DirEntry]) -> BTreeSet<String> {
    entries.iter().map(|e| e.relative_path.clone()).collect()
}

/// Sort directory paths so parents come before children.
pub fn sort_dirs_parent_first(dirs: &mut [String]) {
    dirs.sort();
}

/// Sort directory paths so children come before parents (for deletion).
pub fn sort_dirs_deepest_first(dirs: &mut [String]) {
    dirs.sort();
    dirs.reverse();
}
