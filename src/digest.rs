use anyhow::{Context, Result};
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::io;
use std::path::Path;

use crate::util::{self, EntryKind};

/// Relative path → content fingerprint, ordered for stable comparison.
pub type FingerprintMap = BTreeMap<String, u64>;

/// Fingerprint every file under `dir`, skipping `ignored` paths.
/// A directory that does not exist digests to an empty map. Symlinks are
/// not followed; they are fingerprinted by the text of their target.
pub fn digest_files(dir: &Path, ignored: &[String]) -> Result<FingerprintMap> {
    match std::fs::symlink_metadata(dir) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(FingerprintMap::new()),
        other => {
            other.with_context(|| format!("Failed to read metadata: {}", dir.display()))?;
        }
    }

    let entries = util::walk_directory(dir, ignored)?;
    entries
        .par_iter()
        .filter_map(|e| {
            let fingerprint = match e.kind {
                EntryKind::File => util::fingerprint_file(&e.full_path),
                EntryKind::Symlink => util::fingerprint_link(&e.full_path),
                EntryKind::Dir => return None,
            };
            Some(fingerprint.map(|fp| (e.relative_path.clone(), fp)))
        })
        .collect()
}
