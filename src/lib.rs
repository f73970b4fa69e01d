//! Offline, file-based updater: builds patches between two directory trees
//! and applies or reverts them against an installation, including an optional
//! best-effort rename of the installation root.

pub mod action;
pub mod apply;
pub mod create;
pub mod digest;
pub mod patch_format;
pub mod rename_root;
pub mod util;
pub mod validation;

pub use action::{ActionHeader, PatchAction};
pub use apply::{apply, prepare_and_validate, revert, ApplicationResult, PreparationResult};
pub use create::create_patch;
pub use digest::{digest_files, FingerprintMap};
pub use patch_format::{Patch, PatchSpec, PatchSummary};
pub use rename_root::RenameRootDirectoryAction;
pub use validation::{ValidationKind, ValidationResult};
