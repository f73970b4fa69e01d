use anyhow::{bail, Context};
use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Instant;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use updater::{PatchAction, PatchSpec, PatchSummary};

#[derive(Parser)]
#[command(name = "updater", about = "Create, apply and revert directory-tree patches")]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a patch by comparing old and new directories
    Create {
        /// Path to the old (original) directory
        #[arg(long)]
        old: PathBuf,
        /// Path to the new (updated) directory
        #[arg(long)]
        new: PathBuf,
        /// Output path for the patch file
        #[arg(long, short)]
        output: PathBuf,
        /// Rename the installation root from the old to the new directory name
        #[arg(long)]
        rename_root: bool,
        /// Relative path to leave out of the patch (repeatable)
        #[arg(long = "ignore")]
        ignored: Vec<String>,
    },
    /// Apply a patch to a target directory, reverting on failure
    Apply {
        /// Path to the target directory to patch
        #[arg(long)]
        target: PathBuf,
        /// Path to the patch file
        #[arg(long, short)]
        patch: PathBuf,
        /// Directory in which a private backup directory is made while applying
        #[arg(long)]
        backup: Option<PathBuf>,
    },
    /// Print the content fingerprint of every file in a directory
    Digest {
        #[arg(long)]
        dir: PathBuf,
        /// Relative path to skip (repeatable)
        #[arg(long = "ignore")]
        ignored: Vec<String>,
    },
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_summary(summary: &PatchSummary) {
    println!("  Directories created: {}", summary.dirs_created);
    println!("  Files added: {}", summary.files_added);
    println!("  Files modified: {}", summary.files_modified);
    println!("  Files deleted: {}", summary.files_deleted);
    println!("  Directories deleted: {}", summary.dirs_deleted);
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}

fn remove_backup(backup_dir: tempfile::TempDir) {
    let path = backup_dir.path().to_path_buf();
    if let Err(e) = backup_dir.close() {
        warn!(path = %path.display(), error = %e, "Failed to remove backup directory");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Create {
            old,
            new,
            output,
            rename_root,
            ignored,
        } => {
            println!("Creating patch...");
            println!("  Old: {}", old.display());
            println!("  New: {}", new.display());
            println!("  Output: {}", output.display());

            let start = Instant::now();
            let spec = PatchSpec::new(old, new)
                .rename_root_directory(rename_root)
                .ignored_files(ignored);
            let patch = updater::create_patch(&spec, &output).await?;
            let elapsed = start.elapsed();

            println!("\nPatch created successfully!");
            let summary = patch.summary();
            print_summary(&summary);
            println!("  Root rename included: {}", yes_no(summary.root_renamed));
            println!("  Time elapsed: {:.3}s", elapsed.as_secs_f64());
        }
        Commands::Apply {
            target,
            patch,
            backup,
        } => {
            println!("Applying patch...");
            println!("  Target: {}", target.display());
            println!("  Patch: {}", patch.display());

            let start = Instant::now();
            let backup_root = backup.unwrap_or_else(std::env::temp_dir);
            std::fs::create_dir_all(&backup_root).with_context(|| {
                format!("Failed to create backup directory: {}", backup_root.display())
            })?;
            // Only this private subdirectory is ever removed.
            let backup_dir = tempfile::Builder::new()
                .prefix("updater-backup")
                .tempdir_in(&backup_root)
                .with_context(|| {
                    format!("Failed to create backup directory in {}", backup_root.display())
                })?;

            let preparation = updater::prepare_and_validate(&patch, &target)?;
            if !preparation.validation_results.is_empty() {
                for result in &preparation.validation_results {
                    eprintln!("  {}", result);
                }
                bail!(
                    "Target does not match the patch ({} problem(s))",
                    preparation.validation_results.len()
                );
            }

            let result = updater::apply(&preparation, backup_dir.path())?;
            if let Some(error) = result.error {
                eprintln!("Apply failed, reverting...");
                updater::revert(&preparation, &result.applied_actions, backup_dir.path())
                    .context("Revert after failed apply also failed")?;
                remove_backup(backup_dir);
                return Err(error);
            }
            let elapsed = start.elapsed();
            remove_backup(backup_dir);

            println!("\nPatch applied successfully!");
            let renamed = result.applied_actions.iter().any(|action| {
                matches!(action, PatchAction::RenameRoot(rename) if rename.renamed())
            });
            print_summary(&preparation.patch.summary());
            println!("  Root renamed: {}", yes_no(renamed));
            println!("  Time elapsed: {:.3}s", elapsed.as_secs_f64());
        }
        Commands::Digest { dir, ignored } => {
            let fingerprints = tokio::task::spawn_blocking(move || {
                updater::digest_files(&dir, &ignored)
            })
            .await??;
            for (path, fingerprint) in fingerprints {
                println!("{}\t{:016x}", path, fingerprint);
            }
        }
    }

    Ok(())
}
