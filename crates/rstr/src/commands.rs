//! CLI command implementations
//!
//! Each command writes its report to the given writers and returns how many
//! entries failed, so `main` can turn that into an exit code and tests can
//! read the output.

use std::fs;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use cas::{BlobStore, CasError, ContentHash, FileStore};
use rstrconf::RstrConfig;

/// Import files and directories. Returns the number of failures.
pub fn add(
    store: &FileStore,
    paths: &[PathBuf],
    threads: usize,
    verbose: bool,
    out: &mut impl Write,
    err: &mut impl Write,
) -> Result<usize> {
    let report = store.add_files(paths, threads);

    if verbose {
        for (path, outcome) in &report.added {
            writeln!(out, "{}\t{}", outcome.hash, path.display())?;
        }
    }
    for (path, e) in &report.failed {
        writeln!(err, "{}\t{}", e, path.display())?;
    }

    let created = report.added.iter().filter(|(_, o)| o.created).count();
    tracing::info!(
        added = report.added.len(),
        created,
        failed = report.failed.len(),
        "import finished"
    );
    Ok(report.failed.len())
}

/// Report whether each reference is stored. Returns the number not present.
pub fn check(
    store: &FileStore,
    refs: &[String],
    metadata: bool,
    out: &mut impl Write,
) -> Result<usize> {
    let mut problems = 0;
    for raw in refs {
        let hash = match raw.parse::<ContentHash>() {
            Ok(hash) => hash,
            Err(_) => {
                writeln!(out, "INVALID\t{}", raw)?;
                problems += 1;
                continue;
            }
        };

        if !store.exists(&hash) {
            writeln!(out, "MISSING\t{}", hash)?;
            problems += 1;
            continue;
        }

        if !metadata {
            writeln!(out, "PRESENT\t{}", hash)?;
            continue;
        }

        match store.inspect(&hash) {
            Ok(reference) => writeln!(
                out,
                "PRESENT\t{}\t{}\t{}\t{}\t{}",
                hash,
                reference.size_bytes,
                reference.mime_type,
                reference.filename.as_deref().unwrap_or("-"),
                reference.created.to_rfc3339(),
            )?,
            // Deleted between the two calls.
            Err(CasError::NotFound(_)) => {
                writeln!(out, "MISSING\t{}", hash)?;
                problems += 1;
            }
            Err(e) => return Err(e).with_context(|| format!("Failed to inspect {}", hash)),
        }
    }
    Ok(problems)
}

/// Delete each reference. Returns the number that could not be deleted.
///
/// With `confirm`, each deletion is asked about on `out` first and skipped
/// unless the answer is `y`. A skipped blob is not a failure.
pub fn delete(
    store: &FileStore,
    refs: &[String],
    mut confirm: Option<&mut dyn BufRead>,
    out: &mut impl Write,
) -> Result<usize> {
    let mut problems = 0;
    for raw in refs {
        let Ok(hash) = raw.parse::<ContentHash>() else {
            writeln!(out, "INVALID\t{}", raw)?;
            problems += 1;
            continue;
        };

        if let Some(input) = confirm.as_deref_mut() {
            if !ask(input, out, &format!("Do you want to delete {}? [y/n]: ", hash))? {
                writeln!(out, "SKIPPED\t{}", hash)?;
                continue;
            }
        }

        match store.delete(&hash) {
            Ok(()) => writeln!(out, "DELETED\t{}", hash)?,
            Err(CasError::NotFound(_)) => {
                writeln!(out, "MISSING\t{}", hash)?;
                problems += 1;
            }
            Err(e) => {
                writeln!(out, "ERROR\t{}\t{}", hash, e)?;
                problems += 1;
            }
        }
    }
    Ok(problems)
}

/// Print `prompt` and read one answer. Only `y` confirms; end of input declines.
fn ask(input: &mut dyn BufRead, out: &mut impl Write, prompt: &str) -> Result<bool> {
    write!(out, "{}", prompt)?;
    out.flush()?;
    let mut answer = String::new();
    input
        .read_line(&mut answer)
        .context("Failed to read answer")?;
    Ok(answer.trim() == "y")
}

/// Re-hash every stored blob. Returns the number of corrupt or unreadable blobs.
pub fn verify(store: &FileStore, out: &mut impl Write) -> Result<usize> {
    let hashes = store.scan().context("Failed to scan blob store")?;
    let mut problems = 0;

    for hash in &hashes {
        match store.verify(hash) {
            Ok(true) => {}
            Ok(false) => {
                writeln!(out, "CORRUPT\t{}", hash)?;
                problems += 1;
            }
            // Removed while we were walking.
            Err(CasError::NotFound(_)) => {}
            Err(e) => {
                writeln!(out, "ERROR\t{}\t{}", hash, e)?;
                problems += 1;
            }
        }
    }

    tracing::info!(checked = hashes.len(), problems, "verify finished");
    Ok(problems)
}

/// Write `config` as a commented TOML file.
pub fn create_config(config: &RstrConfig, path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    fs::write(path, config.to_toml())
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}
