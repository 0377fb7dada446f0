//! Working-directory preparation for a corpus run.
//!
//! Resolves the corpus directory name, optionally archives a previous copy,
//! and materializes a fresh copy of the pristine exercise set.

use std::collections::BTreeSet;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use regex::Regex;
use tokio::process::Command;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::error::CorpusError;

/// Sibling directory that receives archived corpus copies.
pub const ARCHIVE_DIR: &str = "OLD";

/// Resolves the corpus directory for a run.
///
/// A bare name is placed under `root`. A directory that does not exist yet
/// and does not already carry a `YYYY-MM-DD-` prefix gets a timestamp prefix.
pub fn resolve_corpus_dir(name: &Path, root: &Path, now: NaiveDateTime) -> PathBuf {
    let mut dir = if name.components().count() == 1 {
        root.join(name)
    } else {
        name.to_path_buf()
    };

    if !dir.exists() && !is_dated(&dir) {
        let stamp = now.format("%Y-%m-%d-%H-%M--").to_string();
        let file_name = dir
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        dir = dir.with_file_name(format!("{stamp}{file_name}"));
    }
    dir
}

fn is_dated(dir: &Path) -> bool {
    let Some(name) = dir.file_name() else {
        return false;
    };
    Regex::new(r"^\d{4}-\d{2}-\d{2}-")
        .map(|re| re.is_match(&name.to_string_lossy()))
        .unwrap_or(false)
}

/// Where a cleaned corpus copy was archived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanOutcome {
    pub archived_to: PathBuf,
}

/// Moves an existing corpus copy out of the way so a fresh one can be made.
///
/// Refuses unless the directory's top-level names match the pristine set
/// exactly. The copy lands in `<parent>/OLD/<name>`, or gets a timestamp
/// prefix there if that name is taken.
pub fn clean_corpus(
    dir: &Path,
    pristine: &Path,
    now: NaiveDateTime,
) -> Result<CleanOutcome, CorpusError> {
    if top_level_names(dir)? != top_level_names(pristine)? {
        return Err(CorpusError::UnsafeClean(dir.to_path_buf()));
    }

    let parent = dir.parent().unwrap_or_else(|| Path::new("."));
    let archive = parent.join(ARCHIVE_DIR);
    fs::create_dir_all(&archive)?;

    let name = dir.file_name().unwrap_or_default().to_string_lossy().to_string();
    let mut dest = archive.join(&name);
    if dest.exists() {
        let stamp = now.format("%Y-%m-%d-%H-%M-%S").to_string();
        dest = archive.join(format!("{stamp}{name}"));
    }

    info!("Cleaning up and replacing {}", dir.display());
    fs::rename(dir, &dest)?;
    Ok(CleanOutcome { archived_to: dest })
}

fn top_level_names(dir: &Path) -> Result<BTreeSet<OsString>, CorpusError> {
    let mut names = BTreeSet::new();
    for entry in fs::read_dir(dir)? {
        names.insert(entry?.file_name());
    }
    Ok(names)
}

/// Copies the pristine exercise set into `dir` unless it already exists.
///
/// Returns `true` when a copy was made.
pub fn materialize(dir: &Path, pristine: &Path) -> Result<bool, CorpusError> {
    if dir.exists() {
        return Ok(false);
    }
    if !pristine.is_dir() {
        return Err(CorpusError::PristineMissing(pristine.to_path_buf()));
    }
    copy_dir_recursive(pristine, dir)?;
    info!("Copied {} to {}", pristine.display(), dir.display());
    Ok(true)
}

fn copy_dir_recursive(src: &Path, dst: &Path) -> Result<(), CorpusError> {
    for entry in WalkDir::new(src) {
        let entry = entry?;
        let rel = entry.path().strip_prefix(src).unwrap_or(entry.path());
        let target = dst.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Identifier of the harness checkout: short commit hash, `-dirty` if the
/// tree has local changes, `unknown` outside a git checkout.
pub async fn commit_identifier() -> String {
    let head = Command::new("git")
        .args(["rev-parse", "--short=7", "HEAD"])
        .output()
        .await;
    let mut hash = match head {
        Ok(o) if o.status.success() => String::from_utf8_lossy(&o.stdout).trim().to_string(),
        Ok(_) | Err(_) => {
            debug!("Not inside a git checkout, using 'unknown' commit identifier");
            return "unknown".to_string();
        }
    };

    if let Ok(status) = Command::new("git").args(["status", "--porcelain"]).output().await {
        if status.status.success() && !status.stdout.iter().all(u8::is_ascii_whitespace) {
            hash.push_str("-dirty");
        }
    }
    hash
}
