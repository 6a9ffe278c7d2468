//! Reading and writing the JSON snapshot.
//!
//! The same file is the previous run's state and this run's output. It is
//! read once at the start of the merge and replaced at the end:
//!
//! ```text
//! public/
//! ├── news.json       # the snapshot
//! └── news.json.tmp   # exists only while a write is in flight
//! ```
//!
//! Writes go to a sibling temp file that is renamed over the target, so a
//! crash mid-write never leaves a half-written snapshot behind.

use crate::models::{ArticleRecord, Snapshot};
use crate::utils::looks_truncated;
use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, instrument, warn};

/// The snapshot could not be written. Fatal for the run.
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("cannot serialize snapshot: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("cannot write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(OsString::from).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Items of the previous snapshot at `path`.
///
/// Never fails: a missing file means a first run, and an unreadable or
/// corrupt one is logged and treated as empty. Records that break the
/// snapshot invariants are dropped.
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn load_previous(path: &Path) -> Vec<ArticleRecord> {
    let text = match fs::read_to_string(path).await {
        Ok(text) => text,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            info!("No previous snapshot; starting empty");
            return Vec::new();
        }
        Err(e) => {
            warn!(error = %e, "Cannot read previous snapshot; starting empty");
            return Vec::new();
        }
    };

    let snapshot: Snapshot = match serde_json::from_str(&text) {
        Ok(snapshot) => snapshot,
        Err(e) if looks_truncated(&e) => {
            warn!(error = %e, "Previous snapshot looks truncated; starting empty");
            return Vec::new();
        }
        Err(e) => {
            warn!(error = %e, "Previous snapshot is not valid; starting empty");
            return Vec::new();
        }
    };

    let total = snapshot.items.len();
    let items: Vec<ArticleRecord> = snapshot
        .items
        .into_iter()
        .filter(ArticleRecord::is_complete)
        .collect();
    if items.len() < total {
        debug!(dropped = total - items.len(), "Dropped incomplete records from previous snapshot");
    }
    info!(count = items.len(), "Loaded previous snapshot");
    items
}

/// Replace the snapshot at `path`, creating parent directories as needed.
#[instrument(level = "info", skip_all, fields(path = %path.display(), count = snapshot.count))]
pub async fn write_snapshot(snapshot: &Snapshot, path: &Path) -> Result<(), PersistError> {
    let json = serde_json::to_string_pretty(snapshot)?;
    let io_err = |source: std::io::Error| PersistError::Write {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await.map_err(io_err)?;
    }

    let tmp = tmp_path(path);
    fs::write(&tmp, json).await.map_err(io_err)?;
    fs::rename(&tmp, path).await.map_err(io_err)?;
    info!("Wrote snapshot");
    Ok(())
}
