//! Download-directory artifact tracking.
//!
//! A new artifact is a file absent from the trigger-time baseline. While
//! any new file still looks like a partial write the download is treated
//! as in progress. Consumed artifacts are renamed with a timestamped
//! prefix and are never picked again.

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use std::collections::HashSet;
use std::fs::DirEntry;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::time::Instant;
use tracing::{debug, info};

use super::{Artifact, Baseline};

/// Prefix given to consumed artifacts.
pub const CONSUMED_PREFIX: &str = "15_minutes";

/// Suffixes browsers use for downloads still being written.
const PARTIAL_SUFFIXES: &[&str] = &[".crdownload", ".part", ".tmp", ".download"];

/// Whether a file name indicates an in-progress partial write.
pub fn is_partial(name: &str) -> bool {
    // Chrome on Linux also stages downloads as hidden `.com.google.Chrome.*` files.
    name.starts_with('.') || PARTIAL_SUFFIXES.iter().any(|s| name.ends_with(s))
}

pub fn is_consumed(name: &str) -> bool {
    name.starts_with(CONSUMED_PREFIX)
}

/// Name, path and mtime of a regular file. An entry that disappeared after
/// the directory was read (a download being renamed into place) is `None`.
fn stat_entry(entry: io::Result<DirEntry>) -> Result<Option<(String, PathBuf, SystemTime)>> {
    let (entry, meta) = match entry.and_then(|e| e.metadata().map(|m| (e, m))) {
        Ok((entry, meta)) if meta.is_file() => (entry, meta),
        Ok(_) => return Ok(None),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(error = %e, "Directory entry vanished while listing");
            return Ok(None);
        }
        Err(e) => return Err(e).context("Failed to stat download entry"),
    };
    let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
    Ok(Some((entry.file_name().to_string_lossy().into_owned(), entry.path(), modified)))
}

pub struct DownloadDir {
    dir: PathBuf,
    poll_interval: Duration,
}

impl DownloadDir {
    /// Use `dir` as the output location, creating it if needed.
    pub fn new(dir: impl Into<PathBuf>, poll_interval: Duration) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create download directory {}", dir.display()))?;
        Ok(Self { dir, poll_interval })
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    fn list(&self) -> Result<Vec<(String, PathBuf, SystemTime)>> {
        let entries = std::fs::read_dir(&self.dir)
            .with_context(|| format!("Failed to list {}", self.dir.display()))?;
        let mut files = Vec::new();
        for entry in entries {
            if let Some(file) = stat_entry(entry)? {
                files.push(file);
            }
        }
        Ok(files)
    }

    pub fn snapshot(&self) -> Result<Baseline> {
        let names: HashSet<String> = self.list()?.into_iter().map(|(name, _, _)| name).collect();
        Ok(Baseline(names))
    }

    /// The newest complete new file, or `None` if nothing new has finished.
    pub fn newest_complete(&self, baseline: &Baseline) -> Result<Option<Artifact>> {
        let fresh: Vec<_> = self
            .list()?
            .into_iter()
            .filter(|(name, _, _)| !baseline.contains(name) && !is_consumed(name))
            .collect();

        if fresh.iter().any(|(name, _, _)| is_partial(name)) {
            debug!(count = fresh.len(), "Download still in progress");
            return Ok(None);
        }

        Ok(fresh
            .into_iter()
            .max_by(|a, b| a.2.cmp(&b.2).then_with(|| a.0.cmp(&b.0)))
            .map(|(name, path, _)| Artifact { name, path }))
    }

    /// Poll until a complete new artifact appears or `timeout` elapses.
    pub async fn wait_for_new(&self, baseline: &Baseline, timeout: Duration) -> Result<Option<Artifact>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(artifact) = self.newest_complete(baseline)? {
                debug!(name = %artifact.name, "Artifact ready");
                return Ok(Some(artifact));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    pub async fn read(&self, artifact: &Artifact) -> Result<String> {
        tokio::fs::read_to_string(&artifact.path)
            .await
            .with_context(|| format!("Failed to read {}", artifact.path.display()))
    }

    /// Rename `artifact` to `<prefix>_<YYYYmmdd_HHMMSS><ext>`, adding a
    /// counter if that name is taken.
    pub fn mark_consumed(&self, artifact: &Artifact, at: NaiveDateTime) -> Result<PathBuf> {
        let ext = artifact
            .path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        let stem = format!("{CONSUMED_PREFIX}_{}", at.format("%Y%m%d_%H%M%S"));

        let mut target = self.dir.join(format!("{stem}{ext}"));
        let mut n = 1;
        while target.exists() {
            target = self.dir.join(format!("{stem}_{n}{ext}"));
            n += 1;
        }

        std::fs::rename(&artifact.path, &target).with_context(|| {
            format!("Failed to rename {} to {}", artifact.path.display(), target.display())
        })?;
        info!(from = %artifact.name, to = %target.display(), "Artifact marked consumed");
        Ok(target)
    }
}
