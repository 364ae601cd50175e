use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;

use anyhow::Context;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::model::{MediaItem, ScheduleEntry};

// --- Persistence (JSON files) ---------------------------------------------
//
// Every file is replaced as a whole: write a sibling temp file, fsync it,
// then rename over the target. A crash leaves either the old or the new
// contents on disk, never a torn write.
//
// Calls here are blocking. Async callers go through spawn_blocking.

/// Write `value` as pretty JSON and force it to disk before returning.
///
/// Returns the modification time of the written file. It is taken from the
/// temp file before the rename, so a write landing on `path` right after
/// ours is never mistaken for our own.
pub fn write_json_durable<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<SystemTime> {
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
    if let Some(dir) = dir {
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
    }

    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("state");
    let tmp = path.with_file_name(format!(".{name}.{}.tmp", std::process::id()));

    let bytes = serde_json::to_vec_pretty(value)?;
    let written_at = {
        let mut f = File::create(&tmp)
            .with_context(|| format!("failed to create {}", tmp.display()))?;
        f.write_all(&bytes)?;
        f.flush()?;
        f.sync_all()
            .with_context(|| format!("failed to fsync {}", tmp.display()))?;
        // rename keeps the mtime
        f.metadata()?.modified()?
    };
    fs::rename(&tmp, path).with_context(|| {
        let _ = fs::remove_file(&tmp);
        format!("failed to rename {} -> {}", tmp.display(), path.display())
    })?;

    // Make the rename itself durable. Directories cannot be opened on every
    // platform, so this is best-effort.
    #[cfg(unix)]
    {
        if let Ok(d) = File::open(dir.unwrap_or_else(|| Path::new("."))) {
            let _ = d.sync_all();
        }
    }
    Ok(written_at)
}

/// Read JSON, treating a missing or malformed file as `T::default()`.
pub fn read_json_or_default<T: DeserializeOwned + Default>(path: &Path) -> T {
    let raw = match fs::read(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return T::default(),
        Err(e) => {
            warn!("failed to read {}, using defaults: {e}", path.display());
            return T::default();
        }
    };
    match serde_json::from_slice(&raw) {
        Ok(v) => v,
        Err(e) => {
            warn!("malformed {}, using defaults: {e}", path.display());
            T::default()
        }
    }
}

/// A JSON file shared with other processes.
///
/// Tracks the modification time this process last saw (its own writes
/// included) so foreign writes can be detected cheaply, and the revision of
/// the last snapshot written so an older snapshot never overwrites a newer
/// one.
#[derive(Debug)]
pub struct SharedJsonFile {
    path: PathBuf,
    observed: Mutex<Option<SystemTime>>,
    written_revision: Mutex<u64>,
}

impl SharedJsonFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            observed: Mutex::new(None),
            written_revision: Mutex::new(0),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn modified(&self) -> Option<SystemTime> {
        fs::metadata(&self.path).and_then(|m| m.modified()).ok()
    }

    /// True when the file on disk is newer than anything this process has
    /// read or written.
    pub fn changed_externally(&self) -> bool {
        let Some(on_disk) = self.modified() else {
            return false;
        };
        match *lock(&self.observed) {
            Some(seen) => on_disk > seen,
            None => true,
        }
    }

    pub fn read<T: DeserializeOwned + Default>(&self) -> T {
        let mtime = self.modified();
        let value = read_json_or_default(&self.path);
        *lock(&self.observed) = mtime;
        value
    }

    /// Write a snapshot taken at `revision`. Returns `Ok(false)` when a newer
    /// snapshot already landed.
    pub fn write<T: Serialize>(&self, value: &T, revision: u64) -> anyhow::Result<bool> {
        let mut written = lock(&self.written_revision);
        if revision <= *written {
            return Ok(false);
        }
        let written_at = write_json_durable(&self.path, value)?;
        *written = revision;
        *lock(&self.observed) = Some(written_at);
        Ok(true)
    }
}

/// Exclusive advisory lock on a sibling `.lock` file, released on drop.
///
/// Blocking. Async callers acquire it through spawn_blocking and may then
/// hold it across awaits.
#[derive(Debug)]
pub(crate) struct FileLock {
    #[cfg_attr(not(unix), allow(dead_code))]
    file: File,
}

impl FileLock {
    pub(crate) fn exclusive(path: &Path) -> anyhow::Result<Self> {
        if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        let file = fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(path)
            .with_context(|| format!("failed to open {}", path.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            // SAFETY: the descriptor is owned by `file`, which outlives the lock.
            let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX) };
            if rc != 0 {
                return Err(std::io::Error::last_os_error())
                    .with_context(|| format!("flock({}) failed", path.display()));
            }
        }
        Ok(Self { file })
    }

    /// `<path>.lock`
    pub(crate) fn sibling_of(path: &Path) -> PathBuf {
        let mut name = path.as_os_str().to_owned();
        name.push(".lock");
        PathBuf::from(name)
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            // SAFETY: see `exclusive`.
            unsafe {
                libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
            }
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// On-disk shape of the persisted store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    #[serde(default)]
    pub library: Vec<MediaItem>,
    #[serde(default)]
    pub schedule: Vec<ScheduleEntry>,
    /// Filenames that ingestion must never admit again.
    #[serde(default)]
    pub deleted_files: BTreeSet<String>,
}

/// Durable record of what exists: library, schedule, tombstones.
#[derive(Debug)]
pub struct PersistedStore {
    file: SharedJsonFile,
}

impl PersistedStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { file: SharedJsonFile::new(path) }
    }

    pub fn load(&self) -> StoreSnapshot {
        self.file.read()
    }

    pub fn save(&self, snapshot: &StoreSnapshot, revision: u64) -> anyhow::Result<bool> {
        self.file.write(snapshot, revision)
    }

    pub fn modified(&self) -> Option<SystemTime> {
        self.file.modified()
    }

    pub fn changed_externally(&self) -> bool {
        self.file.changed_externally()
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }
}
