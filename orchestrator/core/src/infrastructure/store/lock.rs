// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Advisory lock files.
//!
//! Locks are taken with non-blocking `flock`-style attempts and retried with
//! exponential backoff up to `LockConfig::max_wait`. Exclusive holders stamp
//! the lock file with their PID and acquisition time, which refreshes its
//! modification time. A waiter that has been contending for longer than
//! `LockConfig::stale_after` on a lock file whose last stamp is also older
//! than that treats the holder as wedged: the file is moved aside and a
//! fresh one is created in its place.

use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, warn};

use crate::domain::config::LockConfig;
use crate::domain::registry::RegistryError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

/// Held lock. Released on drop.
#[derive(Debug)]
pub struct LockGuard {
    file: File,
    path: PathBuf,
    mode: LockMode,
}

impl LockGuard {
    pub fn mode(&self) -> LockMode {
        self.mode
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            debug!(path = %self.path.display(), error = %e, "Failed to unlock; closing the file releases it");
        }
    }
}

pub fn acquire(path: &Path, mode: LockMode, config: &LockConfig) -> Result<LockGuard, RegistryError> {
    let started = Instant::now();
    let mut backoff = config.initial_backoff;

    loop {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let attempt = match mode {
            LockMode::Shared => FileExt::try_lock_shared(&file),
            LockMode::Exclusive => FileExt::try_lock_exclusive(&file),
        };

        match attempt {
            Ok(()) => {
                if mode == LockMode::Exclusive {
                    stamp(&file)?;
                }
                return Ok(LockGuard {
                    file,
                    path: path.to_path_buf(),
                    mode,
                });
            }
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => {
                let waited = started.elapsed();

                if waited >= config.stale_after && is_abandoned(&file, path, config.stale_after) {
                    warn!(
                        path = %path.display(),
                        waited_ms = waited.as_millis() as u64,
                        "Reclaiming abandoned lock file"
                    );
                    reclaim(path);
                    continue;
                }

                if waited >= config.max_wait {
                    return Err(RegistryError::LockTimeout {
                        path: path.to_path_buf(),
                        waited,
                    });
                }

                let remaining = config.max_wait.saturating_sub(waited);
                std::thread::sleep(backoff.min(remaining).max(Duration::from_millis(1)));
                backoff = (backoff * 2).min(config.max_backoff);
            }
            Err(e) => return Err(e.into()),
        }
    }
}

fn stamp(mut file: &File) -> io::Result<()> {
    file.set_len(0)?;
    let acquired = chrono::Utc::now().to_rfc3339();
    writeln!(file, "pid={} acquired={}", std::process::id(), acquired)?;
    file.flush()
}

/// The lock file we failed on is still the one at `path` and has not been
/// stamped within `stale_after`.
fn is_abandoned(file: &File, path: &Path, stale_after: Duration) -> bool {
    let Ok(handle_meta) = file.metadata() else {
        return false;
    };
    let Ok(path_meta) = fs::metadata(path) else {
        return false;
    };
    if !same_file(&handle_meta, &path_meta) {
        return false;
    }
    let modified = handle_meta.modified().unwrap_or_else(|_| SystemTime::now());
    SystemTime::now()
        .duration_since(modified)
        .map(|age| age >= stale_after)
        .unwrap_or(false)
}

#[cfg(unix)]
fn same_file(a: &fs::Metadata, b: &fs::Metadata) -> bool {
    use std::os::unix::fs::MetadataExt;
    a.dev() == b.dev() && a.ino() == b.ino()
}

#[cfg(not(unix))]
fn same_file(_a: &fs::Metadata, _b: &fs::Metadata) -> bool {
    true
}

fn reclaim(path: &Path) {
    let aside = path.with_extension(format!("stale-{}", uuid::Uuid::new_v4().simple()));
    match fs::rename(path, &aside) {
        Ok(()) => {
            // The wedged holder keeps its handle on the old inode.
            if let Err(e) = fs::remove_file(&aside) {
                debug!(path = %aside.display(), error = %e, "Could not remove reclaimed lock file");
            }
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "Lock file already reclaimed by another waiter");
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to move abandoned lock file aside");
        }
    }
}
