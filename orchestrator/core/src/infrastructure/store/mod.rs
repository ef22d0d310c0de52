// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Lock-Guarded Store
//!
//! Durable registry state shared by every process on the host.
//!
//! | File | Content | Lock |
//! |------|---------|------|
//! | `registry.json` | registry entries keyed by name | `.registration.lock` |
//! | `leases.json` | unconfirmed port leases keyed by port | `.port_allocation.lock` |
//!
//! Reads take the registration lock shared, writes take it exclusive. When
//! both locks are needed they are always taken allocation first, then
//! registration. Documents are replaced atomically (temp file, fsync,
//! rename) so a reader never observes a partial write.
//!
//! An unparseable document is logged and treated as empty. The next write
//! moves the corrupt file aside as `*.corrupt` before replacing it.
//!
//! All methods block; async callers go through `tokio::task::spawn_blocking`.

pub mod lock;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::domain::config::LockConfig;
use crate::domain::registry::{PortLease, RegistryEntry, RegistryError};
use lock::{acquire, LockMode};

const REGISTRY_FILE: &str = "registry.json";
const LEASES_FILE: &str = "leases.json";
const REGISTRATION_LOCK: &str = ".registration.lock";
const ALLOCATION_LOCK: &str = ".port_allocation.lock";

pub type Entries = BTreeMap<String, RegistryEntry>;
pub type Leases = BTreeMap<u16, PortLease>;

#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryDocument {
    #[serde(default)]
    entries: Entries,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct LeaseDocument {
    #[serde(default)]
    leases: Leases,
}

/// Outcome of loading a document.
struct Loaded<D> {
    document: D,
    corrupt: bool,
}

#[derive(Debug)]
pub struct LockGuardedStore {
    dir: PathBuf,
    lock: LockConfig,
}

impl LockGuardedStore {
    pub fn open(dir: impl Into<PathBuf>, lock: LockConfig) -> Result<Self, RegistryError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        debug!(path = %dir.display(), "Opened registry store");
        Ok(Self { dir, lock })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn registry_path(&self) -> PathBuf {
        self.dir.join(REGISTRY_FILE)
    }

    pub fn leases_path(&self) -> PathBuf {
        self.dir.join(LEASES_FILE)
    }

    /// Snapshot of all entries under a shared lock.
    pub fn read_entries(&self) -> Result<Entries, RegistryError> {
        let _guard = acquire(&self.dir.join(REGISTRATION_LOCK), LockMode::Shared, &self.lock)?;
        let loaded: Loaded<RegistryDocument> = load(&self.registry_path());
        Ok(loaded.document.entries)
    }

    /// Snapshot of all leases under the allocation lock.
    pub fn read_leases(&self) -> Result<Leases, RegistryError> {
        let _guard = acquire(&self.dir.join(ALLOCATION_LOCK), LockMode::Exclusive, &self.lock)?;
        let loaded: Loaded<LeaseDocument> = load(&self.leases_path());
        Ok(loaded.document.leases)
    }

    /// Mutates entries under the exclusive registration lock. Nothing is
    /// written when `apply` fails.
    pub fn update_entries<T>(
        &self,
        apply: impl FnOnce(&mut Entries) -> Result<T, RegistryError>,
    ) -> Result<T, RegistryError> {
        let _guard = acquire(&self.dir.join(REGISTRATION_LOCK), LockMode::Exclusive, &self.lock)?;
        let mut loaded: Loaded<RegistryDocument> = load(&self.registry_path());
        let result = apply(&mut loaded.document.entries)?;
        persist(&self.registry_path(), &loaded.document, loaded.corrupt)?;
        Ok(result)
    }

    /// Mutates leases under the exclusive allocation lock while reading
    /// entries under a shared registration lock.
    pub fn update_leases<T>(
        &self,
        apply: impl FnOnce(&mut Leases, &Entries) -> Result<T, RegistryError>,
    ) -> Result<T, RegistryError> {
        let _allocation = acquire(&self.dir.join(ALLOCATION_LOCK), LockMode::Exclusive, &self.lock)?;
        let entries = {
            let _registration =
                acquire(&self.dir.join(REGISTRATION_LOCK), LockMode::Shared, &self.lock)?;
            let loaded: Loaded<RegistryDocument> = load(&self.registry_path());
            loaded.document.entries
        };
        let mut leases: Loaded<LeaseDocument> = load(&self.leases_path());
        let result = apply(&mut leases.document.leases, &entries)?;
        persist(&self.leases_path(), &leases.document, leases.corrupt)?;
        Ok(result)
    }

    /// Mutates entries and leases together, holding both locks exclusively.
    pub fn update_all<T>(
        &self,
        apply: impl FnOnce(&mut Entries, &mut Leases) -> Result<T, RegistryError>,
    ) -> Result<T, RegistryError> {
        let _allocation = acquire(&self.dir.join(ALLOCATION_LOCK), LockMode::Exclusive, &self.lock)?;
        let _registration =
            acquire(&self.dir.join(REGISTRATION_LOCK), LockMode::Exclusive, &self.lock)?;

        let mut entries: Loaded<RegistryDocument> = load(&self.registry_path());
        let mut leases: Loaded<LeaseDocument> = load(&self.leases_path());
        let result = apply(&mut entries.document.entries, &mut leases.document.leases)?;
        persist(&self.registry_path(), &entries.document, entries.corrupt)?;
        persist(&self.leases_path(), &leases.document, leases.corrupt)?;
        Ok(result)
    }
}

fn load<D: DeserializeOwned + Default>(path: &Path) -> Loaded<D> {
    match parse(path) {
        Ok(document) => Loaded {
            document,
            corrupt: false,
        },
        Err(e) => {
            warn!(error = %e, "Registry document unreadable, continuing with an empty one");
            Loaded {
                document: D::default(),
                corrupt: true,
            }
        }
    }
}

fn parse<D: DeserializeOwned + Default>(path: &Path) -> Result<D, RegistryError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(D::default()),
        Err(e) => {
            return Err(RegistryError::Corrupt {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })
        }
    };
    if content.trim().is_empty() {
        return Ok(D::default());
    }
    serde_json::from_str(&content).map_err(|e| RegistryError::Corrupt {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

fn persist<D: Serialize>(path: &Path, document: &D, was_corrupt: bool) -> Result<(), RegistryError> {
    if was_corrupt && path.exists() {
        let backup = path.with_extension("json.corrupt");
        warn!(
            path = %path.display(),
            backup = %backup.display(),
            "Preserving corrupt registry document before overwrite"
        );
        fs::rename(path, &backup)?;
    }
    atomic_write(path, &serde_json::to_vec_pretty(document)?)
}

fn atomic_write(path: &Path, content: &[u8]) -> Result<(), RegistryError> {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("document");
    let temp = path.with_file_name(format!(
        ".{}.{}.{}.tmp",
        file_name,
        std::process::id(),
        uuid::Uuid::new_v4().simple()
    ));

    let written = (|| -> std::io::Result<()> {
        let mut file = fs::File::create(&temp)?;
        file.write_all(content)?;
        file.sync_all()?;
        fs::rename(&temp, path)
    })();

    if let Err(e) = written {
        let _ = fs::remove_file(&temp);
        return Err(e.into());
    }
    Ok(())
}
