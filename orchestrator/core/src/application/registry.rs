// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Registry Client
//!
//! Async facade over the [`LockGuardedStore`] and [`PortAllocator`]. Every
//! store operation takes file locks and blocks, so each call runs on
//! `spawn_blocking`.
//!
//! An entry is stale when its `last_seen` is older than `stale_after`, or when
//! it is local, carries a PID, and that process is gone. Stale entries never
//! block a registration; they are replaced (with a warning) or reaped.

use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::domain::config::RegistryConfig;
use crate::domain::events::RegistryEvent;
use crate::domain::registry::{PortLease, PortRange, RegistryEntry, RegistryError};
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::port_allocator::PortAllocator;
use crate::infrastructure::process::process_exists;
use crate::infrastructure::store::LockGuardedStore;

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Options for [`RegistryClient::register`].
#[derive(Debug, Clone, Default)]
pub struct Registration {
    /// Lease obtained from `allocate_port`; confirmed by the registration.
    pub lease: Option<PortLease>,
    /// Replace a live entry with the same name instead of failing.
    pub takeover: bool,
}

impl Registration {
    pub fn with_lease(lease: PortLease) -> Self {
        Self {
            lease: Some(lease),
            takeover: false,
        }
    }

    pub fn takeover(mut self) -> Self {
        self.takeover = true;
        self
    }
}

#[derive(Clone)]
pub struct RegistryClient {
    store: Arc<LockGuardedStore>,
    allocator: PortAllocator,
    stale_after: Duration,
    lease_ttl: Duration,
    event_bus: EventBus,
}

impl RegistryClient {
    /// Opens (creating if needed) the registry directory from configuration.
    pub fn open(config: &RegistryConfig, event_bus: EventBus) -> Result<Self, RegistryError> {
        let store = Arc::new(LockGuardedStore::open(&config.path, config.lock)?);
        Ok(Self::new(store, config, event_bus))
    }

    pub fn new(store: Arc<LockGuardedStore>, config: &RegistryConfig, event_bus: EventBus) -> Self {
        Self {
            allocator: PortAllocator::new(store.clone(), config),
            store,
            stale_after: config.stale_after,
            lease_ttl: config.lease_ttl,
            event_bus,
        }
    }

    pub fn store(&self) -> &Arc<LockGuardedStore> {
        &self.store
    }

    pub fn port_range(&self) -> PortRange {
        self.allocator.range()
    }

    pub async fn allocate_port(&self) -> Result<PortLease, RegistryError> {
        let allocator = self.allocator.clone();
        run_blocking(move || allocator.allocate()).await
    }

    pub async fn allocate_port_in(&self, range: PortRange) -> Result<PortLease, RegistryError> {
        let allocator = self.allocator.clone();
        run_blocking(move || allocator.allocate_in(range)).await
    }

    /// Releases a lease that will not be registered.
    pub async fn release_port(&self, lease: &PortLease) -> Result<bool, RegistryError> {
        let allocator = self.allocator.clone();
        let lease = lease.clone();
        run_blocking(move || allocator.release(&lease)).await
    }

    /// Registers `entry`, stamping `registered_at` and `last_seen`.
    ///
    /// Fails with [`RegistryError::NameConflict`] when a live entry already
    /// uses the name (unless `takeover`), and with [`RegistryError::PortInUse`]
    /// when a live entry or another unexpired lease holds the port. On failure
    /// the registry is left untouched.
    pub async fn register(
        &self,
        entry: RegistryEntry,
        registration: Registration,
    ) -> Result<RegistryEntry, RegistryError> {
        entry.validate()?;
        let store = self.store.clone();
        let stale_after = self.stale_after;
        let lease_ttl = self.lease_ttl;

        let (entry, took_over) = run_blocking(move || {
            store.update_all(move |entries, leases| {
                let now = Utc::now();
                let mut entry = entry;
                entry.registered_at = now;
                entry.last_seen = now;

                let mut took_over = false;
                if let Some(existing) = entries.get(&entry.name) {
                    if is_stale(existing, stale_after) {
                        warn!(agent = %entry.name, last_seen = %existing.last_seen, "Replacing stale registry entry");
                    } else if registration.takeover {
                        info!(agent = %entry.name, "Taking over live registry entry");
                        took_over = true;
                    } else {
                        return Err(RegistryError::NameConflict(entry.name.clone()));
                    }
                }

                if let Some(port) = entry.port {
                    let mut stale_holders = Vec::new();
                    for other in entries.values() {
                        if other.name == entry.name || other.port != Some(port) {
                            continue;
                        }
                        if is_stale(other, stale_after) {
                            stale_holders.push(other.name.clone());
                        } else {
                            return Err(RegistryError::PortInUse {
                                port,
                                holder: other.name.clone(),
                            });
                        }
                    }

                    if let Some(held) = leases.get(&port) {
                        let ours = registration
                            .lease
                            .as_ref()
                            .is_some_and(|lease| lease.lease_id == held.lease_id);
                        if !ours && !held.is_expired(lease_ttl, now) {
                            return Err(RegistryError::PortInUse {
                                port,
                                holder: format!("lease {}", held.lease_id),
                            });
                        }
                        leases.remove(&port);
                    }

                    for name in stale_holders {
                        warn!(agent = %name, port, "Removing stale entry holding the requested port");
                        entries.remove(&name);
                    }
                }

                if let Some(lease) = &registration.lease {
                    leases.retain(|_, held| held.lease_id != lease.lease_id);
                }

                entries.insert(entry.name.clone(), entry.clone());
                Ok((entry, took_over))
            })
        })
        .await?;

        info!(
            agent = %entry.name,
            port = ?entry.port,
            transport = %entry.transport_kind,
            took_over,
            "Registered agent"
        );
        self.event_bus.publish_registry_event(RegistryEvent::AgentRegistered {
            name: entry.name.clone(),
            port: entry.port,
            took_over,
            registered_at: entry.registered_at,
        });
        Ok(entry)
    }

    /// Removes an entry. Returns false if it was not registered.
    pub async fn deregister(&self, name: &str) -> Result<bool, RegistryError> {
        let store = self.store.clone();
        let key = name.to_string();
        let removed = run_blocking(move || store.update_entries(move |entries| Ok(entries.remove(&key).is_some())))
            .await?;

        if removed {
            info!(agent = name, "Deregistered agent");
            self.event_bus.publish_registry_event(RegistryEvent::AgentDeregistered {
                name: name.to_string(),
                deregistered_at: Utc::now(),
            });
        }
        Ok(removed)
    }

    pub async fn get(&self, name: &str) -> Result<Option<RegistryEntry>, RegistryError> {
        let store = self.store.clone();
        let key = name.to_string();
        run_blocking(move || Ok(store.read_entries()?.remove(&key))).await
    }

    /// All entries, sorted by name, stale ones included.
    pub async fn list(&self) -> Result<Vec<RegistryEntry>, RegistryError> {
        let store = self.store.clone();
        run_blocking(move || Ok(store.read_entries()?.into_values().collect())).await
    }

    /// Entries that are not stale, sorted by name.
    pub async fn list_live(&self) -> Result<Vec<RegistryEntry>, RegistryError> {
        let stale_after = self.stale_after;
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|entry| !is_stale(entry, stale_after))
            .collect())
    }

    /// Refreshes `last_seen`. Returns false if the entry is gone.
    pub async fn touch(&self, name: &str) -> Result<bool, RegistryError> {
        let store = self.store.clone();
        let key = name.to_string();
        let touched = run_blocking(move || {
            store.update_entries(move |entries| match entries.get_mut(&key) {
                Some(entry) => {
                    entry.last_seen = Utc::now();
                    Ok(true)
                }
                None => Ok(false),
            })
        })
        .await?;
        debug!(agent = name, touched, "Heartbeat");
        Ok(touched)
    }

    /// Removes stale entries and returns their names.
    pub async fn reap_stale(&self) -> Result<Vec<String>, RegistryError> {
        let store = self.store.clone();
        let stale_after = self.stale_after;
        let reaped = run_blocking(move || {
            store.update_entries(move |entries| {
                let stale: Vec<RegistryEntry> = entries
                    .values()
                    .filter(|entry| is_stale(entry, stale_after))
                    .cloned()
                    .collect();
                for entry in &stale {
                    entries.remove(&entry.name);
                }
                Ok(stale)
            })
        })
        .await?;

        let now = Utc::now();
        for entry in &reaped {
            warn!(agent = %entry.name, last_seen = %entry.last_seen, "Reaped stale registry entry");
            self.event_bus.publish_registry_event(RegistryEvent::StaleEntryReaped {
                name: entry.name.clone(),
                last_seen: entry.last_seen,
                reaped_at: now,
            });
        }
        Ok(reaped.into_iter().map(|entry| entry.name).collect())
    }

    /// Polls until a live entry named `name` appears or `timeout` elapses.
    pub async fn wait_for(
        &self,
        name: &str,
        timeout: Duration,
    ) -> Result<Option<RegistryEntry>, RegistryError> {
        let started = Instant::now();
        loop {
            if let Some(entry) = self.get(name).await? {
                if !self.is_stale(&entry) {
                    return Ok(Some(entry));
                }
            }
            let elapsed = started.elapsed();
            if elapsed >= timeout {
                return Ok(None);
            }
            tokio::time::sleep(WAIT_POLL_INTERVAL.min(timeout - elapsed)).await;
        }
    }

    pub fn is_stale(&self, entry: &RegistryEntry) -> bool {
        is_stale(entry, self.stale_after)
    }
}

fn is_stale(entry: &RegistryEntry, stale_after: Duration) -> bool {
    if entry.is_expired(stale_after, Utc::now()) {
        return true;
    }
    match entry.process_id {
        Some(pid) if entry.is_local() => !process_exists(pid),
        _ => false,
    }
}

async fn run_blocking<T, F>(work: F) -> Result<T, RegistryError>
where
    F: FnOnce() -> Result<T, RegistryError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| RegistryError::Io(std::io::Error::other(e)))?
}
