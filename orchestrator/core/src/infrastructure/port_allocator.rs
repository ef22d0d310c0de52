// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Port Allocator
//!
//! Issues unique ports from the managed range. The allocation lock is held
//! only for the read-pick-write critical section; the lease it leaves behind
//! keeps the port reserved until the caller registers with it, releases it,
//! or the lease TTL runs out.

use chrono::Utc;
use std::collections::HashSet;
use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::domain::config::RegistryConfig;
use crate::domain::registry::{PortLease, PortRange, RegistryError};
use crate::infrastructure::store::LockGuardedStore;

#[derive(Debug, Clone)]
pub struct PortAllocator {
    store: Arc<LockGuardedStore>,
    range: PortRange,
    lease_ttl: Duration,
    probe_bind: bool,
}

impl PortAllocator {
    pub fn new(store: Arc<LockGuardedStore>, config: &RegistryConfig) -> Self {
        Self {
            store,
            range: config.port_range,
            lease_ttl: config.lease_ttl,
            probe_bind: config.probe_bind,
        }
    }

    pub fn range(&self) -> PortRange {
        self.range
    }

    pub fn allocate(&self) -> Result<PortLease, RegistryError> {
        self.allocate_in(self.range)
    }

    /// Leases the lowest free port in `range`. A port is free when no entry
    /// claims it, no unexpired lease holds it and, if probing is enabled, it
    /// can be bound on this host.
    pub fn allocate_in(&self, range: PortRange) -> Result<PortLease, RegistryError> {
        let lease_ttl = self.lease_ttl;
        let probe_bind = self.probe_bind;

        self.store.update_leases(move |leases, entries| {
            let now = Utc::now();
            leases.retain(|port, lease| {
                let keep = !lease.is_expired(lease_ttl, now);
                if !keep {
                    debug!(port = *port, lease_id = %lease.lease_id, "Dropping expired port lease");
                }
                keep
            });

            let taken: HashSet<u16> = entries
                .values()
                .filter_map(|entry| entry.port)
                .chain(leases.keys().copied())
                .collect();

            for port in range.iter() {
                if taken.contains(&port) {
                    continue;
                }
                if probe_bind && !is_bindable(port) {
                    debug!(port, "Port in use outside the registry, skipping");
                    continue;
                }
                let lease = PortLease::new(port);
                leases.insert(port, lease.clone());
                info!(port, lease_id = %lease.lease_id, "Leased port");
                return Ok(lease);
            }

            Err(RegistryError::AllocationExhausted {
                start: range.start,
                end: range.end,
            })
        })
    }

    /// Drops an unconfirmed lease. Returns false if it was already gone.
    pub fn release(&self, lease: &PortLease) -> Result<bool, RegistryError> {
        let port = lease.port;
        let lease_id = lease.lease_id;
        self.store.update_leases(move |leases, _| {
            match leases.get(&port) {
                Some(held) if held.lease_id == lease_id => {
                    leases.remove(&port);
                    debug!(port, "Released port lease");
                    Ok(true)
                }
                _ => Ok(false),
            }
        })
    }
}

fn is_bindable(port: u16) -> bool {
    TcpListener::bind(("127.0.0.1", port)).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::config::LockConfig;
    use crate::domain::registry::RegistryEntry;

    fn allocator(dir: &std::path::Path, range: PortRange, lease_ttl: Duration) -> PortAllocator {
        let store = Arc::new(LockGuardedStore::open(dir, LockConfig::default()).unwrap());
        let config = RegistryConfig {
            path: dir.to_path_buf(),
            port_range: range,
            lease_ttl,
            probe_bind: false,
            ..RegistryConfig::default()
        };
        PortAllocator::new(store, &config)
    }

    #[test]
    fn test_allocates_lowest_free_port_and_skips_registered() {
        let dir = tempfile::tempdir().unwrap();
        let allocator = allocator(dir.path(), PortRange::new(9000, 9002), Duration::from_secs(30));

        allocator
            .store
            .update_entries(|entries| {
                let entry = RegistryEntry::socket("alpha", "127.0.0.1", 9000);
                entries.insert(entry.name.clone(), entry);
                Ok(())
            })
            .unwrap();

        assert_eq!(allocator.allocate().unwrap().port, 9001);
        assert_eq!(allocator.allocate().unwrap().port, 9002);
        assert!(matches!(
            allocator.allocate(),
            Err(RegistryError::AllocationExhausted { start: 9000, end: 9002 })
        ));
    }

    #[test]
    fn test_released_lease_is_reusable() {
        let dir = tempfile::tempdir().unwrap();
        let allocator = allocator(dir.path(), PortRange::new(9000, 9000), Duration::from_secs(30));

        let lease = allocator.allocate().unwrap();
        assert!(allocator.allocate().is_err());
        assert!(allocator.release(&lease).unwrap());
        assert!(!allocator.release(&lease).unwrap());
        assert_eq!(allocator.allocate().unwrap().port, 9000);
    }

    #[test]
    fn test_expired_lease_is_reclaimed() {
        let dir = tempfile::tempdir().unwrap();
        let allocator = allocator(dir.path(), PortRange::new(9000, 9000), Duration::from_millis(20));

        let first = allocator.allocate().unwrap();
        std::thread::sleep(Duration::from_millis(50));
        let second = allocator.allocate().unwrap();
        assert_eq!(second.port, first.port);
        assert_ne!(second.lease_id, first.lease_id);
    }
}
