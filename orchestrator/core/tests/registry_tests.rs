// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Registry behaviour across independent clients sharing one directory.
//!
//! Each `RegistryClient` opened on the same path stands in for a separate
//! process: they share nothing but the files and their locks.

use chorus_core::application::{Registration, RegistryClient};
use chorus_core::domain::config::{LockConfig, RegistryConfig};
use chorus_core::domain::registry::{PortRange, RegistryEntry, RegistryError};
use chorus_core::infrastructure::EventBus;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

fn config(dir: &Path, range: PortRange) -> RegistryConfig {
    RegistryConfig {
        path: dir.to_path_buf(),
        port_range: range,
        stale_after: Duration::from_secs(300),
        lease_ttl: Duration::from_secs(30),
        probe_bind: false,
        lock: LockConfig {
            stale_after: Duration::from_secs(10),
            max_wait: Duration::from_secs(10),
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(50),
        },
    }
}

fn client(dir: &Path, range: PortRange) -> RegistryClient {
    RegistryClient::open(&config(dir, range), EventBus::default()).unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_allocation_over_two_ports() {
    let dir = tempfile::tempdir().unwrap();
    let range = PortRange::new(9000, 9001);

    let handles: Vec<_> = (0..3)
        .map(|_| {
            let registry = client(dir.path(), range);
            tokio::spawn(async move { registry.allocate_port().await })
        })
        .collect();

    let mut ports = Vec::new();
    let mut exhausted = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(lease) => ports.push(lease.port),
            Err(RegistryError::AllocationExhausted { start: 9000, end: 9001 }) => exhausted += 1,
            Err(other) => panic!("unexpected error {:?}", other),
        }
    }

    ports.sort_unstable();
    assert_eq!(ports, vec![9000, 9001]);
    assert_eq!(exhausted, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_allocate_and_register_never_share_a_port() {
    let dir = tempfile::tempdir().unwrap();
    let range = PortRange::new(9100, 9119);

    let handles: Vec<_> = (0..12)
        .map(|i| {
            let registry = client(dir.path(), range);
            tokio::spawn(async move {
                let lease = registry.allocate_port().await?;
                let entry = RegistryEntry::socket(format!("agent-{i}"), "127.0.0.1", lease.port);
                registry.register(entry, Registration::with_lease(lease)).await
            })
        })
        .collect();

    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let entries = client(dir.path(), range).list().await.unwrap();
    assert_eq!(entries.len(), 12);
    let ports: HashSet<u16> = entries.iter().filter_map(|e| e.port).collect();
    assert_eq!(ports.len(), 12);
    assert!(ports.iter().all(|port| range.contains(*port)));
}

#[tokio::test]
async fn test_registration_is_visible_to_other_clients() {
    let dir = tempfile::tempdir().unwrap();
    let range = PortRange::new(9200, 9201);
    let writer = client(dir.path(), range);
    let reader = client(dir.path(), range);

    writer
        .register(
            RegistryEntry::socket("alpha", "127.0.0.1", 9200)
                .with_owner("tests")
                .with_metadata("model", "small"),
            Registration::default(),
        )
        .await
        .unwrap();

    let entry = reader.get("alpha").await.unwrap().unwrap();
    assert_eq!(entry.owner_component, "tests");
    assert_eq!(entry.model(), Some("small"));
    assert_eq!(entry.registered_at, entry.last_seen);
}

#[tokio::test]
async fn test_corrupt_registry_reads_empty_and_recovers() {
    let dir = tempfile::tempdir().unwrap();
    let range = PortRange::new(9300, 9301);
    let registry = client(dir.path(), range);
    std::fs::write(dir.path().join("registry.json"), b"\x00\x01 definitely not json").unwrap();

    assert!(registry.list().await.unwrap().is_empty());

    registry
        .register(RegistryEntry::managed("beta"), Registration::default())
        .await
        .unwrap();

    assert_eq!(registry.list().await.unwrap().len(), 1);
    assert!(dir.path().join("registry.json.corrupt").exists());
}

#[tokio::test]
async fn test_expired_entry_is_reaped() {
    let dir = tempfile::tempdir().unwrap();
    let range = PortRange::new(9400, 9401);
    let mut short = config(dir.path(), range);
    short.stale_after = Duration::from_millis(50);
    let registry = RegistryClient::open(&short, EventBus::default()).unwrap();

    registry
        .register(RegistryEntry::managed("beta"), Registration::default())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(120)).await;

    assert!(registry.list_live().await.unwrap().is_empty());
    assert_eq!(registry.reap_stale().await.unwrap(), vec!["beta".to_string()]);
    assert!(registry.list().await.unwrap().is_empty());
}
