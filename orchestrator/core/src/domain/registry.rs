// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Registry Domain Types
//!
//! - [`RegistryEntry`]: one per live agent, keyed by name.
//! - [`TransportKind`]: selects the transport adapter for an entry.
//! - [`PortRange`] / [`PortLease`]: managed port range and unconfirmed reservations.
//! - [`RegistryError`]: failures surfaced synchronously by registry operations.
//!
//! # Invariants
//!
//! - `name` is unique across the registry at any instant.
//! - A port is held by at most one entry or unexpired lease at any instant.
//! - `transport_kind` alone decides which adapter is used for an entry.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

/// How an agent is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportKind {
    /// Independent process listening on a TCP socket (NDJSON records).
    DirectSocket,
    /// Routed through a supervising service over HTTP.
    ManagedApi,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::DirectSocket => write!(f, "direct-socket"),
            TransportKind::ManagedApi => write!(f, "managed-api"),
        }
    }
}

impl std::str::FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "direct-socket" | "socket" => Ok(TransportKind::DirectSocket),
            "managed-api" | "api" => Ok(TransportKind::ManagedApi),
            other => Err(format!("unknown transport kind '{}'", other)),
        }
    }
}

/// A registered agent endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub name: String,
    pub host: String,
    /// Mandatory for direct-socket entries. Managed-API entries without a port
    /// route to the configured supervisor endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    pub transport_kind: TransportKind,
    /// Logical grouping, e.g. the subsystem that launched the agent.
    #[serde(default)]
    pub owner_component: String,
    /// Used for liveness correlation only; the registry never owns the process.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_id: Option<u32>,
    pub registered_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl RegistryEntry {
    /// Direct-socket entry on `host:port`.
    pub fn socket(name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self::new(name, host, Some(port), TransportKind::DirectSocket)
    }

    /// Managed-API entry routed through the default supervisor endpoint.
    pub fn managed(name: impl Into<String>) -> Self {
        Self::new(name, "localhost", None, TransportKind::ManagedApi)
    }

    pub fn new(
        name: impl Into<String>,
        host: impl Into<String>,
        port: Option<u16>,
        transport_kind: TransportKind,
    ) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            host: host.into(),
            port,
            transport_kind,
            owner_component: String::new(),
            process_id: None,
            registered_at: now,
            last_seen: now,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner_component = owner.into();
        self
    }

    pub fn with_process_id(mut self, pid: u32) -> Self {
        self.process_id = Some(pid);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Model name advertised in metadata, used to pick a token budget profile.
    pub fn model(&self) -> Option<&str> {
        self.metadata.get("model").map(String::as_str)
    }

    /// True when `last_seen` is older than `stale_after` at `now`.
    pub fn is_expired(&self, stale_after: Duration, now: DateTime<Utc>) -> bool {
        match ChronoDuration::from_std(stale_after) {
            Ok(window) => now.signed_duration_since(self.last_seen) > window,
            Err(_) => false,
        }
    }

    /// Whether the host names this machine, so `process_id` can be checked.
    pub fn is_local(&self) -> bool {
        matches!(self.host.as_str(), "localhost" | "127.0.0.1" | "::1" | "0.0.0.0")
    }

    /// Checks the shape invariants that do not depend on other entries.
    pub fn validate(&self) -> Result<(), RegistryError> {
        validate_agent_name(&self.name)?;
        if self.host.is_empty() {
            return Err(RegistryError::InvalidEntry {
                name: self.name.clone(),
                reason: "host cannot be empty".to_string(),
            });
        }
        if self.transport_kind == TransportKind::DirectSocket && self.port.is_none() {
            return Err(RegistryError::InvalidEntry {
                name: self.name.clone(),
                reason: "direct-socket entries require a port".to_string(),
            });
        }
        Ok(())
    }
}

/// Agent names double as file names in the state directory, so they are
/// restricted to `[A-Za-z0-9._-]`.
pub fn validate_agent_name(name: &str) -> Result<(), RegistryError> {
    let valid = !name.is_empty()
        && name != "."
        && name != ".."
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(RegistryError::InvalidEntry {
            name: name.to_string(),
            reason: "names may only contain ASCII letters, digits, '.', '-' and '_'".to_string(),
        })
    }
}

/// Inclusive range of ports managed by the allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl PortRange {
    pub fn new(start: u16, end: u16) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, port: u16) -> bool {
        port >= self.start && port <= self.end
    }

    pub fn len(&self) -> usize {
        if self.end < self.start {
            0
        } else {
            usize::from(self.end - self.start) + 1
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = u16> {
        self.start..=self.end
    }
}

impl Default for PortRange {
    fn default() -> Self {
        Self { start: 45000, end: 50000 }
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// Unconfirmed port reservation. Confirmed by registering an entry with it,
/// released on failure, or expired after the lease TTL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortLease {
    pub port: u16,
    pub lease_id: Uuid,
    pub leased_at: DateTime<Utc>,
    pub holder_pid: u32,
}

impl PortLease {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            lease_id: Uuid::new_v4(),
            leased_at: Utc::now(),
            holder_pid: std::process::id(),
        }
    }

    pub fn is_expired(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        match ChronoDuration::from_std(ttl) {
            Ok(ttl) => now.signed_duration_since(self.leased_at) > ttl,
            Err(_) => false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("no ports available in range {start}-{end}")]
    AllocationExhausted { start: u16, end: u16 },

    #[error("agent name '{0}' is already registered by a live entry")]
    NameConflict(String),

    #[error("port {port} is already held by '{holder}'")]
    PortInUse { port: u16, holder: String },

    #[error("invalid registry entry '{name}': {reason}")]
    InvalidEntry { name: String, reason: String },

    #[error("registry file {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("timed out acquiring lock {path} after {waited:?}")]
    LockTimeout { path: PathBuf, waited: Duration },

    #[error("registry I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("registry serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for RegistryError {
    fn from(err: serde_json::Error) -> Self {
        RegistryError::Serialization(err.to_string())
    }
}
