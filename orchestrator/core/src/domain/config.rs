// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Chorus Configuration Types
//
// Defines the configuration schema consumed by every Chorus component:
// - Kubernetes-style manifest format (apiVersion/kind/metadata/spec)
// - Registry location, managed port range and lock timings
// - Transport timeouts and the managed-API supervisor endpoint
// - Broadcast timeouts and concurrency
// - Model window table, budget allocation and severity thresholds
// - Sundown state directory and summary timeout

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::budget::{BudgetAllocation, ModelProfile, Thresholds, TokenEstimator};
use crate::domain::registry::PortRange;

pub const API_VERSION: &str = "chorus/v1";
pub const KIND: &str = "ChorusConfig";

/// Top-level configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChorusConfig {
    /// API version (must be "chorus/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "ChorusConfig")
    pub kind: String,

    pub metadata: ManifestMetadata,

    #[serde(default)]
    pub spec: ChorusConfigSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChorusConfigSpec {
    #[serde(default)]
    pub registry: RegistryConfig,

    #[serde(default)]
    pub transport: TransportConfig,

    #[serde(default)]
    pub broadcast: BroadcastConfig,

    #[serde(default)]
    pub budget: BudgetConfig,

    #[serde(default)]
    pub lifecycle: LifecycleConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Directory holding registry.json, leases.json and the lock files
    #[serde(default = "default_registry_path")]
    pub path: PathBuf,

    #[serde(default)]
    pub port_range: PortRange,

    /// Entries not seen for this long are reaped
    #[serde(default = "default_entry_stale_after", with = "humantime_serde")]
    pub stale_after: Duration,

    /// Unconfirmed port leases expire after this long
    #[serde(default = "default_lease_ttl", with = "humantime_serde")]
    pub lease_ttl: Duration,

    /// Confirm a candidate port is bindable before leasing it
    #[serde(default = "default_true")]
    pub probe_bind: bool,

    #[serde(default)]
    pub lock: LockConfig,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            path: default_registry_path(),
            port_range: PortRange::default(),
            stale_after: default_entry_stale_after(),
            lease_ttl: default_lease_ttl(),
            probe_bind: true,
            lock: LockConfig::default(),
        }
    }
}

/// Advisory lock timings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LockConfig {
    /// A contended lock file untouched for this long is treated as abandoned
    #[serde(default = "default_lock_stale_after", with = "humantime_serde")]
    pub stale_after: Duration,

    /// Give up acquiring after this long
    #[serde(default = "default_lock_max_wait", with = "humantime_serde")]
    pub max_wait: Duration,

    #[serde(default = "default_initial_backoff", with = "humantime_serde")]
    pub initial_backoff: Duration,

    #[serde(default = "default_max_backoff", with = "humantime_serde")]
    pub max_backoff: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            stale_after: default_lock_stale_after(),
            max_wait: default_lock_max_wait(),
            initial_backoff: default_initial_backoff(),
            max_backoff: default_max_backoff(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// Whole-call timeout for send, per-frame idle timeout for stream
    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,

    #[serde(default)]
    pub managed_api: ManagedApiConfig,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: default_connect_timeout(),
            request_timeout: default_request_timeout(),
            managed_api: ManagedApiConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagedApiConfig {
    /// Supervisor base URL used for entries that carry no port
    #[serde(default = "default_managed_endpoint")]
    pub endpoint: String,

    /// Bearer token (supports "env:VAR_NAME")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl ManagedApiConfig {
    /// Resolves `env:VAR_NAME` indirection. A missing variable yields `None`.
    pub fn resolved_api_key(&self) -> Option<String> {
        let key = self.api_key.as_ref()?;
        match key.strip_prefix("env:") {
            Some(var) => std::env::var(var).ok(),
            None => Some(key.clone()),
        }
    }
}

impl Default for ManagedApiConfig {
    fn default() -> Self {
        Self {
            endpoint: default_managed_endpoint(),
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastConfig {
    #[serde(default = "default_per_target_timeout", with = "humantime_serde")]
    pub per_target_timeout: Duration,

    /// Optional cap on the whole fan-out
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub job_timeout: Option<Duration>,

    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            per_target_timeout: default_per_target_timeout(),
            job_timeout: None,
            max_concurrency: default_max_concurrency(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    /// Model assumed for agents that do not advertise one
    #[serde(default = "default_model_name")]
    pub default_model: String,

    /// Fraction added on top of the raw estimate
    #[serde(default = "default_safety_margin")]
    pub safety_margin: f64,

    /// Fixed tokens added per text segment
    #[serde(default = "default_turn_overhead")]
    pub turn_overhead: u64,

    #[serde(default)]
    pub allocation: BudgetAllocation,

    #[serde(default)]
    pub thresholds: Thresholds,

    #[serde(default = "default_models")]
    pub models: Vec<ModelProfile>,
}

impl BudgetConfig {
    pub fn estimator(&self) -> TokenEstimator {
        TokenEstimator {
            safety_margin: self.safety_margin,
            turn_overhead: self.turn_overhead,
        }
    }

    pub fn model(&self, name: &str) -> Option<&ModelProfile> {
        self.models.iter().find(|m| m.name == name)
    }
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            default_model: default_model_name(),
            safety_margin: default_safety_margin(),
            turn_overhead: default_turn_overhead(),
            allocation: BudgetAllocation::default(),
            thresholds: Thresholds::default(),
            models: default_models(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// Directory holding sundown state, fresh-start markers and the archive
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    #[serde(default = "default_summary_timeout", with = "humantime_serde")]
    pub summary_timeout: Duration,

    /// Keep consumed states under archive/ instead of deleting them
    #[serde(default = "default_true")]
    pub archive: bool,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            summary_timeout: default_summary_timeout(),
            archive: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (e.g., "info", "debug", "trace")
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format ("json" or "text")
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

// Default value functions
fn default_true() -> bool {
    true
}

fn chorus_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".chorus")
}

fn default_registry_path() -> PathBuf {
    chorus_home().join("registry")
}

fn default_state_dir() -> PathBuf {
    chorus_home().join("sundown")
}

fn default_entry_stale_after() -> Duration {
    Duration::from_secs(300)
}

fn default_lease_ttl() -> Duration {
    Duration::from_secs(30)
}

fn default_lock_stale_after() -> Duration {
    Duration::from_secs(10)
}

fn default_lock_max_wait() -> Duration {
    Duration::from_secs(30)
}

fn default_initial_backoff() -> Duration {
    Duration::from_millis(10)
}

fn default_max_backoff() -> Duration {
    Duration::from_millis(500)
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(2)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_managed_endpoint() -> String {
    "http://localhost:8003".to_string()
}

fn default_per_target_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_max_concurrency() -> usize {
    16
}

fn default_model_name() -> String {
    "default".to_string()
}

fn default_safety_margin() -> f64 {
    0.10
}

fn default_turn_overhead() -> u64 {
    4
}

fn default_models() -> Vec<ModelProfile> {
    vec![
        ModelProfile::new("default", 32_000),
        ModelProfile::new("claude", 200_000),
        ModelProfile {
            chars_per_token: 3.8,
            ..ModelProfile::new("gpt-4o", 128_000)
        },
        ModelProfile {
            chars_per_token: 3.2,
            ..ModelProfile::new("llama3", 8_192)
        },
    ]
}

fn default_summary_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

impl Default for ChorusConfig {
    fn default() -> Self {
        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "chorus".to_string());

        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ManifestMetadata {
                name: hostname,
                labels: None,
            },
            spec: ChorusConfigSpec::default(),
        }
    }
}

impl ChorusConfig {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Save configuration to YAML file
    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Parse configuration from YAML string
    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let mut config: Self = serde_yaml::from_str(yaml)?;
        config.expand_paths();
        Ok(config)
    }

    /// Discover configuration file using precedence order
    /// 1. CHORUS_CONFIG_PATH environment variable
    /// 2. ./chorus-config.yaml (working directory)
    /// 3. ~/.chorus/config.yaml (user home)
    /// 4. /etc/chorus/config.yaml (system)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("CHORUS_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./chorus-config.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        let user_config = chorus_home().join("config.yaml");
        if user_config.exists() {
            return Some(user_config);
        }

        let system_config = PathBuf::from("/etc/chorus/config.yaml");
        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        // Explicit path must exist and parse
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path).map_err(|e| {
                anyhow::anyhow!("Failed to load config at {:?}: {}", path, e)
            })?;
            config.apply_env_overrides();
            return Ok(config);
        }

        if let Some(config_path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", config_path);
            let mut config = Self::from_yaml_file(config_path)?;
            config.apply_env_overrides();
            Ok(config)
        } else {
            tracing::debug!("No configuration file found in standard locations. Using defaults.");
            let mut config = Self::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("CHORUS_REGISTRY_PATH") {
            tracing::info!("Environment override: CHORUS_REGISTRY_PATH={}", val);
            self.spec.registry.path = expand_home(Path::new(&val));
        }

        if let Ok(val) = std::env::var("CHORUS_STATE_DIR") {
            tracing::info!("Environment override: CHORUS_STATE_DIR={}", val);
            self.spec.lifecycle.state_dir = expand_home(Path::new(&val));
        }

        if let Ok(val) = std::env::var("CHORUS_MANAGED_API_ENDPOINT") {
            tracing::info!("Environment override: CHORUS_MANAGED_API_ENDPOINT={}", val);
            self.spec.transport.managed_api.endpoint = val;
        }

        if let Ok(val) = std::env::var("CHORUS_BROADCAST_TIMEOUT_SECS") {
            match val.parse::<u64>() {
                Ok(secs) if secs > 0 => {
                    tracing::info!("Environment override: CHORUS_BROADCAST_TIMEOUT_SECS={}", secs);
                    self.spec.broadcast.per_target_timeout = Duration::from_secs(secs);
                }
                _ => {
                    tracing::warn!(
                        "Invalid value for CHORUS_BROADCAST_TIMEOUT_SECS: '{}'. Expected a positive integer. Ignoring.",
                        val
                    );
                }
            }
        }
    }

    fn expand_paths(&mut self) {
        self.spec.registry.path = expand_home(&self.spec.registry.path);
        self.spec.lifecycle.state_dir = expand_home(&self.spec.lifecycle.state_dir);
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != API_VERSION {
            anyhow::bail!(
                "Invalid apiVersion: '{}'. Must be '{}'",
                self.api_version,
                API_VERSION
            );
        }

        if self.kind != KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, KIND);
        }

        if self.metadata.name.is_empty() {
            anyhow::bail!("metadata.name cannot be empty");
        }

        let registry = &self.spec.registry;
        if registry.port_range.is_empty() {
            anyhow::bail!(
                "spec.registry.port_range is empty: start {} > end {}",
                registry.port_range.start,
                registry.port_range.end
            );
        }
        if registry.lock.max_wait.is_zero() || registry.lock.stale_after.is_zero() {
            anyhow::bail!("spec.registry.lock timeouts must be positive");
        }
        if registry.lock.initial_backoff > registry.lock.max_backoff {
            anyhow::bail!("spec.registry.lock.initial_backoff cannot exceed max_backoff");
        }

        let transport = &self.spec.transport;
        if transport.connect_timeout.is_zero() || transport.request_timeout.is_zero() {
            anyhow::bail!("spec.transport timeouts must be positive");
        }
        if transport.managed_api.endpoint.is_empty() {
            anyhow::bail!("spec.transport.managed_api.endpoint cannot be empty");
        }

        let broadcast = &self.spec.broadcast;
        if broadcast.per_target_timeout.is_zero() {
            anyhow::bail!("spec.broadcast.per_target_timeout must be positive");
        }
        if broadcast.max_concurrency == 0 {
            anyhow::bail!("spec.broadcast.max_concurrency must be at least 1");
        }

        let budget = &self.spec.budget;
        if !(0.0..=1.0).contains(&budget.safety_margin) {
            anyhow::bail!("spec.budget.safety_margin must be between 0.0 and 1.0");
        }
        if budget.allocation.total() > 1.0 + f64::EPSILON {
            anyhow::bail!(
                "spec.budget.allocation shares sum to {:.2}, must not exceed 1.0",
                budget.allocation.total()
            );
        }
        if !budget.thresholds.is_ordered() {
            anyhow::bail!(
                "spec.budget.thresholds must satisfy 0 < warn <= suggest_preserve <= auto_preserve <= critical <= 1"
            );
        }
        for model in &budget.models {
            if model.name.is_empty() {
                anyhow::bail!("Model name cannot be empty");
            }
            if model.window_size == 0 {
                anyhow::bail!("Model '{}' must have a positive window_size", model.name);
            }
            if model.chars_per_token <= 0.0 {
                anyhow::bail!("Model '{}' must have a positive chars_per_token", model.name);
            }
            if let Some(allocation) = &model.allocation {
                if allocation.total() > 1.0 + f64::EPSILON {
                    anyhow::bail!("Model '{}' allocation shares exceed 1.0", model.name);
                }
            }
        }
        if budget.model(&budget.default_model).is_none() {
            anyhow::bail!(
                "Default model '{}' not found in spec.budget.models",
                budget.default_model
            );
        }

        if self.spec.lifecycle.summary_timeout.is_zero() {
            anyhow::bail!("spec.lifecycle.summary_timeout must be positive");
        }

        Ok(())
    }
}

/// Expands a leading `~/` to the user's home directory.
pub fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| path.to_path_buf()),
        Err(_) => path.to_path_buf(),
    }
}
