//! Configuration types for a Vigil control-plane instance.
//!
//! [`VigilConfig`] is the top-level configuration loaded from `vigil.toml`.
//! Every section has defaults, so an empty file is a valid (if unauthenticated)
//! configuration; [`VigilConfig::validate`] enforces what serving requires.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::event::RiskLevel;
use crate::VigilError;

/// Default configuration file name.
pub const CONFIG_FILENAME: &str = "vigil.toml";

/// Default ledger database file name.
pub const LEDGER_FILENAME: &str = "vigil.db";

/// Listener and transport limits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address for the WebSocket and HTTP listener.
    pub listen: String,
    /// Browser origins allowed to connect. Empty means any origin.
    pub allowed_origins: Vec<String>,
    /// Largest inbound frame accepted, in bytes.
    pub max_message_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:7878".into(),
            allowed_origins: Vec::new(),
            max_message_bytes: 1024 * 1024,
        }
    }
}

/// Credentials for the three client roles.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AuthConfig {
    /// Shared secret producers present at registration.
    pub producer_secret: String,
    /// HMAC key for operator and observer session tokens.
    pub session_secret: String,
    /// Lifetime of issued session tokens.
    pub session_ttl_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            producer_secret: String::new(),
            session_secret: String::new(),
            session_ttl_secs: 12 * 60 * 60,
        }
    }
}

/// Ingestion guard limits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IngestConfig {
    /// Event ids remembered per connection for deduplication.
    pub dedup_capacity: usize,
    /// How long a seen event id stays remembered.
    pub dedup_ttl_secs: u64,
    /// Messages accepted per connection per one-second window.
    pub messages_per_second: u32,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            dedup_capacity: 10_000,
            dedup_ttl_secs: 300,
            messages_per_second: 200,
        }
    }
}

/// Connection registry and delivery limits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DistributionConfig {
    /// Seconds a new connection has to send `REGISTER`.
    pub registration_timeout_secs: u64,
    /// Unsent outbound bytes tolerated before a client is evicted.
    pub max_backlog_bytes: usize,
    /// Interval of the dead-connection sweep.
    pub sweep_interval_secs: u64,
    /// Messages held per connection while delivery is paused for replay.
    pub outbound_queue_capacity: usize,
}

impl Default for DistributionConfig {
    fn default() -> Self {
        Self {
            registration_timeout_secs: 10,
            max_backlog_bytes: 4 * 1024 * 1024,
            sweep_interval_secs: 30,
            outbound_queue_capacity: 1024,
        }
    }
}

/// Per-project execution defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Risk level at or above which a project is stopped automatically.
    pub auto_stop_threshold: RiskLevel,
    /// Baseline agent action rate (events per minute) for the rate-anomaly rule.
    pub rate_limit_per_minute: u32,
    /// Delay between `CONTINUE_CMD` and the resume completing.
    pub resume_grace_ms: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            auto_stop_threshold: RiskLevel::High,
            rate_limit_per_minute: 120,
            resume_grace_ms: 1500,
        }
    }
}

/// Tunables for the stateful and threshold-based risk rules.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RiskConfig {
    pub cascade_window_secs: u64,
    /// Distinct directories in the window that make the cascade MEDIUM.
    pub cascade_medium_dirs: usize,
    pub cascade_high_dirs: usize,
    pub cascade_critical_dirs: usize,
    pub rate_window_secs: u64,
    /// Multiple of the baseline rate that makes the anomaly HIGH.
    pub rate_high_multiplier: f64,
    pub rate_critical_multiplier: f64,
    /// Diff line counts for LOW / MEDIUM / HIGH.
    pub large_diff_lines: [usize; 3],
    /// File sizes in bytes for LOW / MEDIUM / HIGH.
    pub large_file_bytes: [u64; 3],
    /// Additional absolute path prefixes treated as self-protected.
    pub protected_roots: Vec<String>,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            cascade_window_secs: 60,
            cascade_medium_dirs: 4,
            cascade_high_dirs: 7,
            cascade_critical_dirs: 10,
            rate_window_secs: 10,
            rate_high_multiplier: 2.0,
            rate_critical_multiplier: 5.0,
            large_diff_lines: [200, 500, 1000],
            large_file_bytes: [100 * 1024, 1024 * 1024, 10 * 1024 * 1024],
            protected_roots: Vec::new(),
        }
    }
}

/// Top-level configuration for a Vigil control-plane instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VigilConfig {
    /// Path to the SQLite ledger database.
    pub ledger_path: PathBuf,
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub ingest: IngestConfig,
    pub distribution: DistributionConfig,
    pub execution: ExecutionConfig,
    pub risk: RiskConfig,
}

impl Default for VigilConfig {
    fn default() -> Self {
        Self {
            ledger_path: PathBuf::from(LEDGER_FILENAME),
            server: ServerConfig::default(),
            auth: AuthConfig::default(),
            ingest: IngestConfig::default(),
            distribution: DistributionConfig::default(),
            execution: ExecutionConfig::default(),
            risk: RiskConfig::default(),
        }
    }
}

impl VigilConfig {
    /// Parse a configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, VigilError> {
        let mut config: VigilConfig =
            toml::from_str(content).map_err(|e| VigilError::ConfigError(e.to_string()))?;
        config.fill_defaults();
        Ok(config)
    }

    /// Serialize the configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String, VigilError> {
        toml::to_string_pretty(self).map_err(|e| VigilError::ConfigError(e.to_string()))
    }

    pub(crate) fn fill_defaults(&mut self) {
        if self.ledger_path.as_os_str().is_empty() {
            self.ledger_path = PathBuf::from(LEDGER_FILENAME);
        }
    }

    /// Check everything the server needs before it starts accepting clients.
    pub fn validate(&self) -> Result<(), VigilError> {
        if self.auth.producer_secret.is_empty() {
            return Err(VigilError::ConfigError(
                "auth.producer_secret must be set".into(),
            ));
        }
        if self.auth.session_secret.len() < 16 {
            return Err(VigilError::ConfigError(
                "auth.session_secret must be at least 16 bytes".into(),
            ));
        }
        if self.ingest.dedup_capacity == 0 {
            return Err(VigilError::ConfigError(
                "ingest.dedup_capacity must be positive".into(),
            ));
        }
        if self.ingest.messages_per_second == 0 {
            return Err(VigilError::ConfigError(
                "ingest.messages_per_second must be positive".into(),
            ));
        }
        if self.execution.auto_stop_threshold == RiskLevel::None {
            return Err(VigilError::ConfigError(
                "execution.auto_stop_threshold must be LOW or above".into(),
            ));
        }
        let r = &self.risk;
        if !(2 <= r.cascade_medium_dirs
            && r.cascade_medium_dirs < r.cascade_high_dirs
            && r.cascade_high_dirs < r.cascade_critical_dirs)
        {
            return Err(VigilError::ConfigError(
                "risk cascade tiers must satisfy 2 <= medium < high < critical".into(),
            ));
        }
        if !(1.0 < r.rate_high_multiplier && r.rate_high_multiplier < r.rate_critical_multiplier)
        {
            return Err(VigilError::ConfigError(
                "risk rate multipliers must satisfy 1 < high < critical".into(),
            ));
        }
        if !r.large_diff_lines.windows(2).all(|w| w[0] < w[1])
            || !r.large_file_bytes.windows(2).all(|w| w[0] < w[1])
        {
            return Err(VigilError::ConfigError(
                "risk large-change tiers must be strictly increasing".into(),
            ));
        }
        Ok(())
    }

    pub fn registration_timeout(&self) -> Duration {
        Duration::from_secs(self.distribution.registration_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.distribution.sweep_interval_secs.max(1))
    }

    pub fn dedup_ttl(&self) -> Duration {
        Duration::from_secs(self.ingest.dedup_ttl_secs)
    }

    pub fn resume_grace(&self) -> Duration {
        Duration::from_millis(self.execution.resume_grace_ms)
    }

    /// Risk settings for a running plane: the configured ones with the
    /// plane's own files added to the self-protected roots.
    pub fn effective_risk(&self) -> RiskConfig {
        let mut risk = self.risk.clone();
        risk.protected_roots.extend(self.self_protected_paths());
        risk
    }

    /// Absolute paths of the ledger database and its WAL siblings, the
    /// ledger directory when `ledger_path` is absolute, and the directory of
    /// the running executable.
    pub fn self_protected_paths(&self) -> Vec<String> {
        let mut paths: Vec<PathBuf> = Vec::new();
        if let Ok(ledger) = std::path::absolute(&self.ledger_path) {
            for suffix in ["", "-wal", "-shm", "-journal"] {
                let mut name = ledger.clone().into_os_string();
                name.push(suffix);
                paths.push(PathBuf::from(name));
            }
            // never a filesystem root
            if self.ledger_path.is_absolute() {
                if let Some(dir) = ledger.parent().filter(|d| d.parent().is_some()) {
                    paths.push(dir.to_path_buf());
                }
            }
        }
        if let Ok(exe) = std::env::current_exe() {
            if let Some(dir) = exe.parent().filter(|d| d.parent().is_some()) {
                paths.push(dir.to_path_buf());
            }
        }
        paths
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect()
    }
}
