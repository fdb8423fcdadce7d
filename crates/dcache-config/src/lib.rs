//! # dcache-config
//!
//! Configuration management for the dentry cache monitor.
//!
//! Loads configuration from:
//! 1. `~/.dcache/config.toml` (global)
//! 2. `.dcache/config.toml` (project-local, overrides global)
//! 3. Environment variables (highest priority)

pub mod logging;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::debug;

/// Global config instance
static CONFIG: Lazy<RwLock<Config>> = Lazy::new(|| RwLock::new(Config::load().unwrap_or_default()));

/// Get global config (read-only)
pub fn config() -> std::sync::RwLockReadGuard<'static, Config> {
    // A poisoned lock still holds a fully written Config.
    CONFIG.read().unwrap_or_else(|e| e.into_inner())
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML render error: {0}")]
    Render(#[from] toml::ser::Error),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub probe: ProbeConfig,
    pub trace: TraceConfig,
    pub report: ReportConfig,
    pub generator: GeneratorConfig,
    pub monitor: MonitorConfig,
}

impl Config {
    /// Load config from standard locations
    pub fn load() -> Result<Self, ConfigError> {
        let global = Self::global_config_path();
        let mut config = Self::load_from(global.as_deref(), Path::new(".dcache/config.toml"))?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load the file layers only: `global` first, then `project` on top.
    /// Missing files are skipped.
    pub fn load_from(global: Option<&Path>, project: &Path) -> Result<Self, ConfigError> {
        let mut config = Config::default();

        if let Some(global_path) = global {
            if global_path.exists() {
                debug!("Loading global config from {:?}", global_path);
                let contents = std::fs::read_to_string(global_path)?;
                config = toml::from_str(&contents)?;
            }
        }

        if project.exists() {
            debug!("Loading project config from {:?}", project);
            let contents = std::fs::read_to_string(project)?;
            let project_config: Config = toml::from_str(&contents)?;
            config.merge(project_config);
        }

        Ok(config)
    }

    /// Global config path: ~/.dcache/config.toml
    pub fn global_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".dcache/config.toml"))
    }

    /// Merge a project config on top of this one. Fields the project file
    /// left at their defaults do not clobber global values.
    fn merge(&mut self, other: Config) {
        let defaults = Config::default();

        if other.probe.stats_capacity != defaults.probe.stats_capacity {
            self.probe.stats_capacity = other.probe.stats_capacity;
        }
        if other.probe.ring_buffer_bytes != defaults.probe.ring_buffer_bytes {
            self.probe.ring_buffer_bytes = other.probe.ring_buffer_bytes;
        }
        if other.probe.trace_enabled != defaults.probe.trace_enabled {
            self.probe.trace_enabled = other.probe.trace_enabled;
        }

        if other.trace.dir != defaults.trace.dir {
            self.trace.dir = other.trace.dir;
        }
        if other.trace.max_size_mb != defaults.trace.max_size_mb {
            self.trace.max_size_mb = other.trace.max_size_mb;
        }
        if other.trace.max_files != defaults.trace.max_files {
            self.trace.max_files = other.trace.max_files;
        }
        if !other.trace.patterns.is_empty() {
            self.trace.patterns = other.trace.patterns;
        }
        if other.trace.flush_interval_ms != defaults.trace.flush_interval_ms {
            self.trace.flush_interval_ms = other.trace.flush_interval_ms;
        }

        if other.report != defaults.report {
            self.report = other.report;
        }
        if other.generator != defaults.generator {
            self.generator = other.generator;
        }
        if other.monitor != defaults.monitor {
            self.monitor = other.monitor;
        }
    }

    /// Apply environment variable overrides. `lookup` abstracts the
    /// environment so tests never mutate process state.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("DCACHE_TRACE") {
            self.probe.trace_enabled = v == "1" || v.eq_ignore_ascii_case("true");
        }
        if let Some(dir) = lookup("DCACHE_TRACE_DIR") {
            self.trace.dir = PathBuf::from(dir);
        }
        if let Some(bytes) = lookup("DCACHE_RINGBUF_BYTES") {
            if let Ok(n) = bytes.parse() {
                self.probe.ring_buffer_bytes = n;
            }
        }
        if let Some(cap) = lookup("DCACHE_STATS_CAPACITY") {
            if let Ok(n) = cap.parse() {
                self.probe.stats_capacity = n;
            }
        }
        if let Some(listen) = lookup("DCACHE_LISTEN") {
            self.monitor.listen = listen;
        }
    }

    /// Generate default config TOML string
    pub fn default_toml() -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(&Config::default())?)
    }
}

/// Sizing and initial state of the in-process probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Maximum number of distinct groups tracked
    pub stats_capacity: usize,
    /// Byte budget of the trace ring buffer
    pub ring_buffer_bytes: usize,
    /// Enable ancestor-path tracing on startup
    pub trace_enabled: bool,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            stats_capacity: 4096,
            ring_buffer_bytes: 1 << 20,
            trace_enabled: false,
        }
    }
}

/// Trace stream output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceConfig {
    /// Directory for TSV trace files
    pub dir: PathBuf,
    /// Rotate the active file once it reaches this size
    pub max_size_mb: u64,
    /// Number of rotated files to keep
    pub max_files: usize,
    /// Path substring filters (empty = all)
    pub patterns: Vec<String>,
    pub flush_interval_ms: u64,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("/data/traces"),
            max_size_mb: 100,
            max_files: 3,
            patterns: Vec::new(),
            flush_interval_ms: 1000,
        }
    }
}

impl TraceConfig {
    pub fn max_size_bytes(&self) -> u64 {
        self.max_size_mb.saturating_mul(1024 * 1024)
    }
}

/// Host paths used when building reports
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    pub proc_root: PathBuf,
    pub cgroup_root: PathBuf,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            proc_root: PathBuf::from("/proc"),
            cgroup_root: PathBuf::from("/sys/fs/cgroup"),
        }
    }
}

/// Churn generator defaults
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Target dentries per second
    pub rate: u64,
    /// Entries per subdirectory before rotating
    pub per_dir: u64,
    /// "positive" (hard links) or "negative" (create + unlink)
    pub mode: String,
    /// Stop after this many entries (0 = unlimited)
    pub max: u64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            rate: 1000,
            per_dir: 50000,
            mode: "negative".to_string(),
            max: 0,
        }
    }
}

/// Long-running monitor: HTTP endpoint and background intervals
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// HTTP listen address for /metrics, /healthz and /trace
    pub listen: String,
    /// Stats snapshot refresh
    pub poll_interval_secs: u64,
    /// Cgroup to pod map refresh
    pub resolve_interval_secs: u64,
    /// Rescan of the watched tree (0 = scan once at startup)
    pub rescan_interval_secs: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:9090".to_string(),
            poll_interval_secs: 5,
            resolve_interval_secs: 30,
            rescan_interval_secs: 10,
        }
    }
}
