//! Configuration loading, defaults and validation for powernap.

use serde::Deserialize;
use serde::Serialize;
use std::collections::HashSet;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// System-wide configuration file, checked before the per-user one.
pub const SYSTEM_CONFIG_PATH: &str = "/etc/powernap/config.toml";

/// Default pid file marking a running daemon.
pub const DEFAULT_LOCK_FILE: &str = "/var/run/powernap.pid";

/// Errors raised while loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("No configuration file found (tried {tried})")]
    NotFound { tried: String },

    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("interval_seconds must be greater than zero")]
    ZeroInterval,

    #[error("absent_seconds ({threshold}) must be at least interval_seconds ({interval})")]
    ThresholdBelowInterval { threshold: u64, interval: u64 },

    #[error("action must not be empty")]
    EmptyAction,

    #[error("action_timeout_seconds must be greater than zero")]
    ZeroActionTimeout,

    #[error("No monitors configured; the action could never run")]
    NoMonitors,

    #[error("Duplicate monitor name: {0}")]
    DuplicateMonitor(String),

    #[error("Monitor '{name}' has an invalid pattern: {source}")]
    InvalidPattern {
        name: String,
        #[source]
        source: regex::Error,
    },
}

/// One configured liveness signal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum MonitorSpec {
    /// Activity while any process command line matches `pattern`.
    Process { name: String, pattern: String },

    /// Activity when a Wake-on-LAN packet for this host arrives on `port`.
    Event { name: String, port: u16 },
}

impl MonitorSpec {
    /// Name used in log lines.
    pub fn name(&self) -> &str {
        match self {
            Self::Process { name, .. } | Self::Event { name, .. } => name,
        }
    }
}

/// Main configuration for powernap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Seconds between evaluation passes (default: 1).
    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: u64,

    /// Seconds every monitor must be absent before the action runs.
    pub absent_seconds: u64,

    /// Command handed to the shell when the machine is idle.
    pub action: String,

    /// Upper bound on a single action invocation (default: 300).
    #[serde(default = "default_action_timeout_seconds")]
    pub action_timeout_seconds: u64,

    /// Pid file used to keep a single instance running.
    #[serde(default = "default_lock_file")]
    pub lock_file: PathBuf,

    /// Dry run mode: log the action instead of executing it.
    #[serde(default)]
    pub dry_run: bool,

    /// Shorthand for process monitors named after their pattern.
    #[serde(default)]
    pub processes: Vec<String>,

    /// Explicit monitor list.
    #[serde(default)]
    pub monitors: Vec<MonitorSpec>,
}

fn default_interval_seconds() -> u64 {
    1
}

fn default_action_timeout_seconds() -> u64 {
    300
}

fn default_lock_file() -> PathBuf {
    PathBuf::from(DEFAULT_LOCK_FILE)
}

impl Config {
    /// Load and validate configuration from a file path.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::parse(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load from an explicit path, or from the first default location that exists.
    pub fn load_from(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(p) = path {
            return Self::load(p);
        }

        let candidates = default_paths();
        for candidate in &candidates {
            if candidate.exists() {
                return Self::load(candidate);
            }
        }

        Err(ConfigError::NotFound {
            tried: candidates
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", "),
        })
    }

    /// Parse TOML without validating.
    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Check the invariants the daemon relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval_seconds == 0 {
            return Err(ConfigError::ZeroInterval);
        }
        if self.absent_seconds < self.interval_seconds {
            return Err(ConfigError::ThresholdBelowInterval {
                threshold: self.absent_seconds,
                interval: self.interval_seconds,
            });
        }
        if self.action.trim().is_empty() {
            return Err(ConfigError::EmptyAction);
        }
        if self.action_timeout_seconds == 0 {
            return Err(ConfigError::ZeroActionTimeout);
        }

        let specs = self.monitor_specs();
        if specs.is_empty() {
            return Err(ConfigError::NoMonitors);
        }

        let mut seen = HashSet::new();
        for spec in &specs {
            if !seen.insert(spec.name()) {
                return Err(ConfigError::DuplicateMonitor(spec.name().to_string()));
            }
            if let MonitorSpec::Process { name, pattern } = spec
                && let Err(source) = regex::Regex::new(pattern)
            {
                return Err(ConfigError::InvalidPattern {
                    name: name.clone(),
                    source,
                });
            }
        }

        Ok(())
    }

    /// All monitors in configuration order: `processes` shorthand first.
    pub fn monitor_specs(&self) -> Vec<MonitorSpec> {
        self.processes
            .iter()
            .map(|pattern| MonitorSpec::Process {
                name: pattern.clone(),
                pattern: pattern.clone(),
            })
            .chain(self.monitors.iter().cloned())
            .collect()
    }

    /// Settings handed to the idle aggregator.
    pub fn idle_config(&self) -> IdleConfig {
        IdleConfig {
            interval_seconds: self.interval_seconds,
            threshold_seconds: self.absent_seconds,
            action: self.action.clone(),
            action_timeout: Duration::from_secs(self.action_timeout_seconds),
        }
    }
}

/// Default config locations, system-wide first.
fn default_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from(SYSTEM_CONFIG_PATH)];
    if let Some(config_dir) = dirs::config_dir() {
        paths.push(config_dir.join("powernap").join("config.toml"));
    }
    paths
}

/// Immutable settings for the idle aggregator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdleConfig {
    /// Seconds between passes; also the absence increment per pass.
    pub interval_seconds: u64,

    /// Absence each monitor must reach before the action fires.
    pub threshold_seconds: u64,

    /// Command handed to the action sink.
    pub action: String,

    /// Bound on one action invocation.
    pub action_timeout: Duration,
}

impl IdleConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        absent_seconds = 300
        action = "systemctl suspend"
        processes = ["^rsync"]
    "#;

    #[test]
    fn test_defaults_applied() {
        let config = Config::parse(MINIMAL).unwrap();
        assert_eq!(config.interval_seconds, 1);
        assert_eq!(config.action_timeout_seconds, 300);
        assert_eq!(config.lock_file, PathBuf::from(DEFAULT_LOCK_FILE));
        assert!(!config.dry_run);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_monitor_list() {
        let toml_str = r#"
            interval_seconds = 5
            absent_seconds = 600
            action = "poweroff"
            processes = ["^/usr/bin/borg"]

            [[monitors]]
            kind = "process"
            name = "ssh sessions"
            pattern = "sshd: .*@pts"

            [[monitors]]
            kind = "event"
            name = "wol"
            port = 9
        "#;

        let config = Config::parse(toml_str).unwrap();
        config.validate().unwrap();

        let specs = config.monitor_specs();
        assert_eq!(specs.len(), 3);
        assert_eq!(specs[0].name(), "^/usr/bin/borg");
        assert_eq!(
            specs[1],
            MonitorSpec::Process {
                name: "ssh sessions".to_string(),
                pattern: "sshd: .*@pts".to_string(),
            }
        );
        assert_eq!(
            specs[2],
            MonitorSpec::Event {
                name: "wol".to_string(),
                port: 9,
            }
        );
    }

    #[test]
    fn test_missing_threshold_is_parse_error() {
        let toml_str = r#"
            action = "poweroff"
            processes = ["x"]
        "#;
        assert!(Config::parse(toml_str).is_err());
    }

    #[test]
    fn test_unknown_monitor_kind_rejected() {
        let toml_str = r#"
            absent_seconds = 10
            action = "poweroff"

            [[monitors]]
            kind = "keyboard"
            name = "kbd"
        "#;
        assert!(Config::parse(toml_str).is_err());
    }

    #[test]
    fn test_validation_failures() {
        let base = Config::parse(MINIMAL).unwrap();

        let mut config = base.clone();
        config.interval_seconds = 0;
        assert!(matches!(config.validate(), Err(ConfigError::ZeroInterval)));

        let mut config = base.clone();
        config.interval_seconds = 10;
        config.absent_seconds = 5;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ThresholdBelowInterval {
                threshold: 5,
                interval: 10
            })
        ));

        let mut config = base.clone();
        config.action = "   ".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::EmptyAction)));

        let mut config = base.clone();
        config.action_timeout_seconds = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ZeroActionTimeout)
        ));

        let mut config = base.clone();
        config.processes.clear();
        assert!(matches!(config.validate(), Err(ConfigError::NoMonitors)));

        let mut config = base.clone();
        config.processes.push("^rsync".to_string());
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DuplicateMonitor(name)) if name == "^rsync"
        ));

        let mut config = base;
        config.processes = vec!["(unclosed".to_string()];
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn test_idle_config() {
        let config = Config::parse(MINIMAL).unwrap();
        let idle = config.idle_config();
        assert_eq!(idle.interval_seconds, 1);
        assert_eq!(idle.threshold_seconds, 300);
        assert_eq!(idle.action, "systemctl suspend");
        assert_eq!(idle.action_timeout, Duration::from_secs(300));
        assert_eq!(idle.interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, MINIMAL).unwrap();

        let config = Config::load_from(Some(path.as_path())).unwrap();
        assert_eq!(config.absent_seconds, 300);

        let missing = dir.path().join("nope.toml");
        assert!(matches!(
            Config::load(&missing),
            Err(ConfigError::Read { .. })
        ));
    }
}
