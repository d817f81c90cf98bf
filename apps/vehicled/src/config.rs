//! Daemon configuration management.
//!
//! Configuration is stored as TOML at `$SMARTRC_CONFIG` if set, otherwise
//! `$XDG_CONFIG_HOME/smartrc/vehicled.toml` (falling back to
//! `~/.config/smartrc/vehicled.toml`).

use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use smartrc_protocol::constants::DEFAULT_PORT;

/// Daemon configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Display name of this vehicle (hostname by default).
    #[serde(default = "default_name")]
    pub name: String,

    #[serde(default = "default_bind")]
    pub bind: IpAddr,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Time a drive command stays in effect without a follow-up.
    #[serde(default = "default_watchdog_ms")]
    pub watchdog_ms: u64,

    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Register new controllers for the alerts of every sensor.
    #[serde(default = "default_true")]
    pub alerts_on_connect: bool,

    #[serde(default = "default_limit")]
    pub speed_limit_forward: f64,

    #[serde(default = "default_limit")]
    pub speed_limit_backward: f64,

    #[serde(default)]
    pub obstacle: ObstacleConfig,

    /// Per-sensor refresh interval overrides, in seconds.
    #[serde(default)]
    pub sensor_intervals: BTreeMap<String, f64>,
}

/// Forward speed ceilings derived from the distance sensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObstacleConfig {
    pub sensor: String,
    pub stop_distance_cm: f64,
    pub slow_distance_cm: f64,
    pub slow_limit_percent: f64,
}

impl Default for ObstacleConfig {
    fn default() -> Self {
        Self {
            sensor: "Distance".into(),
            stop_distance_cm: 20.0,
            slow_distance_cm: 60.0,
            slow_limit_percent: 40.0,
        }
    }
}

fn default_name() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "SmartRC".into())
}

fn default_bind() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_watchdog_ms() -> u64 {
    1000
}

fn default_max_connections() -> usize {
    8
}

fn default_true() -> bool {
    true
}

fn default_limit() -> f64 {
    100.0
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: default_name(),
            bind: default_bind(),
            port: default_port(),
            watchdog_ms: default_watchdog_ms(),
            max_connections: default_max_connections(),
            alerts_on_connect: default_true(),
            speed_limit_forward: default_limit(),
            speed_limit_backward: default_limit(),
            obstacle: ObstacleConfig::default(),
            sensor_intervals: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Loads configuration from disk, or creates a default if not found.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&config_path())
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = toml::from_str(&content)?;
            config.validate()?;
            tracing::debug!(path = %path.display(), "configuration loaded");
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            tracing::info!(path = %path.display(), "default configuration written");
            Ok(config)
        }
    }

    /// Saves the configuration to `path`, readable by the owner only.
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    pub fn watchdog_window(&self) -> Duration {
        Duration::from_millis(self.watchdog_ms)
    }

    /// Refresh interval override for `sensor`, if a valid one is configured.
    pub fn sensor_interval(&self, sensor: &str) -> Option<Duration> {
        self.sensor_intervals
            .get(sensor)
            .copied()
            .filter(|s| s.is_finite() && *s > 0.0)
            .map(Duration::from_secs_f64)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.watchdog_ms == 0 {
            anyhow::bail!("watchdog_ms must be greater than 0");
        }
        for (key, value) in [
            ("speed_limit_forward", self.speed_limit_forward),
            ("speed_limit_backward", self.speed_limit_backward),
            ("obstacle.slow_limit_percent", self.obstacle.slow_limit_percent),
        ] {
            if !(0.0..=100.0).contains(&value) {
                anyhow::bail!("{key} must be within 0..=100, got {value}");
            }
        }
        if self.obstacle.stop_distance_cm > self.obstacle.slow_distance_cm {
            anyhow::bail!("obstacle.stop_distance_cm must not exceed obstacle.slow_distance_cm");
        }
        Ok(())
    }
}

/// Returns the configuration file path.
pub fn config_path() -> PathBuf {
    resolve_path(|key| std::env::var(key).ok())
}

fn resolve_path(env: impl Fn(&str) -> Option<String>) -> PathBuf {
    if let Some(path) = env("SMARTRC_CONFIG").filter(|p| !p.is_empty()) {
        return PathBuf::from(path);
    }
    let base = env("XDG_CONFIG_HOME")
        .filter(|p| !p.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            let home = env("HOME").unwrap_or_else(|| "/tmp".into());
            PathBuf::from(home).join(".config")
        });
    base.join("smartrc").join("vehicled.toml")
}
