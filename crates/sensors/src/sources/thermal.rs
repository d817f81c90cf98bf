//! SoC temperature from Linux sysfs.
//!
//! The thermal zone is resolved once at construction; on a Raspberry Pi it
//! is `cpu-thermal`, on x86 dev machines `x86_pkg_temp` or a `k10temp`/
//! `coretemp` hwmon.

use std::path::{Path, PathBuf};

use smartrc_protocol::SensorValue;

use crate::error::SensorError;
use crate::sensor::SensorSource;

const ZONE_TYPES: &[&str] = &["cpu-thermal", "cpu_thermal", "soc_thermal", "x86_pkg_temp"];
const HWMON_NAMES: &[&str] = &["k10temp", "coretemp", "cpu_thermal"];

/// CPU temperature in °C, read from a millidegree sysfs file.
#[derive(Debug, Clone)]
pub struct CpuTemperature {
    path: Option<PathBuf>,
}

impl CpuTemperature {
    /// Looks for a CPU temperature file under `/sys`.
    pub fn detect() -> Self {
        Self::detect_in(Path::new("/sys"))
    }

    /// Same as [`detect`](Self::detect) with a different sysfs root.
    pub fn detect_in(sys_root: &Path) -> Self {
        let path = find_thermal_zone(&sys_root.join("class/thermal"))
            .or_else(|| find_hwmon(&sys_root.join("class/hwmon")));
        match &path {
            Some(p) => tracing::debug!(path = %p.display(), "CPU temperature source"),
            None => tracing::debug!("no CPU temperature source found"),
        }
        Self { path }
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

impl SensorSource for CpuTemperature {
    fn read(&self) -> Result<SensorValue, SensorError> {
        let path = self
            .path
            .as_ref()
            .ok_or_else(|| SensorError::Unavailable("no thermal zone".into()))?;
        let text = read_trimmed(path)
            .ok_or_else(|| SensorError::Read(format!("cannot read {}", path.display())))?;
        let millis: i64 = text
            .parse()
            .map_err(|_| SensorError::Read(format!("unexpected content '{text}'")))?;
        // One decimal place.
        Ok(SensorValue::Number((millis as f64 / 100.0).round() / 10.0))
    }
}

fn find_thermal_zone(dir: &Path) -> Option<PathBuf> {
    let mut zones: Vec<PathBuf> = std::fs::read_dir(dir)
        .ok()?
        .flatten()
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("thermal_zone"))
        })
        .collect();
    zones.sort();

    let matching = zones.iter().find(|zone| {
        read_trimmed(&zone.join("type")).is_some_and(|t| ZONE_TYPES.contains(&t.as_str()))
    });
    // Single-zone boards do not always label the zone.
    let zone = matching.or_else(|| (zones.len() == 1).then(|| &zones[0]))?;
    let temp = zone.join("temp");
    temp.exists().then_some(temp)
}

fn find_hwmon(dir: &Path) -> Option<PathBuf> {
    std::fs::read_dir(dir).ok()?.flatten().find_map(|entry| {
        let dir = entry.path();
        let name = read_trimmed(&dir.join("name")).unwrap_or_default();
        let temp = dir.join("temp1_input");
        (HWMON_NAMES.contains(&name.as_str()) && temp.exists()).then_some(temp)
    })
}

fn read_trimmed(path: &Path) -> Option<String> {
    std::fs::read_to_string(path)
        .ok()
        .map(|s| s.trim().to_string())
}
