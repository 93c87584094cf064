use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Lifecycle status of a monitored application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum TargetStatus {
    #[default]
    Active,
    Terminated,
    Restarting,
    Restarted,
    #[serde(rename = "Auto-Restarted")]
    AutoRestarted,
    #[serde(rename = "Restart Failed")]
    RestartFailed,
    #[serde(rename = "Auto-Restart Failed")]
    AutoRestartFailed,
}

impl fmt::Display for TargetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TargetStatus::Active => "Active",
            TargetStatus::Terminated => "Terminated",
            TargetStatus::Restarting => "Restarting",
            TargetStatus::Restarted => "Restarted",
            TargetStatus::AutoRestarted => "Auto-Restarted",
            TargetStatus::RestartFailed => "Restart Failed",
            TargetStatus::AutoRestartFailed => "Auto-Restart Failed",
        };
        f.write_str(label)
    }
}

fn default_enabled() -> bool {
    true
}

/// Timer instants are RFC 3339 strings, older files store Unix seconds
fn deserialize_timer<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Stored {
        Instant(DateTime<Utc>),
        UnixSeconds(f64),
    }

    Ok(match Option::<Stored>::deserialize(deserializer)? {
        Some(Stored::Instant(instant)) => Some(instant),
        Some(Stored::UnixSeconds(secs)) if secs.is_finite() && secs >= 0.0 => {
            DateTime::from_timestamp(secs.trunc() as i64, (secs.fract() * 1e9) as u32)
        }
        _ => None,
    })
}

/// One application under watch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoredTarget {
    /// Unique identifier, also the default match pattern
    pub name: String,
    /// Case-insensitive substring matched against process name or executable path
    #[serde(rename = "process_name")]
    pub process_match_pattern: String,
    /// Preferred executable used when relaunching
    #[serde(default)]
    pub executable_path: Option<PathBuf>,
    /// Disabled targets are skipped by the monitor loop
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub status: TargetStatus,
    /// Last aggregate CPU sample, GPU discount applied
    #[serde(rename = "last_cpu", default)]
    pub last_cpu_percent: f64,
    #[serde(default)]
    pub restart_count: u32,
    /// Set while CPU has stayed above the threshold since this instant
    #[serde(
        rename = "threshold_exceeded_time",
        default,
        deserialize_with = "deserialize_timer"
    )]
    pub threshold_exceeded_since: Option<DateTime<Utc>>,

    /// Processes matched by the last sample
    #[serde(skip)]
    pub last_process_count: usize,
    /// Latched once a termination was handled, re-armed when the app is seen again
    #[serde(skip)]
    pub termination_handled: bool,
}

impl MonitoredTarget {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            process_match_pattern: name.to_lowercase(),
            executable_path: None,
            enabled: true,
            status: TargetStatus::Active,
            last_cpu_percent: 0.0,
            restart_count: 0,
            threshold_exceeded_since: None,
            last_process_count: 0,
            termination_handled: false,
        }
    }

    /// Patterns used to find processes to terminate before a restart.
    ///
    /// Besides the match pattern, the lowercase name is tried as well so a
    /// customised pattern never hides the application's own processes.
    pub fn kill_patterns(&self) -> Vec<String> {
        let mut patterns = vec![self.process_match_pattern.to_lowercase()];
        let name = self.name.to_lowercase();
        if !patterns.contains(&name) {
            patterns.push(name);
        }
        patterns
    }
}
