use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Result, WatchdogError};

/// Process-wide tunables of the watchdog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Aggregate CPU percentage above which a target is overloaded
    #[serde(alias = "cpu_threshold")]
    pub cpu_threshold_percent: f64,
    /// Seconds between two ticks
    #[serde(alias = "check_interval")]
    pub check_interval_secs: f64,
    /// Seconds to wait before relaunching a target
    #[serde(alias = "startup_delay")]
    pub restart_startup_delay_secs: f64,
    /// Seconds to wait after start before the first tick
    #[serde(alias = "monitoring_startup_delay")]
    pub monitoring_startup_delay_secs: f64,
    /// Seconds CPU must stay above the threshold before a restart
    #[serde(alias = "cpu_threshold_duration")]
    pub cpu_threshold_duration_secs: f64,
    /// Share of raw CPU attributed to the process itself (0-1)
    pub gpu_filter_factor: f64,
    /// Relaunch targets that disappear
    pub auto_restart_enabled: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cpu_threshold_percent: 50.0,
            check_interval_secs: 5.0,
            restart_startup_delay_secs: 3.0,
            monitoring_startup_delay_secs: 10.0,
            cpu_threshold_duration_secs: 30.0,
            gpu_filter_factor: 0.5,
            auto_restart_enabled: true,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        let fields = [
            ("cpu_threshold_percent", self.cpu_threshold_percent),
            ("check_interval_secs", self.check_interval_secs),
            ("restart_startup_delay_secs", self.restart_startup_delay_secs),
            ("monitoring_startup_delay_secs", self.monitoring_startup_delay_secs),
            ("cpu_threshold_duration_secs", self.cpu_threshold_duration_secs),
            ("gpu_filter_factor", self.gpu_filter_factor),
        ];

        for (field, value) in fields {
            if !value.is_finite() {
                return Err(WatchdogError::config(format!("{} must be a number", field)));
            }
            if value < 0.0 {
                return Err(WatchdogError::config(format!(
                    "{} must not be negative (got {})",
                    field, value
                )));
            }
        }

        if self.check_interval_secs <= 0.0 {
            return Err(WatchdogError::config("check_interval_secs must be greater than 0"));
        }

        if self.gpu_filter_factor > 1.0 {
            return Err(WatchdogError::config(format!(
                "gpu_filter_factor must be between 0 and 1 (got {})",
                self.gpu_filter_factor
            )));
        }

        Ok(())
    }

    pub fn check_interval(&self) -> Duration {
        secs(self.check_interval_secs)
    }

    pub fn restart_startup_delay(&self) -> Duration {
        secs(self.restart_startup_delay_secs)
    }

    pub fn monitoring_startup_delay(&self) -> Duration {
        secs(self.monitoring_startup_delay_secs)
    }

    pub fn cpu_threshold_duration(&self) -> Duration {
        secs(self.cpu_threshold_duration_secs)
    }
}

/// Partial settings update, absent fields keep their current value
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SettingsPatch {
    #[serde(alias = "cpu_threshold")]
    pub cpu_threshold_percent: Option<f64>,
    #[serde(alias = "check_interval")]
    pub check_interval_secs: Option<f64>,
    #[serde(alias = "startup_delay")]
    pub restart_startup_delay_secs: Option<f64>,
    #[serde(alias = "monitoring_startup_delay")]
    pub monitoring_startup_delay_secs: Option<f64>,
    #[serde(alias = "cpu_threshold_duration")]
    pub cpu_threshold_duration_secs: Option<f64>,
    pub gpu_filter_factor: Option<f64>,
    pub auto_restart_enabled: Option<bool>,
}

impl SettingsPatch {
    pub fn apply(&self, current: &EngineConfig) -> EngineConfig {
        EngineConfig {
            cpu_threshold_percent: self
                .cpu_threshold_percent
                .unwrap_or(current.cpu_threshold_percent),
            check_interval_secs: self.check_interval_secs.unwrap_or(current.check_interval_secs),
            restart_startup_delay_secs: self
                .restart_startup_delay_secs
                .unwrap_or(current.restart_startup_delay_secs),
            monitoring_startup_delay_secs: self
                .monitoring_startup_delay_secs
                .unwrap_or(current.monitoring_startup_delay_secs),
            cpu_threshold_duration_secs: self
                .cpu_threshold_duration_secs
                .unwrap_or(current.cpu_threshold_duration_secs),
            gpu_filter_factor: self.gpu_filter_factor.unwrap_or(current.gpu_filter_factor),
            auto_restart_enabled: self.auto_restart_enabled.unwrap_or(current.auto_restart_enabled),
        }
    }
}

/// Non-positive or non-finite values collapse to zero.
fn secs(value: f64) -> Duration {
    if value.is_finite() && value > 0.0 {
        Duration::from_secs_f64(value)
    } else {
        Duration::ZERO
    }
}
