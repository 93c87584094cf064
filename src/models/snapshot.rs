use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;

use crate::models::{EngineConfig, MonitoredTarget, TargetStatus};

/// State of the monitor loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    #[default]
    Stopped,
    StartupDelay,
    Running,
    Paused,
}

impl LoopState {
    /// Gauge value exported on `/metrics`
    pub fn as_gauge(&self) -> f64 {
        match self {
            LoopState::Stopped => 0.0,
            LoopState::StartupDelay => 1.0,
            LoopState::Running => 2.0,
            LoopState::Paused => 3.0,
        }
    }
}

/// Sustained-threshold state derived from a target's timer
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ThresholdState {
    Normal,
    Warning { remaining_secs: f64 },
    Due,
}

impl ThresholdState {
    pub fn of(target: &MonitoredTarget, now: DateTime<Utc>, duration_secs: f64) -> Self {
        match target.threshold_exceeded_since {
            None => ThresholdState::Normal,
            Some(since) => {
                let elapsed = (now - since).num_milliseconds() as f64 / 1000.0;
                if elapsed >= duration_secs {
                    ThresholdState::Due
                } else {
                    ThresholdState::Warning {
                        remaining_secs: duration_secs - elapsed,
                    }
                }
            }
        }
    }
}

/// Read-only view of one target
#[derive(Debug, Clone, Serialize)]
pub struct TargetSnapshot {
    pub name: String,
    pub process_match_pattern: String,
    pub executable_path: Option<PathBuf>,
    pub enabled: bool,
    pub status: TargetStatus,
    pub last_cpu_percent: f64,
    pub process_count: usize,
    pub restart_count: u32,
    pub threshold_exceeded_since: Option<DateTime<Utc>>,
    pub threshold: ThresholdState,
}

/// Everything the front-end may observe, published after each full tick
#[derive(Debug, Clone, Serialize)]
pub struct EngineSnapshot {
    pub loop_state: LoopState,
    pub taken_at: DateTime<Utc>,
    pub enabled_count: usize,
    pub total_count: usize,
    /// Enabled targets with a running threshold timer
    pub warning_count: usize,
    pub settings: EngineConfig,
    pub targets: Vec<TargetSnapshot>,
}

impl EngineSnapshot {
    pub fn capture(
        loop_state: LoopState,
        settings: &EngineConfig,
        targets: &[MonitoredTarget],
        now: DateTime<Utc>,
    ) -> Self {
        let targets: Vec<TargetSnapshot> = targets
            .iter()
            .map(|t| TargetSnapshot {
                name: t.name.clone(),
                process_match_pattern: t.process_match_pattern.clone(),
                executable_path: t.executable_path.clone(),
                enabled: t.enabled,
                status: t.status,
                last_cpu_percent: t.last_cpu_percent,
                process_count: t.last_process_count,
                restart_count: t.restart_count,
                threshold_exceeded_since: t.threshold_exceeded_since,
                threshold: ThresholdState::of(t, now, settings.cpu_threshold_duration_secs),
            })
            .collect();

        Self {
            loop_state,
            taken_at: now,
            enabled_count: targets.iter().filter(|t| t.enabled).count(),
            total_count: targets.len(),
            warning_count: targets
                .iter()
                .filter(|t| t.enabled && t.threshold_exceeded_since.is_some())
                .count(),
            settings: settings.clone(),
            targets,
        }
    }

    pub fn target(&self, name: &str) -> Option<&TargetSnapshot> {
        self.targets.iter().find(|t| t.name == name)
    }
}
