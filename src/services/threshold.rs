use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::models::{EngineConfig, MonitoredTarget, TargetStatus};
use crate::services::CpuSample;

/// Outcome of evaluating one sample against a target's timer
#[derive(Debug, Clone, PartialEq)]
pub enum TrackerEvent {
    /// No process matched and auto-restart is on
    TerminationDetected,
    ThresholdWarningStarted,
    ThresholdWarningContinuing { remaining: Duration },
    /// Sustained breach, the target must be restarted
    ThresholdExceeded { elapsed: Duration },
    ThresholdNormalized,
}

/// Debounces overload restarts: CPU has to stay above the threshold for the
/// whole duration before a single restart decision is produced.
#[derive(Debug, Clone)]
pub struct ThresholdTracker {
    threshold: f64,
    duration: Duration,
    auto_restart: bool,
}

impl ThresholdTracker {
    pub fn new(threshold: f64, duration: Duration, auto_restart: bool) -> Self {
        Self {
            threshold,
            duration,
            auto_restart,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(
            config.cpu_threshold_percent,
            config.cpu_threshold_duration(),
            config.auto_restart_enabled,
        )
    }

    /// Record `sample` on `target` and advance its timer.
    ///
    /// After `ThresholdExceeded` the timer is already cleared, so a target
    /// that stays overloaded needs another full duration before firing again.
    pub fn evaluate(
        &self,
        target: &mut MonitoredTarget,
        sample: CpuSample,
        now: DateTime<Utc>,
    ) -> Option<TrackerEvent> {
        target.last_cpu_percent = sample.cpu_percent;
        target.last_process_count = sample.process_count;

        if sample.process_count > 0 {
            target.termination_handled = false;
        }

        if sample.process_count == 0 && self.auto_restart {
            // Nothing is running, so nothing can be over the threshold
            target.threshold_exceeded_since = None;

            if target.status != TargetStatus::Terminated && !target.termination_handled {
                target.status = TargetStatus::Terminated;
                target.termination_handled = true;
                return Some(TrackerEvent::TerminationDetected);
            }
            return None;
        }

        if sample.cpu_percent > self.threshold {
            let Some(since) = target.threshold_exceeded_since else {
                target.threshold_exceeded_since = Some(now);
                return Some(TrackerEvent::ThresholdWarningStarted);
            };

            let elapsed = (now - since).to_std().unwrap_or(Duration::ZERO);
            if elapsed >= self.duration {
                target.threshold_exceeded_since = None;
                Some(TrackerEvent::ThresholdExceeded { elapsed })
            } else {
                Some(TrackerEvent::ThresholdWarningContinuing {
                    remaining: self.duration - elapsed,
                })
            }
        } else {
            let normalized = target.threshold_exceeded_since.take().is_some();

            if sample.process_count > 0
                && matches!(target.status, TargetStatus::Terminated | TargetStatus::Restarting)
            {
                target.status = TargetStatus::Active;
            }

            normalized.then_some(TrackerEvent::ThresholdNormalized)
        }
    }
}
