pub mod clock;
pub mod cpu_sampler;
pub mod event_log;
pub mod launcher;
pub mod process_inspector;
pub mod restart;
pub mod store;
pub mod threshold;

#[cfg(test)]
pub mod testing;

pub use clock::{Clock, SystemClock};
pub use cpu_sampler::{CpuSample, CpuSampler};
pub use event_log::EventLog;
pub use launcher::{InstallRoots, LaunchResolver, LaunchTier, ProcessLauncher};
pub use process_inspector::{matches_pattern, ProcessInfo, ProcessInspector, SystemProcesses};
pub use restart::{RestartExecutor, RestartOutcome};
pub use store::{SettingsStore, TargetStore};
pub use threshold::{ThresholdTracker, TrackerEvent};

/// Full process-table access needed by the engine
pub trait ProcessControl: ProcessInspector + ProcessLauncher {}

impl<T: ProcessInspector + ProcessLauncher> ProcessControl for T {}
