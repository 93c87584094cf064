use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, Signal, System, UpdateKind};

use crate::error::{Result, WatchdogError};

/// Requested gap between the baseline read and the measuring read of a CPU sample.
///
/// sysinfo needs at least `MINIMUM_CPU_UPDATE_INTERVAL` between two reads,
/// the effective window is the larger of both.
pub const CPU_SAMPLE_WINDOW: Duration = Duration::from_millis(100);

/// A running process matched against a target
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
    /// `None` when the executable path cannot be read (e.g. permission denied)
    pub exe_path: Option<PathBuf>,
}

/// Read side of the OS process table
pub trait ProcessInspector: Send + Sync {
    /// Processes whose name or executable path contains `pattern`, ignoring case
    fn find_matching_processes(&self, pattern: &str) -> Result<Vec<ProcessInfo>>;

    /// CPU usage of each pid measured over a short window.
    ///
    /// Processes that vanish before the second read are left out.
    fn sample_cpu_percent(&self, pids: &[u32]) -> Result<Vec<(u32, f64)>>;

    /// Best-effort termination, returns how many processes were signalled
    fn terminate_processes(&self, pids: &[u32]) -> usize;
}

/// Substring match on process name, then on executable path, ignoring case
pub fn matches_pattern(pattern: &str, name: &str, exe_path: Option<&Path>) -> bool {
    let pattern = pattern.trim().to_lowercase();
    if pattern.is_empty() || name.is_empty() {
        return false;
    }

    if name.to_lowercase().contains(&pattern) {
        return true;
    }

    exe_path
        .map(|p| p.to_string_lossy().to_lowercase().contains(&pattern))
        .unwrap_or(false)
}

/// sysinfo-backed process table
pub struct SystemProcesses {
    system: Mutex<System>,
    sample_window: Duration,
}

impl SystemProcesses {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
            sample_window: CPU_SAMPLE_WINDOW.max(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, System>> {
        self.system
            .lock()
            .map_err(|_| WatchdogError::inspection("process table lock poisoned"))
    }
}

impl Default for SystemProcesses {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessInspector for SystemProcesses {
    fn find_matching_processes(&self, pattern: &str) -> Result<Vec<ProcessInfo>> {
        let mut sys = self.lock()?;
        sys.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::nothing().with_exe(UpdateKind::OnlyIfNotSet),
        );

        let mut matching: Vec<ProcessInfo> = sys
            .processes()
            .iter()
            .filter_map(|(pid, process)| {
                // Linux lists threads as tasks of their process
                if process.thread_kind().is_some() {
                    return None;
                }

                let name = process.name().to_string_lossy();
                let exe_path = process.exe();
                if !matches_pattern(pattern, &name, exe_path) {
                    return None;
                }

                Some(ProcessInfo {
                    pid: pid.as_u32(),
                    name: name.into_owned(),
                    exe_path: exe_path.map(Path::to_path_buf),
                })
            })
            .collect();

        matching.sort_by_key(|p| p.pid);
        log::debug!("Pattern '{}' matched {} process(es)", pattern, matching.len());
        Ok(matching)
    }

    fn sample_cpu_percent(&self, pids: &[u32]) -> Result<Vec<(u32, f64)>> {
        if pids.is_empty() {
            return Ok(Vec::new());
        }

        let pids: Vec<Pid> = pids.iter().map(|pid| Pid::from_u32(*pid)).collect();
        let refresh = ProcessRefreshKind::nothing().with_cpu();

        // First read only establishes the baseline
        self.lock()?
            .refresh_processes_specifics(ProcessesToUpdate::Some(&pids), true, refresh);

        std::thread::sleep(self.sample_window);

        let mut sys = self.lock()?;
        sys.refresh_processes_specifics(ProcessesToUpdate::Some(&pids), true, refresh);

        Ok(pids
            .iter()
            .filter_map(|pid| {
                sys.process(*pid)
                    .map(|process| (pid.as_u32(), process.cpu_usage() as f64))
            })
            .collect())
    }

    fn terminate_processes(&self, pids: &[u32]) -> usize {
        let sys = match self.lock() {
            Ok(sys) => sys,
            Err(e) => {
                log::warn!("Cannot terminate processes: {}", e);
                return 0;
            }
        };

        pids.iter()
            .filter(|pid| match sys.process(Pid::from_u32(**pid)) {
                // Signal::Term is not supported everywhere, fall back to a hard kill
                Some(process) => process
                    .kill_with(Signal::Term)
                    .unwrap_or_else(|| process.kill()),
                None => {
                    log::debug!("PID {} vanished before termination", pid);
                    false
                }
            })
            .count()
    }
}
