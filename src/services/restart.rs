use std::path::PathBuf;
use std::time::Duration;

use crate::models::{MonitoredTarget, TargetStatus};
use crate::services::{
    Clock, EventLog, LaunchResolver, LaunchTier, ProcessInspector, ProcessLauncher,
};

/// Time given to terminated processes to release their resources
pub const PROCESS_SETTLE_TIME: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq)]
pub enum RestartOutcome {
    /// No matching process was running, nothing was touched
    NothingToRestart,
    Relaunched { tier: LaunchTier, program: PathBuf },
    /// Every launch candidate failed
    Failed,
}

/// Kills and relaunches targets
pub struct RestartExecutor {
    resolver: LaunchResolver,
    startup_delay: Duration,
    settle_time: Duration,
}

impl RestartExecutor {
    pub fn new(resolver: LaunchResolver, startup_delay: Duration) -> Self {
        Self {
            resolver,
            startup_delay,
            settle_time: PROCESS_SETTLE_TIME,
        }
    }

    pub fn with_settle_time(mut self, settle_time: Duration) -> Self {
        self.settle_time = settle_time;
        self
    }

    /// Terminate every process of an overloaded target and start it again.
    ///
    /// Only counts as a restart when at least one process was terminated.
    pub fn restart_for_overload<P, C>(
        &self,
        processes: &P,
        clock: &C,
        events: &EventLog,
        target: &mut MonitoredTarget,
    ) -> RestartOutcome
    where
        P: ProcessInspector + ProcessLauncher + ?Sized,
        C: Clock + ?Sized,
    {
        events.info(format!("Attempting to restart {}...", target.name));

        let own_pid = std::process::id();
        let mut pids: Vec<u32> = Vec::new();
        for pattern in target.kill_patterns() {
            match processes.find_matching_processes(&pattern) {
                Ok(found) => {
                    for process in found {
                        if process.pid == own_pid || pids.contains(&process.pid) {
                            continue;
                        }
                        events.info(format!("Found process: {} (PID: {})", process.name, process.pid));
                        pids.push(process.pid);
                    }
                }
                Err(e) => events.warn(format!("Could not scan for '{}': {}", pattern, e)),
            }
        }

        let killed = processes.terminate_processes(&pids);
        if killed == 0 {
            events.info(format!("No {} process(es) found to restart", target.name));
            return RestartOutcome::NothingToRestart;
        }
        events.info(format!("Terminated {} {} process(es)", killed, target.name));

        clock.sleep(self.settle_time);
        self.wait_startup_delay(clock, events, &target.name);

        let outcome = self.relaunch(processes, events, target, "Restarted");
        target.restart_count += 1;
        match outcome {
            RestartOutcome::Relaunched { .. } => {
                target.status = TargetStatus::Restarted;
                events.info(format!(
                    "{} has been restarted due to high CPU usage ({:.1}%)",
                    target.name, target.last_cpu_percent
                ));
            }
            _ => {
                target.status = TargetStatus::RestartFailed;
                events.error(format!("Failed to restart {} - all methods exhausted", target.name));
            }
        }
        outcome
    }

    /// Relaunch a target whose processes are all gone
    pub fn restart_for_termination<P, C>(
        &self,
        processes: &P,
        clock: &C,
        events: &EventLog,
        target: &mut MonitoredTarget,
    ) -> RestartOutcome
    where
        P: ProcessInspector + ProcessLauncher + ?Sized,
        C: Clock + ?Sized,
    {
        target.status = TargetStatus::Restarting;
        events.info(format!("Auto-restarting terminated application: {}", target.name));

        self.wait_startup_delay(clock, events, &target.name);

        let outcome = self.relaunch(processes, events, target, "Auto-restarted");
        match outcome {
            RestartOutcome::Relaunched { .. } => {
                target.restart_count += 1;
                target.status = TargetStatus::AutoRestarted;
                events.info(format!(
                    "{} was terminated and has been automatically restarted",
                    target.name
                ));
            }
            _ => {
                target.status = TargetStatus::AutoRestartFailed;
                events.error(format!(
                    "Failed to auto-restart {} - all methods exhausted",
                    target.name
                ));
            }
        }
        outcome
    }

    fn wait_startup_delay<C: Clock + ?Sized>(&self, clock: &C, events: &EventLog, name: &str) {
        if self.startup_delay.is_zero() {
            return;
        }
        events.info(format!(
            "Waiting {} seconds before restarting {}...",
            self.startup_delay.as_secs_f64(),
            name
        ));
        clock.sleep(self.startup_delay);
    }

    /// Try each candidate in order until one launches
    fn relaunch<P>(
        &self,
        processes: &P,
        events: &EventLog,
        target: &mut MonitoredTarget,
        verb: &str,
    ) -> RestartOutcome
    where
        P: ProcessInspector + ProcessLauncher + ?Sized,
    {
        for candidate in self.resolver.candidates(processes, target) {
            match processes.launch(&candidate.program) {
                Ok(pid) => {
                    events.info(format!(
                        "{} {} from {}: {} (PID: {})",
                        verb,
                        target.name,
                        candidate.tier,
                        candidate.program.display(),
                        pid
                    ));
                    if matches!(
                        candidate.tier,
                        LaunchTier::InstallDirectory | LaunchTier::ResolvedByName
                    ) {
                        target.executable_path = Some(candidate.program.clone());
                    }
                    return RestartOutcome::Relaunched {
                        tier: candidate.tier,
                        program: candidate.program,
                    };
                }
                Err(e) => events.warn(format!(
                    "Failed to launch {} from {} {}: {}",
                    target.name,
                    candidate.tier,
                    candidate.program.display(),
                    e
                )),
            }
        }
        RestartOutcome::Failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::testing::{FakeProcesses, ManualClock};
    use crate::services::InstallRoots;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn executor(roots: InstallRoots, delay_secs: u64) -> RestartExecutor {
        RestartExecutor::new(LaunchResolver::new(roots), Duration::from_secs(delay_secs))
    }

    fn stored_exe(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("bin").join("editor");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"").unwrap();
        path
    }

    #[test]
    fn test_overload_restart_from_stored_path() {
        let dir = TempDir::new().unwrap();
        let stored = stored_exe(&dir);
        let fake = FakeProcesses::new();
        fake.spawn("editor", 90.0);
        fake.spawn("editor-gpu", 20.0);
        let clock = ManualClock::new();
        let events = EventLog::new();

        let mut target = MonitoredTarget::new("editor");
        target.executable_path = Some(stored.clone());

        let outcome =
            executor(InstallRoots::new(), 3).restart_for_overload(&fake, &clock, &events, &mut target);

        assert_eq!(
            outcome,
            RestartOutcome::Relaunched {
                tier: LaunchTier::StoredPath,
                program: stored.clone()
            }
        );
        assert_eq!(fake.running("editor"), 0);
        assert_eq!(fake.running("editor-gpu"), 0);
        assert_eq!(fake.launches(), vec![stored]);
        assert_eq!(target.restart_count, 1);
        assert_eq!(target.status, TargetStatus::Restarted);
        assert_eq!(clock.slept(), PROCESS_SETTLE_TIME + Duration::from_secs(3));
    }

    #[test]
    fn test_overload_without_processes_is_noop() {
        let fake = FakeProcesses::new();
        let clock = ManualClock::new();
        let events = EventLog::new();
        let mut target = MonitoredTarget::new("editor");

        let outcome =
            executor(InstallRoots::new(), 3).restart_for_overload(&fake, &clock, &events, &mut target);

        assert_eq!(outcome, RestartOutcome::NothingToRestart);
        assert_eq!(target.restart_count, 0);
        assert_eq!(target.status, TargetStatus::Active);
        assert!(fake.launches().is_empty());
        assert_eq!(clock.slept(), Duration::ZERO);
    }

    #[test]
    fn test_overload_failure_still_counts() {
        let fake = FakeProcesses::new();
        fake.spawn("wd-test-editor", 90.0);
        fake.allow_launch_only(&[]);
        let clock = ManualClock::new();
        let events = EventLog::new();
        let mut target = MonitoredTarget::new("wd-test-editor");

        let outcome =
            executor(InstallRoots::new(), 0).restart_for_overload(&fake, &clock, &events, &mut target);

        assert_eq!(outcome, RestartOutcome::Failed);
        assert_eq!(target.restart_count, 1);
        assert_eq!(target.status, TargetStatus::RestartFailed);
        assert_eq!(clock.slept(), PROCESS_SETTLE_TIME);
    }

    #[test]
    fn test_falls_through_to_install_directory_and_caches_it() {
        let dir = TempDir::new().unwrap();
        let stored = stored_exe(&dir);
        let installed = dir.path().join("wd-test-viewer").join("wd-test-viewer");
        fs::create_dir_all(installed.parent().unwrap()).unwrap();
        fs::write(&installed, b"").unwrap();

        let fake = FakeProcesses::new();
        fake.allow_launch_only(&[installed.as_path()]);
        let clock = ManualClock::new();
        let events = EventLog::new();
        let mut target = MonitoredTarget::new("wd-test-viewer");
        target.executable_path = Some(stored);

        let executor = RestartExecutor::new(
            LaunchResolver::new(InstallRoots::new().with("opt", dir.path()))
                .with_templates(&["{opt}/{name}/{name}"]),
            Duration::ZERO,
        );
        let outcome = executor.restart_for_termination(&fake, &clock, &events, &mut target);

        assert!(matches!(
            outcome,
            RestartOutcome::Relaunched {
                tier: LaunchTier::InstallDirectory,
                ..
            }
        ));
        assert_eq!(target.executable_path.as_deref(), Some(installed.as_path()));
        assert_eq!(target.status, TargetStatus::AutoRestarted);
        assert_eq!(target.restart_count, 1);
    }

    #[test]
    fn test_termination_restart_failure() {
        let fake = FakeProcesses::new();
        fake.allow_launch_only(&[]);
        let clock = ManualClock::new();
        let events = EventLog::new();
        let mut target = MonitoredTarget::new("wd-test-viewer");
        target.status = TargetStatus::Terminated;

        let outcome = executor(InstallRoots::new(), 5)
            .with_settle_time(Duration::ZERO)
            .restart_for_termination(&fake, &clock, &events, &mut target);

        assert_eq!(outcome, RestartOutcome::Failed);
        assert_eq!(target.status, TargetStatus::AutoRestartFailed);
        assert_eq!(target.restart_count, 0);
        assert_eq!(clock.slept(), Duration::from_secs(5));
        assert!(events
            .recent(usize::MAX)
            .iter()
            .any(|e| e.message.contains("all methods exhausted")));
    }

    #[test]
    fn test_bare_name_is_last_resort() {
        let fake = FakeProcesses::new();
        let clock = ManualClock::new();
        let events = EventLog::new();
        let mut target = MonitoredTarget::new("wd-test-viewer");

        let outcome = executor(InstallRoots::new(), 0)
            .restart_for_termination(&fake, &clock, &events, &mut target);

        assert_eq!(
            outcome,
            RestartOutcome::Relaunched {
                tier: LaunchTier::BareName,
                program: PathBuf::from("wd-test-viewer")
            }
        );
        assert_eq!(fake.launches(), vec![Path::new("wd-test-viewer").to_path_buf()]);
        assert!(target.executable_path.is_none());
    }
}
