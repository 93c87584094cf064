use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Result, WatchdogError};
use crate::models::{EngineConfig, EngineSnapshot, LoopState, MonitoredTarget};
use crate::services::restart::PROCESS_SETTLE_TIME;
use crate::services::{
    Clock, CpuSampler, EventLog, InstallRoots, LaunchResolver, ProcessControl, RestartExecutor,
    RestartOutcome, ThresholdTracker, TrackerEvent,
};

/// Summary of one pass over the targets
#[derive(Debug, Default, Clone, PartialEq)]
pub struct TickReport {
    pub sampled: usize,
    pub restarts: usize,
    pub errors: usize,
    /// Persisted fields changed (restart counts, cached executable paths)
    pub changed: bool,
}

/// Owns the targets and settings, and evaluates them tick by tick.
///
/// Every method blocks the calling thread for as long as sampling and
/// restarts take, so the engine only drives it from the blocking pool.
pub struct Monitor {
    processes: Arc<dyn ProcessControl>,
    clock: Arc<dyn Clock>,
    events: EventLog,
    resolver: LaunchResolver,
    settle_time: Duration,
    settings: EngineConfig,
    targets: Vec<MonitoredTarget>,
}

impl Monitor {
    pub fn new(
        processes: Arc<dyn ProcessControl>,
        clock: Arc<dyn Clock>,
        events: EventLog,
        settings: EngineConfig,
        targets: Vec<MonitoredTarget>,
    ) -> Self {
        Self {
            processes,
            clock,
            events,
            resolver: LaunchResolver::new(InstallRoots::detect()),
            settle_time: PROCESS_SETTLE_TIME,
            settings,
            targets,
        }
    }

    pub fn with_resolver(mut self, resolver: LaunchResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_settle_time(mut self, settle_time: Duration) -> Self {
        self.settle_time = settle_time;
        self
    }

    pub fn settings(&self) -> &EngineConfig {
        &self.settings
    }

    pub fn set_settings(&mut self, settings: EngineConfig) -> Result<()> {
        settings.validate()?;
        self.settings = settings;
        Ok(())
    }

    pub fn targets(&self) -> &[MonitoredTarget] {
        &self.targets
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    pub fn snapshot(&self, loop_state: LoopState) -> EngineSnapshot {
        EngineSnapshot::capture(loop_state, &self.settings, &self.targets, self.clock.now())
    }

    /// Validate, then drop timers left from an earlier run.
    ///
    /// A timer only means something while consecutive samples stay above
    /// the threshold, a stopped loop took no samples.
    pub fn prepare_start(&mut self) -> Result<()> {
        self.validate_start()?;

        for target in &mut self.targets {
            if target.threshold_exceeded_since.take().is_some() {
                self.events
                    .debug(format!("Cleared stale threshold timer for {}", target.name));
            }
        }
        Ok(())
    }

    /// Checks performed before monitoring may start
    pub fn validate_start(&self) -> Result<()> {
        self.settings.validate()?;

        if self.targets.is_empty() {
            return Err(WatchdogError::config(
                "Please add at least one application to monitor",
            ));
        }
        if !self.targets.iter().any(|t| t.enabled) {
            return Err(WatchdogError::config(
                "No applications are enabled for monitoring",
            ));
        }
        Ok(())
    }

    fn target_mut(&mut self, name: &str) -> Result<&mut MonitoredTarget> {
        self.targets
            .iter_mut()
            .find(|t| t.name == name)
            .ok_or_else(|| WatchdogError::TargetNotFound(name.to_string()))
    }

    pub fn add_target(&mut self, name: &str) -> Result<()> {
        let name = name.trim();
        if name.is_empty() {
            return Err(WatchdogError::config("Please enter an application name"));
        }
        if self.targets.iter().any(|t| t.name == name) {
            return Err(WatchdogError::DuplicateTarget(name.to_string()));
        }

        self.targets.push(MonitoredTarget::new(name));
        self.events.info(format!("Added application: {}", name));
        Ok(())
    }

    pub fn remove_target(&mut self, name: &str) -> Result<()> {
        let before = self.targets.len();
        self.targets.retain(|t| t.name != name);
        if self.targets.len() == before {
            return Err(WatchdogError::TargetNotFound(name.to_string()));
        }
        self.events.info(format!("Removed application: {}", name));
        Ok(())
    }

    /// Flip `enabled`, returns the new value
    pub fn toggle_enabled(&mut self, name: &str) -> Result<bool> {
        let target = self.target_mut(name)?;
        target.enabled = !target.enabled;
        let enabled = target.enabled;

        self.events.info(format!(
            "{} monitoring {}",
            name,
            if enabled { "enabled" } else { "disabled" }
        ));
        Ok(enabled)
    }

    pub fn set_executable_path(&mut self, name: &str, path: PathBuf) -> Result<()> {
        if !path.exists() {
            self.events
                .warn(format!("Executable path does not exist: {}", path.display()));
            return Err(WatchdogError::InvalidPath(path.display().to_string()));
        }

        let target = self.target_mut(name)?;
        target.executable_path = Some(path.clone());
        self.events
            .info(format!("Set executable path for {}: {}", name, path.display()));
        Ok(())
    }

    /// Clear a pending threshold timer, returns whether one was running
    pub fn reset_threshold_timer(&mut self, name: &str) -> Result<bool> {
        let target = self.target_mut(name)?;
        let was_running = target.threshold_exceeded_since.take().is_some();

        if was_running {
            self.events.info(format!("Reset threshold timer for {}", name));
        } else {
            self.events
                .info(format!("No active threshold timer for {}", name));
        }
        Ok(was_running)
    }

    /// Look up executables for targets that have none stored, returns how many were found
    pub fn discover_executable_paths(&mut self) -> usize {
        self.events
            .info("Discovering executable paths for monitored applications...");

        let mut found = 0;
        for target in self.targets.iter_mut().filter(|t| t.executable_path.is_none()) {
            match self.resolver.discover(self.processes.as_ref(), &target.name) {
                Some(path) => {
                    self.events.info(format!(
                        "Found executable for {}: {}",
                        target.name,
                        path.display()
                    ));
                    target.executable_path = Some(path);
                    found += 1;
                }
                None => self
                    .events
                    .warn(format!("Could not find executable for {}", target.name)),
            }
        }

        self.events.info("Executable discovery completed!");
        found
    }

    /// Sample every enabled target once without taking any decision
    pub fn probe(&mut self) {
        self.events.info(format!(
            "=== Probe: CPU threshold {}%, duration {}s ===",
            self.settings.cpu_threshold_percent, self.settings.cpu_threshold_duration_secs
        ));

        let sampler = CpuSampler::new(self.settings.gpu_filter_factor);
        for target in self.targets.iter_mut().filter(|t| t.enabled) {
            match sampler.sample(self.processes.as_ref(), &target.process_match_pattern) {
                Ok(sample) => {
                    target.last_cpu_percent = sample.cpu_percent;
                    target.last_process_count = sample.process_count;
                    self.events.info(format!(
                        "{}: found {} process(es), total CPU: {:.1}%",
                        target.name, sample.process_count, sample.cpu_percent
                    ));
                    if sample.process_count == 0 {
                        self.events.warn(format!(
                            "Could not find any process matching '{}'",
                            target.process_match_pattern
                        ));
                    }
                }
                Err(e) => self
                    .events
                    .error(format!("Error probing {}: {}", target.name, e)),
            }
        }

        self.events.info("=== Probe complete ===");
    }

    /// One pass over every enabled target, in configuration order
    pub fn tick(&mut self) -> TickReport {
        let sampler = CpuSampler::new(self.settings.gpu_filter_factor);
        let tracker = ThresholdTracker::from_config(&self.settings);
        let executor = RestartExecutor::new(
            self.resolver.clone(),
            self.settings.restart_startup_delay(),
        )
        .with_settle_time(self.settle_time);

        let mut report = TickReport::default();
        for index in 0..self.targets.len() {
            if !self.targets[index].enabled {
                continue;
            }

            if let Err(e) = self.check_target(index, &sampler, &tracker, &executor, &mut report) {
                report.errors += 1;
                self.events.error(format!(
                    "Error checking {}: {}",
                    self.targets[index].name, e
                ));
            }
        }
        report
    }

    fn check_target(
        &mut self,
        index: usize,
        sampler: &CpuSampler,
        tracker: &ThresholdTracker,
        executor: &RestartExecutor,
        report: &mut TickReport,
    ) -> Result<()> {
        let processes = self.processes.as_ref();
        let clock = self.clock.as_ref();
        let events = &self.events;
        let threshold = self.settings.cpu_threshold_percent;
        let target = &mut self.targets[index];

        let sample = sampler.sample(processes, &target.process_match_pattern)?;
        report.sampled += 1;

        let Some(event) = tracker.evaluate(target, sample, clock.now()) else {
            return Ok(());
        };

        match event {
            TrackerEvent::TerminationDetected => {
                events.warn(format!("DETECTED: {} has been terminated", target.name));
                executor.restart_for_termination(processes, clock, events, target);
                report.restarts += 1;
                report.changed = true;
            }
            TrackerEvent::ThresholdWarningStarted => events.warn(format!(
                "WARNING: {} CPU usage: {:.1}% (exceeds {}%) - Starting threshold timer",
                target.name, sample.cpu_percent, threshold
            )),
            TrackerEvent::ThresholdWarningContinuing { remaining } => events.warn(format!(
                "WARNING: {} CPU usage: {:.1}% (exceeds {}%) - {:.1}s remaining before restart",
                target.name,
                sample.cpu_percent,
                threshold,
                remaining.as_secs_f64()
            )),
            TrackerEvent::ThresholdExceeded { elapsed } => {
                events.error(format!(
                    "CRITICAL: {} CPU usage: {:.1}% (exceeds {}% for {:.1}s) - Restarting",
                    target.name,
                    sample.cpu_percent,
                    threshold,
                    elapsed.as_secs_f64()
                ));
                let outcome = executor.restart_for_overload(processes, clock, events, target);
                if outcome != RestartOutcome::NothingToRestart {
                    report.restarts += 1;
                    report.changed = true;
                }
            }
            TrackerEvent::ThresholdNormalized => events.info(format!(
                "INFO: {} CPU usage normalized: {:.1}% (below {}%)",
                target.name, sample.cpu_percent, threshold
            )),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TargetStatus;
    use crate::services::testing::{FakeProcesses, ManualClock};
    use std::fs;
    use tempfile::TempDir;

    struct Fixture {
        fake: Arc<FakeProcesses>,
        clock: Arc<ManualClock>,
        monitor: Monitor,
    }

    fn fixture(settings: EngineConfig, names: &[&str]) -> Fixture {
        let fake = Arc::new(FakeProcesses::new());
        let clock = Arc::new(ManualClock::new());
        let targets = names.iter().map(|n| MonitoredTarget::new(n)).collect();
        let monitor = Monitor::new(
            fake.clone(),
            clock.clone(),
            EventLog::new(),
            settings,
            targets,
        )
        .with_resolver(LaunchResolver::new(InstallRoots::new()).with_templates(&[]))
        .with_settle_time(Duration::ZERO);

        Fixture {
            fake,
            clock,
            monitor,
        }
    }

    fn settings(threshold: f64, duration: f64) -> EngineConfig {
        EngineConfig {
            cpu_threshold_percent: threshold,
            check_interval_secs: 2.0,
            restart_startup_delay_secs: 0.0,
            monitoring_startup_delay_secs: 0.0,
            cpu_threshold_duration_secs: duration,
            gpu_filter_factor: 1.0,
            auto_restart_enabled: true,
        }
    }

    #[test]
    fn test_sustained_overload_scenario() {
        let mut f = fixture(settings(50.0, 10.0), &["editor"]);
        f.fake.spawn("editor", 60.0);

        let started = f.clock.now();
        let mut reports = vec![f.monitor.tick()];
        assert_eq!(f.monitor.targets()[0].threshold_exceeded_since, Some(started));

        for cpu in [55.0, 70.0, 65.0, 58.0, 61.0] {
            f.clock.advance(Duration::from_secs(2));
            f.fake.set_cpu("editor", cpu);
            reports.push(f.monitor.tick());
        }

        let restarts: usize = reports.iter().map(|r| r.restarts).sum();
        assert_eq!(restarts, 1);
        assert_eq!(reports[5].restarts, 1);

        let target = &f.monitor.targets()[0];
        assert!(target.threshold_exceeded_since.is_none());
        assert_eq!(target.restart_count, 1);
        assert_eq!(target.status, TargetStatus::Restarted);
        assert_eq!(f.fake.launches().len(), 1);

        // Relaunched and still overloaded: the timer starts over instead of firing
        f.fake.spawn("editor", 90.0);
        f.clock.advance(Duration::from_secs(2));
        let report = f.monitor.tick();
        assert_eq!(report.restarts, 0);
        assert!(f.monitor.targets()[0].threshold_exceeded_since.is_some());
    }

    #[test]
    fn test_gpu_filter_keeps_target_below_threshold() {
        let mut cfg = settings(50.0, 10.0);
        cfg.gpu_filter_factor = 0.5;
        let mut f = fixture(cfg, &["render"]);
        f.fake.spawn("render", 80.0);

        f.monitor.tick();
        let target = &f.monitor.targets()[0];
        assert_eq!(target.last_cpu_percent, 40.0);
        assert!(target.threshold_exceeded_since.is_none());
    }

    #[test]
    fn test_terminated_target_restarted_once() {
        let mut f = fixture(settings(50.0, 10.0), &["viewer"]);

        let first = f.monitor.tick();
        f.clock.advance(Duration::from_secs(2));
        let second = f.monitor.tick();

        assert_eq!(first.restarts, 1);
        assert_eq!(second.restarts, 0);
        assert_eq!(f.fake.launches().len(), 1);
        let target = &f.monitor.targets()[0];
        assert_eq!(target.status, TargetStatus::AutoRestarted);
        assert_eq!(target.restart_count, 1);
    }

    #[test]
    fn test_no_auto_restart_leaves_status() {
        let mut cfg = settings(50.0, 10.0);
        cfg.auto_restart_enabled = false;
        let mut f = fixture(cfg, &["viewer"]);

        f.monitor.tick();
        f.monitor.tick();
        assert_eq!(f.monitor.targets()[0].status, TargetStatus::Active);
        assert!(f.fake.launches().is_empty());
    }

    #[test]
    fn test_disabled_target_untouched() {
        let mut f = fixture(settings(50.0, 0.0), &["editor"]);
        f.fake.spawn("editor", 99.0);
        f.monitor.toggle_enabled("editor").unwrap();

        for _ in 0..3 {
            f.monitor.tick();
            f.clock.advance(Duration::from_secs(2));
        }
        let target = &f.monitor.targets()[0];
        assert_eq!(target.restart_count, 0);
        assert_eq!(target.last_cpu_percent, 0.0);
        assert_eq!(f.fake.running("editor"), 1);
    }

    #[test]
    fn test_failing_target_does_not_stop_tick() {
        let mut f = fixture(settings(50.0, 10.0), &["broken", "editor"]);
        f.fake.fail_inspection("broken");
        f.fake.spawn("editor", 20.0);

        let report = f.monitor.tick();
        assert_eq!(report.errors, 1);
        assert_eq!(report.sampled, 1);
        assert_eq!(f.monitor.targets()[1].last_cpu_percent, 20.0);
        assert!(f
            .monitor
            .events()
            .recent(usize::MAX)
            .iter()
            .any(|e| e.message.starts_with("Error checking broken")));
    }

    #[test]
    fn test_validate_start() {
        let f = fixture(settings(50.0, 10.0), &[]);
        assert!(matches!(f.monitor.validate_start(), Err(WatchdogError::Config(_))));

        let mut f = fixture(settings(50.0, 10.0), &["editor"]);
        assert!(f.monitor.validate_start().is_ok());
        f.monitor.toggle_enabled("editor").unwrap();
        assert!(f.monitor.validate_start().is_err());

        let mut cfg = settings(50.0, 10.0);
        cfg.cpu_threshold_percent = -5.0;
        let f = fixture(cfg, &["editor"]);
        assert!(f.monitor.validate_start().is_err());
    }

    #[test]
    fn test_stale_timer_cleared_on_start() {
        let mut f = fixture(settings(50.0, 10.0), &["editor"]);
        f.fake.spawn("editor", 60.0);
        f.monitor.targets[0].threshold_exceeded_since =
            Some(f.clock.now() - chrono::Duration::hours(1));

        f.monitor.prepare_start().unwrap();
        let report = f.monitor.tick();

        assert_eq!(report.restarts, 0);
        assert_eq!(f.monitor.targets()[0].restart_count, 0);
        assert!(f.fake.launches().is_empty());
        assert_eq!(
            f.monitor.targets()[0].threshold_exceeded_since,
            Some(f.clock.now())
        );
    }

    #[test]
    fn test_prepare_start_keeps_timers_when_invalid() {
        let mut f = fixture(settings(50.0, 10.0), &["editor"]);
        let since = f.clock.now();
        f.monitor.targets[0].threshold_exceeded_since = Some(since);
        f.monitor.toggle_enabled("editor").unwrap();

        assert!(f.monitor.prepare_start().is_err());
        assert_eq!(f.monitor.targets()[0].threshold_exceeded_since, Some(since));
    }

    #[test]
    fn test_target_commands() {
        let mut f = fixture(settings(50.0, 10.0), &["editor"]);

        assert!(matches!(
            f.monitor.add_target("editor"),
            Err(WatchdogError::DuplicateTarget(_))
        ));
        assert!(f.monitor.add_target("  ").is_err());
        f.monitor.add_target(" Viewer ").unwrap();
        assert_eq!(f.monitor.targets()[1].name, "Viewer");
        assert_eq!(f.monitor.targets()[1].process_match_pattern, "viewer");

        assert!(!f.monitor.toggle_enabled("Viewer").unwrap());
        assert!(matches!(
            f.monitor.remove_target("missing"),
            Err(WatchdogError::TargetNotFound(_))
        ));
        f.monitor.remove_target("Viewer").unwrap();
        assert_eq!(f.monitor.targets().len(), 1);
    }

    #[test]
    fn test_reset_threshold_timer() {
        let mut f = fixture(settings(50.0, 10.0), &["editor"]);
        f.fake.spawn("editor", 75.0);

        f.monitor.tick();
        assert!(f.monitor.reset_threshold_timer("editor").unwrap());
        assert!(f.monitor.targets()[0].threshold_exceeded_since.is_none());
        assert!(!f.monitor.reset_threshold_timer("editor").unwrap());
    }

    #[test]
    fn test_set_executable_path() {
        let dir = TempDir::new().unwrap();
        let exe = dir.path().join("editor");
        fs::write(&exe, b"").unwrap();
        let mut f = fixture(settings(50.0, 10.0), &["editor"]);

        assert!(matches!(
            f.monitor
                .set_executable_path("editor", dir.path().join("missing")),
            Err(WatchdogError::InvalidPath(_))
        ));
        f.monitor.set_executable_path("editor", exe.clone()).unwrap();
        assert_eq!(f.monitor.targets()[0].executable_path, Some(exe));
    }

    #[test]
    fn test_discover_from_running_process() {
        let dir = TempDir::new().unwrap();
        let exe = dir.path().join("wd-test-editor");
        fs::write(&exe, b"").unwrap();
        let mut f = fixture(settings(50.0, 10.0), &["wd-test-editor", "wd-test-ghost"]);
        f.fake
            .spawn_with_exe("wd-test-editor", Some(exe.as_path()), 1.0);

        assert_eq!(f.monitor.discover_executable_paths(), 1);
        assert_eq!(f.monitor.targets()[0].executable_path, Some(exe));
        assert!(f.monitor.targets()[1].executable_path.is_none());
    }

    #[test]
    fn test_probe_updates_cpu_without_decisions() {
        let mut f = fixture(settings(50.0, 0.0), &["editor"]);
        f.fake.spawn("editor", 95.0);

        f.monitor.probe();
        let target = &f.monitor.targets()[0];
        assert_eq!(target.last_cpu_percent, 95.0);
        assert_eq!(target.last_process_count, 1);
        assert!(target.threshold_exceeded_since.is_none());
        assert!(f.fake.launches().is_empty());
    }

    #[test]
    fn test_snapshot_reflects_loop_state() {
        let f = fixture(settings(50.0, 10.0), &["editor", "viewer"]);
        let snapshot = f.monitor.snapshot(LoopState::Paused);
        assert_eq!(snapshot.loop_state, LoopState::Paused);
        assert_eq!(snapshot.total_count, 2);
        assert_eq!(snapshot.targets[0].name, "editor");
    }
}
