//! Test doubles for the process table and the clock.

use chrono::{DateTime, TimeZone, Utc};
use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use crate::error::{Result, WatchdogError};
use crate::services::{matches_pattern, Clock, ProcessInfo, ProcessInspector, ProcessLauncher};

#[derive(Debug, Clone)]
struct FakeProcess {
    pid: u32,
    name: String,
    exe_path: Option<PathBuf>,
    cpu: f64,
}

#[derive(Default)]
struct FakeTable {
    next_pid: u32,
    processes: Vec<FakeProcess>,
    vanish_on_sample: HashSet<u32>,
    failing_patterns: HashSet<String>,
    /// `None` lets every launch succeed
    launchable: Option<HashSet<PathBuf>>,
    launches: Vec<PathBuf>,
}

/// Scriptable in-memory process table
pub struct FakeProcesses {
    table: Mutex<FakeTable>,
}

impl FakeProcesses {
    pub fn new() -> Self {
        Self {
            table: Mutex::new(FakeTable {
                next_pid: 1000,
                ..FakeTable::default()
            }),
        }
    }

    pub fn spawn(&self, name: &str, cpu: f64) -> u32 {
        self.spawn_with_exe(name, None, cpu)
    }

    pub fn spawn_with_exe(&self, name: &str, exe_path: Option<&Path>, cpu: f64) -> u32 {
        let mut table = self.table.lock().unwrap();
        table.next_pid += 1;
        let pid = table.next_pid;
        table.processes.push(FakeProcess {
            pid,
            name: name.to_string(),
            exe_path: exe_path.map(Path::to_path_buf),
            cpu,
        });
        pid
    }

    /// Set the raw CPU of every process called `name`
    pub fn set_cpu(&self, name: &str, cpu: f64) {
        let mut table = self.table.lock().unwrap();
        for process in table.processes.iter_mut().filter(|p| p.name == name) {
            process.cpu = cpu;
        }
    }

    pub fn running(&self, name: &str) -> usize {
        self.table
            .lock()
            .unwrap()
            .processes
            .iter()
            .filter(|p| p.name == name)
            .count()
    }

    /// The process disappears between discovery and the CPU read
    pub fn vanish_on_sample(&self, pid: u32) {
        self.table.lock().unwrap().vanish_on_sample.insert(pid);
    }

    pub fn fail_inspection(&self, pattern: &str) {
        self.table
            .lock()
            .unwrap()
            .failing_patterns
            .insert(pattern.to_string());
    }

    /// Only the given programs can be launched, everything else fails
    pub fn allow_launch_only(&self, programs: &[&Path]) {
        self.table.lock().unwrap().launchable =
            Some(programs.iter().map(|p| p.to_path_buf()).collect());
    }

    pub fn launches(&self) -> Vec<PathBuf> {
        self.table.lock().unwrap().launches.clone()
    }
}

impl ProcessInspector for FakeProcesses {
    fn find_matching_processes(&self, pattern: &str) -> Result<Vec<ProcessInfo>> {
        let table = self.table.lock().unwrap();
        if table.failing_patterns.contains(pattern) {
            return Err(WatchdogError::inspection(format!("cannot scan for '{}'", pattern)));
        }

        Ok(table
            .processes
            .iter()
            .filter(|p| matches_pattern(pattern, &p.name, p.exe_path.as_deref()))
            .map(|p| ProcessInfo {
                pid: p.pid,
                name: p.name.clone(),
                exe_path: p.exe_path.clone(),
            })
            .collect())
    }

    fn sample_cpu_percent(&self, pids: &[u32]) -> Result<Vec<(u32, f64)>> {
        let mut table = self.table.lock().unwrap();
        let vanished: Vec<u32> = table.vanish_on_sample.drain().collect();
        table.processes.retain(|p| !vanished.contains(&p.pid));

        Ok(pids
            .iter()
            .filter_map(|pid| table.processes.iter().find(|p| p.pid == *pid))
            .map(|p| (p.pid, p.cpu))
            .collect())
    }

    fn terminate_processes(&self, pids: &[u32]) -> usize {
        let mut table = self.table.lock().unwrap();
        let before = table.processes.len();
        table.processes.retain(|p| !pids.contains(&p.pid));
        before - table.processes.len()
    }
}

impl ProcessLauncher for FakeProcesses {
    fn launch(&self, program: &Path) -> io::Result<u32> {
        let mut table = self.table.lock().unwrap();
        if let Some(launchable) = &table.launchable {
            if !launchable.contains(program) {
                return Err(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("{} not found", program.display()),
                ));
            }
        }
        table.launches.push(program.to_path_buf());
        table.next_pid += 1;
        Ok(table.next_pid)
    }
}

/// Clock whose `sleep` advances virtual time instantly
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
    slept: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()),
            slept: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, duration: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += chrono::Duration::from_std(duration).unwrap();
    }

    /// Total time spent in `sleep`
    pub fn slept(&self) -> Duration {
        *self.slept.lock().unwrap()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }

    fn sleep(&self, duration: Duration) {
        *self.slept.lock().unwrap() += duration;
        self.advance(duration);
    }
}
