use prometheus::{
    Encoder, Gauge, GaugeVec, Opts, Registry, TextEncoder,
    register_gauge_vec_with_registry, register_gauge_with_registry,
};
use lazy_static::lazy_static;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use sysinfo::System;

use crate::models::EngineSnapshot;

pub struct MetricsRegistry {
    registry: Registry,
    hostname: String,
    /// Target names that currently have a series
    exported: Mutex<HashSet<String>>,

    pub monitor_state: Gauge,
    pub target_cpu_percent: GaugeVec,
    pub target_up: GaugeVec,
    pub target_restarts: GaugeVec,
    pub target_threshold_warning: GaugeVec,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        let registry = Registry::new();
        let target_labels = &["name", "hostname"];

        let monitor_state = register_gauge_with_registry!(
            Opts::new(
                "watchdog_monitor_state",
                "Monitor loop state: 0 stopped, 1 startup delay, 2 running, 3 paused"
            ),
            registry
        ).unwrap();

        let target_cpu_percent = register_gauge_vec_with_registry!(
            Opts::new("watchdog_target_cpu_percent", "Last aggregate CPU usage of the target"),
            target_labels,
            registry
        ).unwrap();

        let target_up = register_gauge_vec_with_registry!(
            Opts::new("watchdog_target_up", "At least one process of the target is running (1) or none (0)"),
            target_labels,
            registry
        ).unwrap();

        let target_restarts = register_gauge_vec_with_registry!(
            Opts::new("watchdog_target_restarts", "Restarts performed by the watchdog"),
            target_labels,
            registry
        ).unwrap();

        let target_threshold_warning = register_gauge_vec_with_registry!(
            Opts::new("watchdog_target_threshold_warning", "CPU threshold timer is running (1) or not (0)"),
            target_labels,
            registry
        ).unwrap();

        Self {
            registry,
            hostname: System::host_name().unwrap_or_else(|| "unknown".to_string()),
            exported: Mutex::new(HashSet::new()),
            monitor_state,
            target_cpu_percent,
            target_up,
            target_restarts,
            target_threshold_warning,
        }
    }

    /// Mirror a published snapshot, dropping series of removed targets
    pub fn observe(&self, snapshot: &EngineSnapshot) {
        self.monitor_state.set(snapshot.loop_state.as_gauge());

        let mut exported = self.exported.lock().unwrap_or_else(|e| e.into_inner());
        let current: HashSet<String> = snapshot.targets.iter().map(|t| t.name.clone()).collect();

        for name in exported.difference(&current) {
            self.remove_target(name);
        }

        for target in &snapshot.targets {
            let labels = &[target.name.as_str(), self.hostname.as_str()];

            self.target_cpu_percent
                .with_label_values(labels)
                .set(target.last_cpu_percent);
            self.target_up
                .with_label_values(labels)
                .set(if target.process_count > 0 { 1.0 } else { 0.0 });
            self.target_restarts
                .with_label_values(labels)
                .set(target.restart_count as f64);
            self.target_threshold_warning
                .with_label_values(labels)
                .set(if target.threshold_exceeded_since.is_some() { 1.0 } else { 0.0 });
        }

        *exported = current;
    }

    pub fn remove_target(&self, name: &str) {
        let labels = &[name, self.hostname.as_str()];

        let _ = self.target_cpu_percent.remove_label_values(labels);
        let _ = self.target_up.remove_label_values(labels);
        let _ = self.target_restarts.remove_label_values(labels);
        let _ = self.target_threshold_warning.remove_label_values(labels);
    }

    pub fn render(&self) -> Result<String, Box<dyn std::error::Error>> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

lazy_static! {
    pub static ref METRICS: Arc<MetricsRegistry> = Arc::new(MetricsRegistry::new());
}
