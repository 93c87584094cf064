use crate::error::Result;
use crate::services::ProcessInspector;

/// Aggregate CPU of one target
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CpuSample {
    /// Sum of filtered per-process CPU percentages
    pub cpu_percent: f64,
    /// Processes that produced a reading; zero means the target is not running
    pub process_count: usize,
}

/// Sums CPU usage across every process matching a pattern
pub struct CpuSampler {
    gpu_filter_factor: f64,
}

impl CpuSampler {
    pub fn new(gpu_filter_factor: f64) -> Self {
        Self { gpu_filter_factor }
    }

    /// Discount the share of CPU time attributed to GPU driver work
    pub fn filter_gpu_usage(&self, raw_cpu: f64) -> f64 {
        (raw_cpu * self.gpu_filter_factor).max(0.0)
    }

    pub fn sample<P: ProcessInspector + ?Sized>(&self, inspector: &P, pattern: &str) -> Result<CpuSample> {
        let processes = inspector.find_matching_processes(pattern)?;
        if processes.is_empty() {
            return Ok(CpuSample::default());
        }

        let pids: Vec<u32> = processes.iter().map(|p| p.pid).collect();
        let readings = inspector.sample_cpu_percent(&pids)?;

        let mut sample = CpuSample::default();
        for (pid, raw_cpu) in readings {
            let cpu = self.filter_gpu_usage(raw_cpu);
            if cpu > 0.0 {
                let name = processes
                    .iter()
                    .find(|p| p.pid == pid)
                    .map(|p| p.name.as_str())
                    .unwrap_or("?");
                log::debug!(
                    "Process {} (PID: {}) CPU: {:.1}% (filtered from {:.1}%)",
                    name, pid, cpu, raw_cpu
                );
            }
            sample.cpu_percent += cpu;
            sample.process_count += 1;
        }

        Ok(sample)
    }
}
