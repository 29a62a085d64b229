//! Resource Usage Sampling
//!
//! Samples CPU and memory of the host process plus the system-wide memory
//! usage ratio. The ratio feeds resource alerts in the metrics aggregator.

use std::time::{Duration, Instant};

use log::warn;
use sysinfo::{get_current_pid, Pid, ProcessRefreshKind, System};

/// A single resource usage sample.
#[derive(Debug, Clone)]
pub struct ResourceSample {
    pub timestamp: Instant,
    /// CPU usage percentage of this process (0-100+)
    pub cpu_usage: f32,
    /// Resident memory of this process in megabytes
    pub memory_mb: u64,
    /// Used / total system memory (0.0 - 1.0)
    pub memory_ratio: f64,
}

/// Samples resource usage of the current process.
///
/// ```rust,no_run
/// use stepwise::monitoring::ResourceMonitor;
///
/// let mut monitor = ResourceMonitor::new();
/// monitor.sample(); // warmup
/// std::thread::sleep(std::time::Duration::from_millis(300));
/// if let Some(sample) = monitor.sample() {
///     println!("memory usage: {:.0}%", sample.memory_ratio * 100.0);
/// }
/// ```
pub struct ResourceMonitor {
    system: System,
    process_id: Option<Pid>,
    samples: Vec<ResourceSample>,
    warmup_done: bool,
    last_sample: Option<Instant>,
    min_interval: Duration,
}

impl ResourceMonitor {
    pub fn new() -> Self {
        let process_id = match get_current_pid() {
            Ok(pid) => Some(pid),
            Err(e) => {
                warn!("Process sampling unavailable: {}", e);
                None
            }
        };

        Self {
            system: System::new(),
            process_id,
            samples: Vec::new(),
            warmup_done: false,
            last_sample: None,
            min_interval: Duration::from_millis(250),
        }
    }

    /// Sets the minimum interval between samples.
    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }

    /// Takes a sample and returns it.
    ///
    /// The first call only warms up CPU accounting and returns `None`, as
    /// do calls closer together than `min_interval`.
    pub fn sample(&mut self) -> Option<ResourceSample> {
        let now = Instant::now();
        let refresh_kind = ProcessRefreshKind::new().with_cpu().with_memory();

        if !self.warmup_done {
            self.system.refresh_processes_specifics(refresh_kind);
            self.system.refresh_memory();
            self.warmup_done = true;
            self.last_sample = Some(now);
            return None;
        }

        if let Some(last) = self.last_sample {
            if now.duration_since(last) < self.min_interval {
                return None;
            }
        }

        self.system.refresh_processes_specifics(refresh_kind);
        self.system.refresh_memory();
        self.last_sample = Some(now);

        let (cpu_usage, memory_mb) = self
            .process_id
            .and_then(|pid| self.system.process(pid))
            .map(|process| (process.cpu_usage(), process.memory() / (1024 * 1024)))
            .unwrap_or((0.0, 0));

        let total = self.system.total_memory();
        let memory_ratio = if total == 0 {
            0.0
        } else {
            self.system.used_memory() as f64 / total as f64
        };

        let sample = ResourceSample {
            timestamp: now,
            cpu_usage,
            memory_mb,
            memory_ratio,
        };
        self.samples.push(sample.clone());
        Some(sample)
    }

    pub fn get_samples(&self) -> &[ResourceSample] {
        &self.samples
    }

    pub fn peak_memory_mb(&self) -> u64 {
        self.samples.iter().map(|s| s.memory_mb).max().unwrap_or(0)
    }

    pub fn average_cpu(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().map(|s| s.cpu_usage).sum::<f32>() / self.samples.len() as f32
    }

    /// Human-readable summary of collected samples.
    pub fn get_summary(&self) -> String {
        if self.samples.is_empty() {
            return "No resource data collected".to_string();
        }

        let peak_ratio = self
            .samples
            .iter()
            .map(|s| s.memory_ratio)
            .fold(0.0_f64, f64::max);

        format!(
            "Resource Usage:\n  Average CPU: {:.1}%\n  Peak Memory: {} MB\n  Peak System Memory: {:.0}%\n  Samples: {}",
            self.average_cpu(),
            self.peak_memory_mb(),
            peak_ratio * 100.0,
            self.samples.len()
        )
    }
}

impl Default for ResourceMonitor {
    fn default() -> Self {
        Self::new()
    }
}
