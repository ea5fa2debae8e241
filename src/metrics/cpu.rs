use std::thread::sleep;
use std::time::Duration;

use chrono::Utc;
use sysinfo::System;

use super::procfs::read_proc_stat;
use super::types::{CpuSnapshot, MetricSnapshot, Sampler};

/// Usage is the delta between two refreshes, so each sample spans this window.
pub const CPU_MEASURE_WINDOW: Duration = Duration::from_millis(500);

pub struct CpuSampler {
    system: System,
    window: Duration,
}

impl CpuSampler {
    pub fn new() -> Self {
        Self::with_window(CPU_MEASURE_WINDOW)
    }

    pub fn with_window(window: Duration) -> Self {
        CpuSampler {
            system: System::new(),
            window,
        }
    }

    pub fn collect(&mut self) -> CpuSnapshot {
        self.system.refresh_cpu();
        sleep(self.window);
        self.system.refresh_cpu();

        let cpus = self.system.cpus();
        let per_core_percent: Vec<f32> = cpus.iter().map(|cpu| cpu.cpu_usage()).collect();
        let total_percent = mean(&per_core_percent);
        let frequency_mhz = cpus
            .first()
            .map(|cpu| cpu.frequency())
            .filter(|mhz| *mhz > 0);

        let proc_stat = read_proc_stat().unwrap_or_default();

        CpuSnapshot {
            timestamp: Utc::now(),
            total_percent,
            per_core_percent,
            thread_count: cpus.len(),
            core_count: self.system.physical_core_count(),
            frequency_mhz,
            times_per_core: proc_stat.per_core,
            stats: proc_stat.stats,
        }
    }
}

impl Default for CpuSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl Sampler for CpuSampler {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn sample(&mut self) -> MetricSnapshot {
        MetricSnapshot::Cpu(self.collect())
    }
}

fn mean(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().copied().sum::<f32>() / values.len() as f32
}
