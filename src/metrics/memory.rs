use chrono::{DateTime, Utc};
use sysinfo::System;

use super::types::{MetricSnapshot, RamSnapshot, Sampler};

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Raw byte counts as reported by the OS, before any rounding.
#[derive(Clone, Copy, Debug, Default)]
pub struct MemoryReading {
    pub total: u64,
    pub used: u64,
    pub available: u64,
    pub swap_total: u64,
    pub swap_used: u64,
}

/// Total in GiB rounded to two decimals.
pub fn exact_gib(bytes: u64) -> f64 {
    round_to(bytes as f64 / GIB, 2)
}

/// Total in GiB rounded up to a whole number. Kept separate from
/// [`exact_gib`] so the two roundings never feed into each other.
pub fn display_gib(bytes: u64) -> u64 {
    (bytes as f64 / GIB).ceil() as u64
}

pub(crate) fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

fn percent_of(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    round_to(part as f64 / whole as f64 * 100.0, 1)
}

impl RamSnapshot {
    pub fn from_reading(reading: MemoryReading, timestamp: DateTime<Utc>) -> Self {
        let in_use = reading.total.saturating_sub(reading.available);
        RamSnapshot {
            timestamp,
            total_bytes: reading.total,
            used_bytes: reading.used,
            available_bytes: reading.available,
            percent: percent_of(in_use, reading.total),
            total_ram_gb: exact_gib(reading.total),
            total_ram_round_gb: display_gib(reading.total),
            used_ram_gb: exact_gib(reading.used),
            available_ram_gb: exact_gib(reading.available),
            swap_total_bytes: reading.swap_total,
            swap_used_bytes: reading.swap_used,
            swap_percent: percent_of(reading.swap_used, reading.swap_total),
        }
    }
}

pub struct RamSampler {
    system: System,
}

impl RamSampler {
    pub fn new() -> Self {
        RamSampler {
            system: System::new(),
        }
    }

    pub fn read(&mut self) -> MemoryReading {
        self.system.refresh_memory();
        MemoryReading {
            total: self.system.total_memory(),
            used: self.system.used_memory(),
            available: self.system.available_memory(),
            swap_total: self.system.total_swap(),
            swap_used: self.system.used_swap(),
        }
    }
}

impl Default for RamSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl Sampler for RamSampler {
    fn name(&self) -> &'static str {
        "ram"
    }

    fn sample(&mut self) -> MetricSnapshot {
        let reading = self.read();
        MetricSnapshot::Ram(RamSnapshot::from_reading(reading, Utc::now()))
    }
}
