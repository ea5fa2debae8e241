use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Every hardware sampler exposes a single synchronous "sample now" call.
///
/// Implementations must be `Send` because the scheduling loop moves the
/// sampler set onto a blocking worker for the duration of a cycle.
pub trait Sampler: Send {
    fn name(&self) -> &'static str;
    fn sample(&mut self) -> MetricSnapshot;
}

/// One sampler invocation, tagged by metric domain.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MetricSnapshot {
    Cpu(CpuSnapshot),
    Ram(RamSnapshot),
    Disk(DiskSnapshot),
    Gpu(GpuSnapshot),
}

impl MetricSnapshot {
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            MetricSnapshot::Cpu(s) => s.timestamp,
            MetricSnapshot::Ram(s) => s.timestamp,
            MetricSnapshot::Disk(s) => s.timestamp,
            MetricSnapshot::Gpu(s) => s.timestamp,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            MetricSnapshot::Cpu(_) => "cpu",
            MetricSnapshot::Ram(_) => "ram",
            MetricSnapshot::Disk(_) => "disk",
            MetricSnapshot::Gpu(_) => "gpu",
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CpuTimes {
    pub user: f64,
    pub nice: f64,
    pub system: f64,
    pub idle: f64,
    pub iowait: f64,
    pub irq: f64,
    pub softirq: f64,
    pub steal: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuStats {
    pub ctx_switches: u64,
    pub interrupts: u64,
    pub soft_interrupts: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CpuSnapshot {
    pub timestamp: DateTime<Utc>,
    pub total_percent: f32,
    pub per_core_percent: Vec<f32>,
    pub thread_count: usize,
    pub core_count: Option<usize>,
    /// Current clock in MHz; `None` when the platform does not report one.
    pub frequency_mhz: Option<u64>,
    pub times_per_core: Vec<CpuTimes>,
    pub stats: Option<CpuStats>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RamSnapshot {
    pub timestamp: DateTime<Utc>,
    pub total_bytes: u64,
    pub used_bytes: u64,
    pub available_bytes: u64,
    pub percent: f64,
    /// Exact total, two decimals. Used by anything that computes with it.
    pub total_ram_gb: f64,
    /// Whole-number total rounded up, for labels.
    pub total_ram_round_gb: u64,
    pub used_ram_gb: f64,
    pub available_ram_gb: f64,
    pub swap_total_bytes: u64,
    pub swap_used_bytes: u64,
    pub swap_percent: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PartitionSnapshot {
    pub device: String,
    pub mountpoint: String,
    pub file_system: String,
    pub total_bytes: u64,
    pub used_bytes: u64,
    pub total_gb: u64,
    pub used_gb: u64,
    pub percent: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DiskSnapshot {
    pub timestamp: DateTime<Utc>,
    pub read_bytes_per_sec: f64,
    pub write_bytes_per_sec: f64,
    pub partitions: Vec<PartitionSnapshot>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GpuDeviceSnapshot {
    pub index: u32,
    pub name: String,
    pub uuid: String,
    pub util_percent: Option<u32>,
    pub mem_util_percent: Option<u32>,
    pub mem_total_mb: Option<u64>,
    pub mem_used_mb: Option<u64>,
    pub mem_free_mb: Option<u64>,
    pub temperature_c: Option<u32>,
    pub core_clock_mhz: Option<u32>,
    pub mem_clock_mhz: Option<u32>,
    pub power_usage_w: Option<f64>,
    pub power_limit_w: Option<f64>,
    pub pcie_rx_kbps: Option<u32>,
    pub pcie_tx_kbps: Option<u32>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GpuSnapshot {
    pub timestamp: DateTime<Utc>,
    pub device_count: u32,
    pub devices: Vec<GpuDeviceSnapshot>,
}

impl GpuSnapshot {
    pub fn empty(timestamp: DateTime<Utc>) -> Self {
        GpuSnapshot {
            timestamp,
            device_count: 0,
            devices: Vec::new(),
        }
    }
}
