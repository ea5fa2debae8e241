//! Projects metric snapshots onto the scalar series the graphs track.
//!
//! Multi-instance metrics (partitions, GPUs) chart only their first
//! enumerated instance. When there are no instances at all the series gets
//! no point for that cycle, which keeps "absent" distinct from "idle".

use super::buffer::SeriesPoint;
use super::manager::SeriesSpec;
use crate::metrics::MetricSnapshot;

pub const CPU_TOTAL_PERCENT: &str = "cpu.total_percent";
pub const RAM_PERCENT: &str = "ram.percent";
pub const DISK_READ_RATE: &str = "disk.read_rate";
pub const DISK_WRITE_RATE: &str = "disk.write_rate";
pub const DISK0_USAGE_PERCENT: &str = "disk0.usage_percent";
pub const GPU0_UTIL_PERCENT: &str = "gpu0.util_percent";
pub const GPU0_MEM_UTIL_PERCENT: &str = "gpu0.mem_util_percent";

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SeriesUpdate {
    pub series_id: &'static str,
    pub point: SeriesPoint,
}

impl SeriesUpdate {
    fn new(series_id: &'static str, point: SeriesPoint) -> Self {
        SeriesUpdate { series_id, point }
    }
}

pub fn tracked_series() -> Vec<SeriesSpec> {
    vec![
        SeriesSpec::percent(CPU_TOTAL_PERCENT),
        SeriesSpec::percent(RAM_PERCENT),
        SeriesSpec::rate(DISK_READ_RATE),
        SeriesSpec::rate(DISK_WRITE_RATE),
        SeriesSpec::percent(DISK0_USAGE_PERCENT),
        SeriesSpec::percent(GPU0_UTIL_PERCENT),
        SeriesSpec::percent(GPU0_MEM_UTIL_PERCENT),
    ]
}

pub fn normalize(snapshot: &MetricSnapshot) -> Vec<SeriesUpdate> {
    let at = snapshot.timestamp();
    let point = |value: f64| SeriesPoint::new(at, value);

    match snapshot {
        MetricSnapshot::Cpu(cpu) => {
            vec![SeriesUpdate::new(
                CPU_TOTAL_PERCENT,
                point(cpu.total_percent as f64),
            )]
        }
        MetricSnapshot::Ram(ram) => vec![SeriesUpdate::new(RAM_PERCENT, point(ram.percent))],
        MetricSnapshot::Disk(disk) => {
            let mut updates = vec![
                SeriesUpdate::new(DISK_READ_RATE, point(disk.read_bytes_per_sec)),
                SeriesUpdate::new(DISK_WRITE_RATE, point(disk.write_bytes_per_sec)),
            ];
            if let Some(first) = disk.partitions.first() {
                updates.push(SeriesUpdate::new(DISK0_USAGE_PERCENT, point(first.percent)));
            }
            updates
        }
        MetricSnapshot::Gpu(gpu) => {
            let Some(first) = gpu.devices.first() else {
                return Vec::new();
            };
            let mut updates = Vec::with_capacity(2);
            if let Some(util) = first.util_percent {
                updates.push(SeriesUpdate::new(GPU0_UTIL_PERCENT, point(util as f64)));
            }
            if let Some(mem) = first.mem_util_percent {
                updates.push(SeriesUpdate::new(GPU0_MEM_UTIL_PERCENT, point(mem as f64)));
            }
            updates
        }
    }
}
