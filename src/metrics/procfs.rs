//! Text parsers for the procfs counters sysinfo does not expose.
//!
//! The parsers are pure so they can be fed captured fixtures; the `read_*`
//! helpers return `None` wherever procfs is missing.

use super::types::{CpuStats, CpuTimes};

const SECTOR_SIZE: u64 = 512;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ProcStat {
    pub per_core: Vec<CpuTimes>,
    pub stats: Option<CpuStats>,
}

/// Cumulative bytes moved by all whole-disk block devices since boot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IoCounters {
    pub read_bytes: u64,
    pub write_bytes: u64,
}

pub fn parse_proc_stat(raw: &str, ticks_per_sec: f64) -> ProcStat {
    let ticks = if ticks_per_sec > 0.0 { ticks_per_sec } else { 100.0 };
    let mut out = ProcStat::default();
    let mut ctxt = None;
    let mut intr = 0;
    let mut softirq = 0;

    for line in raw.lines() {
        let mut parts = line.split_whitespace();
        let Some(key) = parts.next() else {
            continue;
        };
        match key {
            "ctxt" => ctxt = parts.next().and_then(|v| v.parse::<u64>().ok()),
            "intr" => intr = parts.next().and_then(|v| v.parse().ok()).unwrap_or(0),
            "softirq" => softirq = parts.next().and_then(|v| v.parse().ok()).unwrap_or(0),
            // "cpu" alone is the aggregate row; per-core rows carry an index.
            k if k.starts_with("cpu") && k.len() > 3 => {
                let values: Vec<f64> = parts
                    .take(8)
                    .filter_map(|v| v.parse::<f64>().ok())
                    .map(|v| v / ticks)
                    .collect();
                if values.len() < 4 {
                    continue;
                }
                let at = |i: usize| values.get(i).copied().unwrap_or(0.0);
                out.per_core.push(CpuTimes {
                    user: at(0),
                    nice: at(1),
                    system: at(2),
                    idle: at(3),
                    iowait: at(4),
                    irq: at(5),
                    softirq: at(6),
                    steal: at(7),
                });
            }
            _ => {}
        }
    }

    out.stats = ctxt.map(|ctx_switches| CpuStats {
        ctx_switches,
        interrupts: intr,
        soft_interrupts: softirq,
    });
    out
}

pub fn parse_diskstats(raw: &str) -> IoCounters {
    let mut counters = IoCounters::default();
    for line in raw.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 10 || !is_whole_disk(parts[2]) {
            continue;
        }
        let read_sectors = parts[5].parse::<u64>().unwrap_or(0);
        let write_sectors = parts[9].parse::<u64>().unwrap_or(0);
        counters.read_bytes = counters
            .read_bytes
            .saturating_add(read_sectors.saturating_mul(SECTOR_SIZE));
        counters.write_bytes = counters
            .write_bytes
            .saturating_add(write_sectors.saturating_mul(SECTOR_SIZE));
    }
    counters
}

/// Partitions and virtual devices would double count the parent disk.
fn is_whole_disk(name: &str) -> bool {
    const VIRTUAL: [&str; 8] = ["loop", "ram", "dm-", "md", "zram", "sr", "fd", "nbd"];
    if VIRTUAL.iter().any(|prefix| name.starts_with(prefix)) {
        return false;
    }
    if name.starts_with("nvme") || name.starts_with("mmcblk") {
        return !name.contains('p');
    }
    !name.chars().last().is_some_and(|c| c.is_ascii_digit())
}

#[cfg(target_os = "linux")]
pub fn read_proc_stat() -> Option<ProcStat> {
    let raw = std::fs::read_to_string("/proc/stat").ok()?;
    let ticks = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
    Some(parse_proc_stat(&raw, ticks as f64))
}

#[cfg(not(target_os = "linux"))]
pub fn read_proc_stat() -> Option<ProcStat> {
    None
}

#[cfg(target_os = "linux")]
pub fn read_diskstats() -> Option<IoCounters> {
    let raw = std::fs::read_to_string("/proc/diskstats").ok()?;
    Some(parse_diskstats(&raw))
}

#[cfg(not(target_os = "linux"))]
pub fn read_diskstats() -> Option<IoCounters> {
    None
}
