use std::io;
use std::path::PathBuf;
use std::time::Instant;

use chrono::Utc;
use log::debug;
use sysinfo::Disks;

use super::memory::round_to;
use super::procfs::{read_diskstats, IoCounters};
use super::types::{DiskSnapshot, MetricSnapshot, PartitionSnapshot, Sampler};

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Where cumulative read/write byte counters come from.
pub trait DiskCounterSource: Send {
    fn read(&mut self) -> Option<IoCounters>;
}

/// `/proc/diskstats` on Linux; always empty elsewhere.
#[derive(Debug, Default)]
pub struct ProcDiskstats;

impl DiskCounterSource for ProcDiskstats {
    fn read(&mut self) -> Option<IoCounters> {
        read_diskstats()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct DiskRates {
    pub read_bytes_per_sec: f64,
    pub write_bytes_per_sec: f64,
}

/// Bytes per second between two cumulative readings. Zero when the clock
/// did not advance or the counter went backwards.
pub fn byte_rate(last: u64, now: u64, elapsed_secs: f64) -> f64 {
    if elapsed_secs <= 0.0 || now < last {
        return 0.0;
    }
    (now - last) as f64 / elapsed_secs
}

/// Previous counters and the instant they were taken, owned per sampler.
#[derive(Clone, Debug)]
pub struct DiskRateState {
    last_counters: Option<IoCounters>,
    last_instant: Instant,
}

impl DiskRateState {
    pub fn new(counters: Option<IoCounters>, at: Instant) -> Self {
        DiskRateState {
            last_counters: counters,
            last_instant: at,
        }
    }

    pub fn last_counters(&self) -> Option<IoCounters> {
        self.last_counters
    }

    /// Computes rates against the previous reading, then replaces it.
    /// Counters and instant always move together, even when no time elapsed.
    pub fn advance(&mut self, counters: Option<IoCounters>, now: Instant) -> DiskRates {
        let elapsed = now.saturating_duration_since(self.last_instant).as_secs_f64();
        let rates = match (self.last_counters, counters) {
            (Some(last), Some(current)) => DiskRates {
                read_bytes_per_sec: byte_rate(last.read_bytes, current.read_bytes, elapsed),
                write_bytes_per_sec: byte_rate(last.write_bytes, current.write_bytes, elapsed),
            },
            _ => DiskRates::default(),
        };
        self.last_counters = counters;
        self.last_instant = now;
        rates
    }
}

#[derive(Clone, Debug)]
pub struct MountEntry {
    pub device: String,
    pub mountpoint: PathBuf,
    pub file_system: String,
    pub reported_total: u64,
    pub reported_available: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UsageFigures {
    pub total: u64,
    pub free: u64,
    pub available: u64,
}

/// Outcome of asking one mount point for its usage.
#[derive(Debug)]
pub enum PartitionProbe {
    Usage(UsageFigures),
    /// Permission refused; expected for some system mounts.
    Denied,
    Unavailable(io::Error),
}

impl PartitionProbe {
    fn from_error(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::PermissionDenied {
            PartitionProbe::Denied
        } else {
            PartitionProbe::Unavailable(err)
        }
    }
}

#[cfg(unix)]
pub fn probe_usage(entry: &MountEntry) -> PartitionProbe {
    use std::ffi::CString;
    use std::mem::MaybeUninit;
    use std::os::unix::ffi::OsStrExt;

    let c_path = match CString::new(entry.mountpoint.as_os_str().as_bytes()) {
        Ok(path) => path,
        Err(err) => {
            return PartitionProbe::Unavailable(io::Error::new(io::ErrorKind::InvalidInput, err))
        }
    };
    let mut stat = MaybeUninit::<libc::statvfs>::uninit();
    let result = unsafe { libc::statvfs(c_path.as_ptr(), stat.as_mut_ptr()) };
    if result != 0 {
        return PartitionProbe::from_error(io::Error::last_os_error());
    }
    let stat = unsafe { stat.assume_init() };
    let fragment = stat.f_frsize as u64;
    PartitionProbe::Usage(UsageFigures {
        total: (stat.f_blocks as u64).saturating_mul(fragment),
        free: (stat.f_bfree as u64).saturating_mul(fragment),
        available: (stat.f_bavail as u64).saturating_mul(fragment),
    })
}

#[cfg(not(unix))]
pub fn probe_usage(entry: &MountEntry) -> PartitionProbe {
    match std::fs::metadata(&entry.mountpoint) {
        Ok(_) => PartitionProbe::Usage(UsageFigures {
            total: entry.reported_total,
            free: entry.reported_available,
            available: entry.reported_available,
        }),
        Err(err) => PartitionProbe::from_error(err),
    }
}

/// Builds per-partition records, dropping mounts the probe refuses and
/// zero-sized pseudo filesystems.
pub fn collect_partitions<I, P>(mounts: I, probe: P) -> Vec<PartitionSnapshot>
where
    I: IntoIterator<Item = MountEntry>,
    P: Fn(&MountEntry) -> PartitionProbe,
{
    let mut partitions = Vec::new();
    for entry in mounts {
        let usage = match probe(&entry) {
            PartitionProbe::Usage(usage) => usage,
            PartitionProbe::Denied => continue,
            PartitionProbe::Unavailable(err) => {
                debug!("skipping {}: {}", entry.mountpoint.display(), err);
                continue;
            }
        };
        if usage.total == 0 {
            continue;
        }
        partitions.push(partition_snapshot(&entry, usage));
    }
    partitions
}

fn partition_snapshot(entry: &MountEntry, usage: UsageFigures) -> PartitionSnapshot {
    let used = usage.total.saturating_sub(usage.free);
    let denominator = used.saturating_add(usage.available);
    let percent = if denominator > 0 {
        round_to(used as f64 / denominator as f64 * 100.0, 1)
    } else {
        0.0
    };
    PartitionSnapshot {
        device: entry.device.clone(),
        mountpoint: entry.mountpoint.to_string_lossy().to_string(),
        file_system: entry.file_system.clone(),
        total_bytes: usage.total,
        used_bytes: used,
        total_gb: whole_gib(usage.total),
        used_gb: whole_gib(used),
        percent,
    }
}

fn whole_gib(bytes: u64) -> u64 {
    (bytes as f64 / GIB).round() as u64
}

fn mounted_partitions() -> Vec<MountEntry> {
    let disks = Disks::new_with_refreshed_list();
    disks
        .list()
        .iter()
        .map(|disk| MountEntry {
            device: disk.name().to_string_lossy().to_string(),
            mountpoint: disk.mount_point().to_path_buf(),
            file_system: disk.file_system().to_string_lossy().to_string(),
            reported_total: disk.total_space(),
            reported_available: disk.available_space(),
        })
        .collect()
}

pub struct DiskSampler<S = ProcDiskstats> {
    counters: S,
    state: DiskRateState,
}

impl DiskSampler<ProcDiskstats> {
    pub fn new() -> Self {
        Self::with_source(ProcDiskstats)
    }
}

impl Default for DiskSampler<ProcDiskstats> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: DiskCounterSource> DiskSampler<S> {
    /// Takes a baseline reading immediately so the first sample already
    /// reports a rate.
    pub fn with_source(mut counters: S) -> Self {
        let baseline = counters.read();
        DiskSampler {
            counters,
            state: DiskRateState::new(baseline, Instant::now()),
        }
    }

    pub fn rates(&mut self) -> DiskRates {
        let current = self.counters.read();
        self.state.advance(current, Instant::now())
    }

    pub fn collect(&mut self) -> DiskSnapshot {
        let rates = self.rates();
        let partitions = collect_partitions(mounted_partitions(), probe_usage);
        DiskSnapshot {
            timestamp: Utc::now(),
            read_bytes_per_sec: rates.read_bytes_per_sec,
            write_bytes_per_sec: rates.write_bytes_per_sec,
            partitions,
        }
    }
}

impl<S: DiskCounterSource> Sampler for DiskSampler<S> {
    fn name(&self) -> &'static str {
        "disk"
    }

    fn sample(&mut self) -> MetricSnapshot {
        MetricSnapshot::Disk(self.collect())
    }
}
