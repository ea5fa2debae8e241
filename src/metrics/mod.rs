mod cpu;
mod disk;
mod gpu;
mod memory;
mod procfs;
mod sampler;
#[cfg(test)]
mod tests;
mod types;

pub use cpu::{CpuSampler, CPU_MEASURE_WINDOW};
pub use disk::{
    byte_rate, collect_partitions, probe_usage, DiskCounterSource, DiskRateState, DiskRates,
    DiskSampler, MountEntry, PartitionProbe, ProcDiskstats, UsageFigures,
};
#[cfg(feature = "nvml")]
pub use gpu::NvmlBackend;
pub use gpu::{DefaultGpuBackend, GpuBackend, GpuContext, GpuSampler, NoGpuBackend};
pub use memory::{display_gib, exact_gib, MemoryReading, RamSampler};
pub use procfs::{parse_diskstats, parse_proc_stat, IoCounters, ProcStat};
pub use sampler::{
    CyclePhase, SamplerSet, TelemetrySampler, TelemetrySamplerHandle, TelemetryState,
    PRESENTATION_REFRESH,
};
pub use types::{
    CpuSnapshot, CpuStats, CpuTimes, DiskSnapshot, GpuDeviceSnapshot, GpuSnapshot,
    MetricSnapshot, PartitionSnapshot, RamSnapshot, Sampler,
};
