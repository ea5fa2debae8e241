#![cfg(test)]

use super::*;
use crate::error::GpuError;
use crate::series::{
    tracked_series, RollingBufferManager, SeriesSpec, CPU_TOTAL_PERCENT, GPU0_UTIL_PERCENT,
    RAM_PERCENT,
};
use chrono::Utc;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::{sleep, timeout};

const GIB: u64 = 1024 * 1024 * 1024;

#[test]
fn disk_rate_is_bytes_over_elapsed_seconds() {
    assert_eq!(byte_rate(1000, 3000, 2.0), 1000.0);
    assert_eq!(byte_rate(1000, 3000, 0.0), 0.0);
    assert_eq!(byte_rate(5000, 3000, 1.0), 0.0);
}

#[test]
fn disk_rate_state_advances_even_without_elapsed_time() {
    let t0 = Instant::now();
    let first = IoCounters {
        read_bytes: 1000,
        write_bytes: 500,
    };
    let mut state = DiskRateState::new(Some(first), t0);

    let second = IoCounters {
        read_bytes: 3000,
        write_bytes: 4500,
    };
    let rates = state.advance(Some(second), t0 + Duration::from_secs(2));
    assert_eq!(rates.read_bytes_per_sec, 1000.0);
    assert_eq!(rates.write_bytes_per_sec, 2000.0);

    let third = IoCounters {
        read_bytes: 9000,
        write_bytes: 9000,
    };
    let rates = state.advance(Some(third), t0 + Duration::from_secs(2));
    assert_eq!(rates, DiskRates::default());
    assert_eq!(state.last_counters(), Some(third));
}

#[test]
fn disk_rate_state_does_not_spike_after_missing_reading() {
    let t0 = Instant::now();
    let mut state = DiskRateState::new(
        Some(IoCounters {
            read_bytes: 10,
            write_bytes: 10,
        }),
        t0,
    );
    let rates = state.advance(None, t0 + Duration::from_secs(1));
    assert_eq!(rates, DiskRates::default());
    let rates = state.advance(
        Some(IoCounters {
            read_bytes: 1 << 40,
            write_bytes: 1 << 40,
        }),
        t0 + Duration::from_secs(2),
    );
    assert_eq!(rates, DiskRates::default());
}

struct ScriptedCounters {
    readings: Vec<IoCounters>,
    reads: Arc<AtomicUsize>,
}

impl DiskCounterSource for ScriptedCounters {
    fn read(&mut self) -> Option<IoCounters> {
        let n = self.reads.fetch_add(1, Ordering::SeqCst);
        self.readings.get(n).copied()
    }
}

#[test]
fn disk_sampler_owns_independent_state() {
    let reads = Arc::new(AtomicUsize::new(0));
    let mut sampler = DiskSampler::with_source(ScriptedCounters {
        readings: vec![IoCounters::default(), IoCounters::default()],
        reads: Arc::clone(&reads),
    });
    assert_eq!(reads.load(Ordering::SeqCst), 1, "baseline taken at construction");

    let rates = sampler.rates();
    assert_eq!(rates, DiskRates::default());
    assert_eq!(reads.load(Ordering::SeqCst), 2);

    let other = DiskSampler::with_source(ScriptedCounters {
        readings: vec![],
        reads: Arc::new(AtomicUsize::new(0)),
    });
    drop(other);
    assert_eq!(reads.load(Ordering::SeqCst), 2);
}

fn mount(path: &str) -> MountEntry {
    MountEntry {
        device: format!("dev{}", path.replace('/', "_")),
        mountpoint: PathBuf::from(path),
        file_system: "ext4".to_string(),
        reported_total: 0,
        reported_available: 0,
    }
}

#[test]
fn partitions_denying_access_are_skipped() {
    let mounts = vec![mount("/"), mount("/secret"), mount("/broken"), mount("/proc")];
    let partitions = collect_partitions(mounts, |entry| {
        match entry.mountpoint.to_str().unwrap() {
            "/" => PartitionProbe::Usage(UsageFigures {
                total: 100 * GIB,
                free: 40 * GIB,
                available: 35 * GIB,
            }),
            "/secret" => PartitionProbe::Denied,
            "/broken" => PartitionProbe::Unavailable(io::Error::new(io::ErrorKind::Other, "gone")),
            _ => PartitionProbe::Usage(UsageFigures {
                total: 0,
                free: 0,
                available: 0,
            }),
        }
    });

    assert_eq!(partitions.len(), 1);
    let root = &partitions[0];
    assert_eq!(root.mountpoint, "/");
    assert_eq!(root.total_gb, 100);
    assert_eq!(root.used_gb, 60);
    assert_eq!(root.used_bytes, 60 * GIB);
    // used / (used + available), as df reports it
    assert_eq!(root.percent, 63.2);
}

#[test]
fn ram_totals_are_rounded_independently() {
    let total = 4 * GIB + GIB / 2;
    assert_eq!(exact_gib(total), 4.50);
    assert_eq!(display_gib(total), 5);
    assert_eq!(exact_gib(8 * GIB), 8.0);
    assert_eq!(display_gib(8 * GIB), 8);
    assert_eq!(display_gib(8 * GIB + 1), 9);

    let snapshot = RamSnapshot::from_reading(
        MemoryReading {
            total,
            used: 2 * GIB,
            available: 2 * GIB + GIB / 4,
            swap_total: 0,
            swap_used: 0,
        },
        Utc::now(),
    );
    assert_eq!(snapshot.total_ram_gb, 4.5);
    assert_eq!(snapshot.total_ram_round_gb, 5);
    assert_eq!(snapshot.used_ram_gb, 2.0);
    assert_eq!(snapshot.available_ram_gb, 2.25);
    assert_eq!(snapshot.percent, 50.0);
    assert_eq!(snapshot.swap_percent, 0.0);
}

#[derive(Clone, Copy)]
enum Script {
    Unavailable,
    Devices(u32),
    CountFails,
    SecondDeviceFails,
}

struct FakeBackend {
    script: Script,
    opened: Arc<AtomicUsize>,
    released: Arc<AtomicUsize>,
}

impl FakeBackend {
    fn new(script: Script) -> Self {
        FakeBackend {
            script,
            opened: Arc::new(AtomicUsize::new(0)),
            released: Arc::new(AtomicUsize::new(0)),
        }
    }
}

struct FakeContext {
    script: Script,
    released: Arc<AtomicUsize>,
}

impl Drop for FakeContext {
    fn drop(&mut self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

impl GpuBackend for FakeBackend {
    fn open(&self) -> Result<Box<dyn GpuContext>, GpuError> {
        if let Script::Unavailable = self.script {
            return Err(GpuError::DeviceUnavailable("no driver".to_string()));
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeContext {
            script: self.script,
            released: Arc::clone(&self.released),
        }))
    }
}

impl GpuContext for FakeContext {
    fn device_count(&self) -> Result<u32, GpuError> {
        match self.script {
            Script::Devices(n) => Ok(n),
            Script::SecondDeviceFails => Ok(3),
            Script::CountFails => Err(GpuError::Query("count".to_string())),
            Script::Unavailable => Ok(0),
        }
    }

    fn device(&self, index: u32) -> Result<GpuDeviceSnapshot, GpuError> {
        if matches!(self.script, Script::SecondDeviceFails) && index == 1 {
            return Err(GpuError::Query("lost device".to_string()));
        }
        Ok(GpuDeviceSnapshot {
            index,
            name: "Fake GPU".to_string(),
            uuid: format!("GPU-{}", index),
            util_percent: Some(40 + index),
            mem_util_percent: Some(5),
            mem_total_mb: Some(4096),
            mem_used_mb: Some(512),
            mem_free_mb: Some(3584),
            temperature_c: Some(50),
            core_clock_mhz: None,
            mem_clock_mhz: None,
            power_usage_w: Some(30.0),
            power_limit_w: Some(120.0),
            pcie_rx_kbps: None,
            pcie_tx_kbps: None,
        })
    }
}

#[test]
fn gpu_with_zero_devices_reports_empty_snapshot() {
    let backend = FakeBackend::new(Script::Devices(0));
    let released = Arc::clone(&backend.released);
    let snapshot = GpuSampler::with_backend(backend).collect();
    assert_eq!(snapshot.device_count, 0);
    assert!(snapshot.devices.is_empty());
    assert_eq!(released.load(Ordering::SeqCst), 1);
}

#[test]
fn gpu_without_driver_is_zero_devices_not_an_error() {
    let sampler = GpuSampler::with_backend(FakeBackend::new(Script::Unavailable));
    assert!(matches!(
        sampler.try_collect(),
        Err(GpuError::DeviceUnavailable(_))
    ));
    let snapshot = sampler.collect();
    assert_eq!(snapshot.device_count, 0);
    assert!(snapshot.devices.is_empty());
}

#[test]
fn gpu_context_released_when_enumeration_fails() {
    let backend = FakeBackend::new(Script::CountFails);
    let opened = Arc::clone(&backend.opened);
    let released = Arc::clone(&backend.released);
    let sampler = GpuSampler::with_backend(backend);

    assert!(sampler.try_collect().is_err());
    let snapshot = sampler.collect();
    assert!(snapshot.devices.is_empty());
    assert_eq!(opened.load(Ordering::SeqCst), 2);
    assert_eq!(released.load(Ordering::SeqCst), 2);
}

#[test]
fn gpu_device_failure_skips_only_that_device() {
    let backend = FakeBackend::new(Script::SecondDeviceFails);
    let released = Arc::clone(&backend.released);
    let snapshot = GpuSampler::with_backend(backend).collect();
    assert_eq!(snapshot.device_count, 3);
    let indices: Vec<u32> = snapshot.devices.iter().map(|d| d.index).collect();
    assert_eq!(indices, vec![0, 2]);
    assert_eq!(released.load(Ordering::SeqCst), 1);
}

struct FixedCpu {
    percent: f32,
}

impl Sampler for FixedCpu {
    fn name(&self) -> &'static str {
        "fake-cpu"
    }

    fn sample(&mut self) -> MetricSnapshot {
        MetricSnapshot::Cpu(CpuSnapshot {
            timestamp: Utc::now(),
            total_percent: self.percent,
            per_core_percent: vec![self.percent; 2],
            thread_count: 2,
            core_count: Some(1),
            frequency_mhz: None,
            times_per_core: Vec::new(),
            stats: None,
        })
    }
}

struct CountingRam {
    calls: Arc<AtomicUsize>,
}

impl Sampler for CountingRam {
    fn name(&self) -> &'static str {
        "fake-ram"
    }

    fn sample(&mut self) -> MetricSnapshot {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) as u64;
        MetricSnapshot::Ram(RamSnapshot::from_reading(
            MemoryReading {
                total: 100,
                used: n,
                available: 100 - n.min(100),
                swap_total: 0,
                swap_used: 0,
            },
            Utc::now(),
        ))
    }
}

fn fake_set(calls: &Arc<AtomicUsize>) -> SamplerSet {
    let samplers: Vec<Box<dyn Sampler>> = vec![
        Box::new(FixedCpu { percent: 37.5 }),
        Box::new(CountingRam {
            calls: Arc::clone(calls),
        }),
        Box::new(GpuSampler::with_backend(FakeBackend::new(Script::Unavailable))),
    ];
    SamplerSet::new(samplers)
}

#[tokio::test]
async fn scheduler_fills_buffers_each_cycle() {
    let calls = Arc::new(AtomicUsize::new(0));
    let buffers = RollingBufferManager::with_series(10, tracked_series(), Utc::now());
    let sampler =
        TelemetrySampler::spawn_with(fake_set(&calls), buffers, Duration::from_millis(100))
            .expect("spawn sampler");
    sampler.wait_until_ready().await;

    timeout(Duration::from_secs(5), async {
        while sampler.cycles_completed() < 3 {
            sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("sampler did not cycle in time");

    let latest = sampler.latest_value(CPU_TOTAL_PERCENT).await.unwrap();
    assert_eq!(latest.value, 37.5);
    assert_eq!(sampler.display(CPU_TOTAL_PERCENT).await.as_deref(), Some("37.5%"));

    let cpu_series = sampler.series(CPU_TOTAL_PERCENT).await.unwrap();
    assert_eq!(cpu_series.len(), 10);
    let ram_latest = sampler.latest_value(RAM_PERCENT).await.unwrap();
    assert!(ram_latest.value > 0.0);

    // no GPU: the series still holds only its placeholders
    let gpu_series = sampler.series(GPU0_UTIL_PERCENT).await.unwrap();
    assert!(gpu_series.iter().all(|p| p.value == 0.0));
    match sampler.latest_snapshot("gpu").await {
        Some(MetricSnapshot::Gpu(gpu)) => assert_eq!(gpu.device_count, 0),
        other => panic!("unexpected gpu snapshot: {:?}", other),
    }

    sampler.shutdown().await;
}

#[tokio::test]
async fn shutdown_stops_future_cycles() {
    let calls = Arc::new(AtomicUsize::new(0));
    let buffers =
        RollingBufferManager::with_series(5, vec![SeriesSpec::percent(RAM_PERCENT)], Utc::now());
    let sampler =
        TelemetrySampler::spawn_with(fake_set(&calls), buffers, Duration::from_millis(100))
            .expect("spawn sampler");
    sampler.wait_until_ready().await;
    sampler.shutdown().await;

    assert_eq!(sampler.phase(), CyclePhase::Idle);
    let after_stop = calls.load(Ordering::SeqCst);
    sleep(Duration::from_millis(300)).await;
    assert_eq!(calls.load(Ordering::SeqCst), after_stop);
}

#[tokio::test]
async fn refresh_interval_is_clamped() {
    let calls = Arc::new(AtomicUsize::new(0));
    let sampler = TelemetrySampler::spawn_with(
        fake_set(&calls),
        RollingBufferManager::default(),
        Duration::from_millis(5),
    )
    .expect("spawn sampler");
    assert_eq!(sampler.refresh_interval(), Duration::from_millis(100));
    assert_eq!(
        sampler.set_refresh_interval(Duration::from_secs(60)),
        Duration::from_millis(10_000)
    );
    assert_eq!(sampler.refresh_interval(), Duration::from_millis(10_000));
    sampler.shutdown().await;
}

struct Boom;

impl Sampler for Boom {
    fn name(&self) -> &'static str {
        "boom"
    }

    fn sample(&mut self) -> MetricSnapshot {
        panic!("sensor went away");
    }
}

#[test]
fn panicking_sampler_is_left_out_of_the_cycle() {
    let calls = Arc::new(AtomicUsize::new(0));
    let samplers: Vec<Box<dyn Sampler>> = vec![
        Box::new(Boom),
        Box::new(CountingRam {
            calls: Arc::clone(&calls),
        }),
    ];
    let mut set = SamplerSet::new(samplers);

    let snapshots = set.sample_all();
    assert_eq!(snapshots.len(), 1);
    assert_eq!(snapshots[0].kind(), "ram");
    assert_eq!(set.sample_all().len(), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn scheduler_keeps_running_when_a_sampler_panics() {
    let calls = Arc::new(AtomicUsize::new(0));
    let samplers: Vec<Box<dyn Sampler>> = vec![
        Box::new(CountingRam {
            calls: Arc::clone(&calls),
        }),
        Box::new(Boom),
    ];
    let buffers =
        RollingBufferManager::with_series(5, vec![SeriesSpec::percent(RAM_PERCENT)], Utc::now());
    let sampler = TelemetrySampler::spawn_with(
        SamplerSet::new(samplers),
        buffers,
        Duration::from_millis(100),
    )
    .expect("spawn sampler");

    timeout(Duration::from_secs(2), sampler.wait_until_ready())
        .await
        .expect("first cycle never completed");
    timeout(Duration::from_secs(5), async {
        while sampler.cycles_completed() < 3 {
            sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("sampler stopped cycling");

    assert!(calls.load(Ordering::SeqCst) >= 3);
    assert!(sampler.latest_snapshot("ram").await.is_some());
    sampler.shutdown().await;
}

/// Blocks for `delay` and records how many calls were in flight at once.
struct SlowSampler {
    delay: Duration,
    active: Arc<AtomicUsize>,
    max_active: Arc<AtomicUsize>,
    calls: Arc<AtomicUsize>,
}

impl SlowSampler {
    fn new(delay: Duration) -> Self {
        SlowSampler {
            delay,
            active: Arc::new(AtomicUsize::new(0)),
            max_active: Arc::new(AtomicUsize::new(0)),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl Sampler for SlowSampler {
    fn name(&self) -> &'static str {
        "slow"
    }

    fn sample(&mut self) -> MetricSnapshot {
        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now_active, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.active.fetch_sub(1, Ordering::SeqCst);
        MetricSnapshot::Ram(RamSnapshot::from_reading(
            MemoryReading {
                total: 100,
                used: 50,
                available: 50,
                swap_total: 0,
                swap_used: 0,
            },
            Utc::now(),
        ))
    }
}

fn spawn_single(sampler: SlowSampler, refresh: Duration) -> TelemetrySampler {
    let samplers: Vec<Box<dyn Sampler>> = vec![Box::new(sampler)];
    TelemetrySampler::spawn_with(
        SamplerSet::new(samplers),
        RollingBufferManager::default(),
        refresh,
    )
    .expect("spawn sampler")
}

async fn wait_for_cycles(sampler: &TelemetrySampler, n: u64) {
    timeout(Duration::from_secs(10), async {
        while sampler.cycles_completed() < n {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("sampler did not cycle in time");
}

#[tokio::test]
async fn cycles_never_overlap_when_sampling_outlasts_the_interval() {
    let slow = SlowSampler::new(Duration::from_millis(250));
    let max_active = Arc::clone(&slow.max_active);
    let calls = Arc::clone(&slow.calls);
    let sampler = spawn_single(slow, Duration::from_millis(100));

    wait_for_cycles(&sampler, 3).await;
    sampler.shutdown().await;

    assert_eq!(max_active.load(Ordering::SeqCst), 1);
    assert_eq!(calls.load(Ordering::SeqCst) as u64, sampler.cycles_completed());
}

#[tokio::test]
async fn shutdown_waits_for_the_cycle_in_flight() {
    let slow = SlowSampler::new(Duration::from_millis(300));
    let calls = Arc::clone(&slow.calls);
    let sampler = spawn_single(slow, Duration::from_millis(100));

    wait_for_cycles(&sampler, 1).await;
    timeout(Duration::from_secs(5), async {
        while sampler.phase() != CyclePhase::Sampling {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("never saw a sampling phase");

    let before = sampler.cycles_completed();
    sampler.shutdown().await;

    assert_eq!(sampler.cycles_completed(), before + 1);
    assert_eq!(sampler.phase(), CyclePhase::Idle);
    assert_eq!(calls.load(Ordering::SeqCst) as u64, before + 1);
}

#[tokio::test]
async fn interval_change_reaches_the_running_loop() {
    let slow = SlowSampler::new(Duration::from_millis(1));
    let sampler = spawn_single(slow, Duration::from_secs(10));

    wait_for_cycles(&sampler, 1).await;
    sleep(Duration::from_millis(300)).await;
    assert_eq!(sampler.cycles_completed(), 1);

    sampler.set_refresh_interval(Duration::from_millis(100));
    wait_for_cycles(&sampler, 4).await;

    sampler.set_refresh_interval(Duration::from_secs(10));
    let slowed_at = sampler.cycles_completed();
    sleep(Duration::from_millis(500)).await;
    // at most the cycle that was already due when the change landed
    assert!(sampler.cycles_completed() <= slowed_at + 1);

    sampler.shutdown().await;
}
