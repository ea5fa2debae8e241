use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use log::{debug, error, warn};
use tokio::select;
use tokio::sync::{watch, Notify, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::cpu::CpuSampler;
use super::disk::DiskSampler;
use super::gpu::GpuSampler;
use super::memory::RamSampler;
use super::types::{MetricSnapshot, Sampler};
use crate::config::clamp_refresh_interval;
use crate::error::TelemetryError;
use crate::series::{
    normalize, tracked_series, Inspection, RollingBufferManager, SeriesPoint, SeriesUpdate,
    DEFAULT_CAPACITY,
};

/// Cadence of the cursor-inspection redraw. Presentation only; sampling
/// never runs on it.
pub const PRESENTATION_REFRESH: Duration = Duration::from_millis(50);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum CyclePhase {
    Idle = 0,
    Sampling = 1,
    Updating = 2,
}

impl CyclePhase {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => CyclePhase::Sampling,
            2 => CyclePhase::Updating,
            _ => CyclePhase::Idle,
        }
    }
}

/// The samplers driven by one scheduling loop, invoked in order.
pub struct SamplerSet {
    samplers: Vec<Box<dyn Sampler>>,
}

impl SamplerSet {
    pub fn new(samplers: Vec<Box<dyn Sampler>>) -> Self {
        SamplerSet { samplers }
    }

    pub fn hardware() -> Self {
        let samplers: Vec<Box<dyn Sampler>> = vec![
            Box::new(CpuSampler::new()),
            Box::new(RamSampler::new()),
            Box::new(DiskSampler::new()),
            Box::new(GpuSampler::new()),
        ];
        SamplerSet::new(samplers)
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.samplers.iter().map(|s| s.name()).collect()
    }

    /// One snapshot per sampler. A sampler that panics is logged and left
    /// out of this cycle; the others still report.
    pub fn sample_all(&mut self) -> Vec<MetricSnapshot> {
        let mut snapshots = Vec::with_capacity(self.samplers.len());
        for sampler in self.samplers.iter_mut() {
            match panic::catch_unwind(AssertUnwindSafe(|| sampler.sample())) {
                Ok(snapshot) => snapshots.push(snapshot),
                Err(payload) => warn!(
                    "{} sampler panicked: {}",
                    sampler.name(),
                    panic_message(payload.as_ref())
                ),
            }
        }
        snapshots
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg
    } else {
        "non-string panic payload"
    }
}

/// Everything the presentation layer reads: the series buffers and the
/// most recent raw snapshot per metric kind.
pub struct TelemetryState {
    pub buffers: RollingBufferManager,
    latest: BTreeMap<&'static str, MetricSnapshot>,
}

impl TelemetryState {
    pub fn new(buffers: RollingBufferManager) -> Self {
        TelemetryState {
            buffers,
            latest: BTreeMap::new(),
        }
    }

    pub fn latest_snapshot(&self, kind: &str) -> Option<&MetricSnapshot> {
        self.latest.get(kind)
    }

    /// Normalizes and stores one cycle's snapshots; returns the number of
    /// series points appended.
    pub fn apply_cycle(&mut self, snapshots: Vec<MetricSnapshot>) -> usize {
        let updates: Vec<SeriesUpdate> = snapshots.iter().flat_map(normalize).collect();
        let applied = self.buffers.apply(&updates);
        for snapshot in snapshots {
            self.latest.insert(snapshot.kind(), snapshot);
        }
        applied
    }
}

pub struct TelemetrySamplerHandle {
    state: Arc<RwLock<TelemetryState>>,
    phase: Arc<AtomicU8>,
    cycles: Arc<AtomicU64>,
    ready: Arc<AtomicBool>,
    notify_ready: Arc<Notify>,
    interval_tx: watch::Sender<Duration>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
    _runtime: Option<Arc<tokio::runtime::Runtime>>,
}

impl TelemetrySamplerHandle {
    /// Starts sampling the local hardware into the default tracked series.
    pub fn spawn(refresh: Duration) -> Result<Self, TelemetryError> {
        let buffers = RollingBufferManager::with_series(
            DEFAULT_CAPACITY,
            tracked_series(),
            chrono::Utc::now(),
        );
        Self::spawn_with(SamplerSet::hardware(), buffers, refresh)
    }

    pub fn spawn_with(
        samplers: SamplerSet,
        buffers: RollingBufferManager,
        refresh: Duration,
    ) -> Result<Self, TelemetryError> {
        let state = Arc::new(RwLock::new(TelemetryState::new(buffers)));
        let phase = Arc::new(AtomicU8::new(CyclePhase::Idle as u8));
        let cycles = Arc::new(AtomicU64::new(0));
        let ready = Arc::new(AtomicBool::new(false));
        let notify_ready = Arc::new(Notify::new());
        let cancel = CancellationToken::new();
        let (interval_tx, interval_rx) = watch::channel(clamp_refresh_interval(refresh));

        let inner = Arc::new(SchedulerInner {
            state: Arc::clone(&state),
            phase: Arc::clone(&phase),
            cycles: Arc::clone(&cycles),
            ready: Arc::clone(&ready),
            notify_ready: Arc::clone(&notify_ready),
            cancel: cancel.clone(),
        });

        debug!("starting telemetry loop with samplers {:?}", samplers.names());
        let fut = SchedulerInner::run(inner, samplers, interval_rx);

        let (task, runtime_guard) = match tokio::runtime::Handle::try_current() {
            Ok(handle) => (handle.spawn(fut), None),
            Err(_) => {
                let runtime = Arc::new(
                    tokio::runtime::Builder::new_multi_thread()
                        .enable_all()
                        .build()?,
                );
                (runtime.spawn(fut), Some(runtime))
            }
        };

        Ok(TelemetrySamplerHandle {
            state,
            phase,
            cycles,
            ready,
            notify_ready,
            interval_tx,
            cancel,
            task: Mutex::new(Some(task)),
            _runtime: runtime_guard,
        })
    }

    /// Resolves once the first cycle has been applied.
    pub async fn wait_until_ready(&self) {
        let notified = self.notify_ready.notified();
        if self.ready.load(Ordering::SeqCst) {
            return;
        }
        notified.await;
    }

    pub fn phase(&self) -> CyclePhase {
        CyclePhase::from_u8(self.phase.load(Ordering::SeqCst))
    }

    pub fn cycles_completed(&self) -> u64 {
        self.cycles.load(Ordering::SeqCst)
    }

    pub fn refresh_interval(&self) -> Duration {
        *self.interval_tx.borrow()
    }

    /// Changes the data-refresh cadence; takes effect after the current
    /// cycle. Returns the interval actually applied.
    pub fn set_refresh_interval(&self, refresh: Duration) -> Duration {
        let clamped = clamp_refresh_interval(refresh);
        self.interval_tx.send_replace(clamped);
        clamped
    }

    pub async fn with_state<R>(&self, f: impl FnOnce(&TelemetryState) -> R) -> R {
        let guard = self.state.read().await;
        f(&guard)
    }

    pub async fn series(&self, series_id: &str) -> Option<Vec<SeriesPoint>> {
        self.state.read().await.buffers.snapshot(series_id)
    }

    pub async fn latest_value(&self, series_id: &str) -> Option<SeriesPoint> {
        self.state.read().await.buffers.latest(series_id)
    }

    pub async fn display(&self, series_id: &str) -> Option<String> {
        self.state.read().await.buffers.display(series_id)
    }

    pub async fn range(&self, series_id: &str) -> Option<(f64, f64)> {
        self.state.read().await.buffers.range(series_id)
    }

    pub async fn inspect(&self, series_id: &str, query_x: f64) -> Option<Inspection> {
        self.state.read().await.buffers.inspect(series_id, query_x)
    }

    pub async fn latest_snapshot(&self, kind: &str) -> Option<MetricSnapshot> {
        self.state.read().await.latest_snapshot(kind).cloned()
    }

    /// Stops future ticks. A cycle already running still completes.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Stops the loop and waits for any in-flight cycle to finish.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let task = match self.task.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(task) = task {
            if let Err(err) = task.await {
                warn!("telemetry loop ended abnormally: {}", err);
            }
        }
    }
}

struct SchedulerInner {
    state: Arc<RwLock<TelemetryState>>,
    phase: Arc<AtomicU8>,
    cycles: Arc<AtomicU64>,
    ready: Arc<AtomicBool>,
    notify_ready: Arc<Notify>,
    cancel: CancellationToken,
}

fn ticker(period: Duration, start: tokio::time::Instant) -> tokio::time::Interval {
    let mut ticker = interval_at(start, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}

impl SchedulerInner {
    async fn run(
        self: Arc<Self>,
        mut samplers: SamplerSet,
        mut interval_rx: watch::Receiver<Duration>,
    ) {
        let period = *interval_rx.borrow_and_update();
        let mut data_interval = ticker(period, tokio::time::Instant::now());

        loop {
            select! {
                biased;
                _ = self.cancel.cancelled() => {
                    break;
                }
                changed = interval_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let period = *interval_rx.borrow_and_update();
                    debug!("refresh interval set to {:?}", period);
                    data_interval = ticker(period, tokio::time::Instant::now() + period);
                }
                _ = data_interval.tick() => {
                    match self.run_cycle(samplers).await {
                        Some(returned) => samplers = returned,
                        None => break,
                    }
                }
            }
        }
        self.set_phase(CyclePhase::Idle);
    }

    /// Idle -> Sampling -> Updating -> Idle. Sampling runs on the blocking
    /// pool because the CPU sampler sleeps for its measurement window.
    async fn run_cycle(&self, mut samplers: SamplerSet) -> Option<SamplerSet> {
        let started = Instant::now();
        self.set_phase(CyclePhase::Sampling);

        let joined = tokio::task::spawn_blocking(move || {
            let snapshots = samplers.sample_all();
            (samplers, snapshots)
        })
        .await;
        let (samplers, snapshots) = match joined {
            Ok(result) => result,
            Err(err) => {
                error!("sampling cycle failed: {}", err);
                self.set_phase(CyclePhase::Idle);
                return None;
            }
        };

        self.set_phase(CyclePhase::Updating);
        let applied = self.state.write().await.apply_cycle(snapshots);
        let cycle = self.cycles.fetch_add(1, Ordering::SeqCst) + 1;

        if !self.ready.swap(true, Ordering::SeqCst) {
            self.notify_ready.notify_waiters();
        }
        self.set_phase(CyclePhase::Idle);
        debug!(
            "cycle {} applied {} points in {:?}",
            cycle,
            applied,
            started.elapsed()
        );
        Some(samplers)
    }

    fn set_phase(&self, phase: CyclePhase) {
        self.phase.store(phase as u8, Ordering::SeqCst);
    }
}

pub type TelemetrySampler = TelemetrySamplerHandle;

impl Drop for TelemetrySamplerHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
