use chrono::Utc;
use log::{debug, warn};

use super::types::{GpuDeviceSnapshot, GpuSnapshot, MetricSnapshot, Sampler};
use crate::error::GpuError;

/// An acquired driver session. Dropping it releases the session, so a
/// context must never outlive a single sample call.
pub trait GpuContext {
    fn device_count(&self) -> Result<u32, GpuError>;
    fn device(&self, index: u32) -> Result<GpuDeviceSnapshot, GpuError>;
}

pub trait GpuBackend: Send {
    fn open(&self) -> Result<Box<dyn GpuContext>, GpuError>;
}

#[cfg(feature = "nvml")]
mod nvml {
    use nvml_wrapper::enum_wrappers::device::{Clock, PcieUtilCounter, TemperatureSensor};
    use nvml_wrapper::error::NvmlError;
    use nvml_wrapper::Nvml;

    use super::{GpuBackend, GpuContext};
    use crate::error::GpuError;
    use crate::metrics::types::GpuDeviceSnapshot;

    const MIB: u64 = 1024 * 1024;

    fn query_error(err: NvmlError) -> GpuError {
        GpuError::Query(err.to_string())
    }

    fn milliwatts_to_watts(mw: u32) -> f64 {
        mw as f64 / 1000.0
    }

    /// NVIDIA devices through NVML. The library is loaded at open time, so
    /// hosts without the driver simply report `DeviceUnavailable`.
    #[derive(Debug, Default)]
    pub struct NvmlBackend;

    struct NvmlContext {
        // nvmlShutdown runs when this is dropped.
        nvml: Nvml,
    }

    impl GpuBackend for NvmlBackend {
        fn open(&self) -> Result<Box<dyn GpuContext>, GpuError> {
            let nvml = Nvml::init().map_err(|err| GpuError::DeviceUnavailable(err.to_string()))?;
            Ok(Box::new(NvmlContext { nvml }))
        }
    }

    impl GpuContext for NvmlContext {
        fn device_count(&self) -> Result<u32, GpuError> {
            self.nvml.device_count().map_err(query_error)
        }

        fn device(&self, index: u32) -> Result<GpuDeviceSnapshot, GpuError> {
            let device = self.nvml.device_by_index(index).map_err(query_error)?;
            let utilization = device.utilization_rates().ok();
            let memory = device.memory_info().ok();

            Ok(GpuDeviceSnapshot {
                index,
                name: device
                    .name()
                    .unwrap_or_else(|_| "Unknown NVIDIA GPU".to_string()),
                uuid: device.uuid().unwrap_or_default(),
                util_percent: utilization.as_ref().map(|u| u.gpu),
                mem_util_percent: utilization.as_ref().map(|u| u.memory),
                mem_total_mb: memory.as_ref().map(|m| m.total / MIB),
                mem_used_mb: memory.as_ref().map(|m| m.used / MIB),
                mem_free_mb: memory.as_ref().map(|m| m.free / MIB),
                temperature_c: device.temperature(TemperatureSensor::Gpu).ok(),
                core_clock_mhz: device.clock_info(Clock::Graphics).ok(),
                mem_clock_mhz: device.clock_info(Clock::Memory).ok(),
                power_usage_w: device.power_usage().ok().map(milliwatts_to_watts),
                power_limit_w: device
                    .enforced_power_limit()
                    .ok()
                    .map(milliwatts_to_watts),
                pcie_rx_kbps: device.pcie_throughput(PcieUtilCounter::Receive).ok(),
                pcie_tx_kbps: device.pcie_throughput(PcieUtilCounter::Send).ok(),
            })
        }
    }
}

#[cfg(feature = "nvml")]
pub use nvml::NvmlBackend;

/// Stand-in for builds without any GPU driver support.
#[derive(Debug, Default)]
pub struct NoGpuBackend;

impl GpuBackend for NoGpuBackend {
    fn open(&self) -> Result<Box<dyn GpuContext>, GpuError> {
        Err(GpuError::DeviceUnavailable(
            "built without GPU driver support".to_string(),
        ))
    }
}

#[cfg(feature = "nvml")]
pub type DefaultGpuBackend = NvmlBackend;
#[cfg(not(feature = "nvml"))]
pub type DefaultGpuBackend = NoGpuBackend;

pub struct GpuSampler<B = DefaultGpuBackend> {
    backend: B,
}

impl GpuSampler<DefaultGpuBackend> {
    pub fn new() -> Self {
        GpuSampler {
            backend: DefaultGpuBackend::default(),
        }
    }
}

impl Default for GpuSampler<DefaultGpuBackend> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: GpuBackend> GpuSampler<B> {
    pub fn with_backend(backend: B) -> Self {
        GpuSampler { backend }
    }

    /// Opens a context, enumerates every device, and releases the context
    /// on every path out of this function.
    pub fn try_collect(&self) -> Result<GpuSnapshot, GpuError> {
        let context = self.backend.open()?;
        let device_count = context.device_count()?;
        let timestamp = Utc::now();

        let mut devices = Vec::with_capacity(device_count as usize);
        for index in 0..device_count {
            match context.device(index) {
                Ok(device) => devices.push(device),
                Err(err) => warn!("skipping gpu {}: {}", index, err),
            }
        }

        Ok(GpuSnapshot {
            timestamp,
            device_count,
            devices,
        })
    }

    /// Like [`try_collect`](Self::try_collect), but a missing driver or a
    /// failed enumeration yields zero devices instead of an error.
    pub fn collect(&self) -> GpuSnapshot {
        match self.try_collect() {
            Ok(snapshot) => snapshot,
            Err(GpuError::DeviceUnavailable(reason)) => {
                debug!("no gpu: {}", reason);
                GpuSnapshot::empty(Utc::now())
            }
            Err(err) => {
                warn!("gpu sampler error: {}", err);
                GpuSnapshot::empty(Utc::now())
            }
        }
    }
}

impl<B: GpuBackend> Sampler for GpuSampler<B> {
    fn name(&self) -> &'static str {
        "gpu"
    }

    fn sample(&mut self) -> MetricSnapshot {
        MetricSnapshot::Gpu(self.collect())
    }
}
