pub mod config;
pub mod error;
pub mod metrics;
pub mod series;

pub use config::{Settings, SettingsStore};
pub use error::{GpuError, SettingsError, TelemetryError};
pub use metrics::{MetricSnapshot, Sampler, SamplerSet, TelemetrySampler};
pub use series::{RollingBuffer, RollingBufferManager, SeriesPoint, SeriesSpec};
