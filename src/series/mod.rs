mod buffer;
mod manager;
mod normalize;

pub use buffer::{nearest_index, RollingBuffer, SeriesPoint, DEFAULT_CAPACITY};
pub use manager::{AxisScale, Inspection, RollingBufferManager, SeriesSpec, SeriesUnit};
pub use normalize::{
    normalize, tracked_series, SeriesUpdate, CPU_TOTAL_PERCENT, DISK0_USAGE_PERCENT,
    DISK_READ_RATE, DISK_WRITE_RATE, GPU0_MEM_UTIL_PERCENT, GPU0_UTIL_PERCENT, RAM_PERCENT,
};
