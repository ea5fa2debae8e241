use std::collections::BTreeMap;

use bytesize::ByteSize;
use chrono::{DateTime, Local, Utc};
use log::warn;
use serde::{Deserialize, Serialize};

use super::buffer::{RollingBuffer, SeriesPoint, DEFAULT_CAPACITY};
use super::normalize::SeriesUpdate;
use crate::error::TelemetryError;

/// Headroom applied above the largest observed value on dynamic axes.
const DYNAMIC_HEADROOM: f64 = 1.2;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeriesUnit {
    Percent,
    BytesPerSecond,
}

impl SeriesUnit {
    pub fn format(&self, value: f64) -> String {
        match self {
            SeriesUnit::Percent => format!("{:.1}%", value),
            SeriesUnit::BytesPerSecond => format!("{}/s", ByteSize::b(value.max(0.0) as u64)),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum AxisScale {
    Fixed { min: f64, max: f64 },
    Dynamic,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SeriesSpec {
    pub id: String,
    pub unit: SeriesUnit,
    pub scale: AxisScale,
}

impl SeriesSpec {
    pub fn percent(id: &str) -> Self {
        SeriesSpec {
            id: id.to_string(),
            unit: SeriesUnit::Percent,
            scale: AxisScale::Fixed {
                min: 0.0,
                max: 100.0,
            },
        }
    }

    pub fn rate(id: &str) -> Self {
        SeriesSpec {
            id: id.to_string(),
            unit: SeriesUnit::BytesPerSecond,
            scale: AxisScale::Dynamic,
        }
    }
}

/// What a cursor over a graph resolves to.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Inspection {
    pub index: usize,
    pub value: f64,
    pub display: String,
    pub time_label: String,
}

struct TrackedSeries {
    spec: SeriesSpec,
    buffer: RollingBuffer,
}

/// Owns one rolling buffer per registered series.
pub struct RollingBufferManager {
    capacity: usize,
    series: BTreeMap<String, TrackedSeries>,
}

impl RollingBufferManager {
    pub fn new(capacity: usize) -> Self {
        RollingBufferManager {
            capacity: capacity.max(1),
            series: BTreeMap::new(),
        }
    }

    pub fn with_series<I>(capacity: usize, specs: I, at: DateTime<Utc>) -> Self
    where
        I: IntoIterator<Item = SeriesSpec>,
    {
        let mut manager = Self::new(capacity);
        for spec in specs {
            manager.register(spec, at);
        }
        manager
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Registers a series with a pre-filled buffer. Re-registering an
    /// existing id keeps its history and only updates the spec.
    pub fn register(&mut self, spec: SeriesSpec, at: DateTime<Utc>) {
        if let Some(tracked) = self.series.get_mut(&spec.id) {
            tracked.spec = spec;
            return;
        }
        let buffer = RollingBuffer::prefilled(self.capacity, at);
        self.series
            .insert(spec.id.clone(), TrackedSeries { spec, buffer });
    }

    pub fn series_ids(&self) -> impl Iterator<Item = &str> {
        self.series.keys().map(String::as_str)
    }

    pub fn spec(&self, series_id: &str) -> Option<&SeriesSpec> {
        self.series.get(series_id).map(|t| &t.spec)
    }

    pub fn buffer(&self, series_id: &str) -> Option<&RollingBuffer> {
        self.series.get(series_id).map(|t| &t.buffer)
    }

    pub fn append(&mut self, series_id: &str, point: SeriesPoint) -> Result<(), TelemetryError> {
        let tracked = self
            .series
            .get_mut(series_id)
            .ok_or_else(|| TelemetryError::UnknownSeries(series_id.to_string()))?;
        tracked.buffer.push(point);
        Ok(())
    }

    /// Appends a batch of normalized updates; returns how many landed.
    pub fn apply(&mut self, updates: &[SeriesUpdate]) -> usize {
        let mut applied = 0;
        for update in updates {
            match self.append(update.series_id, update.point) {
                Ok(()) => applied += 1,
                Err(err) => warn!("dropping update: {}", err),
            }
        }
        applied
    }

    pub fn snapshot(&self, series_id: &str) -> Option<Vec<SeriesPoint>> {
        self.buffer(series_id).map(RollingBuffer::to_vec)
    }

    pub fn nearest(&self, series_id: &str, query_x: f64) -> Option<usize> {
        self.buffer(series_id)?.nearest(query_x)
    }

    /// Axis bounds: the declared ones for fixed series, otherwise zero (or
    /// the lowest value if negative) up to 1.2x the highest, never below 1.
    pub fn range(&self, series_id: &str) -> Option<(f64, f64)> {
        let tracked = self.series.get(series_id)?;
        match tracked.spec.scale {
            AxisScale::Fixed { min, max } => Some((min, max)),
            AxisScale::Dynamic => {
                let (lo, hi) = tracked.buffer.observed_bounds().unwrap_or((0.0, 0.0));
                Some((lo.min(0.0), (hi * DYNAMIC_HEADROOM).max(1.0)))
            }
        }
    }

    pub fn latest(&self, series_id: &str) -> Option<SeriesPoint> {
        self.buffer(series_id)?.latest().copied()
    }

    pub fn display(&self, series_id: &str) -> Option<String> {
        let tracked = self.series.get(series_id)?;
        let point = tracked.buffer.latest()?;
        Some(tracked.spec.unit.format(point.value))
    }

    pub fn inspect(&self, series_id: &str, query_x: f64) -> Option<Inspection> {
        let tracked = self.series.get(series_id)?;
        let index = tracked.buffer.nearest(query_x)?;
        let point = tracked.buffer.get(index)?;
        Some(Inspection {
            index,
            value: point.value,
            display: tracked.spec.unit.format(point.value),
            time_label: point
                .timestamp
                .with_timezone(&Local)
                .format("%H:%M:%S")
                .to_string(),
        })
    }
}

impl Default for RollingBufferManager {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
