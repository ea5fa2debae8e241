//! Typed errors at the crate's API edges.
//!
//! None of these are fatal: samplers turn them into "zero instances" and
//! the settings store logs them and carries on.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("unknown series: {0}")]
    UnknownSeries(String),

    #[error("failed to build telemetry runtime: {0}")]
    Runtime(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum GpuError {
    /// No compatible driver or device context could be acquired.
    #[error("GPU device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("GPU query failed: {0}")]
    Query(String),
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("no home directory to store settings in")]
    NoHomeDir,

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to encode settings: {0}")]
    Encode(#[from] serde_json::Error),
}
