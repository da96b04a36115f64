use std::time::Duration;
use sweep_core::RunStats;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("cannot start {program}: {source}")]
pub struct LaunchError {
    pub program: String,
    #[source]
    pub source: std::io::Error,
}

/// Why a single attempt produced no usable measurement. None of these stop
/// the matrix.
#[derive(Debug, Error)]
pub enum AttemptError {
    #[error(transparent)]
    Launch(#[from] LaunchError),
    #[error("timed out after {deadline:?} waiting for a measurement")]
    Timeout { deadline: Duration },
    #[error(
        "unable to get good data: min={} max={} avg={} rate={}",
        .stats.min_time,
        .stats.max_time,
        .stats.avg_time,
        .stats.rate
    )]
    InvalidMeasurement { stats: RunStats },
    #[error("monitor failed: {0}")]
    Monitor(String),
}

impl AttemptError {
    pub fn kind(&self) -> &'static str {
        match self {
            AttemptError::Launch(_) => "launch_error",
            AttemptError::Timeout { .. } => "timeout",
            AttemptError::InvalidMeasurement { .. } => "invalid_measurement",
            AttemptError::Monitor(_) => "monitor_error",
        }
    }
}
