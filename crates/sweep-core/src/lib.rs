mod config;
pub mod matrix;
mod plan;
mod stats;

pub use config::{AppMode, TestConfig};
pub use matrix::{MatrixError, SweepField, TopologyPin};
pub use plan::load_plan;
pub use stats::RunStats;
