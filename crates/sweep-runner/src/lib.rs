pub mod aggregate;
pub mod controller;
mod engine;
mod error;
pub mod launcher;
pub mod monitor;
pub mod policy;
pub mod report;
pub mod setup;

pub use aggregate::{summarize, MatrixTally};
pub use controller::AttemptController;
pub use engine::{run_matrix, MatrixOutcome};
pub use error::{AttemptError, LaunchError};
pub use launcher::{
    driver_args, kill_args, AttemptTiming, DriverLauncher, DriverProcess, Launcher,
    ProcessHandle, RunContext,
};
pub use monitor::{CommandMonitor, Monitor};
pub use policy::{validate, RetryPolicy};
pub use report::ReportWriter;
