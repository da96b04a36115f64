use crate::aggregate::MatrixTally;
use crate::controller::AttemptController;
use crate::launcher::{Launcher, RunContext};
use crate::monitor::Monitor;
use crate::policy::RetryPolicy;
use crate::report::ReportWriter;
use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use sweep_core::TestConfig;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize)]
pub struct MatrixOutcome {
    pub name: String,
    pub report_path: PathBuf,
    pub configurations: usize,
    pub rows_written: usize,
    pub skipped: Vec<usize>,
    pub started_at: String,
    pub finished_at: String,
}

impl MatrixOutcome {
    pub fn complete(&self) -> bool {
        self.skipped.is_empty()
    }
}

/// Runs every configuration of `matrix` in order and writes the report
/// `<ctx.output_dir>/<name>.csv`. Only report I/O errors abort the run; a
/// configuration without a single valid measurement is logged and skipped.
pub fn run_matrix<L: Launcher>(
    ctx: &RunContext,
    launcher: &L,
    monitor: Arc<dyn Monitor>,
    policy: RetryPolicy,
    name: &str,
    matrix: &[TestConfig],
) -> Result<MatrixOutcome> {
    let started_at = Utc::now().to_rfc3339();
    let mut writer = ReportWriter::create(&ctx.output_dir, name)?;
    let controller = AttemptController::new(launcher, monitor, ctx.timing);
    let mut tally = MatrixTally::default();

    info!(
        name,
        configurations = matrix.len(),
        max_attempts = policy.max_attempts,
        "starting matrix"
    );
    for (index, cfg) in matrix.iter().enumerate() {
        info!(index, config = %cfg, "running configuration");
        let runs = policy.run(
            cfg,
            |_| controller.run_attempt(cfg),
            || controller.cleanup(cfg),
        );
        match tally.fold(index, &runs) {
            Some(summary) => writer.append(index, summary)?,
            None => warn!(index, config = %cfg, "unable to get any data for test"),
        }
    }

    let outcome = MatrixOutcome {
        name: name.to_string(),
        report_path: writer.path().to_path_buf(),
        configurations: matrix.len(),
        rows_written: writer.rows(),
        skipped: tally.skipped().to_vec(),
        started_at,
        finished_at: Utc::now().to_rfc3339(),
    };
    info!(
        name,
        rows = outcome.rows_written,
        skipped = outcome.skipped.len(),
        "matrix finished"
    );
    Ok(outcome)
}
