use serde::Serialize;
use sweep_core::RunStats;

/// Reduces the successful attempts of one configuration to its report row.
pub fn summarize(runs: &[RunStats]) -> Option<RunStats> {
    RunStats::average(runs)
}

/// Per-matrix accumulation of summaries, keyed by matrix index.
#[derive(Debug, Default, Clone, Serialize)]
pub struct MatrixTally {
    summaries: Vec<(usize, RunStats)>,
    skipped: Vec<usize>,
}

impl MatrixTally {
    /// Folds the runs of configuration `index`. Returns the summary to
    /// persist, or `None` when there is nothing to write.
    pub fn fold(&mut self, index: usize, runs: &[RunStats]) -> Option<&RunStats> {
        match summarize(runs) {
            Some(summary) => {
                self.summaries.push((index, summary));
                self.summaries.last().map(|(_, s)| s)
            }
            None => {
                self.skipped.push(index);
                None
            }
        }
    }

    pub fn summaries(&self) -> &[(usize, RunStats)] {
        &self.summaries
    }

    pub fn rows(&self) -> usize {
        self.summaries.len()
    }

    pub fn skipped(&self) -> &[usize] {
        &self.skipped
    }
}
