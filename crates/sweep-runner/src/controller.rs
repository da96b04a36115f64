//! One deadline-bounded attempt: start the driver, wait out its warm-up, then
//! race the monitor against the deadline. Whichever side answers first is the
//! outcome; the driver is killed before returning on every path, and a
//! monitor that lost the race is told to stop.

use crate::error::AttemptError;
use crate::launcher::{AttemptTiming, Launcher, ProcessHandle};
use crate::monitor::Monitor;
use crate::policy::validate;
use anyhow::Result;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use sweep_core::{RunStats, TestConfig};
use tracing::{debug, info, warn};

pub struct AttemptController<'a, L: Launcher> {
    launcher: &'a L,
    monitor: Arc<dyn Monitor>,
    timing: AttemptTiming,
}

impl<'a, L: Launcher> AttemptController<'a, L> {
    pub fn new(launcher: &'a L, monitor: Arc<dyn Monitor>, timing: AttemptTiming) -> Self {
        Self {
            launcher,
            monitor,
            timing,
        }
    }

    pub fn run_attempt(&self, cfg: &TestConfig) -> Result<RunStats, AttemptError> {
        let mut handle = self.launcher.start(cfg)?;
        debug!(warmup = ?self.timing.warmup, "waiting for driver warm-up");
        thread::sleep(self.timing.warmup);

        let outcome = self.race(cfg.branching_factor);
        if let Err(AttemptError::Timeout { .. }) = &outcome {
            self.monitor.abandon();
        }
        handle.kill();

        let stats = outcome?;
        validate(&stats)?;
        Ok(stats)
    }

    pub fn cleanup(&self, cfg: &TestConfig) -> Result<()> {
        self.launcher.cleanup(cfg)
    }

    fn race(&self, branching_factor: usize) -> Result<RunStats, AttemptError> {
        // Single slot: the monitor never blocks on send, and a result that
        // arrives after the deadline goes nowhere once `rx` is dropped.
        let (tx, rx) = mpsc::sync_channel::<Result<RunStats>>(1);
        let monitor = Arc::clone(&self.monitor);
        thread::Builder::new()
            .name(format!("monitor-bf{}", branching_factor))
            .spawn(move || {
                let result = monitor.measure(branching_factor);
                if tx.send(result).is_err() {
                    debug!("monitor result arrived after the deadline; dropped");
                }
            })
            .map_err(|e| AttemptError::Monitor(format!("cannot spawn monitor thread: {}", e)))?;

        match rx.recv_timeout(self.timing.deadline) {
            Ok(Ok(stats)) => {
                info!(rate = stats.rate, "measurement received");
                Ok(stats)
            }
            Ok(Err(e)) => Err(AttemptError::Monitor(e.to_string())),
            Err(RecvTimeoutError::Timeout) => {
                warn!(deadline = ?self.timing.deadline, "timed out");
                Err(AttemptError::Timeout {
                    deadline: self.timing.deadline,
                })
            }
            Err(RecvTimeoutError::Disconnected) => Err(AttemptError::Monitor(
                "monitor stopped without a result".to_string(),
            )),
        }
    }
}
