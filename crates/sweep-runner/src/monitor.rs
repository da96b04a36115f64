use anyhow::{anyhow, Result};
use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::sync::Mutex;
use sweep_core::RunStats;
use tracing::{debug, warn};

/// Blocking source of one measurement per attempt. It has no deadline of its
/// own; the controller bounds it.
pub trait Monitor: Send + Sync + 'static {
    fn measure(&self, branching_factor: usize) -> Result<RunStats>;

    /// Called when the deadline beat the measurement in flight. Anything the
    /// monitor started for it must stop; its result is no longer wanted.
    fn abandon(&self) {}
}

/// Runs an external collector and reads its last stdout line as JSON
/// [`RunStats`]. The collector is called with `-bf=<n>` appended.
#[derive(Debug)]
pub struct CommandMonitor {
    command: Vec<String>,
    running: Mutex<Option<Child>>,
}

impl CommandMonitor {
    pub fn new(command: Vec<String>) -> Result<Self> {
        if command.is_empty() {
            return Err(anyhow!("monitor command cannot be empty"));
        }
        Ok(Self {
            command,
            running: Mutex::new(None),
        })
    }

    fn running(&self) -> std::sync::MutexGuard<'_, Option<Child>> {
        self.running.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Monitor for CommandMonitor {
    fn measure(&self, branching_factor: usize) -> Result<RunStats> {
        let mut cmd = Command::new(&self.command[0]);
        cmd.args(&self.command[1..]);
        cmd.arg(format!("-bf={}", branching_factor));
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::inherit());

        let mut child = cmd
            .spawn()
            .map_err(|e| anyhow!("cannot start monitor {}: {}", self.command[0], e))?;
        let pid = child.id();
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("monitor stdout was not captured"))?;
        if let Some(mut stale) = self.running().replace(child) {
            let _ = stale.kill();
            let _ = stale.wait();
        }

        let mut raw = Vec::new();
        let read = stdout.read_to_end(&mut raw);

        // Only reap our own child; if it is gone, `abandon` already did.
        let mine = {
            let mut running = self.running();
            match running.as_ref().map(Child::id) {
                Some(id) if id == pid => running.take(),
                _ => None,
            }
        };
        let mut child = mine.ok_or_else(|| anyhow!("monitor {} was abandoned", pid))?;
        let status = child.wait()?;
        read?;

        let stdout = String::from_utf8_lossy(&raw);
        let last_line = stdout
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .map(|s| s.trim().to_string());
        match last_line {
            Some(line) => {
                debug!(line = %line, "monitor reported");
                serde_json::from_str::<RunStats>(&line)
                    .map_err(|e| anyhow!("monitor output is not run stats ({}): {}", status, e))
            }
            None => Err(anyhow!("monitor exited with {} without reporting", status)),
        }
    }

    fn abandon(&self) {
        let Some(mut child) = self.running().take() else {
            return;
        };
        let pid = child.id();
        if let Err(e) = child.kill() {
            warn!(pid, error = %e, "failed to kill monitor");
        }
        let _ = child.wait();
        debug!(pid, "monitor abandoned");
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn sh(script: &str) -> CommandMonitor {
        CommandMonitor::new(vec!["sh".to_string(), "-c".to_string(), script.to_string()])
            .expect("non-empty command")
    }

    #[test]
    fn parses_last_non_empty_line() {
        let monitor = sh(
            "echo 'connecting to log server'; \
             echo '{\"min_time\":0.5,\"max_time\":2.0,\"avg_time\":1.0,\"rate\":12.5,\"times\":[0.5,2.0]}'; \
             echo ''",
        );
        let stats = monitor.measure(3).expect("stats");
        assert_eq!(stats.rate, 12.5);
        assert_eq!(stats.times, vec![0.5, 2.0]);
    }

    #[test]
    fn branching_factor_is_appended() {
        // With `sh -c`, the first extra argument becomes $0.
        let monitor = sh(concat!(
            "bf=${0#-bf=}; ",
            "echo \"{\\\"min_time\\\":1,\\\"max_time\\\":1,\\\"avg_time\\\":1,",
            "\\\"rate\\\":1,\\\"branching_factor\\\":$bf}\""
        ));
        let stats = monitor.measure(7).expect("stats");
        assert_eq!(stats.branching_factor, 7);
    }

    #[test]
    fn silent_or_garbled_monitor_is_an_error() {
        let err = sh("exit 3").measure(2).expect_err("no output");
        assert!(err.to_string().contains("without reporting"), "unexpected: {}", err);
        let err = sh("echo EOF").measure(2).expect_err("garbled");
        assert!(err.to_string().contains("not run stats"), "unexpected: {}", err);
    }

    #[test]
    fn abandon_kills_the_collector_in_flight() {
        let marker = std::env::temp_dir().join(format!(
            "sweep_monitor_marker_{}_{}",
            std::process::id(),
            chrono::Utc::now().timestamp_micros()
        ));
        let monitor = Arc::new(sh(&format!("sleep 1; touch {}", marker.display())));
        let worker = {
            let monitor = Arc::clone(&monitor);
            thread::spawn(move || monitor.measure(2))
        };
        thread::sleep(Duration::from_millis(200));
        monitor.abandon();

        let err = worker
            .join()
            .expect("monitor thread")
            .expect_err("abandoned measurement");
        assert!(err.to_string().contains("abandoned"), "unexpected: {}", err);
        thread::sleep(Duration::from_millis(1_500));
        assert!(!marker.exists(), "collector kept running after abandon");
    }

    #[test]
    fn abandon_without_measurement_is_a_no_op() {
        let monitor = sh("echo '{\"min_time\":1,\"max_time\":1,\"avg_time\":1,\"rate\":2}'");
        monitor.abandon();
        assert_eq!(monitor.measure(2).expect("stats").rate, 2.0);
        monitor.abandon();
    }

    #[test]
    fn empty_command_is_rejected() {
        assert!(CommandMonitor::new(Vec::new()).is_err());
    }
}
