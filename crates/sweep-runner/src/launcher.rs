use crate::error::LaunchError;
use anyhow::{anyhow, Result};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::Duration;
use sweep_core::TestConfig;
use tracing::{debug, info, warn};

/// Driver needs this long to bring up its tree before it reports anything.
pub const DEFAULT_WARMUP: Duration = Duration::from_secs(30);
/// Hard upper bound on waiting for one measurement.
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptTiming {
    pub warmup: Duration,
    pub deadline: Duration,
}

impl Default for AttemptTiming {
    fn default() -> Self {
        Self {
            warmup: DEFAULT_WARMUP,
            deadline: DEFAULT_DEADLINE,
        }
    }
}

/// Settings shared by every attempt of a run.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub driver: PathBuf,
    pub driver_dir: PathBuf,
    pub output_dir: PathBuf,
    pub user: String,
    pub host: String,
    pub debug: bool,
    pub loggers: usize,
    pub build: bool,
    pub timing: AttemptTiming,
}

impl RunContext {
    pub fn new(driver_dir: &Path, driver_name: &str) -> Self {
        Self {
            driver: driver_dir.join(driver_name),
            driver_dir: driver_dir.to_path_buf(),
            output_dir: driver_dir.join("test_data"),
            user: "ineiti".to_string(),
            host: "users.deterlab.net".to_string(),
            debug: true,
            loggers: 3,
            build: true,
            timing: AttemptTiming::default(),
        }
    }
}

/// Full argument vector for one attempt. Every flag is always present.
pub fn driver_args(ctx: &RunContext, cfg: &TestConfig) -> Vec<String> {
    vec![
        format!("-nmachs={}", cfg.machines),
        format!("-hpn={}", cfg.hosts_per_node),
        "-nmsgs=-1".to_string(),
        format!("-bf={}", cfg.branching_factor),
        format!("-rate={}", cfg.rate),
        format!("-rounds={}", cfg.rounds),
        format!("-debug={}", ctx.debug),
        format!("-failures={}", cfg.failures),
        format!("-rfail={}", cfg.root_failures),
        format!("-ffail={}", cfg.follower_failures),
        format!("-test_connect={}", cfg.test_connect),
        format!("-app={}", cfg.app),
        format!("-user={}", ctx.user),
        format!("-host={}", ctx.host),
        format!("-nloggers={}", ctx.loggers),
    ]
}

/// Arguments for the driver's kill mode. The pre-run kill also carries the
/// build flag and the target host.
pub fn kill_args(ctx: &RunContext, machines: usize, with_build: bool) -> Vec<String> {
    let mut args = vec!["-kill=true".to_string()];
    if with_build {
        args.push(format!("-build={}", ctx.build));
    }
    args.push(format!("-nmachs={}", machines));
    args.push(format!("-user={}", ctx.user));
    if with_build {
        args.push(format!("-host={}", ctx.host));
    }
    args
}

pub trait ProcessHandle {
    /// Terminates the process. Safe to call more than once and after the
    /// process already exited.
    fn kill(&mut self);
}

pub trait Launcher {
    type Handle: ProcessHandle;

    fn start(&self, cfg: &TestConfig) -> Result<Self::Handle, LaunchError>;

    /// Kills everything the driver left behind for `cfg`, including children
    /// the handle does not track.
    fn cleanup(&self, cfg: &TestConfig) -> Result<()>;
}

#[derive(Debug)]
pub struct DriverProcess {
    child: Option<Child>,
    pid: u32,
}

impl DriverProcess {
    pub fn pid(&self) -> u32 {
        self.pid
    }
}

impl ProcessHandle for DriverProcess {
    fn kill(&mut self) {
        let mut child = match self.child.take() {
            Some(c) => c,
            None => return,
        };
        if let Ok(Some(status)) = child.try_wait() {
            debug!(pid = self.pid, %status, "driver already exited");
            return;
        }
        if let Err(e) = child.kill() {
            warn!(pid = self.pid, error = %e, "failed to kill driver");
        }
        let _ = child.wait();
        info!(pid = self.pid, "driver killed");
    }
}

impl Drop for DriverProcess {
    fn drop(&mut self) {
        self.kill();
    }
}

/// Spawns the real driver binary; its output goes straight to ours.
#[derive(Debug, Clone)]
pub struct DriverLauncher {
    ctx: RunContext,
}

impl DriverLauncher {
    pub fn new(ctx: RunContext) -> Self {
        Self { ctx }
    }
}

impl Launcher for DriverLauncher {
    type Handle = DriverProcess;

    fn start(&self, cfg: &TestConfig) -> Result<DriverProcess, LaunchError> {
        let args = driver_args(&self.ctx, cfg);
        info!(driver = %self.ctx.driver.display(), args = ?args, "running test");
        info!(failures = cfg.failures, "failures percent");
        let child = Command::new(&self.ctx.driver)
            .args(&args)
            .current_dir(&self.ctx.driver_dir)
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|source| LaunchError {
                program: self.ctx.driver.display().to_string(),
                source,
            })?;
        let pid = child.id();
        Ok(DriverProcess {
            child: Some(child),
            pid,
        })
    }

    fn cleanup(&self, cfg: &TestConfig) -> Result<()> {
        info!("killing remaining processes");
        let status = Command::new(&self.ctx.driver)
            .args(kill_args(&self.ctx, cfg.machines, false))
            .current_dir(&self.ctx.driver_dir)
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()?;
        if !status.success() {
            return Err(anyhow!("driver kill mode exited with {}", status));
        }
        Ok(())
    }
}
