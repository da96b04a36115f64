//! One-time preparation before a matrix runs. Every failure here is fatal.

use crate::launcher::{kill_args, RunContext};
use anyhow::{anyhow, Result};
use std::fs;
use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};
use tracing::info;

const TESTBED_DOMAIN: &str = "SAFER.isi.deterlab.net";
const TESTBED_SUBNET: &str = "10.255.0.";

pub fn ensure_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path)
        .map_err(|e| anyhow!("failed to make directory {}: {}", path.display(), e))
}

/// One line per server: `server-<i>.<project>.<domain>\t<ip>`.
pub fn hosts_file_contents(project: &str, servers: usize) -> String {
    (0..servers)
        .map(|i| {
            format!(
                "server-{}.{}.{}\t{}{}\n",
                i,
                project,
                TESTBED_DOMAIN,
                TESTBED_SUBNET,
                i + 1
            )
        })
        .collect()
}

/// Replaces `path` with a fresh host list.
pub fn write_hosts_file(path: &Path, project: &str, servers: usize) -> Result<()> {
    if path.exists() {
        info!(path = %path.display(), "hosts file already exists; erasing");
        fs::remove_file(path)?;
    }
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            ensure_dir(parent)?;
        }
    }
    let mut f = fs::File::create(path)
        .map_err(|e| anyhow!("could not create hosts file {}: {}", path.display(), e))?;
    f.write_all(hosts_file_contents(project, servers).as_bytes())?;
    info!(hosts = servers, "created hosts file description");
    Ok(())
}

/// Builds the driver in its own directory.
pub fn build_driver(driver_dir: &Path) -> Result<()> {
    let status = Command::new("go")
        .args(["build", "-v"])
        .current_dir(driver_dir)
        .status()
        .map_err(|e| anyhow!("error building driver in {}: {}", driver_dir.display(), e))?;
    if !status.success() {
        return Err(anyhow!(
            "error building driver in {}: {}",
            driver_dir.display(),
            status
        ));
    }
    Ok(())
}

/// Clears anything a previous run left behind. Also the point where the
/// driver rebuilds its helpers unless `ctx.build` is off.
pub fn initial_kill(ctx: &RunContext, machines: usize) -> Result<()> {
    let args = kill_args(ctx, machines, true);
    info!(build = ctx.build, "killing remaining processes");
    let status = Command::new(&ctx.driver)
        .args(&args)
        .current_dir(&ctx.driver_dir)
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()
        .map_err(|e| anyhow!("couldn't run {} {:?}: {}", ctx.driver.display(), args, e))?;
    if !status.success() {
        return Err(anyhow!(
            "couldn't run {} {:?}: {}",
            ctx.driver.display(),
            args,
            status
        ));
    }
    Ok(())
}
