use anyhow::{anyhow, Result};
use std::fs::{File, OpenOptions};
use std::io::Write;
#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use sweep_core::RunStats;
use tracing::debug;

pub fn report_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{}.csv", name))
}

pub fn latency_path(dir: &Path, name: &str, index: usize) -> PathBuf {
    dir.join(format!("client_latency_{}_{}.csv", name, index))
}

fn create_truncated(path: &Path) -> Result<File> {
    let mut opts = OpenOptions::new();
    opts.create(true).write(true).truncate(true);
    #[cfg(unix)]
    opts.mode(0o660);
    opts.open(path)
        .map_err(|e| anyhow!("error opening test file {}: {}", path.display(), e))
}

fn write_synced(file: &mut File, bytes: &[u8], path: &Path) -> Result<()> {
    file.write_all(bytes)
        .map_err(|e| anyhow!("error writing {}: {}", path.display(), e))?;
    file.sync_all()
        .map_err(|e| anyhow!("error syncing {}: {}", path.display(), e))?;
    Ok(())
}

/// Header-first, append-only CSV report. Every write is synced before the
/// call returns, so an interrupted run loses at most the configuration in
/// flight.
#[derive(Debug)]
pub struct ReportWriter {
    dir: PathBuf,
    name: String,
    path: PathBuf,
    file: File,
    rows: usize,
}

impl ReportWriter {
    pub fn create(dir: &Path, name: &str) -> Result<Self> {
        let path = report_path(dir, name);
        let mut file = create_truncated(&path)?;
        write_synced(&mut file, &RunStats::default().csv_header()?, &path)?;
        debug!(path = %path.display(), "report header written");
        Ok(Self {
            dir: dir.to_path_buf(),
            name: name.to_string(),
            path,
            file,
            rows: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Appends the summary row for matrix entry `index`, then writes that
    /// entry's client latencies to their own file.
    pub fn append(&mut self, index: usize, stats: &RunStats) -> Result<()> {
        write_synced(&mut self.file, &stats.csv_row()?, &self.path)?;
        self.rows += 1;

        let latency = latency_path(&self.dir, &self.name, index);
        let mut cl = create_truncated(&latency)?;
        write_synced(&mut cl, &stats.times_csv()?, &latency)?;
        debug!(index, path = %latency.display(), "client latencies written");
        Ok(())
    }
}
