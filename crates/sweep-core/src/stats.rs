use anyhow::Result;
use serde::{Deserialize, Serialize};

const CSV_COLUMNS: [&str; 8] = ["hosts", "depth", "bf", "min", "max", "avg", "stddev", "rate"];

/// Aggregate measurement for one run of the driver.
///
/// Times are round latencies in seconds; `rate` is rounds per second.
/// `times` holds the per-client latencies in the order the monitor saw them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunStats {
    #[serde(default)]
    pub hosts: usize,
    #[serde(default)]
    pub depth: usize,
    #[serde(default)]
    pub branching_factor: usize,
    pub min_time: f64,
    pub max_time: f64,
    pub avg_time: f64,
    #[serde(default)]
    pub std_dev: f64,
    pub rate: f64,
    #[serde(default)]
    pub times: Vec<f64>,
}

#[derive(Serialize)]
struct CsvRow {
    hosts: usize,
    depth: usize,
    bf: usize,
    min: f64,
    max: f64,
    avg: f64,
    stddev: f64,
    rate: f64,
}

fn write_csv<F>(fill: F) -> Result<Vec<u8>>
where
    F: FnOnce(&mut csv::Writer<&mut Vec<u8>>) -> csv::Result<()>,
{
    let mut buf = Vec::new();
    {
        let mut wtr = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(&mut buf);
        fill(&mut wtr)?;
        wtr.flush()?;
    }
    Ok(buf)
}

impl RunStats {
    pub fn csv_header(&self) -> Result<Vec<u8>> {
        write_csv(|wtr| wtr.write_record(CSV_COLUMNS))
    }

    pub fn csv_row(&self) -> Result<Vec<u8>> {
        write_csv(|wtr| {
            wtr.serialize(CsvRow {
                hosts: self.hosts,
                depth: self.depth,
                bf: self.branching_factor,
                min: self.min_time,
                max: self.max_time,
                avg: self.avg_time,
                stddev: self.std_dev,
                rate: self.rate,
            })
        })
    }

    /// One client latency per line.
    pub fn times_csv(&self) -> Result<Vec<u8>> {
        write_csv(|wtr| {
            for t in &self.times {
                wtr.write_record([t.to_string()])?;
            }
            Ok(())
        })
    }

    /// Field-wise mean of `runs`. Topology fields and the client latencies
    /// come from the first run; latency vectors of different runs do not line
    /// up element by element.
    pub fn average(runs: &[RunStats]) -> Option<RunStats> {
        let first = runs.first()?;
        let n = runs.len() as f64;
        let mean = |field: fn(&RunStats) -> f64| runs.iter().map(field).sum::<f64>() / n;
        Some(RunStats {
            hosts: first.hosts,
            depth: first.depth,
            branching_factor: first.branching_factor,
            min_time: mean(|r| r.min_time),
            max_time: mean(|r| r.max_time),
            avg_time: mean(|r| r.avg_time),
            std_dev: mean(|r| r.std_dev),
            rate: mean(|r| r.rate),
            times: first.times.clone(),
        })
    }
}
