use anyhow::{anyhow, Result};
use chrono::Utc;
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use sweep_core::{RunStats, TestConfig};
use sweep_runner::report::{latency_path, report_path};
use sweep_runner::{
    run_matrix, AttemptTiming, LaunchError, Launcher, Monitor, ProcessHandle, RetryPolicy,
    RunContext,
};

#[derive(Default)]
struct Counters {
    starts: AtomicUsize,
    kills: AtomicUsize,
    cleanups: AtomicUsize,
    alive: AtomicBool,
    max_alive_at_start: AtomicUsize,
}

struct FakeHandle(Arc<Counters>);

impl ProcessHandle for FakeHandle {
    fn kill(&mut self) {
        if self.0.alive.swap(false, Ordering::SeqCst) {
            self.0.kills.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl Drop for FakeHandle {
    fn drop(&mut self) {
        self.kill();
    }
}

struct FakeLauncher {
    counters: Arc<Counters>,
}

impl FakeLauncher {
    fn new() -> Self {
        Self {
            counters: Arc::new(Counters::default()),
        }
    }
}

impl Launcher for FakeLauncher {
    type Handle = FakeHandle;

    fn start(&self, _cfg: &TestConfig) -> Result<FakeHandle, LaunchError> {
        if self.counters.alive.load(Ordering::SeqCst) {
            self.counters.max_alive_at_start.fetch_add(1, Ordering::SeqCst);
        }
        self.counters.starts.fetch_add(1, Ordering::SeqCst);
        self.counters.alive.store(true, Ordering::SeqCst);
        Ok(FakeHandle(Arc::clone(&self.counters)))
    }

    fn cleanup(&self, _cfg: &TestConfig) -> Result<()> {
        self.counters.cleanups.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

enum Step {
    Valid(f64),
    Degenerate,
    Hang,
    Fail,
}

struct ScriptedMonitor {
    steps: Mutex<VecDeque<Step>>,
}

impl ScriptedMonitor {
    fn new(steps: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into()),
        })
    }
}

fn measured(rate: f64) -> RunStats {
    RunStats {
        hosts: 4,
        depth: 2,
        branching_factor: 2,
        min_time: 0.8,
        max_time: 2.4,
        avg_time: 1.6,
        std_dev: 0.2,
        rate,
        times: vec![0.8, 1.6, 2.4],
    }
}

impl Monitor for ScriptedMonitor {
    fn measure(&self, _branching_factor: usize) -> Result<RunStats> {
        let step = self.steps.lock().expect("lock").pop_front();
        match step {
            Some(Step::Valid(rate)) => Ok(measured(rate)),
            Some(Step::Degenerate) => Ok(RunStats::default()),
            Some(Step::Hang) => {
                thread::sleep(Duration::from_millis(400));
                Ok(measured(99.0))
            }
            Some(Step::Fail) | None => Err(anyhow!("no more scripted measurements")),
        }
    }
}

fn context(tag: &str) -> RunContext {
    let dir = std::env::temp_dir().join(format!(
        "sweep_engine_{}_{}_{}",
        tag,
        std::process::id(),
        Utc::now().timestamp_micros()
    ));
    fs::create_dir_all(&dir).expect("temp dir");
    let mut ctx = RunContext::new(&dir, "deploy2deter");
    ctx.output_dir = dir;
    ctx.timing = AttemptTiming {
        warmup: Duration::from_millis(0),
        deadline: Duration::from_millis(100),
    };
    ctx
}

fn read_lines(path: &Path) -> Vec<String> {
    fs::read_to_string(path)
        .expect("report exists")
        .lines()
        .map(|l| l.to_string())
        .collect()
}

fn cleanup_dir(dir: PathBuf) {
    let _ = fs::remove_dir_all(dir);
}

#[test]
fn timeout_then_retry_success_writes_single_row() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_test_writer()
        .try_init();

    let ctx = context("scenario");
    let launcher = FakeLauncher::new();
    let monitor = ScriptedMonitor::new(vec![
        Step::Hang,
        Step::Valid(12.5),
        Step::Fail,
        Step::Degenerate,
    ]);
    let policy = RetryPolicy {
        max_attempts: 2,
        stop_on_first_success: true,
    };
    let matrix = vec![
        TestConfig::stamp(3, 1, 2, 30, 20),
        TestConfig::stamp(3, 2, 3, 30, 20),
    ];

    let outcome = run_matrix(&ctx, &launcher, monitor, policy, "scenario", &matrix)
        .expect("matrix completes");

    assert_eq!(outcome.configurations, 2);
    assert_eq!(outcome.rows_written, 1);
    assert_eq!(outcome.skipped, vec![1]);
    assert!(!outcome.complete());

    let lines = read_lines(&report_path(&ctx.output_dir, "scenario"));
    assert_eq!(lines.len(), 2, "header plus one row: {:?}", lines);
    assert_eq!(lines[0], "hosts,depth,bf,min,max,avg,stddev,rate");
    assert!(lines[1].ends_with(",12.5"), "row: {}", lines[1]);
    assert!(latency_path(&ctx.output_dir, "scenario", 0).exists());
    assert!(!latency_path(&ctx.output_dir, "scenario", 1).exists());

    let c = &launcher.counters;
    assert_eq!(c.starts.load(Ordering::SeqCst), 4);
    assert_eq!(c.kills.load(Ordering::SeqCst), 4);
    assert_eq!(c.cleanups.load(Ordering::SeqCst), 4);
    assert_eq!(c.max_alive_at_start.load(Ordering::SeqCst), 0, "attempts overlapped");
    cleanup_dir(ctx.output_dir.clone());
}

#[test]
fn all_invalid_configuration_leaves_no_row_and_no_latency_file() {
    let ctx = context("invalid");
    let launcher = FakeLauncher::new();
    let monitor = ScriptedMonitor::new(vec![Step::Degenerate, Step::Degenerate, Step::Degenerate]);
    let policy = RetryPolicy {
        max_attempts: 3,
        stop_on_first_success: true,
    };
    let matrix = vec![TestConfig::stamp(3, 1, 2, 30, 20)];

    let outcome = run_matrix(&ctx, &launcher, monitor, policy, "invalid", &matrix)
        .expect("matrix completes");

    assert_eq!(outcome.rows_written, 0);
    let lines = read_lines(&outcome.report_path);
    assert_eq!(lines.len(), 1, "header only: {:?}", lines);
    assert!(!latency_path(&ctx.output_dir, "invalid", 0).exists());
    assert_eq!(launcher.counters.cleanups.load(Ordering::SeqCst), 3);
    cleanup_dir(ctx.output_dir.clone());
}

#[test]
fn row_count_never_exceeds_matrix_and_header_is_unique() {
    let ctx = context("bounds");
    let launcher = FakeLauncher::new();
    let monitor = ScriptedMonitor::new(vec![
        Step::Valid(1.5),
        Step::Fail,
        Step::Valid(3.5),
        Step::Degenerate,
        Step::Valid(5.5),
    ]);
    let matrix: Vec<TestConfig> = (1..=5)
        .map(|bf| TestConfig::stamp(3, 1, bf, 30, 5))
        .collect();

    let outcome = run_matrix(
        &ctx,
        &launcher,
        monitor,
        RetryPolicy::default(),
        "bounds",
        &matrix,
    )
    .expect("matrix completes");

    let lines = read_lines(&outcome.report_path);
    let headers = lines.iter().filter(|l| l.starts_with("hosts,")).count();
    assert_eq!(headers, 1);
    assert!(lines.len() - 1 <= matrix.len());
    assert_eq!(outcome.rows_written, 3);
    assert_eq!(outcome.skipped, vec![1, 3]);
    assert!(lines[1].ends_with(",1.5"), "row: {}", lines[1]);
    assert!(lines[3].ends_with(",5.5"), "row: {}", lines[3]);
    for index in [0, 2, 4] {
        assert!(latency_path(&ctx.output_dir, "bounds", index).exists());
    }
    cleanup_dir(ctx.output_dir.clone());
}

#[test]
fn unwritable_output_directory_is_fatal_before_any_attempt() {
    let mut ctx = context("fatal");
    let base = ctx.output_dir.clone();
    ctx.output_dir = base.join("missing").join("deeper");
    let launcher = FakeLauncher::new();
    let monitor = ScriptedMonitor::new(vec![Step::Valid(1.0)]);
    let err = run_matrix(
        &ctx,
        &launcher,
        monitor,
        RetryPolicy::default(),
        "fatal",
        &[TestConfig::stamp(3, 1, 2, 30, 5)],
    )
    .expect_err("cannot open report");
    assert!(err.to_string().contains("error opening test file"), "unexpected: {}", err);
    assert_eq!(launcher.counters.starts.load(Ordering::SeqCst), 0);
    cleanup_dir(base);
}
