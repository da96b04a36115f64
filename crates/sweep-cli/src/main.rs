use anyhow::{anyhow, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use sweep_core::matrix::{self, TopologyPin};
use sweep_core::TestConfig;
use sweep_runner::{setup, CommandMonitor, DriverLauncher, MatrixOutcome, RetryPolicy, RunContext};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Exit status when the matrix finished but some configurations have no row.
const EXIT_INCOMPLETE: i32 = 2;

#[derive(Parser)]
#[command(name = "sweep", version, about = "Runs test matrices against the deploy2deter driver")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct GlobalArgs {
    /// User on the testbed machines
    #[arg(long, global = true, default_value = "ineiti")]
    user: String,
    /// Testbed login host
    #[arg(long, global = true, default_value = "users.deterlab.net")]
    host: String,
    /// Project name on the testbed
    #[arg(long, global = true, default_value = "Dissent-CS")]
    project: String,
    /// Number of machines (servers running the client)
    #[arg(long, global = true, default_value_t = 3)]
    machines: usize,
    /// Number of loggers
    #[arg(long, global = true, default_value_t = 3)]
    loggers: usize,
    /// Branching factor
    #[arg(long, global = true, default_value_t = 2)]
    branch: usize,
    /// Hosts per node (physical machine)
    #[arg(long, global = true, default_value_t = 1)]
    hpn: usize,
    /// Rounds for generated sweeps; literal tables carry their own
    #[arg(long, global = true, default_value_t = 5)]
    rounds: usize,
    /// Don't let the driver rebuild its helpers
    #[arg(long, global = true)]
    nobuild: bool,
    /// Run the driver without debug output
    #[arg(long, global = true)]
    quiet_driver: bool,
    #[arg(long, global = true, default_value = "deploy2deter")]
    driver_dir: PathBuf,
    #[arg(long, global = true, default_value = "deploy2deter")]
    driver_name: String,
    /// Defaults to <driver-dir>/test_data
    #[arg(long, global = true)]
    output_dir: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum MatrixArg {
    #[value(name = "rate_load")]
    RateLoad,
    #[value(name = "depth")]
    Depth,
    #[value(name = "depth_fixed")]
    DepthFixed,
    #[value(name = "scale")]
    Scale,
    #[value(name = "failure")]
    Failure,
    #[value(name = "voting")]
    Voting,
    #[value(name = "full")]
    Full,
    #[value(name = "hosts")]
    Hosts,
    #[value(name = "sign")]
    Sign,
    #[value(name = "vote")]
    Vote,
}

impl MatrixArg {
    fn default_name(&self) -> &'static str {
        match self {
            MatrixArg::RateLoad => "load_rate_test",
            MatrixArg::Depth | MatrixArg::DepthFixed => "depth_test",
            MatrixArg::Scale => "scale_test",
            MatrixArg::Failure => "failure_test",
            MatrixArg::Voting => "vote_test",
            MatrixArg::Full => "full_test",
            MatrixArg::Hosts => "hosts_test",
            MatrixArg::Sign => "sign_test",
            MatrixArg::Vote => "vote_test_no_signing",
        }
    }
}

#[derive(Args, Clone)]
struct MatrixSelect {
    /// Built-in matrix to run
    #[arg(long, value_enum, default_value = "hosts", conflicts_with = "plan")]
    matrix: MatrixArg,
    /// YAML or JSON list of configurations
    #[arg(long)]
    plan: Option<PathBuf>,
    /// Report name; defaults to one derived from the matrix
    #[arg(long)]
    name: Option<String>,
    #[arg(long, default_value_t = 1)]
    low: usize,
    #[arg(long, default_value_t = 100)]
    high: usize,
    #[arg(long, default_value_t = 1)]
    step: usize,
    #[arg(long, default_value_t = 2)]
    mult: usize,
    /// Force --machines/--hpn/--branch onto every configuration
    #[arg(long)]
    pin_topology: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Set up the testbed and run a matrix
    Run {
        #[command(flatten)]
        select: MatrixSelect,
        /// Collector command after `--`; called with -bf=<n> appended and must
        /// print RunStats JSON as its last line
        #[arg(last = true, required = true, value_name = "MONITOR")]
        monitor: Vec<String>,
        #[arg(long, default_value_t = 1)]
        attempts: u32,
        /// Keep attempting after the first valid measurement and average them
        #[arg(long)]
        no_stop_on_success: bool,
        /// Skip `go build` of the driver
        #[arg(long)]
        prebuilt: bool,
        #[arg(long)]
        json: bool,
    },
    /// Print the configurations a matrix would run
    Describe {
        #[command(flatten)]
        select: MatrixSelect,
        #[arg(long)]
        json: bool,
    },
    /// Kill any driver instances left on the testbed
    Kill,
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let json_mode = command_json_mode(&cli.command);
    match run_command(&cli.global, cli.command) {
        Ok((payload, complete)) => {
            if let Some(payload) = payload {
                emit_json(&payload);
            }
            if !complete {
                std::process::exit(EXIT_INCOMPLETE);
            }
            Ok(())
        }
        Err(err) => {
            if json_mode {
                emit_json(&json_error("command_failed", err.to_string(), json!({})));
                std::process::exit(1);
            }
            Err(err)
        }
    }
}

fn run_command(global: &GlobalArgs, command: Commands) -> Result<(Option<Value>, bool)> {
    match command {
        Commands::Run {
            select,
            monitor,
            attempts,
            no_stop_on_success,
            prebuilt,
            json,
        } => {
            if attempts == 0 {
                return Err(anyhow!("--attempts must be at least 1"));
            }
            let (name, tests) = resolve_matrix(global, &select)?;
            let ctx = run_context(global)?;
            let monitor = CommandMonitor::new(monitor)?;
            let policy = RetryPolicy {
                max_attempts: attempts,
                stop_on_first_success: !no_stop_on_success,
            };

            info!(
                machines = global.machines,
                loggers = global.loggers,
                user = %global.user,
                project = %global.project,
                "setting up everything"
            );
            setup::write_hosts_file(
                &ctx.driver_dir.join("hosts.txt"),
                &global.project,
                global.machines + global.loggers,
            )?;
            setup::ensure_dir(&ctx.output_dir)?;
            if !prebuilt {
                setup::build_driver(&ctx.driver_dir)?;
            }
            setup::initial_kill(&ctx, global.machines)?;

            info!(name = %name, "starting tests");
            let launcher = DriverLauncher::new(ctx.clone());
            let monitor = Arc::new(monitor);
            let outcome =
                sweep_runner::run_matrix(&ctx, &launcher, monitor, policy, &name, &tests)?;
            let complete = outcome.complete();
            if json {
                return Ok((
                    Some(json!({
                        "ok": true,
                        "command": "run",
                        "outcome": outcome_to_json(&outcome)?,
                    })),
                    complete,
                ));
            }
            print_outcome(&outcome);
            Ok((None, complete))
        }
        Commands::Describe { select, json } => {
            let (name, tests) = resolve_matrix(global, &select)?;
            if json {
                return Ok((
                    Some(json!({
                        "ok": true,
                        "command": "describe",
                        "name": name,
                        "configurations": serde_json::to_value(&tests)?,
                    })),
                    true,
                ));
            }
            println!("name: {}", name);
            println!("configurations: {}", tests.len());
            for (i, t) in tests.iter().enumerate() {
                println!("{:>4}: {}", i, t);
            }
            Ok((None, true))
        }
        Commands::Kill => {
            setup::initial_kill(&run_context(global)?, global.machines)?;
            println!("ok");
            Ok((None, true))
        }
    }
}

fn run_context(global: &GlobalArgs) -> Result<RunContext> {
    let driver_dir = if global.driver_dir.is_absolute() {
        global.driver_dir.clone()
    } else {
        std::env::current_dir()?.join(&global.driver_dir)
    };
    let mut ctx = RunContext::new(&driver_dir, &global.driver_name);
    ctx.user = global.user.clone();
    ctx.host = global.host.clone();
    ctx.loggers = global.loggers;
    ctx.build = !global.nobuild;
    ctx.debug = !global.quiet_driver;
    if let Some(dir) = &global.output_dir {
        ctx.output_dir = dir.clone();
    }
    Ok(ctx)
}

fn resolve_matrix(global: &GlobalArgs, select: &MatrixSelect) -> Result<(String, Vec<TestConfig>)> {
    let (default_name, tests) = match &select.plan {
        Some(path) => {
            let stem = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("plan")
                .to_string();
            (stem, sweep_core::load_plan(path)?)
        }
        None => (
            select.matrix.default_name().to_string(),
            built_in_matrix(global, select)?,
        ),
    };
    let pin = if select.pin_topology {
        TopologyPin {
            machines: Some(global.machines),
            hosts_per_node: Some(global.hpn),
            branching_factor: Some(global.branch),
        }
    } else {
        TopologyPin::default()
    };
    let tests = if pin.is_empty() {
        tests
    } else {
        info!(?pin, "pinning topology on every configuration");
        matrix::pin_topology(&tests, &pin)
    };
    let name = select.name.clone().unwrap_or(default_name);
    if name.contains('/') || name.is_empty() {
        return Err(anyhow!("invalid report name '{}'", name));
    }
    Ok((name, tests))
}

fn built_in_matrix(global: &GlobalArgs, select: &MatrixSelect) -> Result<Vec<TestConfig>> {
    let m = global.machines;
    let tests = match select.matrix {
        MatrixArg::RateLoad => matrix::rate_load(m, global.hpn, global.branch, global.rounds),
        MatrixArg::Depth => {
            matrix::depth_sweep(m, global.hpn, select.low, select.high, select.step, global.rounds)?
        }
        MatrixArg::DepthFixed => matrix::depth_fixed(m, global.hpn, global.rounds),
        MatrixArg::Scale => matrix::scale_sweep(
            m,
            global.branch,
            select.low,
            select.high,
            select.mult,
            global.rounds,
        )?,
        MatrixArg::Failure => matrix::failure_table(m),
        MatrixArg::Voting => matrix::voting_table(m),
        MatrixArg::Full => matrix::full_cross(global.rounds),
        MatrixArg::Hosts => matrix::hosts_table(m),
        MatrixArg::Sign => matrix::sign_table(m),
        MatrixArg::Vote => matrix::vote_table(m),
    };
    if tests.is_empty() {
        return Err(anyhow!("matrix {:?} produced no configurations", select.matrix));
    }
    Ok(tests)
}

fn emit_json(value: &Value) {
    match serde_json::to_string(value) {
        Ok(s) => println!("{}", s),
        Err(_) => println!(
            "{{\"ok\":false,\"error\":{{\"code\":\"serialization_error\",\"message\":\"failed to serialize JSON payload\",\"details\":{{}}}}}}"
        ),
    }
}

fn json_error(code: &str, message: String, details: Value) -> Value {
    json!({
        "ok": false,
        "error": {
            "code": code,
            "message": message,
            "details": details
        }
    })
}

fn command_json_mode(command: &Commands) -> bool {
    match command {
        Commands::Run { json, .. } | Commands::Describe { json, .. } => *json,
        Commands::Kill => false,
    }
}

fn outcome_to_json(outcome: &MatrixOutcome) -> Result<Value> {
    Ok(serde_json::to_value(outcome)?)
}

fn print_outcome(outcome: &MatrixOutcome) {
    println!("name: {}", outcome.name);
    println!("report: {}", outcome.report_path.display());
    println!("configurations: {}", outcome.configurations);
    println!("rows_written: {}", outcome.rows_written);
    if !outcome.skipped.is_empty() {
        println!("skipped: {:?}", outcome.skipped);
    }
    println!("started_at: {}", outcome.started_at);
    println!("finished_at: {}", outcome.finished_at);
}
