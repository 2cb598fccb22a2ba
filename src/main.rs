//! StageRunner Worker Entry Point
//!
//! Runs the stage consumer until interrupted.
//!
//! # Usage
//!
//! ```bash
//! # Process the runs and pending messages in a fixture
//! stagerunner --runs runs.yaml
//!
//! # Load settings from a config file, override the partition count
//! stagerunner --config worker.yaml --partitions 8
//!
//! # Retry failed stages and persist completed-stage markers
//! stagerunner --runs runs.yaml --max-stage-attempts 3 --ledger .stagerunner/ledger.jsonl
//! ```

use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

use log::{error, info, warn};
use tokio::sync::watch;

use stagerunner::broker::{MemoryLog, MessageLog};
use stagerunner::consumer::StageConsumer;
use stagerunner::execution::{default_registry, StageEngine};
use stagerunner::workflow::{load_fixture, FileStageLedger, MemoryRunStore, PathTemplateRenderer};
use stagerunner::{WorkerConfig, APP_NAME, VERSION};

/// Command-line overrides parsed from arguments.
#[derive(Debug, Default)]
struct CliArgs {
    config_path: Option<PathBuf>,
    runs_file: Option<PathBuf>,
    ledger_file: Option<PathBuf>,
    topic: Option<String>,
    group: Option<String>,
    partitions: Option<u32>,
    max_stage_attempts: Option<u32>,
    stage_timeout_ms: Option<u64>,
    verbose: bool,
}

impl CliArgs {
    /// Applies the flags that were given on top of `config`.
    fn apply(self, config: &mut WorkerConfig) {
        if let Some(path) = self.runs_file {
            config.runs_file = Some(path);
        }
        if let Some(path) = self.ledger_file {
            config.ledger_file = Some(path);
        }
        if let Some(topic) = self.topic {
            config.consumer.topic = topic;
        }
        if let Some(group) = self.group {
            config.consumer.group = group;
        }
        if let Some(partitions) = self.partitions {
            config.partitions = partitions;
        }
        if let Some(attempts) = self.max_stage_attempts {
            config.consumer.max_stage_attempts = attempts;
        }
        if let Some(ms) = self.stage_timeout_ms {
            config.stage_timeout_ms = Some(ms);
        }
        config.verbose |= self.verbose;
    }
}

/// Configures the logging system with appropriate formatting.
fn setup_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            use std::io::Write;

            match record.level() {
                log::Level::Warn | log::Level::Error => {
                    writeln!(buf, "[{}] {}", record.level(), record.args())
                }
                _ => writeln!(buf, "{}", record.args()),
            }
        })
        .init();
}

/// Prints the application banner with version information.
fn print_banner() {
    println!();
    println!("{} v{}", APP_NAME, VERSION);
    println!("Workflow Stage Worker");
    println!();
}

/// Prints usage information.
fn print_usage() {
    println!("Usage: stagerunner [OPTIONS]");
    println!();
    println!("Options:");
    println!("  --config PATH             Load settings from a YAML file");
    println!("  --runs PATH               Run fixture (runs and pending stage messages)");
    println!("  --ledger PATH             Persist completed-stage markers to PATH");
    println!("  --topic NAME              Stage message topic");
    println!("  --group NAME              Consumer group");
    println!("  --partitions N            Partitions of the topic");
    println!("  --max-stage-attempts N    Attempts per stage before dead-lettering");
    println!("  --stage-timeout-ms MS     Upper bound for one executor call");
    println!("  --verbose                 Enable debug logging");
    println!("  --help                    Show this help message");
    println!("  --version                 Show version information");
    println!();
    println!("Examples:");
    println!("  stagerunner --runs runs.yaml");
    println!("  stagerunner --config worker.yaml --partitions 8");
}

/// Returns the value following flag `name`.
fn flag_value<'a>(args: &'a [String], i: &mut usize, name: &str) -> Result<&'a str, String> {
    *i += 1;
    args.get(*i)
        .map(String::as_str)
        .ok_or_else(|| format!("{} requires an argument", name))
}

fn parse_number<T: std::str::FromStr>(value: &str, name: &str) -> Result<T, String> {
    value
        .parse()
        .map_err(|_| format!("Invalid {} value: {}", name, value))
}

/// Parses command-line arguments into overrides.
fn parse_arguments(args: &[String]) -> Result<CliArgs, String> {
    let mut cli = CliArgs::default();
    let mut i = 1; // Skip program name

    while i < args.len() {
        let arg = args[i].as_str();

        match arg {
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("{} {}", APP_NAME, VERSION);
                std::process::exit(0);
            }
            "--verbose" | "-v" => cli.verbose = true,
            "--config" => cli.config_path = Some(flag_value(args, &mut i, arg)?.into()),
            "--runs" => cli.runs_file = Some(flag_value(args, &mut i, arg)?.into()),
            "--ledger" => cli.ledger_file = Some(flag_value(args, &mut i, arg)?.into()),
            "--topic" => cli.topic = Some(flag_value(args, &mut i, arg)?.to_string()),
            "--group" => cli.group = Some(flag_value(args, &mut i, arg)?.to_string()),
            "--partitions" => {
                cli.partitions = Some(parse_number(flag_value(args, &mut i, arg)?, arg)?)
            }
            "--max-stage-attempts" => {
                cli.max_stage_attempts = Some(parse_number(flag_value(args, &mut i, arg)?, arg)?)
            }
            "--stage-timeout-ms" => {
                cli.stage_timeout_ms = Some(parse_number(flag_value(args, &mut i, arg)?, arg)?)
            }
            other => return Err(format!("Unknown argument: {}", other)),
        }
        i += 1;
    }

    Ok(cli)
}

/// Resolves the final configuration from file and flags.
fn resolve_config(cli: CliArgs) -> Result<WorkerConfig, Box<dyn std::error::Error>> {
    let mut config = match &cli.config_path {
        Some(path) => WorkerConfig::load(path)?,
        None => WorkerConfig::default(),
    };
    cli.apply(&mut config);
    config.validate()?;
    Ok(config)
}

/// Main application entry point.
async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    let cli = parse_arguments(&args).map_err(|e| {
        eprintln!("Error: {}", e);
        eprintln!();
        print_usage();
        e
    })?;

    let config = resolve_config(cli)?;

    setup_logging(config.verbose);
    print_banner();

    // Load runs and anything the trigger side already queued
    let fixture = match &config.runs_file {
        Some(path) => load_fixture(path).map_err(|e| {
            error!("Failed to load runs: {}", e);
            e
        })?,
        None => {
            warn!("No run fixture given - waiting for messages with an empty run store");
            Default::default()
        }
    };

    let topic = config.consumer.topic.clone();
    let log = Arc::new(MemoryLog::new().with_topic(&topic, config.partitions));
    for message in &fixture.pending {
        let key = config
            .consumer
            .key_by_run
            .then_some(message.run_id.as_str());
        log.publish(&topic, key, message.to_payload()).await?;
    }
    info!(
        "Loaded {} runs, queued {} stage messages on '{}'",
        fixture.runs.len(),
        fixture.pending.len(),
        topic
    );

    // Assemble the engine
    let mut engine = StageEngine::new(
        Arc::new(MemoryRunStore::from_runs(fixture.runs)),
        Arc::new(PathTemplateRenderer::new()),
        default_registry(),
    );
    if let Some(path) = &config.ledger_file {
        engine.set_ledger(Arc::new(FileStageLedger::open_with_capacity(
            path,
            config.ledger_capacity,
        )?));
    }
    if let Some(timeout) = config.stage_timeout() {
        engine.set_stage_timeout(timeout);
    }
    info!("Executors: {:?}", engine.executors().kinds());

    let consumer = StageConsumer::new(log, Arc::new(engine), config.consumer.clone());
    let stats = consumer.stats();

    // Stop on Ctrl-C
    let (stop, shutdown) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Interrupt received - finishing in-flight messages"),
            Err(e) => error!("Failed to listen for interrupt: {}", e),
        }
        let _ = stop.send(true);
    });

    let started = Instant::now();
    let result = consumer.run(shutdown).await;

    println!();
    println!("{}", stats.snapshot());
    println!("Uptime: {:.2?}", started.elapsed());

    result?;
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!();
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
