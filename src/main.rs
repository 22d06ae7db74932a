mod capabilities;
mod config;
mod policy;
mod render;
mod runtime;
mod sandbox;
mod server;

use std::io::Read;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::sandbox::cleanup::sweep_expired;
use crate::sandbox::orchestrator::{ExecutionResult, JobOrchestrator, JobRunner, WorkerCommand};

const DEFAULT_CONFIG_PATH: &str = "config/docsandbox.toml";

fn print_help() {
    println!(
        "\
docsandbox v{}

Runs untrusted document-generation scripts in an isolated worker process.

USAGE:
    docsandbox [OPTIONS] <COMMAND>

COMMANDS:
    run [--caller ID] <SCRIPT|->    Run one script and print its result as JSON
    serve                           Serve line-delimited JSON jobs on stdin/stdout
    sweep                           Remove job directories past their retention window

OPTIONS:
    -c, --config PATH    Path to TOML configuration file [default: {DEFAULT_CONFIG_PATH}]
    -h, --help           Print this help message and exit
    -V, --version        Print version and exit

ENVIRONMENT VARIABLES:
    Variables are referenced in the config file via ${{VAR_NAME}} syntax.

    RUST_LOG    Log level filter for tracing, also passed to workers
                (e.g. debug, docsandbox=debug,warn)

EXAMPLES:
    docsandbox run report.js                      # uses {DEFAULT_CONFIG_PATH}
    echo \"$SRC\" | docsandbox run --caller bob -   # script from stdin
    docsandbox --config /etc/docsandbox.toml serve
    RUST_LOG=debug docsandbox run report.js       # with debug logging",
        env!("CARGO_PKG_VERSION"),
    );
}

enum Command {
    Run { caller: String, script: String },
    Serve,
    Sweep,
    Worker(Vec<String>),
}

struct Cli {
    config_path: String,
    command: Command,
}

impl Cli {
    fn parse(args: Vec<String>) -> Result<Self> {
        let mut config_path = DEFAULT_CONFIG_PATH.to_string();
        let mut args = args.into_iter();

        let name = loop {
            let Some(arg) = args.next() else {
                bail!("missing command (try --help)");
            };
            match arg.as_str() {
                "--config" | "-c" => {
                    config_path = args.next().context("--config needs a path")?;
                }
                flag if flag.starts_with('-') => bail!("unknown option {flag}"),
                _ => break arg,
            }
        };

        let command = match name.as_str() {
            "run" => {
                let mut caller = "cli".to_string();
                let mut script = None;
                while let Some(arg) = args.next() {
                    match arg.as_str() {
                        "--caller" => caller = args.next().context("--caller needs an id")?,
                        "-" => script = Some(arg),
                        flag if flag.starts_with("--") => bail!("unknown run option {flag}"),
                        _ if script.is_some() => bail!("run takes a single script"),
                        _ => script = Some(arg),
                    }
                }
                Command::Run {
                    caller,
                    script: script.context("run needs a script path or '-'")?,
                }
            }
            "serve" => Command::Serve,
            "sweep" => Command::Sweep,
            "worker" => Command::Worker(args.collect()),
            other => bail!("unknown command '{other}' (try --help)"),
        };
        Ok(Self {
            config_path,
            command,
        })
    }
}

fn main() -> Result<()> {
    // Handle --help / --version before anything else
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.first().map(String::as_str) != Some("worker") {
        for arg in &args {
            match arg.as_str() {
                "--version" | "-V" => {
                    println!("docsandbox v{}", env!("CARGO_PKG_VERSION"));
                    std::process::exit(0);
                }
                "--help" | "-h" => {
                    print_help();
                    std::process::exit(0);
                }
                _ => {}
            }
        }
    }

    // Initialize logging (RUST_LOG=debug for debug mode). Stdout carries
    // results, so logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("docsandbox=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse(args)?;
    if let Command::Worker(worker_args) = cli.command {
        std::process::exit(sandbox::worker::run(worker_args));
    }

    info!("Loading configuration from {}", cli.config_path);
    let config = Config::load_or_default(&cli.config_path)
        .with_context(|| format!("cannot load {}", cli.config_path))?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("cannot start async runtime")?;
    let code = runtime.block_on(dispatch(cli.command, config))?;
    std::process::exit(code);
}

async fn dispatch(command: Command, config: Config) -> Result<i32> {
    let retention = config.sandbox.limits().retention;
    match command {
        Command::Run { caller, script } => {
            let source = read_script(&script)?;
            let orchestrator = build_orchestrator(&config)?;
            sweep_expired(orchestrator.root(), retention).await;
            let report = orchestrator.run_job(&source, &caller).await;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(match report.result {
                ExecutionResult::Success { .. } => 0,
                _ => 1,
            })
        }
        Command::Serve => {
            let orchestrator = build_orchestrator(&config)?;
            sweep_expired(orchestrator.root(), retention).await;
            let concurrency = config.sandbox.concurrency();
            info!(
                "Serving jobs on stdin (root {}, {} concurrent, {}s timeout)",
                orchestrator.root().display(),
                concurrency,
                orchestrator.limits().timeout.as_secs()
            );
            let runner: Arc<dyn JobRunner> = Arc::new(orchestrator);
            let stdin = tokio::io::BufReader::new(tokio::io::stdin());
            tokio::select! {
                result = server::serve(runner, concurrency, stdin, tokio::io::stdout()) => result?,
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutdown signal received, exiting");
                }
            }
            Ok(0)
        }
        Command::Sweep => {
            let removed = sweep_expired(&config.sandbox.root_dir, retention).await;
            println!("removed {removed} job director{}", if removed == 1 { "y" } else { "ies" });
            Ok(0)
        }
        Command::Worker(_) => bail!("worker runs outside the async runtime"),
    }
}

fn build_orchestrator(config: &Config) -> Result<JobOrchestrator> {
    let policy = Arc::new(config.policy.to_policy());
    info!(
        "Policy: imports [{}]",
        policy.imports().collect::<Vec<_>>().join(", ")
    );
    let worker = WorkerCommand::for_policy(config.sandbox.worker_program.clone(), &policy)?;
    Ok(JobOrchestrator::new(
        config.sandbox.root_dir.clone(),
        config.sandbox.limits(),
        policy,
        worker,
    ))
}

fn read_script(script: &str) -> Result<String> {
    if script == "-" {
        let mut source = String::new();
        std::io::stdin()
            .read_to_string(&mut source)
            .context("cannot read script from stdin")?;
        return Ok(source);
    }
    std::fs::read_to_string(script).with_context(|| format!("cannot read {script}"))
}
