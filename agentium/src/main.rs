//! `agentium` CLI.
//!
//! Runs one session described by a TOML file against a workdir, writes a
//! starter controller config, or inspects the routing table of a config.

use std::fs;
use std::path::{Path, PathBuf};

use agentium::adapter::AdapterRegistry;
use agentium::controller::{SessionController, SessionOutcome};
use agentium::core::event::AgentEvent;
use agentium::core::phase::recognized_keys;
use agentium::core::session::Session;
use agentium::exit_codes;
use agentium::io::config::{ControllerConfig, load_config, read_config, write_config};
use agentium::io::iteration_log::StatePaths;
use agentium::io::process::{CancelToken, LocalExecutor};
use agentium::io::tail::{DEFAULT_POLL_INTERVAL, EventTailer};
use agentium::logging;
use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};

const DEFAULT_CONFIG: &str = ".agentium/config.toml";

#[derive(Parser)]
#[command(
    name = "agentium",
    version,
    about = "Phase-driven session controller for coding-agent CLIs"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a session to completion and exit with its stop code.
    Run {
        /// Session description (TOML).
        #[arg(short, long)]
        session: PathBuf,
        /// Controller config; defaults apply when the file is missing.
        #[arg(short, long, default_value = DEFAULT_CONFIG)]
        config: PathBuf,
        /// Repository checkout the agent works in.
        #[arg(short, long, default_value = ".")]
        workdir: PathBuf,
        /// Print agent events to stderr as they are recorded.
        #[arg(long)]
        watch: bool,
    },
    /// Write a controller config with every default spelled out.
    Init {
        #[arg(short, long, default_value = DEFAULT_CONFIG)]
        config: PathBuf,
        /// Replace an existing file.
        #[arg(long)]
        force: bool,
    },
    /// Print the resolved adapter/model for every phase key.
    Routing {
        #[arg(short, long, default_value = DEFAULT_CONFIG)]
        config: PathBuf,
    },
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::ERROR);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run {
            session,
            config,
            workdir,
            watch,
        } => cmd_run(&session, &config, &workdir, watch),
        Command::Init { config, force } => cmd_init(&config, force),
        Command::Routing { config } => cmd_routing(&config),
    }
}

fn cmd_run(session_path: &Path, config_path: &Path, workdir: &Path, watch: bool) -> Result<i32> {
    let raw = fs::read_to_string(session_path)
        .with_context(|| format!("read {}", session_path.display()))?;
    let mut session: Session =
        toml::from_str(&raw).with_context(|| format!("parse {}", session_path.display()))?;
    let config = load_config(&workdir.join(config_path))?;
    let registry = AdapterRegistry::with_defaults(&config.images);
    let executor = LocalExecutor;

    let controller = SessionController::new(&executor, &registry, &config, workdir)?;
    cancel_on_interrupt(controller.cancel_token())?;
    let tailer = watch.then(|| {
        let events = StatePaths::new(workdir, &config.state_dir).events_path(&session.id);
        EventTailer::spawn(events, DEFAULT_POLL_INTERVAL, |event| {
            eprintln!("{}", event_line(&event));
        })
    });
    let outcome = controller.run(&mut session);
    if let Some(tailer) = tailer {
        tailer.stop()?;
    }
    let outcome = outcome?;
    print_outcome(&outcome);
    Ok(exit_codes::for_stop(&outcome.stop))
}

/// Ctrl-C and SIGTERM stop the in-flight agent and end the session as cancelled.
fn cancel_on_interrupt(cancel: CancelToken) -> Result<()> {
    ctrlc::set_handler(move || {
        tracing::warn!("interrupt received, cancelling session");
        cancel.cancel();
    })
    .context("install interrupt handler")
}

fn cmd_init(config_path: &Path, force: bool) -> Result<i32> {
    if config_path.exists() && !force {
        return Err(anyhow!(
            "{} already exists (use --force to replace it)",
            config_path.display()
        ));
    }
    write_config(config_path, &ControllerConfig::default())?;
    println!("wrote {}", config_path.display());
    Ok(exit_codes::OK)
}

fn event_line(event: &AgentEvent) -> String {
    format!(
        "[{} #{}] {}: {}",
        event.adapter,
        event.iteration,
        event.kind.as_str(),
        event.summary
    )
}

fn cmd_routing(config_path: &Path) -> Result<i32> {
    let config = read_config(config_path)?;
    let router = config.router();
    for key in recognized_keys() {
        let model = router.model_for_phase(&key);
        println!(
            "{key}\t{}\t{}\t{}",
            or_dash(&model.adapter),
            or_dash(&model.model),
            or_dash(&model.reasoning)
        );
    }
    let adapters = router.adapters();
    if !adapters.is_empty() {
        println!("adapters: {}", adapters.join(", "));
    }
    let unknown = router.unknown_phases();
    if unknown.is_empty() {
        return Ok(exit_codes::OK);
    }
    eprintln!("unknown phase keys: {}", unknown.join(", "));
    Ok(exit_codes::ERROR)
}

fn print_outcome(outcome: &SessionOutcome) {
    println!("session {}: {:?}", outcome.session_id, outcome.stop);
    println!("invocations: {}", outcome.invocations);
    let phases: Vec<&str> = outcome
        .phases_completed
        .iter()
        .map(|phase| phase.as_str())
        .collect();
    println!("phases completed: {}", or_dash(&phases.join(", ")));
    if !outcome.prs_created.is_empty() {
        println!("prs created: #{}", outcome.prs_created.join(", #"));
    }
    println!(
        "tokens: {} in / {} out",
        outcome.tokens.input, outcome.tokens.output
    );
}

fn or_dash(value: &str) -> &str {
    if value.is_empty() { "-" } else { value }
}
