//! HITL Orchestrator - human-gated workflow engine
//!
//! Entry point for the orchestrator binary. Each invocation loads the
//! engine from the context store, applies one command and exits; `watch`
//! stays up and sweeps for overdue checkpoints.

mod capability;
mod checkpoint;
mod cli;
mod clock;
mod config;
mod context;
mod engine;
mod error;
mod logging;
mod rules;
mod version;
mod workflow;

use std::path::Path;
use std::time::Duration;

use clap::Parser;
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info};

use crate::capability::{Capability, Registration};
use crate::checkpoint::{Checkpoint, GateState, Verdict};
use crate::cli::{CapabilitySubcommand, Cli, Commands, ConfigSubcommand, VerdictArg};
use crate::config::OrchestratorConfig;
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::workflow::Goal;

fn main() -> Result<()> {
    // Parse CLI arguments first (before logging, so we know verbosity)
    let cli = Cli::parse();

    match &cli.command {
        Commands::Version => {
            version::print_version();
            return Ok(());
        }
        Commands::Config { subcommand } => {
            logging::init_simple(tracing::Level::WARN)?;
            return exit_on_error(handle_config_command(
                subcommand.clone(),
                cli.config.as_deref(),
            ));
        }
        _ => {}
    }

    let config = match OrchestratorConfig::load(cli.config.as_deref()) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprint!("{}", e.format_for_terminal());
            std::process::exit(e.exit_code());
        }
    };

    // The guards must be kept alive for the lifetime of the program
    let _log_guards = logging::init_logging(&config.logging, cli.verbose, cli.quiet)?;

    let build = version::build_info();
    debug!(
        version = %build.full_version(),
        target = %build.target,
        profile = %build.profile,
        "Starting HITL Orchestrator"
    );

    exit_on_error(run_command(cli.command, &config))
}

/// Print a failed command the way the terminal expects and exit with its code
fn exit_on_error(result: Result<()>) -> Result<()> {
    if let Err(e) = result {
        tracing::error!(error = %e.format_for_log(), "Command failed");
        eprint!("{}", e.format_for_terminal());
        std::process::exit(e.exit_code());
    }
    Ok(())
}

fn run_command(command: Commands, config: &OrchestratorConfig) -> Result<()> {
    let engine = Engine::from_config(config)?;

    match command {
        Commands::Start { goal } => {
            let goal = Goal::load(&goal)?;
            let run = engine.start(goal)?;
            println!("{}", run);
        }
        Commands::Status { run, json } => {
            let report = engine.status(&run)?;
            if json {
                print_json(&report)?;
            } else {
                print!("{}", report);
            }
        }
        Commands::Runs { json } => {
            let runs = engine.list_runs();
            if json {
                print_json(&runs)?;
            } else if runs.is_empty() {
                println!("No runs.");
            } else {
                for run in runs {
                    println!("{}", run);
                }
            }
        }
        Commands::History { run, json } => {
            let journal = engine.history(&run)?;
            if json {
                print_json(&journal)?;
            } else {
                for record in journal {
                    println!(
                        "{:>4} {} [{}] {}: {} -> {}  {}",
                        record.seq,
                        record.at.format("%Y-%m-%d %H:%M:%S"),
                        record.severity,
                        record.subject,
                        record.from,
                        record.to,
                        record.message
                    );
                }
            }
        }
        Commands::Submit {
            run,
            task,
            artifact,
        } => {
            let artifact = read_artifact(&artifact)?;
            let ckpt = engine.submit_artifact(&run, &task, artifact)?;
            print_checkpoint(&ckpt);
        }
        Commands::Decide {
            checkpoint,
            verdict,
            reason,
            reviewer,
        } => {
            let verdict = match verdict {
                VerdictArg::Approve => Verdict::Approve,
                VerdictArg::Reject => Verdict::Reject {
                    reason: reason.unwrap_or_default(),
                },
            };
            let ckpt = engine.decide(&checkpoint, verdict, reviewer.as_deref())?;
            print_checkpoint(&ckpt);
        }
        Commands::Claim {
            checkpoint,
            reviewer,
        } => {
            let ckpt = engine.claim(&checkpoint, &reviewer)?;
            print_checkpoint(&ckpt);
        }
        Commands::AddTasks { run, file } => {
            let batch = Goal::load(&file)?;
            for id in engine.add_tasks(&run, batch.tasks)? {
                println!("{}", id);
            }
        }
        Commands::Suspend { run } => {
            engine.suspend(&run)?;
            println!("{} SUSPENDED", run);
        }
        Commands::Resume { run } => {
            let assigned = engine.resume(&run)?;
            println!("{} RUNNING ({} task(s) assigned)", run, assigned.len());
        }
        Commands::Abort { run, task } => {
            for id in engine.abort(&run, task.as_deref())? {
                println!("{} ABORTED", id);
            }
        }
        Commands::Escalate => {
            for (run, ckpt) in engine.escalate_overdue()? {
                println!("{} {} ESCALATED", run, ckpt);
            }
        }
        Commands::Watch { interval } => {
            let every = interval.unwrap_or(config.engine.watch_interval_secs);
            run_watcher(&engine, Duration::from_secs(every))?;
        }
        Commands::Capability { subcommand } => handle_capability_command(&engine, subcommand)?,
        Commands::Version | Commands::Config { .. } => {
            // Already handled above
            unreachable!();
        }
    }

    Ok(())
}

/// Build the tokio runtime and sweep until Ctrl+C
fn run_watcher(engine: &Engine, every: Duration) -> Result<()> {
    if every.is_zero() {
        return Err(Error::config_field_invalid(
            "engine.watch_interval_secs",
            "Watch interval must be greater than 0",
        ));
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .worker_threads(2)
        .thread_name("hitl-watch")
        .build()
        .map_err(|e| Error::Internal(format!("Failed to create async runtime: {}", e)))?;

    runtime.block_on(async {
        let mut events = engine.subscribe();
        let printer = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => println!(
                        "{} {} {} -> {}  {}",
                        event.run_id,
                        event.record.subject,
                        event.record.from,
                        event.record.to,
                        event.record.message
                    ),
                    Err(RecvError::Lagged(missed)) => {
                        debug!(missed, "Event printer lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        let shutdown = async {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutdown signal received");
            }
        };
        let result = engine.watch(every, shutdown).await;
        printer.abort();
        result
    })
}

fn handle_capability_command(engine: &Engine, subcommand: CapabilitySubcommand) -> Result<()> {
    match subcommand {
        CapabilitySubcommand::Register { file } => {
            let capability = Capability::load(&file)?;
            let id = capability.id.clone();
            let outcome = engine.register_capability(capability)?;
            let verb = match outcome.registration {
                Registration::Inserted => "registered",
                Registration::Unchanged => "unchanged",
                Registration::Replaced => "updated",
            };
            println!("{} {}", id, verb);
            for (run, task) in outcome.unblocked {
                println!("{}/{} assigned", run, task);
            }
        }
        CapabilitySubcommand::Deregister { id } => {
            let removed = engine.deregister_capability(&id)?;
            println!("{} deregistered", removed.id);
        }
        CapabilitySubcommand::List { tags, json } if !tags.is_empty() => {
            let matches = engine.lookup(&tags.into_iter().collect());
            if json {
                print_json(&matches)?;
            } else if matches.is_empty() {
                println!("No capability covers those tags.");
            } else {
                matches.iter().for_each(print_capability);
            }
        }
        CapabilitySubcommand::List { json, .. } => {
            let entries = engine.capabilities();
            if json {
                print_json(&entries)?;
            } else if entries.is_empty() {
                println!("No capabilities registered.");
            } else {
                entries.iter().for_each(|e| print_capability(&e.capability));
            }
        }
    }
    Ok(())
}

/// Handle configuration subcommands
fn handle_config_command(subcommand: ConfigSubcommand, config: Option<&str>) -> Result<()> {
    match subcommand {
        ConfigSubcommand::Show => {
            let cfg = OrchestratorConfig::load(config)?;
            println!("{}", toml::to_string_pretty(&cfg)?);
        }
        ConfigSubcommand::Init { path, force } => {
            let written = config::init_config(path.as_deref(), force)?;
            println!("Configuration written to {}", written.display());
        }
        ConfigSubcommand::Validate => {
            OrchestratorConfig::load(config)?;
            println!("Configuration is valid.");
        }
    }
    Ok(())
}

fn read_artifact(path: &Path) -> Result<serde_json::Value> {
    let content = std::fs::read(path).map_err(|e| Error::IoRead {
        path: path.to_path_buf(),
        source: e,
    })?;
    Ok(serde_json::from_slice(&content)?)
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_capability(cap: &Capability) {
    let tags: Vec<&str> = cap.specialization.iter().map(String::as_str).collect();
    println!("{:<20} {:<14} {}", cap.id, cap.context_scope.slug(), tags.join(","));
}

fn print_checkpoint(ckpt: &Checkpoint) {
    println!("{} {}", ckpt.id, ckpt.state);
    if ckpt.state == GateState::Rejected {
        for failure in ckpt.validation.failures() {
            println!("  {}: {}", failure.rule, failure.message);
        }
        if let Some(reason) = &ckpt.rejection_reason {
            println!("  reason: {}", reason);
        }
    }
}
