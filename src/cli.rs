//! CLI argument parsing using clap v4
//!
//! Defines the command surface of the orchestrator. Every command is one
//! invocation against the persistent context store.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// HITL Orchestrator - human-gated workflow engine
///
/// Decomposes goals into task graphs, delegates tasks to registered
/// capabilities, and holds every artifact at a checkpoint until a human
/// approves or rejects it.
#[derive(Parser, Debug)]
#[command(name = "hitl-orchestrator")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to configuration file
    #[arg(short, long, env = "HITL_CONFIG", global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start a run from a goal file
    Start {
        /// TOML goal document with [[task]] entries
        #[arg(short, long)]
        goal: PathBuf,
    },

    /// Show a run's tasks and checkpoints
    Status {
        run: String,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// List known runs
    Runs {
        #[arg(long)]
        json: bool,
    },

    /// Print a run's transition journal
    History {
        run: String,

        #[arg(long)]
        json: bool,
    },

    /// Submit a worker artifact for a task
    Submit {
        run: String,
        task: String,

        /// JSON file holding the artifact
        #[arg(short, long)]
        artifact: PathBuf,
    },

    /// Record a human decision on a checkpoint
    Decide {
        checkpoint: String,

        #[arg(value_enum)]
        verdict: VerdictArg,

        /// Reason for a rejection
        #[arg(long, required_if_eq("verdict", "reject"))]
        reason: Option<String>,

        /// Who is deciding
        #[arg(long, env = "HITL_REVIEWER")]
        reviewer: Option<String>,
    },

    /// Claim a checkpoint for review
    Claim {
        checkpoint: String,

        #[arg(long, env = "HITL_REVIEWER")]
        reviewer: String,
    },

    /// Admit worker-emitted sub-tasks into a running run
    AddTasks {
        run: String,

        /// TOML file with [[task]] entries
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Suspend a running run
    Suspend { run: String },

    /// Resume a suspended run from its latest snapshot
    Resume { run: String },

    /// Abort a run, or one task and everything depending on it
    Abort {
        run: String,

        #[arg(long)]
        task: Option<String>,
    },

    /// Escalate every checkpoint past its review window, once
    Escalate,

    /// Keep sweeping for overdue checkpoints until interrupted
    Watch {
        /// Seconds between sweeps (overrides engine.watch_interval_secs)
        #[arg(long)]
        interval: Option<u64>,
    },

    /// Capability registry management
    Capability {
        #[command(subcommand)]
        subcommand: CapabilitySubcommand,
    },

    /// Display version and build information
    Version,

    /// Configuration management
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerdictArg {
    Approve,
    Reject,
}

/// Capability subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum CapabilitySubcommand {
    /// Register a capability from a TOML descriptor
    Register {
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Remove a capability with no active assignments
    Deregister { id: String },

    /// List registered capabilities
    List {
        /// Only capabilities covering these tags, most specific first
        #[arg(short, long, value_delimiter = ',')]
        tags: Vec<String>,

        #[arg(long)]
        json: bool,
    },
}

/// Configuration subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum ConfigSubcommand {
    /// Display the current configuration
    Show,

    /// Initialize a new configuration file
    Init {
        /// Path where to create the config file
        #[arg(short, long)]
        path: Option<String>,

        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Validate the configuration file
    Validate,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_start_command() {
        let cli = Cli::parse_from(["hitl-orchestrator", "start", "--goal", "goal.toml"]);
        match cli.command {
            Commands::Start { goal } => assert_eq!(goal, PathBuf::from("goal.toml")),
            _ => panic!("Expected Start command"),
        }
    }

    #[test]
    fn test_global_config_after_subcommand() {
        let cli = Cli::parse_from(["hitl-orchestrator", "runs", "--config", "/etc/hitl.toml"]);
        assert_eq!(cli.config, Some("/etc/hitl.toml".to_string()));
    }

    #[test]
    fn test_decide_approve() {
        let cli = Cli::parse_from([
            "hitl-orchestrator",
            "decide",
            "ckpt-1",
            "approve",
            "--reviewer",
            "dana",
        ]);
        match cli.command {
            Commands::Decide {
                checkpoint,
                verdict,
                reason,
                reviewer,
            } => {
                assert_eq!(checkpoint, "ckpt-1");
                assert_eq!(verdict, VerdictArg::Approve);
                assert!(reason.is_none());
                assert_eq!(reviewer.as_deref(), Some("dana"));
            }
            _ => panic!("Expected Decide command"),
        }
    }

    #[test]
    fn test_reject_requires_reason() {
        let result = Cli::try_parse_from(["hitl-orchestrator", "decide", "ckpt-1", "reject"]);
        assert!(result.is_err());

        let cli = Cli::parse_from([
            "hitl-orchestrator",
            "decide",
            "ckpt-1",
            "reject",
            "--reason",
            "missing tests",
        ]);
        match cli.command {
            Commands::Decide { reason, .. } => {
                assert_eq!(reason.as_deref(), Some("missing tests"))
            }
            _ => panic!("Expected Decide command"),
        }
    }

    #[test]
    fn test_abort_single_task() {
        let cli = Cli::parse_from(["hitl-orchestrator", "abort", "run-1", "--task", "t2"]);
        match cli.command {
            Commands::Abort { run, task } => {
                assert_eq!(run, "run-1");
                assert_eq!(task.as_deref(), Some("t2"));
            }
            _ => panic!("Expected Abort command"),
        }
    }

    #[test]
    fn test_capability_register() {
        let cli = Cli::parse_from([
            "hitl-orchestrator",
            "capability",
            "register",
            "--file",
            "coder.toml",
        ]);
        match cli.command {
            Commands::Capability {
                subcommand: CapabilitySubcommand::Register { file },
            } => assert_eq!(file, PathBuf::from("coder.toml")),
            _ => panic!("Expected Capability Register command"),
        }
    }

    #[test]
    fn test_verbose_flags() {
        let cli = Cli::parse_from(["hitl-orchestrator", "-vv", "version"]);
        assert_eq!(cli.verbose, 2);
        assert!(!cli.quiet);
    }

    #[test]
    fn test_quiet_flag() {
        let cli = Cli::parse_from(["hitl-orchestrator", "--quiet", "version"]);
        assert!(cli.quiet);
    }

    #[test]
    fn test_config_init() {
        let cli = Cli::parse_from(["hitl-orchestrator", "config", "init", "--force"]);
        match cli.command {
            Commands::Config {
                subcommand: ConfigSubcommand::Init { path, force },
            } => {
                assert!(path.is_none());
                assert!(force);
            }
            _ => panic!("Expected Config Init command"),
        }
    }
}
