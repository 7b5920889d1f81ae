//! CLI argument parsing using clap v4
//!
//! Defines the command-line interface for remote-exec.

use clap::{Args, Parser, Subcommand, ValueEnum};

/// remote-exec - Plugin execution core for remote workflow tasks
///
/// Drives workflow tasks through admission, submission and completion on a
/// remote query service, and inspects the configuration that controls it.
#[derive(Parser, Debug)]
#[command(name = "remote-exec")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a batch of query tasks through the engine
    Run(RunArgs),

    /// Show the admission namespace a task would be assigned
    Namespace {
        /// Path to configuration file
        #[arg(short, long, env = "REMOTE_EXEC_CONFIG")]
        config: Option<String>,

        /// Project of the task
        #[arg(long)]
        project: String,

        /// Domain of the task
        #[arg(long)]
        domain: String,

        /// Cluster label override from the task template
        #[arg(long)]
        label: Option<String>,
    },

    /// Display version and build information
    Version {
        /// Print build information as JSON
        #[arg(long)]
        json: bool,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

/// Final status of simulated commands
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulatedOutcome {
    Done,
    Error,
}

/// Arguments of the `run` command
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Path to configuration file
    #[arg(short, long, env = "REMOTE_EXEC_CONFIG")]
    pub config: Option<String>,

    /// Number of tasks to run
    #[arg(short = 'n', long, default_value = "4")]
    pub tasks: u32,

    /// Project the tasks belong to
    #[arg(long, default_value = "analytics")]
    pub project: String,

    /// Domain the tasks belong to
    #[arg(long, default_value = "development")]
    pub domain: String,

    /// Cluster label override written into each task template
    #[arg(long)]
    pub label: Option<String>,

    /// Query to run; may reference the `ds` input as {{ .inputs.ds }}
    #[arg(long, default_value = "select count(*) from events where ds = '{{ .inputs.ds }}'")]
    pub query: String,

    /// Task type used to select the plugin
    #[arg(long, default_value = "hive")]
    pub task_type: String,

    /// Submit to the configured query service instead of the simulated one
    #[arg(long)]
    pub live: bool,

    /// Simulated service: reject this many submissions before accepting
    #[arg(long, default_value = "0")]
    pub fail_submits: u32,

    /// Simulated service: status every command finishes with
    #[arg(long, value_enum, default_value = "done")]
    pub outcome: SimulatedOutcome,

    /// Delay between reconciliation ticks, in milliseconds
    #[arg(long, default_value = "50")]
    pub tick_ms: u64,

    /// Ticks before a task is given up on
    #[arg(long, default_value = "600")]
    pub max_ticks: u32,

    /// Override the cache refresh period, in milliseconds
    /// (defaults to 200 against the simulated service)
    #[arg(long)]
    pub resync_ms: Option<u64>,

    /// Print outcomes as JSON
    #[arg(long)]
    pub json: bool,
}

/// Configuration subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum ConfigSubcommand {
    /// Display the current configuration
    Show {
        /// Path to configuration file
        #[arg(short, long)]
        config: Option<String>,
    },

    /// Initialize a new configuration file
    Init {
        /// Path where to create the config file
        #[arg(short, long)]
        path: Option<String>,

        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Validate a configuration file
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        config: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_defaults() {
        let cli = Cli::try_parse_from(["remote-exec", "run"]).unwrap();
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.tasks, 4);
                assert_eq!(args.task_type, "hive");
                assert_eq!(args.outcome, SimulatedOutcome::Done);
                assert!(!args.live);
                assert!(args.resync_ms.is_none());
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_namespace_requires_project() {
        assert!(Cli::try_parse_from(["remote-exec", "namespace", "--domain", "d"]).is_err());
    }

    #[test]
    fn test_verbosity_is_global() {
        let cli = Cli::try_parse_from(["remote-exec", "version", "-vv"]).unwrap();
        assert_eq!(cli.verbose, 2);
    }
}
