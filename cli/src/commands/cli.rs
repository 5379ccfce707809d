use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};

#[derive(Parser, Debug, Clone)]
#[command(version, about = "Run package-manager operations in isolated worker processes")]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file. Defaults to ./pkgpilot.toml, then the user
    /// config directory.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log filter for this process, e.g. `debug` or `pkgpilot.reader=trace`.
    #[arg(long, global = true)]
    pub log_level: Option<String>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run one operation in a fresh worker process.
    Run(RunArgs),
    /// Print the shell command line equivalent to an operation.
    Render(BundleArgs),
    /// Send requests to a persistent query worker.
    Query(QueryArgs),
    #[command(hide = true)]
    Worker(WorkerArgs),
}

#[derive(ClapArgs, Debug, Clone)]
pub struct BundleArgs {
    /// Operation name (a tool subcommand such as `install`, or a built-in).
    pub operation: String,

    /// Recipe path passed to the tool after the subcommand.
    #[arg(long)]
    pub recipe: Option<PathBuf>,

    /// Working directory of the invocation.
    #[arg(long)]
    pub cwd: Option<PathBuf>,

    /// Extra environment variable (KEY=VALUE). Can be specified multiple times.
    #[arg(long = "env", value_name = "KEY=VALUE", action = clap::ArgAction::Append)]
    pub env: Vec<String>,

    /// Variable to remove from the environment. Can be specified multiple times.
    #[arg(long = "unset", value_name = "KEY", action = clap::ArgAction::Append)]
    pub unset: Vec<String>,

    /// Named argument for the operation (NAME=VALUE). Repeating a name makes a list.
    #[arg(long = "set", value_name = "NAME=VALUE", action = clap::ArgAction::Append)]
    pub named: Vec<String>,

    /// Report how long the operation took.
    #[arg(long, default_value_t = false)]
    pub timed: bool,

    /// Positional arguments for the operation.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub bundle: BundleArgs,

    /// Print the result as JSON on stdout.
    #[arg(long, default_value_t = false)]
    pub json: bool,

    /// Overrides `runner.invocation_timeout_ms`.
    #[arg(long)]
    pub timeout_ms: Option<u64>,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct QueryArgs {
    /// Requests, each `command` or `command?key=value&...`.
    #[arg(required = true)]
    pub requests: Vec<String>,

    /// Print each result as a JSON line on stdout.
    #[arg(long, default_value_t = false)]
    pub json: bool,

    /// Overrides `server.request_timeout_ms`.
    #[arg(long)]
    pub timeout_ms: Option<u64>,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct WorkerArgs {
    #[command(subcommand)]
    pub command: WorkerCommands,
}

#[derive(Subcommand, Debug, Clone)]
pub enum WorkerCommands {
    /// Read one parameter bundle from stdin and run it.
    Run {
        #[arg(long)]
        invocation: String,
    },
    /// Serve query requests from stdin until `end`.
    Serve {
        #[arg(long)]
        session: String,
    },
}
