use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::api::ConfigDomain;

/// warden - install, supervise and update the local AgentGuard daemon
#[derive(Parser, Debug)]
#[command(name = "warden", version, about)]
pub struct Cli {
    /// Output results as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Load this config file on top of ~/.warden/config.toml
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Log lifecycle decisions to stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the daemon, installing it first if needed
    Start,

    /// Stop the daemon if warden started it
    Stop,

    /// Stop, then start the daemon
    Restart,

    /// Show the daemon state
    Status,

    /// Install the latest release and restart the daemon
    Update,

    /// Compare installed versions against the latest releases
    CheckUpdate,

    /// Start the daemon and keep watching it until interrupted
    Run(RunArgs),

    /// Talk to the daemon's local API
    Api(ApiArgs),
}

#[derive(clap::Args, Debug)]
pub struct RunArgs {
    /// Seconds between health checks
    #[arg(long, default_value_t = 5, value_parser = clap::value_parser!(u64).range(1..))]
    pub interval: u64,
}

#[derive(clap::Args, Debug)]
pub struct ApiArgs {
    #[command(subcommand)]
    pub command: ApiCommand,
}

#[derive(Subcommand, Debug)]
pub enum ApiCommand {
    /// Proxy statistics
    Stats,

    /// Read or replace a config section
    Config(ConfigArgs),

    /// Pending approvals
    Approvals(ApprovalsArgs),

    /// MCP policy, audit log and clients
    Mcp(McpArgs),
}

#[derive(clap::Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Print a config section
    Get {
        #[arg(value_enum)]
        domain: ConfigDomain,
    },
    /// Replace a config section with a JSON document
    Set {
        #[arg(value_enum)]
        domain: ConfigDomain,
        /// JSON body, or `-` to read it from stdin
        body: String,
    },
}

#[derive(clap::Args, Debug)]
pub struct ApprovalsArgs {
    #[command(subcommand)]
    pub command: Option<ApprovalsCommand>,
}

#[derive(Subcommand, Debug)]
pub enum ApprovalsCommand {
    /// List pending approvals (default)
    List,
    /// Resolve an approval
    Resolve {
        /// Approval id
        id: String,
        /// Action understood by the daemon, e.g. `approve` or `deny`
        action: String,
    },
}

#[derive(clap::Args, Debug)]
pub struct McpArgs {
    #[command(subcommand)]
    pub command: McpCommand,
}

#[derive(Subcommand, Debug)]
pub enum McpCommand {
    /// Print the MCP policy
    Policy,
    /// Replace the MCP policy with a JSON document
    SetPolicy {
        /// JSON body, or `-` to read it from stdin
        body: String,
    },
    /// Print the MCP audit log
    Audit,
    /// List detected MCP clients
    Clients,
    /// Route an MCP client through the daemon
    Wrap {
        client: String,
    },
    /// Undo a previous wrap
    Unwrap {
        client: String,
    },
}

pub fn parse() -> Cli {
    Cli::parse()
}
