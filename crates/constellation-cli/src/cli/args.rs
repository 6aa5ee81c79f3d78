//! Command-line arguments.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "constellation",
    version,
    about = "Access-control proxy for MCP servers: policy-gated tool calls, filtered discovery, secret injection"
)]
pub struct Cli {
    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the proxy for a server defined in the policy file
    Run(RunArgs),
    /// Validate a policy file
    Validate(ValidateArgs),
    /// Print version
    Version,
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Server name from the policy file
    #[arg(long)]
    pub server: String,

    /// Path to the policy file
    #[arg(long, default_value = "constellation.yaml")]
    pub policy: PathBuf,

    /// Audit log file (default: stderr)
    #[arg(long)]
    pub audit_log: Option<PathBuf>,

    /// Evaluate and audit policies but forward all calls
    #[arg(long)]
    pub dry_run: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

#[derive(Args, Debug, Clone)]
pub struct ValidateArgs {
    /// Path to the policy file
    #[arg(long, default_value = "constellation.yaml")]
    pub policy: PathBuf,
}
