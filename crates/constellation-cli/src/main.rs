use clap::Parser;

mod cli;
mod exit_codes;

use cli::args::{Cli, Command};
use cli::commands::dispatch;

#[tokio::main(flavor = "multi_thread")]
async fn main() {
    let cli = Cli::parse();
    init_tracing(&cli);

    let code = match dispatch(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("fatal: {err:?}");
            exit_codes::CONFIG_ERROR
        }
    };
    std::process::exit(code);
}

/// Install the subscriber on stderr; stdout belongs to the protocol.
/// `RUST_LOG` wins over `--log-level`.
fn init_tracing(cli: &Cli) {
    let default_level = match &cli.cmd {
        Command::Run(args) => args.log_level.as_str(),
        _ => "info",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
