use super::args::{Cli, Command};
use crate::exit_codes::SUCCESS;

pub mod run;
pub mod validate;

pub async fn dispatch(cli: Cli) -> anyhow::Result<i32> {
    match cli.cmd {
        Command::Run(args) => run::cmd_run(args).await,
        Command::Validate(args) => validate::cmd_validate(args),
        Command::Version => {
            println!("constellation {}", env!("CARGO_PKG_VERSION"));
            Ok(SUCCESS)
        }
    }
}
