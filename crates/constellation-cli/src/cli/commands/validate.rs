//! `constellation validate`: load and validate a policy file.

use constellation_core::config::Config;

use super::super::args::ValidateArgs;
use crate::exit_codes::SUCCESS;

pub fn cmd_validate(args: ValidateArgs) -> anyhow::Result<i32> {
    Config::from_file(&args.policy)?;
    println!("policy file is valid");
    Ok(SUCCESS)
}
