use std::process::ExitCode;

use clap::Parser;
use paintundo::cli::{self, CliArgs};
use paintundo::logger;

fn main() -> ExitCode {
    // Initialize session log (overwrites previous session log)
    logger::init();

    let args = CliArgs::parse();
    cli::run(args)
}
