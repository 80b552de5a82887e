pub mod args;
pub mod blob;
pub mod inspect;

use std::process;

use clap::Parser;
use revive_common::{anyhow::Result, tracing::error};

use crate::args::{Args, Command};

pub fn main() {
    revive_common::tracing::init();
    let args = Args::parse();

    let code = match run(args) {
        Ok(()) => 0,
        Err(err) => {
            error!("{err:#}");
            1
        }
    };

    process::exit(code);
}

pub fn run(args: Args) -> Result<()> {
    match args.command {
        Command::Inspect { image, json } => inspect::inspect(&image, json),
        Command::Snapshot { file, json } => inspect::snapshot(&file, json),
        Command::Args {
            core,
            self_vmas,
            sigframe,
            exit_on_failure,
            output,
        } => blob::write_args(&core, &self_vmas, sigframe, exit_on_failure, &output),
        Command::Blob { output } => blob::report(output.as_deref()),
    }
}
