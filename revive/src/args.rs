use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Tooling around the revive restore blob", long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Validate a checkpoint image and summarise its contents
    Inspect {
        /// Checkpoint image to read
        #[arg(env = "REVIVE_IMAGE", value_name = "IMAGE")]
        image: PathBuf,

        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Validate a self-snapshot and list the mappings it would tear down
    Snapshot {
        #[arg(env = "REVIVE_SELF_VMAS", value_name = "FILE")]
        file: PathBuf,

        #[arg(long)]
        json: bool,
    },

    /// Write an Argument Block for RESTORE_CORE
    Args {
        /// Checkpoint image the blob will open
        #[arg(long, env = "REVIVE_IMAGE", value_name = "PATH")]
        core: PathBuf,

        /// Self-snapshot the blob will tear down
        #[arg(long, env = "REVIVE_SELF_VMAS", value_name = "PATH")]
        self_vmas: PathBuf,

        /// Address of a prepared signal frame, 0x prefixed hex or decimal
        #[arg(long, value_name = "ADDR", value_parser = parse_addr)]
        sigframe: Option<u64>,

        /// Exit with CODE on failure instead of freezing
        #[arg(long, value_name = "CODE")]
        exit_on_failure: Option<i32>,

        #[arg(short, long, value_name = "OUT")]
        output: PathBuf,
    },

    /// Report where the restore blob lives in this binary
    Blob {
        /// Dump the blob body to this file
        #[arg(short, long, value_name = "OUT")]
        output: Option<PathBuf>,
    },
}

fn parse_addr(s: &str) -> Result<u64, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid address {s:?}: {e}"))
}
