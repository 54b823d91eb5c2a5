use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "NNUE Integer Evaluator")]
#[command(author = "Jørgen Hanssen <jorgen@hanssen.io>")]
#[command(version = "0.1.0")]
pub struct Args {
    /// Exported network. Defaults to the best network of the latest run.
    pub network: Option<PathBuf>,

    /// Model configuration describing the network layout. Defaults to the
    /// config stored next to the network.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Directory searched for the latest run when no network is given.
    #[arg(long, default_value = "nnue/runs")]
    pub runs: PathBuf,

    /// Write debug logs to this file. Stdout carries only the protocol.
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}
