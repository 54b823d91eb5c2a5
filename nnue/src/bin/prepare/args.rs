use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "NNUE Data Preparation")]
#[command(author = "Jørgen Hanssen <jorgen@hanssen.io>")]
#[command(version = "0.1.0")]
pub struct Args {
    /// CSV with a `fen,wdl,eval` header.
    #[arg(long)]
    pub input: PathBuf,

    /// Destination CSV with the cached `side,widx,bidx` columns added.
    #[arg(long)]
    pub output: PathBuf,

    /// Number of encoding threads.
    #[arg(long, default_value_t = num_cpus::get())]
    pub workers: usize,
}
