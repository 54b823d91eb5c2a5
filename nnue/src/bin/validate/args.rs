use std::path::PathBuf;

use clap::Parser;
use nnue::validate::DEFAULT_ERROR_BOUND;

#[derive(Parser, Debug)]
#[command(name = "NNUE Consistency Validator")]
#[command(author = "Jørgen Hanssen <jorgen@hanssen.io>")]
#[command(version = "0.1.0")]
pub struct Args {
    /// Positions to check: a training CSV or one FEN per line.
    #[arg(long)]
    pub positions: PathBuf,

    /// Training run to validate. Defaults to the latest run under --runs.
    #[arg(long)]
    pub run: Option<PathBuf>,

    #[arg(long, default_value = "nnue/runs")]
    pub runs: PathBuf,

    /// Checkpoint to export. Defaults to the run's best checkpoint.
    #[arg(long)]
    pub checkpoint: Option<PathBuf>,

    /// Model configuration. Defaults to the config stored in the run.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// External evaluator program; the exported network path is appended to
    /// its arguments. Without it only the float and replica phases run.
    #[arg(long)]
    pub evaluator: Option<PathBuf>,

    /// Extra argument for the evaluator, repeatable.
    #[arg(long = "evaluator-arg", allow_hyphen_values = true)]
    pub evaluator_args: Vec<String>,

    /// Where to write the exported network. Defaults to a temporary file.
    #[arg(long)]
    pub artifact: Option<PathBuf>,

    /// Largest tolerated mean absolute error between float and integer scores.
    #[arg(long, default_value_t = DEFAULT_ERROR_BOUND)]
    pub bound: f64,

    /// Maximum number of positions read.
    #[arg(long, default_value_t = 10_000)]
    pub limit: usize,
}
