use std::path::PathBuf;

use clap::{Parser, ValueEnum};

#[derive(Parser, Debug, Clone)]
#[command(name = "NNUE Trainer")]
#[command(author = "Jørgen Hanssen <jorgen@hanssen.io>")]
#[command(version = "0.1.0")]
pub struct Args {
    /// Training data: CSV files or directories containing them.
    #[arg(long, required = true, num_args = 1..)]
    pub data: Vec<PathBuf>,

    /// Model configuration (TOML). The default SCReLU network is used when omitted.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Directory that holds one sub-directory per training run.
    #[arg(long, default_value = "nnue/runs")]
    pub output: PathBuf,

    /// Continue the most recent run under --output from its latest checkpoint.
    #[arg(long, default_value_t = false)]
    pub resume: bool,

    /// Number of positions per training batch.
    #[arg(long, default_value_t = 1024)]
    pub batch_size: usize,

    /// Initial learning rate for optimizer.
    #[arg(long, default_value_t = 0.001)]
    pub learning_rate: f64,

    /// Decoupled weight decay.
    #[arg(long, default_value_t = 0.0)]
    pub weight_decay: f64,

    /// Last superbatch to train. In memory a superbatch is one pass over all
    /// data; when streaming it is one CSV file.
    #[arg(long, alias = "epochs", default_value_t = 50)]
    pub superbatches: usize,

    /// Load one CSV file per superbatch instead of holding all data in memory.
    /// Files are taken in numeric order of their names (1.csv, 2.csv, ...).
    #[arg(long, default_value_t = false)]
    pub stream: bool,

    /// Superbatch to start from. Defaults to 1, or to the one after the
    /// checkpoint when resuming.
    #[arg(long)]
    pub start_superbatch: Option<usize>,

    /// When streaming, start over at the first file after the last one.
    #[arg(long, default_value_t = false)]
    pub repeat: bool,

    /// Number of data loader workers.
    #[arg(long, default_value_t = 4)]
    pub workers: usize,

    /// Fraction of data for validation set.
    #[arg(long, default_value_t = 0.1, value_parser = parse_ratio)]
    pub val_ratio: f64,

    /// Fraction of data for test set.
    #[arg(long, default_value_t = 0.01, value_parser = parse_ratio)]
    pub test_ratio: f64,

    /// Seed of the train/validation/test split.
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Weight of the game result in the training target; the rest is the
    /// search score.
    #[arg(long, default_value_t = 0.0)]
    pub wdl_lambda: f32,

    /// How the learning rate changes from one superbatch to the next.
    #[arg(long, value_enum, default_value_t = ScheduleKind::Step)]
    pub lr_schedule: ScheduleKind,

    /// Step schedule: learning rate decay factor per superbatch.
    #[arg(long, default_value_t = 0.95)]
    pub lr_decay: f64,

    /// Cosine schedule: learning rate reached at the last superbatch.
    #[arg(long, default_value_t = 0.001 * 0.3f64.powi(5))]
    pub final_lr: f64,

    /// Train on the CPU even when an accelerator feature is enabled.
    #[arg(long, default_value_t = false)]
    pub cpu: bool,

    /// Epochs without improvement before early stopping. 0 disables it.
    #[arg(long, default_value_t = 5)]
    pub patience: u64,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScheduleKind {
    Step,
    Cosine,
}

fn parse_ratio(s: &str) -> Result<f64, String> {
    let ratio: f64 = s.parse().map_err(|e| format!("{}", e))?;
    if (0.0..1.0).contains(&ratio) {
        Ok(ratio)
    } else {
        Err(format!("{} is not in [0, 1)", ratio))
    }
}
