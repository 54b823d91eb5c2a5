mod args;

use args::Args;
use clap::Parser;
use log::LevelFilter;
use nnue::config::ModelConfig;
use nnue::inference::IntegerNetwork;
use nnue::run::{RunDirectory, MODEL_CONFIG};
use nnue::validate::{QUIT, READY};
use simplelog::{Config, WriteLogger};
use std::{
    error::Error,
    fs::File,
    io::{self, BufRead, Write},
    path::{Path, PathBuf},
};

fn main() -> Result<(), Box<dyn Error>> {
    let args = init()?;

    let network_path = match &args.network {
        Some(path) => path.clone(),
        None => latest_best_network(&args.runs)?,
    };
    let config = load_config(&args, &network_path)?;
    let mut network = IntegerNetwork::load(&config, &network_path)?;
    log::info!(
        "Loaded {} network from {}",
        config.architecture(),
        network_path.display()
    );

    let stdin = io::stdin();
    let mut stdout = io::stdout().lock();
    writeln!(stdout, "{}", READY)?;
    stdout.flush()?;

    for line in stdin.lock().lines() {
        let line = line?;
        let fen = line.trim();
        if fen.is_empty() {
            continue;
        }
        if fen == QUIT {
            break;
        }

        let eval = network.evaluate_fen(fen).map_err(|e| {
            log::error!("{}", e);
            e
        })?;
        log::debug!("{} -> {}", fen, eval);

        writeln!(stdout, "eval: {}", eval)?;
        stdout.flush()?;
    }

    Ok(())
}

fn init() -> Result<Args, Box<dyn Error>> {
    let args = Args::parse();

    if let Some(log_file) = &args.log_file {
        WriteLogger::init(
            LevelFilter::Debug,
            Config::default(),
            File::create(log_file)?,
        )?;
    }

    Ok(args)
}

/// `best.nnue` of the newest run, which only exists once a run improved.
fn latest_best_network(runs: &Path) -> Result<PathBuf, Box<dyn Error>> {
    let run = RunDirectory::latest(runs)?
        .ok_or_else(|| format!("no training run under {}", runs.display()))?;
    let network = run.best_network();
    if !network.exists() {
        return Err(format!(
            "run {} has no exported network yet ({} is missing)",
            run.root().display(),
            network.display()
        )
        .into());
    }
    Ok(network)
}

fn load_config(args: &Args, network: &Path) -> Result<ModelConfig, Box<dyn Error>> {
    let beside: Option<PathBuf> = network.parent().map(|dir| dir.join(MODEL_CONFIG));
    let path = match (&args.config, beside) {
        (Some(path), _) => path.clone(),
        (None, Some(path)) if path.exists() => path,
        _ => {
            log::info!("No config found, assuming the default network layout");
            return Ok(ModelConfig::default());
        }
    };
    Ok(ModelConfig::load(&path)?)
}
