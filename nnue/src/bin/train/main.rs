mod args;
mod dataset;
mod training;
mod utils;

use args::Args;
use clap::Parser;
use dataset::{DataSource, TargetParams};
use log::LevelFilter;
use nnue::config::ModelConfig;
use nnue::run::{write_atomic, RunDirectory};
use simplelog::{Config, SimpleLogger};
use std::{
    error::Error,
    io::Write,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};
use training::Trainer;

fn main() -> Result<(), Box<dyn Error>> {
    let args = init()?;

    // Set up SIGINT handler
    let stop_flag = Arc::new(AtomicBool::new(false));
    let stop_flag_handler = Arc::clone(&stop_flag);

    ctrlc::set_handler(move || {
        log::info!("Received SIGINT, stopping after the current batch...");
        stop_flag_handler.store(true, Ordering::Relaxed);
    })?;

    let run = open_run(&args)?;
    let config = load_config(&args, &run)?;
    log::info!(
        "Training {} with {} hidden neurons in {}",
        config.architecture(),
        config.hidden_size(),
        run.root().display()
    );

    let text = config.to_toml()?;
    write_atomic(&run.model_config(), |file| file.write_all(text.as_bytes()))?;

    let mut data = DataSource::open(
        &args,
        TargetParams {
            wdl_scale: config.wdl_scale(),
            wdl_lambda: args.wdl_lambda,
        },
    )?;

    let mut trainer = Trainer::new(&args, &config, run, stop_flag)?;
    trainer.train(&mut data)?;

    log::info!("Done!");
    Ok(())
}

fn init() -> Result<Args, Box<dyn Error>> {
    let args = Args::parse();
    SimpleLogger::init(LevelFilter::Info, Config::default())?;

    Ok(args)
}

fn open_run(args: &Args) -> Result<RunDirectory, Box<dyn Error>> {
    if args.resume {
        return RunDirectory::latest(&args.output)?.ok_or_else(|| {
            format!("no run to resume under {}", args.output.display()).into()
        });
    }
    Ok(RunDirectory::create(&args.output)?)
}

/// `--config` wins; a resumed run otherwise keeps the config it was started with.
fn load_config(args: &Args, run: &RunDirectory) -> Result<ModelConfig, Box<dyn Error>> {
    if let Some(path) = &args.config {
        return Ok(ModelConfig::load(path)?);
    }
    if args.resume && run.model_config().exists() {
        return Ok(ModelConfig::load(&run.model_config())?);
    }
    log::info!("No --config given, using the default network");
    Ok(ModelConfig::default())
}
