mod args;
mod positions;

use args::Args;
use candle_core::Device;
use clap::Parser;
use log::LevelFilter;
use nnue::checkpoint;
use nnue::config::ModelConfig;
use nnue::network::EvaluatorModel;
use nnue::run::RunDirectory;
use nnue::validate::{ConsistencyValidator, EvaluatorCommand};
use positions::read_positions;
use simplelog::{Config, SimpleLogger};
use std::{error::Error, fs, path::PathBuf};

fn main() -> Result<(), Box<dyn Error>> {
    let args = init()?;

    let run = match &args.run {
        Some(root) => Some(RunDirectory::open(root)?),
        None => RunDirectory::latest(&args.runs)?,
    };

    let config = match (&args.config, &run) {
        (Some(path), _) => ModelConfig::load(path)?,
        (None, Some(run)) => ModelConfig::load(&run.model_config())?,
        (None, None) => return Err("no run found, pass --config and --checkpoint".into()),
    };
    let checkpoint_path: PathBuf = match (&args.checkpoint, &run) {
        (Some(path), _) => path.clone(),
        (None, Some(run)) => run.best_checkpoint(),
        (None, None) => return Err("no run found, pass --checkpoint".into()),
    };

    let (model, varmap) = EvaluatorModel::with_varmap(&config, &Device::Cpu)?;
    checkpoint::load_parameters(&checkpoint_path, &varmap)?;
    log::info!(
        "Loaded {} checkpoint {}",
        config.architecture(),
        checkpoint_path.display()
    );

    let exported = model.export_quantized()?;
    for (layer, overflow) in exported.report() {
        log::info!(
            "Layer {}: {} weight and {} bias values saturated",
            layer,
            overflow.weights,
            overflow.biases
        );
    }

    if let Some(run) = &run {
        let trained = run.best_network();
        if args.checkpoint.is_none() && trained.exists() && fs::read(&trained)? != exported.bytes {
            log::warn!(
                "{} differs from a fresh export of {}",
                trained.display(),
                checkpoint_path.display()
            );
        }
    }

    let fens = read_positions(&args.positions, args.limit)?;
    log::info!("Validating {} positions", fens.len());

    let validator = ConsistencyValidator::new(&model, &exported).with_error_bound(args.bound);

    let report = match &args.evaluator {
        Some(program) => {
            let command = EvaluatorCommand {
                program: program.clone(),
                args: args.evaluator_args.clone(),
            };

            // Keep the temporary artifact alive until the evaluator is done
            let mut scratch = None;
            let artifact = match &args.artifact {
                Some(path) => path.clone(),
                None => {
                    let file = tempfile::Builder::new().suffix(".nnue").tempfile()?;
                    let path = file.path().to_path_buf();
                    scratch = Some(file);
                    path
                }
            };
            exported.write_atomic(&artifact)?;

            let report = validator.run(&fens, Some((&command, &artifact)))?;
            drop(scratch);
            report
        }
        None => validator.run(&fens, None)?,
    };

    report.log();

    if !report.passed {
        return Err(format!(
            "mean absolute error {:.3} exceeds the bound {:.3}",
            report.errors.mean_abs, report.error_bound
        )
        .into());
    }

    log::info!("Validation passed");
    Ok(())
}

fn init() -> Result<Args, Box<dyn Error>> {
    let args = Args::parse();
    SimpleLogger::init(LevelFilter::Info, Config::default())?;

    Ok(args)
}
