mod args;
mod cache;

use args::Args;
use cache::FeatureCache;
use clap::Parser;
use log::LevelFilter;
use nnue::run::write_atomic_path;
use nnue::samples::{Sample, Samples};
use rayon::prelude::*;
use simplelog::{Config, SimpleLogger};
use std::{
    error::Error,
    fs::File,
    io::{BufReader, BufWriter, Write},
    time::Instant,
};

fn main() -> Result<(), Box<dyn Error>> {
    let args = init()?;

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(args.workers.max(1))
        .build()?;

    let samples = Samples::read(BufReader::new(File::open(&args.input)?))?;
    log::info!(
        "Loaded {} samples from {}",
        samples.len(),
        args.input.display()
    );

    let start = Instant::now();
    let encoded: Vec<_> = pool.install(|| {
        samples
            .samples
            .par_iter()
            .map_init(FeatureCache::default, |cache, sample| {
                cache.encode(&sample.fen)
            })
            .collect()
    });

    let mut prepared = Samples::new();
    let mut skipped = 0;
    for (sample, features) in samples.samples.into_iter().zip(encoded) {
        match features {
            Ok(features) => prepared.samples.push(Sample {
                features: Some(features),
                ..sample
            }),
            Err(e) => {
                log::debug!("Skipping '{}': {}", sample.fen, e);
                skipped += 1;
            }
        }
    }

    log::info!(
        "Encoded {} positions in {:.1}s, skipped {}",
        prepared.len(),
        start.elapsed().as_secs_f64(),
        skipped
    );

    write_atomic_path(&args.output, |path| -> Result<(), Box<dyn Error>> {
        let mut out = BufWriter::new(File::create(path)?);
        prepared.write(&mut out, true)?;
        out.flush()?;
        Ok(())
    })?;

    log::info!("Wrote {}", args.output.display());
    Ok(())
}

fn init() -> Result<Args, Box<dyn Error>> {
    let args = Args::parse();
    SimpleLogger::init(LevelFilter::Info, Config::default())?;

    Ok(args)
}
