mod loader;
mod stream;

pub use loader::{Batch, DataLoader};
pub use stream::{DataSource, ShardStream};

use rand::seq::SliceRandom;
use std::error::Error;
use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use nnue::samples::Samples;

/// Target construction shared by every loader of a dataset.
#[derive(Clone, Copy, Debug)]
pub struct TargetParams {
    pub wdl_scale: f32,
    pub wdl_lambda: f32,
}

/// How a dataset is divided into training, validation and test samples.
#[derive(Clone, Copy, Debug)]
pub struct SplitParams {
    pub val_ratio: f64,
    pub test_ratio: f64,
    pub seed: u64,
}

pub struct Dataset {
    samples: Arc<Samples>,
    train_samples: Vec<usize>,
    val_samples: Vec<usize>,
    test_samples: Vec<usize>,
    target: TargetParams,
}

impl Dataset {
    /// Reads and splits every sample of `files`.
    pub fn from_files(
        files: &[PathBuf],
        split: SplitParams,
        target: TargetParams,
    ) -> Result<Self, Box<dyn Error>> {
        let mut samples = Samples::new();
        for path in files {
            let file_samples = Samples::read(BufReader::new(File::open(path)?))
                .map_err(|e| format!("{}: {}", path.display(), e))?;
            log::info!("Loaded {} samples from {}", file_samples.len(), path.display());
            samples.extend(file_samples);
        }

        if samples.is_empty() {
            return Err("no training samples found".into());
        }

        let (train_samples, val_samples, test_samples) =
            samples.split_indices(split.val_ratio, split.test_ratio, split.seed)?;

        log::info!(
            "Split {} samples: {} train, {} validation, {} test",
            samples.len(),
            train_samples.len(),
            val_samples.len(),
            test_samples.len()
        );

        Ok(Self {
            samples: Arc::new(samples),
            train_samples,
            val_samples,
            test_samples,
            target,
        })
    }

    pub fn train_loader(&mut self, batch_size: usize, workers: usize) -> DataLoader {
        self.train_samples.shuffle(&mut rand::thread_rng());
        self.loader(&self.train_samples, batch_size, workers)
    }

    pub fn val_loader(&self, batch_size: usize, workers: usize) -> DataLoader {
        self.loader(&self.val_samples, batch_size, workers)
    }

    pub fn test_loader(&self, batch_size: usize, workers: usize) -> DataLoader {
        self.loader(&self.test_samples, batch_size, workers)
    }

    fn loader(&self, indices: &[usize], batch_size: usize, workers: usize) -> DataLoader {
        DataLoader::new(
            Arc::clone(&self.samples),
            indices,
            batch_size,
            workers,
            self.target,
        )
    }
}

/// Expands directories into their CSV files.
fn get_files(paths: &[PathBuf]) -> io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            files.extend(csv_files(path)?);
        } else {
            files.push(path.clone());
        }
    }

    log::info!("Found {} CSV files", files.len());
    Ok(files)
}

/// CSV files of `dir`, numbered names (`2.csv` before `10.csv`) first, the
/// rest by name.
fn csv_files(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut entries: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "csv"))
        .collect();
    entries.sort_by_cached_key(|p| {
        let number = p
            .file_stem()
            .and_then(|stem| stem.to_str())
            .and_then(|stem| stem.parse::<u64>().ok());
        (number.is_none(), number, p.clone())
    });
    Ok(entries)
}
