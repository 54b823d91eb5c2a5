use std::error::Error;
use std::path::{Path, PathBuf};

use crate::args::Args;

use super::{get_files, Dataset, SplitParams, TargetParams};

/// Data files visited one per superbatch.
pub struct ShardStream {
    shards: Vec<PathBuf>,
    repeat: bool,
}

impl ShardStream {
    pub fn new(shards: Vec<PathBuf>, repeat: bool) -> Result<Self, Box<dyn Error>> {
        if shards.is_empty() {
            return Err("no data files to stream".into());
        }
        Ok(Self { shards, repeat })
    }

    pub fn len(&self) -> usize {
        self.shards.len()
    }

    /// File of the 1-based `superbatch`. Past the last file this wraps around
    /// when repeating and is `None` otherwise.
    pub fn shard(&self, superbatch: usize) -> Option<&Path> {
        let idx = superbatch.checked_sub(1)?;
        if idx >= self.shards.len() && !self.repeat {
            return None;
        }
        Some(&self.shards[idx % self.shards.len()])
    }
}

/// Training data for each superbatch.
pub enum DataSource {
    /// Everything in memory; every superbatch is a full pass over it.
    InMemory(Dataset),
    /// One file per superbatch, read when its superbatch starts. Each file is
    /// split into its own training, validation and test samples.
    Streamed {
        shards: ShardStream,
        split: SplitParams,
        target: TargetParams,
        current: Option<(PathBuf, Dataset)>,
    },
}

impl DataSource {
    pub fn open(args: &Args, target: TargetParams) -> Result<Self, Box<dyn Error>> {
        let files = get_files(&args.data)?;
        let split = SplitParams {
            val_ratio: args.val_ratio,
            test_ratio: args.test_ratio,
            seed: args.seed,
        };

        if args.stream {
            let shards = ShardStream::new(files, args.repeat)?;
            log::info!(
                "Streaming {} files, one per superbatch{}",
                shards.len(),
                if args.repeat { ", repeating" } else { "" }
            );
            return Ok(Self::streamed(shards, split, target));
        }

        if args.repeat {
            log::warn!("--repeat only applies with --stream");
        }
        Ok(Self::InMemory(Dataset::from_files(&files, split, target)?))
    }

    pub fn streamed(shards: ShardStream, split: SplitParams, target: TargetParams) -> Self {
        Self::Streamed {
            shards,
            split,
            target,
            current: None,
        }
    }

    /// Data of the 1-based `superbatch`, or `None` once a non-repeating
    /// stream has run out of files.
    pub fn superbatch(
        &mut self,
        superbatch: usize,
    ) -> Result<Option<&mut Dataset>, Box<dyn Error>> {
        match self {
            Self::InMemory(dataset) => Ok(Some(dataset)),
            Self::Streamed {
                shards,
                split,
                target,
                current,
            } => {
                let Some(path) = shards.shard(superbatch) else {
                    return Ok(None);
                };

                let loaded = matches!(current, Some((p, _)) if p.as_path() == path);
                if !loaded {
                    log::info!("Superbatch {}: reading {}", superbatch, path.display());
                    let dataset = Dataset::from_files(&[path.to_path_buf()], *split, *target)?;
                    *current = Some((path.to_path_buf(), dataset));
                }
                Ok(current.as_mut().map(|(_, dataset)| dataset))
            }
        }
    }

    /// Data of the most recent superbatch.
    pub fn last(&self) -> Option<&Dataset> {
        match self {
            Self::InMemory(dataset) => Some(dataset),
            Self::Streamed { current, .. } => current.as_ref().map(|(_, dataset)| dataset),
        }
    }
}
