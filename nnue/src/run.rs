use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

pub const LATEST_CHECKPOINT: &str = "latest.safetensors";
pub const BEST_CHECKPOINT: &str = "best.safetensors";
pub const BEST_NETWORK: &str = "best.nnue";
pub const MODEL_CONFIG: &str = "model.toml";

const RUN_PREFIX: &str = "train-";

/// Output directory of one training run: `<base>/train-YYYY-MM-DD-HH-MM-SS`.
pub struct RunDirectory {
    root: PathBuf,
}

impl RunDirectory {
    pub fn create(base: &Path) -> io::Result<Self> {
        let stamp = chrono::Local::now().format("%Y-%m-%d-%H-%M-%S");
        let root = base.join(format!("{}{}", RUN_PREFIX, stamp));
        if root.exists() {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("Run directory {} already exists", root.display()),
            ));
        }
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn open(root: &Path) -> io::Result<Self> {
        if !root.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("Run directory {} does not exist", root.display()),
            ));
        }
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    /// Most recent run under `base`. Timestamps sort lexically.
    pub fn latest(base: &Path) -> io::Result<Option<Self>> {
        if !base.is_dir() {
            return Ok(None);
        }

        let mut runs = Vec::new();
        for entry in fs::read_dir(base)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with(RUN_PREFIX) {
                runs.push(entry.path());
            }
        }
        runs.sort_unstable();

        Ok(runs.pop().map(|root| Self { root }))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn file_path(&self, filename: &str) -> PathBuf {
        self.root.join(filename)
    }

    pub fn latest_checkpoint(&self) -> PathBuf {
        self.file_path(LATEST_CHECKPOINT)
    }

    pub fn best_checkpoint(&self) -> PathBuf {
        self.file_path(BEST_CHECKPOINT)
    }

    pub fn best_network(&self) -> PathBuf {
        self.file_path(BEST_NETWORK)
    }

    /// Configuration the run was trained with.
    pub fn model_config(&self) -> PathBuf {
        self.file_path(MODEL_CONFIG)
    }
}

/// Writes `path` through a temporary file in the same directory that is
/// flushed, synced and renamed over the destination. Readers never observe a
/// partially written file.
pub fn write_atomic<F>(path: &Path, write: F) -> io::Result<()>
where
    F: FnOnce(&mut File) -> io::Result<()>,
{
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    write(tmp.as_file_mut())?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Like [`write_atomic`], for writers that insist on opening the path
/// themselves.
pub fn write_atomic_path<F, E>(path: &Path, write: F) -> Result<(), E>
where
    F: FnOnce(&Path) -> Result<(), E>,
    E: From<io::Error>,
{
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let tmp = NamedTempFile::new_in(dir)?;
    write(tmp.path())?;
    File::open(tmp.path())?.sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
