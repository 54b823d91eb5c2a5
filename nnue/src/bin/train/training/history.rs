use std::fs;
use std::io::{self, Write};
use std::path::Path;

use nnue::run::write_atomic;

pub const LOSS_HISTORY: &str = "loss.csv";

/// Per-superbatch losses of a run, kept next to its checkpoints.
#[derive(Debug, Default, PartialEq)]
pub struct LossHistory {
    rows: Vec<(usize, f32, f32)>,
}

impl LossHistory {
    /// Reads an existing history; a missing file is an empty history.
    pub fn load(path: &Path) -> io::Result<Self> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(e),
        };

        let mut rows = Vec::new();
        for line in text.lines().skip(1) {
            let fields: Vec<&str> = line.split(',').collect();
            let parsed = match fields.as_slice() {
                [epoch, train, val] => epoch
                    .parse::<usize>()
                    .ok()
                    .zip(train.parse::<f32>().ok())
                    .zip(val.parse::<f32>().ok())
                    .map(|((e, t), v)| (e, t, v)),
                _ => None,
            };
            match parsed {
                Some(row) => rows.push(row),
                None => log::warn!("Ignoring malformed loss history line: {}", line),
            }
        }
        Ok(Self { rows })
    }

    /// Records a superbatch, replacing rows at or after it from an interrupted
    /// run.
    pub fn push(&mut self, epoch: usize, train_loss: f32, val_loss: f32) {
        self.rows.retain(|&(e, _, _)| e < epoch);
        self.rows.push((epoch, train_loss, val_loss));
    }

    pub fn save(&self, path: &Path) -> io::Result<()> {
        write_atomic(path, |file| {
            let mut out = io::BufWriter::new(file);
            writeln!(out, "epoch,train_loss,val_loss")?;
            for (epoch, train, val) in &self.rows {
                writeln!(out, "{},{},{}", epoch, train, val)?;
            }
            out.flush()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_survives_a_resume() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(LOSS_HISTORY);

        assert_eq!(LossHistory::load(&path).unwrap(), LossHistory::default());

        let mut history = LossHistory::default();
        history.push(1, 0.25, 0.5);
        history.push(2, 0.125, 0.375);
        history.save(&path).unwrap();

        let mut resumed = LossHistory::load(&path).unwrap();
        assert_eq!(resumed, history);

        resumed.push(2, 0.1, 0.3);
        assert_eq!(resumed.rows, vec![(1, 0.25, 0.5), (2, 0.1, 0.3)]);
    }
}
