use std::io::{BufRead, Write};

use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};

use crate::encoding::{self, FeatureSet, Features, MAX_ACTIVE_FEATURES, NUM_FEATURES};
use crate::error::{DataError, EncodingError};

pub const REQUIRED_COLUMNS: [&str; 3] = ["fen", "wdl", "eval"];
pub const CACHED_COLUMNS: [&str; 3] = ["side", "widx", "bidx"];

/// One labelled position: game result from white's point of view and the
/// search score relative to the side to move.
#[derive(Clone, Debug)]
pub struct Sample {
    pub fen: String,
    pub wdl: f32,
    pub eval: i32,
    /// Present when the file carries precomputed feature columns.
    pub features: Option<Features>,
}

impl Sample {
    pub fn new(fen: &str, wdl: f32, eval: i32) -> Self {
        Self {
            fen: fen.to_string(),
            wdl,
            eval,
            features: None,
        }
    }

    /// Cached features, or a fresh encoding of the FEN.
    pub fn features(&self) -> Result<Features, EncodingError> {
        match &self.features {
            Some(features) => Ok(features.clone()),
            None => encoding::encode_fen(&self.fen),
        }
    }

    /// `lambda * wdl_stm + (1 - lambda) * sigmoid(eval / wdl_scale)`.
    pub fn target(&self, white_to_move: bool, wdl_scale: f32, lambda: f32) -> f32 {
        let wdl_stm = if white_to_move {
            self.wdl
        } else {
            1.0 - self.wdl
        };
        lambda * wdl_stm + (1.0 - lambda) * sigmoid(self.eval as f32 / wdl_scale)
    }
}

#[inline(always)]
fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

#[derive(Clone, Debug, Default)]
pub struct Samples {
    pub samples: Vec<Sample>,
}

impl Samples {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn extend(&mut self, other: Samples) {
        self.samples.extend(other.samples);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Sample> {
        self.samples.iter()
    }

    /// Reads a CSV with a `fen,wdl,eval` header (any column order, extra
    /// columns ignored). The cached feature columns are used when all three
    /// are present.
    ///
    /// Malformed rows are logged and skipped; a missing or incomplete header
    /// is an error.
    pub fn read<R: BufRead>(reader: R) -> Result<Self, DataError> {
        let mut lines = reader.lines();

        let header = match lines.next() {
            Some(line) => line?,
            None => return Err(DataError::MissingHeader),
        };
        let columns = Columns::parse(&header)?;

        let mut samples = Vec::new();
        let mut skipped = 0;
        for (i, line) in lines.enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            // 1-based, counting the header
            match columns.parse_row(&line, i + 2) {
                Ok(sample) => samples.push(sample),
                Err(e) => {
                    log::debug!("Skipping row: {}", e);
                    skipped += 1;
                }
            }
        }

        if skipped > 0 {
            log::warn!("Skipped {} malformed rows", skipped);
        }

        Ok(Self { samples })
    }

    /// Writes the samples as CSV, optionally with the cached feature columns.
    pub fn write<W: Write>(&self, writer: &mut W, with_features: bool) -> Result<(), DataError> {
        if with_features {
            writeln!(writer, "fen,wdl,eval,side,widx,bidx")?;
        } else {
            writeln!(writer, "fen,wdl,eval")?;
        }

        for (i, sample) in self.samples.iter().enumerate() {
            write!(writer, "{},{},{}", sample.fen, sample.wdl, sample.eval)?;
            if with_features {
                let features = match &sample.features {
                    Some(f) => f.clone(),
                    None => sample.features().map_err(|source| DataError::Position {
                        line: i + 2,
                        source,
                    })?,
                };
                write!(
                    writer,
                    ",{},{},{}",
                    features.white_to_move as u8,
                    join(&features.white),
                    join(&features.black)
                )?;
            }
            writeln!(writer)?;
        }

        Ok(())
    }

    /// Shuffled `(train, validation, test)` index split.
    ///
    /// Both ratios must lie in `[0, 1)` with a sum below 1, which leaves at
    /// least one training sample whenever there are samples at all.
    pub fn split_indices(
        &self,
        val_ratio: f64,
        test_ratio: f64,
        seed: u64,
    ) -> Result<(Vec<usize>, Vec<usize>, Vec<usize>), DataError> {
        let valid = |r: f64| (0.0..1.0).contains(&r);
        if !valid(val_ratio) || !valid(test_ratio) || val_ratio + test_ratio >= 1.0 {
            return Err(DataError::InvalidSplit {
                val_ratio,
                test_ratio,
            });
        }

        let total = self.samples.len();
        let test_len = ((total as f64 * test_ratio) as usize).min(total);
        let val_len = ((total as f64 * val_ratio) as usize).min(total - test_len);

        let mut indices: Vec<usize> = (0..total).collect();
        let mut rng = StdRng::seed_from_u64(seed);
        indices.shuffle(&mut rng);

        let test = indices.split_off(total - test_len);
        let val = indices.split_off(indices.len() - val_len);
        Ok((indices, val, test))
    }
}

struct Columns {
    fen: usize,
    wdl: usize,
    eval: usize,
    cached: Option<[usize; 3]>,
}

impl Columns {
    fn parse(header: &str) -> Result<Self, DataError> {
        let names: Vec<&str> = header.split(',').map(str::trim).collect();
        let find = |name: &str| names.iter().position(|&n| n == name);

        let missing: Vec<&'static str> = REQUIRED_COLUMNS
            .iter()
            .copied()
            .filter(|name| find(*name).is_none())
            .collect();
        if !missing.is_empty() {
            return Err(DataError::MissingColumns(missing));
        }

        let cached = match CACHED_COLUMNS.map(find) {
            [Some(side), Some(widx), Some(bidx)] => Some([side, widx, bidx]),
            _ => None,
        };

        Ok(Self {
            fen: find("fen").unwrap_or_default(),
            wdl: find("wdl").unwrap_or_default(),
            eval: find("eval").unwrap_or_default(),
            cached,
        })
    }

    fn parse_row(&self, line: &str, line_no: usize) -> Result<Sample, DataError> {
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        let row_error = |reason: String| DataError::Row {
            line: line_no,
            reason,
        };
        let field = |idx: usize, name: &str| {
            fields
                .get(idx)
                .copied()
                .ok_or_else(|| row_error(format!("missing `{}` field", name)))
        };

        let fen = field(self.fen, "fen")?;
        let wdl: f32 = field(self.wdl, "wdl")?
            .parse()
            .map_err(|_| row_error("`wdl` is not a number".to_string()))?;
        if !(0.0..=1.0).contains(&wdl) {
            return Err(row_error(format!("`wdl` {} outside [0, 1]", wdl)));
        }
        let eval: i32 = field(self.eval, "eval")?
            .parse()
            .map_err(|_| row_error("`eval` is not an integer".to_string()))?;

        let features = match self.cached {
            Some([side, widx, bidx]) => Some(Features {
                white_to_move: match field(side, "side")? {
                    "1" => true,
                    "0" => false,
                    other => return Err(row_error(format!("`side` must be 0 or 1, got {}", other))),
                },
                white: parse_indices(field(widx, "widx")?).map_err(row_error)?,
                black: parse_indices(field(bidx, "bidx")?).map_err(row_error)?,
            }),
            None => None,
        };

        Ok(Sample {
            fen: fen.to_string(),
            wdl,
            eval,
            features,
        })
    }
}

fn parse_indices(text: &str) -> Result<FeatureSet, String> {
    let mut set = FeatureSet::new();
    for token in text.split_whitespace() {
        let idx: usize = token
            .parse()
            .map_err(|_| format!("bad feature index '{}'", token))?;
        if idx >= NUM_FEATURES {
            return Err(format!("feature index {} out of range", idx));
        }
        set.try_push(idx)
            .map_err(|_| format!("more than {} features", MAX_ACTIVE_FEATURES))?;
    }
    Ok(set)
}

fn join(set: &FeatureSet) -> String {
    set.iter()
        .map(|idx| idx.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}
