use std::path::PathBuf;

use cozy_chess::Color;

/// Errors raised while turning a position into features.
#[derive(thiserror::Error, Debug)]
pub enum EncodingError {
    #[error("invalid FEN '{fen}': {reason}")]
    Fen { fen: String, reason: String },

    #[error("invalid position: no {0:?} king")]
    MissingKing(Color),

    #[error("invalid position: more than one {0:?} king")]
    MultipleKings(Color),

    #[error("invalid position: {0} non-king pieces exceed the feature capacity")]
    TooManyPieces(usize),
}

impl EncodingError {
    pub(crate) fn fen(fen: &str, reason: impl Into<String>) -> Self {
        Self::Fen {
            fen: fen.to_string(),
            reason: reason.into(),
        }
    }
}

/// Fatal configuration problems, reported at startup.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("malformed config: {0}")]
    Parse(String),

    #[error("missing required config key `architecture`")]
    MissingArchitecture,

    #[error("unknown architecture: {0}")]
    UnknownArchitecture(String),

    #[error("invalid value for `{field}`: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("layer {layer}: {reason}")]
    Headroom { layer: String, reason: String },
}

/// Errors of a single floating-point evaluation.
#[derive(thiserror::Error, Debug)]
pub enum ModelError {
    #[error(transparent)]
    Encoding(#[from] EncodingError),

    #[error(transparent)]
    Candle(#[from] candle_core::Error),
}

/// Problems with training data files.
#[derive(thiserror::Error, Debug)]
pub enum DataError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("data file is empty, expected a header line")]
    MissingHeader,

    #[error("data file is missing required columns: {0:?}")]
    MissingColumns(Vec<&'static str>),

    #[error("line {line}: {reason}")]
    Row { line: usize, reason: String },

    #[error("line {line}: {source}")]
    Position { line: usize, source: EncodingError },

    #[error("invalid split: validation {val_ratio} and test {test_ratio} must each lie in [0, 1) and sum below 1")]
    InvalidSplit { val_ratio: f64, test_ratio: f64 },
}

/// Errors while producing or reading an exported network.
#[derive(thiserror::Error, Debug)]
pub enum ExportError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Candle(#[from] candle_core::Error),

    #[error("network file has {actual} bytes, layout expects {expected}")]
    SizeMismatch { expected: usize, actual: usize },

    #[error("layer {layer}: expected {expected} values, got {actual}")]
    ShapeMismatch {
        layer: String,
        expected: usize,
        actual: usize,
    },
}

/// Errors while saving or restoring a training checkpoint.
#[derive(thiserror::Error, Debug)]
pub enum CheckpointError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Candle(#[from] candle_core::Error),

    #[error("checkpoint is missing tensor `{0}`")]
    MissingTensor(String),
}

/// Failures of a consistency validation run.
#[derive(thiserror::Error, Debug)]
pub enum ValidationError {
    #[error("failed to start evaluator {program}: {source}")]
    Spawn {
        program: PathBuf,
        source: std::io::Error,
    },

    #[error("evaluator i/o failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("evaluator closed its output before {0}")]
    UnexpectedEof(&'static str),

    #[error("evaluator wrote to stderr: {0}")]
    Stderr(String),

    #[error("evaluator exited with {0}")]
    ExitStatus(std::process::ExitStatus),

    #[error("unexpected evaluator output for '{fen}': {line}")]
    Malformed { fen: String, line: String },

    #[error("integer paths disagree on '{fen}': evaluator {external}, replica {replica}")]
    Mismatch {
        fen: String,
        external: i32,
        replica: i32,
    },

    #[error(transparent)]
    Encoding(#[from] EncodingError),

    #[error(transparent)]
    Candle(#[from] candle_core::Error),

    #[error(transparent)]
    Export(#[from] ExportError),
}
