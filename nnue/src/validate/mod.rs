mod external;
mod replica;
mod report;

pub use external::{parse_answer, NativeEvaluator, QUIT, READY};
pub use replica::Replica;
pub use report::{check_exact, compare, ConsistencyReport, ErrorStats};

use std::path::{Path, PathBuf};

use crate::config::ModelConfig;
use crate::encoding::{self, Features};
use crate::error::ValidationError;
use crate::network::EvaluatorModel;
use crate::quantize::ExportedBinary;

/// Mean absolute error, in output units, tolerated between the float model
/// and the integer replica.
pub const DEFAULT_ERROR_BOUND: f64 = 8.0;

const FLOAT_BATCH: usize = 256;

/// How to start the external evaluator. The artifact path is appended to
/// `args`.
#[derive(Clone, Debug)]
pub struct EvaluatorCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

/// Checks an exported network three ways: float model vs. integer replica
/// (bounded error) and integer replica vs. an external evaluator (exact).
/// Each phase can run on its own.
pub struct ConsistencyValidator<'a> {
    model: &'a EvaluatorModel,
    config: ModelConfig,
    exported: &'a ExportedBinary,
    error_bound: f64,
}

impl<'a> ConsistencyValidator<'a> {
    pub fn new(model: &'a EvaluatorModel, exported: &'a ExportedBinary) -> Self {
        Self {
            config: model.config(),
            model,
            exported,
            error_bound: DEFAULT_ERROR_BOUND,
        }
    }

    pub fn with_error_bound(mut self, error_bound: f64) -> Self {
        self.error_bound = error_bound;
        self
    }

    pub fn encode(fens: &[String]) -> Result<Vec<Features>, ValidationError> {
        fens.iter()
            .map(|fen| encoding::encode_fen(fen).map_err(ValidationError::from))
            .collect()
    }

    pub fn float_scores(&self, positions: &[Features]) -> Result<Vec<f32>, ValidationError> {
        let mut scores = Vec::with_capacity(positions.len());
        for chunk in positions.chunks(FLOAT_BATCH) {
            scores.extend(self.model.evaluate_batch(chunk)?);
        }
        Ok(scores)
    }

    pub fn replica_scores(&self, positions: &[Features]) -> Vec<i32> {
        let replica = Replica::new(&self.config, &self.exported.layers);
        positions.iter().map(|f| replica.evaluate(f)).collect()
    }

    /// Runs a fresh evaluator process over `fens` against `artifact`.
    pub fn external_scores(
        &self,
        command: &EvaluatorCommand,
        artifact: &Path,
        fens: &[String],
    ) -> Result<Vec<i32>, ValidationError> {
        let mut evaluator =
            NativeEvaluator::spawn(&command.program, &command.args, Some(artifact))?;
        let scores = fens
            .iter()
            .map(|fen| evaluator.evaluate(fen))
            .collect::<Result<Vec<_>, _>>()?;
        evaluator.finish()?;
        Ok(scores)
    }

    /// All phases; the external one only when a command is given.
    pub fn run(
        &self,
        fens: &[String],
        external: Option<(&EvaluatorCommand, &Path)>,
    ) -> Result<ConsistencyReport, ValidationError> {
        let positions = Self::encode(fens)?;
        let float = self.float_scores(&positions)?;
        let replica = self.replica_scores(&positions);

        let external_scores = match external {
            Some((command, artifact)) => Some(self.external_scores(command, artifact, fens)?),
            None => None,
        };

        compare(
            fens,
            &float,
            &replica,
            external_scores.as_deref(),
            self.error_bound,
            self.exported.overflow_total(),
        )
    }
}
