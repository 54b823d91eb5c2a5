pub mod crelu;
pub mod layer;
pub mod screlu;

pub use crelu::CreluNetwork;
pub use layer::{IntWidth, LayerSpec, QuantSpec};
pub use screlu::ScreluNetwork;

use candle_core::{DType, Device, Result, Tensor, Var};
use candle_nn::{Init, Linear, VarBuilder, VarMap};

use crate::config::ModelConfig;
use crate::encoding::{self, Features, NUM_FEATURES};
use crate::error::{EncodingError, ExportError, ModelError};
use crate::optimizer::ParamGroup;
use crate::position::Position;
use crate::quantize::{self, ExportedBinary, LayerParameters};

/// Standard deviation of the feature transformer initialization.
/// Roughly 32 inputs are active per perspective.
const FT_INIT_STD: f64 = 0.25; // sqrt(2 / 32)

/// The trainable evaluator, one variant per architecture.
pub enum EvaluatorModel {
    Screlu(ScreluNetwork),
    Crelu(CreluNetwork),
}

impl EvaluatorModel {
    pub fn new(config: &ModelConfig, vs: &VarBuilder) -> Result<Self> {
        Ok(match config {
            ModelConfig::Screlu(c) => EvaluatorModel::Screlu(ScreluNetwork::new(c, vs)?),
            ModelConfig::Crelu(c) => EvaluatorModel::Crelu(CreluNetwork::new(c, vs)?),
        })
    }

    /// Builds a freshly initialized model whose variables live in a new `VarMap`.
    pub fn with_varmap(config: &ModelConfig, device: &Device) -> Result<(Self, VarMap)> {
        let varmap = VarMap::new();
        let vs = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let model = Self::new(config, &vs)?;
        Ok((model, varmap))
    }

    pub fn config(&self) -> ModelConfig {
        match self {
            EvaluatorModel::Screlu(n) => ModelConfig::Screlu(n.config.clone()),
            EvaluatorModel::Crelu(n) => ModelConfig::Crelu(n.config.clone()),
        }
    }

    #[inline(always)]
    pub fn feature_count(&self) -> usize {
        NUM_FEATURES
    }

    pub fn get_features(
        &self,
        position: &Position,
    ) -> std::result::Result<Features, EncodingError> {
        encoding::encode(position)
    }

    /// Raw score in centipawn-like units.
    ///
    /// `white`/`black` are dense `[batch, NUM_FEATURES]` one-hot tensors,
    /// `stm` is `[batch, 1]` with 1.0 where white is to move.
    pub fn forward(&self, white: &Tensor, black: &Tensor, stm: &Tensor) -> Result<Tensor> {
        let (output, scale) = match self {
            EvaluatorModel::Screlu(n) => (n.forward(white, black, stm)?, n.config.output_scale),
            EvaluatorModel::Crelu(n) => (n.forward(white, black, stm)?, n.config.output_scale),
        };
        output * scale as f64
    }

    /// Predicted win probability for the side to move.
    pub fn forward_wdl(&self, white: &Tensor, black: &Tensor, stm: &Tensor) -> Result<Tensor> {
        let raw = self.forward(white, black, stm)?;
        candle_nn::ops::sigmoid(&(raw / self.config().wdl_scale() as f64)?)
    }

    pub fn layer_specs(&self) -> Vec<LayerSpec> {
        self.config().layer_specs()
    }

    /// Candle layers in export order.
    pub fn layers(&self) -> Vec<&Linear> {
        match self {
            EvaluatorModel::Screlu(n) => vec![&n.ft, &n.out],
            EvaluatorModel::Crelu(n) => std::iter::once(&n.ft)
                .chain(n.hidden.iter())
                .chain(std::iter::once(&n.out))
                .collect(),
        }
    }

    /// Snapshot of the floating parameters, paired with their layer specs.
    pub fn layer_parameters(&self) -> Result<Vec<LayerParameters>> {
        self.layer_specs()
            .into_iter()
            .zip(self.layers())
            .map(|(spec, linear)| LayerParameters::from_candle_linear(spec, linear))
            .collect()
    }

    pub fn export_quantized(&self) -> std::result::Result<ExportedBinary, ExportError> {
        quantize::export(&self.layer_parameters()?)
    }

    /// Trainable variables of every layer with the ranges the optimizer
    /// must keep them in.
    pub fn parameter_groups(&self, varmap: &VarMap) -> Result<Vec<ParamGroup>> {
        let vars = varmap
            .data()
            .lock()
            .map_err(|_| candle_core::Error::Msg("varmap lock poisoned".to_string()))?;
        let lookup = |name: &str| -> Result<Var> {
            vars.get(name)
                .cloned()
                .ok_or_else(|| candle_core::Error::Msg(format!("missing variable {}", name)))
        };

        let mut groups = Vec::new();
        for spec in self.layer_specs() {
            let weight = format!("{}.weight", spec.name);
            let bias = format!("{}.bias", spec.name);
            groups.push(ParamGroup {
                var: lookup(&weight)?,
                name: weight,
                clamp: spec.weight_clamp(),
            });
            groups.push(ParamGroup {
                var: lookup(&bias)?,
                name: bias,
                clamp: spec.bias_clamp(),
            });
        }
        Ok(groups)
    }

    /// Floating-point score of a single position.
    pub fn evaluate(&self, position: &Position) -> std::result::Result<f32, ModelError> {
        let features = self.get_features(position)?;
        let scores = self.evaluate_batch(std::slice::from_ref(&features))?;
        Ok(scores[0])
    }

    /// Floating-point scores of encoded positions, on the model's device.
    pub fn evaluate_batch(&self, batch: &[Features]) -> Result<Vec<f32>> {
        let (white, black, stm) = batch_tensors(batch, self.device())?;
        self.forward(&white, &black, &stm)?.flatten_all()?.to_vec1()
    }

    pub fn device(&self) -> &Device {
        match self {
            EvaluatorModel::Screlu(n) => n.ft.weight().device(),
            EvaluatorModel::Crelu(n) => n.ft.weight().device(),
        }
    }
}

/// Dense training tensors for a batch of encoded positions.
pub fn batch_tensors(batch: &[Features], device: &Device) -> Result<(Tensor, Tensor, Tensor)> {
    let n = batch.len();
    let mut white = vec![0f32; n * NUM_FEATURES];
    let mut black = vec![0f32; n * NUM_FEATURES];
    let mut stm = Vec::with_capacity(n);

    for (i, features) in batch.iter().enumerate() {
        let row = i * NUM_FEATURES..(i + 1) * NUM_FEATURES;
        encoding::write_dense(&features.white, &mut white[row.clone()]);
        encoding::write_dense(&features.black, &mut black[row]);
        stm.push(if features.white_to_move { 1f32 } else { 0f32 });
    }

    Ok((
        Tensor::from_vec(white, (n, NUM_FEATURES), device)?,
        Tensor::from_vec(black, (n, NUM_FEATURES), device)?,
        Tensor::from_vec(stm, (n, 1), device)?,
    ))
}

/// `[us, them]` accumulator: `[w, b]` when white is to move, `[b, w]` otherwise.
fn perspective_accumulator(
    ft: &Linear,
    white: &Tensor,
    black: &Tensor,
    stm: &Tensor,
) -> Result<Tensor> {
    let w = white.apply(ft)?;
    let b = black.apply(ft)?;

    let white_first = Tensor::cat(&[&w, &b], 1)?;
    let black_first = Tensor::cat(&[&b, &w], 1)?;
    let not_stm = stm.affine(-1.0, 1.0)?;

    white_first.broadcast_mul(stm)? + black_first.broadcast_mul(&not_stm)?
}

/// Gaussian-initialized linear layer with a zero bias.
fn init_linear(input: usize, output: usize, std: f64, vs: VarBuilder) -> Result<Linear> {
    let weight = vs.get_with_hints(
        (output, input),
        "weight",
        Init::Randn {
            mean: 0.0,
            stdev: std,
        },
    )?;
    let bias = vs.get_with_hints(output, "bias", Init::Const(0.0))?;
    Ok(Linear::new(weight, Some(bias)))
}

fn feature_transformer(hidden_size: usize, vs: VarBuilder) -> Result<Linear> {
    init_linear(NUM_FEATURES, hidden_size, FT_INIT_STD, vs)
}

fn hidden_layer(input: usize, output: usize, vs: VarBuilder) -> Result<Linear> {
    init_linear(input, output, (2.0 / input as f64).sqrt(), vs)
}
