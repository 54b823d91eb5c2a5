mod accumulator;

pub use accumulator::{Accumulator, FeatureTransformer};

use std::fs;
use std::path::Path;

use crate::config::ModelConfig;
use crate::encoding::{self, Features};
use crate::error::{EncodingError, ExportError};
use crate::quantize::{read_layers, QuantizedLayer};

/// Integer-only evaluator over an exported network file.
///
/// This is the search-time side of the export contract: it never sees the
/// floating-point model, only the bytes and the config that describes them.
pub struct IntegerNetwork {
    config: ModelConfig,
    ft: FeatureTransformer,
    layers: Vec<DenseLayer>,
    white: Accumulator,
    black: Accumulator,
    // Scratch buffers to avoid allocation during forward pass
    input: Vec<i64>,
    output: Vec<i64>,
}

struct DenseLayer {
    // [out_idx][in_idx]
    weights: Box<[i64]>,
    biases: Box<[i64]>,
    input_size: usize,
    output_size: usize,
}

impl DenseLayer {
    fn from_layer(layer: &QuantizedLayer) -> Self {
        Self {
            weights: layer.weights.values.iter().map(|&w| w as i64).collect(),
            biases: layer.biases.iter().map(|&b| b as i64).collect(),
            input_size: layer.spec.input_dim,
            output_size: layer.spec.output_dim,
        }
    }

    fn forward(&self, input: &[i64], output: &mut Vec<i64>) {
        output.clear();
        for (row, &bias) in self.weights.chunks_exact(self.input_size).zip(self.biases.iter()) {
            let dot: i64 = row.iter().zip(input).map(|(&w, &x)| w * x).sum();
            output.push(bias + dot);
        }
        debug_assert_eq!(output.len(), self.output_size);
    }
}

impl IntegerNetwork {
    pub fn load(config: &ModelConfig, path: &Path) -> Result<Self, ExportError> {
        Self::from_bytes(config, &fs::read(path)?)
    }

    pub fn from_bytes(config: &ModelConfig, bytes: &[u8]) -> Result<Self, ExportError> {
        let layers = read_layers(&config.layer_specs(), bytes)?;
        let (ft_layer, dense) = layers.split_first().ok_or(ExportError::SizeMismatch {
            expected: 0,
            actual: bytes.len(),
        })?;

        let ft = FeatureTransformer::from_layer(ft_layer);
        let white = Accumulator::new(&ft);
        let black = Accumulator::new(&ft);

        Ok(Self {
            config: config.clone(),
            layers: dense.iter().map(DenseLayer::from_layer).collect(),
            input: Vec::with_capacity(2 * ft.hidden_size()),
            output: Vec::new(),
            ft,
            white,
            black,
        })
    }

    /// Forgets the incremental state; the next evaluation refreshes fully.
    pub fn reset(&mut self) {
        self.white.reset(&self.ft);
        self.black.reset(&self.ft);
    }

    pub fn evaluate_fen(&mut self, fen: &str) -> Result<i32, EncodingError> {
        let features = encoding::encode_fen(fen)?;
        Ok(self.evaluate(&features))
    }

    /// Score in the config's output units, relative to the side to move.
    pub fn evaluate(&mut self, features: &Features) -> i32 {
        self.white.update(&self.ft, &encoding::to_bitset(&features.white));
        self.black.update(&self.ft, &encoding::to_bitset(&features.black));

        let (us, them) = if features.white_to_move {
            (self.white.values(), self.black.values())
        } else {
            (self.black.values(), self.white.values())
        };

        let qa = self.config.qa();
        let qb = self.config.qb();
        let output_scale = self.config.output_scale();

        let eval = match &self.config {
            ModelConfig::Screlu(_) => {
                let out = &self.layers[0];
                let mut sum = 0i64;
                for (&acc, &w) in us.iter().chain(them).zip(out.weights.iter()) {
                    let c = (acc as i64).clamp(0, qa);
                    sum += w * c * c;
                }
                (sum + qa * out.biases[0]) / qa * output_scale / (qa * qb)
            }
            ModelConfig::Crelu(_) => {
                let shift = qb.trailing_zeros();

                self.input.clear();
                self.input
                    .extend(us.iter().chain(them).map(|&acc| (acc as i64).clamp(0, qa)));

                let (hidden, last) = self.layers.split_at(self.layers.len() - 1);
                for layer in hidden {
                    layer.forward(&self.input, &mut self.output);
                    self.input.clear();
                    self.input
                        .extend(self.output.iter().map(|&s| (s >> shift).clamp(0, qa)));
                }

                last[0].forward(&self.input, &mut self.output);
                self.output[0] * output_scale / (qa * qb)
            }
        };

        eval.clamp(i32::MIN as i64, i32::MAX as i64) as i32
    }
}
