use crate::config::ModelConfig;
use crate::encoding::{FeatureSet, Features};
use crate::quantize::QuantizedLayer;

/// In-process integer forward pass straight over the exporter's layers.
///
/// Computes every position from scratch in training layout. It shares no
/// code with the incremental evaluator, so agreement between the two checks
/// the exported bytes, not a common implementation.
pub struct Replica<'a> {
    config: &'a ModelConfig,
    layers: &'a [QuantizedLayer],
}

impl<'a> Replica<'a> {
    pub fn new(config: &'a ModelConfig, layers: &'a [QuantizedLayer]) -> Self {
        Self { config, layers }
    }

    pub fn evaluate(&self, features: &Features) -> i32 {
        let (us, them) = features.by_side_to_move();
        let ft = &self.layers[0];
        let qa = self.config.qa();
        let qb = self.config.qb();

        let mut activations: Vec<i64> = Vec::with_capacity(2 * ft.spec.output_dim);
        activations.extend(transform(ft, us));
        activations.extend(transform(ft, them));

        let eval = match self.config {
            ModelConfig::Screlu(_) => {
                let out = &self.layers[1];
                let weighted: i64 = activations
                    .iter()
                    .zip(out.weights.row(0))
                    .map(|(&acc, &w)| {
                        let c = acc.clamp(0, qa);
                        w as i64 * c * c
                    })
                    .sum();
                let total = weighted + qa * out.biases[0] as i64;
                total / qa * self.config.output_scale() / (qa * qb)
            }
            ModelConfig::Crelu(_) => {
                let shift = qb.trailing_zeros();
                let mut x: Vec<i64> = activations.iter().map(|&a| a.clamp(0, qa)).collect();

                let last = self.layers.len() - 1;
                for layer in &self.layers[1..last] {
                    // Arithmetic shift: negative sums round toward -inf
                    x = dense(layer, &x)
                        .into_iter()
                        .map(|s| (s >> shift).clamp(0, qa))
                        .collect();
                }

                dense(&self.layers[last], &x)[0] * self.config.output_scale() / (qa * qb)
            }
        };

        eval.clamp(i32::MIN as i64, i32::MAX as i64) as i32
    }
}

/// Bias plus the weight column of every active feature.
fn transform(ft: &QuantizedLayer, active: &FeatureSet) -> Vec<i64> {
    (0..ft.spec.output_dim)
        .map(|j| {
            let row = ft.weights.row(j);
            ft.biases[j] as i64 + active.iter().map(|&f| row[f] as i64).sum::<i64>()
        })
        .collect()
}

fn dense(layer: &QuantizedLayer, input: &[i64]) -> Vec<i64> {
    (0..layer.spec.output_dim)
        .map(|j| {
            let row = layer.weights.row(j);
            layer.biases[j] as i64
                + row
                    .iter()
                    .zip(input)
                    .map(|(&w, &x)| w as i64 * x)
                    .sum::<i64>()
        })
        .collect()
}
