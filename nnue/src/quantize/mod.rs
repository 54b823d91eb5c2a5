mod layout;

pub use layout::{expected_size, read_layers, serialize};

use std::io;
use std::path::Path;

use candle_core::Result as CandleResult;
use candle_nn::Linear;

use crate::error::ExportError;
use crate::network::{IntWidth, LayerSpec, QuantSpec};
use crate::run::write_atomic;

/// Floating parameters of one layer as trained: weights `[out][in]`, row-major.
#[derive(Clone, Debug)]
pub struct LayerParameters {
    pub spec: LayerSpec,
    pub weights: Vec<f32>,
    pub biases: Vec<f32>,
}

impl LayerParameters {
    pub fn from_candle_linear(spec: LayerSpec, linear: &Linear) -> CandleResult<Self> {
        let bias = linear
            .bias()
            .ok_or_else(|| candle_core::Error::Msg(format!("layer {} has no bias", spec.name)))?;
        Ok(Self {
            weights: linear.weight().flatten_all()?.to_vec1()?,
            biases: bias.flatten_all()?.to_vec1()?,
            spec,
        })
    }
}

/// Integer matrix kept in training layout (`rows` = outputs).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QuantizedTensor {
    pub width: IntWidth,
    pub rows: usize,
    pub cols: usize,
    pub values: Vec<i32>,
}

impl QuantizedTensor {
    pub fn transposed(&self) -> Self {
        let mut values = vec![0i32; self.values.len()];
        for r in 0..self.rows {
            for c in 0..self.cols {
                values[c * self.rows + r] = self.values[r * self.cols + c];
            }
        }
        Self {
            width: self.width,
            rows: self.cols,
            cols: self.rows,
            values,
        }
    }

    #[inline(always)]
    pub fn row(&self, r: usize) -> &[i32] {
        &self.values[r * self.cols..(r + 1) * self.cols]
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OverflowCount {
    pub weights: usize,
    pub biases: usize,
}

impl OverflowCount {
    pub fn total(&self) -> usize {
        self.weights + self.biases
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QuantizedLayer {
    pub spec: LayerSpec,
    pub weights: QuantizedTensor,
    pub biases: Vec<i32>,
    pub overflow: OverflowCount,
}

/// The serialized network together with the layers it was built from.
#[derive(Clone, Debug)]
pub struct ExportedBinary {
    pub layers: Vec<QuantizedLayer>,
    pub bytes: Vec<u8>,
}

impl ExportedBinary {
    pub fn overflow_total(&self) -> usize {
        self.layers.iter().map(|l| l.overflow.total()).sum()
    }

    /// Per-layer overflow, for logging and reports.
    pub fn report(&self) -> Vec<(String, OverflowCount)> {
        self.layers
            .iter()
            .map(|l| (l.spec.name.clone(), l.overflow))
            .collect()
    }

    /// Writes the buffer to a temporary file next to `path` and renames it
    /// into place.
    pub fn write_atomic(&self, path: &Path) -> io::Result<()> {
        write_atomic(path, |file| {
            use std::io::Write;
            file.write_all(&self.bytes)
        })
    }
}

pub fn quantize_layer(params: &LayerParameters) -> Result<QuantizedLayer, ExportError> {
    let spec = &params.spec;
    check_len(spec, "weight", spec.weight_len(), params.weights.len())?;
    check_len(spec, "bias", spec.bias_len(), params.biases.len())?;

    let (weights, weight_overflow) = quantize_values(&params.weights, spec.weight);
    let (biases, bias_overflow) = quantize_values(&params.biases, spec.bias);

    Ok(QuantizedLayer {
        spec: spec.clone(),
        weights: QuantizedTensor {
            width: spec.weight.width,
            rows: spec.output_dim,
            cols: spec.input_dim,
            values: weights,
        },
        biases,
        overflow: OverflowCount {
            weights: weight_overflow,
            biases: bias_overflow,
        },
    })
}

/// Quantizes every layer and serializes them in order. Saturated values are
/// counted and logged, never fatal.
pub fn export(params: &[LayerParameters]) -> Result<ExportedBinary, ExportError> {
    let layers = params
        .iter()
        .map(quantize_layer)
        .collect::<Result<Vec<_>, _>>()?;

    for layer in &layers {
        if layer.overflow.total() > 0 {
            log::warn!(
                "Layer {}: {} weights and {} biases saturated to {}/{}",
                layer.spec.name,
                layer.overflow.weights,
                layer.overflow.biases,
                layer.spec.weight.width.name(),
                layer.spec.bias.width.name(),
            );
        }
    }

    let bytes = serialize(&layers);
    Ok(ExportedBinary { layers, bytes })
}

fn quantize_values(values: &[f32], spec: QuantSpec) -> (Vec<i32>, usize) {
    let mut overflow = 0;
    let quantized = values
        .iter()
        .map(|&v| {
            let (q, saturated) = spec.quantize(v);
            overflow += saturated as usize;
            q
        })
        .collect();
    (quantized, overflow)
}

fn check_len(
    spec: &LayerSpec,
    what: &str,
    expected: usize,
    actual: usize,
) -> Result<(), ExportError> {
    if expected != actual {
        return Err(ExportError::ShapeMismatch {
            layer: format!("{}.{}", spec.name, what),
            expected,
            actual,
        });
    }
    Ok(())
}
