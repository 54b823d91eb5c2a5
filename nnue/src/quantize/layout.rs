use crate::error::ExportError;
use crate::network::{IntWidth, LayerSpec};

use super::{OverflowCount, QuantizedLayer, QuantizedTensor};

// Binary layout (little-endian, no header):
//
//   [layer 0 weights][layer 0 biases][layer 1 weights][layer 1 biases]...
//
// Weights are `[out][in]` unless the layer is transposed, in which case they
// are `[in][out]`. Element widths come from each layer's spec, so the file
// can only be read back with the model config that produced it.

pub fn expected_size(specs: &[LayerSpec]) -> usize {
    specs.iter().map(LayerSpec::byte_len).sum()
}

pub fn serialize(layers: &[QuantizedLayer]) -> Vec<u8> {
    let specs: Vec<LayerSpec> = layers.iter().map(|l| l.spec.clone()).collect();
    let mut out = Vec::with_capacity(expected_size(&specs));

    for layer in layers {
        let weights = if layer.spec.transpose {
            layer.weights.transposed()
        } else {
            layer.weights.clone()
        };
        write_values(&mut out, layer.spec.weight.width, &weights.values);
        write_values(&mut out, layer.spec.bias.width, &layer.biases);
    }

    out
}

/// Parses an exported network back into layers in training layout.
pub fn read_layers(specs: &[LayerSpec], bytes: &[u8]) -> Result<Vec<QuantizedLayer>, ExportError> {
    let expected = expected_size(specs);
    if bytes.len() != expected {
        return Err(ExportError::SizeMismatch {
            expected,
            actual: bytes.len(),
        });
    }

    let mut offset = 0;
    let mut layers = Vec::with_capacity(specs.len());

    for spec in specs {
        let weight_values = read_values(bytes, &mut offset, spec.weight.width, spec.weight_len());
        let biases = read_values(bytes, &mut offset, spec.bias.width, spec.bias_len());

        let weights = if spec.transpose {
            QuantizedTensor {
                width: spec.weight.width,
                rows: spec.input_dim,
                cols: spec.output_dim,
                values: weight_values,
            }
            .transposed()
        } else {
            QuantizedTensor {
                width: spec.weight.width,
                rows: spec.output_dim,
                cols: spec.input_dim,
                values: weight_values,
            }
        };

        layers.push(QuantizedLayer {
            spec: spec.clone(),
            weights,
            biases,
            overflow: OverflowCount::default(),
        });
    }

    Ok(layers)
}

fn write_values(out: &mut Vec<u8>, width: IntWidth, values: &[i32]) {
    for &v in values {
        match width {
            IntWidth::I8 => out.extend_from_slice(&(v as i8).to_le_bytes()),
            IntWidth::I16 => out.extend_from_slice(&(v as i16).to_le_bytes()),
            IntWidth::I32 => out.extend_from_slice(&v.to_le_bytes()),
        }
    }
}

// Length is validated up front
fn read_values(bytes: &[u8], offset: &mut usize, width: IntWidth, count: usize) -> Vec<i32> {
    let size = width.bytes();
    let end = *offset + count * size;
    let values = bytes[*offset..end]
        .chunks_exact(size)
        .map(|b| match width {
            IntWidth::I8 => i8::from_le_bytes([b[0]]) as i32,
            IntWidth::I16 => i16::from_le_bytes([b[0], b[1]]) as i32,
            IntWidth::I32 => i32::from_le_bytes([b[0], b[1], b[2], b[3]]),
        })
        .collect();
    *offset = end;
    values
}
