use crate::encoding::{FeatureBits, NUM_FEATURES};
use crate::quantize::QuantizedLayer;

/// Feature transformer weights in feature-major order, so that adding or
/// removing one feature touches a single contiguous row.
pub struct FeatureTransformer {
    // [feature_idx][hidden_idx]
    weights: Box<[i16]>,
    // [hidden_idx]
    biases: Box<[i16]>,
    hidden_size: usize,
}

impl FeatureTransformer {
    /// The layer's weights are `[hidden][feature]`; the declared width is i16.
    pub fn from_layer(layer: &QuantizedLayer) -> Self {
        let by_feature = layer.weights.transposed();
        Self {
            weights: by_feature.values.iter().map(|&w| w as i16).collect(),
            biases: layer.biases.iter().map(|&b| b as i16).collect(),
            hidden_size: layer.spec.output_dim,
        }
    }

    #[inline(always)]
    pub fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    #[inline(always)]
    fn row(&self, feature_idx: usize) -> &[i16] {
        debug_assert!(feature_idx < NUM_FEATURES);
        let offset = feature_idx * self.hidden_size;
        &self.weights[offset..offset + self.hidden_size]
    }
}

/// Running sum of the active feature rows for one perspective.
///
/// Instead of recomputing the sum for every position, the accumulator
/// remembers the previous feature set and only adds/subtracts the rows of
/// features that changed. Consecutive positions from the same game differ by
/// a handful of features; a king crossing buckets changes all of them.
pub struct Accumulator {
    // [hidden_idx]
    values: Box<[i32]>,
    previous_input: FeatureBits,
}

impl Accumulator {
    pub fn new(ft: &FeatureTransformer) -> Self {
        Self {
            values: ft.biases.iter().map(|&b| b as i32).collect(),
            previous_input: FeatureBits::default(),
        }
    }

    pub fn reset(&mut self, ft: &FeatureTransformer) {
        for (v, &b) in self.values.iter_mut().zip(ft.biases.iter()) {
            *v = b as i32;
        }
        self.previous_input = FeatureBits::default();
    }

    /// Brings the accumulator from the previous input to `new_input`.
    pub fn update(&mut self, ft: &FeatureTransformer, new_input: &FeatureBits) {
        let previous = self.previous_input;
        previous.for_each_diff(new_input, |idx| {
            let add = new_input.get(idx);
            self.apply_feature_change(ft, idx, add);
        });
        self.previous_input = *new_input;
    }

    #[inline(always)]
    pub fn values(&self) -> &[i32] {
        &self.values
    }

    fn apply_feature_change(&mut self, ft: &FeatureTransformer, feature_idx: usize, add: bool) {
        let row = ft.row(feature_idx);
        if add {
            for (v, &w) in self.values.iter_mut().zip(row) {
                *v += w as i32;
            }
        } else {
            for (v, &w) in self.values.iter_mut().zip(row) {
                *v -= w as i32;
            }
        }
    }
}
