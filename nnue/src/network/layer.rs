use crate::error::ConfigError;

/// Integer type a tensor is stored as in the exported network.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IntWidth {
    I8,
    I16,
    I32,
}

impl IntWidth {
    #[inline(always)]
    pub fn min(self) -> i64 {
        match self {
            IntWidth::I8 => i8::MIN as i64,
            IntWidth::I16 => i16::MIN as i64,
            IntWidth::I32 => i32::MIN as i64,
        }
    }

    #[inline(always)]
    pub fn max(self) -> i64 {
        match self {
            IntWidth::I8 => i8::MAX as i64,
            IntWidth::I16 => i16::MAX as i64,
            IntWidth::I32 => i32::MAX as i64,
        }
    }

    #[inline(always)]
    pub fn bytes(self) -> usize {
        match self {
            IntWidth::I8 => 1,
            IntWidth::I16 => 2,
            IntWidth::I32 => 4,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            IntWidth::I8 => "i8",
            IntWidth::I16 => "i16",
            IntWidth::I32 => "i32",
        }
    }
}

/// Fixed-point representation of one tensor: `int = round(float * scale)`,
/// with halves rounded to even, saturated to `width`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QuantSpec {
    pub width: IntWidth,
    pub scale: i64,
}

impl QuantSpec {
    pub const fn new(width: IntWidth, scale: i64) -> Self {
        Self { width, scale }
    }

    /// Returns the saturated integer and whether saturation changed it.
    #[inline(always)]
    pub fn quantize(&self, value: f32) -> (i32, bool) {
        let rounded = (value as f64 * self.scale as f64).round_ties_even();
        let clamped = rounded.clamp(self.width.min() as f64, self.width.max() as f64);
        // NaN survives the clamp and is reported as an overflow
        let clamped = if clamped.is_nan() { 0.0 } else { clamped };
        (clamped as i32, clamped != rounded)
    }

    /// Floating range that quantizes without saturation.
    pub fn float_range(&self) -> (f32, f32) {
        (
            (self.width.min() as f64 / self.scale as f64) as f32,
            (self.width.max() as f64 / self.scale as f64) as f32,
        )
    }
}

/// Everything the exporter, the optimizer and the integer evaluators need to
/// agree on for one linear layer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LayerSpec {
    pub name: String,
    pub input_dim: usize,
    pub output_dim: usize,
    pub weight: QuantSpec,
    pub bias: QuantSpec,
    /// Export the weight matrix as `[input][output]` instead of `[output][input]`.
    pub transpose: bool,
    /// Whether the optimizer keeps this layer inside its quantized range.
    pub clamped: bool,
    /// Upper bound on the number of non-zero inputs.
    pub active_inputs: usize,
    /// Largest integer input activation.
    pub input_max: i64,
    /// Integer input activation that represents 1.0.
    pub input_scale: i64,
    /// Factor the integer bias is multiplied by before it joins the sum.
    pub bias_multiplier: i64,
    /// Bit width of the integer sum.
    pub accumulator_bits: u32,
}

impl LayerSpec {
    #[inline(always)]
    pub fn weight_len(&self) -> usize {
        self.input_dim * self.output_dim
    }

    #[inline(always)]
    pub fn bias_len(&self) -> usize {
        self.output_dim
    }

    pub fn byte_len(&self) -> usize {
        self.weight_len() * self.weight.width.bytes() + self.bias_len() * self.bias.width.bytes()
    }

    /// Clamp ranges for the optimizer, if this layer is clamped.
    pub fn weight_clamp(&self) -> Option<(f32, f32)> {
        self.clamped.then(|| self.weight.float_range())
    }

    pub fn bias_clamp(&self) -> Option<(f32, f32)> {
        self.clamped.then(|| self.bias.float_range())
    }

    /// Checks that the scales of this layer are consistent with each other
    /// and that the worst-case integer sum fits the accumulator.
    pub fn check_headroom(&self) -> Result<(), ConfigError> {
        let fail = |reason: String| {
            Err(ConfigError::Headroom {
                layer: self.name.clone(),
                reason,
            })
        };

        if self.weight.scale <= 0 || self.bias.scale <= 0 {
            return fail("scales must be positive".to_string());
        }

        // Weight sum and bias must live on the same fixed-point scale
        let sum_scale = self.weight.scale as i128 * self.input_scale as i128;
        let bias_scale = self.bias.scale as i128 * self.bias_multiplier as i128;
        if sum_scale != bias_scale {
            return fail(format!(
                "weight scale {} x input scale {} != bias scale {} x {}",
                self.weight.scale, self.input_scale, self.bias.scale, self.bias_multiplier
            ));
        }

        // A unit value must be representable
        if self.weight.scale > self.weight.width.max() {
            return fail(format!(
                "weight scale {} exceeds {} range",
                self.weight.scale,
                self.weight.width.name()
            ));
        }
        if self.bias.scale > self.bias.width.max() {
            return fail(format!(
                "bias scale {} exceeds {} range",
                self.bias.scale,
                self.bias.width.name()
            ));
        }

        let worst_case = self.active_inputs as i128
            * self.weight.width.max() as i128
            * self.input_max as i128
            + self.bias.width.max() as i128 * self.bias_multiplier as i128;
        let limit = (1i128 << (self.accumulator_bits - 1)) - 1;
        if worst_case > limit {
            return fail(format!(
                "worst-case sum {} overflows a {}-bit accumulator",
                worst_case, self.accumulator_bits
            ));
        }

        Ok(())
    }
}
