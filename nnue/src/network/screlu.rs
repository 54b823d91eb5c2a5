use candle_core::{Result, Tensor};
use candle_nn::{Linear, VarBuilder};

use crate::config::ScreluConfig;

use super::{feature_transformer, hidden_layer, perspective_accumulator};

/// `ft -> SCReLU -> out`, with the feature transformer shared by both
/// perspectives.
pub struct ScreluNetwork {
    pub(crate) ft: Linear,
    pub(crate) out: Linear,
    pub(crate) config: ScreluConfig,
}

impl ScreluNetwork {
    pub fn new(config: &ScreluConfig, vs: &VarBuilder) -> Result<Self> {
        Ok(Self {
            ft: feature_transformer(config.hidden_size, vs.pp("ft"))?,
            out: hidden_layer(2 * config.hidden_size, 1, vs.pp("out"))?,
            config: config.clone(),
        })
    }

    /// Output of the last layer, before `output_scale`.
    pub fn forward(&self, white: &Tensor, black: &Tensor, stm: &Tensor) -> Result<Tensor> {
        let acc = perspective_accumulator(&self.ft, white, black, stm)?;
        let activated = acc.clamp(0f32, 1f32)?.sqr()?;
        activated.apply(&self.out)
    }
}
