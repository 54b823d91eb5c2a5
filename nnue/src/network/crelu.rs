use candle_core::{Result, Tensor};
use candle_nn::{Linear, VarBuilder};

use crate::config::CreluConfig;

use super::{feature_transformer, hidden_layer, perspective_accumulator};

/// `ft -> CReLU -> [hidden -> CReLU]* -> out`.
pub struct CreluNetwork {
    pub(crate) ft: Linear,
    pub(crate) hidden: Vec<Linear>,
    pub(crate) out: Linear,
    pub(crate) config: CreluConfig,
}

impl CreluNetwork {
    pub fn new(config: &CreluConfig, vs: &VarBuilder) -> Result<Self> {
        let ft = feature_transformer(config.hidden_size, vs.pp("ft"))?;

        let mut input = 2 * config.hidden_size;
        let mut hidden = Vec::with_capacity(config.hidden_layers.len());
        for (i, &size) in config.hidden_layers.iter().enumerate() {
            hidden.push(hidden_layer(input, size, vs.pp(format!("l{}", i + 1)))?);
            input = size;
        }

        Ok(Self {
            ft,
            hidden,
            out: hidden_layer(input, 1, vs.pp("out"))?,
            config: config.clone(),
        })
    }

    /// Output of the last layer, before `output_scale`.
    pub fn forward(&self, white: &Tensor, black: &Tensor, stm: &Tensor) -> Result<Tensor> {
        let mut x = perspective_accumulator(&self.ft, white, black, stm)?.clamp(0f32, 1f32)?;
        for layer in &self.hidden {
            x = x.apply(layer)?.clamp(0f32, 1f32)?;
        }
        x.apply(&self.out)
    }
}
