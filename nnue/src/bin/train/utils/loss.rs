use candle_core::{Result, Tensor};

/// Mean squared error between predicted and target win probabilities.
pub fn wdl_mse(pred: &Tensor, target: &Tensor) -> Result<Tensor> {
    candle_nn::loss::mse(pred, target)
}
