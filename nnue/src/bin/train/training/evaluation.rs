use candle_core::Device;
use nnue::network::EvaluatorModel;
use std::error::Error;

use crate::dataset::DataLoader;
use crate::utils::loss::wdl_mse;

/// Sample-weighted mean loss over every batch of `loader`.
pub fn evaluate(
    model: &EvaluatorModel,
    loader: DataLoader,
    device: &Device,
) -> Result<f32, Box<dyn Error>> {
    let mut total_loss = 0.0;
    let mut total_samples = 0;

    for batch in loader {
        let batch_len = batch.len();
        if batch_len == 0 {
            continue;
        }

        let (white, black, stm, targets) = batch.to_tensors(device)?;
        let preds = model.forward_wdl(&white, &black, &stm)?;
        let loss = wdl_mse(&preds, &targets)?;

        total_loss += loss.to_vec0::<f32>()? * batch_len as f32;
        total_samples += batch_len;
    }

    Ok(total_loss / total_samples.max(1) as f32)
}
