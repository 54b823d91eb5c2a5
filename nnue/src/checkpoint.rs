use std::collections::HashMap;
use std::path::Path;

use candle_core::{Device, Tensor, Var};
use candle_nn::VarMap;

use crate::error::CheckpointError;
use crate::optimizer::ClampedAdam;
use crate::run::write_atomic_path;

// Tensor names inside a checkpoint file:
//   param/<var>     trained parameter
//   adam_m/<group>  first moment
//   adam_v/<group>  second moment
//   meta/<key>      scalar bookkeeping
const PARAM: &str = "param/";
const ADAM_M: &str = "adam_m/";
const ADAM_V: &str = "adam_v/";

const META_EPOCH: &str = "meta/epoch";
const META_STEP: &str = "meta/step";
const META_LR: &str = "meta/lr";
const META_LAST_LOSS: &str = "meta/last_loss";
const META_BEST_LOSS: &str = "meta/best_loss";

/// Progress of a training run that a resumed run continues from.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TrainingState {
    /// Last completed epoch.
    pub epoch: usize,
    pub last_loss: f32,
    pub best_loss: f32,
}

pub fn save(
    path: &Path,
    varmap: &VarMap,
    optimizer: &ClampedAdam,
    state: &TrainingState,
) -> Result<(), CheckpointError> {
    let mut tensors = parameter_tensors(varmap)?;

    for (name, m, v) in optimizer.moments() {
        tensors.insert(format!("{}{}", ADAM_M, name), m.as_tensor().detach());
        tensors.insert(format!("{}{}", ADAM_V, name), v.as_tensor().detach());
    }

    let cpu = Device::Cpu;
    tensors.insert(META_EPOCH.to_string(), Tensor::new(&[state.epoch as i64], &cpu)?);
    tensors.insert(
        META_STEP.to_string(),
        Tensor::new(&[optimizer.step_count() as i64], &cpu)?,
    );
    tensors.insert(META_LR.to_string(), Tensor::new(&[optimizer.learning_rate()], &cpu)?);
    tensors.insert(META_LAST_LOSS.to_string(), Tensor::new(&[state.last_loss], &cpu)?);
    tensors.insert(META_BEST_LOSS.to_string(), Tensor::new(&[state.best_loss], &cpu)?);

    write_atomic_path(path, |tmp| {
        candle_core::safetensors::save(&tensors, tmp)?;
        Ok::<(), CheckpointError>(())
    })
}

/// Restores parameters, optimizer moments and counters.
pub fn load(
    path: &Path,
    varmap: &VarMap,
    optimizer: &mut ClampedAdam,
) -> Result<TrainingState, CheckpointError> {
    let tensors = candle_core::safetensors::load(path, &Device::Cpu)?;
    restore_parameters(&tensors, varmap)?;

    for (name, m, v) in optimizer.moments() {
        restore_var(&tensors, &format!("{}{}", ADAM_M, name), m)?;
        restore_var(&tensors, &format!("{}{}", ADAM_V, name), v)?;
    }

    optimizer.set_step_count(scalar::<i64>(&tensors, META_STEP)? as usize);
    optimizer.set_learning_rate(scalar::<f64>(&tensors, META_LR)?);

    Ok(TrainingState {
        epoch: scalar::<i64>(&tensors, META_EPOCH)? as usize,
        last_loss: scalar::<f32>(&tensors, META_LAST_LOSS)?,
        best_loss: scalar::<f32>(&tensors, META_BEST_LOSS)?,
    })
}

/// Restores only the trained parameters, for export and validation.
pub fn load_parameters(path: &Path, varmap: &VarMap) -> Result<(), CheckpointError> {
    let tensors = candle_core::safetensors::load(path, &Device::Cpu)?;
    restore_parameters(&tensors, varmap)
}

fn parameter_tensors(varmap: &VarMap) -> Result<HashMap<String, Tensor>, CheckpointError> {
    let vars = lock(varmap)?;
    Ok(vars
        .iter()
        .map(|(name, var)| (format!("{}{}", PARAM, name), var.as_tensor().detach()))
        .collect())
}

fn restore_parameters(
    tensors: &HashMap<String, Tensor>,
    varmap: &VarMap,
) -> Result<(), CheckpointError> {
    let vars = lock(varmap)?;
    for (name, var) in vars.iter() {
        restore_var(tensors, &format!("{}{}", PARAM, name), var)?;
    }
    Ok(())
}

fn restore_var(
    tensors: &HashMap<String, Tensor>,
    key: &str,
    var: &Var,
) -> Result<(), CheckpointError> {
    let tensor = tensors
        .get(key)
        .ok_or_else(|| CheckpointError::MissingTensor(key.to_string()))?;
    var.set(&tensor.to_device(var.device())?)?;
    Ok(())
}

fn scalar<T: candle_core::WithDType>(
    tensors: &HashMap<String, Tensor>,
    key: &str,
) -> Result<T, CheckpointError> {
    let tensor = tensors
        .get(key)
        .ok_or_else(|| CheckpointError::MissingTensor(key.to_string()))?;
    let values = tensor.to_vec1::<T>()?;
    values
        .first()
        .copied()
        .ok_or_else(|| CheckpointError::MissingTensor(key.to_string()))
}

fn lock(
    varmap: &VarMap,
) -> Result<std::sync::MutexGuard<'_, HashMap<String, Var>>, CheckpointError> {
    varmap
        .data()
        .lock()
        .map_err(|_| {
            CheckpointError::Candle(candle_core::Error::Msg("varmap lock poisoned".into()))
        })
}
