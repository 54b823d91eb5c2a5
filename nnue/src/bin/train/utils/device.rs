use candle_core::Device;
use std::error::Error;

/// Training device: the first accelerator compiled in, unless `cpu_only`.
pub fn select_device(cpu_only: bool) -> Result<Device, Box<dyn Error>> {
    if !cpu_only {
        if let Some(device) = accelerator()? {
            return Ok(device);
        }
    }
    log::info!("Training on CPU");
    Ok(Device::Cpu)
}

#[cfg(feature = "cuda")]
fn accelerator() -> Result<Option<Device>, Box<dyn Error>> {
    let device = Device::cuda_if_available(0)?;
    if device.is_cuda() {
        log::info!("Training on CUDA device 0");
        return Ok(Some(device));
    }
    Ok(None)
}

#[cfg(all(feature = "metal", not(feature = "cuda")))]
fn accelerator() -> Result<Option<Device>, Box<dyn Error>> {
    match Device::new_metal(0) {
        Ok(device) => {
            log::info!("Training on Metal device 0");
            Ok(Some(device))
        }
        Err(e) => {
            log::warn!("Metal unavailable ({}), falling back to CPU", e);
            Ok(None)
        }
    }
}

#[cfg(not(any(feature = "cuda", feature = "metal")))]
fn accelerator() -> Result<Option<Device>, Box<dyn Error>> {
    Ok(None)
}
