//! Device selection for `--device`

use anyhow::{Context, Result};
use candle_core::utils::metal_is_available;
use candle_core::Device;
use tracing::info;

use crate::train::args::DeviceChoice;

/// Resolves `--device`. `auto` prefers CUDA, then Metal, then CPU.
pub fn select_device(choice: DeviceChoice) -> Result<Device> {
    let device = match choice {
        DeviceChoice::Cpu => Device::Cpu,
        DeviceChoice::Cuda => {
            Device::new_cuda(0).context("CUDA device requested but unavailable")?
        }
        DeviceChoice::Mps => {
            Device::new_metal(0).context("Metal device requested but unavailable")?
        }
        DeviceChoice::Auto => match Device::cuda_if_available(0).unwrap_or(Device::Cpu) {
            Device::Cpu if metal_is_available() => Device::new_metal(0).unwrap_or(Device::Cpu),
            device => device,
        },
    };
    info!("Device initialized: {:?}", device);
    Ok(device)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_is_always_available() -> Result<()> {
        assert!(select_device(DeviceChoice::Cpu)?.is_cpu());
        let auto = select_device(DeviceChoice::Auto)?;
        if !candle_core::utils::cuda_is_available() && !metal_is_available() {
            assert!(auto.is_cpu());
        }
        Ok(())
    }
}
