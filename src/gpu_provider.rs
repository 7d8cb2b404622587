/*
 psbench
 Copyright 2022-2023 Peter Pearson.
 Licensed under the Apache License, Version 2.0 (the "License");
 You may not use this file except in compliance with the License.
 You may obtain a copy of the License at
 http://www.apache.org/licenses/LICENSE-2.0
 Unless required by applicable law or agreed to in writing, software
 distributed under the License is distributed on an "AS IS" BASIS,
 WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 See the License for the specific language governing permissions and
 limitations under the License.
 ---------
*/

use crate::errors::GpuError;

/// Host-wide reading of one GPU.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GpuReading {
    // fraction, 0.0 - 1.0
    pub load:           f64,
    // in MB
    pub memory_used:    f64,
}

pub trait GpuMetricsProvider: Send + 'static {
    fn reading(&mut self, index: u32) -> Result<GpuReading, GpuError>;
}

/// The GPU provider compiled into this build.
#[cfg(feature = "nvml")]
pub fn default_gpu_provider() -> Result<Box<dyn GpuMetricsProvider>, GpuError> {
    Ok(Box::new(nvml::NvmlGpuProvider::new()?))
}

/// The GPU provider compiled into this build.
#[cfg(not(feature = "nvml"))]
pub fn default_gpu_provider() -> Result<Box<dyn GpuMetricsProvider>, GpuError> {
    Err(GpuError::Unavailable)
}

#[cfg(feature = "nvml")]
pub mod nvml {
    use nvml_wrapper::error::NvmlError;
    use nvml_wrapper::Nvml;

    use super::{GpuMetricsProvider, GpuReading};
    use crate::errors::GpuError;

    const BYTES_PER_MB: f64 = (1024 * 1024) as f64;

    pub struct NvmlGpuProvider {
        nvml: Nvml,
    }

    impl NvmlGpuProvider {
        pub fn new() -> Result<NvmlGpuProvider, GpuError> {
            let nvml = Nvml::init().map_err(|err| GpuError::Driver(format!("NVML init failed: {err}")))?;
            Ok(NvmlGpuProvider { nvml })
        }
    }

    impl GpuMetricsProvider for NvmlGpuProvider {
        fn reading(&mut self, index: u32) -> Result<GpuReading, GpuError> {
            let device = self.nvml.device_by_index(index).map_err(|err| match err {
                NvmlError::InvalidArg | NvmlError::NotFound => GpuError::NoSuchDevice(index),
                other => GpuError::Driver(other.to_string()),
            })?;

            let utilization = device.utilization_rates().map_err(|err| GpuError::Driver(err.to_string()))?;
            let memory = device.memory_info().map_err(|err| GpuError::Driver(err.to_string()))?;

            Ok(GpuReading { load: utilization.gpu as f64 / 100.0, memory_used: memory.used as f64 / BYTES_PER_MB })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(not(feature = "nvml"))]
    #[test]
    fn test_default_provider_unavailable_without_nvml() {
        assert!(matches!(default_gpu_provider(), Err(GpuError::Unavailable)));
    }
}
