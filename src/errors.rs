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

use thiserror::Error;

/// Errors surfaced to whoever sets up or drives a benchmark.
///
/// Steady-state sampling failures never end up here: they are swallowed
/// at the sampler boundary so the observed work keeps running.
#[derive(Debug, Error)]
pub enum BenchError {
    #[error("scheduler was already started")]
    AlreadyStarted,

    #[error("scheduler was never started")]
    NotStarted,

    #[error("process metrics provider: {0}")]
    Process(#[from] ProviderError),

    #[error("GPU metrics provider: {0}")]
    Gpu(#[from] GpuError),

    #[error("real-time sink: {0}")]
    Io(#[from] std::io::Error),

    #[error("sampling thread panicked")]
    SamplerPanicked,
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("no such process (pid {pid})")]
    NoSuchProcess { pid: u32 },

    #[error("access denied (pid {pid})")]
    AccessDenied { pid: u32 },

    #[error("{0}")]
    Other(String),
}

impl ProviderError {
    /// True when the process exited between enumeration and query.
    pub fn is_vanished(&self) -> bool {
        matches!(self, ProviderError::NoSuchProcess { .. })
    }
}

#[derive(Debug, Error)]
pub enum GpuError {
    #[error("GPU monitoring is not available in this build (enable the `nvml` feature)")]
    Unavailable,

    #[error("no GPU with index {0}")]
    NoSuchDevice(u32),

    #[error("{0}")]
    Driver(String),
}
