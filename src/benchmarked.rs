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

use std::path::PathBuf;
use std::time::{Duration, Instant};

use crate::benchmark_record::BenchmarkRecord;
use crate::benchmark_sampler::BenchmarkSampler;
use crate::errors::{BenchError, GpuError};
use crate::gpu_provider::{default_gpu_provider, GpuMetricsProvider};
use crate::periodic_scheduler::BENCHMARK_INTERVAL;
use crate::process_aggregator::GpuMonitor;
use crate::process_provider::{ProcessMetricsProvider, PsutilProvider};

/// Which process (tree) a benchmark observes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BenchmarkTarget {
    CurrentProcess,
    Pid(u32),
    /// don't observe anything, the record is handed back as it was given
    Disabled,
}

#[derive(Clone, Debug)]
pub struct BenchmarkParams {
    pub target:     BenchmarkTarget,

    // steady-state sampling period
    pub interval:   Duration,

    // GPU indices to monitor, None (or empty) to skip GPUs entirely
    pub gpus:       Option<Vec<u32>>,

    // real-time TSV file, one line per sample
    pub rt_path:    Option<PathBuf>,
}

impl BenchmarkParams {
    pub fn new() -> BenchmarkParams {
        BenchmarkParams { target: BenchmarkTarget::CurrentProcess, interval: BENCHMARK_INTERVAL, gpus: None, rt_path: None }
    }

    pub fn set_target(&mut self, target: BenchmarkTarget) {
        self.target = target;
    }

    pub fn set_interval(&mut self, interval: Duration) {
        self.interval = interval;
    }

    pub fn set_gpus(&mut self, gpus: Vec<u32>) {
        self.gpus = Some(gpus);
    }

    pub fn set_rt_path(&mut self, rt_path: PathBuf) {
        self.rt_path = Some(rt_path);
    }

    fn gpu_indices(&self) -> Option<&[u32]> {
        self.gpus.as_deref().filter(|gpus| !gpus.is_empty())
    }
}

impl Default for BenchmarkParams {
    fn default() -> Self {
        BenchmarkParams::new()
    }
}

/// A running observation of a process tree.
///
/// Sampling stops when the benchmark is finished or dropped, so an early return
/// or a panic in the observed code doesn't leave the sampling thread behind.
pub struct Benchmark<P: ProcessMetricsProvider = PsutilProvider> {
    sampler:    Option<BenchmarkSampler<P>>,

    // only held while disabled, otherwise the sampler owns it
    record:     Option<BenchmarkRecord>,

    start_time: Instant,
}

impl Benchmark<PsutilProvider> {
    /// Starts observing with psutil and, if GPUs were asked for, the GPU provider of this build.
    pub fn start(params: &BenchmarkParams, record: Option<BenchmarkRecord>) -> Result<Benchmark<PsutilProvider>, BenchError> {
        let gpu_provider = match (params.target, params.gpu_indices()) {
            (BenchmarkTarget::Disabled, _) | (_, None) => None,
            (_, Some(_)) => Some(default_gpu_provider()?),
        };

        Benchmark::start_with(params, record, PsutilProvider::new(), gpu_provider)
    }
}

impl<P: ProcessMetricsProvider> Benchmark<P> {
    pub fn start_with(params: &BenchmarkParams, record: Option<BenchmarkRecord>, provider: P,
                      gpu_provider: Option<Box<dyn GpuMetricsProvider>>) -> Result<Benchmark<P>, BenchError> {
        let record = record.unwrap_or_default();
        let start_time = Instant::now();

        let pid = match params.target {
            BenchmarkTarget::Disabled => return Ok(Benchmark { sampler: None, record: Some(record), start_time }),
            BenchmarkTarget::CurrentProcess => std::process::id(),
            BenchmarkTarget::Pid(pid) => pid,
        };

        let gpus = match (params.gpu_indices(), gpu_provider) {
            (Some(indices), Some(provider)) => Some(GpuMonitor { indices: indices.to_vec(), provider }),
            (Some(_), None) => return Err(GpuError::Unavailable.into()),
            (None, _) => None,
        };

        let mut sampler = BenchmarkSampler::new(pid, record, params.interval, gpus, params.rt_path.as_deref(), provider)?;
        sampler.start()?;

        log::debug!("Started benchmarking process {}", pid);

        Ok(Benchmark { sampler: Some(sampler), record: None, start_time })
    }

    pub fn is_active(&self) -> bool {
        self.sampler.is_some()
    }

    /// Stops sampling and returns the record, with `running_time` set to the wall-clock time since start.
    pub fn finish(mut self) -> Result<BenchmarkRecord, BenchError> {
        let Some(mut sampler) = self.sampler.take() else {
            return Ok(self.record.take().unwrap_or_default());
        };

        let mut record = sampler.stop()?;
        record.running_time = self.start_time.elapsed().as_secs_f64();
        Ok(record)
    }
}

impl<P: ProcessMetricsProvider> Drop for Benchmark<P> {
    fn drop(&mut self) {
        if let Some(mut sampler) = self.sampler.take() {
            if let Err(err) = sampler.stop() {
                log::warn!("Unable to stop benchmark sampling cleanly: {}", err);
            }
        }
    }
}

/// Observes the process tree (per `params`) while `work` runs.
///
/// Returns the output of `work` along with the record. Sampling is stopped on every
/// way out of `work`, including a panic. Only a failure to start is reported as an
/// error: once `work` has run, a sampling failure yields an empty record instead.
pub fn benchmarked<T, F>(params: &BenchmarkParams, record: Option<BenchmarkRecord>, work: F) -> Result<(T, BenchmarkRecord), BenchError>
where
    F: FnOnce() -> T,
{
    let benchmark = Benchmark::<PsutilProvider>::start(params, record)?;
    let output = work();
    Ok((output, finish_keeping_output(benchmark)))
}

/// Same as `benchmarked()`, with explicit metrics providers.
pub fn benchmarked_with<P, T, F>(params: &BenchmarkParams, record: Option<BenchmarkRecord>, provider: P,
                                 gpu_provider: Option<Box<dyn GpuMetricsProvider>>, work: F) -> Result<(T, BenchmarkRecord), BenchError>
where
    P: ProcessMetricsProvider,
    F: FnOnce() -> T,
{
    let benchmark = Benchmark::start_with(params, record, provider, gpu_provider)?;
    let output = work();
    Ok((output, finish_keeping_output(benchmark)))
}

// The work has already run, so its output is returned even if sampling broke down. The
// record went down with the sampling thread; only the running time survives.
fn finish_keeping_output<P: ProcessMetricsProvider>(benchmark: Benchmark<P>) -> BenchmarkRecord {
    let start_time = benchmark.start_time;
    benchmark.finish().unwrap_or_else(|err| {
        log::warn!("Benchmark sampling failed, its measurements are lost: {}", err);
        BenchmarkRecord { running_time: start_time.elapsed().as_secs_f64(), ..BenchmarkRecord::new() }
    })
}
