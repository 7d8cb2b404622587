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

use std::path::Path;
use std::time::{Duration, Instant};

use crate::benchmark_record::BenchmarkRecord;
use crate::errors::BenchError;
use crate::periodic_scheduler::{PeriodicScheduler, PeriodicWork};
use crate::process_aggregator::{GpuMonitor, ProcessTreeAggregator};
use crate::process_provider::ProcessMetricsProvider;
use crate::record_writer::RealTimeSink;

// Everything a tick touches. Owned by the sampling thread while the sampler runs.
struct SamplingTask<P: ProcessMetricsProvider> {
    aggregator: ProcessTreeAggregator<P>,
    record:     BenchmarkRecord,
    sink:       Option<RealTimeSink>,
    start_time: Option<Instant>,
}

impl<P: ProcessMetricsProvider> PeriodicWork for SamplingTask<P> {
    fn work(&mut self) {
        let start_time = *self.start_time.get_or_insert_with(Instant::now);
        self.aggregator.update_record(&mut self.record, start_time);

        log::trace!("Sampled process tree {}: {:?}", self.aggregator.pid(), self.record);

        if let Some(sink) = self.sink.as_mut() {
            if let Err(err) = sink.append(&self.record) {
                log::warn!("Unable to append to real-time file {}: {}", sink.path().display(), err);
            }
        }
    }
}

/// Periodically samples a process tree into a `BenchmarkRecord` on a background thread.
pub struct BenchmarkSampler<P: ProcessMetricsProvider> {
    scheduler: PeriodicScheduler<SamplingTask<P>>,
}

impl<P: ProcessMetricsProvider> BenchmarkSampler<P> {
    /// Opens the root process and, if requested, the real-time file (header written straight away).
    pub fn new(pid: u32, mut record: BenchmarkRecord, interval: Duration, gpus: Option<GpuMonitor>, rt_path: Option<&Path>,
               provider: P) -> Result<BenchmarkSampler<P>, BenchError> {
        let aggregator = ProcessTreeAggregator::new(pid, provider, gpus)?;

        if let Some(num_gpus) = aggregator.num_gpus() {
            record.reset_gpus(num_gpus);
        }

        let sink = rt_path.map(RealTimeSink::create).transpose()?;

        let task = SamplingTask { aggregator, record, sink, start_time: None };
        Ok(BenchmarkSampler { scheduler: PeriodicScheduler::new(interval, task) })
    }

    /// Takes the first sample before returning, then keeps sampling in the background.
    pub fn start(&mut self) -> Result<(), BenchError> {
        self.scheduler.start()
    }

    /// Stops sampling, waiting for a tick in progress to complete, and hands back the record.
    pub fn stop(&mut self) -> Result<BenchmarkRecord, BenchError> {
        let task = self.scheduler.cancel()?;
        Ok(task.record)
    }

    pub fn times_called(&self) -> usize {
        self.scheduler.times_called()
    }
}
