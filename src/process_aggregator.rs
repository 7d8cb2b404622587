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

use std::collections::HashMap;
use std::time::Instant;

use crate::benchmark_record::BenchmarkRecord;
use crate::errors::{BenchError, ProviderError};
use crate::gpu_provider::GpuMetricsProvider;
use crate::process_provider::{IoCounters, MemoryBreakdown, ProcessMetricsProvider, ProcessSample};

const BYTES_PER_MB: f64 = (1024 * 1024) as f64;

fn bytes_to_mb(bytes: u64) -> f64 {
    bytes as f64 / BYTES_PER_MB
}

/// GPUs to sample on every tick, with the provider to ask.
pub struct GpuMonitor {
    pub indices:    Vec<u32>,
    pub provider:   Box<dyn GpuMetricsProvider>,
}

// Sums over the whole process tree for one tick.
#[derive(Debug, Default)]
struct TreeSnapshot {
    memory:         MemoryBreakdown,
    // None once I/O accounting turned out to be unsupported
    io:             Option<IoCounters>,
    cpu_seconds:    f64,
}

/// Walks a process and all its live descendants and folds their metrics into a `BenchmarkRecord`.
pub struct ProcessTreeAggregator<P: ProcessMetricsProvider> {
    pid:        u32,
    provider:   P,

    // Handles are never evicted: the provider's CPU percentage is relative to the
    // previous query on the same handle.
    procs:      HashMap<u32, P::Handle>,

    gpus:       Option<GpuMonitor>,
}

impl<P: ProcessMetricsProvider> ProcessTreeAggregator<P> {
    pub fn new(pid: u32, mut provider: P, gpus: Option<GpuMonitor>) -> Result<ProcessTreeAggregator<P>, BenchError> {
        let root = provider.open(pid)?;

        let mut procs = HashMap::new();
        procs.insert(pid, root);

        Ok(ProcessTreeAggregator { pid, provider, procs, gpus })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn num_gpus(&self) -> Option<usize> {
        self.gpus.as_ref().map(|gpus| gpus.indices.len())
    }

    /// Number of processes seen so far, including ones that have since exited.
    pub fn num_cached_processes(&self) -> usize {
        self.procs.len()
    }

    /// One aggregation pass. Sampling failures are logged and swallowed.
    pub fn update_record(&mut self, record: &mut BenchmarkRecord, start_time: Instant) {
        self.update_record_at(record, start_time, Instant::now());
    }

    pub(crate) fn update_record_at(&mut self, record: &mut BenchmarkRecord, start_time: Instant, this_time: Instant) {
        match self.measure_tree(record.prev_time, !record.io_unsupported, this_time) {
            Ok(snapshot) => apply_snapshot(record, &snapshot, start_time, this_time),
            Err(err) => {
                // keep whatever the last good tick left in the record
                log::debug!("Discarding sample of process tree {}: {}", self.pid, err);
            }
        }

        self.update_gpus(record);
    }

    fn measure_tree(&mut self, prev_time: Option<Instant>, check_io: bool, this_time: Instant) -> Result<TreeSnapshot, ProviderError> {
        let descendants = self.provider.descendants(self.pid)?;

        let elapsed_since_prev = prev_time.map(|prev| this_time.saturating_duration_since(prev).as_secs_f64());

        let mut snapshot = TreeSnapshot { io: check_io.then(IoCounters::default), ..TreeSnapshot::default() };

        for pid in std::iter::once(self.pid).chain(descendants) {
            let (sample, io, newly_seen) = match self.sample_process(pid, snapshot.io.is_some()) {
                Ok(values) => values,
                Err(err) if err.is_vanished() => {
                    log::debug!("Process {} exited while being sampled, skipping it", pid);
                    continue;
                }
                Err(err) => return Err(err),
            };

            // a process first seen this tick has no CPU baseline yet
            if let (Some(elapsed), false) = (elapsed_since_prev, newly_seen) {
                snapshot.cpu_seconds += sample.cpu_percent / 100.0 * elapsed;
            }

            snapshot.memory.rss += sample.memory.rss;
            snapshot.memory.vms += sample.memory.vms;
            snapshot.memory.uss += sample.memory.uss;
            snapshot.memory.pss += sample.memory.pss;

            snapshot.io = match (snapshot.io, io) {
                (Some(total), Some(this_io)) => Some(IoCounters {
                    read_bytes: total.read_bytes + this_io.read_bytes,
                    write_bytes: total.write_bytes + this_io.write_bytes,
                }),
                _ => None,
            };
        }

        Ok(snapshot)
    }

    // Samples one process; the returned I/O is None when it wasn't asked for or isn't supported.
    // The flag is set when the handle had to be opened for this call.
    fn sample_process(&mut self, pid: u32, check_io: bool) -> Result<(ProcessSample, Option<IoCounters>, bool), ProviderError> {
        let (handle, newly_seen) = match self.procs.entry(pid) {
            std::collections::hash_map::Entry::Occupied(entry) => (entry.into_mut(), false),
            std::collections::hash_map::Entry::Vacant(entry) => (entry.insert(self.provider.open(pid)?), true),
        };

        let sample = self.provider.sample(handle)?;
        let io = if check_io { self.provider.io_counters(handle)? } else { None };

        Ok((sample, io, newly_seen))
    }

    fn update_gpus(&mut self, record: &mut BenchmarkRecord) {
        let Some(gpus) = self.gpus.as_mut() else {
            return;
        };

        for (slot, &index) in gpus.indices.iter().enumerate() {
            let reading = match gpus.provider.reading(index) {
                Ok(reading) => reading,
                Err(err) => {
                    log::warn!("Unable to sample GPU {}: {}", index, err);
                    continue;
                }
            };

            update_gpu_slot(&mut record.max_gpu_load, &mut record.gpu_load, slot, reading.load * 100.0);
            update_gpu_slot(&mut record.max_gpu_mem, &mut record.gpu_mem, slot, reading.memory_used);
        }
    }
}

fn apply_snapshot(record: &mut BenchmarkRecord, snapshot: &TreeSnapshot, start_time: Instant, this_time: Instant) {
    record.running_time = this_time.saturating_duration_since(start_time).as_secs_f64();
    record.cpu_seconds += snapshot.cpu_seconds;
    record.first_time.get_or_insert(this_time);
    record.prev_time = Some(this_time);

    let memory = &snapshot.memory;
    update_running_max(&mut record.max_rss, &mut record.rss, bytes_to_mb(memory.rss));
    update_running_max(&mut record.max_vms, &mut record.vms, bytes_to_mb(memory.vms));
    update_running_max(&mut record.max_uss, &mut record.uss, bytes_to_mb(memory.uss));
    update_running_max(&mut record.max_pss, &mut record.pss, bytes_to_mb(memory.pss));

    match snapshot.io {
        Some(io) => {
            record.io_in = Some(bytes_to_mb(io.read_bytes));
            record.io_out = Some(bytes_to_mb(io.write_bytes));
        }
        None => {
            record.io_unsupported = true;
            record.io_in = None;
            record.io_out = None;
        }
    }
}

fn update_running_max(max: &mut Option<f64>, current: &mut Option<f64>, value: f64) {
    *max = Some(max.unwrap_or(0.0).max(value));
    *current = Some(value);
}

fn update_gpu_slot(max: &mut Option<Vec<f64>>, current: &mut Option<Vec<f64>>, slot: usize, value: f64) {
    if let Some(max_value) = max.as_mut().and_then(|values| values.get_mut(slot)) {
        *max_value = max_value.max(value);
    }
    if let Some(current_value) = current.as_mut().and_then(|values| values.get_mut(slot)) {
        *current_value = value;
    }
}
