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

// In-memory providers with a scripted process tree, shared by the unit tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};

use crate::errors::{GpuError, ProviderError};
use crate::gpu_provider::{GpuMetricsProvider, GpuReading};
use crate::process_provider::{IoCounters, MemoryBreakdown, ProcessMetricsProvider, ProcessSample};

pub const MB: u64 = 1024 * 1024;

#[derive(Clone, Debug, Default)]
pub struct FakeProcess {
    pub parent:         Option<u32>,
    pub cpu_percent:    f64,
    pub memory:         MemoryBreakdown,
    pub io:             IoCounters,
}

impl FakeProcess {
    /// Process whose four memory metrics are all `mb` megabytes and I/O is `io_mb` each way.
    pub fn new(parent: Option<u32>, cpu_percent: f64, mb: u64, io_mb: u64) -> FakeProcess {
        FakeProcess {
            parent,
            cpu_percent,
            memory: MemoryBreakdown { rss: mb * MB, vms: mb * MB, uss: mb * MB, pss: mb * MB },
            io: IoCounters { read_bytes: io_mb * MB, write_bytes: io_mb * MB },
        }
    }
}

#[derive(Debug, Default)]
pub struct FakeState {
    pub processes:          BTreeMap<u32, FakeProcess>,
    // listed by descendants(), but gone by the time they're queried
    pub vanish_on_query:    HashSet<u32>,
    pub fail_enumeration:   bool,
    pub io_unsupported:     bool,
    pub opened:             Vec<u32>,
    pub samples_taken:      usize,
    pub panic_on_sample:    bool,
}

#[derive(Clone, Default)]
pub struct FakeProvider {
    pub state: Arc<Mutex<FakeState>>,
}

impl FakeProvider {
    pub fn with_processes(processes: Vec<(u32, FakeProcess)>) -> FakeProvider {
        let provider = FakeProvider::default();
        provider.state.lock().unwrap().processes = processes.into_iter().collect();
        provider
    }
}

impl ProcessMetricsProvider for FakeProvider {
    type Handle = u32;

    fn open(&mut self, pid: u32) -> Result<u32, ProviderError> {
        let mut state = self.state.lock().unwrap();
        if !state.processes.contains_key(&pid) || state.vanish_on_query.contains(&pid) {
            return Err(ProviderError::NoSuchProcess { pid });
        }
        state.opened.push(pid);
        Ok(pid)
    }

    fn descendants(&mut self, pid: u32) -> Result<Vec<u32>, ProviderError> {
        let state = self.state.lock().unwrap();
        if state.fail_enumeration {
            return Err(ProviderError::Other("kernel interface unavailable".to_string()));
        }
        if !state.processes.contains_key(&pid) {
            return Err(ProviderError::NoSuchProcess { pid });
        }

        let mut found = Vec::new();
        let mut frontier = vec![pid];
        while let Some(parent) = frontier.pop() {
            for (&child, process) in &state.processes {
                if process.parent == Some(parent) {
                    found.push(child);
                    frontier.push(child);
                }
            }
        }
        Ok(found)
    }

    fn sample(&mut self, handle: &mut u32) -> Result<ProcessSample, ProviderError> {
        let mut state = self.state.lock().unwrap();
        if state.panic_on_sample {
            // release the lock first so the test can still inspect the state
            drop(state);
            panic!("scripted sampling failure");
        }
        state.samples_taken += 1;
        let pid = *handle;
        match state.processes.get(&pid) {
            Some(process) if !state.vanish_on_query.contains(&pid) => {
                Ok(ProcessSample { cpu_percent: process.cpu_percent, memory: process.memory })
            }
            _ => Err(ProviderError::NoSuchProcess { pid }),
        }
    }

    fn io_counters(&mut self, handle: &mut u32) -> Result<Option<IoCounters>, ProviderError> {
        let state = self.state.lock().unwrap();
        if state.io_unsupported {
            return Ok(None);
        }
        state.processes.get(&*handle).map(|process| Some(process.io)).ok_or(ProviderError::NoSuchProcess { pid: *handle })
    }
}

#[derive(Clone, Default)]
pub struct FakeGpuProvider {
    pub readings: Arc<Mutex<HashMap<u32, GpuReading>>>,
}

impl GpuMetricsProvider for FakeGpuProvider {
    fn reading(&mut self, index: u32) -> Result<GpuReading, GpuError> {
        self.readings.lock().unwrap().get(&index).copied().ok_or(GpuError::NoSuchDevice(index))
    }
}
