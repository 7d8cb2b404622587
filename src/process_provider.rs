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

use std::collections::{HashMap, HashSet, VecDeque};

use psutil::process::{Process, ProcessError};

use crate::errors::ProviderError;

/// Memory usage of one process, in bytes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MemoryBreakdown {
    pub rss:    u64,
    pub vms:    u64,
    pub uss:    u64,
    pub pss:    u64,
}

/// Cumulative I/O of one process, in bytes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IoCounters {
    pub read_bytes:     u64,
    pub write_bytes:    u64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ProcessSample {
    // per-core: 100.0 is one full core, 800.0 is eight
    pub cpu_percent:    f64,
    pub memory:         MemoryBreakdown,
}

/// Source of raw per-process metrics.
///
/// Handles are long-lived: the CPU percentage is computed relative to the previous
/// `sample()` call on the same handle, so callers should keep them around. The first
/// `sample()` on a fresh handle has nothing to compare against and reports 0.0.
pub trait ProcessMetricsProvider: Send + 'static {
    type Handle: Send + 'static;

    fn open(&mut self, pid: u32) -> Result<Self::Handle, ProviderError>;

    /// All live descendants of `pid` (children, grandchildren, ...), not including `pid`.
    fn descendants(&mut self, pid: u32) -> Result<Vec<u32>, ProviderError>;

    fn sample(&mut self, handle: &mut Self::Handle) -> Result<ProcessSample, ProviderError>;

    /// `Ok(None)` when this platform doesn't do per-process I/O accounting.
    fn io_counters(&mut self, handle: &mut Self::Handle) -> Result<Option<IoCounters>, ProviderError>;
}

/// Provider built on psutil, with the Linux-only extras (USS/PSS, I/O) read from /proc.
#[derive(Clone, Copy, Debug, Default)]
pub struct PsutilProvider;

pub struct PsutilHandle {
    process:        Process,

    // psutil measures the first cpu_percent() since Process::new(), which may be microseconds ago
    cpu_primed:     bool,

    #[cfg(target_os = "linux")]
    proc_entry:     procfs::process::Process,
}

impl PsutilProvider {
    pub fn new() -> PsutilProvider {
        PsutilProvider
    }
}

fn from_process_error(err: ProcessError) -> ProviderError {
    match err {
        ProcessError::NoSuchProcess { pid } | ProcessError::ZombieProcess { pid } => ProviderError::NoSuchProcess { pid },
        ProcessError::AccessDenied { pid } => ProviderError::AccessDenied { pid },
        other => ProviderError::Other(other.to_string()),
    }
}

#[cfg(target_os = "linux")]
fn from_proc_error(pid: u32, err: procfs::ProcError) -> ProviderError {
    use procfs::ProcError;

    match err {
        ProcError::NotFound(_) => ProviderError::NoSuchProcess { pid },
        // "No such process" isn't always mapped to NotFound by the procfs crate
        ProcError::Io(ref io_err, _) if io_err.raw_os_error() == Some(3) => ProviderError::NoSuchProcess { pid },
        ProcError::PermissionDenied(_) => ProviderError::AccessDenied { pid },
        other => ProviderError::Other(other.to_string()),
    }
}

#[cfg(target_os = "linux")]
fn unique_and_proportional_bytes(pid: u32, proc_entry: &procfs::process::Process) -> Result<(u64, u64), ProviderError> {
    let rollup = proc_entry.smaps_rollup().map_err(|err| from_proc_error(pid, err))?;

    let mut uss = 0;
    let mut pss = 0;
    for map in rollup.memory_map_rollup.iter() {
        let fields = &map.extension.map;
        let field = |name: &str| fields.get(name).copied().unwrap_or(0);
        uss += field("Private_Clean") + field("Private_Dirty");
        pss += field("Pss");
    }
    Ok((uss, pss))
}

impl ProcessMetricsProvider for PsutilProvider {
    type Handle = PsutilHandle;

    fn open(&mut self, pid: u32) -> Result<PsutilHandle, ProviderError> {
        let process = Process::new(pid).map_err(from_process_error)?;

        #[cfg(target_os = "linux")]
        let proc_entry = procfs::process::Process::new(pid as i32).map_err(|err| from_proc_error(pid, err))?;

        Ok(PsutilHandle {
            process,
            cpu_primed: false,
            #[cfg(target_os = "linux")]
            proc_entry,
        })
    }

    fn descendants(&mut self, pid: u32) -> Result<Vec<u32>, ProviderError> {
        let processes = psutil::process::processes().map_err(|err| ProviderError::Other(err.to_string()))?;

        let mut live = HashSet::new();
        let mut children: HashMap<u32, Vec<u32>> = HashMap::new();
        // entries that vanished while listing come back as errors, they're simply not part of the tree
        for process in processes.into_iter().flatten() {
            live.insert(process.pid());
            if let Ok(Some(ppid)) = process.ppid() {
                children.entry(ppid).or_default().push(process.pid());
            }
        }

        if !live.contains(&pid) {
            return Err(ProviderError::NoSuchProcess { pid });
        }

        let mut found = Vec::new();
        let mut visited = HashSet::from([pid]);
        let mut queue = VecDeque::from([pid]);
        while let Some(parent) = queue.pop_front() {
            for &child in children.get(&parent).into_iter().flatten() {
                if visited.insert(child) {
                    found.push(child);
                    queue.push_back(child);
                }
            }
        }
        Ok(found)
    }

    fn sample(&mut self, handle: &mut PsutilHandle) -> Result<ProcessSample, ProviderError> {
        let pid = handle.process.pid();
        let cpu_percent = handle.process.cpu_percent().map_err(from_process_error)? as f64;
        let cpu_percent = if handle.cpu_primed { cpu_percent } else { 0.0 };
        handle.cpu_primed = true;
        let mem = handle.process.memory_info().map_err(from_process_error)?;

        #[cfg(target_os = "linux")]
        let (uss, pss) = unique_and_proportional_bytes(pid, &handle.proc_entry)?;

        // without smaps, the resident set is the best estimate there is
        #[cfg(not(target_os = "linux"))]
        let (uss, pss) = {
            let _ = pid;
            (mem.rss(), mem.rss())
        };

        Ok(ProcessSample { cpu_percent, memory: MemoryBreakdown { rss: mem.rss(), vms: mem.vms(), uss, pss } })
    }

    #[cfg(target_os = "linux")]
    fn io_counters(&mut self, handle: &mut PsutilHandle) -> Result<Option<IoCounters>, ProviderError> {
        let pid = handle.process.pid();
        let io = handle.proc_entry.io().map_err(|err| from_proc_error(pid, err))?;
        Ok(Some(IoCounters { read_bytes: io.read_bytes, write_bytes: io.write_bytes }))
    }

    #[cfg(not(target_os = "linux"))]
    fn io_counters(&mut self, _handle: &mut PsutilHandle) -> Result<Option<IoCounters>, ProviderError> {
        Ok(None)
    }
}
