/*
 psbench
 Copyright 2022 Peter Pearson.
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

use std::time::Instant;

use crate::utils::format_elapsed_hms;

/// Value stored in the per-GPU sequences until that GPU has been sampled once.
pub const GPU_NOT_SAMPLED: f64 = -1.0;

const TSV_HEADER: [&str; 11] = [
    "s",
    "h:m:s",
    "max_rss",
    "max_vms",
    "max_uss",
    "max_pss",
    "io_in",
    "io_out",
    "mean_load",
    "max_gpu_load",
    "max_gpu_mem",
];

/// Which metric family a TSV line reports. The header is the same for both.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReportMode {
    /// running maxima, used for the final report
    RunningMax,
    /// most recent values, used for the real-time sink
    RealTime,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct BenchmarkRecord {
    // in seconds
    pub running_time:   f64,

    // memory values are all in MB
    pub max_rss:        Option<f64>,
    pub max_vms:        Option<f64>,
    pub max_uss:        Option<f64>,
    pub max_pss:        Option<f64>,

    pub rss:            Option<f64>,
    pub vms:            Option<f64>,
    pub uss:            Option<f64>,
    pub pss:            Option<f64>,

    // cumulative I/O of the process tree in MB, None where the platform doesn't track it
    pub io_in:          Option<f64>,
    pub io_out:         Option<f64>,

    /// Estimated CPU time of the whole process tree. Divide by `running_time` for the mean load.
    pub cpu_seconds:    f64,

    // per GPU index, only present when GPU monitoring is enabled. Load in %, memory in MB.
    pub max_gpu_load:   Option<Vec<f64>>,
    pub gpu_load:       Option<Vec<f64>>,
    pub max_gpu_mem:    Option<Vec<f64>>,
    pub gpu_mem:        Option<Vec<f64>>,

    // bookkeeping for the CPU time estimate
    pub(crate) first_time:      Option<Instant>,
    pub(crate) prev_time:       Option<Instant>,

    // once a provider reports I/O accounting as unsupported, it stays that way
    pub(crate) io_unsupported:  bool,
}

impl BenchmarkRecord {
    pub fn new() -> BenchmarkRecord {
        BenchmarkRecord::default()
    }

    /// Record with the GPU sequences presized for `num_gpus` devices, all flagged as never sampled.
    pub fn with_gpus(num_gpus: usize) -> BenchmarkRecord {
        let mut record = BenchmarkRecord::new();
        record.reset_gpus(num_gpus);
        record
    }

    pub(crate) fn reset_gpus(&mut self, num_gpus: usize) {
        let unsampled = vec![GPU_NOT_SAMPLED; num_gpus];
        self.max_gpu_load = Some(unsampled.clone());
        self.gpu_load = Some(unsampled.clone());
        self.max_gpu_mem = Some(unsampled.clone());
        self.gpu_mem = Some(unsampled);
    }

    pub fn io_supported(&self) -> bool {
        !self.io_unsupported
    }

    /// Mean CPU load in percent (100.0 being one fully busy core), None before any time has elapsed.
    pub fn mean_load(&self) -> Option<f64> {
        if self.running_time > 0.0 {
            Some(100.0 * self.cpu_seconds / self.running_time)
        } else {
            None
        }
    }

    pub fn header() -> String {
        TSV_HEADER.join("\t")
    }

    /// One TSV line (without the trailing newline).
    pub fn to_tsv(&self, mode: ReportMode) -> String {
        let (rss, vms, uss, pss, gpu_load, gpu_mem) = match mode {
            ReportMode::RunningMax => (self.max_rss, self.max_vms, self.max_uss, self.max_pss,
                                       &self.max_gpu_load, &self.max_gpu_mem),
            ReportMode::RealTime => (self.rss, self.vms, self.uss, self.pss,
                                     &self.gpu_load, &self.gpu_mem),
        };

        let columns = [
            format!("{:.4}", self.running_time),
            format_elapsed_hms(self.running_time),
            tsv_value(rss),
            tsv_value(vms),
            tsv_value(uss),
            tsv_value(pss),
            tsv_value(self.io_in),
            tsv_value(self.io_out),
            tsv_value(self.mean_load()),
            tsv_list(gpu_load.as_deref()),
            tsv_list(gpu_mem.as_deref()),
        ];

        columns.join("\t")
    }
}

fn tsv_value(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{:.2}", v),
        None => "-".to_string(),
    }
}

fn tsv_list(values: Option<&[f64]>) -> String {
    match values {
        Some(values) => values.iter().map(|v| format!("{:.2}", v)).collect::<Vec<_>>().join(","),
        None => "-".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_header() {
        assert_eq!(BenchmarkRecord::header(),
                   "s\th:m:s\tmax_rss\tmax_vms\tmax_uss\tmax_pss\tio_in\tio_out\tmean_load\tmax_gpu_load\tmax_gpu_mem");
    }

    #[test]
    fn test_empty_record_renders_dashes() {
        let record = BenchmarkRecord::new();
        assert_eq!(record.to_tsv(ReportMode::RunningMax), "0.0000\t0:00:00\t-\t-\t-\t-\t-\t-\t-\t-\t-");
    }

    #[test]
    fn test_running_time_precision() {
        let record = BenchmarkRecord { running_time: 12.3456, ..BenchmarkRecord::new() };
        let line = record.to_tsv(ReportMode::RunningMax);
        let columns: Vec<&str> = line.split('\t').collect();
        assert_eq!(columns[0], "12.3456");
        assert_eq!(columns[1], "0:00:12");
        assert_eq!(columns[8], "0.00");
    }

    #[test]
    fn test_modes_select_metric_family() {
        let record = BenchmarkRecord {
            running_time: 10.0,
            max_rss: Some(200.0),
            max_vms: Some(400.0),
            max_uss: Some(150.0),
            max_pss: Some(175.5),
            rss: Some(100.0),
            vms: Some(300.0),
            uss: Some(50.0),
            pss: Some(75.25),
            io_in: Some(1.5),
            io_out: Some(0.25),
            cpu_seconds: 5.0,
            max_gpu_load: Some(vec![55.0, 10.0]),
            gpu_load: Some(vec![20.0, 5.0]),
            max_gpu_mem: Some(vec![2048.0, 1.0]),
            gpu_mem: Some(vec![1024.0, 0.5]),
            ..BenchmarkRecord::new()
        };

        assert_eq!(record.to_tsv(ReportMode::RunningMax),
                   "10.0000\t0:00:10\t200.00\t400.00\t150.00\t175.50\t1.50\t0.25\t50.00\t55.00,10.00\t2048.00,1.00");
        assert_eq!(record.to_tsv(ReportMode::RealTime),
                   "10.0000\t0:00:10\t100.00\t300.00\t50.00\t75.25\t1.50\t0.25\t50.00\t20.00,5.00\t1024.00,0.50");
    }

    #[test]
    fn test_with_gpus_presizes_sentinels() {
        let record = BenchmarkRecord::with_gpus(2);
        assert_eq!(record.gpu_load, Some(vec![GPU_NOT_SAMPLED, GPU_NOT_SAMPLED]));
        assert_eq!(record.max_gpu_mem, Some(vec![GPU_NOT_SAMPLED, GPU_NOT_SAMPLED]));
        assert!(record.to_tsv(ReportMode::RunningMax).ends_with("\t-1.00,-1.00\t-1.00,-1.00"));

        // absent, rather than empty, without GPUs
        assert_eq!(BenchmarkRecord::new().gpu_load, None);
    }
}
