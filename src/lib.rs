//! Samples the resource usage (memory, I/O, CPU load, GPU load) of a process and all its
//! descendants on a background thread, and reports it as tab-separated text.
//!
//! ```no_run
//! use psbench::{benchmarked, BenchmarkParams, ReportMode};
//!
//! let (_, record) = benchmarked(&BenchmarkParams::new(), None, || {
//!     // work to observe
//! }).unwrap();
//! println!("{}", record.to_tsv(ReportMode::RunningMax));
//! ```

pub mod benchmark_record;
pub mod benchmark_sampler;
pub mod benchmarked;
pub mod errors;
pub mod gpu_provider;
pub mod periodic_scheduler;
pub mod process_aggregator;
pub mod process_provider;
pub mod record_writer;
pub mod utils;

#[cfg(test)]
mod test_support;

pub use benchmark_record::{BenchmarkRecord, ReportMode, GPU_NOT_SAMPLED};
pub use benchmark_sampler::BenchmarkSampler;
pub use benchmarked::{benchmarked, benchmarked_with, Benchmark, BenchmarkParams, BenchmarkTarget};
pub use errors::{BenchError, GpuError, ProviderError};
pub use gpu_provider::{default_gpu_provider, GpuMetricsProvider, GpuReading};
pub use periodic_scheduler::{PeriodicScheduler, PeriodicWork, BENCHMARK_INTERVAL, BENCHMARK_INTERVAL_SHORT};
pub use process_aggregator::{GpuMonitor, ProcessTreeAggregator};
pub use process_provider::{IoCounters, MemoryBreakdown, ProcessMetricsProvider, ProcessSample, PsutilProvider};
pub use record_writer::{print_benchmark_records, write_benchmark_records, RealTimeSink};
