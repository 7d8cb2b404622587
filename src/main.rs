
use std::path::PathBuf;
use std::process::Command;
use std::time::{Duration, Instant};

use argh::FromArgs;
use env_logger::Env;

use psbench::utils::convert_time_period_string_to_seconds;
use psbench::{print_benchmark_records, write_benchmark_records, BenchError, Benchmark, BenchmarkParams, BenchmarkRecord,
              BenchmarkTarget, ProviderError, ReportMode};

// how often `attach` checks whether the process is still alive
const ATTACH_POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(FromArgs, PartialEq, Debug)]
/// Record the peak resource usage of a process and all its child processes.
struct MainArgs {
    #[argh(subcommand)]
    command: SubCommandEnum,

    #[argh(option, short = 'i')]
    /// steady interval between samples, e.g. 30, 30s, 2m. Default is 30 seconds.
    interval: Option<String>,

    #[argh(option, short = 'o')]
    /// file to write the TSV report to. By default it's printed to stdout.
    output: Option<PathBuf>,

    #[argh(switch, short = 'a')]
    /// append to the output file instead of overwriting it
    append: bool,

    #[argh(switch)]
    /// don't write the header line to the report
    no_header: bool,

    #[argh(option)]
    /// file to write a real-time TSV line to after every sample
    rt_path: Option<PathBuf>,

    #[argh(option)]
    /// comma-separated indices of the GPUs to monitor, e.g. 0,1
    gpus: Option<String>,
}

#[derive(FromArgs, PartialEq, Debug)]
#[argh(subcommand)]
enum SubCommandEnum {
    Start(SubCommandStart),
    Attach(SubCommandAttach),
}

#[derive(FromArgs, PartialEq, Debug)]
/// Start a process with command line args.
#[argh(subcommand, name = "start")]
struct SubCommandStart {
    #[argh(positional)]
    /// command line command to start/run and record
    command: String,

    #[argh(positional, greedy)]
    /// command line args
    args: Vec<String>,
}

#[derive(FromArgs, PartialEq, Debug)]
/// Attach to an existing process.
#[argh(subcommand, name = "attach")]
struct SubCommandAttach {
    #[argh(option)]
    /// PID of process to attach to and record
    pid: u32,

    #[argh(option, short = 'd')]
    /// duration to record for, e.g. 90s, 5m. By default until the process ends.
    duration: Option<String>,
}

fn parse_gpu_list(gpus: &str) -> Option<Vec<u32>> {
    gpus.split(',')
        .map(str::trim)
        .filter(|index| !index.is_empty())
        .map(|index| index.parse::<u32>().ok())
        .collect()
}

fn params_from_args(args: &MainArgs) -> Result<BenchmarkParams, String> {
    let mut params = BenchmarkParams::new();

    if let Some(interval) = &args.interval {
        let (secs, _) = convert_time_period_string_to_seconds(interval).ok_or_else(|| format!("Invalid interval: {}", interval))?;
        params.set_interval(Duration::from_secs(secs));
    }

    if let Some(gpus) = &args.gpus {
        params.set_gpus(parse_gpu_list(gpus).ok_or_else(|| format!("Invalid GPU list: {}", gpus))?);
    }

    if let Some(rt_path) = &args.rt_path {
        params.set_rt_path(rt_path.clone());
    }

    Ok(params)
}

fn run_started(start: &SubCommandStart, mut params: BenchmarkParams) -> Result<(BenchmarkRecord, i32), BenchError> {
    let mut child = Command::new(&start.command).args(&start.args).spawn()?;

    params.set_target(BenchmarkTarget::Pid(child.id()));
    let benchmark = match Benchmark::start(&params, None) {
        Ok(benchmark) => benchmark,
        Err(err) => {
            // don't leave it running unobserved
            let _ = child.kill();
            let _ = child.wait();
            return Err(err);
        }
    };

    // can't rely on the process being reported as not running once it exits, as it's our own child:
    // wait() reaps it instead
    let status = child.wait()?;
    let record = benchmark.finish()?;

    Ok((record, status.code().unwrap_or(1)))
}

fn run_attached(attach: &SubCommandAttach, mut params: BenchmarkParams) -> Result<BenchmarkRecord, BenchError> {
    let duration = match &attach.duration {
        Some(duration) => match convert_time_period_string_to_seconds(duration) {
            Some((secs, description)) => {
                eprintln!("Recording for {}", description);
                Some(Duration::from_secs(secs))
            }
            None => {
                eprintln!("Invalid duration: {}, recording until the process ends.", duration);
                None
            }
        },
        None => None,
    };

    let process = psutil::process::Process::new(attach.pid).map_err(|err| ProviderError::Other(err.to_string()))?;

    params.set_target(BenchmarkTarget::Pid(attach.pid));
    let benchmark = Benchmark::start(&params, None)?;

    let started = Instant::now();
    while process.is_running() && duration.map_or(true, |duration| started.elapsed() < duration) {
        std::thread::sleep(ATTACH_POLL_INTERVAL);
    }

    benchmark.finish()
}

fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("warn")).init();

    let args: MainArgs = argh::from_env();

    let params = match params_from_args(&args) {
        Ok(params) => params,
        Err(message) => {
            eprintln!("{}", message);
            std::process::exit(2);
        }
    };

    let result = match &args.command {
        SubCommandEnum::Start(start) => {
            eprintln!("Starting process: {}", start.command);
            run_started(start, params)
        }
        SubCommandEnum::Attach(attach) => {
            eprintln!("Attaching to process: {}", attach.pid);
            run_attached(attach, params).map(|record| (record, 0))
        }
    };

    let (record, exit_code) = match result {
        Ok(result) => result,
        Err(err) => {
            eprintln!("Error monitoring process: {}", err);
            std::process::exit(1);
        }
    };

    let head = !args.no_header;
    let written = match &args.output {
        Some(path) => write_benchmark_records(&[record], path, head, args.append, ReportMode::RunningMax),
        None => print_benchmark_records(&[record], &mut std::io::stdout().lock(), head, ReportMode::RunningMax),
    };

    if let Err(err) = written {
        eprintln!("Error writing benchmark report: {}", err);
        std::process::exit(1);
    }

    std::process::exit(exit_code);
}
