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

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::errors::BenchError;

/// Steady-state period between samples.
pub const BENCHMARK_INTERVAL: Duration = Duration::from_secs(30);

/// Period between samples during the ramp-up window.
pub const BENCHMARK_INTERVAL_SHORT: Duration = Duration::from_millis(500);

/// The unit of work a `PeriodicScheduler` drives.
pub trait PeriodicWork: Send + 'static {
    fn work(&mut self);
}

impl<F> PeriodicWork for F
where
    F: FnMut() + Send + 'static,
{
    fn work(&mut self) {
        self()
    }
}

enum SchedulerState<W> {
    Idle(W),
    Running { cancel_tx: Sender<()>, worker: JoinHandle<W> },
    Stopped,
}

/// Runs a piece of work immediately and then periodically on a background thread.
///
/// While the number of calls is at most the interval (in seconds, used as a plain count
/// here), the work runs every `BENCHMARK_INTERVAL_SHORT`; after that, every `interval`.
pub struct PeriodicScheduler<W: PeriodicWork> {
    interval:       Duration,
    times_called:   Arc<AtomicUsize>,
    state:          SchedulerState<W>,
}

impl<W: PeriodicWork> PeriodicScheduler<W> {
    pub fn new(interval: Duration, work: W) -> PeriodicScheduler<W> {
        PeriodicScheduler { interval, times_called: Arc::new(AtomicUsize::new(0)), state: SchedulerState::Idle(work) }
    }

    /// Calls the work once on the caller's thread, then hands it to the background thread.
    pub fn start(&mut self) -> Result<(), BenchError> {
        let mut work = match std::mem::replace(&mut self.state, SchedulerState::Stopped) {
            SchedulerState::Idle(work) => work,
            other => {
                self.state = other;
                return Err(BenchError::AlreadyStarted);
            }
        };

        work.work();
        self.times_called.fetch_add(1, Ordering::SeqCst);

        let (cancel_tx, cancel_rx) = mpsc::channel::<()>();
        let interval = self.interval;
        let times_called = Arc::clone(&self.times_called);

        let worker = std::thread::Builder::new()
            .name("psbench-sampler".to_string())
            .spawn(move || {
                loop {
                    let delay = next_delay(times_called.load(Ordering::SeqCst), interval);
                    match cancel_rx.recv_timeout(delay) {
                        Err(RecvTimeoutError::Timeout) => {
                            work.work();
                            times_called.fetch_add(1, Ordering::SeqCst);
                        }
                        // canceled, or the scheduler itself went away
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                work
            })?;

        self.state = SchedulerState::Running { cancel_tx, worker };
        Ok(())
    }

    /// Stops further calls and hands the work back.
    ///
    /// A call already in progress is allowed to finish first, so once this returns
    /// nothing else touches the work.
    pub fn cancel(&mut self) -> Result<W, BenchError> {
        match std::mem::replace(&mut self.state, SchedulerState::Stopped) {
            SchedulerState::Running { cancel_tx, worker } => {
                // the worker may already be gone if it panicked, join() reports that
                let _ = cancel_tx.send(());
                worker.join().map_err(|_| BenchError::SamplerPanicked)
            }
            other => {
                self.state = other;
                Err(BenchError::NotStarted)
            }
        }
    }

    pub fn is_stopped(&self) -> bool {
        !matches!(self.state, SchedulerState::Running { .. })
    }

    pub fn times_called(&self) -> usize {
        self.times_called.load(Ordering::SeqCst)
    }
}

impl<W: PeriodicWork> Drop for PeriodicScheduler<W> {
    fn drop(&mut self) {
        if let SchedulerState::Running { .. } = self.state {
            if self.cancel().is_err() {
                log::warn!("sampling thread panicked before it could be stopped");
            }
        }
    }
}

// The interval doubles as the length of the ramp-up window, counted in calls.
pub(crate) fn next_delay(times_called: usize, interval: Duration) -> Duration {
    if times_called as f64 > interval.as_secs_f64() {
        interval
    } else {
        BENCHMARK_INTERVAL_SHORT
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_next_delay_ramp_up() {
        let interval = Duration::from_secs(3);
        assert_eq!(next_delay(0, interval), BENCHMARK_INTERVAL_SHORT);
        assert_eq!(next_delay(3, interval), BENCHMARK_INTERVAL_SHORT);
        assert_eq!(next_delay(4, interval), interval);
        assert_eq!(next_delay(100, interval), interval);

        // a sub-second interval is past the ramp-up after the first call
        let interval = Duration::from_millis(200);
        assert_eq!(next_delay(0, interval), BENCHMARK_INTERVAL_SHORT);
        assert_eq!(next_delay(1, interval), interval);
    }

    #[test]
    fn test_start_runs_work_immediately() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let calls_in_work = Arc::clone(&calls);
        let mut scheduler = PeriodicScheduler::new(BENCHMARK_INTERVAL, move || {
            calls_in_work.lock().unwrap().push(std::thread::current().id());
        });
        assert!(scheduler.is_stopped());

        scheduler.start().unwrap();
        assert!(!scheduler.is_stopped());

        // the first call happened on this thread, before start() returned
        assert_eq!(calls.lock().unwrap().first(), Some(&std::thread::current().id()));

        let _work = scheduler.cancel().unwrap();
        assert!(scheduler.is_stopped());
        assert_eq!(scheduler.times_called(), 1);
        assert_eq!(calls.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_ramp_up_cadence_then_cancel() {
        struct Counter(usize);
        impl PeriodicWork for Counter {
            fn work(&mut self) {
                self.0 += 1;
            }
        }

        let mut scheduler = PeriodicScheduler::new(BENCHMARK_INTERVAL, Counter(0));
        scheduler.start().unwrap();
        std::thread::sleep(Duration::from_millis(1_300));
        let counter = scheduler.cancel().unwrap();

        // immediate call + short-cadence calls at ~0.5s and ~1.0s
        assert!(counter.0 >= 2 && counter.0 <= 4, "unexpected call count {}", counter.0);
        assert_eq!(scheduler.times_called(), counter.0);

        // nothing runs once cancel() has returned
        std::thread::sleep(Duration::from_millis(700));
        assert_eq!(scheduler.times_called(), counter.0);
    }

    #[test]
    fn test_cancel_waits_for_call_in_progress() {
        struct SlowWork {
            entered_tx:     mpsc::Sender<()>,
            completed:      usize,
        }
        impl PeriodicWork for SlowWork {
            fn work(&mut self) {
                let _ = self.entered_tx.send(());
                std::thread::sleep(Duration::from_millis(200));
                self.completed += 1;
            }
        }

        let (entered_tx, entered_rx) = mpsc::channel();
        let mut scheduler = PeriodicScheduler::new(BENCHMARK_INTERVAL, SlowWork { entered_tx, completed: 0 });
        scheduler.start().unwrap();

        // first call ran synchronously, wait for the deferred one to be underway
        entered_rx.recv().unwrap();
        entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        let work = scheduler.cancel().unwrap();

        // the deferred call finished rather than being cut short
        assert_eq!(work.completed, 2);
        assert_eq!(scheduler.times_called(), 2);

        std::thread::sleep(Duration::from_millis(700));
        assert_eq!(scheduler.times_called(), 2);
        assert!(entered_rx.try_recv().is_err());
    }

    #[test]
    fn test_misuse_is_reported() {
        let mut scheduler = PeriodicScheduler::new(BENCHMARK_INTERVAL, || {});
        assert!(matches!(scheduler.cancel(), Err(BenchError::NotStarted)));

        scheduler.start().unwrap();
        assert!(matches!(scheduler.start(), Err(BenchError::AlreadyStarted)));
        let _work = scheduler.cancel().unwrap();

        assert!(matches!(scheduler.start(), Err(BenchError::AlreadyStarted)));
        assert!(matches!(scheduler.cancel(), Err(BenchError::NotStarted)));
    }

    #[test]
    fn test_drop_stops_worker() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_in_work = Arc::clone(&calls);
        {
            let mut scheduler = PeriodicScheduler::new(BENCHMARK_INTERVAL, move || {
                calls_in_work.fetch_add(1, Ordering::SeqCst);
            });
            scheduler.start().unwrap();
        }
        let after_drop = calls.load(Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(700));
        assert_eq!(calls.load(Ordering::SeqCst), after_drop);
    }
}
