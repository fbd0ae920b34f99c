//! Module for running the pipeline on a fixed cadence.
//!
//! The scheduler runs its job once immediately and then once per interval until
//! it is told to terminate. Failed or panicking runs are logged and never end
//! the loop. At most one run is in flight at any time: a trigger that arrives
//! while a run is in progress is skipped.
use std::fmt::Display;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::sleep;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Longest time the scheduler sleeps before checking the termination flag again.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Serialize, Deserialize, Debug, Clone)]
/// Parameters of the recurring pipeline run.
pub struct ScheduleParameters {
    /// Seconds between the starts of two runs.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

fn default_interval_secs() -> u64 {
    3600
}

impl Default for ScheduleParameters {
    fn default() -> Self {
        ScheduleParameters {
            interval_secs: default_interval_secs(),
        }
    }
}

impl ScheduleParameters {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Waiting for the next trigger.
    Idle,
    /// A run is in flight.
    Running,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Outcome of a single trigger.
pub enum TickOutcome {
    Succeeded,
    Failed,
    Panicked,
    /// Another run was still in flight.
    Skipped,
}

/// Fixed cadence, single flight scheduler.
///
/// A run is expected to finish well inside one interval. A run that takes
/// longer is followed immediately by the next one; missed ticks are not
/// replayed.
#[derive(Debug)]
pub struct Scheduler {
    interval: Duration,
    running: AtomicBool,
    runs: AtomicU64,
    failures: AtomicU64,
}

impl Scheduler {
    pub fn new(interval: Duration) -> Scheduler {
        Scheduler {
            interval,
            running: AtomicBool::new(false),
            runs: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> SchedulerState {
        if self.running.load(Ordering::SeqCst) {
            SchedulerState::Running
        } else {
            SchedulerState::Idle
        }
    }

    /// Number of runs started so far.
    pub fn runs(&self) -> u64 {
        self.runs.load(Ordering::SeqCst)
    }

    /// Number of runs that failed or panicked.
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::SeqCst)
    }

    /// Runs the job once unless a run is already in flight.
    ///
    /// Errors and panics of the job are logged and reported as outcome; the
    /// scheduler is `Idle` again when this returns.
    pub fn tick<T, E, J>(&self, job: &mut J) -> TickOutcome
    where
        E: Display,
        J: FnMut() -> Result<T, E>,
    {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            log::warn!(target: "airlogd::scheduler", "Previous run still in progress, skipping trigger");
            return TickOutcome::Skipped;
        }

        let run = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
        let outcome = match panic::catch_unwind(AssertUnwindSafe(|| job())) {
            Ok(Ok(_)) => TickOutcome::Succeeded,
            Ok(Err(err)) => {
                log::error!(target: "airlogd::scheduler", "Scheduled run {} failed: {}", run, err);
                TickOutcome::Failed
            }
            Err(payload) => {
                log::error!(target: "airlogd::scheduler", "Scheduled run {} panicked: {}", run, panic_message(&*payload));
                TickOutcome::Panicked
            }
        };
        if outcome != TickOutcome::Succeeded {
            self.failures.fetch_add(1, Ordering::SeqCst);
        }

        self.running.store(false, Ordering::SeqCst);
        outcome
    }

    /// Runs the job immediately and then once per interval until `terminate` is set.
    ///
    /// A run in flight is never interrupted; `terminate` is checked between runs.
    pub fn run<T, E, J>(&self, terminate: &AtomicBool, mut job: J)
    where
        E: Display,
        J: FnMut() -> Result<T, E>,
    {
        log::info!(target: "airlogd::scheduler", "Scheduler started, running every {}s", self.interval.as_secs());

        let mut next_run = Instant::now();
        while !terminate.load(Ordering::SeqCst) {
            let now = Instant::now();
            if now < next_run {
                sleep(std::cmp::min(next_run - now, POLL_INTERVAL));
                continue;
            }

            log::info!(target: "airlogd::scheduler", "Triggering scheduled pipeline run...");
            let started = Instant::now();
            self.tick(&mut job);

            let elapsed = started.elapsed();
            next_run = if elapsed >= self.interval {
                log::warn!(target: "airlogd::scheduler", "Run took {:.1}s, longer than the interval of {}s",
                           elapsed.as_secs_f64(), self.interval.as_secs());
                Instant::now()
            } else {
                started + self.interval
            };
        }

        log::info!(target: "airlogd::scheduler", "Scheduler stopped after {} runs, {} failed", self.runs(), self.failures());
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        String::from("unknown panic")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn default_interval_is_hourly() {
        assert_eq!(ScheduleParameters::default().interval(), Duration::from_secs(3600));
    }

    #[test]
    fn failed_tick_returns_to_idle() {
        let scheduler = Scheduler::new(Duration::from_secs(3600));
        let calls = Cell::new(0);
        let mut job = || {
            calls.set(calls.get() + 1);
            if calls.get() == 1 {
                Err("upstream unreachable")
            } else {
                Ok(())
            }
        };

        assert_eq!(scheduler.tick(&mut job), TickOutcome::Failed);
        assert_eq!(scheduler.state(), SchedulerState::Idle);
        assert_eq!(scheduler.tick(&mut job), TickOutcome::Succeeded);
        assert_eq!(calls.get(), 2);
        assert_eq!(scheduler.runs(), 2);
        assert_eq!(scheduler.failures(), 1);
    }

    #[test]
    fn panicking_tick_is_contained() {
        let scheduler = Scheduler::new(Duration::from_secs(3600));
        let mut job = || -> Result<(), String> { panic!("boom") };

        assert_eq!(scheduler.tick(&mut job), TickOutcome::Panicked);
        assert_eq!(scheduler.state(), SchedulerState::Idle);
        assert_eq!(scheduler.failures(), 1);
    }

    #[test]
    fn overlapping_trigger_is_skipped() {
        let scheduler = Scheduler::new(Duration::from_secs(3600));
        let mut nested = None;
        let mut job = || -> Result<(), String> {
            assert_eq!(scheduler.state(), SchedulerState::Running);
            nested = Some(scheduler.tick(&mut || -> Result<(), String> { Ok(()) }));
            Ok(())
        };

        assert_eq!(scheduler.tick(&mut job), TickOutcome::Succeeded);
        assert_eq!(nested, Some(TickOutcome::Skipped));
        assert_eq!(scheduler.runs(), 1);
    }

    #[test]
    fn run_continues_after_failure() {
        let scheduler = Scheduler::new(Duration::from_millis(10));
        let terminate = AtomicBool::new(false);
        let mut calls = 0;

        scheduler.run(&terminate, || {
            calls += 1;
            if calls >= 3 {
                terminate.store(true, Ordering::SeqCst);
            }
            if calls == 1 {
                Err(String::from("database unreachable"))
            } else {
                Ok(calls)
            }
        });

        assert_eq!(calls, 3);
        assert_eq!(scheduler.runs(), 3);
        assert_eq!(scheduler.failures(), 1);
        assert_eq!(scheduler.state(), SchedulerState::Idle);
    }

    #[test]
    fn run_returns_when_terminated() {
        let scheduler = Scheduler::new(Duration::from_secs(3600));
        let terminate = AtomicBool::new(true);
        scheduler.run(&terminate, || -> Result<(), String> { panic!("must not run") });
        assert_eq!(scheduler.runs(), 0);
    }
}
