//! Recurring background jobs.

use futures::FutureExt;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Shortest interval a job may run at.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// A job body. Called once per tick.
pub type Job = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Held for the duration of every tick of one job id, across replacements.
type TickLock = Arc<AsyncMutex<()>>;

struct ScheduledJob {
    interval: Duration,
    job: Job,
    tick_lock: TickLock,
    stop: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl ScheduledJob {
    fn spawn(&mut self, id: &str) {
        let stop = self.stop.subscribe();
        self.handle = Some(tokio::spawn(run_job(
            id.to_string(),
            self.interval,
            Arc::clone(&self.job),
            Arc::clone(&self.tick_lock),
            stop,
        )));
    }

    /// Signal the task to stop and hand back its handle.
    fn stop(self) -> Option<JoinHandle<()>> {
        let _ = self.stop.send(true);
        self.handle
    }
}

#[derive(Default)]
struct State {
    running: bool,
    jobs: HashMap<String, ScheduledJob>,
    tick_locks: HashMap<String, TickLock>,
    /// Tasks of replaced jobs that may still be finishing a tick.
    retired: Vec<JoinHandle<()>>,
}

/// Runs jobs at fixed intervals, one tokio task per job.
///
/// A job's ticks never overlap: if a tick takes longer than the interval,
/// the next one is delayed. This also holds when a job is replaced while one
/// of its ticks is running. Stopping a job never interrupts a running tick,
/// and a tick that panics is logged without stopping the job.
#[derive(Default)]
pub struct Scheduler {
    state: Mutex<State>,
}

impl Scheduler {
    /// Create a stopped scheduler with no jobs.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a job, or replace the job registered under `id`.
    ///
    /// The first tick happens one `interval` after the job is started. When
    /// the scheduler is already running the job starts right away. A replaced
    /// job finishes its running tick before the new job's first tick begins.
    pub fn add_job(&self, id: impl Into<String>, interval: Duration, job: Job) {
        let id = id.into();
        let interval = if interval < MIN_INTERVAL {
            tracing::warn!(job = %id, interval_ms = interval.as_millis() as u64, "job interval too short, using 1ms");
            MIN_INTERVAL
        } else {
            interval
        };

        let mut state = self.state();
        let tick_lock = Arc::clone(state.tick_locks.entry(id.clone()).or_default());
        let (stop, _) = watch::channel(false);
        let mut scheduled = ScheduledJob {
            interval,
            job,
            tick_lock,
            stop,
            handle: None,
        };

        if state.running {
            scheduled.spawn(&id);
        }
        if let Some(previous) = state.jobs.insert(id.clone(), scheduled) {
            tracing::debug!(job = %id, "replacing scheduled job");
            if let Some(handle) = previous.stop() {
                state.retired.push(handle);
            }
        }
        state.retired.retain(|handle| !handle.is_finished());
    }

    /// Run one tick of `job` now, under the tick lock of `id`.
    ///
    /// Waits for a running tick of `id` to finish first. A panic is logged
    /// like one in a scheduled tick.
    pub async fn run_now(&self, id: &str, job: &Job) {
        let tick_lock = Arc::clone(self.state().tick_locks.entry(id.to_string()).or_default());
        let _guard = tick_lock.lock().await;
        run_tick(id, job).await;
    }

    /// Start every registered job. Does nothing if already running.
    ///
    /// Must be called within a Tokio runtime.
    pub fn start(&self) {
        let mut state = self.state();
        if state.running {
            return;
        }
        state.running = true;
        for (id, job) in state.jobs.iter_mut() {
            job.spawn(id);
        }
        tracing::debug!(jobs = state.jobs.len(), "scheduler started");
    }

    /// Stop all jobs and forget them.
    ///
    /// With `wait`, returns once in-flight ticks have completed. Calling it
    /// again is a no-op.
    pub async fn shutdown(&self, wait: bool) {
        let handles: Vec<JoinHandle<()>> = {
            let mut state = self.state();
            state.running = false;
            let mut handles: Vec<_> = state.retired.drain(..).collect();
            handles.extend(state.jobs.drain().filter_map(|(_, job)| job.stop()));
            handles
        };

        if handles.is_empty() {
            return;
        }
        tracing::debug!(tasks = handles.len(), wait, "scheduler shutting down");

        if wait {
            for handle in handles {
                if let Err(e) = handle.await {
                    tracing::error!(error = %e, "scheduled job task failed");
                }
            }
        }
    }

    /// Whether `start` was called since the last shutdown.
    pub fn is_running(&self) -> bool {
        self.state().running
    }

    /// Number of registered jobs.
    pub fn job_count(&self) -> usize {
        self.state().jobs.len()
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("Scheduler")
            .field("running", &state.running)
            .field("jobs", &state.jobs.keys().collect::<Vec<_>>())
            .finish()
    }
}

async fn run_job(
    id: String,
    interval: Duration,
    job: Job,
    tick_lock: TickLock,
    mut stop: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = stop.changed() => break,
            _ = ticker.tick() => {}
        }

        let _guard = tokio::select! {
            biased;
            _ = stop.changed() => break,
            guard = tick_lock.lock() => guard,
        };
        // Stopped while the previous holder was finishing
        if *stop.borrow() {
            break;
        }
        run_tick(&id, &job).await;
    }

    tracing::debug!(job = %id, "job stopped");
}

async fn run_tick(id: &str, job: &Job) {
    tracing::trace!(job = %id, "tick");
    if AssertUnwindSafe(job()).catch_unwind().await.is_err() {
        tracing::error!(job = %id, "scheduled job panicked");
    }
}
