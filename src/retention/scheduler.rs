//! Fixed-rate scheduling of retention runs.
//!
//! The scheduler fires one run as soon as it starts and then one per
//! interval, measured from start. Runs are spawned rather than awaited so a
//! slow run never shifts the timer. At most one run is in flight: a tick that
//! arrives while a run is still executing is dropped and counted.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use parking_lot::Mutex;
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use super::RetentionRunner;
use crate::observability::metrics;

/// What happened on a scheduler tick.
#[derive(Debug)]
pub enum TickOutcome {
    /// A run was spawned.
    Started(JoinHandle<()>),
    /// A previous run was still executing, so this tick was dropped.
    Skipped,
}

/// Owns the retention timer and the in-flight gate.
pub struct RetentionScheduler {
    shared: Arc<Shared>,
    timer: Mutex<Option<CancellationToken>>,
}

struct Shared {
    runner: Arc<RetentionRunner>,
    interval: Duration,
    in_flight: AtomicBool,
    skipped: AtomicU64,
    runs: TaskTracker,
}

/// Clears the in-flight flag when the run finishes, panics included.
struct InFlightGuard(Arc<Shared>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.in_flight.store(false, Ordering::Release);
    }
}

impl RetentionScheduler {
    pub fn new(runner: Arc<RetentionRunner>, interval: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                runner,
                interval,
                in_flight: AtomicBool::new(false),
                skipped: AtomicU64::new(0),
                runs: TaskTracker::new(),
            }),
            timer: Mutex::new(None),
        }
    }

    /// Start the timer. The first run fires immediately in the background.
    ///
    /// Calling `start` on a running scheduler does nothing.
    pub fn start(&self) {
        let mut timer = self.timer.lock();
        if timer.is_some() {
            tracing::warn!("Retention scheduler already started");
            return;
        }

        let cancel = CancellationToken::new();
        self.shared.runs.reopen();
        tokio::spawn(timer_loop(self.shared.clone(), cancel.clone()));
        *timer = Some(cancel);

        tracing::info!(
            interval_secs = self.shared.interval.as_secs(),
            policies = self.shared.runner.policies().len(),
            dry_run = self.shared.runner.is_dry_run(),
            "Retention scheduler started"
        );
    }

    /// Stop the timer. A run already in flight keeps going; use
    /// [`wait_for_in_flight`](Self::wait_for_in_flight) to wait for it.
    ///
    /// Also valid on a scheduler that was never started, so runs triggered
    /// through [`tick`](Self::tick) alone can still be waited for.
    pub fn stop(&self) {
        let timer = self.timer.lock().take();
        self.shared.runs.close();
        if let Some(cancel) = timer {
            cancel.cancel();
            tracing::info!("Retention scheduler stopped");
        }
    }

    /// Wait until every spawned run has finished. Only returns once the
    /// scheduler has been stopped.
    pub async fn wait_for_in_flight(&self) {
        self.shared.runs.wait().await;
    }

    /// Try to start a run now, honouring the in-flight gate.
    pub fn tick(&self) -> TickOutcome {
        self.shared.tick()
    }

    pub fn is_started(&self) -> bool {
        self.timer.lock().is_some()
    }

    /// Whether a run is executing right now.
    pub fn is_running(&self) -> bool {
        self.shared.in_flight.load(Ordering::Acquire)
    }

    /// Number of ticks dropped because a run was already in flight.
    pub fn skipped_ticks(&self) -> u64 {
        self.shared.skipped.load(Ordering::Relaxed)
    }
}

impl Drop for RetentionScheduler {
    fn drop(&mut self) {
        if let Some(cancel) = self.timer.get_mut().take() {
            cancel.cancel();
        }
    }
}

impl Shared {
    fn tick(self: &Arc<Self>) -> TickOutcome {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            let skipped = self.skipped.fetch_add(1, Ordering::Relaxed) + 1;
            tracing::warn!(
                skipped_total = skipped,
                "Previous retention run still in progress, skipping this cycle"
            );
            metrics::record_retention_skipped_tick();
            return TickOutcome::Skipped;
        }

        let guard = InFlightGuard(self.clone());
        let runner = self.runner.clone();
        let handle = self.runs.spawn(async move {
            let _guard = guard;
            // Outcome logging and metrics happen inside the run.
            if runner.run_once().await.is_err() {
                tracing::warn!("Retention will be retried at the next scheduled cycle");
            }
        });

        TickOutcome::Started(handle)
    }
}

async fn timer_loop(shared: Arc<Shared>, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(shared.interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            // The first tick completes immediately.
            _ = interval.tick() => {
                let _ = shared.tick();
            }
        }
    }

    tracing::debug!("Retention timer exited");
}
