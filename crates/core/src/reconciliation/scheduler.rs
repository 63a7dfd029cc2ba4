//! Hourly, daily and on-demand reconciliation runs.
//!
//! `start` spawns two long-lived tasks sharing one cancellation token; `stop`
//! cancels the token and waits for both tasks, including any in-flight run, to
//! finish. Manual runs can be triggered whether or not the scheduler is running.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use chrono::{Local, NaiveDateTime, NaiveTime, TimeDelta};
use tally_shared::config::SchedulerConfig;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::service::{ReconciliationError, ReconciliationService};
use super::types::{ReconciliationReport, RunType};

/// Scheduler errors.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// `start` was called while the scheduler was running.
    #[error("Reconciliation scheduler is already running")]
    AlreadyRunning,

    /// The configured daily run time is not `HH:MM`.
    #[error("Invalid daily run time: {0}")]
    InvalidRunTime(String),
}

/// Cadence of scheduled runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    /// Interval between hourly runs.
    pub hourly_interval: Duration,
    /// Interval between daily runs after the first one.
    pub daily_interval: Duration,
    /// Local time of the first daily run.
    pub daily_run_time: NaiveTime,
}

impl TryFrom<&SchedulerConfig> for Schedule {
    type Error = SchedulerError;

    fn try_from(config: &SchedulerConfig) -> Result<Self, Self::Error> {
        let daily_run_time = config
            .daily_run_time()
            .map_err(|e| SchedulerError::InvalidRunTime(format!("{}: {e}", config.daily_run_time)))?;
        Ok(Self {
            hourly_interval: config.hourly_interval(),
            daily_interval: config.daily_interval(),
            daily_run_time,
        })
    }
}

/// Next occurrence of `at` not earlier than `now`.
#[must_use]
pub fn next_daily_run(now: NaiveDateTime, at: NaiveTime) -> NaiveDateTime {
    let today = now.date().and_time(at);
    if today < now {
        today + TimeDelta::days(1)
    } else {
        today
    }
}

enum State {
    Stopped,
    Running {
        cancel: CancellationToken,
        tasks: Vec<JoinHandle<()>>,
    },
}

/// Drives `ReconciliationService` on a schedule.
pub struct ReconciliationScheduler {
    service: ReconciliationService,
    schedule: Schedule,
    state: Mutex<State>,
}

impl std::fmt::Debug for ReconciliationScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconciliationScheduler")
            .field("schedule", &self.schedule)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl ReconciliationScheduler {
    /// Creates a stopped scheduler.
    #[must_use]
    pub fn new(service: ReconciliationService, schedule: Schedule) -> Self {
        Self {
            service,
            schedule,
            state: Mutex::new(State::Stopped),
        }
    }

    /// Returns true between `start` and `stop`.
    #[must_use]
    pub fn is_running(&self) -> bool {
        matches!(
            *self.state.lock().unwrap_or_else(PoisonError::into_inner),
            State::Running { .. }
        )
    }

    /// Spawns the hourly and daily tasks. Must be called inside a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyRunning` if the scheduler was already started.
    pub fn start(&self) -> Result<(), SchedulerError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if matches!(*state, State::Running { .. }) {
            return Err(SchedulerError::AlreadyRunning);
        }

        info!(
            hourly_interval = ?self.schedule.hourly_interval,
            daily_interval = ?self.schedule.daily_interval,
            daily_run_time = %self.schedule.daily_run_time,
            "Starting reconciliation scheduler"
        );

        let cancel = CancellationToken::new();
        let tasks = vec![
            tokio::spawn(hourly_loop(
                self.service.clone(),
                self.schedule.hourly_interval,
                cancel.clone(),
            )),
            tokio::spawn(daily_loop(
                self.service.clone(),
                self.schedule,
                cancel.clone(),
            )),
        ];
        *state = State::Running { cancel, tasks };
        Ok(())
    }

    /// Cancels both tasks and waits for them. Does nothing if already stopped.
    pub async fn stop(&self) {
        let previous = std::mem::replace(
            &mut *self.state.lock().unwrap_or_else(PoisonError::into_inner),
            State::Stopped,
        );
        let State::Running { cancel, tasks } = previous else {
            return;
        };

        info!("Stopping reconciliation scheduler");
        cancel.cancel();
        for task in tasks {
            if let Err(e) = task.await {
                error!(error = %e, "Reconciliation task ended abnormally");
            }
        }
        info!("Reconciliation scheduler stopped");
    }

    /// Runs a manual reconciliation now and returns its report.
    ///
    /// A running scheduler's shutdown cancels the manual run too.
    ///
    /// # Errors
    ///
    /// Returns an error if the report could not be created.
    pub async fn trigger_manual(&self) -> Result<ReconciliationReport, ReconciliationError> {
        let cancel = match &*self.state.lock().unwrap_or_else(PoisonError::into_inner) {
            State::Running { cancel, .. } => cancel.child_token(),
            State::Stopped => CancellationToken::new(),
        };
        info!("Starting manual reconciliation");
        self.service.run(RunType::Manual, &cancel).await
    }
}

async fn run_once(service: &ReconciliationService, run_type: RunType, cancel: &CancellationToken) {
    let started = Instant::now();
    match service.run(run_type, cancel).await {
        Ok(report) => info!(
            run_type = %run_type,
            report_id = %report.id,
            status = %report.status,
            exceptions = report.exceptions_count,
            duration = ?started.elapsed(),
            "Scheduled reconciliation finished"
        ),
        Err(e) => error!(
            run_type = %run_type,
            error = %e,
            duration = ?started.elapsed(),
            "Scheduled reconciliation failed"
        ),
    }
}

async fn hourly_loop(service: ReconciliationService, every: Duration, cancel: CancellationToken) {
    // First tick completes immediately, so the first run happens on start.
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = ticker.tick() => run_once(&service, RunType::Hourly, &cancel).await,
        }
    }
    info!("Hourly reconciliation task stopped");
}

async fn daily_loop(service: ReconciliationService, schedule: Schedule, cancel: CancellationToken) {
    let now = Local::now().naive_local();
    let next_run = next_daily_run(now, schedule.daily_run_time);
    let initial_delay = (next_run - now).to_std().unwrap_or_default();
    info!(next_run = %next_run, initial_delay = ?initial_delay, "Daily reconciliation scheduled");

    let mut ticker = interval_at(Instant::now() + initial_delay, schedule.daily_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = ticker.tick() => run_once(&service, RunType::Daily, &cancel).await,
        }
    }
    info!("Daily reconciliation task stopped");
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
