// libs/appointment-cell/src/services/scheduler.rs
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, instrument};

use crate::models::{AppointmentError, RecordId};
use crate::services::appointments::{AppointmentRepository, MissedSweep};

pub const DEFAULT_INTERVAL_MINUTES: u64 = 30;

/// Outcome of one sweep.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SweepSummary {
    pub started_at: DateTime<Utc>,
    pub missed_ids: Vec<RecordId>,
    pub failed_ids: Vec<RecordId>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub interval_seconds: Option<u64>,
    pub sweeps_run: u64,
    pub last_sweep: Option<SweepSummary>,
}

struct SweepState {
    repository: Arc<AppointmentRepository>,
    sweeps_run: AtomicU64,
    last_sweep: Mutex<Option<SweepSummary>>,
}

struct Timer {
    handle: JoinHandle<()>,
    period: Duration,
}

/// `generation` changes on every start and stop. A start only installs its
/// timer if nothing else touched the slot during its initial sweep.
#[derive(Default)]
struct TimerSlot {
    generation: u64,
    starting: bool,
    timer: Option<Timer>,
}

impl TimerSlot {
    fn cancel(&mut self) -> bool {
        self.generation += 1;
        let was_starting = std::mem::take(&mut self.starting);
        match self.timer.take() {
            Some(timer) => {
                timer.handle.abort();
                true
            }
            None => was_starting,
        }
    }
}

/// Periodically marks overdue upcoming appointments as missed. Constructed
/// once at startup and shared behind an `Arc`.
pub struct MissedAppointmentScheduler {
    state: Arc<SweepState>,
    slot: Mutex<TimerSlot>,
}

impl MissedAppointmentScheduler {
    pub fn new(repository: Arc<AppointmentRepository>) -> Self {
        Self {
            state: Arc::new(SweepState {
                repository,
                sweeps_run: AtomicU64::new(0),
                last_sweep: Mutex::new(None),
            }),
            slot: Mutex::new(TimerSlot::default()),
        }
    }

    fn slot(&self) -> MutexGuard<'_, TimerSlot> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Replace any running timer, sweep once right away, then every
    /// `interval_minutes` (default 30).
    pub async fn start(&self, interval_minutes: Option<u64>) -> Result<(), AppointmentError> {
        let minutes = interval_minutes.unwrap_or(DEFAULT_INTERVAL_MINUTES);
        if minutes == 0 {
            return Err(AppointmentError::Validation("sweep interval must be at least one minute".to_string()));
        }

        let seconds = minutes
            .checked_mul(60)
            .ok_or_else(|| interval_too_large(minutes))?;
        self.start_with_period(Duration::from_secs(seconds)).await
    }

    pub async fn start_with_period(&self, period: Duration) -> Result<(), AppointmentError> {
        if period.is_zero() {
            return Err(AppointmentError::Validation("sweep interval must be positive".to_string()));
        }

        let first_tick = Instant::now()
            .checked_add(period)
            .filter(|first| first.checked_add(period).is_some())
            .ok_or_else(|| interval_too_large(period.as_secs() / 60))?;

        let generation = {
            let mut slot = self.slot();
            slot.cancel();
            slot.starting = true;
            slot.generation
        };
        info!("Starting missed appointment scheduler, interval {:?}", period);

        // Failures are recorded in the summary; the timer starts regardless.
        let _ = sweep(&self.state).await;

        let mut slot = self.slot();
        if slot.generation != generation {
            info!("Scheduler was stopped or restarted during its initial sweep, not arming timer");
            return Ok(());
        }

        let state = Arc::clone(&self.state);
        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(first_tick, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let _ = sweep(&state).await;
            }
        });

        slot.starting = false;
        slot.timer = Some(Timer { handle, period });
        Ok(())
    }

    /// Cancel the timer, including one still being started. Calling it while
    /// stopped does nothing.
    pub fn stop(&self) {
        if self.slot().cancel() {
            info!("Missed appointment scheduler stopped");
        } else {
            debug!("Missed appointment scheduler already stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.slot().timer.is_some()
    }

    /// Run one sweep now, independent of the timer.
    pub async fn run_once(&self) -> Result<MissedSweep, AppointmentError> {
        sweep(&self.state).await
    }

    pub fn status(&self) -> SchedulerStatus {
        let interval_seconds = self.slot().timer.as_ref().map(|timer| timer.period.as_secs());
        let last_sweep = self.state.last_sweep
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();

        SchedulerStatus {
            running: interval_seconds.is_some(),
            interval_seconds,
            sweeps_run: self.state.sweeps_run.load(Ordering::SeqCst),
            last_sweep,
        }
    }
}

impl Drop for MissedAppointmentScheduler {
    fn drop(&mut self) {
        self.slot().cancel();
    }
}

fn interval_too_large(minutes: u64) -> AppointmentError {
    AppointmentError::Validation(format!("sweep interval of {} minutes is too large", minutes))
}

#[instrument(skip(state))]
async fn sweep(state: &SweepState) -> Result<MissedSweep, AppointmentError> {
    let started_at = state.repository.clock().now_utc();
    let result = state.repository.sweep_overdue().await;
    state.sweeps_run.fetch_add(1, Ordering::SeqCst);

    let summary = match &result {
        Ok(outcome) => {
            let missed_ids = outcome.missed_ids();
            if missed_ids.is_empty() {
                debug!("Sweep found no missed appointments");
            } else {
                info!("Marked {} appointment(s) as missed: {:?}", missed_ids.len(), missed_ids);
            }

            let error = if outcome.failures.is_empty() {
                None
            } else {
                let reasons: Vec<String> = outcome.failures
                    .iter()
                    .map(|(id, e)| format!("appointment {}: {}", id, e))
                    .collect();
                error!("Sweep left {} overdue appointment(s) unmarked", reasons.len());
                Some(reasons.join("; "))
            };

            SweepSummary { started_at, missed_ids, failed_ids: outcome.failed_ids(), error }
        }
        Err(e) => {
            error!("Missed appointment sweep failed: {}", e);
            SweepSummary { started_at, missed_ids: Vec::new(), failed_ids: Vec::new(), error: Some(e.to_string()) }
        }
    };

    *state.last_sweep.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(summary);
    result
}
