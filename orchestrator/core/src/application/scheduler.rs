// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Job Scheduler
//!
//! Owns the live timer set: one [`ScheduledEntry`] per active job, keyed by
//! job id. A tick loop wakes every `tick_interval`, collects due entries and
//! spawns one dispatch task per fire, so a long-running script never blocks
//! other jobs.
//!
//! ## Fire rules
//!
//! - A fire later than the misfire grace window is skipped; the entry moves
//!   to its next occurrence (a `once` job that misses its window is
//!   deactivated).
//! - At most `max_instances` scheduled dispatches of the same job are in
//!   flight. A due fire beyond that stays due and is retried on later ticks;
//!   several missed occurrences collapse into that one deferred fire.
//! - On fire the entry advances immediately (`once` entries are removed).
//!   When the dispatch completes, interval and cron jobs recompute `next_run`
//!   from the completion instant and persist it; `once` jobs are deactivated.
//!   Recomputing from completion rather than from the scheduled instant lets
//!   interval schedules drift under load.
//! - Re-arming a job that is already armed with the same schedule keeps the
//!   live next fire, and an occurrence that has already fired is never armed
//!   again. Stored `next_run` lags the timer while a dispatch is in flight.
//!
//! Writes to a job's row go through a per-job lock ([`JobScheduler::lock_job`])
//! shared with the job service, so a completion never interleaves with an
//! edit of the same job.
//!
//! The scheduler is an explicit object: build it, call [`JobScheduler::init`]
//! at process start and [`JobScheduler::shutdown`] before exit.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::application::dispatch::{DispatchOutcome, JobDispatcher, SkipReason};
use crate::domain::job::{Job, JobId};
use crate::domain::node_config::SchedulerConfig;
use crate::domain::repository::{JobRepository, RepositoryError};
use crate::domain::schedule::{MisfireDecision, MisfirePolicy, Schedule};

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Scheduler is already running")]
    AlreadyRunning,

    #[error("Scheduler has been shut down")]
    ShutDown,

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub max_instances: usize,
    pub misfire: MisfirePolicy,
    pub tick_interval: Duration,
    pub drain_timeout: Duration,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self::from(&SchedulerConfig::default())
    }
}

impl From<&SchedulerConfig> for SchedulerSettings {
    fn from(config: &SchedulerConfig) -> Self {
        Self {
            max_instances: config.max_instances.max(1),
            misfire: MisfirePolicy::new(chrono::Duration::seconds(
                config.misfire_grace_seconds as i64,
            )),
            tick_interval: Duration::from_millis(config.tick_interval_ms.max(1)),
            drain_timeout: Duration::from_secs(config.drain_timeout_seconds),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledEntry {
    pub job_id: JobId,
    pub schedule: Schedule,
    pub next_fire: DateTime<Utc>,
}

#[derive(Default)]
struct TimerSet {
    entries: HashMap<JobId, ScheduledEntry>,
    in_flight: HashMap<JobId, usize>,
    /// Scheduled instant of the latest fire, kept until its completion is
    /// recorded.
    fired: HashMap<JobId, DateTime<Utc>>,
}

enum DueAction {
    Fire(JobId, Schedule),
    Expire(JobId),
}

pub struct JobScheduler {
    jobs: Arc<dyn JobRepository>,
    dispatcher: Arc<JobDispatcher>,
    settings: SchedulerSettings,
    timers: Mutex<TimerSet>,
    running: AtomicBool,
    cancel: CancellationToken,
    tasks: TaskTracker,
    tick_handle: Mutex<Option<JoinHandle<()>>>,
    job_locks: DashMap<JobId, Arc<AsyncMutex<()>>>,
}

impl JobScheduler {
    pub fn new(
        jobs: Arc<dyn JobRepository>,
        dispatcher: Arc<JobDispatcher>,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            jobs,
            dispatcher,
            settings,
            timers: Mutex::new(TimerSet::default()),
            running: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            tasks: TaskTracker::new(),
            tick_handle: Mutex::new(None),
            job_locks: DashMap::new(),
        }
    }

    /// Serialize writes to one job's stored row.
    pub async fn lock_job(&self, job_id: JobId) -> OwnedMutexGuard<()> {
        let lock = self.job_locks.entry(job_id).or_default().clone();
        lock.lock_owned().await
    }

    /// Drop the lock slot of a deleted job.
    pub fn forget_job(&self, job_id: JobId) {
        self.job_locks.remove(&job_id);
    }

    pub fn settings(&self) -> &SchedulerSettings {
        &self.settings
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Load every active job, arm it, and start the tick loop. A job that
    /// cannot be armed is logged and skipped; failing to read storage at all
    /// is fatal.
    pub async fn init(self: &Arc<Self>) -> Result<usize, SchedulerError> {
        if self.cancel.is_cancelled() {
            return Err(SchedulerError::ShutDown);
        }
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(SchedulerError::AlreadyRunning);
        }

        let jobs = match self.jobs.find_active().await {
            Ok(jobs) => jobs,
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                return Err(e.into());
            }
        };

        let mut armed = 0;
        for job in &jobs {
            if self.schedule_job(job) {
                armed += 1;
            } else {
                warn!(job_id = %job.id, name = %job.name, "Could not schedule job at startup");
            }
        }

        let this = Arc::clone(self);
        *self.tick_handle.lock() = Some(tokio::spawn(async move { this.tick_loop().await }));

        info!(armed, total = jobs.len(), "Job scheduler started");
        Ok(armed)
    }

    /// Stop firing, wait (bounded) for in-flight dispatches, drop all timers.
    /// Running containers are left to the recovery coordinator.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let was_running = self.running.swap(false, Ordering::SeqCst);

        let handle = self.tick_handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "Scheduler tick loop ended abnormally");
            }
        }

        self.tasks.close();
        if tokio::time::timeout(self.settings.drain_timeout, self.tasks.wait())
            .await
            .is_err()
        {
            warn!(
                pending = self.tasks.len(),
                "Timed out waiting for in-flight dispatches"
            );
        }

        {
            let mut timers = self.timers.lock();
            timers.entries.clear();
            timers.fired.clear();
        }
        if was_running {
            info!("Job scheduler shut down");
        }
    }

    /// Insert or replace the timer for `job`. Inactive or deleted jobs are
    /// removed instead. Returns whether the job is now armed.
    pub fn schedule_job(&self, job: &Job) -> bool {
        if !job.is_schedulable() {
            self.unschedule_job(job.id);
            return false;
        }

        let stored = match job.next_run {
            Some(next) => next,
            None => match job.schedule.first_fire(Utc::now()) {
                Ok(next) => next,
                Err(e) => {
                    warn!(job_id = %job.id, error = %e, "Cannot compute next fire");
                    return false;
                }
            },
        };

        let mut timers = self.timers.lock();
        let live = timers
            .entries
            .get(&job.id)
            .filter(|e| e.schedule == job.schedule)
            .map(|e| e.next_fire);
        let fired = timers.fired.get(&job.id).copied();
        let next_fire = match (live, fired) {
            (Some(live), _) => live,
            (None, Some(fired)) if stored <= fired => match job.schedule.next_after(fired) {
                Ok(Some(next)) => next,
                Ok(None) => {
                    debug!(job_id = %job.id, "Occurrence already fired, not re-arming");
                    timers.entries.remove(&job.id);
                    return false;
                }
                Err(e) => {
                    warn!(job_id = %job.id, error = %e, "Cannot compute next fire");
                    return false;
                }
            },
            _ => stored,
        };

        let entry = ScheduledEntry {
            job_id: job.id,
            schedule: job.schedule.clone(),
            next_fire,
        };
        let replaced = timers.entries.insert(job.id, entry).is_some();
        debug!(job_id = %job.id, next_fire = %next_fire, replaced, "Job scheduled");
        true
    }

    /// Remove the job's timer. Dispatches already running are not touched.
    pub fn unschedule_job(&self, job_id: JobId) -> bool {
        let removed = self.timers.lock().entries.remove(&job_id).is_some();
        if removed {
            debug!(job_id = %job_id, "Job unscheduled");
        }
        removed
    }

    pub fn is_scheduled(&self, job_id: JobId) -> bool {
        self.timers.lock().entries.contains_key(&job_id)
    }

    pub fn next_fire(&self, job_id: JobId) -> Option<DateTime<Utc>> {
        self.timers.lock().entries.get(&job_id).map(|e| e.next_fire)
    }

    /// Snapshot of the timer set, soonest first.
    pub fn scheduled_jobs(&self) -> Vec<ScheduledEntry> {
        let mut entries: Vec<_> = self.timers.lock().entries.values().cloned().collect();
        entries.sort_by_key(|e| e.next_fire);
        entries
    }

    pub fn in_flight(&self, job_id: JobId) -> usize {
        self.timers
            .lock()
            .in_flight
            .get(&job_id)
            .copied()
            .unwrap_or(0)
    }

    async fn tick_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.settings.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.fire_due(Utc::now());
                }
            }
        }
        debug!("Scheduler tick loop stopped");
    }

    /// Process every timer due at `now`. Returns the number of dispatches
    /// spawned.
    pub fn fire_due(self: &Arc<Self>, now: DateTime<Utc>) -> usize {
        if self.cancel.is_cancelled() {
            return 0;
        }

        let mut actions = Vec::new();
        {
            let mut timers = self.timers.lock();
            let TimerSet {
                entries,
                in_flight,
                fired,
            } = &mut *timers;
            let mut finished = Vec::new();

            for entry in entries.values_mut().filter(|e| e.next_fire <= now) {
                match self.settings.misfire.evaluate(entry.next_fire, now) {
                    MisfireDecision::Skip { late_by } => {
                        warn!(
                            job_id = %entry.job_id,
                            scheduled = %entry.next_fire,
                            late_by_secs = late_by.num_seconds(),
                            "Fire missed its grace window, skipping"
                        );
                        metrics::counter!("automa_fires_skipped_total", "reason" => "misfire")
                            .increment(1);
                        match advance(entry, now) {
                            Some(next) => entry.next_fire = next,
                            None => {
                                finished.push(entry.job_id);
                                actions.push(DueAction::Expire(entry.job_id));
                            }
                        }
                    }
                    MisfireDecision::Fire => {
                        let running = in_flight.entry(entry.job_id).or_insert(0);
                        if *running >= self.settings.max_instances {
                            debug!(
                                job_id = %entry.job_id,
                                in_flight = *running,
                                "Job at max concurrent instances, deferring fire"
                            );
                            metrics::counter!("automa_fires_skipped_total", "reason" => "deferred")
                                .increment(1);
                            continue;
                        }
                        *running += 1;
                        fired.insert(entry.job_id, entry.next_fire);
                        actions.push(DueAction::Fire(entry.job_id, entry.schedule.clone()));
                        match advance(entry, now) {
                            Some(next) => entry.next_fire = next,
                            None => finished.push(entry.job_id),
                        }
                    }
                }
            }

            in_flight.retain(|_, count| *count > 0);
            for job_id in finished {
                entries.remove(&job_id);
            }
        }

        let mut fired = 0;
        for action in actions {
            match action {
                DueAction::Fire(job_id, schedule) => {
                    fired += 1;
                    let this = Arc::clone(self);
                    self.tasks.spawn(async move {
                        let outcome = this.dispatcher.dispatch(job_id).await;
                        this.complete(job_id, &schedule, &outcome).await;
                    });
                }
                DueAction::Expire(job_id) => {
                    let this = Arc::clone(self);
                    self.tasks.spawn(async move {
                        let _guard = this.lock_job(job_id).await;
                        this.deactivate(job_id).await;
                    });
                }
            }
        }
        fired
    }

    async fn complete(&self, job_id: JobId, schedule: &Schedule, outcome: &DispatchOutcome) {
        {
            let mut timers = self.timers.lock();
            if let Some(count) = timers.in_flight.get_mut(&job_id) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    timers.in_flight.remove(&job_id);
                }
            }
        }

        let _guard = self.lock_job(job_id).await;
        self.record_completion(job_id, schedule, outcome).await;

        let mut timers = self.timers.lock();
        if !timers.in_flight.contains_key(&job_id) {
            timers.fired.remove(&job_id);
        }
    }

    /// Caller holds the job lock.
    async fn record_completion(
        &self,
        job_id: JobId,
        schedule: &Schedule,
        outcome: &DispatchOutcome,
    ) {
        if let DispatchOutcome::Skipped(reason) = outcome {
            // The stored job no longer wants this timer.
            if matches!(reason, SkipReason::JobNotFound | SkipReason::JobInactive) {
                self.unschedule_job(job_id);
            }
            return;
        }

        let next = match schedule.next_after(Utc::now()) {
            Ok(next) => next,
            Err(e) => {
                error!(job_id = %job_id, error = %e, "Cannot recompute next fire");
                return;
            }
        };

        let Some(next) = next else {
            self.deactivate(job_id).await;
            return;
        };

        {
            let mut timers = self.timers.lock();
            if let Some(entry) = timers.entries.get_mut(&job_id) {
                if entry.schedule == *schedule {
                    entry.next_fire = next;
                }
            }
        }

        if let Err(e) = self.persist_next_run(job_id, schedule, next).await {
            error!(job_id = %job_id, error = %e, "Failed to persist next_run");
        }
    }

    async fn persist_next_run(
        &self,
        job_id: JobId,
        schedule: &Schedule,
        next: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let Some(job) = self.jobs.find_by_id(job_id).await? else {
            return Ok(());
        };
        // Edited while the dispatch ran; the edit already set next_run.
        if job.schedule != *schedule || !job.is_schedulable() {
            return Ok(());
        }
        self.jobs.update_next_run(job_id, next).await?;
        Ok(())
    }

    /// Caller holds the job lock.
    async fn deactivate(&self, job_id: JobId) {
        self.unschedule_job(job_id);
        match self.jobs.deactivate(job_id).await {
            Ok(true) => info!(job_id = %job_id, "One-shot job deactivated"),
            Ok(false) => {}
            Err(e) => error!(job_id = %job_id, error = %e, "Failed to deactivate one-shot job"),
        }
    }
}

/// Next fire for `entry` after a fire or skip at `now`.
fn advance(entry: &ScheduledEntry, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match entry.schedule.next_after(now) {
        Ok(next) => next,
        Err(e) => {
            error!(job_id = %entry.job_id, error = %e, "Cannot compute next fire, dropping timer");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_from_config() {
        let settings = SchedulerSettings::from(&SchedulerConfig::default());
        assert_eq!(settings.max_instances, 3);
        assert_eq!(settings.misfire.grace, chrono::Duration::seconds(300));
        assert_eq!(settings.tick_interval, Duration::from_secs(1));
    }

    #[test]
    fn test_advance_interval_and_once() {
        let now = Utc::now();
        let interval = ScheduledEntry {
            job_id: JobId::new(),
            schedule: Schedule::Interval { seconds: 30 },
            next_fire: now,
        };
        assert_eq!(advance(&interval, now), Some(now + chrono::Duration::seconds(30)));

        let once = ScheduledEntry {
            job_id: JobId::new(),
            schedule: Schedule::Once { run_at: now },
            next_fire: now,
        };
        assert_eq!(advance(&once, now), None);
    }
}
