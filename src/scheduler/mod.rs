//! Recurring-task scheduler (SPEC_FULL.md §4.6).
//!
//! `tokio_cron_scheduler::Job`'s native recurrence is cron-expression driven,
//! not `Schedule::next`-driven, so each tick is dispatched as a one-shot job
//! that, once it fires, computes the following tick from the same in-memory
//! `Schedule` and re-registers itself. This is the tokio-ecosystem analogue
//! of the original's `robfig/cron` loop repeatedly calling `Schedule.Next()`
//! on a live `Entry`.

pub mod command;
pub mod taskmap;

use crate::error::{AppError, AppResult};
use crate::model::Schedule;
use crate::scheduler::command::SchedulerCommand;
use crate::scheduler::taskmap::{EntryHandle, TaskEntryMap};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use redis::AsyncCommands;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex as AsyncMutex;
use tokio_cron_scheduler::{Job, JobScheduler};

const TASK_IDS_SET: &str = "task_ids";

fn task_hash_key(task_id: &str) -> String {
    format!("task:{task_id}")
}

/// Generate-feed callback invoked by the dispatcher on every tick.
pub type GenerateFn =
    Arc<dyn Fn(String) -> futures_util::future::BoxFuture<'static, AppResult<()>> + Send + Sync>;

struct Inner {
    redis: redis::aio::ConnectionManager,
    dispatcher: AsyncMutex<JobScheduler>,
    entries: TaskEntryMap,
    /// The live, evolving `Schedule` for each recurring task, kept in memory
    /// across ticks so `Schedule::next`'s alignment state (`start_exceeded`)
    /// persists and subsequent ticks hit its "subsequent call" branch,
    /// matching how the original keeps one `Entry` alive across calls.
    live_schedules: RwLock<HashMap<String, Schedule>>,
    generate: GenerateFn,
}

#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    pub async fn new(redis: redis::aio::ConnectionManager, generate: GenerateFn) -> AppResult<Self> {
        let dispatcher = JobScheduler::new()
            .await
            .map_err(|e| AppError::CronDispatcher(e.to_string()))?;
        Ok(Self {
            inner: Arc::new(Inner {
                redis,
                dispatcher: AsyncMutex::new(dispatcher),
                entries: TaskEntryMap::new(),
                live_schedules: RwLock::new(HashMap::new()),
                generate,
            }),
        })
    }

    pub async fn start(&self) -> AppResult<()> {
        self.inner
            .dispatcher
            .lock()
            .await
            .start()
            .await
            .map_err(|e| AppError::CronDispatcher(e.to_string()))
    }

    pub async fn stop(&self) -> AppResult<()> {
        self.inner
            .dispatcher
            .lock()
            .await
            .shutdown()
            .await
            .map_err(|e| AppError::CronDispatcher(e.to_string()))
    }

    /// Persists `schedule` under `task_id`, arms the first tick, and records
    /// the resulting entry handle. Rolls the dispatcher registration back if
    /// the task-map insert fails.
    pub async fn schedule_task(
        &self,
        task_id: &str,
        cmd: SchedulerCommand,
        schedule: Schedule,
    ) -> AppResult<()> {
        self.persist_schedule(task_id, &schedule).await?;
        self.inner
            .live_schedules
            .write()
            .unwrap()
            .insert(task_id.to_string(), schedule);

        let handle = match self.arm_next_tick(task_id, cmd).await {
            Ok(handle) => handle,
            Err(e) => {
                self.inner.live_schedules.write().unwrap().remove(task_id);
                return Err(e);
            }
        };

        if let Err(e) = self.inner.entries.store(task_id, handle) {
            let _ = self.inner.dispatcher.lock().await.remove(&handle).await;
            self.inner.live_schedules.write().unwrap().remove(task_id);
            return Err(e);
        }
        Ok(())
    }

    pub async fn remove_task(&self, task_id: &str) -> AppResult<()> {
        let handle = self.inner.entries.load(task_id)?;
        self.inner
            .dispatcher
            .lock()
            .await
            .remove(&handle)
            .await
            .map_err(|e| AppError::CronDispatcher(e.to_string()))?;
        self.inner.entries.delete(task_id)?;
        self.inner.live_schedules.write().unwrap().remove(task_id);
        self.delete_persisted_schedule(task_id).await
    }

    pub async fn list_schedules(&self) -> AppResult<HashMap<String, Schedule>> {
        let mut conn = self.inner.redis.clone();
        let ids: Vec<String> = conn.smembers(TASK_IDS_SET).await?;
        let mut out = HashMap::new();
        for id in ids {
            let schedule = self.load_persisted_schedule(&id).await?;
            out.insert(id, schedule);
        }
        Ok(out)
    }

    /// Boot-time re-registration: every persisted schedule gets a fresh
    /// dispatcher entry and live `Schedule` in this process.
    pub async fn schedule_all_saved_generations(&self) -> AppResult<()> {
        for (task_id, schedule) in self.list_schedules().await? {
            let cmd = SchedulerCommand::GenerateFeed {
                feed_type: task_id.clone(),
            };
            self.schedule_task(&task_id, cmd, schedule).await?;
        }
        Ok(())
    }

    /// Called from inside a fired job's action: computes the task's next
    /// tick from its live `Schedule`, arms a new one-shot job for it, and
    /// swaps the entry map over to the new handle. The old job has already
    /// fired and removed itself from the dispatcher.
    async fn rearm(&self, task_id: &str, cmd: SchedulerCommand) -> AppResult<()> {
        let handle = self.arm_next_tick(task_id, cmd).await?;
        self.inner.entries.replace(task_id, handle);
        Ok(())
    }

    /// Builds and registers a one-shot job for `task_id`'s next tick, using
    /// (and advancing) its live `Schedule`. The job's action runs `generate`
    /// then calls [`Scheduler::rearm`] to chain the following tick.
    async fn arm_next_tick(&self, task_id: &str, cmd: SchedulerCommand) -> AppResult<EntryHandle> {
        let next_tick = {
            let mut guard = self.inner.live_schedules.write().unwrap();
            let schedule = guard
                .get_mut(task_id)
                .ok_or_else(|| AppError::TaskNotFound(task_id.to_string()))?;
            schedule.next(Utc::now())
        };
        let delay = duration_until(next_tick);

        let scheduler = self.clone();
        let task_id_owned = task_id.to_string();

        let job = Job::new_one_shot_async(delay, move |_uuid, _l| {
            let scheduler = scheduler.clone();
            let cmd = cmd.clone();
            let task_id_owned = task_id_owned.clone();
            Box::pin(async move {
                let SchedulerCommand::GenerateFeed { feed_type } = &cmd;
                if let Err(e) = (scheduler.inner.generate)(feed_type.clone()).await {
                    tracing::warn!(task_id = %task_id_owned, error = %e, "scheduled generation failed");
                }
                if let Err(e) = scheduler.rearm(&task_id_owned, cmd).await {
                    tracing::warn!(task_id = %task_id_owned, error = %e, "failed to re-arm schedule after tick");
                }
            })
        })
        .map_err(|e| AppError::CronDispatcher(e.to_string()))?;

        self.inner
            .dispatcher
            .lock()
            .await
            .add(job)
            .await
            .map_err(|e| AppError::CronDispatcher(e.to_string()))
    }

    async fn persist_schedule(&self, task_id: &str, schedule: &Schedule) -> AppResult<()> {
        let mut conn = self.inner.redis.clone();
        let key = task_hash_key(task_id);
        conn.sadd::<_, _, ()>(TASK_IDS_SET, task_id).await?;
        conn.hset_multiple::<_, _, _, ()>(
            &key,
            &[
                (
                    "start_timestamp",
                    schedule.start_timestamp.timestamp().to_string(),
                ),
                (
                    "fire_interval",
                    schedule.fire_interval.num_seconds().to_string(),
                ),
            ],
        )
        .await?;
        Ok(())
    }

    async fn delete_persisted_schedule(&self, task_id: &str) -> AppResult<()> {
        let mut conn = self.inner.redis.clone();
        conn.srem::<_, _, ()>(TASK_IDS_SET, task_id).await?;
        conn.del::<_, ()>(task_hash_key(task_id)).await?;
        Ok(())
    }

    async fn load_persisted_schedule(&self, task_id: &str) -> AppResult<Schedule> {
        let mut conn = self.inner.redis.clone();
        let fields: HashMap<String, String> = conn.hgetall(task_hash_key(task_id)).await?;
        let start: i64 = fields
            .get("start_timestamp")
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| AppError::TaskNotFound(task_id.to_string()))?;
        let interval: i64 = fields
            .get("fire_interval")
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| AppError::TaskNotFound(task_id.to_string()))?;
        let start = DateTime::from_timestamp(start, 0)
            .ok_or_else(|| AppError::TaskNotFound(task_id.to_string()))?;
        Ok(Schedule::new(start, ChronoDuration::seconds(interval)))
    }
}

fn duration_until(at: DateTime<Utc>) -> std::time::Duration {
    let delta = at - Utc::now();
    delta.to_std().unwrap_or(std::time::Duration::from_secs(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_until_past_time_is_zero() {
        let past = Utc::now() - ChronoDuration::seconds(10);
        assert_eq!(duration_until(past), std::time::Duration::from_secs(0));
    }
}
