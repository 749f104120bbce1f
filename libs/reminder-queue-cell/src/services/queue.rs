use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_redis::{Config, Connection, Pool, Runtime};
use redis::{AsyncCommands, Script};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use shared_config::AppConfig;

use crate::{ReminderJob, ReminderJobState, ReminderQueueError, UpsertOutcome};

/// Durable delayed queue of reminder jobs.
///
/// Implementations guarantee that a due job is handed to at most one `claim_due`
/// caller, and that `upsert` never creates a second record for the same job id.
#[async_trait]
pub trait ReminderJobStore: Send + Sync {
    async fn upsert(&self, job: &ReminderJob) -> Result<UpsertOutcome, ReminderQueueError>;

    async fn get(&self, job_id: &str) -> Result<Option<ReminderJob>, ReminderQueueError>;

    /// Claims up to `limit` pending jobs due at or before `now`, marking them active.
    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        worker_id: &str,
    ) -> Result<Vec<ReminderJob>, ReminderQueueError>;

    /// Writes back a claimed job. Returns `false` without writing if the stored record
    /// was replaced or cancelled since the claim.
    async fn save(&self, job: &ReminderJob) -> Result<bool, ReminderQueueError>;

    /// Cancels every job for the appointment that has not been claimed yet and
    /// returns their ids. Safe to repeat.
    async fn remove_pending_for_appointment(&self, appointment_id: Uuid) -> Result<Vec<String>, ReminderQueueError>;

    async fn jobs_for_appointment(&self, appointment_id: Uuid) -> Result<Vec<ReminderJob>, ReminderQueueError>;

    /// Deletes terminal jobs last touched before `older_than`.
    async fn cleanup_finished(&self, older_than: DateTime<Utc>) -> Result<u64, ReminderQueueError>;

    /// Returns active jobs claimed before `claimed_before` to the pending queue so a
    /// job held by a worker that died is delivered by another one.
    async fn requeue_stalled(&self, claimed_before: DateTime<Utc>) -> Result<Vec<String>, ReminderQueueError>;
}

/// Decides what an upsert does to an existing record. Cancelled records are
/// treated as absent so a rebooked appointment gets fresh jobs.
pub fn classify_upsert(existing: Option<&ReminderJob>, incoming: &ReminderJob) -> UpsertOutcome {
    match existing {
        None => UpsertOutcome::Created,
        Some(current) if current.state == ReminderJobState::Cancelled => UpsertOutcome::Replaced,
        Some(current) if current.fire_at == incoming.fire_at => UpsertOutcome::Unchanged,
        Some(_) => UpsertOutcome::Replaced,
    }
}

fn still_current(stored: Option<&ReminderJob>, claimed: &ReminderJob) -> bool {
    stored.map_or(false, |s| s.fire_at == claimed.fire_at && s.state != ReminderJobState::Cancelled)
}

// ==============================================================================
// REDIS STORE
// ==============================================================================

// KEYS: job hash, delayed set, processing set.
// ARGV: job id, expected data, new data, new state, updated_at, "1" to mark processing.
const TAKE_SCRIPT: &str = r#"
if redis.call('HGET', KEYS[1], 'data') ~= ARGV[2] then
  return 0
end
if redis.call('ZREM', KEYS[2], ARGV[1]) == 0 then
  return 0
end
redis.call('HSET', KEYS[1], 'data', ARGV[3], 'state', ARGV[4], 'updated_at', ARGV[5])
if ARGV[6] == '1' then
  redis.call('SADD', KEYS[3], ARGV[1])
end
return 1
"#;

// KEYS: job hash, delayed set, processing set.
// ARGV: job id, expected data, new data, new state, updated_at, due score.
const REQUEUE_SCRIPT: &str = r#"
if redis.call('HGET', KEYS[1], 'data') ~= ARGV[2] then
  return 0
end
redis.call('HSET', KEYS[1], 'data', ARGV[3], 'state', ARGV[4], 'updated_at', ARGV[5])
redis.call('ZADD', KEYS[2], ARGV[6], ARGV[1])
redis.call('SREM', KEYS[3], ARGV[1])
return 1
"#;

/// Redis key layout. Every key starts with `prefix`, which is empty in production.
#[derive(Debug, Clone, Default)]
struct KeySpace {
    prefix: String,
}

impl KeySpace {
    fn delayed(&self) -> String {
        format!("{}reminder_queue:delayed", self.prefix)
    }

    fn processing(&self) -> String {
        format!("{}reminder_queue:processing", self.prefix)
    }

    fn job(&self, job_id: &str) -> String {
        format!("{}reminder_job:{}", self.prefix, job_id)
    }

    fn appointment(&self, appointment_id: Uuid) -> String {
        format!("{}reminder_appointment:{}", self.prefix, appointment_id)
    }

    fn all_jobs(&self) -> String {
        format!("{}reminder_job:*", self.prefix)
    }
}

/// Job hashes under `reminder_job:{id}`, a sorted set of job ids scored by due time in
/// epoch milliseconds, a processing set of claimed ids and a per-appointment index set.
///
/// Claiming and cancelling run as Lua scripts that compare the stored record with the
/// one the caller read, remove the id from the delayed set and rewrite the record in one
/// step, so a crash can never leave a pending record outside both sets.
pub struct RedisReminderStore {
    pool: Pool,
    keys: KeySpace,
    take_script: Script,
    requeue_script: Script,
}

impl RedisReminderStore {
    pub async fn new(config: &AppConfig) -> Result<Self, ReminderQueueError> {
        Self::with_namespace(config, "").await
    }

    /// Same store with every key prefixed by `namespace`, so several queues can share
    /// one Redis database.
    pub async fn with_namespace(config: &AppConfig, namespace: &str) -> Result<Self, ReminderQueueError> {
        let cfg = Config::from_url(config.redis_url());
        let pool = cfg
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| ReminderQueueError::PoolError(format!("Pool creation error: {}", e)))?;

        let mut conn = pool
            .get()
            .await
            .map_err(|e| ReminderQueueError::PoolError(format!("Connection error: {}", e)))?;

        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        info!("Redis reminder store initialized successfully");

        Ok(Self {
            pool,
            keys: KeySpace {
                prefix: namespace.to_string(),
            },
            take_script: Script::new(TAKE_SCRIPT),
            requeue_script: Script::new(REQUEUE_SCRIPT),
        })
    }

    async fn get_connection(&self) -> Result<Connection, ReminderQueueError> {
        self.pool
            .get()
            .await
            .map_err(|e| ReminderQueueError::PoolError(e.to_string()))
    }

    async fn load_raw(&self, conn: &mut Connection, job_id: &str) -> Result<Option<String>, ReminderQueueError> {
        let data: Option<String> = conn.hget(self.keys.job(job_id), "data").await?;
        Ok(data)
    }

    async fn load_job(&self, conn: &mut Connection, job_id: &str) -> Result<Option<ReminderJob>, ReminderQueueError> {
        match self.load_raw(conn, job_id).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Writes the record, its queue placement and the appointment index in one transaction.
    async fn persist(&self, conn: &mut Connection, job: &ReminderJob) -> Result<(), ReminderQueueError> {
        let data = serde_json::to_string(job)?;
        let appointment_id = job.appointment_id.to_string();
        let updated_at = job.updated_at.to_rfc3339();

        let mut pipe = redis::pipe();
        pipe.atomic()
            .hset_multiple(
                self.keys.job(&job.job_id),
                &[
                    ("data", data.as_str()),
                    ("state", job.state.as_str()),
                    ("appointment_id", appointment_id.as_str()),
                    ("updated_at", updated_at.as_str()),
                ],
            )
            .ignore()
            .sadd(self.keys.appointment(job.appointment_id), &job.job_id)
            .ignore();

        match job.state {
            ReminderJobState::Pending => {
                pipe.zadd(self.keys.delayed(), &job.job_id, job.due_at().timestamp_millis())
                    .ignore()
                    .srem(self.keys.processing(), &job.job_id)
                    .ignore();
            }
            ReminderJobState::Active => {
                pipe.zrem(self.keys.delayed(), &job.job_id)
                    .ignore()
                    .sadd(self.keys.processing(), &job.job_id)
                    .ignore();
            }
            _ => {
                pipe.zrem(self.keys.delayed(), &job.job_id)
                    .ignore()
                    .srem(self.keys.processing(), &job.job_id)
                    .ignore();
            }
        }

        let _: () = pipe.query_async(conn).await?;
        Ok(())
    }

    /// Takes `next.job_id` out of the delayed set and stores `next`, provided the record
    /// still equals `expected`. Returns `false` if another caller got there first.
    async fn take(
        &self,
        conn: &mut Connection,
        expected: &str,
        next: &ReminderJob,
        mark_processing: bool,
    ) -> Result<bool, ReminderQueueError> {
        let data = serde_json::to_string(next)?;
        let taken: i64 = self
            .take_script
            .key(self.keys.job(&next.job_id))
            .key(self.keys.delayed())
            .key(self.keys.processing())
            .arg(&next.job_id)
            .arg(expected)
            .arg(data)
            .arg(next.state.as_str())
            .arg(next.updated_at.to_rfc3339())
            .arg(if mark_processing { "1" } else { "0" })
            .invoke_async(conn)
            .await?;
        Ok(taken == 1)
    }
}

#[async_trait]
impl ReminderJobStore for RedisReminderStore {
    async fn upsert(&self, job: &ReminderJob) -> Result<UpsertOutcome, ReminderQueueError> {
        let mut conn = self.get_connection().await?;

        let existing = self.load_job(&mut conn, &job.job_id).await?;
        let outcome = classify_upsert(existing.as_ref(), job);
        if outcome == UpsertOutcome::Unchanged {
            debug!("Reminder job {} already scheduled", job.job_id);
            return Ok(outcome);
        }

        self.persist(&mut conn, job).await?;

        debug!("Reminder job {} stored ({:?}) due at {}", job.job_id, outcome, job.due_at());
        Ok(outcome)
    }

    async fn get(&self, job_id: &str) -> Result<Option<ReminderJob>, ReminderQueueError> {
        let mut conn = self.get_connection().await?;
        self.load_job(&mut conn, job_id).await
    }

    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        worker_id: &str,
    ) -> Result<Vec<ReminderJob>, ReminderQueueError> {
        let mut conn = self.get_connection().await?;

        let due: Vec<String> = conn
            .zrangebyscore_limit(self.keys.delayed(), "-inf", now.timestamp_millis(), 0, limit as isize)
            .await?;

        let mut claimed = Vec::with_capacity(due.len());
        for job_id in due {
            let Some(raw) = self.load_raw(&mut conn, &job_id).await? else {
                warn!("Delayed set referenced missing reminder job {}", job_id);
                let _: () = conn.zrem(self.keys.delayed(), &job_id).await?;
                continue;
            };

            let mut job: ReminderJob = serde_json::from_str(&raw)?;
            job.state = ReminderJobState::Active;
            job.worker_id = Some(worker_id.to_string());
            job.updated_at = Utc::now();

            if self.take(&mut conn, &raw, &job, true).await? {
                claimed.push(job);
            } else {
                // Another worker won this one, or it was rescheduled under us.
                debug!("Reminder job {} was taken before worker {} could claim it", job_id, worker_id);
            }
        }

        if !claimed.is_empty() {
            debug!("Worker {} claimed {} reminder jobs", worker_id, claimed.len());
        }
        Ok(claimed)
    }

    async fn save(&self, job: &ReminderJob) -> Result<bool, ReminderQueueError> {
        let mut conn = self.get_connection().await?;

        let stored = self.load_job(&mut conn, &job.job_id).await?;
        if !still_current(stored.as_ref(), job) {
            debug!("Reminder job {} was superseded, dropping worker result", job.job_id);
            if stored.map_or(true, |s| s.state != ReminderJobState::Active) {
                let _: () = conn.srem(self.keys.processing(), &job.job_id).await?;
            }
            return Ok(false);
        }

        self.persist(&mut conn, job).await?;
        Ok(true)
    }

    async fn remove_pending_for_appointment(&self, appointment_id: Uuid) -> Result<Vec<String>, ReminderQueueError> {
        let mut conn = self.get_connection().await?;

        let job_ids: Vec<String> = conn.smembers(self.keys.appointment(appointment_id)).await?;
        let mut cancelled = Vec::new();

        for job_id in job_ids {
            let Some(raw) = self.load_raw(&mut conn, &job_id).await? else { continue };
            let mut job: ReminderJob = serde_json::from_str(&raw)?;
            if job.state != ReminderJobState::Pending {
                continue;
            }

            job.state = ReminderJobState::Cancelled;
            job.next_attempt_at = None;
            job.updated_at = Utc::now();
            if self.take(&mut conn, &raw, &job, false).await? {
                cancelled.push(job_id);
            }
        }

        cancelled.sort();
        Ok(cancelled)
    }

    async fn jobs_for_appointment(&self, appointment_id: Uuid) -> Result<Vec<ReminderJob>, ReminderQueueError> {
        let mut conn = self.get_connection().await?;

        let job_ids: Vec<String> = conn.smembers(self.keys.appointment(appointment_id)).await?;
        let mut jobs = Vec::with_capacity(job_ids.len());
        for job_id in job_ids {
            if let Some(job) = self.load_job(&mut conn, &job_id).await? {
                jobs.push(job);
            }
        }
        jobs.sort_by_key(|job| job.fire_at);
        Ok(jobs)
    }

    async fn cleanup_finished(&self, older_than: DateTime<Utc>) -> Result<u64, ReminderQueueError> {
        let mut conn = self.get_connection().await?;

        let keys: Vec<String> = conn.keys(self.keys.all_jobs()).await?;
        let mut cleaned = 0;

        for key in keys {
            let data: Option<String> = conn.hget(&key, "data").await?;
            let Some(raw) = data else { continue };
            let job: ReminderJob = match serde_json::from_str(&raw) {
                Ok(job) => job,
                Err(e) => {
                    warn!("Skipping unreadable reminder job {}: {}", key, e);
                    continue;
                }
            };

            if job.state.is_terminal() && job.updated_at < older_than {
                let _: () = conn.del(&key).await?;
                let _: () = conn.srem(self.keys.appointment(job.appointment_id), &job.job_id).await?;
                cleaned += 1;
            }
        }

        if cleaned > 0 {
            info!("Cleaned up {} finished reminder jobs", cleaned);
        } else {
            debug!("No finished reminder jobs to clean up");
        }
        Ok(cleaned)
    }

    async fn requeue_stalled(&self, claimed_before: DateTime<Utc>) -> Result<Vec<String>, ReminderQueueError> {
        let mut conn = self.get_connection().await?;

        let job_ids: Vec<String> = conn.smembers(self.keys.processing()).await?;
        let mut requeued = Vec::new();

        for job_id in job_ids {
            let Some(raw) = self.load_raw(&mut conn, &job_id).await? else {
                let _: () = conn.srem(self.keys.processing(), &job_id).await?;
                continue;
            };
            let mut job: ReminderJob = match serde_json::from_str(&raw) {
                Ok(job) => job,
                Err(e) => {
                    warn!("Skipping unreadable reminder job {}: {}", job_id, e);
                    continue;
                }
            };
            if job.state != ReminderJobState::Active || job.updated_at >= claimed_before {
                continue;
            }

            let abandoned_by = job.worker_id.take().unwrap_or_default();
            job.state = ReminderJobState::Pending;
            job.updated_at = Utc::now();

            let data = serde_json::to_string(&job)?;
            let moved: i64 = self
                .requeue_script
                .key(self.keys.job(&job_id))
                .key(self.keys.delayed())
                .key(self.keys.processing())
                .arg(&job_id)
                .arg(&raw)
                .arg(data)
                .arg(job.state.as_str())
                .arg(job.updated_at.to_rfc3339())
                .arg(job.due_at().timestamp_millis())
                .invoke_async(&mut conn)
                .await?;

            if moved == 1 {
                warn!("Requeued reminder job {} abandoned by worker {}", job_id, abandoned_by);
                requeued.push(job_id);
            }
        }

        requeued.sort();
        Ok(requeued)
    }
}

// ==============================================================================
// IN-MEMORY STORE
// ==============================================================================

/// Single-process store with the same claim and idempotency rules as the Redis one.
#[derive(Default)]
pub struct InMemoryReminderStore {
    jobs: Mutex<HashMap<String, ReminderJob>>,
}

impl InMemoryReminderStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn all_jobs(&self) -> Vec<ReminderJob> {
        let mut jobs: Vec<ReminderJob> = self.jobs.lock().await.values().cloned().collect();
        jobs.sort_by(|a, b| a.job_id.cmp(&b.job_id));
        jobs
    }
}

#[async_trait]
impl ReminderJobStore for InMemoryReminderStore {
    async fn upsert(&self, job: &ReminderJob) -> Result<UpsertOutcome, ReminderQueueError> {
        let mut jobs = self.jobs.lock().await;
        let outcome = classify_upsert(jobs.get(&job.job_id), job);
        if outcome != UpsertOutcome::Unchanged {
            jobs.insert(job.job_id.clone(), job.clone());
        }
        Ok(outcome)
    }

    async fn get(&self, job_id: &str) -> Result<Option<ReminderJob>, ReminderQueueError> {
        Ok(self.jobs.lock().await.get(job_id).cloned())
    }

    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        worker_id: &str,
    ) -> Result<Vec<ReminderJob>, ReminderQueueError> {
        let mut jobs = self.jobs.lock().await;

        let mut due: Vec<&mut ReminderJob> = jobs
            .values_mut()
            .filter(|job| job.state == ReminderJobState::Pending && job.due_at() <= now)
            .collect();
        due.sort_by_key(|job| job.due_at());

        Ok(due
            .into_iter()
            .take(limit)
            .map(|job| {
                job.state = ReminderJobState::Active;
                job.worker_id = Some(worker_id.to_string());
                job.updated_at = Utc::now();
                job.clone()
            })
            .collect())
    }

    async fn save(&self, job: &ReminderJob) -> Result<bool, ReminderQueueError> {
        let mut jobs = self.jobs.lock().await;
        if !still_current(jobs.get(&job.job_id), job) {
            return Ok(false);
        }
        jobs.insert(job.job_id.clone(), job.clone());
        Ok(true)
    }

    async fn remove_pending_for_appointment(&self, appointment_id: Uuid) -> Result<Vec<String>, ReminderQueueError> {
        let mut jobs = self.jobs.lock().await;
        let mut cancelled = Vec::new();
        for job in jobs.values_mut() {
            if job.appointment_id == appointment_id && job.state == ReminderJobState::Pending {
                job.state = ReminderJobState::Cancelled;
                job.next_attempt_at = None;
                job.updated_at = Utc::now();
                cancelled.push(job.job_id.clone());
            }
        }
        cancelled.sort();
        Ok(cancelled)
    }

    async fn jobs_for_appointment(&self, appointment_id: Uuid) -> Result<Vec<ReminderJob>, ReminderQueueError> {
        let mut jobs: Vec<ReminderJob> = self
            .jobs
            .lock()
            .await
            .values()
            .filter(|job| job.appointment_id == appointment_id)
            .cloned()
            .collect();
        jobs.sort_by_key(|job| job.fire_at);
        Ok(jobs)
    }

    async fn cleanup_finished(&self, older_than: DateTime<Utc>) -> Result<u64, ReminderQueueError> {
        let mut jobs = self.jobs.lock().await;
        let before = jobs.len();
        jobs.retain(|_, job| !(job.state.is_terminal() && job.updated_at < older_than));
        Ok((before - jobs.len()) as u64)
    }

    async fn requeue_stalled(&self, claimed_before: DateTime<Utc>) -> Result<Vec<String>, ReminderQueueError> {
        let mut jobs = self.jobs.lock().await;
        let mut requeued = Vec::new();
        for job in jobs.values_mut() {
            if job.state == ReminderJobState::Active && job.updated_at < claimed_before {
                job.state = ReminderJobState::Pending;
                job.worker_id = None;
                job.updated_at = Utc::now();
                requeued.push(job.job_id.clone());
            }
        }
        requeued.sort();
        Ok(requeued)
    }
}
