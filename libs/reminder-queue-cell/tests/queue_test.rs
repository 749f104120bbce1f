use std::sync::Arc;

use chrono::{Duration, Utc};
use uuid::Uuid;

use reminder_queue_cell::*;
use shared_models::ChannelSet;

fn job_due_in(minutes: i64) -> ReminderJob {
    ReminderJob::new(
        Uuid::new_v4(),
        Uuid::new_v4(),
        24,
        Utc::now() + Duration::minutes(minutes),
        ChannelSet::all(),
        3,
    )
}

#[tokio::test]
async fn test_upsert_is_idempotent_for_same_fire_time() {
    let store = InMemoryReminderStore::new();
    let job = job_due_in(60);

    assert_eq!(store.upsert(&job).await.unwrap(), UpsertOutcome::Created);
    assert_eq!(store.upsert(&job).await.unwrap(), UpsertOutcome::Unchanged);
    assert_eq!(store.all_jobs().await.len(), 1);

    let mut moved = job.clone();
    moved.fire_at = job.fire_at + Duration::hours(2);
    assert_eq!(store.upsert(&moved).await.unwrap(), UpsertOutcome::Replaced);
    assert_eq!(store.get(&job.job_id).await.unwrap().unwrap().fire_at, moved.fire_at);
}

#[tokio::test]
async fn test_claim_due_only_returns_due_pending_jobs() {
    let store = InMemoryReminderStore::new();
    let due = job_due_in(-5);
    let later = job_due_in(30);
    store.upsert(&due).await.unwrap();
    store.upsert(&later).await.unwrap();

    let claimed = store.claim_due(Utc::now(), 10, "w-1").await.unwrap();
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].job_id, due.job_id);
    assert_eq!(claimed[0].state, ReminderJobState::Active);
    assert_eq!(claimed[0].worker_id.as_deref(), Some("w-1"));

    assert!(store.claim_due(Utc::now(), 10, "w-2").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_concurrent_claims_hand_out_each_job_once() {
    let store = Arc::new(InMemoryReminderStore::new());
    for _ in 0..20 {
        store.upsert(&job_due_in(-1)).await.unwrap();
    }

    let mut handles = Vec::new();
    for i in 0..4 {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            store.claim_due(Utc::now(), 20, &format!("w-{}", i)).await.unwrap()
        }));
    }

    let mut ids = Vec::new();
    for handle in handles {
        ids.extend(handle.await.unwrap().into_iter().map(|job| job.job_id));
    }
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 20);
}

#[tokio::test]
async fn test_save_is_dropped_after_replacement() {
    let store = InMemoryReminderStore::new();
    let job = job_due_in(-1);
    store.upsert(&job).await.unwrap();

    let mut claimed = store.claim_due(Utc::now(), 1, "w-1").await.unwrap().remove(0);

    let mut rescheduled = job.clone();
    rescheduled.fire_at = job.fire_at + Duration::days(1);
    store.upsert(&rescheduled).await.unwrap();

    claimed.state = ReminderJobState::Completed;
    assert!(!store.save(&claimed).await.unwrap());

    let stored = store.get(&job.job_id).await.unwrap().unwrap();
    assert_eq!(stored.state, ReminderJobState::Pending);
    assert_eq!(stored.fire_at, rescheduled.fire_at);
}

#[tokio::test]
async fn test_remove_pending_skips_active_and_repeats_safely() {
    let store = InMemoryReminderStore::new();
    let appointment_id = Uuid::new_v4();

    let in_flight = ReminderJob::new(appointment_id, Uuid::new_v4(), 48, Utc::now() - Duration::minutes(1), ChannelSet::all(), 3);
    let waiting = ReminderJob::new(appointment_id, Uuid::new_v4(), 2, Utc::now() + Duration::hours(5), ChannelSet::all(), 3);
    store.upsert(&in_flight).await.unwrap();
    store.upsert(&waiting).await.unwrap();
    store.claim_due(Utc::now(), 10, "w-1").await.unwrap();

    let cancelled = store.remove_pending_for_appointment(appointment_id).await.unwrap();
    assert_eq!(cancelled, vec![waiting.job_id.clone()]);
    assert!(store.remove_pending_for_appointment(appointment_id).await.unwrap().is_empty());

    let jobs = store.jobs_for_appointment(appointment_id).await.unwrap();
    let states: Vec<ReminderJobState> = jobs.iter().map(|j| j.state).collect();
    assert_eq!(states, vec![ReminderJobState::Active, ReminderJobState::Cancelled]);
}

#[tokio::test]
async fn test_cleanup_removes_only_old_terminal_jobs() {
    let store = InMemoryReminderStore::new();

    let mut old_done = job_due_in(-600);
    old_done.state = ReminderJobState::Completed;
    old_done.updated_at = Utc::now() - Duration::days(8);
    let mut fresh_done = job_due_in(-5);
    fresh_done.state = ReminderJobState::Failed;
    let pending = job_due_in(60);

    for job in [&old_done, &fresh_done, &pending] {
        store.upsert(job).await.unwrap();
    }

    let cleaned = store.cleanup_finished(Utc::now() - Duration::days(7)).await.unwrap();
    assert_eq!(cleaned, 1);
    assert!(store.get(&old_done.job_id).await.unwrap().is_none());
    assert!(store.get(&fresh_done.job_id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_requeue_stalled_returns_abandoned_jobs_to_the_queue() {
    let store = InMemoryReminderStore::new();
    let abandoned = job_due_in(-10);
    let busy = job_due_in(-5);
    store.upsert(&abandoned).await.unwrap();
    store.claim_due(Utc::now(), 1, "w-dead").await.unwrap();
    let cutoff = Utc::now() + Duration::milliseconds(1);
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    store.upsert(&busy).await.unwrap();
    store.claim_due(Utc::now(), 10, "w-live").await.unwrap();

    let requeued = store.requeue_stalled(cutoff).await.unwrap();
    assert_eq!(requeued, vec![abandoned.job_id.clone()]);

    let stored = store.get(&abandoned.job_id).await.unwrap().unwrap();
    assert_eq!(stored.state, ReminderJobState::Pending);
    assert_eq!(stored.worker_id, None);
    assert_eq!(stored.fire_at, abandoned.fire_at);
    assert_eq!(store.get(&busy.job_id).await.unwrap().unwrap().state, ReminderJobState::Active);

    let reclaimed = store.claim_due(Utc::now(), 10, "w-2").await.unwrap();
    assert_eq!(reclaimed.len(), 1);
    assert_eq!(reclaimed[0].job_id, abandoned.job_id);
    assert!(store.requeue_stalled(cutoff).await.unwrap().is_empty());
}
