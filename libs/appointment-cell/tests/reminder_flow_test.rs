mod common;

use std::sync::Arc;

use chrono::Duration;

use appointment_cell::CancelAppointmentRequest;
use reminder_queue_cell::{ExecuteOutcome, ReminderJobState, ReminderJobStore};

use common::{CountingDispatcher, Harness};

#[tokio::test]
async fn test_due_reminder_is_dispatched() {
    let h = Harness::new().await;
    let dispatcher = Arc::new(CountingDispatcher::default());
    let worker = h.worker(dispatcher.clone());

    let appointment = h
        .service
        .create_appointment(h.request(Some(h.practitioner_a), "10:00", 30))
        .await
        .unwrap();
    let jobs = h.reminders.jobs_for_appointment(appointment.id).await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(
        jobs[0].fire_at,
        appointment.starts_at(&h.config.clinic_offset()) - Duration::hours(24)
    );

    let claimed = worker
        .process_due("test-worker-0", jobs[0].fire_at + Duration::minutes(1))
        .await
        .unwrap();
    assert_eq!(claimed, 1);
    // email and in-app by default
    assert_eq!(dispatcher.call_count().await, 2);
}

#[tokio::test]
async fn test_cancel_before_fire_time_dispatches_nothing() {
    let h = Harness::new().await;
    let dispatcher = Arc::new(CountingDispatcher::default());
    let worker = h.worker(dispatcher.clone());

    let appointment = h
        .service
        .create_appointment(h.request(Some(h.practitioner_a), "10:00", 30))
        .await
        .unwrap();
    let fire_at = h.reminders.jobs_for_appointment(appointment.id).await.unwrap()[0].fire_at;

    h.service
        .cancel_appointment(appointment.id, CancelAppointmentRequest::default())
        .await
        .unwrap();

    let claimed = worker
        .process_due("test-worker-0", fire_at + Duration::hours(1))
        .await
        .unwrap();
    assert_eq!(claimed, 0);
    assert_eq!(dispatcher.call_count().await, 0);
}

#[tokio::test]
async fn test_cancel_while_in_flight_dispatches_nothing() {
    let h = Harness::new().await;
    let dispatcher = Arc::new(CountingDispatcher::default());
    let worker = h.worker(dispatcher.clone());

    let appointment = h
        .service
        .create_appointment(h.request(Some(h.practitioner_a), "10:00", 30))
        .await
        .unwrap();
    let fire_at = h.reminders.jobs_for_appointment(appointment.id).await.unwrap()[0].fire_at;

    // Claimed by a worker before the cancellation lands.
    let mut claimed = h.reminder_store.claim_due(fire_at, 10, "test-worker-0").await.unwrap();
    assert_eq!(claimed.len(), 1);

    h.service
        .cancel_appointment(appointment.id, CancelAppointmentRequest::default())
        .await
        .unwrap();

    let outcome = worker.execute(claimed.remove(0), fire_at).await.unwrap();
    assert_eq!(outcome, ExecuteOutcome::SkippedStale);
    assert_eq!(dispatcher.call_count().await, 0);
}

#[tokio::test]
async fn test_rescheduled_reminder_fires_once_at_new_time() {
    let h = Harness::new().await;
    let dispatcher = Arc::new(CountingDispatcher::default());
    let worker = h.worker(dispatcher.clone());

    let appointment = h
        .service
        .create_appointment(h.request(Some(h.practitioner_a), "10:00", 30))
        .await
        .unwrap();
    let old_fire_at = h.reminders.jobs_for_appointment(appointment.id).await.unwrap()[0].fire_at;

    h.service
        .reschedule_appointment(
            appointment.id,
            appointment_cell::RescheduleAppointmentRequest {
                appointment_date: appointment.appointment_date,
                time_slot: "16:00".to_string(),
                duration_minutes: None,
            },
        )
        .await
        .unwrap();

    assert_eq!(worker.process_due("test-worker-0", old_fire_at).await.unwrap(), 0);

    let jobs = h.reminders.jobs_for_appointment(appointment.id).await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].state, ReminderJobState::Pending);
    assert_eq!(jobs[0].fire_at, old_fire_at + Duration::hours(6));

    assert_eq!(worker.process_due("test-worker-0", jobs[0].fire_at).await.unwrap(), 1);
    assert_eq!(dispatcher.call_count().await, 2);
}

#[tokio::test]
async fn test_reminder_claimed_by_crashed_worker_is_delivered_after_restart() {
    let h = Harness::new().await;
    let dispatcher = Arc::new(CountingDispatcher::default());
    let worker = h.worker(dispatcher.clone());

    let appointment = h
        .service
        .create_appointment(h.request(Some(h.practitioner_a), "10:00", 30))
        .await
        .unwrap();
    let fire_at = h.reminders.jobs_for_appointment(appointment.id).await.unwrap()[0].fire_at;

    // The worker dies holding the job.
    let abandoned = h.reminder_store.claim_due(fire_at, 10, "dead-worker").await.unwrap();
    assert_eq!(abandoned.len(), 1);
    drop(abandoned);

    let restart = fire_at + Duration::hours(12);
    assert_eq!(worker.process_due("restarted-worker", restart).await.unwrap(), 0);

    assert_eq!(worker.recover_stalled(restart).await.unwrap(), 1);
    assert_eq!(worker.process_due("restarted-worker", restart).await.unwrap(), 1);
    assert_eq!(dispatcher.call_count().await, 2);

    let jobs = h.reminders.jobs_for_appointment(appointment.id).await.unwrap();
    assert_eq!(jobs[0].state, ReminderJobState::Completed);
}
