mod common;

use std::sync::Arc;

use chrono::{TimeZone, Utc};

use common::Harness;
use reminder_queue_cell::*;
use shared_config::AppConfig;
use shared_database::AppointmentRepository;
use shared_models::AppointmentStatus;

fn batch_time() -> chrono::DateTime<Utc> {
    // 18:00 on the day before the fixture appointments
    Utc.with_ymd_and_hms(2031, 5, 13, 18, 0, 0).unwrap()
}

#[tokio::test]
async fn test_batch_primes_tomorrows_active_appointments() {
    let h = Harness::new().await;
    let scheduler = DailyBatchScheduler::new(h.appointments.clone(), Arc::clone(&h.producer), &h.config);

    let active = h.book("20:00", &[24]).await;
    let mut cancelled = h.appointment("20:30", &[24]);
    cancelled.status = AppointmentStatus::Cancelled;
    h.appointments.insert(&cancelled).await.unwrap();
    let mut silent = h.appointment("21:00", &[24]);
    silent.notification_preferences.enabled = false;
    h.appointments.insert(&silent).await.unwrap();

    let report = scheduler.run_for(batch_time()).await.unwrap();

    assert_eq!(report.date, Some(common::appointment_date()));
    assert_eq!(report.appointments_seen, 1);
    assert_eq!(report.jobs_created, 1);
    let jobs = h.store.all_jobs().await;
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].appointment_id, active.id);
}

#[tokio::test]
async fn test_batch_does_not_duplicate_jobs_from_booking_time() {
    let h = Harness::new().await;
    let scheduler = DailyBatchScheduler::new(h.appointments.clone(), Arc::clone(&h.producer), &h.config);

    let appointment = h.book("20:00", &[2, 24]).await;
    h.producer.schedule_at(&appointment, common::day_before_morning()).await.unwrap();

    let first = scheduler.run_for(batch_time()).await.unwrap();
    let second = scheduler.run_for(batch_time()).await.unwrap();

    assert_eq!(first.jobs_created, 0);
    assert_eq!(first.jobs_unchanged, 2);
    assert_eq!(second.jobs_unchanged, 2);
    assert_eq!(h.store.all_jobs().await.len(), 2);
}

#[tokio::test]
async fn test_next_run_uses_clinic_clock() {
    let h = Harness::new().await;
    let config = AppConfig {
        utc_offset_minutes: 120,
        daily_batch_hour: 18,
        ..AppConfig::default()
    };
    let scheduler = DailyBatchScheduler::new(h.appointments.clone(), Arc::clone(&h.producer), &config);

    // 17:00 local: today's trigger is still ahead
    let before = Utc.with_ymd_and_hms(2031, 5, 13, 15, 0, 0).unwrap();
    assert_eq!(scheduler.next_run_after(before), Utc.with_ymd_and_hms(2031, 5, 13, 16, 0, 0).unwrap());

    // 18:30 local: roll over to tomorrow
    let after = Utc.with_ymd_and_hms(2031, 5, 13, 16, 30, 0).unwrap();
    assert_eq!(scheduler.next_run_after(after), Utc.with_ymd_and_hms(2031, 5, 14, 16, 0, 0).unwrap());

    // 23:30 UTC is already the next day locally
    let late = Utc.with_ymd_and_hms(2031, 5, 13, 23, 30, 0).unwrap();
    assert_eq!(scheduler.tomorrow(late), chrono::NaiveDate::from_ymd_opt(2031, 5, 15).unwrap());
}
