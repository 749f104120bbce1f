// libs/shared/models/src/appointment.rs
use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::time_slot::{intervals_overlap, TimeSlot};

pub const MIN_DURATION_MINUTES: u32 = 15;
pub const MAX_DURATION_MINUTES: u32 = 480;

// ==============================================================================
// CORE APPOINTMENT MODEL
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub practitioner_id: Option<Uuid>,
    pub clinic_id: Uuid,
    pub service_type: String,
    pub appointment_date: NaiveDate,
    pub time_slot: TimeSlot,
    pub duration_minutes: u32,
    pub status: AppointmentStatus,
    #[serde(default)]
    pub emergency: bool,
    #[serde(default)]
    pub notification_preferences: NotificationPreferences,
    #[serde(default)]
    pub cancellation_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    pub fn start_minutes(&self) -> u32 {
        self.time_slot.minutes()
    }

    pub fn end_minutes(&self) -> u32 {
        self.time_slot.end_after(self.duration_minutes)
    }

    /// Whether `[start, start + duration)` on the same date overlaps this appointment.
    pub fn overlaps(&self, date: NaiveDate, start: TimeSlot, duration_minutes: u32) -> bool {
        self.appointment_date == date
            && intervals_overlap(
                start.minutes(),
                start.end_after(duration_minutes),
                self.start_minutes(),
                self.end_minutes(),
            )
    }

    /// Absolute start instant given the clinic's canonical clock.
    pub fn starts_at(&self, offset: &FixedOffset) -> DateTime<Utc> {
        let local = self.appointment_date.and_time(self.time_slot.to_naive_time());
        offset
            .from_local_datetime(&local)
            .single()
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|| local.and_utc() - Duration::seconds(offset.local_minus_utc() as i64))
    }

    pub fn blocks_calendar(&self) -> bool {
        self.practitioner_id.is_some() && self.status.blocks_calendar()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AppointmentStatus {
    Scheduled,
    Confirmed,
    InProgress,
    Completed,
    Cancelled,
    NoShow,
    Urgent,
}

impl AppointmentStatus {
    /// Statuses that occupy the practitioner's calendar for conflict detection and
    /// for the storage uniqueness constraint.
    pub const BLOCKING: [AppointmentStatus; 2] = [AppointmentStatus::Scheduled, AppointmentStatus::Confirmed];

    pub fn blocks_calendar(&self) -> bool {
        Self::BLOCKING.contains(self)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AppointmentStatus::Completed | AppointmentStatus::Cancelled | AppointmentStatus::NoShow
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Scheduled => "scheduled",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::InProgress => "in-progress",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::Cancelled => "cancelled",
            AppointmentStatus::NoShow => "no-show",
            AppointmentStatus::Urgent => "urgent",
        }
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ==============================================================================
// NOTIFICATION PREFERENCES
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationChannel {
    Email,
    Sms,
    InApp,
}

impl NotificationChannel {
    pub const ALL: [NotificationChannel; 3] = [
        NotificationChannel::Email,
        NotificationChannel::Sms,
        NotificationChannel::InApp,
    ];
}

impl fmt::Display for NotificationChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotificationChannel::Email => write!(f, "email"),
            NotificationChannel::Sms => write!(f, "sms"),
            NotificationChannel::InApp => write!(f, "in_app"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelSet {
    pub email: bool,
    pub sms: bool,
    pub in_app: bool,
}

impl ChannelSet {
    pub fn all() -> Self {
        Self { email: true, sms: true, in_app: true }
    }

    pub fn contains(&self, channel: NotificationChannel) -> bool {
        match channel {
            NotificationChannel::Email => self.email,
            NotificationChannel::Sms => self.sms,
            NotificationChannel::InApp => self.in_app,
        }
    }

    pub fn insert(&mut self, channel: NotificationChannel) {
        match channel {
            NotificationChannel::Email => self.email = true,
            NotificationChannel::Sms => self.sms = true,
            NotificationChannel::InApp => self.in_app = true,
        }
    }

    /// Channels in `self` that are not in `other`.
    pub fn difference(&self, other: &ChannelSet) -> ChannelSet {
        ChannelSet {
            email: self.email && !other.email,
            sms: self.sms && !other.sms,
            in_app: self.in_app && !other.in_app,
        }
    }

    pub fn is_empty(&self) -> bool {
        !(self.email || self.sms || self.in_app)
    }

    pub fn iter(&self) -> impl Iterator<Item = NotificationChannel> + '_ {
        NotificationChannel::ALL.into_iter().filter(|c| self.contains(*c))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPreferences {
    pub enabled: bool,
    pub channels: ChannelSet,
    pub reminder_offsets_hours: BTreeSet<u32>,
}

impl Default for NotificationPreferences {
    fn default() -> Self {
        Self {
            enabled: true,
            channels: ChannelSet { email: true, sms: false, in_app: true },
            reminder_offsets_hours: BTreeSet::from([24]),
        }
    }
}

impl NotificationPreferences {
    pub fn with_offsets(offsets: impl IntoIterator<Item = u32>) -> Self {
        Self {
            reminder_offsets_hours: offsets.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn wants_reminders(&self) -> bool {
        self.enabled && !self.channels.is_empty() && !self.reminder_offsets_hours.is_empty()
    }
}
