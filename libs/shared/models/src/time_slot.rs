use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MINUTES_PER_DAY: u32 = 24 * 60;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid time slot {0:?}: expected 24-hour HH:MM")]
pub struct TimeSlotParseError(pub String);

/// Wall-clock `HH:MM` (24-hour) on the clinic's canonical clock, stored as minutes
/// since midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeSlot(u16);

impl TimeSlot {
    pub fn from_minutes(minutes: u32) -> Option<Self> {
        if minutes < MINUTES_PER_DAY {
            Some(Self(minutes as u16))
        } else {
            None
        }
    }

    pub fn from_hm(hour: u32, minute: u32) -> Option<Self> {
        if hour < 24 && minute < 60 {
            Self::from_minutes(hour * 60 + minute)
        } else {
            None
        }
    }

    pub fn minutes(&self) -> u32 {
        self.0 as u32
    }

    pub fn hour(&self) -> u32 {
        self.minutes() / 60
    }

    pub fn minute(&self) -> u32 {
        self.minutes() % 60
    }

    /// Exclusive end of an interval of `duration_minutes` starting here. May run past
    /// midnight, which callers treat as not fitting in any operating window.
    pub fn end_after(&self, duration_minutes: u32) -> u32 {
        self.minutes() + duration_minutes
    }

    pub fn to_naive_time(&self) -> chrono::NaiveTime {
        chrono::NaiveTime::from_hms_opt(self.hour(), self.minute(), 0)
            .unwrap_or(chrono::NaiveTime::MIN)
    }
}

impl FromStr for TimeSlot {
    type Err = TimeSlotParseError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let err = || TimeSlotParseError(raw.to_string());
        let (hours, minutes) = raw.split_once(':').ok_or_else(err)?;
        if hours.len() != 2 || minutes.len() != 2 {
            return Err(err());
        }
        if !hours.bytes().chain(minutes.bytes()).all(|b| b.is_ascii_digit()) {
            return Err(err());
        }
        let hour: u32 = hours.parse().map_err(|_| err())?;
        let minute: u32 = minutes.parse().map_err(|_| err())?;
        Self::from_hm(hour, minute).ok_or_else(err)
    }
}

impl TryFrom<String> for TimeSlot {
    type Error = TimeSlotParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TimeSlot> for String {
    fn from(slot: TimeSlot) -> Self {
        slot.to_string()
    }
}

impl fmt::Display for TimeSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour(), self.minute())
    }
}

/// Half-open interval overlap on minutes since midnight: `[a_start, a_end)` against
/// `[b_start, b_end)`.
pub fn intervals_overlap(a_start: u32, a_end: u32, b_start: u32, b_end: u32) -> bool {
    a_start < b_end && a_end > b_start
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_slots() {
        assert_eq!("09:00".parse::<TimeSlot>().unwrap().minutes(), 540);
        assert_eq!("23:59".parse::<TimeSlot>().unwrap().minutes(), 1439);
        assert_eq!("00:00".parse::<TimeSlot>().unwrap().to_string(), "00:00");
    }

    #[test]
    fn test_parse_rejects_malformed_slots() {
        for raw in ["9:00", "24:00", "12:60", "12-30", "ab:cd", "", "12:3", "+1:00"] {
            assert!(raw.parse::<TimeSlot>().is_err(), "{raw} should be rejected");
        }
    }

    #[test]
    fn test_serde_uses_hh_mm_string() {
        let slot: TimeSlot = serde_json::from_str("\"14:30\"").unwrap();
        assert_eq!(serde_json::to_string(&slot).unwrap(), "\"14:30\"");
        assert!(serde_json::from_str::<TimeSlot>("\"2pm\"").is_err());
    }

    #[test]
    fn test_overlap_is_half_open() {
        // 10:00-11:00 vs 10:30-11:00
        assert!(intervals_overlap(600, 660, 630, 660));
        // back-to-back intervals do not overlap
        assert!(!intervals_overlap(600, 660, 660, 690));
        assert!(!intervals_overlap(660, 690, 600, 660));
    }
}
