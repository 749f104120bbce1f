pub mod appointment;
pub mod error;
pub mod time_slot;

pub use appointment::*;
pub use error::AppError;
pub use time_slot::{intervals_overlap, TimeSlot, TimeSlotParseError};
