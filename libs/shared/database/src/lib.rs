pub mod appointments;
pub mod error;
pub mod supabase;

pub use appointments::{AppointmentRepository, InMemoryAppointmentRepository, SupabaseAppointmentRepository};
pub use error::DatabaseError;
pub use supabase::SupabaseClient;
