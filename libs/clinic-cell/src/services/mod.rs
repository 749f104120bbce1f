pub mod calendar;
pub mod roster;
pub mod directory;
pub mod supabase;
pub mod memory;

pub use calendar::ClinicCalendarProvider;
pub use roster::StaffRosterProvider;
pub use directory::ContactDirectory;
pub use supabase::SupabaseClinicDirectory;
pub use memory::InMemoryClinicDirectory;
