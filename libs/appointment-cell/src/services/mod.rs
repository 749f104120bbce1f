pub mod assignment;
pub mod availability;
pub mod booking;
pub mod conflict;
pub mod lifecycle;

pub use assignment::*;
pub use availability::*;
pub use booking::*;
pub use conflict::*;
pub use lifecycle::*;
