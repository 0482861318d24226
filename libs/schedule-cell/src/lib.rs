pub mod error;
pub mod handlers;
pub mod router;
pub mod models;
pub mod services;

pub use error::{DecodeError, ScheduleError};
pub use models::*;
pub use services::*;
pub use router::schedule_routes;
