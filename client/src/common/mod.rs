pub mod errors;

pub use errors::{ManagementError, PollFailureReason};
