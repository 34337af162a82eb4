//! Scheduled Verification Module - Periodic runs and report hand-off

mod scheduler;

pub use scheduler::{JobSpec, VerificationScheduler};
