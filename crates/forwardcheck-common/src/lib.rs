//! forwardcheck Common - Shared types and utilities
//!
//! This crate provides the configuration model, error types and the
//! verification report shared by the forwardcheck engine and binary.

pub mod config;
pub mod error;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
pub use types::{DeletionPolicy, FailureKind, MatchStrategy, Outcome, Report, TimestampSource};
