//! Q-FAZ Core Workflow
//!
//! This crate provides the report reconciliation workflow on top of the
//! backend client: local file validation, the Storm-then-banks sequence,
//! result download and user-facing error messages.

pub mod error;
pub mod service;
pub mod validation;

pub use error::{CoreError, Operation};
pub use service::{ReportService, load_report};
pub use validation::{MAX_FILE_SIZE, ValidationError, looks_like_storm_report, validate_file};
