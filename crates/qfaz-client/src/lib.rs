//! Q-FAZ Backend Client
//!
//! This crate provides the HTTP client for the report processing backends:
//! candidate resolution, multipart uploads with ordered failover, and
//! backend affinity for follow-up requests.

pub mod backends;
pub mod client;
pub mod error;
pub mod models;
pub mod session;

pub use backends::{BackendList, BackendSources};
pub use client::{
    Answered, AttemptOutcome, BackendProbe, ClientConfig, DownloadedFile, FilePart,
    RequestOptions, ResilientClient, UploadPayload,
};
pub use error::ClientError;
pub use models::{BankProcessingResult, BankSummary, ProcessingJob, StormSummary};
pub use session::BackendSession;
