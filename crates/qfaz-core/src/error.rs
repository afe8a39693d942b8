//! Core error types

use std::fmt;

use qfaz_client::ClientError;
use thiserror::Error;

use crate::validation::ValidationError;

/// Workflow step a backend error belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    StormUpload,
    BankProcessing,
    Download,
    StatusQuery,
}

impl Operation {
    fn generic_message(&self) -> &'static str {
        match self {
            Operation::StormUpload => "Error processing the Storm report",
            Operation::BankProcessing => "Error processing the bank reports",
            Operation::Download => "Error downloading the processed result",
            Operation::StatusQuery => "Error querying the processing status",
        }
    }

    fn timeout_message(&self) -> &'static str {
        match self {
            Operation::StormUpload => "Request timed out. Try a smaller file.",
            Operation::BankProcessing => "Request timed out. Try smaller files.",
            Operation::Download | Operation::StatusQuery => "Request timed out. Try again later.",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::StormUpload => "Storm upload",
            Operation::BankProcessing => "Bank processing",
            Operation::Download => "Result download",
            Operation::StatusQuery => "Status query",
        };
        f.write_str(name)
    }
}

pub const CONNECTION_MESSAGE: &str = "Connection error. Check your network and the backend address.";

#[derive(Error, Debug)]
pub enum CoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("{operation} failed: {source}")]
    Backend {
        operation: Operation,
        #[source]
        source: ClientError,
    },

    #[error("Upload the Storm report before processing bank reports")]
    StormRequired,

    #[error("Select at least one valid bank report")]
    NoBankFiles,

    #[error("No processing result available")]
    NoResult,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    /// Wrap a client error raised during `operation`
    pub fn backend(operation: Operation) -> impl FnOnce(ClientError) -> CoreError {
        move |source| CoreError::Backend { operation, source }
    }

    /// Message suitable for showing to the user.
    ///
    /// Prefers the detail sent by the backend, then a message based on how
    /// the request failed.
    pub fn user_message(&self) -> String {
        match self {
            CoreError::Backend { operation, source } => {
                if let Some(detail) = source.detail() {
                    detail.to_string()
                } else if source.is_timeout() {
                    operation.timeout_message().to_string()
                } else if source.is_retryable() {
                    CONNECTION_MESSAGE.to_string()
                } else {
                    operation.generic_message().to_string()
                }
            }
            other => other.to_string(),
        }
    }
}
