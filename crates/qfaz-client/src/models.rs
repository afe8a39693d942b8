//! Backend API payloads

use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Response of `POST /api/upload-storm`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StormSummary {
    #[serde(default)]
    pub message: String,
    /// Number of proposals found in the Storm report
    pub total_proposals: u64,
    /// Proposals already finalised (PAGO/CANCELADO)
    pub paid_cancelled: u64,
    pub filename: String,
}

/// Per-bank breakdown returned by `POST /api/process-banks`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankSummary {
    pub bank_name: String,
    pub total_records: u64,
    pub duplicates_removed: u64,
    #[serde(default)]
    pub mapped_records: u64,
    #[serde(default)]
    pub unmapped_records: u64,
    #[serde(default)]
    pub status_distribution: BTreeMap<String, u64>,
}

/// Response of `POST /api/process-banks`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankProcessingResult {
    #[serde(default)]
    pub job_id: Option<String>,
    #[serde(default)]
    pub message: String,
    pub total_records: u64,
    /// Server-relative path of the generated CSV
    pub download_url: String,
    #[serde(default)]
    pub bank_summaries: Vec<BankSummary>,
}

impl BankProcessingResult {
    /// Records mapped automatically across all banks
    pub fn total_mapped(&self) -> u64 {
        self.bank_summaries.iter().map(|b| b.mapped_records).sum()
    }

    pub fn total_duplicates_removed(&self) -> u64 {
        self.bank_summaries.iter().map(|b| b.duplicates_removed).sum()
    }
}

/// Job state reported by `GET /api/processing-status/{job_id}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingJob {
    pub id: String,
    /// `processing`, `completed` or `failed`
    pub status: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub processed_records: u64,
    #[serde(default)]
    pub total_records: u64,
    pub created_at: NaiveDateTime,
    #[serde(default)]
    pub completed_at: Option<NaiveDateTime>,
    #[serde(default)]
    pub result_file: Option<String>,
}

impl ProcessingJob {
    pub fn is_completed(&self) -> bool {
        self.status == "completed"
    }
}
