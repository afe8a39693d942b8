//! Report workflow: Storm report first, then bank reports, then the result

use std::path::{Path, PathBuf};

use qfaz_client::{
    BackendSession, BankProcessingResult, DownloadedFile, FilePart, ProcessingJob,
    ResilientClient, StormSummary,
};
use tracing::{debug, info, warn};

use crate::error::{CoreError, Operation};
use crate::validation::{ValidationError, file_name, looks_like_storm_report, validate_file};

/// Drives one reconciliation session against the backends.
///
/// The session keeps the backend that answered last, so the bank batch,
/// status queries and the download all go to the instance holding the
/// uploaded Storm data and the generated CSV.
pub struct ReportService {
    client: ResilientClient,
    session: BackendSession,
    storm: Option<StormSummary>,
    result: Option<BankProcessingResult>,
}

impl ReportService {
    pub fn new(client: ResilientClient) -> Self {
        Self {
            client,
            session: BackendSession::new(),
            storm: None,
            result: None,
        }
    }

    pub fn client(&self) -> &ResilientClient {
        &self.client
    }

    pub fn session(&self) -> &BackendSession {
        &self.session
    }

    pub fn storm_summary(&self) -> Option<&StormSummary> {
        self.storm.as_ref()
    }

    pub fn result(&self) -> Option<&BankProcessingResult> {
        self.result.as_ref()
    }

    /// Validate and upload the Storm report
    pub async fn upload_storm(&mut self, path: &Path) -> Result<&StormSummary, CoreError> {
        let file = load_report(path).await?;

        if !looks_like_storm_report(&file.file_name) {
            warn!(
                "File {} does not look like a Storm report; check that it is the right file",
                file.file_name
            );
        }

        // A new Storm report invalidates everything derived from the old one
        self.storm = None;
        self.result = None;

        let answered = self
            .client
            .upload_storm(&mut self.session, file)
            .await
            .map_err(CoreError::backend(Operation::StormUpload))?;

        let summary = answered.into_inner();
        info!(
            "Storm processed: {} proposals, {} already paid/cancelled",
            summary.total_proposals, summary.paid_cancelled
        );

        Ok(self.storm.insert(summary))
    }

    /// Validate and process the bank reports.
    ///
    /// Files failing local validation are skipped with a warning; the call
    /// fails only when none is left.
    pub async fn process_banks(
        &mut self,
        paths: &[PathBuf],
    ) -> Result<&BankProcessingResult, CoreError> {
        if self.storm.is_none() {
            return Err(CoreError::StormRequired);
        }

        let mut files = Vec::with_capacity(paths.len());
        let mut skipped = 0;

        for path in paths {
            match load_report(path).await {
                Ok(file) => files.push(file),
                Err(CoreError::Validation(e)) => {
                    warn!("Skipping bank report: {}", e);
                    skipped += 1;
                }
                Err(e) => return Err(e),
            }
        }

        if skipped > 0 {
            warn!("{} file(s) ignored due to invalid format", skipped);
        }

        if files.is_empty() {
            return Err(CoreError::NoBankFiles);
        }

        self.result = None;

        let answered = self
            .client
            .process_banks(&mut self.session, files)
            .await
            .map_err(CoreError::backend(Operation::BankProcessing))?;

        let result = answered.into_inner();
        info!(
            "Processing finished: {} records, {} mapped automatically",
            result.total_records,
            result.total_mapped()
        );

        Ok(self.result.insert(result))
    }

    /// Absolute link to the generated CSV on the backend that produced it
    pub fn download_link(&self) -> Option<String> {
        self.result
            .as_ref()
            .map(|r| self.session.download_url(self.client.backends(), &r.download_url))
    }

    /// Save the generated CSV into `dest_dir`
    pub async fn download_result(&self, dest_dir: &Path) -> Result<DownloadedFile, CoreError> {
        let result = self.result.as_ref().ok_or(CoreError::NoResult)?;

        tokio::fs::create_dir_all(dest_dir).await?;

        self.client
            .download(&self.session, &result.download_url, dest_dir)
            .await
            .map_err(CoreError::backend(Operation::Download))
    }

    /// Current state of the last processing job
    pub async fn job_status(&self) -> Result<ProcessingJob, CoreError> {
        let job_id = self
            .result
            .as_ref()
            .and_then(|r| r.job_id.as_deref())
            .ok_or(CoreError::NoResult)?;

        self.client
            .processing_status(&self.session, job_id)
            .await
            .map_err(CoreError::backend(Operation::StatusQuery))
    }

    /// Forget the uploaded Storm summary and the result.
    ///
    /// The session keeps pointing at the last backend that answered.
    pub fn reset(&mut self) {
        self.storm = None;
        self.result = None;
    }
}

/// Check a report on disk and load it. Size is checked before reading.
pub async fn load_report(path: &Path) -> Result<FilePart, CoreError> {
    let name = file_name(path);
    let unreadable = |e: std::io::Error| ValidationError::Unreadable {
        path: path.display().to_string(),
        reason: e.to_string(),
    };

    let metadata = tokio::fs::metadata(path).await.map_err(unreadable)?;
    if !metadata.is_file() {
        return Err(ValidationError::Unreadable {
            path: path.display().to_string(),
            reason: "not a regular file".to_string(),
        }
        .into());
    }

    validate_file(&name, metadata.len())?;

    let data = tokio::fs::read(path).await.map_err(unreadable)?;
    debug!("Loaded {} ({} bytes)", name, data.len());

    Ok(FilePart::new(name, data))
}
