//! Failover client for the report processing backends

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures::StreamExt;
use reqwest::header::{CONTENT_DISPOSITION, CONTENT_TYPE, HeaderMap};
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client, Response};
use serde::de::DeserializeOwned;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::backends::{API_PREFIX, BackendList, api_url};
use crate::error::ClientError;
use crate::models::{BankProcessingResult, ProcessingJob, StormSummary};
use crate::session::BackendSession;

pub const STORM_ENDPOINT: &str = "/upload-storm";
pub const BANKS_ENDPOINT: &str = "/process-banks";

/// Multipart field carrying the Storm report
pub const STORM_FIELD: &str = "file";
/// Multipart field repeated once per bank report
pub const BANKS_FIELD: &str = "files";

pub const STORM_UPLOAD_TIMEOUT: Duration = Duration::from_secs(60);
pub const BANK_PROCESSING_TIMEOUT: Duration = Duration::from_secs(120);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Base used for requests addressed with same-origin relative paths
pub const DEFAULT_SAME_ORIGIN: &str = "http://localhost:8000";

/// File name used when the backend does not suggest one
pub const DEFAULT_RESULT_FILENAME: &str = "relatorio_final_storm.csv";

/// Client configuration
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Origin that relative (`/api/...`) targets resolve against
    pub same_origin: String,
    /// Skip TLS certificate verification
    pub skip_tls_verify: bool,
    /// Timeout of a single Storm upload attempt
    pub storm_timeout: Duration,
    /// Timeout of a single bank processing attempt
    pub bank_timeout: Duration,
    /// Timeout for status queries, downloads and probes
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            same_origin: DEFAULT_SAME_ORIGIN.to_string(),
            skip_tls_verify: false,
            storm_timeout: STORM_UPLOAD_TIMEOUT,
            bank_timeout: BANK_PROCESSING_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

/// A file to be sent as one multipart field
#[derive(Clone, Debug)]
pub struct FilePart {
    pub file_name: String,
    pub data: Bytes,
}

impl FilePart {
    pub fn new(file_name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            file_name: file_name.into(),
            data: data.into(),
        }
    }

    fn to_part(&self) -> Result<Part, ClientError> {
        let mime = mime_guess::from_path(&self.file_name).first_or_octet_stream();
        let part = Part::stream_with_length(Body::from(self.data.clone()), self.data.len() as u64)
            .file_name(self.file_name.clone())
            .mime_str(mime.as_ref())?;
        Ok(part)
    }
}

/// Multipart payload that can be rebuilt for every attempt
#[derive(Clone, Debug, Default)]
pub struct UploadPayload {
    parts: Vec<(String, FilePart)>,
}

impl UploadPayload {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a file under `field`
    pub fn file(mut self, field: &str, part: FilePart) -> Self {
        self.parts.push((field.to_string(), part));
        self
    }

    pub fn parts(&self) -> &[(String, FilePart)] {
        &self.parts
    }

    pub fn total_bytes(&self) -> u64 {
        self.parts.iter().map(|(_, p)| p.data.len() as u64).sum()
    }

    fn to_form(&self) -> Result<Form, ClientError> {
        let mut form = Form::new();
        for (field, part) in &self.parts {
            form = form.part(field.clone(), part.to_part()?);
        }
        Ok(form)
    }
}

/// Per-request options
#[derive(Clone, Debug)]
pub struct RequestOptions {
    /// Extra headers. `Content-Type` is always set by the multipart encoder.
    pub headers: HeaderMap,
    pub timeout: Duration,
}

impl RequestOptions {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            headers: HeaderMap::new(),
            timeout,
        }
    }
}

/// A value together with the backend that produced it
#[derive(Debug, Clone)]
pub struct Answered<T> {
    /// Origin that answered (empty for same-origin)
    pub origin: String,
    /// Position of that origin among the candidates
    pub index: usize,
    pub value: T,
}

impl<T> Answered<T> {
    pub fn into_inner(self) -> T {
        self.value
    }
}

/// Result of one attempt against one candidate
#[derive(Debug)]
pub enum AttemptOutcome {
    Success(Response),
    /// No response was received; the next candidate may be tried
    Retryable(ClientError),
    /// The backend answered with an error status
    Fatal(ClientError),
}

/// Downloaded result artifact
#[derive(Debug, Clone)]
pub struct DownloadedFile {
    pub path: PathBuf,
    pub size: u64,
    pub url: String,
}

/// Reachability of one candidate
#[derive(Debug, Clone)]
pub struct BackendProbe {
    pub origin: String,
    pub url: String,
    pub reachable: bool,
    pub status: Option<u16>,
    pub latency: Duration,
    pub error: Option<String>,
}

/// HTTP client trying backend candidates in order until one answers
pub struct ResilientClient {
    backends: BackendList,
    config: ClientConfig,
    same_origin: Url,
    client: Client,
}

impl ResilientClient {
    /// Create a new client over a resolved candidate list
    pub fn new(backends: BackendList, config: ClientConfig) -> Result<Self, ClientError> {
        let same_origin = Url::parse(&config.same_origin)
            .map_err(|e| ClientError::InvalidUrl(format!("{}: {}", config.same_origin, e)))?;

        let mut builder = Client::builder();

        if config.skip_tls_verify {
            builder = builder.danger_accept_invalid_certs(true);
        }

        let client = builder.build()?;

        info!(
            "Created backend client with {} candidate(s), same origin {}",
            backends.len(),
            same_origin
        );

        Ok(Self {
            backends,
            config,
            same_origin,
            client,
        })
    }

    pub fn backends(&self) -> &BackendList {
        &self.backends
    }

    /// Turn a possibly relative target into a request URL
    fn resolve(&self, target: &str) -> Result<Url, ClientError> {
        let url = if target.starts_with('/') {
            self.same_origin.join(target)
        } else {
            Url::parse(target)
        };
        url.map_err(|e| ClientError::InvalidUrl(format!("{}: {}", target, e)))
    }

    /// POST `payload` to `endpoint` on one candidate
    async fn attempt(
        &self,
        origin: &str,
        endpoint: &str,
        payload: &UploadPayload,
        options: &RequestOptions,
    ) -> AttemptOutcome {
        // An unusable origin never produced a response, so move on
        let url = match self.resolve(&api_url(origin, endpoint)) {
            Ok(url) => url,
            Err(e) => return AttemptOutcome::Retryable(e),
        };

        let form = match payload.to_form() {
            Ok(form) => form,
            Err(e) => return AttemptOutcome::Fatal(e),
        };

        let mut headers = options.headers.clone();
        headers.remove(CONTENT_TYPE);

        debug!("POST {} ({} bytes)", url, payload.total_bytes());

        let result = self
            .client
            .post(url.clone())
            .headers(headers)
            .timeout(options.timeout)
            .multipart(form)
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => AttemptOutcome::Success(response),
            Ok(response) => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                AttemptOutcome::Fatal(ClientError::server(status, body))
            }
            Err(e) => {
                let err = ClientError::transport(url.as_str(), e);
                if err.is_retryable() {
                    AttemptOutcome::Retryable(err)
                } else {
                    AttemptOutcome::Fatal(err)
                }
            }
        }
    }

    /// POST a multipart payload, falling back across candidates.
    ///
    /// Candidates are tried strictly in order, one at a time. Network and
    /// timeout failures advance to the next candidate; an error status from a
    /// reachable backend is returned immediately. On success the answering
    /// origin is recorded in `session`.
    pub async fn post_multipart(
        &self,
        session: &mut BackendSession,
        endpoint: &str,
        payload: &UploadPayload,
        options: &RequestOptions,
    ) -> Result<Answered<Response>, ClientError> {
        let candidates = self.backends.candidates();
        let mut last_error = None;

        for (index, origin) in candidates.iter().enumerate() {
            match self.attempt(origin, endpoint, payload, options).await {
                AttemptOutcome::Success(response) => {
                    metrics::counter!("qfaz_backend_attempts_total", "outcome" => "success")
                        .increment(1);
                    info!("{} answered by {}", endpoint, display_origin(origin));

                    session.record_success(origin);
                    return Ok(Answered {
                        origin: origin.to_string(),
                        index,
                        value: response,
                    });
                }
                AttemptOutcome::Retryable(e) => {
                    metrics::counter!("qfaz_backend_attempts_total", "outcome" => "retryable")
                        .increment(1);
                    if index + 1 < candidates.len() {
                        warn!(
                            "Backend {} unavailable for {}: {}; trying next candidate",
                            display_origin(origin),
                            endpoint,
                            e
                        );
                    } else {
                        warn!("Backend {} unavailable for {}: {}", display_origin(origin), endpoint, e);
                    }
                    last_error = Some(e);
                }
                AttemptOutcome::Fatal(e) => {
                    metrics::counter!("qfaz_backend_attempts_total", "outcome" => "fatal")
                        .increment(1);
                    warn!("Backend {} rejected {}: {}", display_origin(origin), endpoint, e);
                    return Err(e);
                }
            }
        }

        metrics::counter!("qfaz_backend_exhausted_total").increment(1);
        error!(
            "All {} backend candidate(s) failed for {}",
            candidates.len(),
            endpoint
        );

        Err(last_error
            .unwrap_or_else(|| ClientError::InvalidUrl("no backend candidates".to_string())))
    }

    /// Upload a Storm report
    pub async fn upload_storm(
        &self,
        session: &mut BackendSession,
        file: FilePart,
    ) -> Result<Answered<StormSummary>, ClientError> {
        let payload = UploadPayload::new().file(STORM_FIELD, file);
        let options = RequestOptions::with_timeout(self.config.storm_timeout);

        let answered = self
            .post_multipart(session, STORM_ENDPOINT, &payload, &options)
            .await?;
        decode_json(answered).await
    }

    /// Send bank reports for deduplication and mapping
    pub async fn process_banks(
        &self,
        session: &mut BackendSession,
        files: Vec<FilePart>,
    ) -> Result<Answered<BankProcessingResult>, ClientError> {
        let payload = files
            .into_iter()
            .fold(UploadPayload::new(), |payload, file| payload.file(BANKS_FIELD, file));
        let options = RequestOptions::with_timeout(self.config.bank_timeout);

        let answered = self
            .post_multipart(session, BANKS_ENDPOINT, &payload, &options)
            .await?;
        decode_json(answered).await
    }

    /// GET a path on the backend the session is bound to. No fallback: the
    /// resource only exists where it was produced.
    async fn get_affine(&self, session: &BackendSession, path: &str) -> Result<(Url, Response), ClientError> {
        let url = self.resolve(&session.download_url(&self.backends, path))?;

        debug!("GET {}", url);

        let response = self
            .client
            .get(url.clone())
            .timeout(self.config.request_timeout)
            .send()
            .await
            .map_err(|e| ClientError::transport(url.as_str(), e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::server(
                status,
                response.text().await.unwrap_or_default(),
            ));
        }

        Ok((url, response))
    }

    /// Query the state of a processing job
    pub async fn processing_status(
        &self,
        session: &BackendSession,
        job_id: &str,
    ) -> Result<ProcessingJob, ClientError> {
        let path = format!("{}/processing-status/{}", API_PREFIX, job_id);
        let (_, response) = self.get_affine(session, &path).await?;
        let body = response.bytes().await?;

        serde_json::from_slice(&body).map_err(|e| ClientError::InvalidResponse(e.to_string()))
    }

    /// Download a generated result into `dest_dir`
    pub async fn download(
        &self,
        session: &BackendSession,
        download_path: &str,
        dest_dir: &Path,
    ) -> Result<DownloadedFile, ClientError> {
        let (url, response) = self.get_affine(session, download_path).await?;

        let file_name = response
            .headers()
            .get(CONTENT_DISPOSITION)
            .and_then(|h| h.to_str().ok())
            .and_then(content_disposition_filename)
            .unwrap_or_else(|| DEFAULT_RESULT_FILENAME.to_string());

        let path = dest_dir.join(&file_name);
        let partial = dest_dir.join(format!("{}.part", file_name));

        // The final name only appears once the whole body is on disk
        let size = match write_body(response, &partial).await {
            Ok(size) => size,
            Err(e) => {
                if let Err(cleanup) = tokio::fs::remove_file(&partial).await {
                    debug!("Could not remove {}: {}", partial.display(), cleanup);
                }
                return Err(e);
            }
        };
        tokio::fs::rename(&partial, &path).await?;

        info!("Downloaded {} ({} bytes) from {}", path.display(), size, url);

        Ok(DownloadedFile {
            path,
            size,
            url: url.to_string(),
        })
    }

    /// Check which candidates are reachable
    pub async fn probe(&self) -> Vec<BackendProbe> {
        let mut results = Vec::new();

        for origin in self.backends.candidates() {
            let target = format!("{}/", api_url(origin, ""));
            let started = Instant::now();

            let outcome = match self.resolve(&target) {
                Ok(url) => self
                    .client
                    .get(url)
                    .timeout(self.config.request_timeout)
                    .send()
                    .await
                    .map_err(|e| ClientError::transport(&target, e)),
                Err(e) => Err(e),
            };

            let probe = match outcome {
                Ok(response) => BackendProbe {
                    origin: origin.to_string(),
                    url: target,
                    reachable: true,
                    status: Some(response.status().as_u16()),
                    latency: started.elapsed(),
                    error: None,
                },
                Err(e) => BackendProbe {
                    origin: origin.to_string(),
                    url: target,
                    reachable: false,
                    status: None,
                    latency: started.elapsed(),
                    error: Some(e.to_string()),
                },
            };

            debug!(
                "Probe {}: reachable={} ({:?})",
                probe.url, probe.reachable, probe.latency
            );
            results.push(probe);
        }

        results
    }
}

async fn decode_json<T: DeserializeOwned>(
    answered: Answered<Response>,
) -> Result<Answered<T>, ClientError> {
    let Answered {
        origin,
        index,
        value,
    } = answered;

    let body = value.bytes().await?;
    let value = serde_json::from_slice(&body)
        .map_err(|e| ClientError::InvalidResponse(e.to_string()))?;

    Ok(Answered {
        origin,
        index,
        value,
    })
}

/// Stream a response body into `path`, returning the bytes written
async fn write_body(response: Response, path: &Path) -> Result<u64, ClientError> {
    let mut file = tokio::fs::File::create(path).await?;
    let mut stream = response.bytes_stream();
    let mut size = 0u64;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        size += chunk.len() as u64;
        file.write_all(&chunk).await?;
    }
    file.flush().await?;

    Ok(size)
}

fn display_origin(origin: &str) -> &str {
    if origin.is_empty() { "(same origin)" } else { origin }
}

/// Extract a safe file name from a `Content-Disposition` header
fn content_disposition_filename(header: &str) -> Option<String> {
    header
        .split(';')
        .map(str::trim)
        .find_map(|param| param.strip_prefix("filename="))
        .map(|value| value.trim_matches('"'))
        .and_then(|name| Path::new(name).file_name())
        .map(|name| name.to_string_lossy().into_owned())
        .filter(|name| !name.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Bytes as BodyBytes;
    use axum::extract::State;
    use axum::http::{StatusCode, header};
    use axum::routing::{any, get, post};
    use axum::{Json, Router};
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone, Default)]
    struct Hits(Arc<AtomicUsize>);

    impl Hits {
        fn hit(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }

        fn count(&self) -> usize {
            self.0.load(Ordering::SeqCst)
        }
    }

    async fn spawn(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    /// An origin with nothing listening behind it
    async fn dead_origin() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("http://{}", addr)
    }

    fn bank_backend(hits: Hits) -> Router {
        Router::new()
            .route(
                "/api/process-banks",
                post(|State(hits): State<Hits>, _body: BodyBytes| async move {
                    hits.hit();
                    Json(json!({
                        "total_records": 42,
                        "download_url": "/files/out.csv",
                        "bank_summaries": []
                    }))
                }),
            )
            .with_state(hits)
    }

    fn slow_backend(hits: Hits) -> Router {
        Router::new()
            .route(
                "/api/process-banks",
                post(|State(hits): State<Hits>, _body: BodyBytes| async move {
                    hits.hit();
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Json(json!({"total_records": 0, "download_url": "/never", "bank_summaries": []}))
                }),
            )
            .with_state(hits)
    }

    fn rejecting_backend(hits: Hits) -> Router {
        Router::new()
            .route(
                "/api/process-banks",
                post(|State(hits): State<Hits>, _body: BodyBytes| async move {
                    hits.hit();
                    (
                        StatusCode::UNPROCESSABLE_ENTITY,
                        Json(json!({"detail": "Nenhum dado válido foi processado"})),
                    )
                }),
            )
            .with_state(hits)
    }

    fn client(origins: Vec<String>, same_origin: &str) -> ResilientClient {
        let config = ClientConfig {
            same_origin: same_origin.to_string(),
            storm_timeout: Duration::from_millis(300),
            bank_timeout: Duration::from_millis(300),
            request_timeout: Duration::from_secs(2),
            ..Default::default()
        };
        ResilientClient::new(BackendList::from_origins(origins), config).unwrap()
    }

    fn bank_files() -> Vec<FilePart> {
        vec![FilePart::new("digio.csv", "PROPOSTA;SITUACAO\n123;PAGO\n")]
    }

    #[tokio::test]
    async fn test_falls_back_after_network_failures() {
        let hits = Hits::default();
        let good = spawn(bank_backend(hits.clone())).await;
        let origins = vec![dead_origin().await, dead_origin().await, good.clone()];
        let client = client(origins, DEFAULT_SAME_ORIGIN);
        let mut session = BackendSession::new();

        let answered = client.process_banks(&mut session, bank_files()).await.unwrap();

        assert_eq!(answered.index, 2);
        assert_eq!(answered.origin, good);
        assert_eq!(answered.value.total_records, 42);
        assert_eq!(session.last_used(), Some(good.as_str()));
        assert_eq!(hits.count(), 1);
    }

    #[tokio::test]
    async fn test_timeout_advances_to_next_candidate() {
        let slow_hits = Hits::default();
        let good_hits = Hits::default();
        let slow = spawn(slow_backend(slow_hits.clone())).await;
        let good = spawn(bank_backend(good_hits.clone())).await;
        let client = client(vec![slow, good.clone()], DEFAULT_SAME_ORIGIN);
        let mut session = BackendSession::new();

        let answered = client.process_banks(&mut session, bank_files()).await.unwrap();

        assert_eq!(answered.value.total_records, 42);
        assert_eq!(answered.value.download_url, "/files/out.csv");
        assert!(answered.value.bank_summaries.is_empty());
        assert_eq!(session.last_used(), Some(good.as_str()));
        assert_eq!(
            session.download_url(client.backends(), "/files/out.csv"),
            format!("{}/files/out.csv", good)
        );
        assert_eq!(slow_hits.count(), 1);
        assert_eq!(good_hits.count(), 1);
    }

    #[tokio::test]
    async fn test_server_error_stops_iteration() {
        let rejecting_hits = Hits::default();
        let good_hits = Hits::default();
        let rejecting = spawn(rejecting_backend(rejecting_hits.clone())).await;
        let good = spawn(bank_backend(good_hits.clone())).await;
        let client = client(vec![rejecting, good], DEFAULT_SAME_ORIGIN);
        let mut session = BackendSession::new();

        let err = client.process_banks(&mut session, bank_files()).await.unwrap_err();

        assert_eq!(err.status(), Some(reqwest::StatusCode::UNPROCESSABLE_ENTITY));
        assert_eq!(err.detail(), Some("Nenhum dado válido foi processado"));
        assert_eq!(rejecting_hits.count(), 1);
        assert_eq!(good_hits.count(), 0);
        assert_eq!(session.last_used(), None);
    }

    #[tokio::test]
    async fn test_exhaustion_returns_last_error_and_keeps_session() {
        let first = dead_origin().await;
        let last = dead_origin().await;
        let client = client(vec![first, last.clone()], DEFAULT_SAME_ORIGIN);
        let mut session = BackendSession::new();
        session.record_success("https://earlier.example");

        let err = client.process_banks(&mut session, bank_files()).await.unwrap_err();

        assert!(err.is_retryable());
        match &err {
            ClientError::Connection { url, .. } => assert!(url.starts_with(&last)),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(session.last_used(), Some("https://earlier.example"));
    }

    #[tokio::test]
    async fn test_timeout_is_classified() {
        let slow = spawn(slow_backend(Hits::default())).await;
        let client = client(vec![slow], DEFAULT_SAME_ORIGIN);
        let mut session = BackendSession::new();

        let err = client.process_banks(&mut session, bank_files()).await.unwrap_err();

        assert!(err.is_timeout());
        assert!(err.is_retryable());
        assert_eq!(session.last_used(), None);
    }

    #[tokio::test]
    async fn test_empty_list_makes_one_relative_attempt() {
        let hits = Hits::default();
        let same_origin = spawn(bank_backend(hits.clone())).await;
        let client = client(vec![], &same_origin);
        let mut session = BackendSession::new();

        let answered = client.process_banks(&mut session, bank_files()).await.unwrap();

        assert_eq!(answered.origin, "");
        assert_eq!(answered.index, 0);
        assert_eq!(session.last_used(), Some(""));
        assert_eq!(hits.count(), 1);
        assert_eq!(
            session.download_url(client.backends(), "/files/out.csv"),
            "/files/out.csv"
        );
    }

    #[tokio::test]
    async fn test_empty_list_failure_is_not_retried() {
        let hits = Hits::default();
        let same_origin = spawn(rejecting_backend(hits.clone())).await;
        let client = client(vec![], &same_origin);
        let mut session = BackendSession::new();

        let err = client.process_banks(&mut session, bank_files()).await.unwrap_err();

        assert_eq!(err.status(), Some(reqwest::StatusCode::UNPROCESSABLE_ENTITY));
        assert_eq!(hits.count(), 1);
    }

    #[tokio::test]
    async fn test_storm_upload_sends_file_field() {
        let router = Router::new().route(
            "/api/upload-storm",
            post(|body: BodyBytes| async move {
                let text = String::from_utf8_lossy(&body);
                assert!(text.contains("name=\"file\""));
                assert!(text.contains("filename=\"storm_contratos.csv\""));
                Json(json!({
                    "message": "Arquivo da Storm processado com sucesso",
                    "total_proposals": 120,
                    "paid_cancelled": 35,
                    "filename": "storm_contratos.csv"
                }))
            }),
        );
        let origin = spawn(router).await;
        let client = client(vec![origin.clone()], DEFAULT_SAME_ORIGIN);
        let mut session = BackendSession::new();

        let answered = client
            .upload_storm(&mut session, FilePart::new("storm_contratos.csv", "PROPOSTA;STATUS\n"))
            .await
            .unwrap();

        assert_eq!(answered.value.total_proposals, 120);
        assert_eq!(answered.value.paid_cancelled, 35);
        assert_eq!(session.last_used(), Some(origin.as_str()));
    }

    #[tokio::test]
    async fn test_invalid_json_is_reported() {
        let router = Router::new().route(
            "/api/process-banks",
            post(|_body: BodyBytes| async { "not json" }),
        );
        let origin = spawn(router).await;
        let client = client(vec![origin], DEFAULT_SAME_ORIGIN);
        let mut session = BackendSession::new();

        let err = client.process_banks(&mut session, bank_files()).await.unwrap_err();
        assert!(matches!(err, ClientError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_download_targets_answering_backend() {
        let hits = Hits::default();
        let router = bank_backend(hits.clone()).route(
            "/files/out.csv",
            get(|| async {
                (
                    [(header::CONTENT_DISPOSITION, "attachment; filename=\"relatorio_final.csv\"")],
                    "CPF;SITUACAO\n1;PAGO\n",
                )
            }),
        );
        let good = spawn(router).await;
        let client = client(vec![dead_origin().await, good.clone()], DEFAULT_SAME_ORIGIN);
        let mut session = BackendSession::new();
        let dir = tempfile::tempdir().unwrap();

        let result = client.process_banks(&mut session, bank_files()).await.unwrap().into_inner();
        let downloaded = client
            .download(&session, &result.download_url, dir.path())
            .await
            .unwrap();

        assert_eq!(downloaded.url, format!("{}/files/out.csv", good));
        assert_eq!(downloaded.path, dir.path().join("relatorio_final.csv"));
        assert_eq!(downloaded.size, 20);
        let content = std::fs::read_to_string(&downloaded.path).unwrap();
        assert_eq!(content, "CPF;SITUACAO\n1;PAGO\n");
    }

    #[tokio::test]
    async fn test_processing_status_uses_session_backend() {
        let router = Router::new().route(
            "/api/processing-status/{job_id}",
            get(|axum::extract::Path(job_id): axum::extract::Path<String>| async move {
                Json(json!({
                    "id": job_id,
                    "status": "completed",
                    "message": "Processamento concluído: 42 registros",
                    "processed_records": 0,
                    "total_records": 42,
                    "created_at": "2024-05-02T13:45:10.123456",
                    "completed_at": null,
                    "result_file": null
                }))
            }),
        );
        let good = spawn(router).await;
        let client = client(vec!["https://unused.invalid".to_string()], DEFAULT_SAME_ORIGIN);
        let mut session = BackendSession::new();
        session.record_success(&good);

        let job = client.processing_status(&session, "7c1d").await.unwrap();
        assert_eq!(job.id, "7c1d");
        assert!(job.is_completed());
        assert_eq!(job.total_records, 42);
    }

    #[tokio::test]
    async fn test_probe_reports_each_candidate() {
        let router = Router::new().route("/api/", get(|| async { Json(json!({"message": "ok"})) }));
        let good = spawn(router).await;
        let dead = dead_origin().await;
        let client = client(vec![dead, good], DEFAULT_SAME_ORIGIN);

        let probes = client.probe().await;

        assert_eq!(probes.len(), 2);
        assert!(!probes[0].reachable);
        assert!(probes[0].error.is_some());
        assert!(probes[1].reachable);
        assert_eq!(probes[1].status, Some(200));
    }

    /// Backend announcing `Content-Length: 1000` for the result but closing
    /// the connection after 20 bytes
    async fn truncating_origin() -> String {
        use tokio::io::AsyncReadExt;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let mut request = [0u8; 1024];
                let _ = socket.read(&mut request).await;
                let response = "HTTP/1.1 200 OK\r\n\
                    Content-Type: text/csv\r\n\
                    Content-Disposition: attachment; filename=\"final.csv\"\r\n\
                    Content-Length: 1000\r\n\r\n\
                    CPF;SITUACAO\n1;PAGO\n";
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_interrupted_download_leaves_no_file() {
        let origin = truncating_origin().await;
        let client = client(vec![origin.clone()], DEFAULT_SAME_ORIGIN);
        let mut session = BackendSession::new();
        session.record_success(&origin);
        let dir = tempfile::tempdir().unwrap();

        let result = client.download(&session, "/files/out.csv", dir.path()).await;

        assert!(result.is_err());
        assert!(!dir.path().join("final.csv").exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_redirect_loop_is_not_a_connection_failure() {
        let router = Router::new().route(
            "/api/processing-status/loop",
            get(|| async { axum::response::Redirect::temporary("/api/processing-status/loop") }),
        );
        let origin = spawn(router).await;
        let client = client(vec![origin.clone()], DEFAULT_SAME_ORIGIN);
        let mut session = BackendSession::new();
        session.record_success(&origin);

        let err = client.processing_status(&session, "loop").await.unwrap_err();

        assert!(matches!(err, ClientError::Http(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_redirect_loop_stops_iteration() {
        let hits = Hits::default();
        let looping = Router::new().route(
            "/api/upload-storm",
            any(|| async { axum::response::Redirect::to("/api/upload-storm") }),
        );
        let looping = spawn(looping).await;
        let second = Router::new()
            .route(
                "/api/upload-storm",
                post(|State(hits): State<Hits>, _body: BodyBytes| async move {
                    hits.hit();
                    Json(json!({"total_proposals": 1, "paid_cancelled": 0, "filename": "storm.csv"}))
                }),
            )
            .with_state(hits.clone());
        let second = spawn(second).await;
        let client = client(vec![looping, second], DEFAULT_SAME_ORIGIN);
        let mut session = BackendSession::new();

        let err = client
            .upload_storm(&mut session, FilePart::new("storm.csv", "PROPOSTA\n1\n"))
            .await
            .unwrap_err();

        assert!(matches!(err, ClientError::Http(_)));
        assert_eq!(hits.count(), 0);
        assert_eq!(session.last_used(), None);
    }

    #[test]
    fn test_content_disposition_filename() {
        assert_eq!(
            content_disposition_filename("attachment; filename=\"relatorio.csv\""),
            Some("relatorio.csv".to_string())
        );
        assert_eq!(
            content_disposition_filename("attachment; filename=../../etc/passwd"),
            Some("passwd".to_string())
        );
        assert_eq!(content_disposition_filename("inline"), None);
    }

    #[test]
    fn test_payload_byte_count() {
        let payload = UploadPayload::new()
            .file(BANKS_FIELD, FilePart::new("a.csv", "12345"))
            .file(BANKS_FIELD, FilePart::new("b.xlsx", vec![0u8; 10]));
        assert_eq!(payload.parts().len(), 2);
        assert_eq!(payload.total_bytes(), 15);
    }
}
