//! REST client for the generation backend.
//!
//! [`GenerationApi`] is the seam the orchestrator talks through;
//! [`HttpGenerationApi`] implements it over HTTP with [`reqwest`].

use std::time::Duration;

use async_trait::async_trait;
use mediagen_core::history::HistoryEntry;
use mediagen_core::request::{FilePart, GenerateBody, MultipartBody};
use mediagen_core::types::TaskId;
use mediagen_core::workflow::Workflow;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;

use crate::config::ClientConfig;

/// Backend operations used by the generation pipeline.
#[async_trait]
pub trait GenerationApi: Send + Sync {
    /// `GET /workflows`
    async fn list_workflows(&self) -> Result<Vec<Workflow>, ApiError>;

    /// `POST /generate` with a JSON or multipart body.
    async fn submit_generate(&self, body: GenerateBody) -> Result<TaskId, ApiError>;

    /// `POST /regenerate` for a subset of fields of an existing record.
    async fn submit_regenerate(&self, uid: &str, fields: &[String]) -> Result<TaskId, ApiError>;

    /// `POST /upload` for standalone media ingestion.
    async fn upload_media(&self, file: FilePart) -> Result<TaskId, ApiError>;

    /// `GET /media-data/{uid}`
    async fn fetch_media(&self, uid: &str) -> Result<HistoryEntry, ApiError>;

    /// Download raw bytes of a remote media reference.
    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, ApiError>;
}

/// Response of every task-creating endpoint.
#[derive(Debug, Deserialize)]
pub struct SubmitResponse {
    #[serde(default, rename = "taskId", alias = "task_id")]
    pub task_id: Option<String>,
}

impl SubmitResponse {
    /// The task id, or [`ApiError::MissingTaskId`] when absent or blank.
    pub fn into_task_id(self) -> Result<TaskId, ApiError> {
        self.task_id
            .filter(|id| !id.trim().is_empty())
            .ok_or(ApiError::MissingTaskId)
    }
}

/// Errors from the REST API layer.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The HTTP request itself failed (network, DNS, TLS, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The backend returned a non-2xx status code.
    #[error("API error ({status}): {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// A submission succeeded but carried no task id.
    #[error("Submission response did not contain a task id")]
    MissingTaskId,
}

/// Status families used to pick a user-facing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusFamily {
    BadRequest,
    Timeout,
    RateLimited,
    Server,
    Other,
}

pub fn classify_status(status: u16) -> StatusFamily {
    match status {
        400 => StatusFamily::BadRequest,
        408 | 504 => StatusFamily::Timeout,
        429 => StatusFamily::RateLimited,
        500..=599 => StatusFamily::Server,
        _ => StatusFamily::Other,
    }
}

impl ApiError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            ApiError::Request(e) => e.status().map(|s| s.as_u16()),
            ApiError::MissingTaskId => None,
        }
    }

    /// Message suitable for showing to the user.
    pub fn user_message(&self) -> String {
        match self {
            ApiError::Request(e) if e.is_timeout() => timeout_message().to_string(),
            ApiError::Request(e) if e.is_connect() => {
                "Could not reach the generation server. Check your connection.".to_string()
            }
            ApiError::Request(e) => match e.status() {
                Some(status) => status_message(status.as_u16()),
                None => "The request could not be completed.".to_string(),
            },
            ApiError::Status { status, .. } => status_message(*status),
            ApiError::MissingTaskId => {
                "The server accepted the request but did not return a task id.".to_string()
            }
        }
    }
}

fn timeout_message() -> &'static str {
    "The server took too long to respond. Please try again."
}

fn status_message(status: u16) -> String {
    match classify_status(status) {
        StatusFamily::BadRequest => {
            "The server rejected the request. Check your inputs and try again.".to_string()
        }
        StatusFamily::Timeout => timeout_message().to_string(),
        StatusFamily::RateLimited => {
            "Too many requests. Please wait a moment and try again.".to_string()
        }
        StatusFamily::Server => "The server hit an error. Please try again later.".to_string(),
        StatusFamily::Other => format!("Request failed with status {status}."),
    }
}

/// HTTP client for a single backend.
pub struct HttpGenerationApi {
    client: reqwest::Client,
    api_url: String,
    request_timeout: Duration,
}

impl HttpGenerationApi {
    /// Build a client from configuration.
    pub fn new(config: &ClientConfig) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .build()?;
        Ok(Self::with_client(
            client,
            config.api_url.clone(),
            config.request_timeout(),
        ))
    }

    /// Create an API client reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, api_url: String, request_timeout: Duration) -> Self {
        Self {
            client,
            api_url,
            request_timeout,
        }
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.api_url, path.trim_start_matches('/'))
    }

    /// Absolute URLs pass through; relative ones resolve against the API.
    fn resolve_url(&self, url: &str) -> String {
        if url.starts_with("http://") || url.starts_with("https://") {
            url.to_string()
        } else {
            self.endpoint(url)
        }
    }

    async fn submit(&self, request: reqwest::RequestBuilder) -> Result<TaskId, ApiError> {
        let response = request.timeout(self.request_timeout).send().await?;
        let submitted: SubmitResponse = Self::parse_response(response).await?;
        submitted.into_task_id()
    }

    // ---- private helpers ----

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or an [`ApiError::Status`]
    /// containing the status and body text on failure.
    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ApiError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ApiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl GenerationApi for HttpGenerationApi {
    async fn list_workflows(&self) -> Result<Vec<Workflow>, ApiError> {
        let response = self
            .client
            .get(self.endpoint("workflows"))
            .timeout(self.request_timeout)
            .send()
            .await?;
        Self::parse_response(response).await
    }

    async fn submit_generate(&self, body: GenerateBody) -> Result<TaskId, ApiError> {
        let request = self.client.post(self.endpoint("generate"));
        let request = match body {
            GenerateBody::Json(value) => request.json(&value),
            GenerateBody::Multipart(multipart) => request.multipart(to_form(multipart)?),
        };
        let task_id = self.submit(request).await?;
        tracing::info!(task_id = %task_id, "Generation submitted");
        Ok(task_id)
    }

    async fn submit_regenerate(&self, uid: &str, fields: &[String]) -> Result<TaskId, ApiError> {
        let body = serde_json::json!({
            "uid": uid,
            "fields": fields,
        });
        let task_id = self
            .submit(self.client.post(self.endpoint("regenerate")).json(&body))
            .await?;
        tracing::info!(task_id = %task_id, uid, "Regeneration submitted");
        Ok(task_id)
    }

    async fn upload_media(&self, file: FilePart) -> Result<TaskId, ApiError> {
        let form = to_form(MultipartBody {
            text: Vec::new(),
            files: vec![file],
        })?;
        let task_id = self
            .submit(self.client.post(self.endpoint("upload")).multipart(form))
            .await?;
        tracing::info!(task_id = %task_id, "Upload submitted");
        Ok(task_id)
    }

    async fn fetch_media(&self, uid: &str) -> Result<HistoryEntry, ApiError> {
        let response = self
            .client
            .get(self.endpoint(&format!("media-data/{uid}")))
            .timeout(self.request_timeout)
            .send()
            .await?;
        Self::parse_response(response).await
    }

    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, ApiError> {
        let response = self
            .client
            .get(self.resolve_url(url))
            .timeout(self.request_timeout)
            .send()
            .await?;
        let response = Self::ensure_success(response).await?;
        Ok(response.bytes().await?.to_vec())
    }
}

/// Convert a transport-neutral multipart body into a reqwest form.
fn to_form(body: MultipartBody) -> Result<Form, ApiError> {
    let mut form = Form::new();
    for (name, value) in body.text {
        form = form.text(name, value);
    }
    for file in body.files {
        let mut part = Part::bytes(file.bytes).file_name(file.file_name);
        if let Some(mime) = file.mime {
            part = part.mime_str(mime)?;
        }
        form = form.part(file.name, part);
    }
    Ok(form)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn submit_response_accepts_both_spellings() {
        let camel: SubmitResponse = serde_json::from_str(r#"{"taskId":"t-1"}"#).unwrap();
        assert_eq!(camel.into_task_id().unwrap(), "t-1");
        let snake: SubmitResponse = serde_json::from_str(r#"{"task_id":"t-2"}"#).unwrap();
        assert_eq!(snake.into_task_id().unwrap(), "t-2");
    }

    #[test]
    fn missing_or_blank_task_id_is_an_error() {
        let missing: SubmitResponse = serde_json::from_str(r#"{"status":"queued"}"#).unwrap();
        assert_matches!(missing.into_task_id(), Err(ApiError::MissingTaskId));
        let blank: SubmitResponse = serde_json::from_str(r#"{"taskId":"  "}"#).unwrap();
        assert_matches!(blank.into_task_id(), Err(ApiError::MissingTaskId));
    }

    #[test]
    fn status_families() {
        assert_eq!(classify_status(400), StatusFamily::BadRequest);
        assert_eq!(classify_status(408), StatusFamily::Timeout);
        assert_eq!(classify_status(504), StatusFamily::Timeout);
        assert_eq!(classify_status(429), StatusFamily::RateLimited);
        assert_eq!(classify_status(500), StatusFamily::Server);
        assert_eq!(classify_status(503), StatusFamily::Server);
        assert_eq!(classify_status(404), StatusFamily::Other);
    }

    #[test]
    fn user_messages_follow_status_family() {
        let err = |status| ApiError::Status {
            status,
            body: String::new(),
        };
        assert!(err(400).user_message().contains("rejected"));
        assert!(err(504).user_message().contains("too long"));
        assert!(err(429).user_message().contains("Too many requests"));
        assert!(err(502).user_message().contains("server hit an error"));
        assert_eq!(err(418).user_message(), "Request failed with status 418.");
    }

    #[test]
    fn relative_urls_resolve_against_api() {
        let api = HttpGenerationApi::with_client(
            reqwest::Client::new(),
            "http://host:8000/api".into(),
            Duration::from_secs(1),
        );
        assert_eq!(
            api.resolve_url("/files/a.png"),
            "http://host:8000/api/files/a.png"
        );
        assert_eq!(api.resolve_url("https://cdn/a.png"), "https://cdn/a.png");
        assert_eq!(api.endpoint("workflows"), "http://host:8000/api/workflows");
    }

    #[test]
    fn multipart_conversion_accepts_known_mime() {
        let body = MultipartBody {
            text: vec![("prompt".into(), "p".into())],
            files: vec![FilePart::new("image_0", "a.png", vec![1, 2])],
        };
        assert!(to_form(body).is_ok());
    }
}
