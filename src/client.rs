//! HTTP client for the chat backend.
//!
//! Exactly three operations cross this boundary (plus a health probe);
//! routes, verbs and payload shapes live here so the controllers stay
//! transport-free. Failures carry the service's optional human-readable
//! `detail` string when one can be extracted from the error body.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ── Failure type ──────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum RemoteError {
    /// The service answered with a non-success status.
    #[error("service rejected the request: {}", .detail.as_deref().unwrap_or("no detail"))]
    Rejected { detail: Option<String> },
    /// The request never completed (connect, DNS, timeout, body decode).
    #[error("transport failure: {0}")]
    Transport(#[from] reqwest::Error),
}

impl RemoteError {
    /// Human-readable description for surfacing next to a failed turn or
    /// rejected file.
    pub fn detail(&self) -> String {
        match self {
            RemoteError::Rejected { detail } => detail
                .clone()
                .unwrap_or_else(|| "request rejected".to_string()),
            RemoteError::Transport(e) => e.to_string(),
        }
    }
}

// ── Wire types ────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    message: &'a str,
    use_context: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    response: String,
}

#[derive(Debug, Deserialize)]
struct HealthResponse {
    status: String,
}

/// Error body shape: `{"detail": "..."}`.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    detail: Option<String>,
}

/// One file of an upload batch: display name plus raw bytes.
#[derive(Debug, Clone)]
pub struct FilePayload {
    pub name: String,
    pub bytes: Vec<u8>,
}

// ── Service seam ──────────────────────────────────────────────────────────────

/// The remote boundary the orchestrator depends on. Implemented by the HTTP
/// client below and by scripted stubs in tests.
#[async_trait]
pub trait RemoteService: Send + Sync {
    /// send-chat-message(text, useContext) → response text.
    async fn send_chat_message(&self, text: &str, use_context: bool)
        -> Result<String, RemoteError>;
    /// upload-files(files[]) — batched, all-or-nothing from the caller's
    /// perspective regardless of what the service does per file.
    async fn upload_files(&self, files: Vec<FilePayload>) -> Result<(), RemoteError>;
    /// clear-files() — purges server-side file/context state.
    async fn clear_files(&self) -> Result<(), RemoteError>;
}

// ── Client ────────────────────────────────────────────────────────────────────

pub struct Client {
    http: reqwest::Client,
    pub endpoint: String,
}

impl Client {
    /// The timeout is a transport property, configured per profile — the
    /// controllers above never enforce one themselves.
    pub fn new(endpoint: String, timeout_secs: u64) -> Result<Self, RemoteError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self { http, endpoint })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint.trim_end_matches('/'), path)
    }

    /// Probe `/api/health`. Returns the reported status string.
    pub async fn health_check(&self) -> Result<String, RemoteError> {
        let resp = self.http.get(self.url("/api/health")).send().await?;
        let resp = check(resp).await?;
        let health: HealthResponse = resp.json().await?;
        Ok(health.status)
    }
}

#[async_trait]
impl RemoteService for Client {
    async fn send_chat_message(
        &self,
        text: &str,
        use_context: bool,
    ) -> Result<String, RemoteError> {
        let body = ChatRequest {
            message: text,
            use_context,
        };
        let resp = self
            .http
            .post(self.url("/api/chat"))
            .json(&body)
            .send()
            .await?;
        let resp = check(resp).await?;
        let chat: ChatResponse = resp.json().await?;
        Ok(chat.response)
    }

    async fn upload_files(&self, files: Vec<FilePayload>) -> Result<(), RemoteError> {
        let mut form = reqwest::multipart::Form::new();
        for file in files {
            let part = reqwest::multipart::Part::bytes(file.bytes).file_name(file.name);
            form = form.part("files", part);
        }
        let resp = self
            .http
            .post(self.url("/api/upload-files"))
            .multipart(form)
            .send()
            .await?;
        check(resp).await?;
        Ok(())
    }

    async fn clear_files(&self) -> Result<(), RemoteError> {
        let resp = self
            .http
            .delete(self.url("/api/clear-files"))
            .send()
            .await?;
        check(resp).await?;
        Ok(())
    }
}

// ── Response handling ─────────────────────────────────────────────────────────

/// Pass a success response through; map anything else to `Rejected` with
/// whatever detail the body offers.
async fn check(resp: reqwest::Response) -> Result<reqwest::Response, RemoteError> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    tracing::debug!(%status, "chat backend returned an error status");
    Err(RemoteError::Rejected {
        detail: extract_detail(&body),
    })
}

/// Pull the `detail` field out of an error body; fall back to the raw body
/// when it isn't the expected JSON shape.
fn extract_detail(body: &str) -> Option<String> {
    if let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) {
        if parsed.detail.is_some() {
            return parsed.detail;
        }
    }
    let trimmed = body.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
