//! HTTP client for a PostgREST-style hosted table
//!
//! Requests go to `{remote_url}/rest/v1/{table}` with the project `apikey`
//! header and the caller's session token as bearer auth. Uniqueness
//! violations surface as HTTP 409 and/or Postgres code `23505`.

use super::row::{ProgressPatch, ProgressRow};
use super::RemoteProgressStore;
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::model::ProgressRecord;
use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use std::sync::RwLock;

const UNIQUE_VIOLATION: &str = "23505";

/// Error body returned by the backend on failure
#[derive(Debug, Default, Deserialize)]
struct BackendError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    details: Option<String>,
}

pub struct PostgrestProgressStore {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    access_token: RwLock<Option<String>>,
}

impl PostgrestProgressStore {
    /// # Errors
    ///
    /// Fails if the HTTP client cannot be constructed.
    pub fn new(config: &SyncConfig) -> SyncResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.remote_timeout)
            .build()
            .map_err(|e| SyncError::Configuration(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: format!(
                "{}/rest/v1/{}",
                config.remote_url.trim_end_matches('/'),
                config.table
            ),
            api_key: config.api_key.clone(),
            access_token: RwLock::new(None),
        })
    }

    /// Replace the session token after sign-in, refresh or sign-out.
    pub fn set_access_token(&self, token: Option<String>) {
        if let Ok(mut guard) = self.access_token.write() {
            *guard = token;
        }
    }

    pub fn access_token(&self) -> Option<String> {
        self.access_token.read().ok().and_then(|guard| guard.clone())
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn request(&self, method: Method) -> RequestBuilder {
        // Anonymous calls authenticate with the project key itself
        let bearer = self.access_token().unwrap_or_else(|| self.api_key.clone());

        self.client
            .request(method, &self.endpoint)
            .header("apikey", &self.api_key)
            .bearer_auth(bearer)
    }

    async fn send(&self, request: RequestBuilder) -> SyncResult<Response> {
        let response = request.send().await?;
        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(classify_failure(status, &body))
    }

    async fn first_row(response: Response, user_id: &str) -> SyncResult<ProgressRecord> {
        let rows: Vec<ProgressRow> = response.json().await?;
        match rows.into_iter().next() {
            Some(row) => ProgressRecord::try_from(row),
            None => Err(SyncError::NotFound(format!("user_progress/{}", user_id))),
        }
    }
}

/// Map a non-success response onto the error taxonomy.
fn classify_failure(status: StatusCode, body: &str) -> SyncError {
    let parsed: BackendError = serde_json::from_str(body).unwrap_or_default();
    let message = parsed
        .message
        .or(parsed.details)
        .unwrap_or_else(|| body.trim().to_string());

    if status == StatusCode::CONFLICT || parsed.code.as_deref() == Some(UNIQUE_VIOLATION) {
        return SyncError::DuplicateKey(message);
    }
    if status == StatusCode::REQUEST_TIMEOUT || status == StatusCode::GATEWAY_TIMEOUT {
        return SyncError::Transport(format!("{}: {}", status, message));
    }
    SyncError::Remote {
        status: status.as_u16(),
        message,
    }
}

#[async_trait]
impl RemoteProgressStore for PostgrestProgressStore {
    async fn read_row(&self, user_id: &str) -> SyncResult<ProgressRecord> {
        let filter = format!("eq.{}", user_id);
        let request = self
            .request(Method::GET)
            .query(&[("user_id", filter.as_str()), ("select", "*")]);

        let response = self.send(request).await?;
        let record = Self::first_row(response, user_id).await?;
        tracing::debug!(user_id = user_id, "Read remote progress row");
        Ok(record)
    }

    async fn insert_row(&self, record: &ProgressRecord) -> SyncResult<ProgressRecord> {
        let request = self
            .request(Method::POST)
            .header("Prefer", "return=representation")
            .json(&ProgressRow::from(record));

        let response = self.send(request).await?;
        Self::first_row(response, &record.user_id).await
    }

    async fn upsert_row(&self, patch: &ProgressPatch) -> SyncResult<ProgressRecord> {
        let request = self
            .request(Method::POST)
            .query(&[("on_conflict", "user_id")])
            .header("Prefer", "resolution=merge-duplicates,return=representation")
            .json(patch);

        let response = self.send(request).await?;
        Self::first_row(response, &patch.user_id).await
    }

    async fn update_row(&self, user_id: &str, patch: &ProgressPatch) -> SyncResult<()> {
        let filter = format!("eq.{}", user_id);
        let request = self
            .request(Method::PATCH)
            .query(&[("user_id", filter.as_str())])
            .header("Prefer", "return=representation")
            .json(patch);

        let response = self.send(request).await?;
        // PATCH on a missing row succeeds with an empty representation
        Self::first_row(response, user_id).await.map(|_| ())
    }
}
