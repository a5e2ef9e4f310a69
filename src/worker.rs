//! HTTP client for the local worker's control and status endpoints.
//!
//! Every call is bounded by a timeout. Callers that treat the worker as
//! best-effort (pollers, shutdown requests) log and drop the error.

use crate::config::WorkerConfig;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

pub const SHUTDOWN_PATH: &str = "/shutdown";
pub const DISK_PATH: &str = "/disk";
pub const RECYCLE_BIN_PATH: &str = "/recyclebin";
pub const QUOTE_PATH: &str = "/dailyquote";
pub const MEDIA_PATH: &str = "/media";
pub const TERMINAL_PATH: &str = "/terminal/run";
pub const RELOAD_COMMANDS_PATH: &str = "/reload-commands";

/// Errors from talking to the worker over HTTP.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("request to {path} failed: {source}")]
    Request {
        path: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{path} returned HTTP {status}")]
    Status { path: String, status: u16 },

    #[error("invalid JSON from {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: reqwest::Error,
    },
}

impl WorkerError {
    /// Whether the failure was a timeout rather than a refusal or bad reply.
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Request { source, .. } => source.is_timeout(),
            _ => false,
        }
    }
}

/// Result of a terminal passthrough call, shaped for the UI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerminalResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TerminalResponse {
    pub fn success(data: Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(error.into()),
        }
    }
}

/// Client for `http://<host>:<port>` of the worker.
#[derive(Debug, Clone)]
pub struct WorkerClient {
    http: reqwest::Client,
    base_url: String,
    shutdown_timeout: Duration,
}

impl WorkerClient {
    /// # Errors
    ///
    /// Returns [`WorkerError::Client`] if the HTTP client cannot be built.
    pub fn new(
        base_url: impl Into<String>,
        request_timeout: Duration,
        shutdown_timeout: Duration,
    ) -> Result<Self, WorkerError> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(WorkerError::Client)?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            shutdown_timeout,
        })
    }

    /// # Errors
    ///
    /// Returns [`WorkerError::Client`] if the HTTP client cannot be built.
    pub fn from_config(config: &WorkerConfig) -> Result<Self, WorkerError> {
        Self::new(
            config.base_url(),
            config.request_timeout(),
            config.shutdown_request_timeout(),
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// `GET path` and decode the JSON body.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError`] on transport failure, non-2xx status or a
    /// body that is not JSON.
    pub async fn get_json(&self, path: &str) -> Result<Value, WorkerError> {
        let request = self.http.get(self.url(path));
        Self::send_json(path, request).await
    }

    /// `POST path` with a JSON body and decode the JSON reply.
    ///
    /// # Errors
    ///
    /// As for [`get_json`](Self::get_json).
    pub async fn post_json(&self, path: &str, body: &Value) -> Result<Value, WorkerError> {
        let request = self.http.post(self.url(path)).json(body);
        Self::send_json(path, request).await
    }

    async fn send_json(path: &str, request: reqwest::RequestBuilder) -> Result<Value, WorkerError> {
        let response = request.send().await.map_err(|source| WorkerError::Request {
            path: path.to_owned(),
            source,
        })?;
        let status = response.status();
        if !status.is_success() {
            return Err(WorkerError::Status {
                path: path.to_owned(),
                status: status.as_u16(),
            });
        }
        response.json().await.map_err(|source| WorkerError::Decode {
            path: path.to_owned(),
            source,
        })
    }

    /// `POST path` with no body, ignoring the reply body.
    async fn post_empty(&self, path: &str, timeout: Option<Duration>) -> Result<(), WorkerError> {
        let mut request = self.http.post(self.url(path));
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }
        let response = request.send().await.map_err(|source| WorkerError::Request {
            path: path.to_owned(),
            source,
        })?;
        let status = response.status();
        if !status.is_success() {
            return Err(WorkerError::Status {
                path: path.to_owned(),
                status: status.as_u16(),
            });
        }
        Ok(())
    }

    /// Ask the worker to exit. Bounded by the shutdown timeout.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError`] if the request fails or is rejected.
    pub async fn shutdown(&self) -> Result<(), WorkerError> {
        self.post_empty(SHUTDOWN_PATH, Some(self.shutdown_timeout))
            .await
    }

    /// Tell the worker to reload its command table.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError`] if the request fails or is rejected.
    pub async fn reload_commands(&self) -> Result<(), WorkerError> {
        self.post_empty(RELOAD_COMMANDS_PATH, None).await
    }

    /// Forward one line of terminal input. Never fails; errors are folded
    /// into the response.
    pub async fn run_terminal(&self, input: &str) -> TerminalResponse {
        match self
            .post_json(TERMINAL_PATH, &serde_json::json!({ "input": input }))
            .await
        {
            Ok(data) => TerminalResponse::success(data),
            Err(e) => {
                tracing::debug!(error = %e, "terminal passthrough failed");
                TerminalResponse::failure(e.to_string())
            }
        }
    }
}
