use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};
use url::Url;
use uuid::Uuid;

use crate::error::CaptureError;

/// One request/response pair as exported by the browser capture extension.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapturedRequest {
    pub url: String,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub status_code: Option<u16>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub response_headers: BTreeMap<String, String>,
    #[serde(default)]
    pub post_data: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
}

/// A captured request accepted by an active session.
#[derive(Debug, Clone)]
pub struct RecordedCapture {
    pub id: Uuid,
    pub session_id: Uuid,
    pub scope_target_id: String,
    pub request: CapturedRequest,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    Completed { ended_at: DateTime<Utc> },
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Active => "active",
            SessionState::Completed { .. } => "completed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub session_id: Uuid,
    pub request_count: u64,
    pub endpoint_count: u64,
    pub ended_at: DateTime<Utc>,
}

/// A manual browsing capture for one scope target.
///
/// The session is an owned value handed to whoever accepts captures; it moves
/// from `Active` to `Completed` exactly once and rejects captures afterwards.
#[derive(Debug, Clone)]
pub struct CaptureSession {
    pub id: Uuid,
    pub scope_target_id: String,
    pub target_url: String,
    pub started_at: DateTime<Utc>,
    state: SessionState,
    request_count: u64,
    endpoints: BTreeSet<(String, String)>,
}

impl CaptureSession {
    pub fn start(scope_target_id: &str, target_url: &str) -> Self {
        let session = Self {
            id: Uuid::new_v4(),
            scope_target_id: scope_target_id.to_string(),
            target_url: target_url.to_string(),
            started_at: Utc::now(),
            state: SessionState::Active,
            request_count: 0,
            endpoints: BTreeSet::new(),
        };
        info!(session = %session.id, target = %target_url, "capture session started");
        session
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }

    pub fn request_count(&self) -> u64 {
        self.request_count
    }

    pub fn endpoint_count(&self) -> u64 {
        self.endpoints.len() as u64
    }

    pub fn record(&mut self, request: CapturedRequest) -> Result<RecordedCapture, CaptureError> {
        if !self.is_active() {
            return Err(CaptureError::SessionClosed(self.id.to_string()));
        }
        let parsed = Url::parse(request.url.trim())
            .map_err(|_| CaptureError::InvalidUrl(request.url.clone()))?;

        let timestamp = request
            .timestamp
            .as_deref()
            .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);

        let endpoint = if request.endpoint.is_empty() {
            parsed.path().to_string()
        } else {
            request.endpoint.clone()
        };
        let method = if request.method.is_empty() {
            "GET".to_string()
        } else {
            request.method.to_uppercase()
        };

        self.request_count += 1;
        self.endpoints.insert((method, endpoint));
        debug!(session = %self.id, url = %request.url, "captured request");

        Ok(RecordedCapture {
            id: Uuid::new_v4(),
            session_id: self.id,
            scope_target_id: self.scope_target_id.clone(),
            request,
            timestamp,
        })
    }

    pub fn stop(&mut self) -> Result<SessionSummary, CaptureError> {
        if !self.is_active() {
            return Err(CaptureError::SessionClosed(self.id.to_string()));
        }
        let ended_at = Utc::now();
        self.state = SessionState::Completed { ended_at };
        info!(
            session = %self.id,
            requests = self.request_count,
            endpoints = self.endpoints.len(),
            "capture session stopped"
        );
        Ok(SessionSummary {
            session_id: self.id,
            request_count: self.request_count,
            endpoint_count: self.endpoint_count(),
            ended_at,
        })
    }
}
