use crate::error::NegotiationError;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

/// Handshake endpoint, relative to the backend base URL.
const LIVE_SESSION_PATH: &str = "/api/calls/sessions/live";

/// Request body for the live-session handshake.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LiveSessionRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub caller_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub caller_number: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

/// A negotiated live session.
///
/// The backend may return additional fields; only the ones the voice channel
/// needs are kept.
#[derive(Debug, Clone, Deserialize)]
pub struct LiveSession {
    pub session_id: String,
    pub session_token: String,
    pub websocket_path: String,
}

/// HTTP client for the session negotiation handshake.
pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
    auth_token: Option<String>,
}

impl ApiClient {
    pub fn new(base_url: &str, auth_token: Option<String>) -> Result<Self, NegotiationError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| NegotiationError::Address(format!("invalid base url {base_url}: {e}")))?;
        let http = reqwest::Client::builder().build()?;

        Ok(Self {
            http,
            base_url,
            auth_token,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Negotiate a live session. One request, no retries; any failure is
    /// surfaced to the caller immediately.
    pub async fn create_live_session(
        &self,
        request: &LiveSessionRequest,
    ) -> Result<LiveSession, NegotiationError> {
        let url = self
            .base_url
            .join(LIVE_SESSION_PATH)
            .map_err(|e| NegotiationError::Address(e.to_string()))?;

        debug!("negotiating live session at {}", url);

        let mut req = self.http.post(url).json(request);
        if let Some(token) = &self.auth_token {
            req = req.bearer_auth(token);
        }

        let response = req.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(NegotiationError::Rejected {
                status: status.as_u16(),
                message: error_detail(&body, status.as_u16()),
            });
        }

        serde_json::from_str(&body).map_err(NegotiationError::MalformedBody)
    }

    /// Derive the voice channel address for a negotiated session: resolve
    /// `websocket_path` against the base URL, swap the scheme to ws/wss, and
    /// attach the session token as a query parameter.
    pub fn channel_url(&self, session: &LiveSession) -> Result<Url, NegotiationError> {
        let mut url = self.base_url.join(&session.websocket_path).map_err(|e| {
            NegotiationError::Address(format!(
                "invalid websocket path {}: {e}",
                session.websocket_path
            ))
        })?;

        let scheme = match url.scheme() {
            "https" | "wss" => "wss",
            _ => "ws",
        };
        if url.set_scheme(scheme).is_err() {
            return Err(NegotiationError::Address(format!(
                "cannot derive a websocket scheme from {}",
                self.base_url
            )));
        }

        url.query_pairs_mut()
            .append_pair("token", &session.session_token);

        Ok(url)
    }
}

/// Pull a human-readable message out of a failed handshake body.
///
/// The backend reports errors as `{"detail": "..."}` or, for validation
/// failures, `{"detail": [{"msg": "..."}]}`.
fn error_detail(body: &str, status: u16) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        match value.get("detail") {
            Some(serde_json::Value::String(detail)) => return detail.clone(),
            Some(serde_json::Value::Array(items)) => {
                if let Some(msg) = items
                    .iter()
                    .find_map(|item| item.get("msg").and_then(|m| m.as_str()))
                {
                    return msg.to_string();
                }
            }
            _ => {}
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        format!("request failed with status {status}")
    } else {
        trimmed.to_string()
    }
}
