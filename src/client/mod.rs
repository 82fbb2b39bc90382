use crate::auth::AuthConfig;
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, RwLock};
use thiserror::Error;

const DEFAULT_API_BASE: &str = "https://slack.com/api";

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("slack api request failed: {0}")]
    Request(String),
    #[error("slack api error: {code}")]
    Api {
        code: String,
        message: String,
        retryable: bool,
        retry_after_secs: Option<u64>,
    },
}

impl ClientError {
    pub fn code(&self) -> &str {
        match self {
            ClientError::Request(_) => "network_error",
            ClientError::Api { code, .. } => code,
        }
    }

    pub fn retryable(&self) -> bool {
        match self {
            ClientError::Request(_) => true,
            ClientError::Api { retryable, .. } => *retryable,
        }
    }

    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            ClientError::Api {
                retry_after_secs, ..
            } => *retry_after_secs,
            _ => None,
        }
    }

    /// Splices the id the caller was resolving into the error message, so a
    /// `channel_not_found`/`user_not_found`/`thread_not_found` (etc.) reads
    /// as more than a restatement of its own code (§7: "Context is spliced
    /// in so the message identifies the offending id").
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        if let ClientError::Api { message, .. } = &mut self {
            *message = format!("{message} ({})", context.into());
        }
        self
    }
}

fn classify_slack_code(code: &str) -> (bool, Option<String>) {
    match code {
        "rate_limited" => (true, None),
        "internal_error" => (true, None),
        _ => (false, None),
    }
}

#[derive(Debug, Clone, Deserialize)]
struct SlackEnvelope<T> {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(flatten)]
    data: T,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct ResponseMetadata {
    #[serde(default)]
    next_cursor: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ConversationsListData {
    #[serde(default)]
    channels: Vec<RawChannel>,
    #[serde(default)]
    response_metadata: ResponseMetadata,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawChannel {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
struct UsersListData {
    #[serde(default)]
    members: Vec<RawUser>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawUserProfile {
    #[serde(default)]
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawUser {
    pub id: String,
    #[serde(default)]
    pub real_name: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub profile: Option<RawUserProfile>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawMessage {
    #[serde(default)]
    pub ts: String,
    #[serde(default)]
    pub thread_ts: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub reply_count: Option<u64>,
    #[serde(default)]
    pub reactions: Vec<RawReaction>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawReaction {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub count: u64,
}

#[derive(Debug, Clone, Deserialize)]
struct HistoryData {
    #[serde(default)]
    messages: Vec<RawMessage>,
    #[serde(default)]
    response_metadata: ResponseMetadata,
    #[serde(default)]
    has_more: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct SearchMatchesData {
    #[serde(default)]
    messages: SearchMessages,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct SearchMessages {
    #[serde(default)]
    matches: Vec<RawSearchMatch>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawSearchMatch {
    #[serde(default)]
    pub iid: Option<String>,
    #[serde(default)]
    pub ts: String,
    #[serde(default)]
    pub thread_ts: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub channel: Option<RawSearchChannel>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawSearchChannel {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct EmptyData {}

fn api_base() -> String {
    std::env::var("SLACK_API_BASE")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_API_BASE.to_string())
}

/// Thin `ureq`-based wrapper around the Slack Web API methods the tool
/// surface needs. Holds no mutable state; callers build one per
/// `AuthConfig` and let `SlackClientHolder` own rebind semantics.
#[derive(Debug, Clone)]
pub struct SlackApiClient {
    api_base: String,
    auth: AuthConfig,
}

impl SlackApiClient {
    pub fn new(auth: AuthConfig) -> Self {
        Self {
            api_base: api_base(),
            auth,
        }
    }

    fn endpoint(&self, method: &str) -> String {
        format!("{}/{}", self.api_base.trim_end_matches('/'), method)
    }

    fn token(&self) -> &str {
        match &self.auth {
            AuthConfig::Bot { token } => token,
            AuthConfig::User { token, .. } => token,
        }
    }

    fn apply_cookie(&self, request: ureq::Request) -> ureq::Request {
        match &self.auth {
            AuthConfig::User { cookie, .. } => request.set("Cookie", &format!("d={cookie}")),
            AuthConfig::Bot { .. } => request,
        }
    }

    fn get<T: for<'de> Deserialize<'de>>(
        &self,
        method: &str,
        query: &[(&str, String)],
    ) -> Result<T, ClientError> {
        let mut url = self.endpoint(method);
        if !query.is_empty() {
            let encoded = query
                .iter()
                .map(|(k, v)| format!("{k}={}", urlencoding::encode(v)))
                .collect::<Vec<_>>()
                .join("&");
            url = format!("{url}?{encoded}");
        }
        let request = ureq::get(&url).set("Authorization", &format!("Bearer {}", self.token()));
        let response = self
            .apply_cookie(request)
            .call()
            .map_err(response_to_client_error)?;
        response
            .into_json::<T>()
            .map_err(|e| ClientError::Request(e.to_string()))
    }

    fn post<B: Serialize, T: for<'de> Deserialize<'de>>(
        &self,
        method: &str,
        body: &B,
    ) -> Result<T, ClientError> {
        let url = self.endpoint(method);
        let request = ureq::post(&url).set("Authorization", &format!("Bearer {}", self.token()));
        let response = self
            .apply_cookie(request)
            .send_json(serde_json::to_value(body).map_err(|e| ClientError::Request(e.to_string()))?)
            .map_err(response_to_client_error)?;
        response
            .into_json::<T>()
            .map_err(|e| ClientError::Request(e.to_string()))
    }

    fn unwrap_envelope<T>(&self, envelope: SlackEnvelope<T>) -> Result<T, ClientError> {
        if envelope.ok {
            return Ok(envelope.data);
        }
        let code = envelope.error.unwrap_or_else(|| "unknown_error".to_string());
        let (retryable, _) = classify_slack_code(&code);
        Err(ClientError::Api {
            message: code.clone(),
            code,
            retryable,
            retry_after_secs: None,
        })
    }

    pub fn auth_test(&self) -> Result<(), ClientError> {
        let envelope: SlackEnvelope<EmptyData> = self.get("auth.test", &[])?;
        self.unwrap_envelope(envelope)?;
        Ok(())
    }

    pub fn list_channels_page(
        &self,
        cursor: Option<&str>,
    ) -> Result<(Vec<RawChannel>, Option<String>), ClientError> {
        let mut query = vec![
            ("exclude_archived", "false".to_string()),
            ("limit", "1000".to_string()),
        ];
        if let Some(cursor) = cursor {
            query.push(("cursor", cursor.to_string()));
        }
        let envelope: SlackEnvelope<ConversationsListData> =
            self.get("conversations.list", &query)?;
        let data = self.unwrap_envelope(envelope)?;
        let next = if data.response_metadata.next_cursor.trim().is_empty() {
            None
        } else {
            Some(data.response_metadata.next_cursor)
        };
        Ok((data.channels, next))
    }

    pub fn list_users_page(&self) -> Result<Vec<RawUser>, ClientError> {
        let envelope: SlackEnvelope<UsersListData> = self.get("users.list", &[])?;
        Ok(self.unwrap_envelope(envelope)?.members)
    }

    pub fn conversation_history(
        &self,
        channel_id: &str,
        cursor: Option<&str>,
        limit: u32,
    ) -> Result<(Vec<RawMessage>, Option<String>), ClientError> {
        let mut query = vec![
            ("channel", channel_id.to_string()),
            ("limit", limit.to_string()),
        ];
        if let Some(cursor) = cursor {
            query.push(("cursor", cursor.to_string()));
        }
        let envelope: SlackEnvelope<HistoryData> = self.get("conversations.history", &query)?;
        let data = self.unwrap_envelope(envelope)?;
        let next = if !data.has_more || data.response_metadata.next_cursor.trim().is_empty() {
            None
        } else {
            Some(data.response_metadata.next_cursor)
        };
        Ok((data.messages, next))
    }

    pub fn conversation_replies(
        &self,
        channel_id: &str,
        thread_ts: &str,
        limit: u32,
    ) -> Result<Vec<RawMessage>, ClientError> {
        let query = vec![
            ("channel", channel_id.to_string()),
            ("ts", thread_ts.to_string()),
            ("limit", limit.to_string()),
        ];
        let envelope: SlackEnvelope<HistoryData> = self.get("conversations.replies", &query)?;
        Ok(self.unwrap_envelope(envelope)?.messages)
    }

    pub fn search_messages(
        &self,
        query_text: &str,
        count: u32,
    ) -> Result<Vec<RawSearchMatch>, ClientError> {
        let query = vec![
            ("query", query_text.to_string()),
            ("count", count.to_string()),
        ];
        let envelope: SlackEnvelope<SearchMatchesData> = self.get("search.messages", &query)?;
        Ok(self.unwrap_envelope(envelope)?.messages.matches)
    }
}

fn response_to_client_error(err: ureq::Error) -> ClientError {
    match err {
        ureq::Error::Status(429, response) => {
            let retry_after = response
                .header("Retry-After")
                .and_then(|v| v.parse::<u64>().ok());
            ClientError::Api {
                code: "rate_limited".to_string(),
                message: "rate limited".to_string(),
                retryable: true,
                retry_after_secs: retry_after,
            }
        }
        ureq::Error::Status(code, _) => ClientError::Request(format!("http status {code}")),
        ureq::Error::Transport(t) => ClientError::Request(t.to_string()),
    }
}

/// Process-wide current HTTP client bound to the active `AuthConfig`.
/// `get()` lazily constructs it; `update_credentials` atomically rebinds.
pub struct SlackClientHolder {
    current: RwLock<Option<SlackApiClient>>,
    auth: Mutex<AuthConfig>,
}

impl SlackClientHolder {
    pub fn new(auth: AuthConfig) -> Self {
        Self {
            current: RwLock::new(None),
            auth: Mutex::new(auth),
        }
    }

    pub fn get(&self) -> SlackApiClient {
        if let Some(client) = self.current.read().unwrap_or_else(|e| e.into_inner()).as_ref() {
            return client.clone();
        }
        let auth = self.auth.lock().unwrap_or_else(|e| e.into_inner()).clone();
        let client = SlackApiClient::new(auth);
        *self.current.write().unwrap_or_else(|e| e.into_inner()) = Some(client.clone());
        client
    }

    /// Atomically replaces the client and the cached user-mode auth config.
    pub fn update_credentials(&self, token: String, cookie: String) {
        let new_auth = AuthConfig::User { token, cookie };
        *self.auth.lock().unwrap_or_else(|e| e.into_inner()) = new_auth.clone();
        *self.current.write().unwrap_or_else(|e| e.into_inner()) =
            Some(SlackApiClient::new(new_auth));
    }

    /// Drops the client and forces a lazy reconstruction next `get()`. Test-only.
    pub fn reset(&self) {
        *self.current.write().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn holder_lazily_builds_and_caches_client() {
        let holder = SlackClientHolder::new(AuthConfig::Bot {
            token: "xoxb-1".to_string(),
        });
        let first = holder.get();
        let second = holder.get();
        assert_eq!(first.token(), second.token());
    }

    #[test]
    fn update_credentials_rebinds_to_new_user_auth() {
        let holder = SlackClientHolder::new(AuthConfig::Bot {
            token: "xoxb-1".to_string(),
        });
        holder.update_credentials("xoxc-new".to_string(), "xoxd-new".to_string());
        let client = holder.get();
        assert_eq!(client.token(), "xoxc-new");
    }

    #[test]
    fn classify_slack_code_marks_rate_limited_retryable() {
        let (retryable, _) = classify_slack_code("rate_limited");
        assert!(retryable);
        let (retryable, _) = classify_slack_code("invalid_auth");
        assert!(!retryable);
    }
}
