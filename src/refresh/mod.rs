pub mod scheduler;

use crate::client::SlackClientHolder;
use crate::config::RefreshConfig;
use crate::credentials::{CredentialSource, CredentialStore, CredentialsError, StoredCredentials};
use crate::errorlog::{ErrorLog, ErrorLogEntry, LogLevel};
use crate::shared::redact::redact;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use thiserror::Error;

const MAX_ATTEMPTS: u32 = 3;
const BASE_DELAY_MS: u64 = 1_000;
const MULTIPLIER: u64 = 2;
const MAX_DELAY_MS: u64 = 30_000;

const STATUS_IDLE: u8 = 0;
const STATUS_IN_PROGRESS: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshErrorCode {
    NetworkError,
    RateLimited,
    StorageError,
    RefreshInProgress,
    SessionRevoked,
    InvalidResponse,
    RefreshNotAvailable,
    Unknown,
}

impl RefreshErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefreshErrorCode::NetworkError => "NETWORK_ERROR",
            RefreshErrorCode::RateLimited => "RATE_LIMITED",
            RefreshErrorCode::StorageError => "STORAGE_ERROR",
            RefreshErrorCode::RefreshInProgress => "REFRESH_IN_PROGRESS",
            RefreshErrorCode::SessionRevoked => "SESSION_REVOKED",
            RefreshErrorCode::InvalidResponse => "INVALID_RESPONSE",
            RefreshErrorCode::RefreshNotAvailable => "REFRESH_NOT_AVAILABLE",
            RefreshErrorCode::Unknown => "UNKNOWN",
        }
    }

    pub fn retryable(&self) -> bool {
        matches!(
            self,
            RefreshErrorCode::NetworkError
                | RefreshErrorCode::RateLimited
                | RefreshErrorCode::StorageError
                | RefreshErrorCode::RefreshInProgress
        )
    }
}

#[derive(Debug, Error, Clone)]
#[error("{code:?}: {message}")]
pub struct RefreshError {
    pub code: RefreshErrorCode,
    pub message: String,
}

impl RefreshError {
    fn new(code: RefreshErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn retryable(&self) -> bool {
        self.code.retryable()
    }
}

impl From<CredentialsError> for RefreshError {
    fn from(err: CredentialsError) -> Self {
        RefreshError::new(RefreshErrorCode::StorageError, err.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct LastError {
    pub code: RefreshErrorCode,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub attempt: u32,
    pub retryable: bool,
}

#[derive(Debug, Clone, Default)]
pub struct RefreshStateSnapshot {
    pub in_progress: bool,
    pub last_attempt: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<LastError>,
    pub consecutive_failures: u32,
    pub is_manual_trigger: bool,
}

struct RefreshStateInner {
    last_attempt: Option<DateTime<Utc>>,
    last_success: Option<DateTime<Utc>>,
    last_error: Option<LastError>,
    consecutive_failures: u32,
    is_manual_trigger: bool,
}

impl Default for RefreshStateInner {
    fn default() -> Self {
        Self {
            last_attempt: None,
            last_success: None,
            last_error: None,
            consecutive_failures: 0,
            is_manual_trigger: false,
        }
    }
}

pub struct RefreshResult {
    pub refreshed_at: DateTime<Utc>,
    pub total_refreshes: u64,
}

/// Coordinates the user-mode session refresh: at most one refresh runs at a
/// time (enforced by a CAS on `status`), successes persist new credentials
/// and rebind the client, terminal failures leave both untouched.
pub struct RefreshManager {
    status: AtomicU8,
    state: Mutex<RefreshStateInner>,
    store: CredentialStore,
    client_holder: Arc<SlackClientHolder>,
    error_log: Arc<ErrorLog>,
    config: RefreshConfig,
}

impl RefreshManager {
    pub fn new(
        store: CredentialStore,
        client_holder: Arc<SlackClientHolder>,
        error_log: Arc<ErrorLog>,
        config: RefreshConfig,
    ) -> Self {
        Self {
            status: AtomicU8::new(STATUS_IDLE),
            state: Mutex::new(RefreshStateInner::default()),
            store,
            client_holder,
            error_log,
            config,
        }
    }

    pub fn snapshot(&self) -> RefreshStateSnapshot {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        RefreshStateSnapshot {
            in_progress: self.status.load(Ordering::SeqCst) == STATUS_IN_PROGRESS,
            last_attempt: state.last_attempt,
            last_success: state.last_success,
            last_error: state.last_error.clone(),
            consecutive_failures: state.consecutive_failures,
            is_manual_trigger: state.is_manual_trigger,
        }
    }

    pub fn is_refresh_due(&self) -> bool {
        let Ok(creds) = self.store.load() else {
            return false;
        };
        let Ok(last_refreshed) = DateTime::parse_from_rfc3339(&creds.metadata.last_refreshed)
        else {
            return false;
        };
        let due_at = last_refreshed.with_timezone(&Utc)
            + chrono::Duration::hours(i64::from(self.config.interval_days) * 24);
        due_at <= Utc::now()
    }

    /// Single refresh attempt. Rejects immediately with `REFRESH_IN_PROGRESS`
    /// if another refresh is already running. `attempt` is recorded verbatim
    /// into `LastError` on failure; callers outside `refresh_with_retry`
    /// should pass `1`.
    pub fn refresh(&self, is_manual: bool) -> Result<RefreshResult, RefreshError> {
        self.refresh_attempt(is_manual, 1)
    }

    fn refresh_attempt(&self, is_manual: bool, attempt: u32) -> Result<RefreshResult, RefreshError> {
        if self
            .status
            .compare_exchange(
                STATUS_IDLE,
                STATUS_IN_PROGRESS,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            return Err(RefreshError::new(
                RefreshErrorCode::RefreshInProgress,
                "a refresh is already in progress",
            ));
        }

        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state.last_attempt = Some(Utc::now());
            state.is_manual_trigger = is_manual;
        }

        let outcome = self.attempt(is_manual);

        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        match &outcome {
            Ok(_) => {
                state.last_success = Some(Utc::now());
                state.last_error = None;
                state.consecutive_failures = 0;
            }
            Err(err) => {
                state.last_error = Some(LastError {
                    code: err.code,
                    message: err.message.clone(),
                    timestamp: Utc::now(),
                    attempt,
                    retryable: err.retryable(),
                });
                state.consecutive_failures += 1;
            }
        }
        state.is_manual_trigger = false;
        drop(state);
        self.status.store(STATUS_IDLE, Ordering::SeqCst);
        outcome
    }

    fn attempt(&self, is_manual: bool) -> Result<RefreshResult, RefreshError> {
        let current = self.store.load()?;
        let workspace = current.credentials.workspace.clone();

        let scrape = scrape_workspace_home(&workspace, &current.credentials.cookie)?;

        let new_cookie = scrape
            .cookie
            .unwrap_or_else(|| current.credentials.cookie.clone());
        let new_token = scrape.token;

        validate_session(&new_token, &new_cookie)?;

        let refresh_count = current.metadata.refresh_count + 1;
        let source = if is_manual {
            CredentialSource::ManualRefresh
        } else {
            CredentialSource::AutoRefresh
        };
        let mut record = StoredCredentials::new(new_token, new_cookie, workspace, source)?;
        record.metadata.refresh_count = refresh_count;
        self.store.save(&record)?;

        self.client_holder.update_credentials(
            record.credentials.token.clone(),
            record.credentials.cookie.clone(),
        );

        Ok(RefreshResult {
            refreshed_at: Utc::now(),
            total_refreshes: refresh_count,
        })
    }

    /// Retries `refresh` with exponential backoff and jitter on retryable
    /// failures; short-circuits on the first non-retryable (terminal) error.
    pub fn refresh_with_retry(&self, is_manual: bool) -> Result<RefreshResult, RefreshError> {
        let mut last_err = None;
        for attempt in 1..=MAX_ATTEMPTS {
            match self.refresh_attempt(is_manual, attempt) {
                Ok(result) => return Ok(result),
                Err(err) => {
                    let retryable = err.retryable();
                    self.log_error(&err, attempt, is_manual);
                    last_err = Some(err);
                    if !retryable || attempt == MAX_ATTEMPTS {
                        break;
                    }
                    thread::sleep(backoff_delay(attempt));
                }
            }
        }
        Err(last_err.unwrap_or_else(|| {
            RefreshError::new(RefreshErrorCode::Unknown, "refresh failed with no error recorded")
        }))
    }

    fn log_error(&self, err: &RefreshError, attempt: u32, _is_manual: bool) {
        let mut context = BTreeMap::new();
        if err.code == RefreshErrorCode::SessionRevoked {
            context.insert(
                "guidance".to_string(),
                "session cookie was rejected; re-authenticate to obtain a fresh xoxc-/xoxd- pair"
                    .to_string(),
            );
        }
        // Identify which stored session this attempt was refreshing without
        // ever writing the live token/cookie to the log.
        if let Ok(current) = self.store.load() {
            context.insert(
                "stale_credentials".to_string(),
                describe_masked(&current.credentials.token, &current.credentials.cookie),
            );
        }
        self.error_log.log(&ErrorLogEntry {
            ts: Utc::now().to_rfc3339(),
            level: LogLevel::Error,
            component: "refresh".to_string(),
            code: err.code.as_str().to_string(),
            message: err.message.clone(),
            tool: None,
            context,
            attempt: i64::from(attempt),
            retryable: err.retryable(),
        });
    }
}

fn backoff_delay(attempt: u32) -> Duration {
    let raw = BASE_DELAY_MS.saturating_mul(MULTIPLIER.saturating_pow(attempt.saturating_sub(1)));
    let clamped = raw.min(MAX_DELAY_MS) as f64;
    let jitter = jitter_factor();
    let delayed = (clamped * (1.0 + jitter)).max(0.0);
    Duration::from_millis(delayed as u64)
}

/// Returns a uniform value in `-0.25..=0.25` sourced from the OS RNG.
fn jitter_factor() -> f64 {
    let mut buf = [0u8; 1];
    if getrandom::getrandom(&mut buf).is_err() {
        return 0.0;
    }
    let unit = f64::from(buf[0]) / 255.0;
    (unit * 0.5) - 0.25
}

struct ScrapeResult {
    token: String,
    cookie: Option<String>,
}

fn scrape_workspace_home(workspace: &str, cookie: &str) -> Result<ScrapeResult, RefreshError> {
    let url = format!("https://{workspace}.slack.com");
    let response = ureq::get(&url)
        .set("Cookie", &format!("d={cookie}"))
        .set(
            "User-Agent",
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
        )
        .set(
            "Accept",
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,image/apng,*/*;q=0.8",
        )
        .set("Accept-Language", "en-US,en;q=0.9")
        .call();

    let response = match response {
        Ok(resp) => resp,
        Err(ureq::Error::Status(429, _)) => {
            return Err(RefreshError::new(RefreshErrorCode::RateLimited, "rate limited"))
        }
        Err(ureq::Error::Status(401, _)) | Err(ureq::Error::Status(403, _)) => {
            return Err(RefreshError::new(
                RefreshErrorCode::SessionRevoked,
                "session rejected by workspace",
            ))
        }
        Err(ureq::Error::Status(code, _)) => {
            return Err(RefreshError::new(
                RefreshErrorCode::NetworkError,
                format!("unexpected status {code}"),
            ))
        }
        Err(ureq::Error::Transport(t)) => {
            return Err(RefreshError::new(RefreshErrorCode::NetworkError, t.to_string()))
        }
    };

    let final_url = response.get_url().to_string();
    let set_cookie_headers: Vec<String> = response
        .all("Set-Cookie")
        .into_iter()
        .map(|s| s.to_string())
        .collect();
    let body = response
        .into_string()
        .map_err(|e| RefreshError::new(RefreshErrorCode::InvalidResponse, e.to_string()))?;

    if looks_like_signin_redirect(&final_url, &body) {
        return Err(RefreshError::new(
            RefreshErrorCode::SessionRevoked,
            "workspace redirected to sign-in",
        ));
    }

    let new_cookie = set_cookie_headers
        .iter()
        .find_map(|header| extract_cookie_d(header));

    let token = extract_api_token(&body)
        .ok_or_else(|| RefreshError::new(RefreshErrorCode::InvalidResponse, "api_token not found in response"))?;

    Ok(ScrapeResult {
        token,
        cookie: new_cookie,
    })
}

fn looks_like_signin_redirect(final_url: &str, body: &str) -> bool {
    if final_url.contains("/signin") || final_url.contains("/sign_in") || final_url.contains("?redir=") {
        return true;
    }
    const INDICATORS: &[&str] = &[
        "action=\"/signin\"",
        "action=\"/sign_in\"",
        "You need to sign in",
        "Sign in to Slack",
    ];
    INDICATORS.iter().any(|needle| body.contains(needle))
}

fn extract_cookie_d(set_cookie_header: &str) -> Option<String> {
    for part in split_cookie_header(set_cookie_header) {
        let trimmed = part.trim();
        if let Some(rest) = trimmed.strip_prefix("d=") {
            let value = rest.split(';').next().unwrap_or(rest).trim();
            if value.starts_with("xoxd-") {
                return Some(value.to_string());
            }
        }
    }
    None
}

/// Splits a combined `Set-Cookie` value on commas that are followed by a
/// `name=` pair, rather than commas that appear inside an `Expires=` date.
fn split_cookie_header(header: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0usize;
    let bytes = header.as_bytes();
    for (i, &b) in bytes.iter().enumerate() {
        if b != b',' {
            continue;
        }
        let rest = header[i + 1..].trim_start();
        let looks_like_new_pair = rest
            .split(|c: char| c == '=' || c == ';')
            .next()
            .map(|candidate| {
                !candidate.is_empty()
                    && candidate
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
                    && rest.as_bytes().get(candidate.len()) == Some(&b'=')
            })
            .unwrap_or(false);
        if looks_like_new_pair {
            parts.push(&header[start..i]);
            start = i + 1;
        }
    }
    parts.push(&header[start..]);
    parts
}

fn extract_api_token(body: &str) -> Option<String> {
    if let Some(token) = extract_between(body, "\"api_token\"", '"', '"') {
        if token.starts_with("xoxc-") {
            return Some(token);
        }
    }
    if let Some(idx) = body.find("api_token") {
        let rest = &body[idx + "api_token".len()..];
        let rest = rest.trim_start();
        let rest = rest.strip_prefix(':').unwrap_or(rest).trim_start();
        let rest = rest.trim_start_matches(['\'', '"']);
        if let Some(value_end) = rest.find(|c: char| c == '\'' || c == '"' || c == ',' || c == '}' || c.is_whitespace())
        {
            let candidate = &rest[..value_end];
            if candidate.starts_with("xoxc-") {
                return Some(candidate.to_string());
            }
        }
    }
    None
}

fn extract_between(haystack: &str, after: &str, open: char, close: char) -> Option<String> {
    let idx = haystack.find(after)?;
    let rest = &haystack[idx + after.len()..];
    let open_idx = rest.find(|c: char| !c.is_whitespace() && c != ':')?;
    let rest = &rest[open_idx..];
    let rest = rest.strip_prefix(open)?;
    let close_idx = rest.find(close)?;
    Some(rest[..close_idx].to_string())
}

fn validate_session(token: &str, cookie: &str) -> Result<(), RefreshError> {
    use crate::auth::AuthConfig;
    use crate::client::SlackApiClient;

    let client = SlackApiClient::new(AuthConfig::User {
        token: token.to_string(),
        cookie: cookie.to_string(),
    });
    match client.auth_test() {
        Ok(()) => Ok(()),
        Err(crate::client::ClientError::Api { code, .. })
            if code == "invalid_auth" || code == "account_inactive" =>
        {
            Err(RefreshError::new(
                RefreshErrorCode::SessionRevoked,
                format!("auth.test rejected refreshed credentials: {code}"),
            ))
        }
        Err(err) => Err(RefreshError::new(
            RefreshErrorCode::InvalidResponse,
            format!("auth.test validation failed: {err}"),
        )),
    }
}

/// Redacts a token/cookie pair for log lines describing a refresh attempt.
pub fn describe_masked(token: &str, cookie: &str) -> String {
    format!("token={} cookie={}", redact(token), redact(cookie))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cookie_header_split_keeps_expires_comma_intact() {
        let header = "d=xoxd-new; Path=/; Expires=Wed, 21 Oct 2026 07:28:00 GMT, d-s=abc; Path=/";
        let parts = split_cookie_header(header);
        assert_eq!(parts.len(), 2);
        assert!(parts[0].contains("d=xoxd-new"));
        assert!(parts[0].contains("Expires=Wed, 21 Oct 2026"));
    }

    #[test]
    fn extract_cookie_d_requires_xoxd_prefix() {
        assert_eq!(
            extract_cookie_d("d=xoxd-abc; Path=/"),
            Some("xoxd-abc".to_string())
        );
        assert_eq!(extract_cookie_d("d=not-a-session; Path=/"), None);
    }

    #[test]
    fn extract_api_token_matches_quoted_json_form() {
        let body = r#"window.boot_data = {"api_token": "xoxc-123-456"};"#;
        assert_eq!(extract_api_token(body), Some("xoxc-123-456".to_string()));
    }

    #[test]
    fn extract_api_token_matches_loose_form() {
        let body = "var x = {api_token: 'xoxc-789'}";
        assert_eq!(extract_api_token(body), Some("xoxc-789".to_string()));
    }

    #[test]
    fn extract_api_token_returns_none_when_absent() {
        assert_eq!(extract_api_token("Sign in to Slack"), None);
    }

    #[test]
    fn signin_redirect_detected_by_url_or_body_indicator() {
        assert!(looks_like_signin_redirect("https://x.slack.com/signin", ""));
        assert!(looks_like_signin_redirect("https://x.slack.com/", "Sign in to Slack"));
        assert!(!looks_like_signin_redirect("https://x.slack.com/", "welcome back"));
    }

    #[test]
    fn backoff_delay_grows_and_clamps_to_max() {
        let d1 = backoff_delay(1).as_millis();
        let d3 = backoff_delay(3).as_millis();
        assert!(d1 <= 1_250);
        assert!(d3 <= 30_000 + 7_500);
    }

    #[test]
    fn error_codes_classify_retryable_per_spec_table() {
        assert!(RefreshErrorCode::NetworkError.retryable());
        assert!(RefreshErrorCode::RateLimited.retryable());
        assert!(RefreshErrorCode::StorageError.retryable());
        assert!(RefreshErrorCode::RefreshInProgress.retryable());
        assert!(!RefreshErrorCode::SessionRevoked.retryable());
        assert!(!RefreshErrorCode::InvalidResponse.retryable());
        assert!(!RefreshErrorCode::RefreshNotAvailable.retryable());
        assert!(!RefreshErrorCode::Unknown.retryable());
    }
}
