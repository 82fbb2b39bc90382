use std::sync::OnceLock;
use thiserror::Error;

const USER_TOKEN_PREFIX: &str = "xoxc-";
const COOKIE_PREFIX: &str = "xoxd-";

/// How outgoing requests to Slack are authenticated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthConfig {
    Bot { token: String },
    User { token: String, cookie: String },
}

impl AuthConfig {
    pub fn is_user_mode(&self) -> bool {
        matches!(self, AuthConfig::User { .. })
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("no auth configured: set SLACK_BOT_TOKEN or SLACK_USER_TOKEN")]
    NotConfigured,
    #[error("SLACK_USER_TOKEN is set but SLACK_COOKIE_D is missing")]
    MissingCookie,
    #[error("SLACK_USER_TOKEN must start with `xoxc-`")]
    BadUserTokenPrefix,
    #[error("SLACK_COOKIE_D must start with `xoxd-`")]
    BadCookiePrefix,
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Resolves an `AuthConfig` from the process environment, following the
/// backward-compatible precedence: bot token wins even when user vars are
/// also present.
pub fn resolve_from_env() -> Result<AuthConfig, AuthError> {
    if let Some(token) = non_empty_env("SLACK_BOT_TOKEN") {
        return Ok(AuthConfig::Bot { token });
    }

    if let Some(token) = non_empty_env("SLACK_USER_TOKEN") {
        if !token.starts_with(USER_TOKEN_PREFIX) {
            return Err(AuthError::BadUserTokenPrefix);
        }
        let cookie = non_empty_env("SLACK_COOKIE_D").ok_or(AuthError::MissingCookie)?;
        if !cookie.starts_with(COOKIE_PREFIX) {
            return Err(AuthError::BadCookiePrefix);
        }
        return Ok(AuthConfig::User { token, cookie });
    }

    Err(AuthError::NotConfigured)
}

/// Process-wide cache over `resolve_from_env`. Subsequent calls to
/// `resolve()` return the same value until `reset()` is called.
#[derive(Default)]
pub struct AuthResolver {
    cached: OnceLock<AuthConfig>,
}

impl AuthResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resolve(&self) -> Result<&AuthConfig, AuthError> {
        if let Some(cached) = self.cached.get() {
            return Ok(cached);
        }
        let resolved = resolve_from_env()?;
        Ok(self.cached.get_or_init(|| resolved))
    }

    /// Test-only hook: drops the cached value and environment will be
    /// re-resolved on next `resolve()`. Not part of the production lifecycle.
    #[cfg(test)]
    pub fn reset(&mut self) {
        self.cached = OnceLock::new();
    }
}
