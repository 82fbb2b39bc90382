use std::path::PathBuf;

const DEFAULT_INTERVAL_DAYS: u32 = 7;
const DEFAULT_CHECK_INTERVAL_MS: u64 = 3_600_000;

fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Refresh-related configuration, read once from the environment at
/// bootstrap. Invalid values fall back to documented defaults rather than
/// failing startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshConfig {
    pub credentials_path: PathBuf,
    pub interval_days: u32,
    pub workspace: Option<String>,
    pub enabled: bool,
}

impl RefreshConfig {
    pub fn from_env() -> Self {
        let credentials_path = non_empty_env("SLACK_CREDENTIALS_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(default_credentials_path);

        let interval_days = non_empty_env("SLACK_REFRESH_INTERVAL_DAYS")
            .and_then(|v| v.parse::<u32>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(DEFAULT_INTERVAL_DAYS);

        let workspace = non_empty_env("SLACK_WORKSPACE");

        let enabled = std::env::var("SLACK_REFRESH_ENABLED")
            .map(|v| v != "false")
            .unwrap_or(true);

        Self {
            credentials_path,
            interval_days,
            workspace,
            enabled,
        }
    }

    pub fn check_interval_ms(&self) -> u64 {
        DEFAULT_CHECK_INTERVAL_MS
    }
}

fn default_credentials_path() -> PathBuf {
    home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".slack-mcp-server")
        .join("credentials.json")
}

/// Error-log path configuration, mirroring `RefreshConfig`'s default/override
/// resolution for the sibling file.
pub fn error_log_path() -> PathBuf {
    non_empty_env("SLACK_ERROR_LOG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".slack-mcp-server")
                .join("error.log")
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear_all() {
        for key in [
            "SLACK_CREDENTIALS_PATH",
            "SLACK_REFRESH_INTERVAL_DAYS",
            "SLACK_WORKSPACE",
            "SLACK_REFRESH_ENABLED",
        ] {
            std::env::remove_var(key);
        }
    }

    #[test]
    fn invalid_interval_falls_back_to_default() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        clear_all();
        std::env::set_var("SLACK_REFRESH_INTERVAL_DAYS", "not-a-number");
        let cfg = RefreshConfig::from_env();
        assert_eq!(cfg.interval_days, DEFAULT_INTERVAL_DAYS);
        clear_all();
    }

    #[test]
    fn false_literal_disables_refresh_any_other_value_enables() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        clear_all();
        std::env::set_var("SLACK_REFRESH_ENABLED", "false");
        assert!(!RefreshConfig::from_env().enabled);
        std::env::set_var("SLACK_REFRESH_ENABLED", "anything-else");
        assert!(RefreshConfig::from_env().enabled);
        clear_all();
        assert!(RefreshConfig::from_env().enabled);
    }

    #[test]
    fn credentials_path_overridable() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        clear_all();
        std::env::set_var("SLACK_CREDENTIALS_PATH", "/tmp/custom/creds.json");
        let cfg = RefreshConfig::from_env();
        assert_eq!(cfg.credentials_path, PathBuf::from("/tmp/custom/creds.json"));
        clear_all();
    }
}
