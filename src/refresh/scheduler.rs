use super::{RefreshError, RefreshManager};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Ticks `RefreshManager` on a background thread at `check_interval_ms`,
/// calling `refresh_with_retry` only when `is_refresh_due()` says so. Sleeps
/// in short slices so `stop()` is observed promptly rather than after a full
/// interval.
pub struct RefreshScheduler {
    manager: Arc<RefreshManager>,
    check_interval_ms: u64,
    stop_flag: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

const SLEEP_SLICE_MS: u64 = 250;

impl RefreshScheduler {
    pub fn new(manager: Arc<RefreshManager>, check_interval_ms: u64) -> Self {
        Self {
            manager,
            check_interval_ms,
            stop_flag: Arc::new(AtomicBool::new(false)),
            handle: Mutex::new(None),
        }
    }

    pub fn start(&self) {
        let mut guard = self.handle.lock().unwrap_or_else(|e| e.into_inner());
        if guard.is_some() {
            return;
        }
        self.stop_flag.store(false, Ordering::SeqCst);
        let manager = Arc::clone(&self.manager);
        let stop_flag = Arc::clone(&self.stop_flag);
        let interval_ms = self.check_interval_ms;
        *guard = Some(thread::spawn(move || run_loop(manager, stop_flag, interval_ms)));
    }

    pub fn stop(&self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        let handle = self.handle.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }

    /// Runs a refresh immediately, bypassing the due-check. Used by the
    /// `refresh_credentials` tool.
    pub fn trigger_manual(&self) -> Result<(), RefreshError> {
        self.manager.refresh_with_retry(true).map(|_| ())
    }
}

impl Drop for RefreshScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_loop(manager: Arc<RefreshManager>, stop_flag: Arc<AtomicBool>, interval_ms: u64) {
    let mut elapsed_ms: u64 = 0;
    while !stop_flag.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_millis(SLEEP_SLICE_MS));
        elapsed_ms += SLEEP_SLICE_MS;
        if elapsed_ms < interval_ms {
            continue;
        }
        elapsed_ms = 0;
        if stop_flag.load(Ordering::SeqCst) {
            break;
        }
        if manager.snapshot().in_progress {
            continue;
        }
        if manager.is_refresh_due() {
            let _ = manager.refresh_with_retry(false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthConfig;
    use crate::client::SlackClientHolder;
    use crate::config::RefreshConfig;
    use crate::credentials::CredentialStore;
    use crate::errorlog::ErrorLog;
    use tempfile::tempdir;

    fn manager(dir: &std::path::Path) -> Arc<RefreshManager> {
        let store = CredentialStore::new(dir.join("credentials.json"));
        let holder = Arc::new(SlackClientHolder::new(AuthConfig::Bot {
            token: "xoxb-1".to_string(),
        }));
        let error_log = Arc::new(ErrorLog::new(dir.join("error.log")));
        let config = RefreshConfig {
            credentials_path: dir.join("credentials.json"),
            interval_days: 7,
            workspace: None,
            enabled: true,
        };
        Arc::new(RefreshManager::new(store, holder, error_log, config))
    }

    #[test]
    fn start_stop_is_idempotent_and_joins_cleanly() {
        let dir = tempdir().expect("tempdir");
        let scheduler = RefreshScheduler::new(manager(dir.path()), 60_000);
        scheduler.start();
        scheduler.start();
        scheduler.stop();
        scheduler.stop();
    }

    #[test]
    fn trigger_manual_surfaces_storage_error_when_no_credentials_saved() {
        let dir = tempdir().expect("tempdir");
        let scheduler = RefreshScheduler::new(manager(dir.path()), 60_000);
        let err = scheduler.trigger_manual().expect_err("no credentials on disk");
        assert!(matches!(err.code, super::super::RefreshErrorCode::StorageError));
    }
}
