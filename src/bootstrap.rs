use crate::auth::{AuthConfig, AuthResolver};
use crate::caches::{ChannelCache, UserCache};
use crate::client::SlackClientHolder;
use crate::config::{error_log_path, RefreshConfig};
use crate::credentials::CredentialStore;
use crate::errorlog::{ErrorLog, ErrorLogEntry, LogLevel};
use crate::refresh::scheduler::RefreshScheduler;
use crate::refresh::RefreshManager;
use crate::tools::ToolHandler;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Wires the process-wide singletons together (§2, §5): resolves auth,
/// loads or seeds persisted credentials, binds the HTTP client, starts the
/// scheduler when applicable, and hands back a `ToolHandler` ready to serve
/// the transport.
pub struct Bootstrap {
    pub auth: Arc<AuthResolver>,
    pub client_holder: Arc<SlackClientHolder>,
    pub channel_cache: Arc<ChannelCache>,
    pub user_cache: Arc<UserCache>,
    pub refresh_manager: Arc<RefreshManager>,
    pub scheduler: Arc<RefreshScheduler>,
    pub error_log: Arc<ErrorLog>,
}

impl Bootstrap {
    /// Resolves auth, seeds/loads credentials, binds the client, and starts
    /// the scheduler. Fails only on a configuration error from `AuthResolver`
    /// (§4.1) — bot mode must always be able to start even if user-mode env
    /// vars are also malformed, which `AuthResolver`'s precedence already
    /// guarantees.
    pub fn run() -> Result<(Self, ToolHandler), crate::auth::AuthError> {
        let auth = Arc::new(AuthResolver::new());
        let resolved = auth.resolve()?.clone();

        let error_log = Arc::new(ErrorLog::new(error_log_path()));
        let refresh_config = RefreshConfig::from_env();

        let client_holder = Arc::new(SlackClientHolder::new(resolved.clone()));
        let credential_store = CredentialStore::new(refresh_config.credentials_path.clone());

        if let AuthConfig::User { token, cookie } = &resolved {
            if !credential_store.exists() {
                let workspace = refresh_config.workspace.clone().unwrap_or_default();
                if let Err(err) = credential_store.create_initial(token.clone(), cookie.clone(), workspace) {
                    error_log.log(&ErrorLogEntry {
                        ts: Utc::now().to_rfc3339(),
                        level: LogLevel::Error,
                        component: "bootstrap".to_string(),
                        code: "CREDENTIAL_SEED_FAILED".to_string(),
                        message: err.to_string(),
                        tool: None,
                        context: BTreeMap::new(),
                        attempt: 1,
                        retryable: false,
                    });
                }
            } else if let Ok(stored) = credential_store.load() {
                client_holder.update_credentials(stored.credentials.token, stored.credentials.cookie);
            }
        }

        let channel_cache = Arc::new(ChannelCache::new());
        let user_cache = Arc::new(UserCache::new());

        let refresh_manager = Arc::new(RefreshManager::new(
            CredentialStore::new(refresh_config.credentials_path.clone()),
            Arc::clone(&client_holder),
            Arc::clone(&error_log),
            refresh_config.clone(),
        ));
        let scheduler = Arc::new(RefreshScheduler::new(
            Arc::clone(&refresh_manager),
            refresh_config.check_interval_ms(),
        ));

        let scheduler_enabled =
            matches!(resolved, AuthConfig::User { .. }) && refresh_config.workspace.is_some() && refresh_config.enabled;
        if scheduler_enabled {
            scheduler.start();
        }

        let handler = ToolHandler::new(
            Arc::clone(&auth),
            Arc::clone(&client_holder),
            Arc::clone(&channel_cache),
            Arc::clone(&user_cache),
            Arc::clone(&refresh_manager),
            Arc::clone(&scheduler),
            refresh_config,
            credential_store,
            Arc::clone(&error_log),
        );

        Ok((
            Self {
                auth,
                client_holder,
                channel_cache,
                user_cache,
                refresh_manager,
                scheduler,
                error_log,
            },
            handler,
        ))
    }
}
