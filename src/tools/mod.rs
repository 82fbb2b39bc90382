use crate::auth::{AuthConfig, AuthResolver};
use crate::caches::{ChannelCache, UserCache};
use crate::client::{ClientError, SlackClientHolder};
use crate::config::RefreshConfig;
use crate::credentials::CredentialStore;
use crate::errorlog::{ErrorLog, ErrorLogEntry, LogLevel};
use crate::format::{clean_markup, compact_reactions, format_relative_time, strip_empty};
use crate::refresh::scheduler::RefreshScheduler;
use crate::refresh::RefreshManager;
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::collections::HashSet;
use std::sync::Arc;

const SEARCH_NOT_AVAILABLE_MESSAGE: &str = "search is only available with user auth";
const REFRESH_NOT_USER_MESSAGE: &str = "refresh is only for user auth";
const REFRESH_MISSING_WORKSPACE_MESSAGE: &str = "ensure SLACK_WORKSPACE is set";
const THREAD_PARENT_TEXT_LIMIT: usize = 200;
const DEFAULT_HISTORY_LIMIT: u32 = 50;
const DEFAULT_SEARCH_COUNT: u32 = 20;

/// One entry in the registry surfaced to the transport's `registerTool`
/// collaborator (§6). The core only guarantees the hints are set
/// consistently; the transport owns wiring them into its own schema format.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    pub name: &'static str,
    pub description: &'static str,
    pub read_only_hint: bool,
    pub destructive_hint: bool,
    pub idempotent_hint: bool,
    pub open_world_hint: bool,
}

pub fn tool_registry() -> Vec<ToolDescriptor> {
    vec![
        ToolDescriptor {
            name: "list_channels",
            description: "List public channels visible to the configured Slack identity.",
            read_only_hint: true,
            destructive_hint: false,
            idempotent_hint: true,
            open_world_hint: true,
        },
        ToolDescriptor {
            name: "get_channel_history",
            description: "Read recent messages from a channel.",
            read_only_hint: true,
            destructive_hint: false,
            idempotent_hint: true,
            open_world_hint: true,
        },
        ToolDescriptor {
            name: "get_thread_replies",
            description: "Read the replies in a message thread.",
            read_only_hint: true,
            destructive_hint: false,
            idempotent_hint: true,
            open_world_hint: true,
        },
        ToolDescriptor {
            name: "list_users",
            description: "List workspace members.",
            read_only_hint: true,
            destructive_hint: false,
            idempotent_hint: true,
            open_world_hint: true,
        },
        ToolDescriptor {
            name: "get_user_profile",
            description: "Look up a user's display name by id.",
            read_only_hint: true,
            destructive_hint: false,
            idempotent_hint: true,
            open_world_hint: true,
        },
        ToolDescriptor {
            name: "search_messages",
            description: "Search messages across the workspace (requires user auth).",
            read_only_hint: true,
            destructive_hint: false,
            idempotent_hint: true,
            open_world_hint: true,
        },
        ToolDescriptor {
            name: "refresh_credentials",
            description: "Force an immediate session credential refresh (requires user auth).",
            read_only_hint: false,
            destructive_hint: false,
            idempotent_hint: true,
            open_world_hint: true,
        },
    ]
}

#[derive(Debug, Serialize)]
pub struct ToolResponse {
    pub content: Vec<ToolContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structured_content: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct ToolContent {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub text: String,
}

struct ToolFailure {
    code: String,
    message: String,
    retry_after_secs: Option<u64>,
}

impl ToolFailure {
    fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            retry_after_secs: None,
        }
    }

    fn with_retry_after(mut self, secs: Option<u64>) -> Self {
        self.retry_after_secs = secs;
        self
    }

    fn text(&self) -> String {
        match self.retry_after_secs {
            Some(secs) => format!(
                "Error: {} - {}. Please retry after {} seconds.",
                self.code, self.message, secs
            ),
            None => format!("Error: {} - {}", self.code, self.message),
        }
    }
}

impl From<ClientError> for ToolFailure {
    fn from(err: ClientError) -> Self {
        ToolFailure::new(err.code().to_string(), err.to_string()).with_retry_after(err.retry_after_secs())
    }
}

/// Wraps an already-finalized value (message records, if any, already
/// stripped and text-restored by the caller — see `format_message`) into the
/// uniform success envelope. Does not strip again: a second pass would strip
/// the very `text: ""` fields the pipeline just restored.
fn success(value: Value) -> ToolResponse {
    let text = serde_json::to_string(&value).unwrap_or_default();
    ToolResponse {
        content: vec![ToolContent {
            kind: "text",
            text,
        }],
        structured_content: Some(value),
        is_error: None,
    }
}

fn failure(failure: ToolFailure) -> ToolResponse {
    ToolResponse {
        content: vec![ToolContent {
            kind: "text",
            text: failure.text(),
        }],
        structured_content: None,
        is_error: Some(true),
    }
}

/// Ensures the serialized message object carries `text` and `user` even when
/// stripping would otherwise have dropped an empty string — both are
/// required fields on `FormattedMessage`/`FormattedSearchResult` and
/// bot/file-share messages legitimately have neither (§4.5, §9).
fn with_text_restored(mut value: Value) -> Value {
    if let Value::Object(map) = &mut value {
        map.entry("text".to_string()).or_insert(Value::String(String::new()));
        map.entry("user".to_string()).or_insert(Value::String(String::new()));
    }
    value
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FormattedMessage {
    id: String,
    time: String,
    user: String,
    text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    thread_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reactions: Option<Map<String, Value>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ThreadParent {
    user: String,
    time: String,
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FormattedSearchResult {
    id: String,
    channel: String,
    user: String,
    time: String,
    text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    thread_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    thread_parent: Option<ThreadParent>,
}

fn looks_like_user_id(input: &str) -> bool {
    let mut chars = input.chars();
    matches!(chars.next(), Some('U')) && !input.is_empty() && chars.all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
}

fn truncate_to_chars(input: &str, max_chars: usize) -> String {
    if input.chars().count() <= max_chars {
        return input.to_string();
    }
    let truncated: String = input.chars().take(max_chars).collect();
    format!("{truncated}…")
}

/// Request-facing pipeline: validate -> resolve -> call -> format -> strip ->
/// respond (§4.8). Owns no I/O itself beyond delegating to the singletons
/// passed in at construction.
pub struct ToolHandler {
    auth: Arc<AuthResolver>,
    client_holder: Arc<SlackClientHolder>,
    channel_cache: Arc<ChannelCache>,
    user_cache: Arc<UserCache>,
    refresh_manager: Arc<RefreshManager>,
    scheduler: Arc<RefreshScheduler>,
    refresh_config: RefreshConfig,
    credential_store: CredentialStore,
    error_log: Arc<ErrorLog>,
}

impl ToolHandler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        auth: Arc<AuthResolver>,
        client_holder: Arc<SlackClientHolder>,
        channel_cache: Arc<ChannelCache>,
        user_cache: Arc<UserCache>,
        refresh_manager: Arc<RefreshManager>,
        scheduler: Arc<RefreshScheduler>,
        refresh_config: RefreshConfig,
        credential_store: CredentialStore,
        error_log: Arc<ErrorLog>,
    ) -> Self {
        Self {
            auth,
            client_holder,
            channel_cache,
            user_cache,
            refresh_manager,
            scheduler,
            refresh_config,
            credential_store,
            error_log,
        }
    }

    fn is_search_available(&self) -> bool {
        matches!(self.auth.resolve(), Ok(AuthConfig::User { .. }))
    }

    fn is_refresh_available(&self) -> bool {
        matches!(self.auth.resolve(), Ok(AuthConfig::User { .. }))
            && self.refresh_config.workspace.is_some()
            && self.refresh_config.enabled
    }

    fn log_failure(&self, tool: &str, failure: &ToolFailure) {
        self.error_log.log(&ErrorLogEntry {
            ts: Utc::now().to_rfc3339(),
            level: LogLevel::Error,
            component: "tools".to_string(),
            code: failure.code.clone(),
            message: failure.message.clone(),
            tool: Some(tool.to_string()),
            context: BTreeMap::new(),
            attempt: 1,
            retryable: failure.retry_after_secs.is_some(),
        });
    }

    /// Dispatches a single tool call by name. `params` is the tool's raw
    /// JSON-RPC argument object.
    pub fn handle(&self, name: &str, params: &Value) -> ToolResponse {
        let result = match name {
            "list_channels" => self.list_channels(params),
            "get_channel_history" => self.get_channel_history(params),
            "get_thread_replies" => self.get_thread_replies(params),
            "list_users" => self.list_users(params),
            "get_user_profile" => self.get_user_profile(params),
            "search_messages" => self.search_messages(params),
            "refresh_credentials" => self.refresh_credentials(),
            other => Err(ToolFailure::new(
                "unknown_tool",
                format!("no such tool: {other}"),
            )),
        };
        match result {
            Ok(value) => success(value),
            Err(err) => {
                self.log_failure(name, &err);
                failure(err)
            }
        }
    }

    /// Strips a record with no mandatory-field exception, for tool outputs
    /// that don't carry `FormattedMessage`-shaped records (§4.5's restore
    /// step applies only to message records, not these).
    fn finalize_simple(value: Value) -> Value {
        strip_empty(&value)
    }

    fn format_message(&self, client: &crate::client::SlackApiClient, raw: crate::client::RawMessage) -> Value {
        let user = raw
            .user
            .as_deref()
            .map(|id| self.user_cache.resolve(id, client))
            .unwrap_or_default();
        let text = raw
            .text
            .as_deref()
            .map(|t| clean_markup(t, &self.user_cache))
            .unwrap_or_default();
        let formatted = FormattedMessage {
            id: raw.ts.clone(),
            time: format_relative_time(&raw.ts, Utc::now()),
            user,
            text,
            thread_id: raw.thread_ts.filter(|t| *t != raw.ts),
            reply_count: raw.reply_count,
            reactions: compact_reactions(&raw.reactions),
        };
        let value = serde_json::to_value(formatted).unwrap_or(Value::Null);
        with_text_restored(strip_empty(&value))
    }

    fn list_channels(&self, _params: &Value) -> Result<Value, ToolFailure> {
        let client = self.client_holder.get();
        let (channels, _) = client.list_channels_page(None)?;
        let items: Vec<Value> = channels
            .into_iter()
            .map(|c| json!({ "id": c.id, "name": c.name }))
            .collect();
        Ok(Self::finalize_simple(json!({ "channels": items })))
    }

    fn get_channel_history(&self, params: &Value) -> Result<Value, ToolFailure> {
        let channel_input = params
            .get("channel_id")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolFailure::new("invalid_params", "channel_id is required"))?;
        let limit = params
            .get("limit")
            .and_then(Value::as_u64)
            .map(|v| v as u32)
            .unwrap_or(DEFAULT_HISTORY_LIMIT);

        let client = self.client_holder.get();
        let channel_id = self.channel_cache.resolve_channel_id(channel_input, &client);
        let (messages, _) = client
            .conversation_history(&channel_id, None, limit)
            .map_err(|e| e.with_context(format!("channel {channel_id}")))?;
        let formatted: Vec<Value> = messages
            .into_iter()
            .map(|m| self.format_message(&client, m))
            .collect();
        Ok(json!({ "channelId": channel_id, "messages": formatted }))
    }

    fn get_thread_replies(&self, params: &Value) -> Result<Value, ToolFailure> {
        let channel_input = params
            .get("channel_id")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolFailure::new("invalid_params", "channel_id is required"))?;
        let thread_ts = params
            .get("thread_ts")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolFailure::new("invalid_params", "thread_ts is required"))?;
        let limit = params
            .get("limit")
            .and_then(Value::as_u64)
            .map(|v| v as u32)
            .unwrap_or(DEFAULT_HISTORY_LIMIT);

        let client = self.client_holder.get();
        let channel_id = self.channel_cache.resolve_channel_id(channel_input, &client);
        let messages = client
            .conversation_replies(&channel_id, thread_ts, limit)
            .map_err(|e| e.with_context(format!("channel {channel_id} thread {thread_ts}")))?;
        let formatted: Vec<Value> = messages
            .into_iter()
            .map(|m| self.format_message(&client, m))
            .collect();
        Ok(json!({ "channelId": channel_id, "threadTs": thread_ts, "messages": formatted }))
    }

    fn list_users(&self, _params: &Value) -> Result<Value, ToolFailure> {
        let client = self.client_holder.get();
        let members = client.list_users_page()?;
        let items: Vec<Value> = members
            .into_iter()
            .map(|u| {
                let id = u.id.clone();
                let display = self.user_cache.get_display_name(&id);
                json!({ "id": id, "displayName": display })
            })
            .collect();
        Ok(json!({ "users": items }))
    }

    fn get_user_profile(&self, params: &Value) -> Result<Value, ToolFailure> {
        let user_id = params
            .get("user_id")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolFailure::new("invalid_params", "user_id is required"))?;
        let client = self.client_holder.get();
        let display = self.user_cache.resolve(user_id, &client);
        Ok(json!({ "id": user_id, "profile": display }))
    }

    fn search_messages(&self, params: &Value) -> Result<Value, ToolFailure> {
        if !self.is_search_available() {
            return Err(ToolFailure::new(
                "search_requires_user_token",
                SEARCH_NOT_AVAILABLE_MESSAGE,
            ));
        }
        let query = params
            .get("query")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolFailure::new("invalid_params", "query is required"))?;
        let count = params
            .get("count")
            .and_then(Value::as_u64)
            .map(|v| v as u32)
            .unwrap_or(DEFAULT_SEARCH_COUNT);

        let client = self.client_holder.get();
        let matches = client
            .search_messages(query, count)
            .map_err(|e| e.with_context(format!("query \"{query}\"")))?;

        let mut seen_threads: HashSet<(String, String)> = HashSet::new();
        let mut results = Vec::with_capacity(matches.len());
        for m in matches {
            let channel = m.channel.clone().unwrap_or(crate::client::RawSearchChannel {
                id: String::new(),
                name: None,
            });
            let channel_label = match &channel.name {
                Some(name) if looks_like_user_id(name) => format!("DM: {} ({})", name, channel.id),
                Some(name) => format!("#{} ({})", name, channel.id),
                None => channel.id.clone(),
            };
            let user = m
                .user
                .as_deref()
                .map(|id| self.user_cache.resolve(id, &client))
                .unwrap_or_default();
            let text = m
                .text
                .as_deref()
                .map(|t| clean_markup(t, &self.user_cache))
                .unwrap_or_default();

            // A match whose `thread_ts` is absent or equal to its own `ts` is
            // itself the thread root; there's no separate parent to enrich.
            let thread_id = m.thread_ts.clone().filter(|t| *t != m.ts);
            let thread_parent = thread_id.as_deref().and_then(|thread_ts| {
                self.fetch_thread_parent(&client, &channel.id, thread_ts, &mut seen_threads)
            });

            let formatted = FormattedSearchResult {
                id: m.ts.clone(),
                channel: channel_label,
                user,
                time: format_relative_time(&m.ts, Utc::now()),
                text,
                thread_id,
                thread_parent: thread_parent.map(|(user, time, text)| ThreadParent {
                    user,
                    time,
                    text: truncate_to_chars(&text, THREAD_PARENT_TEXT_LIMIT),
                }),
            };
            results.push(with_text_restored(
                serde_json::to_value(formatted).unwrap_or(Value::Null),
            ));
        }
        Ok(json!({ "results": results }))
    }

    /// Best-effort thread-parent enrichment: `ts` is the thread root id
    /// (`thread_ts`), not the match's own `ts`. Dedupes by `(channel,
    /// thread_ts)`, fetches at most one reply page per thread, and omits the
    /// parent silently on any failure (§4.8 step 6).
    fn fetch_thread_parent(
        &self,
        client: &crate::client::SlackApiClient,
        channel_id: &str,
        ts: &str,
        seen: &mut HashSet<(String, String)>,
    ) -> Option<(String, String, String)> {
        if channel_id.is_empty() {
            return None;
        }
        let key = (channel_id.to_string(), ts.to_string());
        if !seen.insert(key) {
            return None;
        }
        let replies = client.conversation_replies(channel_id, ts, 1).ok()?;
        let parent = replies.into_iter().next()?;
        let user = parent
            .user
            .as_deref()
            .map(|id| self.user_cache.resolve(id, client))
            .unwrap_or_default();
        let text = parent
            .text
            .as_deref()
            .map(|t| clean_markup(t, &self.user_cache))
            .unwrap_or_default();
        let time = format_relative_time(&parent.ts, Utc::now());
        Some((user, time, text))
    }

    fn refresh_credentials(&self) -> Result<Value, ToolFailure> {
        let auth = self
            .auth
            .resolve()
            .map_err(|e| ToolFailure::new("REFRESH_NOT_AVAILABLE", e.to_string()))?;
        if !auth.is_user_mode() {
            return Err(ToolFailure::new("REFRESH_NOT_AVAILABLE", REFRESH_NOT_USER_MESSAGE));
        }
        if self.refresh_config.workspace.is_none() || !self.refresh_config.enabled {
            return Err(ToolFailure::new(
                "REFRESH_NOT_AVAILABLE",
                REFRESH_MISSING_WORKSPACE_MESSAGE,
            ));
        }

        match self.scheduler.trigger_manual() {
            Ok(()) => {
                let snapshot = self.refresh_manager.snapshot();
                let total_refreshes = self
                    .credential_store
                    .load()
                    .map(|record| record.metadata.refresh_count)
                    .unwrap_or(0);
                Ok(json!({
                    "success": true,
                    "message": "Credentials refreshed successfully",
                    "refreshedAt": snapshot.last_success.map(|t| t.to_rfc3339()),
                    "totalRefreshes": total_refreshes,
                }))
            }
            Err(err) => Ok(json!({
                "success": false,
                "error": {
                    "code": err.code.as_str(),
                    "message": err.message,
                    "retryable": err.retryable(),
                }
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_registry_sets_consistent_hints_for_read_and_refresh_tools() {
        let registry = tool_registry();
        for descriptor in &registry {
            if descriptor.name == "refresh_credentials" {
                assert!(!descriptor.read_only_hint);
                assert!(!descriptor.destructive_hint);
                assert!(descriptor.idempotent_hint);
            } else {
                assert!(descriptor.read_only_hint);
                assert!(descriptor.idempotent_hint);
                assert!(!descriptor.destructive_hint);
            }
        }
    }

    #[test]
    fn failure_text_appends_retry_after_when_present() {
        let f = ToolFailure::new("rate_limited", "slow down").with_retry_after(Some(30));
        assert_eq!(f.text(), "Error: rate_limited - slow down. Please retry after 30 seconds.");
    }

    #[test]
    fn failure_text_omits_retry_after_when_absent() {
        let f = ToolFailure::new("channel_not_found", "no such channel");
        assert_eq!(f.text(), "Error: channel_not_found - no such channel");
    }

    #[test]
    fn text_restored_after_strip_would_have_dropped_it() {
        let value = json!({ "id": "123", "text": "" });
        let stripped = strip_empty(&value);
        assert_eq!(stripped, json!({ "id": "123" }));
        let restored = with_text_restored(stripped);
        assert_eq!(restored, json!({ "id": "123", "text": "" }));
    }

    #[test]
    fn user_restored_after_strip_would_have_dropped_it() {
        let value = json!({ "id": "123", "text": "", "user": "" });
        let stripped = strip_empty(&value);
        assert_eq!(stripped, json!({ "id": "123" }));
        let restored = with_text_restored(stripped);
        assert_eq!(restored, json!({ "id": "123", "text": "", "user": "" }));
    }

    #[test]
    fn truncate_to_chars_adds_ellipsis_only_when_over_limit() {
        assert_eq!(truncate_to_chars("short", 200), "short");
        let long = "x".repeat(210);
        let truncated = truncate_to_chars(&long, 200);
        assert_eq!(truncated.chars().count(), 201);
        assert!(truncated.ends_with('…'));
    }

    #[test]
    fn looks_like_user_id_matches_u_prefixed_ids_only() {
        assert!(looks_like_user_id("U0123ABC"));
        assert!(!looks_like_user_id("general"));
        assert!(!looks_like_user_id("C0123ABC"));
    }
}
