use crate::client::{ClientError, RawChannel, RawUser, SlackApiClient};
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Clone)]
pub struct CachedChannel {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct CachedUser {
    pub id: String,
    pub display_name: String,
}

fn looks_like_channel_id(input: &str) -> bool {
    let mut chars = input.chars();
    match chars.next() {
        Some('C') | Some('D') | Some('G') => {}
        _ => return false,
    }
    let rest: String = chars.collect();
    !rest.is_empty() && rest.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
}

fn display_name_for(user: &RawUser) -> String {
    if let Some(profile) = &user.profile {
        if let Some(name) = profile
            .display_name
            .as_ref()
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
        {
            return name.to_string();
        }
    }
    if let Some(real) = user.real_name.as_ref().map(|v| v.trim()).filter(|v| !v.is_empty()) {
        return real.to_string();
    }
    if let Some(name) = user.name.as_ref().map(|v| v.trim()).filter(|v| !v.is_empty()) {
        return name.to_string();
    }
    user.id.clone()
}

enum PopulateState<T> {
    Empty,
    Populated(T),
}

/// Name<->ID cache for channels. Populated lazily on first resolve; concurrent
/// resolves share one populate call via a held mutex (the populate's HTTP
/// round trips happen inside the critical section).
pub struct ChannelCache {
    state: Mutex<PopulateState<HashMap<String, CachedChannel>>>,
}

impl ChannelCache {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(PopulateState::Empty),
        }
    }

    /// Resolves a channel name (optionally `#`-prefixed) or raw Slack ID to
    /// an ID. IDs are returned as-is without populating the cache. Unknown
    /// names fall through to the raw input.
    pub fn resolve_channel_id(&self, input: &str, client: &SlackApiClient) -> String {
        if looks_like_channel_id(input) {
            return input.to_string();
        }
        let key = input.trim_start_matches('#').to_lowercase();
        self.ensure_populated(client);
        let guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        match &*guard {
            PopulateState::Populated(map) => map
                .get(&key)
                .map(|c| c.id.clone())
                .unwrap_or_else(|| input.to_string()),
            PopulateState::Empty => input.to_string(),
        }
    }

    fn ensure_populated(&self, client: &SlackApiClient) {
        let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if matches!(&*guard, PopulateState::Populated(_)) {
            return;
        }
        *guard = PopulateState::Populated(populate_channels(client).unwrap_or_default());
    }

    /// Test-only: drops the populated cache so the next resolve repopulates.
    #[cfg(test)]
    pub fn reset(&self) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = PopulateState::Empty;
    }
}

impl Default for ChannelCache {
    fn default() -> Self {
        Self::new()
    }
}

fn populate_channels(client: &SlackApiClient) -> Result<HashMap<String, CachedChannel>, ClientError> {
    let mut out = HashMap::new();
    let mut cursor: Option<String> = None;
    loop {
        let (page, next) = client.list_channels_page(cursor.as_deref())?;
        for channel in page {
            let entry = CachedChannel {
                id: channel.id.clone(),
                name: channel.name.clone(),
            };
            out.insert(channel.id.clone(), entry.clone());
            out.insert(channel.name.to_lowercase(), entry);
        }
        match next {
            Some(c) => cursor = Some(c),
            None => break,
        }
    }
    Ok(out)
}

/// ID -> display-name cache for users. On populate failure, seats an empty
/// map and serves raw-ID fallbacks indefinitely (best-effort cache).
pub struct UserCache {
    state: Mutex<PopulateState<HashMap<String, CachedUser>>>,
}

impl UserCache {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(PopulateState::Empty),
        }
    }

    fn ensure_populated(&self, client: &SlackApiClient) {
        let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if matches!(&*guard, PopulateState::Populated(_)) {
            return;
        }
        *guard = PopulateState::Populated(populate_users(client).unwrap_or_default());
    }

    /// `"display (id)"`, or the raw id if unknown/not yet populated.
    pub fn resolve(&self, id: &str, client: &SlackApiClient) -> String {
        self.ensure_populated(client);
        let guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        match &*guard {
            PopulateState::Populated(map) => match map.get(id) {
                Some(user) => format!("{} ({id})", user.display_name),
                None => id.to_string(),
            },
            PopulateState::Empty => id.to_string(),
        }
    }

    /// Display name only, without the `(id)` suffix; used by markup cleaning
    /// where only the name is interpolated into `@name`. Falls back to the
    /// raw id when the cache hasn't been populated.
    pub fn get_display_name(&self, id: &str) -> String {
        let guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        match &*guard {
            PopulateState::Populated(map) => map
                .get(id)
                .map(|u| u.display_name.clone())
                .unwrap_or_else(|| id.to_string()),
            PopulateState::Empty => id.to_string(),
        }
    }

    pub fn resolve_many(&self, ids: &[String], client: &SlackApiClient) -> HashMap<String, String> {
        self.ensure_populated(client);
        let mut out = HashMap::new();
        for id in ids {
            out.entry(id.clone()).or_insert_with(|| self.resolve(id, client));
        }
        out
    }

    #[cfg(test)]
    pub fn reset(&self) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = PopulateState::Empty;
    }
}

impl Default for UserCache {
    fn default() -> Self {
        Self::new()
    }
}

fn populate_users(client: &SlackApiClient) -> Result<HashMap<String, CachedUser>, ClientError> {
    let members = client.list_users_page()?;
    let mut out = HashMap::new();
    for user in members {
        out.insert(
            user.id.clone(),
            CachedUser {
                id: user.id.clone(),
                display_name: display_name_for(&user),
            },
        );
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_channel_ids_pass_through_without_populating() {
        assert!(looks_like_channel_id("C0123ABC"));
        assert!(looks_like_channel_id("D9"));
        assert!(looks_like_channel_id("G1"));
        assert!(!looks_like_channel_id("general"));
        assert!(!looks_like_channel_id(""));
        assert!(!looks_like_channel_id("C"));
    }

    #[test]
    fn display_name_priority_falls_back_through_profile_realname_name_id() {
        let user = RawUser {
            id: "U1".to_string(),
            real_name: Some("Real Name".to_string()),
            name: Some("handle".to_string()),
            profile: None,
        };
        assert_eq!(display_name_for(&user), "Real Name");

        let user = RawUser {
            id: "U2".to_string(),
            real_name: None,
            name: Some("handle".to_string()),
            profile: None,
        };
        assert_eq!(display_name_for(&user), "handle");

        let user = RawUser {
            id: "U3".to_string(),
            real_name: None,
            name: None,
            profile: None,
        };
        assert_eq!(display_name_for(&user), "U3");
    }

    #[test]
    fn user_cache_falls_back_to_raw_id_before_populate() {
        let cache = UserCache::new();
        assert_eq!(cache.get_display_name("U999"), "U999");
    }
}
