use crate::caches::UserCache;

/// Cleans Slack markup in this exact order: (a) `<...>` tokens other than
/// `<@U...>` mentions, (b) `<@U...>` mentions via the user cache, (c) HTML
/// entity decoding — last, so entities embedded in link labels survive the
/// link conversion. Empty/absent input returns empty string.
pub fn clean_markup(input: &str, users: &UserCache) -> String {
    if input.is_empty() {
        return String::new();
    }
    let after_links = convert_tokens(input, users);
    decode_entities(&after_links)
}

fn convert_tokens(input: &str, users: &UserCache) -> String {
    let mut out = String::with_capacity(input.len());
    let bytes = input.as_bytes();
    let mut i = 0usize;
    while i < bytes.len() {
        if bytes[i] == b'<' {
            if let Some(end) = input[i..].find('>') {
                let token = &input[i + 1..i + end];
                out.push_str(&render_token(token, users));
                i += end + 1;
                continue;
            }
        }
        let ch = input[i..].chars().next().unwrap();
        out.push(ch);
        i += ch.len_utf8();
    }
    out
}

fn render_token(token: &str, users: &UserCache) -> String {
    if let Some(rest) = token.strip_prefix('@') {
        let id = rest.split('|').next().unwrap_or(rest);
        return format!("@{}", users.get_display_name(id));
    }
    if let Some(rest) = token.strip_prefix('#') {
        if let Some((channel_id, label)) = rest.split_once('|') {
            let _ = channel_id;
            return format!("#{label}");
        }
        return format!("#{rest}");
    }
    if let Some((url, label)) = token.split_once('|') {
        return format!("[{label}]({url})");
    }
    token.to_string()
}

fn decode_entities(input: &str) -> String {
    input
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_cache() -> UserCache {
        UserCache::new()
    }

    #[test]
    fn empty_input_returns_empty_string() {
        assert_eq!(clean_markup("", &empty_cache()), "");
    }

    #[test]
    fn channel_token_with_label_becomes_hash_name() {
        assert_eq!(clean_markup("see <#C123|general>", &empty_cache()), "see #general");
    }

    #[test]
    fn channel_token_without_label_becomes_raw_id() {
        assert_eq!(clean_markup("see <#C123>", &empty_cache()), "see #C123");
    }

    #[test]
    fn link_token_with_label_becomes_markdown_link() {
        assert_eq!(
            clean_markup("go to <https://example.com|Example>", &empty_cache()),
            "go to [Example](https://example.com)"
        );
    }

    #[test]
    fn link_token_without_label_stays_raw_url() {
        assert_eq!(
            clean_markup("go to <https://example.com>", &empty_cache()),
            "go to https://example.com"
        );
    }

    #[test]
    fn mention_without_cache_populated_falls_back_to_raw_id() {
        assert_eq!(clean_markup("hi <@U123>", &empty_cache()), "hi @U123");
    }

    #[test]
    fn entity_decoding_runs_after_link_conversion() {
        assert_eq!(
            clean_markup("<https://a|A &amp; B>", &empty_cache()),
            "[A & B](https://a)"
        );
    }
}
