//! Backend paths, relative to `base_url + api_prefix` unless noted.

use super::ids::{DataSourceId, SessionId};

pub const CHAT_ASK: &str = "/chat/ask";
pub const AUTH_LOGIN: &str = "/auth/login";
pub const DATA_SOURCES: &str = "/data-sources";
pub const DATA_SOURCES_OWNED: &str = "/data-sources/owned";

/// Engine path, relative to the engine base URL.
pub const ENGINE_QUERY: &str = "/query";
/// Embed path, relative to the embed base URL.
pub const EMBED_DB_QUERY: &str = "/api/v1/db/query";

pub fn chat_sessions(data_source_id: DataSourceId) -> String {
    format!("/chat/sessions/{data_source_id}")
}

pub fn chat_session(session_id: SessionId) -> String {
    format!("/chat/sessions/{session_id}")
}

pub fn chat_messages(session_id: SessionId) -> String {
    format!("/chat/sessions/{session_id}/messages")
}

pub fn data_source(data_source_id: DataSourceId) -> String {
    format!("{DATA_SOURCES}/{data_source_id}")
}

pub fn data_source_test_connection(data_source_id: DataSourceId) -> String {
    format!("{DATA_SOURCES}/{data_source_id}/test-connection")
}

/// Joins a base URL, optional prefix and path without doubling or dropping slashes.
pub fn join_url(base_url: &str, prefix: &str, path: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let prefix = prefix.trim_matches('/');
    let path = path.trim_start_matches('/');

    if prefix.is_empty() {
        format!("{base}/{path}")
    } else {
        format!("{base}/{prefix}/{path}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_url_normalizes_slashes() {
        assert_eq!(
            join_url("http://localhost:8080/", "/api/v1/", &chat_messages(SessionId::new(9))),
            "http://localhost:8080/api/v1/chat/sessions/9/messages"
        );
        assert_eq!(
            join_url("http://engine:5000", "", ENGINE_QUERY),
            "http://engine:5000/query"
        );
    }
}
