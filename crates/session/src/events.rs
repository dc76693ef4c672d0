use querent_api::DataSourceId;

use super::ids::SessionRef;

/// Change notifications published by the session cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    /// The sessions list was replaced or an entry was added or removed.
    SessionsChanged { data_source_id: Option<DataSourceId> },
    /// A different session (or none) became active.
    ActiveChanged { active: Option<SessionRef> },
    /// Messages of one session were appended or reloaded.
    MessagesChanged { session: SessionRef },
    LoadingChanged { is_loading: bool },
    ErrorChanged { error: Option<String> },
}
