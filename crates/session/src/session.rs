use chrono::{DateTime, Utc};
use querent_api::{DataSourceId, SessionId, SessionSummary};

use super::ids::{LocalSessionId, SessionRef};
use super::message::ChatMessage;

/// Pending titles keep this many characters of the first question.
pub const PENDING_TITLE_CHARS: usize = 30;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionPatch {
    pub title: Option<String>,
    pub last_activity: Option<DateTime<Utc>>,
}

impl SessionPatch {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            last_activity: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryState {
    /// Only the summary is known; the count is what the server reported.
    NotLoaded { reported_count: u64 },
    Loaded,
}

/// A session the backend knows about.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatSession {
    pub id: SessionId,
    pub title: String,
    pub data_source_id: DataSourceId,
    pub messages: Vec<ChatMessage>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub history: HistoryState,
}

impl ChatSession {
    pub fn new(id: SessionId, data_source_id: DataSourceId, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            title: title.into(),
            data_source_id,
            messages: Vec::new(),
            created_at: now,
            last_activity: now,
            history: HistoryState::Loaded,
        }
    }

    pub fn from_summary(summary: SessionSummary, data_source_id: DataSourceId) -> Self {
        let created_at = summary.created_at.unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
        let title = summary
            .conversation_name
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| format!("Chat {}", summary.id));
        Self {
            id: summary.id,
            title,
            data_source_id: summary.data_source_id.unwrap_or(data_source_id),
            messages: Vec::new(),
            created_at,
            last_activity: summary.updated_at.unwrap_or(created_at),
            history: HistoryState::NotLoaded {
                reported_count: summary.message_count.unwrap_or_default(),
            },
        }
    }

    pub fn messages_loaded(&self) -> bool {
        self.history == HistoryState::Loaded
    }

    pub fn message_count(&self) -> usize {
        match self.history {
            HistoryState::Loaded => self.messages.len(),
            HistoryState::NotLoaded { reported_count } => {
                usize::try_from(reported_count)
                    .unwrap_or(usize::MAX)
                    .max(self.messages.len())
            }
        }
    }

    pub fn replace_messages(&mut self, messages: Vec<ChatMessage>) {
        self.messages = messages;
        self.history = HistoryState::Loaded;
    }

    pub fn push_message(&mut self, message: ChatMessage) {
        self.last_activity = self.last_activity.max(message.created_at);
        self.messages.push(message);
    }

    pub fn apply_patch(&mut self, patch: &SessionPatch) {
        if let Some(title) = &patch.title {
            self.title = title.clone();
        }
        if let Some(last_activity) = patch.last_activity {
            self.last_activity = last_activity;
        }
    }
}

/// A conversation that exists only locally until its first ask round trip succeeds.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingSession {
    pub local_id: LocalSessionId,
    pub title: String,
    pub data_source_id: DataSourceId,
    pub messages: Vec<ChatMessage>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl PendingSession {
    pub fn new(data_source_id: DataSourceId, first_question: &str) -> Self {
        let now = Utc::now();
        Self {
            local_id: LocalSessionId::new_v7(),
            title: pending_title(first_question),
            data_source_id,
            messages: Vec::new(),
            created_at: now,
            last_activity: now,
        }
    }

    pub fn push_message(&mut self, message: ChatMessage) {
        self.last_activity = self.last_activity.max(message.created_at);
        self.messages.push(message);
    }

    pub fn apply_patch(&mut self, patch: &SessionPatch) {
        if let Some(title) = &patch.title {
            self.title = title.clone();
        }
        if let Some(last_activity) = patch.last_activity {
            self.last_activity = last_activity;
        }
    }

    /// Moves the local history into the server-backed form.
    pub fn commit(self, id: SessionId, title: impl Into<String>) -> ChatSession {
        ChatSession {
            id,
            title: title.into(),
            data_source_id: self.data_source_id,
            messages: self.messages,
            created_at: self.created_at,
            last_activity: self.last_activity,
            history: HistoryState::Loaded,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ActiveSession {
    Pending(PendingSession),
    Committed(ChatSession),
}

impl ActiveSession {
    pub fn session_ref(&self) -> SessionRef {
        match self {
            Self::Pending(session) => SessionRef::Pending(session.local_id),
            Self::Committed(session) => SessionRef::Committed(session.id),
        }
    }

    pub fn committed_id(&self) -> Option<SessionId> {
        self.session_ref().committed_id()
    }

    pub fn title(&self) -> &str {
        match self {
            Self::Pending(session) => &session.title,
            Self::Committed(session) => &session.title,
        }
    }

    pub fn data_source_id(&self) -> DataSourceId {
        match self {
            Self::Pending(session) => session.data_source_id,
            Self::Committed(session) => session.data_source_id,
        }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        match self {
            Self::Pending(session) => &session.messages,
            Self::Committed(session) => &session.messages,
        }
    }

    pub fn push_message(&mut self, message: ChatMessage) {
        match self {
            Self::Pending(session) => session.push_message(message),
            Self::Committed(session) => session.push_message(message),
        }
    }

    pub fn apply_patch(&mut self, patch: &SessionPatch) {
        match self {
            Self::Pending(session) => session.apply_patch(patch),
            Self::Committed(session) => session.apply_patch(patch),
        }
    }
}

pub fn pending_title(question: &str) -> String {
    let question = question.trim();
    if question.chars().count() > PENDING_TITLE_CHARS {
        let prefix: String = question.chars().take(PENDING_TITLE_CHARS).collect();
        format!("{prefix}...")
    } else {
        question.to_string()
    }
}

/// Newest first; ids break ties.
pub fn sort_sessions(sessions: &mut [ChatSession]) {
    sessions.sort_by(|left, right| {
        right
            .created_at
            .cmp(&left.created_at)
            .then_with(|| right.id.cmp(&left.id))
    });
}
