use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use querent_api::{AskResponse, ChatBackend, DataSourceId, SessionId};
use snafu::{OptionExt, ResultExt};
use tokio::sync::{RwLock, broadcast};

use super::error::{
    BackendSnafu, MissingSessionIdSnafu, PendingSessionMissingSnafu, SessionResult,
};
use super::events::CacheEvent;
use super::ids::{LocalSessionId, SessionRef};
use super::message::ChatMessage;
use super::session::{ActiveSession, ChatSession, PendingSession, SessionPatch, sort_sessions};

pub const LOAD_SESSIONS_FAILED: &str = "Failed to load chat sessions";
pub const LOAD_MESSAGES_FAILED: &str = "Failed to load chat messages";
pub const SWITCH_SESSION_FAILED: &str = "Failed to load messages for this session";
pub const DELETE_SESSION_FAILED: &str = "Failed to delete session";

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchOutcome {
    /// Fetched history was applied to the active session.
    Applied,
    /// The fetch finished after the user moved on; the active session was left alone.
    Superseded,
    AlreadyLoading,
    UnknownSession,
    Failed,
}

#[derive(Default)]
struct CacheState {
    data_source_id: Option<DataSourceId>,
    sessions: Vec<ChatSession>,
    active: Option<ActiveSession>,
    is_loading: bool,
    loading_session: Option<(SessionId, u64)>,
    error: Option<String>,
    next_ticket: u64,
    message_tickets: HashMap<SessionId, u64>,
    list_ticket: u64,
}

impl CacheState {
    fn issue_ticket(&mut self, session_id: SessionId) -> u64 {
        self.next_ticket += 1;
        self.message_tickets.insert(session_id, self.next_ticket);
        self.next_ticket
    }

    fn is_latest(&self, session_id: SessionId, ticket: u64) -> bool {
        self.message_tickets.get(&session_id) == Some(&ticket)
    }

    fn session_mut(&mut self, session_id: SessionId) -> Option<&mut ChatSession> {
        self.sessions
            .iter_mut()
            .find(|session| session.id == session_id)
    }

    fn active_ref(&self) -> Option<SessionRef> {
        self.active.as_ref().map(ActiveSession::session_ref)
    }

    fn insert_from_response(
        &mut self,
        data_source_id: DataSourceId,
        response: &AskResponse,
    ) -> SessionResult<ChatSession> {
        let session_id = response.chat_session_id.context(MissingSessionIdSnafu {
            stage: "create-session-from-response",
        })?;

        if self.data_source_id != Some(data_source_id) {
            self.data_source_id = Some(data_source_id);
            self.sessions.clear();
        }
        self.sessions.retain(|session| session.id != session_id);
        let title = format!("Chat {}", self.sessions.len() + 1);
        let session = ChatSession::new(session_id, data_source_id, title);
        self.sessions.insert(0, session.clone());
        Ok(session)
    }
}

/// Client-side view of the chat sessions for one data source.
///
/// Guards are never held across backend calls; results are matched back to
/// their dispatch through tickets so late responses cannot overwrite newer state.
pub struct SessionCache {
    backend: Arc<dyn ChatBackend>,
    state: RwLock<CacheState>,
    events: broadcast::Sender<CacheEvent>,
}

impl SessionCache {
    pub fn new(backend: Arc<dyn ChatBackend>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            backend,
            state: RwLock::new(CacheState::default()),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: CacheEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    pub async fn sessions(&self) -> Vec<ChatSession> {
        self.state.read().await.sessions.clone()
    }

    pub async fn session(&self, session_id: SessionId) -> Option<ChatSession> {
        let state = self.state.read().await;
        state
            .sessions
            .iter()
            .find(|session| session.id == session_id)
            .cloned()
    }

    pub async fn active_session(&self) -> Option<ActiveSession> {
        self.state.read().await.active.clone()
    }

    pub async fn is_loading(&self) -> bool {
        self.state.read().await.is_loading
    }

    pub async fn loading_session(&self) -> Option<SessionId> {
        self.state
            .read()
            .await
            .loading_session
            .map(|(session_id, _)| session_id)
    }

    pub async fn error(&self) -> Option<String> {
        self.state.read().await.error.clone()
    }

    pub async fn dismiss_error(&self) {
        let mut state = self.state.write().await;
        if state.error.take().is_some() {
            self.emit(CacheEvent::ErrorChanged { error: None });
        }
    }

    pub async fn data_source_id(&self) -> Option<DataSourceId> {
        self.state.read().await.data_source_id
    }

    pub async fn load_sessions(&self, data_source_id: DataSourceId) {
        let ticket = {
            let mut state = self.state.write().await;
            state.list_ticket += 1;
            state.is_loading = true;
            if state.error.take().is_some() {
                self.emit(CacheEvent::ErrorChanged { error: None });
            }
            self.emit(CacheEvent::LoadingChanged { is_loading: true });
            state.list_ticket
        };

        let result = self.backend.list_sessions(data_source_id).await;

        let refresh = {
            let mut state = self.state.write().await;
            if state.list_ticket != ticket {
                tracing::debug!(
                    data_source_id = %data_source_id,
                    "discarding superseded session list"
                );
                return;
            }
            state.is_loading = false;
            self.emit(CacheEvent::LoadingChanged { is_loading: false });

            let summaries = match result {
                Ok(summaries) => summaries,
                Err(error) => {
                    tracing::warn!(
                        data_source_id = %data_source_id,
                        error = %error,
                        "failed to load chat sessions"
                    );
                    state.error = Some(LOAD_SESSIONS_FAILED.to_string());
                    self.emit(CacheEvent::ErrorChanged {
                        error: state.error.clone(),
                    });
                    // The cached list still describes the previous source; only its active chat goes.
                    if state
                        .active
                        .as_ref()
                        .is_some_and(|active| active.data_source_id() != data_source_id)
                    {
                        state.active = None;
                        self.emit(CacheEvent::ActiveChanged { active: None });
                    }
                    return;
                }
            };

            let mut sessions: Vec<ChatSession> = summaries
                .into_iter()
                .filter(|summary| {
                    summary
                        .data_source_id
                        .is_none_or(|owner| owner == data_source_id)
                })
                .map(|summary| ChatSession::from_summary(summary, data_source_id))
                .collect();
            sort_sessions(&mut sessions);

            let previous = state.active_ref();
            let mut refresh = None;
            let active = match state.active.take() {
                Some(ActiveSession::Pending(pending))
                    if pending.data_source_id == data_source_id =>
                {
                    Some(ActiveSession::Pending(pending))
                }
                Some(ActiveSession::Committed(current))
                    if current.data_source_id == data_source_id =>
                {
                    match sessions.iter_mut().find(|entry| entry.id == current.id) {
                        Some(entry) => {
                            let mut preserved = entry.clone();
                            if current.messages.is_empty() {
                                refresh = Some(current.id);
                            } else {
                                preserved.replace_messages(current.messages);
                                entry.replace_messages(preserved.messages.clone());
                            }
                            Some(ActiveSession::Committed(preserved))
                        }
                        None => None,
                    }
                }
                _ => None,
            };

            tracing::info!(
                data_source_id = %data_source_id,
                session_count = sessions.len(),
                "loaded chat sessions"
            );
            state.data_source_id = Some(data_source_id);
            state.sessions = sessions;
            state.active = active;
            self.emit(CacheEvent::SessionsChanged {
                data_source_id: Some(data_source_id),
            });
            let current = state.active_ref();
            if current != previous {
                self.emit(CacheEvent::ActiveChanged { active: current });
            }

            refresh.map(|session_id| (session_id, state.issue_ticket(session_id)))
        };

        if let Some((session_id, ticket)) = refresh {
            self.fetch_active_history(session_id, ticket, LOAD_MESSAGES_FAILED)
                .await;
        }
    }

    /// Fetches history into the sessions list only; the active session is untouched.
    pub async fn load_session_messages(
        &self,
        session_id: SessionId,
    ) -> SessionResult<Vec<ChatMessage>> {
        let ticket = self.state.write().await.issue_ticket(session_id);
        let result = self.backend.list_messages(session_id).await;

        let mut state = self.state.write().await;
        let records = match result.context(BackendSnafu {
            stage: "load-session-messages",
        }) {
            Ok(records) => records,
            Err(error) => {
                tracing::warn!(session_id = %session_id, error = %error, "failed to load chat messages");
                state.error = Some(LOAD_MESSAGES_FAILED.to_string());
                self.emit(CacheEvent::ErrorChanged {
                    error: state.error.clone(),
                });
                return Err(error);
            }
        };

        let messages: Vec<ChatMessage> = records.into_iter().map(ChatMessage::from_record).collect();
        if !state.is_latest(session_id, ticket) {
            tracing::debug!(session_id = %session_id, "discarding superseded message fetch");
            return Ok(messages);
        }
        if let Some(entry) = state.session_mut(session_id) {
            entry.replace_messages(messages.clone());
            self.emit(CacheEvent::MessagesChanged {
                session: SessionRef::Committed(session_id),
            });
        }
        Ok(messages)
    }

    pub async fn create_session_from_chat_response(
        &self,
        data_source_id: DataSourceId,
        response: &AskResponse,
    ) -> SessionResult<ChatSession> {
        let mut state = self.state.write().await;
        let session = state.insert_from_response(data_source_id, response)?;
        tracing::info!(session_id = %session.id, "created session from chat response");
        self.emit(CacheEvent::SessionsChanged {
            data_source_id: state.data_source_id,
        });
        Ok(session)
    }

    /// Appends to the matching list entry and to the active session; `false` if neither matched.
    pub async fn add_message_to_session(&self, target: SessionRef, message: ChatMessage) -> bool {
        let mut state = self.state.write().await;
        let mut matched = false;

        if let Some(session_id) = target.committed_id() {
            if let Some(entry) = state.session_mut(session_id) {
                entry.push_message(message.clone());
                matched = true;
            }
        }
        match state.active.as_mut() {
            Some(active) if active.session_ref() == target => {
                active.push_message(message);
                matched = true;
            }
            _ => {}
        }

        if matched {
            self.emit(CacheEvent::MessagesChanged { session: target });
        } else {
            tracing::debug!(session = %target, "no session matched appended message");
        }
        matched
    }

    pub async fn switch_session(&self, session_id: SessionId) -> SwitchOutcome {
        let ticket = {
            let mut state = self.state.write().await;
            if state
                .loading_session
                .is_some_and(|(loading, _)| loading == session_id)
            {
                tracing::debug!(session_id = %session_id, "session already loading");
                return SwitchOutcome::AlreadyLoading;
            }
            let Some(entry) = state
                .sessions
                .iter()
                .find(|session| session.id == session_id)
                .cloned()
            else {
                tracing::warn!(session_id = %session_id, "switch to unknown session");
                return SwitchOutcome::UnknownSession;
            };

            let ticket = state.issue_ticket(session_id);
            state.loading_session = Some((session_id, ticket));
            state.active = Some(ActiveSession::Committed(entry));
            self.emit(CacheEvent::ActiveChanged {
                active: Some(SessionRef::Committed(session_id)),
            });
            ticket
        };

        self.fetch_active_history(session_id, ticket, SWITCH_SESSION_FAILED)
            .await
    }

    async fn fetch_active_history(
        &self,
        session_id: SessionId,
        ticket: u64,
        failure: &'static str,
    ) -> SwitchOutcome {
        let result = self.backend.list_messages(session_id).await;

        let mut state = self.state.write().await;
        if state.loading_session == Some((session_id, ticket)) {
            state.loading_session = None;
        }

        let current = state.is_latest(session_id, ticket)
            && state.active_ref() == Some(SessionRef::Committed(session_id));
        let records = match result {
            Ok(records) => records,
            Err(error) if current => {
                tracing::warn!(session_id = %session_id, error = %error, "failed to load session history");
                state.error = Some(failure.to_string());
                self.emit(CacheEvent::ErrorChanged {
                    error: state.error.clone(),
                });
                return SwitchOutcome::Failed;
            }
            Err(error) => {
                tracing::debug!(session_id = %session_id, error = %error, "discarding superseded history failure");
                return SwitchOutcome::Superseded;
            }
        };

        if !state.is_latest(session_id, ticket) {
            tracing::debug!(session_id = %session_id, ticket, "discarding superseded session history");
            return SwitchOutcome::Superseded;
        }

        let messages: Vec<ChatMessage> = records.into_iter().map(ChatMessage::from_record).collect();
        if let Some(entry) = state.session_mut(session_id) {
            entry.replace_messages(messages.clone());
        }
        let applied = match state.active.as_mut() {
            Some(ActiveSession::Committed(active)) if active.id == session_id => {
                active.replace_messages(messages);
                true
            }
            _ => false,
        };
        self.emit(CacheEvent::MessagesChanged {
            session: SessionRef::Committed(session_id),
        });

        if applied {
            SwitchOutcome::Applied
        } else {
            SwitchOutcome::Superseded
        }
    }

    /// Clears the active session; the next question starts a pending one.
    pub async fn start_new_chat(&self) {
        let mut state = self.state.write().await;
        state.active = None;
        state.error = None;
        self.emit(CacheEvent::ActiveChanged { active: None });
    }

    pub async fn delete_session(&self, session_id: SessionId) {
        let result = self.backend.delete_session(session_id).await;

        let reload = {
            let mut state = self.state.write().await;
            if let Err(error) = result {
                tracing::warn!(session_id = %session_id, error = %error, "failed to delete session");
                state.error = Some(DELETE_SESSION_FAILED.to_string());
                self.emit(CacheEvent::ErrorChanged {
                    error: state.error.clone(),
                });
                return;
            }

            state.sessions.retain(|session| session.id != session_id);
            state.message_tickets.remove(&session_id);
            if state
                .loading_session
                .is_some_and(|(loading, _)| loading == session_id)
            {
                state.loading_session = None;
            }
            if state
                .active
                .as_ref()
                .and_then(ActiveSession::committed_id)
                == Some(session_id)
            {
                state.active = None;
                self.emit(CacheEvent::ActiveChanged { active: None });
            }
            tracing::info!(session_id = %session_id, "deleted session");
            self.emit(CacheEvent::SessionsChanged {
                data_source_id: state.data_source_id,
            });
            state.data_source_id
        };

        if let Some(data_source_id) = reload {
            self.load_sessions(data_source_id).await;
        }
    }

    /// Merges local edits without a backend round trip; `last_activity` defaults to now.
    pub async fn update_local_session(&self, target: SessionRef, patch: SessionPatch) -> bool {
        let patch = SessionPatch {
            last_activity: Some(patch.last_activity.unwrap_or_else(Utc::now)),
            ..patch
        };

        let mut state = self.state.write().await;
        let mut matched = false;
        if let Some(session_id) = target.committed_id() {
            if let Some(entry) = state.session_mut(session_id) {
                entry.apply_patch(&patch);
                matched = true;
            }
        }
        match state.active.as_mut() {
            Some(active) if active.session_ref() == target => {
                active.apply_patch(&patch);
                matched = true;
            }
            _ => {}
        }

        if matched {
            self.emit(CacheEvent::SessionsChanged {
                data_source_id: state.data_source_id,
            });
        }
        matched
    }

    pub async fn begin_pending_session(
        &self,
        data_source_id: DataSourceId,
        first_message: ChatMessage,
    ) -> LocalSessionId {
        let mut pending = PendingSession::new(data_source_id, &first_message.body);
        pending.push_message(first_message);
        let local_id = pending.local_id;

        let mut state = self.state.write().await;
        state.active = Some(ActiveSession::Pending(pending));
        tracing::debug!(session = %local_id, "started pending session");
        self.emit(CacheEvent::ActiveChanged {
            active: Some(SessionRef::Pending(local_id)),
        });
        local_id
    }

    /// Replaces the active pending session with its server-backed form plus `reply`.
    pub async fn commit_pending_session(
        &self,
        local_id: LocalSessionId,
        response: &AskResponse,
        reply: ChatMessage,
    ) -> SessionResult<ChatSession> {
        let mut state = self.state.write().await;
        let session_id = response.chat_session_id.context(MissingSessionIdSnafu {
            stage: "commit-pending-session",
        })?;
        let data_source_id = match state.active.as_ref() {
            Some(ActiveSession::Pending(pending)) if pending.local_id == local_id => {
                pending.data_source_id
            }
            _ => {
                return PendingSessionMissingSnafu {
                    stage: "commit-pending-session",
                    local_id,
                }
                .fail();
            }
        };

        let entry = state.insert_from_response(data_source_id, response)?;
        let Some(ActiveSession::Pending(pending)) = state.active.take() else {
            return PendingSessionMissingSnafu {
                stage: "commit-pending-session",
                local_id,
            }
            .fail();
        };

        let mut committed = pending.commit(entry.id, entry.title);
        committed.push_message(reply);
        if let Some(slot) = state.session_mut(session_id) {
            *slot = committed.clone();
        }
        state.active = Some(ActiveSession::Committed(committed.clone()));

        tracing::info!(session = %local_id, session_id = %session_id, "committed pending session");
        self.emit(CacheEvent::SessionsChanged {
            data_source_id: state.data_source_id,
        });
        self.emit(CacheEvent::ActiveChanged {
            active: Some(SessionRef::Committed(session_id)),
        });
        Ok(committed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Sender;
    use crate::testing::{Call, ScriptedBackend, backend_error};
    use querent_api::{MessageId, MessageRecord, SessionSummary};

    fn summary(id: i64, data_source_id: i64) -> SessionSummary {
        SessionSummary::new(SessionId::new(id), DataSourceId::new(data_source_id))
    }

    fn user_record(id: i64, text: &str) -> MessageRecord {
        MessageRecord::user(MessageId::new(id), text)
    }

    fn cache_with(backend: &Arc<ScriptedBackend>) -> SessionCache {
        SessionCache::new(backend.clone())
    }

    fn active_bodies(active: &ActiveSession) -> Vec<String> {
        active
            .messages()
            .iter()
            .map(|message| message.body.clone())
            .collect()
    }

    #[tokio::test]
    async fn appended_messages_keep_order_and_count() {
        let backend = Arc::new(ScriptedBackend::default());
        let cache = cache_with(&backend);
        let response = AskResponse {
            chat_session_id: Some(SessionId::new(5)),
            ..AskResponse::default()
        };
        let session = cache
            .create_session_from_chat_response(DataSourceId::new(1), &response)
            .await
            .unwrap();
        assert_eq!(session.title, "Chat 1");

        let target = SessionRef::Committed(session.id);
        assert!(cache.add_message_to_session(target, ChatMessage::user("one")).await);
        assert!(cache.add_message_to_session(target, ChatMessage::bot("two")).await);
        assert!(
            !cache
                .add_message_to_session(SessionRef::Committed(SessionId::new(99)), ChatMessage::user("lost"))
                .await
        );

        let stored = cache.session(session.id).await.unwrap();
        assert_eq!(stored.message_count(), 2);
        assert_eq!(stored.messages[0].body, "one");
        assert_eq!(stored.messages[1].body, "two");
    }

    #[tokio::test]
    async fn missing_session_id_leaves_list_untouched() {
        let backend = Arc::new(ScriptedBackend::default());
        backend.push_sessions(Ok(vec![summary(1, 1)]));
        let cache = cache_with(&backend);
        cache.load_sessions(DataSourceId::new(1)).await;

        let error = cache
            .create_session_from_chat_response(DataSourceId::new(1), &AskResponse::default())
            .await
            .unwrap_err();
        assert!(matches!(error, crate::SessionError::MissingSessionId { .. }));
        assert_eq!(error.to_string(), "No chat session ID in response");
        assert_eq!(cache.sessions().await.len(), 1);
    }

    #[tokio::test]
    async fn created_session_replaces_stale_entry_and_goes_first() {
        let backend = Arc::new(ScriptedBackend::default());
        backend.push_sessions(Ok(vec![summary(3, 1), summary(4, 1)]));
        let cache = cache_with(&backend);
        cache.load_sessions(DataSourceId::new(1)).await;

        let response = AskResponse {
            chat_session_id: Some(SessionId::new(3)),
            ..AskResponse::default()
        };
        let created = cache
            .create_session_from_chat_response(DataSourceId::new(1), &response)
            .await
            .unwrap();
        assert_eq!(created.title, "Chat 2");

        let ids: Vec<i64> = cache.sessions().await.iter().map(|s| s.id.get()).collect();
        assert_eq!(ids, vec![3, 4]);
        assert!(cache.session(SessionId::new(3)).await.unwrap().messages_loaded());
    }

    #[tokio::test]
    async fn duplicate_switch_issues_one_fetch() {
        let backend = Arc::new(ScriptedBackend::default());
        backend.push_sessions(Ok(vec![summary(1, 1)]));
        let gate = backend.push_messages_gated(SessionId::new(1), Ok(vec![user_record(10, "hi")]));
        let cache = cache_with(&backend);
        cache.load_sessions(DataSourceId::new(1)).await;

        let (first, second) = tokio::join!(cache.switch_session(SessionId::new(1)), async {
            gate.entered.notified().await;
            assert_eq!(cache.loading_session().await, Some(SessionId::new(1)));
            let outcome = cache.switch_session(SessionId::new(1)).await;
            gate.release.notify_one();
            outcome
        });

        assert_eq!(first, SwitchOutcome::Applied);
        assert_eq!(second, SwitchOutcome::AlreadyLoading);
        assert_eq!(backend.message_fetches(SessionId::new(1)), 1);
        assert_eq!(cache.loading_session().await, None);
    }

    #[tokio::test]
    async fn rapid_switch_keeps_the_latest_session() {
        let backend = Arc::new(ScriptedBackend::default());
        backend.push_sessions(Ok(vec![summary(1, 1), summary(2, 1)]));
        let gate_a = backend.push_messages_gated(SessionId::new(1), Ok(vec![user_record(10, "from A")]));
        backend.push_messages(SessionId::new(2), Ok(vec![user_record(20, "from B")]));
        let cache = cache_with(&backend);
        cache.load_sessions(DataSourceId::new(1)).await;

        let (first, second) = tokio::join!(cache.switch_session(SessionId::new(1)), async {
            gate_a.entered.notified().await;
            let outcome = cache.switch_session(SessionId::new(2)).await;
            gate_a.release.notify_one();
            outcome
        });

        assert_eq!(first, SwitchOutcome::Superseded);
        assert_eq!(second, SwitchOutcome::Applied);
        let active = cache.active_session().await.unwrap();
        assert_eq!(active.committed_id(), Some(SessionId::new(2)));
        assert_eq!(active_bodies(&active), vec!["from B".to_string()]);
        // The late fetch still refreshes its own list entry.
        assert_eq!(
            cache.session(SessionId::new(1)).await.unwrap().messages[0].body,
            "from A"
        );
    }

    #[tokio::test]
    async fn older_message_fetch_is_discarded() {
        let backend = Arc::new(ScriptedBackend::default());
        backend.push_sessions(Ok(vec![summary(1, 1)]));
        let gate = backend.push_messages_gated(SessionId::new(1), Ok(vec![user_record(10, "old")]));
        backend.push_messages(SessionId::new(1), Ok(vec![user_record(11, "new")]));
        let cache = cache_with(&backend);
        cache.load_sessions(DataSourceId::new(1)).await;

        let (older, newer) = tokio::join!(cache.load_session_messages(SessionId::new(1)), async {
            gate.entered.notified().await;
            let result = cache.load_session_messages(SessionId::new(1)).await;
            gate.release.notify_one();
            result
        });

        assert_eq!(older.unwrap()[0].body, "old");
        assert_eq!(newer.unwrap()[0].body, "new");
        let entry = cache.session(SessionId::new(1)).await.unwrap();
        assert_eq!(entry.messages.len(), 1);
        assert_eq!(entry.messages[0].body, "new");
        assert!(cache.active_session().await.is_none());
    }

    #[tokio::test]
    async fn overlapping_list_loads_apply_only_the_latest() {
        let backend = Arc::new(ScriptedBackend::default());
        let gate = backend.push_sessions_gated(Ok(vec![summary(1, 1)]));
        backend.push_sessions(Ok(vec![summary(2, 1)]));
        let cache = cache_with(&backend);

        tokio::join!(cache.load_sessions(DataSourceId::new(1)), async {
            gate.entered.notified().await;
            cache.load_sessions(DataSourceId::new(1)).await;
            gate.release.notify_one();
        });

        let ids: Vec<i64> = cache.sessions().await.iter().map(|s| s.id.get()).collect();
        assert_eq!(ids, vec![2]);
        assert!(!cache.is_loading().await);
    }

    #[tokio::test]
    async fn reload_preserves_active_session_for_same_data_source() {
        let backend = Arc::new(ScriptedBackend::default());
        backend.push_sessions(Ok(vec![summary(1, 1), summary(2, 1)]));
        backend.push_messages(SessionId::new(1), Ok(vec![user_record(10, "kept")]));
        let cache = cache_with(&backend);
        cache.load_sessions(DataSourceId::new(1)).await;
        assert_eq!(cache.switch_session(SessionId::new(1)).await, SwitchOutcome::Applied);

        backend.push_sessions(Ok(vec![summary(1, 1).with_name("Renamed"), summary(2, 1)]));
        cache.load_sessions(DataSourceId::new(1)).await;

        let active = cache.active_session().await.unwrap();
        assert_eq!(active.committed_id(), Some(SessionId::new(1)));
        assert_eq!(active.title(), "Renamed");
        assert_eq!(active_bodies(&active), vec!["kept".to_string()]);
        assert_eq!(backend.message_fetches(SessionId::new(1)), 1);

        backend.push_sessions(Ok(vec![summary(7, 2)]));
        cache.load_sessions(DataSourceId::new(2)).await;
        assert!(cache.active_session().await.is_none());
        assert_eq!(cache.data_source_id().await, Some(DataSourceId::new(2)));
    }

    #[tokio::test]
    async fn reload_fetches_history_for_empty_active_session() {
        let backend = Arc::new(ScriptedBackend::default());
        backend.push_sessions(Ok(vec![summary(1, 1)]));
        backend.push_messages(SessionId::new(1), Ok(Vec::new()));
        backend.push_messages(SessionId::new(1), Ok(vec![user_record(10, "arrived")]));
        let cache = cache_with(&backend);
        cache.load_sessions(DataSourceId::new(1)).await;
        cache.switch_session(SessionId::new(1)).await;

        backend.push_sessions(Ok(vec![summary(1, 1)]));
        cache.load_sessions(DataSourceId::new(1)).await;

        assert_eq!(backend.message_fetches(SessionId::new(1)), 2);
        let active = cache.active_session().await.unwrap();
        assert_eq!(active_bodies(&active), vec!["arrived".to_string()]);
    }

    #[tokio::test]
    async fn reload_drops_active_session_missing_from_list_but_keeps_pending() {
        let backend = Arc::new(ScriptedBackend::default());
        backend.push_sessions(Ok(vec![summary(1, 1)]));
        let cache = cache_with(&backend);
        cache.load_sessions(DataSourceId::new(1)).await;
        cache.switch_session(SessionId::new(1)).await;

        backend.push_sessions(Ok(vec![summary(2, 1)]));
        cache.load_sessions(DataSourceId::new(1)).await;
        assert!(cache.active_session().await.is_none());

        let local_id = cache
            .begin_pending_session(DataSourceId::new(1), ChatMessage::user("Count rows"))
            .await;
        cache.load_sessions(DataSourceId::new(1)).await;
        assert_eq!(
            cache.active_session().await.map(|active| active.session_ref()),
            Some(SessionRef::Pending(local_id))
        );
    }

    #[tokio::test]
    async fn list_failure_records_banner_and_keeps_cache() {
        let backend = Arc::new(ScriptedBackend::default());
        backend.push_sessions(Ok(vec![summary(1, 1)]));
        backend.push_sessions(Err(backend_error("down")));
        let cache = cache_with(&backend);
        cache.load_sessions(DataSourceId::new(1)).await;
        cache.load_sessions(DataSourceId::new(1)).await;

        assert_eq!(cache.error().await.as_deref(), Some(LOAD_SESSIONS_FAILED));
        assert_eq!(cache.sessions().await.len(), 1);
        assert!(!cache.is_loading().await);

        cache.dismiss_error().await;
        assert_eq!(cache.error().await, None);
    }

    #[tokio::test]
    async fn failed_switch_fetch_keeps_cached_messages() {
        let backend = Arc::new(ScriptedBackend::default());
        backend.push_sessions(Ok(vec![summary(1, 1)]));
        backend.push_messages(SessionId::new(1), Ok(vec![user_record(10, "cached")]));
        backend.push_messages(SessionId::new(1), Err(backend_error("timeout")));
        let cache = cache_with(&backend);
        cache.load_sessions(DataSourceId::new(1)).await;
        cache.load_session_messages(SessionId::new(1)).await.unwrap();

        let outcome = cache.switch_session(SessionId::new(1)).await;

        assert_eq!(outcome, SwitchOutcome::Failed);
        assert_eq!(cache.error().await.as_deref(), Some(SWITCH_SESSION_FAILED));
        assert_eq!(cache.loading_session().await, None);
        let active = cache.active_session().await.unwrap();
        assert_eq!(active_bodies(&active), vec!["cached".to_string()]);
        assert_eq!(
            cache.session(SessionId::new(1)).await.unwrap().messages[0].body,
            "cached"
        );
    }

    #[tokio::test]
    async fn failed_load_for_another_source_keeps_list_and_drops_foreign_chat() {
        let backend = Arc::new(ScriptedBackend::default());
        backend.push_sessions(Ok(vec![summary(1, 1)]));
        backend.push_sessions(Err(backend_error("down")));
        let cache = cache_with(&backend);
        cache.load_sessions(DataSourceId::new(1)).await;
        cache.switch_session(SessionId::new(1)).await;

        cache.load_sessions(DataSourceId::new(2)).await;

        assert_eq!(cache.error().await.as_deref(), Some(LOAD_SESSIONS_FAILED));
        assert_eq!(cache.data_source_id().await, Some(DataSourceId::new(1)));
        assert_eq!(cache.sessions().await.len(), 1);
        assert!(cache.active_session().await.is_none());
    }

    #[tokio::test]
    async fn late_history_failure_after_switching_away_is_silent() {
        let backend = Arc::new(ScriptedBackend::default());
        backend.push_sessions(Ok(vec![summary(1, 1), summary(2, 1)]));
        let gate_a = backend.push_messages_gated(SessionId::new(1), Err(backend_error("timeout")));
        backend.push_messages(SessionId::new(2), Ok(vec![user_record(20, "from B")]));
        let cache = cache_with(&backend);
        cache.load_sessions(DataSourceId::new(1)).await;

        let (first, second) = tokio::join!(cache.switch_session(SessionId::new(1)), async {
            gate_a.entered.notified().await;
            let outcome = cache.switch_session(SessionId::new(2)).await;
            gate_a.release.notify_one();
            outcome
        });

        assert_eq!(first, SwitchOutcome::Superseded);
        assert_eq!(second, SwitchOutcome::Applied);
        assert_eq!(cache.error().await, None);
        let active = cache.active_session().await.unwrap();
        assert_eq!(active.committed_id(), Some(SessionId::new(2)));
        assert_eq!(active_bodies(&active), vec!["from B".to_string()]);
    }

    #[tokio::test]
    async fn message_load_failure_is_returned_and_recorded() {
        let backend = Arc::new(ScriptedBackend::default());
        backend.push_messages(SessionId::new(3), Err(backend_error("gone")));
        let cache = cache_with(&backend);

        let error = cache.load_session_messages(SessionId::new(3)).await.unwrap_err();
        assert_eq!(error.to_string(), "gone");
        assert_eq!(cache.error().await.as_deref(), Some(LOAD_MESSAGES_FAILED));
    }

    #[tokio::test]
    async fn switch_to_unknown_session_is_reported() {
        let backend = Arc::new(ScriptedBackend::default());
        let cache = cache_with(&backend);
        assert_eq!(
            cache.switch_session(SessionId::new(8)).await,
            SwitchOutcome::UnknownSession
        );
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn deleting_active_session_clears_it() {
        let backend = Arc::new(ScriptedBackend::default());
        backend.push_sessions(Ok(vec![summary(42, 1), summary(43, 1)]));
        let cache = cache_with(&backend);
        cache.load_sessions(DataSourceId::new(1)).await;
        cache.switch_session(SessionId::new(42)).await;

        backend.push_sessions(Ok(vec![summary(43, 1)]));
        cache.delete_session(SessionId::new(42)).await;

        assert!(cache.active_session().await.is_none());
        assert!(cache.session(SessionId::new(42)).await.is_none());
        assert!(backend.calls().contains(&Call::DeleteSession(SessionId::new(42))));
        assert_eq!(
            backend
                .calls()
                .iter()
                .filter(|call| **call == Call::ListSessions(DataSourceId::new(1)))
                .count(),
            2
        );
    }

    #[tokio::test]
    async fn failed_delete_keeps_session() {
        let backend = Arc::new(ScriptedBackend::default());
        backend.push_sessions(Ok(vec![summary(42, 1)]));
        backend.push_delete(Err(backend_error("forbidden")));
        let cache = cache_with(&backend);
        cache.load_sessions(DataSourceId::new(1)).await;

        cache.delete_session(SessionId::new(42)).await;
        assert_eq!(cache.error().await.as_deref(), Some(DELETE_SESSION_FAILED));
        assert!(cache.session(SessionId::new(42)).await.is_some());
    }

    #[tokio::test]
    async fn start_new_chat_clears_active_without_network() {
        let backend = Arc::new(ScriptedBackend::default());
        backend.push_sessions(Ok(vec![summary(1, 1)]));
        let cache = cache_with(&backend);
        cache.load_sessions(DataSourceId::new(1)).await;
        cache.switch_session(SessionId::new(1)).await;
        let calls_before = backend.calls().len();
        let mut events = cache.subscribe();

        cache.start_new_chat().await;

        assert!(cache.active_session().await.is_none());
        assert_eq!(cache.sessions().await.len(), 1);
        assert_eq!(backend.calls().len(), calls_before);
        assert_eq!(
            events.try_recv().unwrap(),
            CacheEvent::ActiveChanged { active: None }
        );
    }

    #[tokio::test]
    async fn local_updates_reach_list_and_active_session() {
        let backend = Arc::new(ScriptedBackend::default());
        backend.push_sessions(Ok(vec![summary(1, 1)]));
        let cache = cache_with(&backend);
        cache.load_sessions(DataSourceId::new(1)).await;
        cache.switch_session(SessionId::new(1)).await;

        assert!(
            cache
                .update_local_session(SessionRef::Committed(SessionId::new(1)), SessionPatch::titled("Revenue"))
                .await
        );
        assert_eq!(cache.session(SessionId::new(1)).await.unwrap().title, "Revenue");
        assert_eq!(cache.active_session().await.unwrap().title(), "Revenue");
    }

    #[tokio::test]
    async fn committing_pending_session_moves_its_messages() {
        let backend = Arc::new(ScriptedBackend::default());
        let cache = cache_with(&backend);
        let local_id = cache
            .begin_pending_session(DataSourceId::new(1), ChatMessage::user("How many users?"))
            .await;
        assert!(
            cache
                .add_message_to_session(SessionRef::Pending(local_id), ChatMessage::bot("## Error\n\nretry"))
                .await
        );

        let missing = cache
            .commit_pending_session(local_id, &AskResponse::default(), ChatMessage::bot("reply"))
            .await;
        assert!(missing.is_err());
        assert_eq!(
            cache.active_session().await.map(|active| active.session_ref()),
            Some(SessionRef::Pending(local_id))
        );

        let response = AskResponse {
            chat_session_id: Some(SessionId::new(42)),
            ..AskResponse::default()
        };
        let committed = cache
            .commit_pending_session(local_id, &response, ChatMessage::bot("reply"))
            .await
            .unwrap();

        assert_eq!(committed.id, SessionId::new(42));
        assert_eq!(committed.message_count(), 3);
        assert_eq!(committed.messages[0].sender, Sender::User);
        assert_eq!(committed.messages[2].body, "reply");
        assert_eq!(
            cache.active_session().await.and_then(|active| active.committed_id()),
            Some(SessionId::new(42))
        );
        assert_eq!(cache.sessions().await[0], committed);
    }

    #[tokio::test]
    async fn commit_requires_the_pending_session_to_be_active() {
        let backend = Arc::new(ScriptedBackend::default());
        let cache = cache_with(&backend);
        let local_id = cache
            .begin_pending_session(DataSourceId::new(1), ChatMessage::user("Question"))
            .await;
        cache.start_new_chat().await;

        let response = AskResponse {
            chat_session_id: Some(SessionId::new(9)),
            ..AskResponse::default()
        };
        let error = cache
            .commit_pending_session(local_id, &response, ChatMessage::bot("reply"))
            .await
            .unwrap_err();
        assert!(matches!(error, crate::SessionError::PendingSessionMissing { .. }));
        assert!(cache.sessions().await.is_empty());
    }
}
