use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use querent_api::{AskRequest, ChatBackend, DataSourceId, SessionId};
use snafu::{OptionExt, ensure};
use tokio::sync::Mutex;

use super::cache::SessionCache;
use super::error::{
    EmptyQuestionSnafu, NoDataSourceSnafu, NothingToRetrySnafu, SessionError, SessionResult,
};
use super::ids::SessionRef;
use super::message::ChatMessage;
use super::session::{SessionPatch, pending_title};

#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    /// A committed session received its reply.
    Answered {
        session_id: SessionId,
        reply: ChatMessage,
    },
    /// The first question of a pending session created it on the backend.
    SessionCreated {
        session_id: SessionId,
        reply: ChatMessage,
    },
    /// The failure was appended to the conversation as an error reply.
    Failed { message: String },
}

#[derive(Debug, Clone)]
struct FailedQuestion {
    data_source_id: DataSourceId,
    question: String,
}

/// Resets the sending flag on every exit path.
struct SendingGuard<'a>(&'a AtomicBool);

impl Drop for SendingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Sends questions with an optimistic local echo and reconciles the backend reply.
pub struct MessageHandler {
    backend: Arc<dyn ChatBackend>,
    cache: Arc<SessionCache>,
    sending: AtomicBool,
    last_failed: Mutex<Option<FailedQuestion>>,
}

impl MessageHandler {
    pub fn new(backend: Arc<dyn ChatBackend>, cache: Arc<SessionCache>) -> Self {
        Self {
            backend,
            cache,
            sending: AtomicBool::new(false),
            last_failed: Mutex::new(None),
        }
    }

    pub fn cache(&self) -> &Arc<SessionCache> {
        &self.cache
    }

    pub fn is_sending(&self) -> bool {
        self.sending.load(Ordering::Acquire)
    }

    pub async fn send_message(
        &self,
        data_source_id: Option<DataSourceId>,
        question: &str,
    ) -> SessionResult<SendOutcome> {
        let question = question.trim();
        ensure!(
            !question.is_empty(),
            EmptyQuestionSnafu {
                stage: "send-message"
            }
        );
        let data_source_id = data_source_id.context(NoDataSourceSnafu {
            stage: "send-message",
        })?;

        self.sending.store(true, Ordering::Release);
        let _sending = SendingGuard(&self.sending);

        let user_message = ChatMessage::user(question);
        let target = match self.cache.active_session().await {
            Some(active) if active.data_source_id() == data_source_id => {
                let target = active.session_ref();
                self.cache.add_message_to_session(target, user_message).await;
                target
            }
            _ => SessionRef::Pending(
                self.cache
                    .begin_pending_session(data_source_id, user_message)
                    .await,
            ),
        };

        let request = AskRequest {
            question: question.to_string(),
            data_source_id,
            chat_session_id: target.committed_id(),
        };
        tracing::info!(session = %target, data_source_id = %data_source_id, "sending question");

        let response = match self.backend.ask(request).await {
            Ok(response) => response,
            Err(source) => {
                let error = SessionError::Backend {
                    stage: "send-message-ask",
                    source,
                };
                return Ok(self.fail(target, data_source_id, question, &error).await);
            }
        };

        let reply = ChatMessage::answer(response.sql_text(), response.data.as_ref());
        let outcome = match target {
            SessionRef::Committed(session_id) => {
                self.cache
                    .add_message_to_session(target, reply.clone())
                    .await;
                SendOutcome::Answered { session_id, reply }
            }
            SessionRef::Pending(local_id) => {
                match self
                    .cache
                    .commit_pending_session(local_id, &response, reply.clone())
                    .await
                {
                    Ok(session) => {
                        self.cache
                            .update_local_session(
                                SessionRef::Committed(session.id),
                                SessionPatch::titled(pending_title(question)),
                            )
                            .await;
                        SendOutcome::SessionCreated {
                            session_id: session.id,
                            reply,
                        }
                    }
                    Err(error @ SessionError::PendingSessionMissing { .. }) => {
                        // The user left the pending chat; surface the new session through the list.
                        tracing::info!(error = %error, "reply arrived after pending chat was left");
                        self.cache.load_sessions(data_source_id).await;
                        match response.chat_session_id {
                            Some(session_id) => SendOutcome::SessionCreated { session_id, reply },
                            None => {
                                return Ok(self.fail(target, data_source_id, question, &error).await);
                            }
                        }
                    }
                    Err(error) => {
                        return Ok(self.fail(target, data_source_id, question, &error).await);
                    }
                }
            }
        };

        *self.last_failed.lock().await = None;
        Ok(outcome)
    }

    /// Re-submits the last question that ended in an error reply.
    pub async fn retry_last(&self) -> SessionResult<SendOutcome> {
        let failed = self
            .last_failed
            .lock()
            .await
            .take()
            .context(NothingToRetrySnafu {
                stage: "retry-last",
            })?;
        tracing::info!(data_source_id = %failed.data_source_id, "retrying failed question");
        self.send_message(Some(failed.data_source_id), &failed.question)
            .await
    }

    pub async fn has_failed_question(&self) -> bool {
        self.last_failed.lock().await.is_some()
    }

    async fn fail(
        &self,
        target: SessionRef,
        data_source_id: DataSourceId,
        question: &str,
        error: &SessionError,
    ) -> SendOutcome {
        let message = error.to_string();
        tracing::warn!(session = %target, error = %message, "question failed");
        self.cache
            .add_message_to_session(target, ChatMessage::error(&message))
            .await;
        *self.last_failed.lock().await = Some(FailedQuestion {
            data_source_id,
            question: question.to_string(),
        });
        SendOutcome::Failed { message }
    }
}
