use chrono::{DateTime, Utc};
use querent_api::{MessageRecord, UserRole};
use serde_json::Value;

use super::ids::ChatMessageId;
use super::render::{self, Row};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sender {
    User,
    Bot,
}

/// Query and result rows behind a rendered bot answer.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageMetadata {
    pub query: String,
    pub results: Vec<Row>,
    pub row_count: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub id: ChatMessageId,
    pub body: String,
    pub sender: Sender,
    pub created_at: DateTime<Utc>,
    pub metadata: Option<MessageMetadata>,
}

impl ChatMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self::local(Sender::User, text.into())
    }

    pub fn bot(body: impl Into<String>) -> Self {
        Self::local(Sender::Bot, body.into())
    }

    /// Bot reply for an ask round trip.
    pub fn answer(sql: &str, data: Option<&Value>) -> Self {
        let (body, metadata) = answer_parts(sql, data);
        Self::bot(body).with_metadata(metadata)
    }

    pub fn error(message: &str) -> Self {
        Self::bot(render::error_body(message))
    }

    pub fn direct_answer(sql: &str, data: &Value) -> Self {
        let results = render::rows_from_value(data).unwrap_or_default();
        let metadata = MessageMetadata {
            query: sql.trim().to_string(),
            row_count: results.len(),
            results,
        };
        Self::bot(render::direct_results_body(sql, data)).with_metadata(metadata)
    }

    pub fn direct_error(error: &str) -> Self {
        Self::bot(render::direct_error_body(error))
    }

    /// Converts stored history; bot bodies are rebuilt from the stored SQL and result data.
    pub fn from_record(record: MessageRecord) -> Self {
        let id = ChatMessageId::Server(record.id);
        let created_at = record.created_at.unwrap_or_else(Utc::now);
        match record.user_role {
            UserRole::User => Self {
                id,
                body: record.message.unwrap_or_default(),
                sender: Sender::User,
                created_at,
                metadata: None,
            },
            UserRole::Bot => {
                let sql = record
                    .message
                    .as_deref()
                    .filter(|text| !text.trim().is_empty())
                    .or(record.sql.as_deref())
                    .unwrap_or_default();
                let (body, metadata) = answer_parts(sql, record.response_data.as_ref());
                Self {
                    id,
                    body,
                    sender: Sender::Bot,
                    created_at,
                    metadata: Some(metadata),
                }
            }
        }
    }

    pub fn is_error(&self) -> bool {
        self.sender == Sender::Bot && self.body.starts_with("## Error")
    }

    fn local(sender: Sender, body: String) -> Self {
        Self {
            id: ChatMessageId::new_local(),
            body,
            sender,
            created_at: Utc::now(),
            metadata: None,
        }
    }

    fn with_metadata(mut self, metadata: MessageMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

fn answer_parts(sql: &str, data: Option<&Value>) -> (String, MessageMetadata) {
    let payload = render::normalize_payload(data);
    let results = render::rows_from_value(&payload).unwrap_or_default();
    let body = render::answer_body(sql, &results);
    let metadata = MessageMetadata {
        query: sql.trim().to_string(),
        row_count: results.len(),
        results,
    };
    (body, metadata)
}
