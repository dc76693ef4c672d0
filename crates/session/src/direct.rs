use std::sync::Arc;

use querent_api::{ConnectionPayload, DataSourceConfig, SqlEngine};
use snafu::{ResultExt, ensure};

use super::error::{BackendSnafu, EmptyQuestionSnafu, SessionResult};
use super::message::ChatMessage;

/// Asks the engine for SQL and runs it through the embed service, bypassing chat history.
pub struct DirectQueryRunner {
    engine: Arc<dyn SqlEngine>,
}

impl DirectQueryRunner {
    pub fn new(engine: Arc<dyn SqlEngine>) -> Self {
        Self { engine }
    }

    /// Only an empty question is an error; engine failures come back as an error reply.
    pub async fn run(
        &self,
        question: &str,
        data_source: &DataSourceConfig,
    ) -> SessionResult<ChatMessage> {
        let question = question.trim();
        ensure!(
            !question.is_empty(),
            EmptyQuestionSnafu {
                stage: "direct-query"
            }
        );

        let connection = ConnectionPayload::from_config(data_source);
        match self.generate_and_execute(question, &connection).await {
            Ok(reply) => Ok(reply),
            Err(error) => {
                tracing::warn!(data_source_id = %data_source.id, error = %error, "direct query failed");
                Ok(ChatMessage::direct_error(&error.to_string()))
            }
        }
    }

    async fn generate_and_execute(
        &self,
        question: &str,
        connection: &ConnectionPayload,
    ) -> SessionResult<ChatMessage> {
        let generated = self
            .engine
            .generate_sql(question, connection)
            .await
            .context(BackendSnafu {
                stage: "direct-generate-sql",
            })?;
        let sql = strip_statement_terminator(&generated);
        tracing::debug!(sql = %sql, "engine generated sql");

        let data = self
            .engine
            .execute(sql, connection)
            .await
            .context(BackendSnafu {
                stage: "direct-execute",
            })?;
        Ok(ChatMessage::direct_answer(sql, &data))
    }
}

fn strip_statement_terminator(sql: &str) -> &str {
    let sql = sql.trim();
    sql.strip_suffix(';').unwrap_or(sql)
}
