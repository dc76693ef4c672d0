use std::future::Future;
use std::pin::Pin;

use serde_json::Value;

use super::error::ApiResult;
use super::ids::{DataSourceId, SessionId};
use super::types::{
    AskRequest, AskResponse, ConnectionPayload, Credentials, DataSourceConfig, LoginToken,
    MessageRecord, NewDataSource, SessionSummary,
};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Exchanges credentials for a bearer token that later calls carry.
pub trait AuthBackend: Send + Sync {
    fn login<'a>(&'a self, credentials: Credentials) -> BoxFuture<'a, ApiResult<LoginToken>>;
}

/// Chat endpoints the session cache depends on.
pub trait ChatBackend: Send + Sync {
    fn list_sessions<'a>(
        &'a self,
        data_source_id: DataSourceId,
    ) -> BoxFuture<'a, ApiResult<Vec<SessionSummary>>>;

    fn list_messages<'a>(
        &'a self,
        session_id: SessionId,
    ) -> BoxFuture<'a, ApiResult<Vec<MessageRecord>>>;

    fn ask<'a>(&'a self, request: AskRequest) -> BoxFuture<'a, ApiResult<AskResponse>>;

    fn delete_session<'a>(&'a self, session_id: SessionId) -> BoxFuture<'a, ApiResult<()>>;
}

/// Data-source management endpoints.
pub trait DataSourceBackend: Send + Sync {
    fn list_owned<'a>(&'a self) -> BoxFuture<'a, ApiResult<Vec<DataSourceConfig>>>;

    fn get<'a>(&'a self, data_source_id: DataSourceId)
    -> BoxFuture<'a, ApiResult<DataSourceConfig>>;

    fn create<'a>(&'a self, input: NewDataSource) -> BoxFuture<'a, ApiResult<()>>;

    fn test_connection<'a>(&'a self, data_source_id: DataSourceId) -> BoxFuture<'a, ApiResult<()>>;
}

/// Text-to-SQL engine plus the embed service that runs the generated SQL.
pub trait SqlEngine: Send + Sync {
    fn generate_sql<'a>(
        &'a self,
        question: &'a str,
        connection: &'a ConnectionPayload,
    ) -> BoxFuture<'a, ApiResult<String>>;

    fn execute<'a>(
        &'a self,
        sql: &'a str,
        connection: &'a ConnectionPayload,
    ) -> BoxFuture<'a, ApiResult<Value>>;
}
