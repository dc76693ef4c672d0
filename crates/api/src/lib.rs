//! Wire layer for the Querent chat backend, the SQL engine and the embed query service.

pub mod backend;
pub mod endpoints;
pub mod error;
pub mod http;
pub mod ids;
pub mod types;

pub use backend::{AuthBackend, BoxFuture, ChatBackend, DataSourceBackend, SqlEngine};
pub use error::{ApiError, ApiResult};
pub use http::{BackendConfig, EngineConfig, HttpBackend, HttpEngine};
pub use ids::{DataSourceId, MessageId, SessionId};
pub use types::{
    AskRequest, AskResponse, ConnectionPayload, Credentials, DataSourceConfig, DatabaseType,
    LoginToken, MessageRecord, NewDataSource, SessionSummary, UserRole, parse_timestamp,
};
