use querent_api::{ApiError, DataSourceId};
use snafu::Snafu;

use super::ids::LocalSessionId;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SessionError {
    #[snafu(display("{source}"))]
    Backend {
        stage: &'static str,
        source: ApiError,
    },
    #[snafu(display("local id '{raw}' is invalid for {id_type}"))]
    InvalidLocalId {
        stage: &'static str,
        id_type: &'static str,
        raw: String,
        source: uuid::Error,
    },
    #[snafu(display("No chat session ID in response"))]
    MissingSessionId { stage: &'static str },
    #[snafu(display("pending session {local_id} is no longer tracked"))]
    PendingSessionMissing {
        stage: &'static str,
        local_id: LocalSessionId,
    },
    #[snafu(display("question must not be empty"))]
    EmptyQuestion { stage: &'static str },
    #[snafu(display("select a data source before asking a question"))]
    NoDataSource { stage: &'static str },
    #[snafu(display("there is no failed question to retry"))]
    NothingToRetry { stage: &'static str },
    #[snafu(display("data source {id} is not in the directory"))]
    UnknownDataSource {
        stage: &'static str,
        id: DataSourceId,
    },
}

pub type SessionResult<T> = Result<T, SessionError>;
