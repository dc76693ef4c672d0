//! Scripted backends for cache, handler, directory and direct-query tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use querent_api::{
    ApiError, ApiResult, AskRequest, AskResponse, BoxFuture, ChatBackend, ConnectionPayload,
    DataSourceBackend, DataSourceConfig, DataSourceId, DatabaseType, MessageRecord,
    NewDataSource, SessionId, SessionSummary, SqlEngine,
};
use serde_json::Value;
use tokio::sync::Notify;

/// Lets a test observe that a call arrived and decide when it completes.
#[derive(Debug, Clone, Default)]
pub(crate) struct Gate {
    pub entered: Arc<Notify>,
    pub release: Arc<Notify>,
}

impl Gate {
    async fn pass(&self) {
        self.entered.notify_one();
        self.release.notified().await;
    }
}

struct Scripted<T> {
    result: ApiResult<T>,
    gate: Option<Gate>,
}

impl<T> Scripted<T> {
    fn ready(result: ApiResult<T>) -> Self {
        Self { result, gate: None }
    }

    fn gated(result: ApiResult<T>) -> (Self, Gate) {
        let gate = Gate::default();
        (
            Self {
                result,
                gate: Some(gate.clone()),
            },
            gate,
        )
    }

    async fn resolve(self) -> ApiResult<T> {
        if let Some(gate) = &self.gate {
            gate.pass().await;
        }
        self.result
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Call {
    ListSessions(DataSourceId),
    ListMessages(SessionId),
    Ask(AskRequest),
    DeleteSession(SessionId),
}

pub(crate) fn backend_error(message: &str) -> ApiError {
    ApiError::Backend {
        stage: "scripted",
        code: 1,
        message: message.to_string(),
    }
}

#[derive(Default)]
pub(crate) struct ScriptedBackend {
    sessions: Mutex<VecDeque<Scripted<Vec<SessionSummary>>>>,
    messages: Mutex<HashMap<SessionId, VecDeque<Scripted<Vec<MessageRecord>>>>>,
    asks: Mutex<VecDeque<Scripted<AskResponse>>>,
    deletes: Mutex<VecDeque<ApiResult<()>>>,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedBackend {
    pub fn push_sessions(&self, result: ApiResult<Vec<SessionSummary>>) {
        self.sessions.lock().unwrap().push_back(Scripted::ready(result));
    }

    pub fn push_sessions_gated(&self, result: ApiResult<Vec<SessionSummary>>) -> Gate {
        let (scripted, gate) = Scripted::gated(result);
        self.sessions.lock().unwrap().push_back(scripted);
        gate
    }

    pub fn push_messages(&self, session_id: SessionId, result: ApiResult<Vec<MessageRecord>>) {
        self.messages
            .lock()
            .unwrap()
            .entry(session_id)
            .or_default()
            .push_back(Scripted::ready(result));
    }

    pub fn push_messages_gated(
        &self,
        session_id: SessionId,
        result: ApiResult<Vec<MessageRecord>>,
    ) -> Gate {
        let (scripted, gate) = Scripted::gated(result);
        self.messages
            .lock()
            .unwrap()
            .entry(session_id)
            .or_default()
            .push_back(scripted);
        gate
    }

    pub fn push_ask(&self, result: ApiResult<AskResponse>) {
        self.asks.lock().unwrap().push_back(Scripted::ready(result));
    }

    pub fn push_delete(&self, result: ApiResult<()>) {
        self.deletes.lock().unwrap().push_back(result);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn message_fetches(&self, session_id: SessionId) -> usize {
        self.calls()
            .iter()
            .filter(|call| **call == Call::ListMessages(session_id))
            .count()
    }

    pub fn asks(&self) -> Vec<AskRequest> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Ask(request) => Some(request),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

impl ChatBackend for ScriptedBackend {
    fn list_sessions<'a>(
        &'a self,
        data_source_id: DataSourceId,
    ) -> BoxFuture<'a, ApiResult<Vec<SessionSummary>>> {
        Box::pin(async move {
            self.record(Call::ListSessions(data_source_id));
            let scripted = self.sessions.lock().unwrap().pop_front();
            match scripted {
                Some(scripted) => scripted.resolve().await,
                None => Ok(Vec::new()),
            }
        })
    }

    fn list_messages<'a>(
        &'a self,
        session_id: SessionId,
    ) -> BoxFuture<'a, ApiResult<Vec<MessageRecord>>> {
        Box::pin(async move {
            self.record(Call::ListMessages(session_id));
            let scripted = self
                .messages
                .lock()
                .unwrap()
                .get_mut(&session_id)
                .and_then(VecDeque::pop_front);
            match scripted {
                Some(scripted) => scripted.resolve().await,
                None => Ok(Vec::new()),
            }
        })
    }

    fn ask<'a>(&'a self, request: AskRequest) -> BoxFuture<'a, ApiResult<AskResponse>> {
        Box::pin(async move {
            self.record(Call::Ask(request));
            let scripted = self.asks.lock().unwrap().pop_front();
            match scripted {
                Some(scripted) => scripted.resolve().await,
                None => Err(backend_error("no scripted ask")),
            }
        })
    }

    fn delete_session<'a>(&'a self, session_id: SessionId) -> BoxFuture<'a, ApiResult<()>> {
        Box::pin(async move {
            self.record(Call::DeleteSession(session_id));
            let scripted = self.deletes.lock().unwrap().pop_front();
            scripted.unwrap_or(Ok(()))
        })
    }
}

pub(crate) fn data_source(id: i64, name: &str) -> DataSourceConfig {
    DataSourceConfig {
        id: DataSourceId::new(id),
        database_type: DatabaseType::Postgresql,
        name: name.to_string(),
        host: "db.internal".to_string(),
        port: 5432,
        database_name: name.to_string(),
        username: "reader".to_string(),
        password: "secret".to_string(),
        collection_name: None,
        table_definitions: Vec::new(),
    }
}

#[derive(Default)]
pub(crate) struct ScriptedDirectory {
    owned: Mutex<VecDeque<ApiResult<Vec<DataSourceConfig>>>>,
    creates: Mutex<Vec<NewDataSource>>,
    tests: Mutex<VecDeque<ApiResult<()>>>,
}

impl ScriptedDirectory {
    pub fn push_owned(&self, result: ApiResult<Vec<DataSourceConfig>>) {
        self.owned.lock().unwrap().push_back(result);
    }

    pub fn push_test(&self, result: ApiResult<()>) {
        self.tests.lock().unwrap().push_back(result);
    }

    pub fn created(&self) -> Vec<NewDataSource> {
        self.creates.lock().unwrap().clone()
    }
}

impl DataSourceBackend for ScriptedDirectory {
    fn list_owned<'a>(&'a self) -> BoxFuture<'a, ApiResult<Vec<DataSourceConfig>>> {
        Box::pin(async move {
            let scripted = self.owned.lock().unwrap().pop_front();
            scripted.unwrap_or_else(|| Ok(Vec::new()))
        })
    }

    fn get<'a>(
        &'a self,
        data_source_id: DataSourceId,
    ) -> BoxFuture<'a, ApiResult<DataSourceConfig>> {
        Box::pin(async move { Ok(data_source(data_source_id.get(), "fetched")) })
    }

    fn create<'a>(&'a self, input: NewDataSource) -> BoxFuture<'a, ApiResult<()>> {
        Box::pin(async move {
            self.creates.lock().unwrap().push(input);
            Ok(())
        })
    }

    fn test_connection<'a>(
        &'a self,
        _data_source_id: DataSourceId,
    ) -> BoxFuture<'a, ApiResult<()>> {
        Box::pin(async move {
            let scripted = self.tests.lock().unwrap().pop_front();
            scripted.unwrap_or(Ok(()))
        })
    }
}

#[derive(Default)]
pub(crate) struct ScriptedEngine {
    sql: Mutex<VecDeque<ApiResult<String>>>,
    results: Mutex<VecDeque<ApiResult<Value>>>,
    executed: Mutex<Vec<(String, ConnectionPayload)>>,
}

impl ScriptedEngine {
    pub fn push_sql(&self, result: ApiResult<String>) {
        self.sql.lock().unwrap().push_back(result);
    }

    pub fn push_result(&self, result: ApiResult<Value>) {
        self.results.lock().unwrap().push_back(result);
    }

    pub fn executed(&self) -> Vec<(String, ConnectionPayload)> {
        self.executed.lock().unwrap().clone()
    }
}

impl SqlEngine for ScriptedEngine {
    fn generate_sql<'a>(
        &'a self,
        _question: &'a str,
        _connection: &'a ConnectionPayload,
    ) -> BoxFuture<'a, ApiResult<String>> {
        Box::pin(async move {
            let scripted = self.sql.lock().unwrap().pop_front();
            scripted.unwrap_or_else(|| Err(backend_error("no scripted sql")))
        })
    }

    fn execute<'a>(
        &'a self,
        sql: &'a str,
        connection: &'a ConnectionPayload,
    ) -> BoxFuture<'a, ApiResult<Value>> {
        Box::pin(async move {
            self.executed
                .lock()
                .unwrap()
                .push((sql.to_string(), connection.clone()));
            let scripted = self.results.lock().unwrap().pop_front();
            scripted.unwrap_or(Ok(Value::Null))
        })
    }
}
