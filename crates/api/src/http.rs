use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;

use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde_json::Value;
use snafu::{OptionExt, ResultExt};

use super::backend::{AuthBackend, BoxFuture, ChatBackend, DataSourceBackend, SqlEngine};
use super::endpoints::{self, join_url};
use super::error::{
    ApiResult, BackendSnafu, BuildClientSnafu, DecodeSnafu, HttpStatusSnafu, MissingDataSnafu,
    TransportSnafu,
};
use super::ids::{DataSourceId, SessionId};
use super::types::{
    AskRequest, AskResponse, ConnectionPayload, Credentials, DataSourceConfig, EmbedQueryRequest,
    EngineQueryRequest, Envelope, LoginToken, MessageRecord, NewDataSource, SessionSummary,
};

pub const DEFAULT_API_PREFIX: &str = "/api/v1";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const FALLBACK_ERROR_MESSAGE: &str = "Something went wrong";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendConfig {
    pub base_url: String,
    pub api_prefix: String,
    pub access_token: Option<String>,
    pub timeout: Duration,
}

impl BackendConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim().to_string(),
            api_prefix: DEFAULT_API_PREFIX.to_string(),
            access_token: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_api_prefix(mut self, api_prefix: impl Into<String>) -> Self {
        self.api_prefix = api_prefix.into();
        self
    }

    pub fn with_access_token(mut self, access_token: Option<String>) -> Self {
        self.access_token = access_token.filter(|token| !token.trim().is_empty());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn url(&self, path: &str) -> String {
        join_url(&self.base_url, &self.api_prefix, path)
    }
}

/// `reqwest` client for the auth, chat and data-source endpoints.
///
/// The bearer token starts from [`BackendConfig::access_token`] and is replaced by a successful login.
#[derive(Debug)]
pub struct HttpBackend {
    client: Client,
    config: BackendConfig,
    access_token: ArcSwapOption<String>,
}

impl HttpBackend {
    pub fn new(config: BackendConfig) -> ApiResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .context(BuildClientSnafu {
                stage: "http-backend-new",
            })?;
        let access_token = ArcSwapOption::from(config.access_token.clone().map(Arc::new));
        Ok(Self {
            client,
            config,
            access_token,
        })
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    pub fn access_token(&self) -> Option<String> {
        self.access_token.load_full().map(|token| String::clone(&token))
    }

    pub fn set_access_token(&self, token: Option<String>) {
        let token = token.filter(|token| !token.trim().is_empty());
        self.access_token.store(token.map(Arc::new));
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match self.access_token.load_full() {
            Some(token) => builder.bearer_auth(token.as_str()),
            None => builder,
        }
    }

    async fn call<T: DeserializeOwned>(
        &self,
        stage: &'static str,
        url: String,
        builder: RequestBuilder,
    ) -> ApiResult<Option<T>> {
        send_envelope(stage, url, self.authorize(builder)).await
    }
}

impl AuthBackend for HttpBackend {
    fn login<'a>(&'a self, credentials: Credentials) -> BoxFuture<'a, ApiResult<LoginToken>> {
        Box::pin(async move {
            let url = self.config.url(endpoints::AUTH_LOGIN);
            let builder = self.client.post(&url).json(&credentials);
            let token = send_envelope::<LoginToken>("login", url.clone(), builder)
                .await?
                .context(MissingDataSnafu { stage: "login", url })?;
            tracing::info!(username = %credentials.username, "logged in");
            self.set_access_token(Some(token.token.clone()));
            Ok(token)
        })
    }
}

impl ChatBackend for HttpBackend {
    fn list_sessions<'a>(
        &'a self,
        data_source_id: DataSourceId,
    ) -> BoxFuture<'a, ApiResult<Vec<SessionSummary>>> {
        Box::pin(async move {
            let url = self.config.url(&endpoints::chat_sessions(data_source_id));
            let sessions = self
                .call::<Vec<SessionSummary>>("list-sessions", url.clone(), self.client.get(&url))
                .await?;
            Ok(sessions.unwrap_or_default())
        })
    }

    fn list_messages<'a>(
        &'a self,
        session_id: SessionId,
    ) -> BoxFuture<'a, ApiResult<Vec<MessageRecord>>> {
        Box::pin(async move {
            let url = self.config.url(&endpoints::chat_messages(session_id));
            let messages = self
                .call::<Vec<MessageRecord>>("list-messages", url.clone(), self.client.get(&url))
                .await?;
            Ok(messages.unwrap_or_default())
        })
    }

    fn ask<'a>(&'a self, request: AskRequest) -> BoxFuture<'a, ApiResult<AskResponse>> {
        Box::pin(async move {
            let url = self.config.url(endpoints::CHAT_ASK);
            let builder = self.client.post(&url).json(&request);
            self.call::<AskResponse>("ask", url.clone(), builder)
                .await?
                .context(MissingDataSnafu { stage: "ask", url })
        })
    }

    fn delete_session<'a>(&'a self, session_id: SessionId) -> BoxFuture<'a, ApiResult<()>> {
        Box::pin(async move {
            let url = self.config.url(&endpoints::chat_session(session_id));
            self.call::<Value>("delete-session", url.clone(), self.client.delete(&url))
                .await?;
            Ok(())
        })
    }
}

impl DataSourceBackend for HttpBackend {
    fn list_owned<'a>(&'a self) -> BoxFuture<'a, ApiResult<Vec<DataSourceConfig>>> {
        Box::pin(async move {
            let url = self.config.url(endpoints::DATA_SOURCES_OWNED);
            let sources = self
                .call::<Vec<DataSourceConfig>>(
                    "list-owned-data-sources",
                    url.clone(),
                    self.client.get(&url),
                )
                .await?;
            Ok(sources.unwrap_or_default())
        })
    }

    fn get<'a>(
        &'a self,
        data_source_id: DataSourceId,
    ) -> BoxFuture<'a, ApiResult<DataSourceConfig>> {
        Box::pin(async move {
            let url = self.config.url(&endpoints::data_source(data_source_id));
            self.call::<DataSourceConfig>("get-data-source", url.clone(), self.client.get(&url))
                .await?
                .context(MissingDataSnafu {
                    stage: "get-data-source",
                    url,
                })
        })
    }

    fn create<'a>(&'a self, input: NewDataSource) -> BoxFuture<'a, ApiResult<()>> {
        Box::pin(async move {
            let url = self.config.url(endpoints::DATA_SOURCES);
            let builder = self.client.post(&url).json(&input);
            self.call::<Value>("create-data-source", url.clone(), builder)
                .await?;
            Ok(())
        })
    }

    fn test_connection<'a>(
        &'a self,
        data_source_id: DataSourceId,
    ) -> BoxFuture<'a, ApiResult<()>> {
        Box::pin(async move {
            let url = self
                .config
                .url(&endpoints::data_source_test_connection(data_source_id));
            self.call::<Value>("test-connection", url.clone(), self.client.post(&url))
                .await?;
            Ok(())
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub engine_url: String,
    pub embed_url: String,
    pub timeout: Duration,
}

impl EngineConfig {
    pub fn new(engine_url: impl Into<String>, embed_url: impl Into<String>) -> Self {
        Self {
            engine_url: engine_url.into().trim().to_string(),
            embed_url: embed_url.into().trim().to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// `reqwest` client for the engine `/query` call and the embed query runner.
#[derive(Debug, Clone)]
pub struct HttpEngine {
    client: Client,
    config: EngineConfig,
}

impl HttpEngine {
    pub fn new(config: EngineConfig) -> ApiResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .context(BuildClientSnafu {
                stage: "http-engine-new",
            })?;
        Ok(Self { client, config })
    }
}

impl SqlEngine for HttpEngine {
    fn generate_sql<'a>(
        &'a self,
        question: &'a str,
        connection: &'a ConnectionPayload,
    ) -> BoxFuture<'a, ApiResult<String>> {
        Box::pin(async move {
            let url = join_url(&self.config.engine_url, "", endpoints::ENGINE_QUERY);
            let builder = self.client.post(&url).json(&EngineQueryRequest {
                query: question,
                connection_payload: connection,
            });
            let data = send_envelope::<Value>("engine-generate-sql", url.clone(), builder)
                .await?
                .context(MissingDataSnafu {
                    stage: "engine-generate-sql",
                    url,
                })?;

            Ok(match data {
                Value::String(sql) => sql,
                other => other.to_string(),
            })
        })
    }

    fn execute<'a>(
        &'a self,
        sql: &'a str,
        connection: &'a ConnectionPayload,
    ) -> BoxFuture<'a, ApiResult<Value>> {
        Box::pin(async move {
            let url = join_url(&self.config.embed_url, "", endpoints::EMBED_DB_QUERY);
            let builder = self.client.post(&url).json(&EmbedQueryRequest {
                query: sql,
                connection,
            });
            let data = send_envelope::<Value>("embed-execute", url, builder).await?;
            Ok(data.unwrap_or(Value::Null))
        })
    }
}

async fn send_envelope<T: DeserializeOwned>(
    stage: &'static str,
    url: String,
    builder: RequestBuilder,
) -> ApiResult<Option<T>> {
    tracing::debug!(stage, url = %url, "sending backend request");

    let response = builder.send().await.context(TransportSnafu {
        stage,
        url: url.clone(),
    })?;
    let status = response.status().as_u16();
    let body = response.text().await.context(TransportSnafu {
        stage,
        url: url.clone(),
    })?;

    decode_envelope(stage, &url, status, &body)
}

/// Applies the `{code, message, data}` contract to one raw response.
pub(crate) fn decode_envelope<T: DeserializeOwned>(
    stage: &'static str,
    url: &str,
    status: u16,
    body: &str,
) -> ApiResult<Option<T>> {
    if !(200..300).contains(&status) {
        return HttpStatusSnafu {
            stage,
            url,
            status,
            message: error_message_from_body(body),
        }
        .fail();
    }

    // Bodiless success (e.g. 204 on delete) carries no envelope.
    if body.trim().is_empty() {
        return Ok(None);
    }

    let envelope: Envelope<T> =
        serde_json::from_str(body).context(DecodeSnafu { stage, url })?;
    match envelope.code {
        Some(0) => Ok(envelope.data),
        code => BackendSnafu {
            stage,
            code: code.unwrap_or(-1),
            message: envelope
                .message
                .filter(|message| !message.trim().is_empty())
                .unwrap_or_else(|| FALLBACK_ERROR_MESSAGE.to_string()),
        }
        .fail(),
    }
}

fn error_message_from_body(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| {
            value
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .filter(|message| !message.trim().is_empty())
        .unwrap_or_else(|| FALLBACK_ERROR_MESSAGE.to_string())
}
