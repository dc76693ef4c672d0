use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::ids::{DataSourceId, MessageId, SessionId};

/// Response wrapper shared by the chat backend, the engine and the embed service.
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope<T> {
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default)]
    pub message: Option<String>,
    pub data: Option<T>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub id: SessionId,
    #[serde(default)]
    pub conversation_name: Option<String>,
    #[serde(default)]
    pub data_source_id: Option<DataSourceId>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub message_count: Option<u64>,
}

impl SessionSummary {
    pub fn new(id: SessionId, data_source_id: DataSourceId) -> Self {
        Self {
            id,
            conversation_name: None,
            data_source_id: Some(data_source_id),
            created_at: None,
            updated_at: None,
            message_count: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.conversation_name = Some(name.into());
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }

    pub fn with_message_count(mut self, message_count: u64) -> Self {
        self.message_count = Some(message_count);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum UserRole {
    User,
    Bot,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    pub id: MessageId,
    pub user_role: UserRole,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub sql: Option<String>,
    #[serde(default)]
    pub response_data: Option<Value>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub created_at: Option<DateTime<Utc>>,
}

impl MessageRecord {
    pub fn user(id: MessageId, question: impl Into<String>) -> Self {
        Self {
            id,
            user_role: UserRole::User,
            message: Some(question.into()),
            sql: None,
            response_data: None,
            created_at: None,
        }
    }

    pub fn bot(id: MessageId, sql: impl Into<String>, response_data: Value) -> Self {
        Self {
            id,
            user_role: UserRole::Bot,
            message: Some(sql.into()),
            sql: None,
            response_data: Some(response_data),
            created_at: None,
        }
    }
}

#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Bearer token issued by `/auth/login`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginToken {
    pub token: String,
    #[serde(default)]
    pub expires_in: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AskRequest {
    pub question: String,
    pub data_source_id: DataSourceId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_session_id: Option<SessionId>,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AskResponse {
    #[serde(default)]
    pub chat_session_id: Option<SessionId>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub sql: Option<String>,
    #[serde(default)]
    pub data: Option<Value>,
}

impl AskResponse {
    /// Generated SQL; older backends put it in `message`, newer ones in `sql`.
    pub fn sql_text(&self) -> &str {
        self.message
            .as_deref()
            .filter(|text| !text.trim().is_empty())
            .or(self.sql.as_deref())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DatabaseType {
    Postgresql,
    Mysql,
    Oracle,
}

impl DatabaseType {
    /// Lowercase driver name expected by the engine and embed services.
    pub fn driver_name(&self) -> &'static str {
        match self {
            Self::Postgresql => "postgresql",
            Self::Mysql => "mysql",
            Self::Oracle => "oracle",
        }
    }

    pub fn from_driver_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "postgresql" | "postgres" => Some(Self::Postgresql),
            "mysql" => Some(Self::Mysql),
            "oracle" => Some(Self::Oracle),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelationType {
    #[serde(rename = "OTM")]
    OneToMany,
    #[serde(rename = "MTO")]
    ManyToOne,
    #[serde(rename = "OTO")]
    OneToOne,
    #[serde(rename = "MTM")]
    ManyToMany,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnRelation {
    pub id: i64,
    pub table_identifier: String,
    pub to_column: String,
    #[serde(rename = "type")]
    pub relation_type: RelationType,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnDefinition {
    pub id: i64,
    pub column_identifier: String,
    pub column_type: String,
    #[serde(default)]
    pub column_description: Option<String>,
    #[serde(default)]
    pub is_primary_key: bool,
    #[serde(default)]
    pub relations: Vec<ColumnRelation>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableDefinition {
    pub id: i64,
    pub table_identifier: String,
    #[serde(default)]
    pub columns: Vec<ColumnDefinition>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSourceConfig {
    pub id: DataSourceId,
    pub database_type: DatabaseType,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub database_name: String,
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub collection_name: Option<String>,
    #[serde(default)]
    pub table_definitions: Vec<TableDefinition>,
}

impl DataSourceConfig {
    /// `host:port/database`, the address form the engine and embed services accept.
    pub fn address(&self) -> String {
        format!("{}:{}/{}", self.host, self.port, self.database_name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewDataSource {
    pub database_type: DatabaseType,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub database_name: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionPayload {
    pub url: String,
    pub username: String,
    pub password: String,
    #[serde(rename = "dbType")]
    pub db_type: String,
}

impl ConnectionPayload {
    pub fn from_config(config: &DataSourceConfig) -> Self {
        Self {
            url: config.address(),
            username: config.username.clone(),
            password: config.password.clone(),
            db_type: config.database_type.driver_name().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineQueryRequest<'a> {
    pub query: &'a str,
    pub connection_payload: &'a ConnectionPayload,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmbedQueryRequest<'a> {
    pub query: &'a str,
    #[serde(flatten)]
    pub connection: &'a ConnectionPayload,
}

fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(raw.as_ref().and_then(timestamp_from_value))
}

fn timestamp_from_value(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(text) => parse_timestamp(text),
        Value::Number(number) => number.as_i64().and_then(DateTime::from_timestamp_millis),
        _ => None,
    }
}

/// Parses RFC 3339 or a zone-less `YYYY-MM-DDTHH:MM:SS[.fff]`, the latter read as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }

    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}
