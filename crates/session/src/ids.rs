use std::fmt;
use std::str::FromStr;

use querent_api::{MessageId, SessionId};
use snafu::ResultExt;
use uuid::Uuid;

use super::error::{InvalidLocalIdSnafu, SessionError, SessionResult};

// Local ids only ever live in this process; the prefix keeps them visibly distinct from server ids.
macro_rules! define_local_id {
    ($name:ident, $prefix:literal, $id_type:literal) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new_v7() -> Self {
                Self(Uuid::now_v7())
            }

            pub fn parse(raw: &str) -> SessionResult<Self> {
                let trimmed = raw.trim();
                let unprefixed = trimmed.strip_prefix($prefix).unwrap_or(trimmed);
                let parsed = Uuid::parse_str(unprefixed).context(InvalidLocalIdSnafu {
                    stage: "parse-local-id",
                    id_type: $id_type,
                    raw: raw.to_string(),
                })?;
                Ok(Self(parsed))
            }

            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(formatter, "{}{}", $prefix, self.0)
            }
        }

        impl FromStr for $name {
            type Err = SessionError;

            fn from_str(raw: &str) -> SessionResult<Self> {
                Self::parse(raw)
            }
        }
    };
}

define_local_id!(LocalSessionId, "temp-", "local-session-id");
define_local_id!(LocalMessageId, "msg-", "local-message-id");

/// Either kind of session an operation can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionRef {
    Pending(LocalSessionId),
    Committed(SessionId),
}

impl SessionRef {
    pub fn committed_id(&self) -> Option<SessionId> {
        match self {
            Self::Committed(id) => Some(*id),
            Self::Pending(_) => None,
        }
    }
}

impl fmt::Display for SessionRef {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending(id) => fmt::Display::fmt(id, formatter),
            Self::Committed(id) => fmt::Display::fmt(id, formatter),
        }
    }
}

impl From<SessionId> for SessionRef {
    fn from(value: SessionId) -> Self {
        Self::Committed(value)
    }
}

impl From<LocalSessionId> for SessionRef {
    fn from(value: LocalSessionId) -> Self {
        Self::Pending(value)
    }
}

/// Server-assigned id for loaded history, local id for messages created in this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChatMessageId {
    Server(MessageId),
    Local(LocalMessageId),
}

impl ChatMessageId {
    pub fn new_local() -> Self {
        Self::Local(LocalMessageId::new_v7())
    }
}

impl fmt::Display for ChatMessageId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Server(id) => fmt::Display::fmt(id, formatter),
            Self::Local(id) => fmt::Display::fmt(id, formatter),
        }
    }
}
