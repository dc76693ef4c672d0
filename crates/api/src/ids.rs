use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use snafu::ResultExt;

use super::error::{ApiError, ApiResult, InvalidIdSnafu};

/// Backend ids arrive as JSON numbers from list endpoints and as strings from `/chat/ask`.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Number(i64),
    Text(String),
}

// Macro keeps all backend id wrappers structurally identical.
macro_rules! define_backend_id {
    ($name:ident, $id_type:literal) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub i64);

        impl $name {
            pub const fn new(raw: i64) -> Self {
                Self(raw)
            }

            pub fn parse(raw: &str) -> ApiResult<Self> {
                let parsed = raw
                    .trim()
                    .parse::<i64>()
                    .context(InvalidIdSnafu {
                        stage: "parse-backend-id",
                        id_type: $id_type,
                        raw: raw.to_string(),
                    })?;
                Ok(Self(parsed))
            }

            pub fn get(&self) -> i64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(formatter, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                Self::new(value)
            }
        }

        impl FromStr for $name {
            type Err = ApiError;

            fn from_str(raw: &str) -> ApiResult<Self> {
                Self::parse(raw)
            }
        }

        impl Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: Serializer,
            {
                serializer.serialize_i64(self.0)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: Deserializer<'de>,
            {
                match RawId::deserialize(deserializer)? {
                    RawId::Number(value) => Ok(Self(value)),
                    RawId::Text(text) => text
                        .trim()
                        .parse::<i64>()
                        .map(Self)
                        .map_err(|error: ParseIntError| {
                            serde::de::Error::custom(format!(
                                "invalid {} '{text}': {error}",
                                $id_type
                            ))
                        }),
                }
            }
        }
    };
}

define_backend_id!(DataSourceId, "data-source-id");
define_backend_id!(SessionId, "session-id");
define_backend_id!(MessageId, "message-id");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_accept_numbers_and_numeric_strings() {
        let from_number: SessionId = serde_json::from_str("42").unwrap();
        let from_text: SessionId = serde_json::from_str("\"42\"").unwrap();
        assert_eq!(from_number, SessionId::new(42));
        assert_eq!(from_text, SessionId::new(42));
        assert_eq!(serde_json::to_string(&from_text).unwrap(), "42");
    }

    #[test]
    fn non_numeric_ids_are_rejected() {
        assert!(serde_json::from_str::<DataSourceId>("\"temp-1\"").is_err());
        assert!(matches!(
            "abc".parse::<MessageId>(),
            Err(ApiError::InvalidId { id_type: "message-id", .. })
        ));
        assert_eq!(" 7 ".parse::<DataSourceId>().unwrap().get(), 7);
    }
}
