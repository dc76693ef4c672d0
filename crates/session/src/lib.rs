//! Chat session state for Querent: the session cache, the message handler,
//! data-source selection and the direct engine query path.

pub mod cache;
pub mod data_sources;
pub mod direct;
pub mod error;
pub mod events;
pub mod export;
pub mod handler;
pub mod ids;
pub mod message;
pub mod render;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

pub use cache::{SessionCache, SwitchOutcome};
pub use data_sources::DataSourceDirectory;
pub use direct::DirectQueryRunner;
pub use error::{SessionError, SessionResult};
pub use events::CacheEvent;
pub use export::{latest_results, rows_to_csv};
pub use handler::{MessageHandler, SendOutcome};
pub use ids::{ChatMessageId, LocalMessageId, LocalSessionId, SessionRef};
pub use message::{ChatMessage, MessageMetadata, Sender};
pub use session::{ActiveSession, ChatSession, HistoryState, PendingSession, SessionPatch};
