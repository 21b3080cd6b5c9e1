//! Message delivery and history services.
pub mod cache_store;
pub mod connection_registry;
pub mod dispatcher;
pub mod durable_log;
pub mod heartbeat;
pub mod history;
pub mod ingress;
pub mod pg_log;
pub mod presence;
pub mod unread_ledger;

pub use cache_store::ConversationCache;
pub use connection_registry::{ConnectionHandle, ConnectionRegistry};
pub use dispatcher::{DispatchError, DispatchReceipt, Dispatcher};
pub use durable_log::{DurableLog, LogError, MemoryLog};
pub use history::HistoryResolver;
pub use ingress::ValidationError;
pub use pg_log::PgLog;
pub use presence::Presence;
pub use unread_ledger::UnreadLedger;

#[cfg(test)]
pub(crate) mod testing;

#[cfg(test)]
mod dispatcher_tests;
