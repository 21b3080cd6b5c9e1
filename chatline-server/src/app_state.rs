use std::sync::Arc;

use shared::config::server::Config;

use crate::{
    services::{
        ConnectionRegistry, ConversationCache, Dispatcher, DurableLog, HistoryResolver, MemoryLog,
        Presence, UnreadLedger,
    },
    store::{MemoryStore, SharedStore},
};

/// Application state shared across all routes and live sessions.
#[derive(Debug, Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub dispatcher: Dispatcher,
    pub history: HistoryResolver,
    pub unread: UnreadLedger,
    pub presence: Presence,
    pub registry: Arc<ConnectionRegistry>,
    pub(crate) pool: Option<sqlx::PgPool>,
}

impl AppState {
    /// Wires every service over one key-value store and one durable log.
    #[must_use]
    pub fn new(
        config: Arc<Config>,
        store: SharedStore,
        log: Arc<dyn DurableLog>,
        pool: Option<sqlx::PgPool>,
    ) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let presence = Presence::new(
            Arc::clone(&store),
            config.presence.online_ttl(),
            config.presence.activity_ttl(),
        );
        let cache = ConversationCache::new(Arc::clone(&store), config.cache.capacity);
        let unread = UnreadLedger::new(store);

        let dispatcher = Dispatcher::new(
            Arc::clone(&log),
            config.durable_log.topic.clone(),
            cache.clone(),
            presence.clone(),
            Arc::clone(&registry),
            unread.clone(),
        );
        let history = HistoryResolver::new(
            log,
            config.durable_log.topic.clone(),
            config.durable_log.replay_timeout(),
            cache,
            unread.clone(),
            config.history.clone(),
        );

        Self {
            config,
            dispatcher,
            history,
            unread,
            presence,
            registry,
            pool,
        }
    }

    /// State backed entirely by process-local stores.
    #[must_use]
    pub fn in_memory(config: Config) -> Self {
        Self::new(
            Arc::new(config),
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryLog::new()),
            None,
        )
    }
}
