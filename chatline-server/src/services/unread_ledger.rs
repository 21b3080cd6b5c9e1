use std::collections::BTreeMap;

use tracing::instrument;

use crate::store::{SharedStore, StoreResult};

fn ledger_key(receiver_id: &str) -> String {
    format!("user:unread:{receiver_id}")
}

/// Per-recipient unread tallies keyed by sender.
#[derive(Clone)]
pub struct UnreadLedger {
    store: SharedStore,
}

impl std::fmt::Debug for UnreadLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnreadLedger").finish_non_exhaustive()
    }
}

impl UnreadLedger {
    #[must_use]
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// Adds one unread message from `sender_id`; returns the new tally.
    #[instrument(name = "unread.increment", skip(self), err)]
    pub async fn increment(&self, receiver_id: &str, sender_id: &str) -> StoreResult<i64> {
        self.store
            .hash_incr(&ledger_key(receiver_id), sender_id, 1)
            .await
    }

    #[instrument(name = "unread.clear", skip(self), err)]
    pub async fn clear(&self, receiver_id: &str, sender_id: &str) -> StoreResult<()> {
        self.store.hash_del(&ledger_key(receiver_id), sender_id).await
    }

    pub async fn get_all(&self, receiver_id: &str) -> StoreResult<BTreeMap<String, i64>> {
        let counts = self.store.hash_get_all(&ledger_key(receiver_id)).await?;
        Ok(counts.into_iter().filter(|(_, count)| *count > 0).collect())
    }
}
