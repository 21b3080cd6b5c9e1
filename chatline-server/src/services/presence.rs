use std::time::Duration;

use chrono::Utc;
use tracing::{instrument, warn};

use crate::store::{SharedStore, StoreResult};

fn online_key(user_id: &str) -> String {
    format!("user:online:{user_id}")
}

fn activity_key(user_id: &str) -> String {
    format!("user:lastactive:{user_id}")
}

/// TTL-backed online marker and last-activity timestamp per user.
#[derive(Clone)]
pub struct Presence {
    store: SharedStore,
    online_ttl: Duration,
    activity_ttl: Duration,
}

impl std::fmt::Debug for Presence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Presence")
            .field("online_ttl", &self.online_ttl)
            .field("activity_ttl", &self.activity_ttl)
            .finish_non_exhaustive()
    }
}

impl Presence {
    #[must_use]
    pub fn new(store: SharedStore, online_ttl: Duration, activity_ttl: Duration) -> Self {
        Self {
            store,
            online_ttl,
            activity_ttl,
        }
    }

    /// Marks the user online for one TTL period.
    #[instrument(name = "presence.set_online", skip(self), err)]
    pub async fn set_online(&self, user_id: &str) -> StoreResult<()> {
        self.store
            .set_with_ttl(&online_key(user_id), "1".to_string(), self.online_ttl)
            .await
    }

    #[instrument(name = "presence.set_offline", skip(self), err)]
    pub async fn set_offline(&self, user_id: &str) -> StoreResult<()> {
        self.store.delete(&online_key(user_id)).await
    }

    pub async fn is_online(&self, user_id: &str) -> StoreResult<bool> {
        Ok(self.store.get(&online_key(user_id)).await?.is_some())
    }

    /// Records the current time as the user's last activity. Failures are logged only.
    pub async fn touch_activity(&self, user_id: &str) {
        let now = Utc::now().timestamp().to_string();
        if let Err(err) = self
            .store
            .set_with_ttl(&activity_key(user_id), now, self.activity_ttl)
            .await
        {
            warn!(user_id, error = %err, "failed to record user activity");
        }
    }

    /// Unix seconds of the user's last recorded activity, if still retained.
    pub async fn last_activity(&self, user_id: &str) -> StoreResult<Option<i64>> {
        let value = self.store.get(&activity_key(user_id)).await?;
        Ok(value.and_then(|raw| raw.parse().ok()))
    }
}
