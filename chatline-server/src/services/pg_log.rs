use std::time::Duration;

use async_trait::async_trait;
use futures::{StreamExt, stream::BoxStream};
use shared::models::Message;
use sqlx::{PgPool, types::Json};
use tracing::{instrument, warn};

use super::durable_log::{DurableLog, LogError};

/// Durable log backed by the `chatline.message_log` table.
///
/// `log_offset` is a `BIGSERIAL`, so ordering by it reproduces append order.
#[derive(Debug, Clone)]
pub struct PgLog {
    pool: PgPool,
    write_timeout: Duration,
}

impl PgLog {
    #[must_use]
    pub const fn new(pool: PgPool, write_timeout: Duration) -> Self {
        Self {
            pool,
            write_timeout,
        }
    }
}

#[async_trait]
impl DurableLog for PgLog {
    #[instrument(name = "log.append", skip(self, message), err)]
    async fn append(&self, topic: &str, key: &str, message: &Message) -> Result<(), LogError> {
        let insert = sqlx::query(
            "INSERT INTO chatline.message_log (topic, conversation_key, payload) VALUES ($1, $2, $3)",
        )
        .bind(topic)
        .bind(key)
        .bind(Json(message))
        .execute(&self.pool);

        tokio::time::timeout(self.write_timeout, insert)
            .await
            .map_err(|_| LogError::TimedOut(self.write_timeout))??;
        Ok(())
    }

    fn scan(&self, topic: &str, keys: &[String]) -> BoxStream<'static, Message> {
        let pool = self.pool.clone();
        let topic = topic.to_string();
        let keys = keys.to_vec();

        Box::pin(async_stream::stream! {
            let mut rows = sqlx::query_as::<_, (i64, serde_json::Value)>(
                "SELECT log_offset, payload FROM chatline.message_log \
                 WHERE topic = $1 AND conversation_key = ANY($2) \
                 ORDER BY log_offset",
            )
            .bind(&topic)
            .bind(&keys)
            .fetch(&pool);

            while let Some(row) = rows.next().await {
                match row {
                    Ok((offset, payload)) => match serde_json::from_value::<Message>(payload) {
                        Ok(message) => yield message,
                        Err(err) => warn!(offset, error = %err, "skipping undecodable log record"),
                    },
                    Err(err) => {
                        warn!(error = %err, "durable log scan aborted");
                        break;
                    }
                }
            }
        })
    }
}
