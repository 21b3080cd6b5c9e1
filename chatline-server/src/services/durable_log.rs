use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use futures::{StreamExt, stream::BoxStream};
use metrics::counter;
use shared::models::Message;
use thiserror::Error;
use tokio::{sync::RwLock, time::Instant};
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum LogError {
    #[error("durable log unavailable: {0}")]
    Unavailable(String),
    #[error("durable log write timed out after {0:?}")]
    TimedOut(Duration),
    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("durable log database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Append-only, replayable record of every accepted message.
#[async_trait]
pub trait DurableLog: Send + Sync {
    /// Appends one record under `key`. Returns only once the record is durable.
    async fn append(&self, topic: &str, key: &str, message: &Message) -> Result<(), LogError>;

    /// Every retained record of `topic` whose key is one of `keys`, oldest
    /// first. Records that fail to decode are skipped.
    fn scan(&self, topic: &str, keys: &[String]) -> BoxStream<'static, Message>;

    /// [`DurableLog::scan`] bounded by `budget`. When the budget lapses the
    /// stream ends with whatever was read so far.
    fn replay(&self, topic: &str, keys: &[String], budget: Duration) -> BoxStream<'static, Message> {
        let mut records = self.scan(topic, keys);
        let deadline = Instant::now() + budget;

        Box::pin(async_stream::stream! {
            loop {
                match tokio::time::timeout_at(deadline, records.next()).await {
                    Ok(Some(message)) => yield message,
                    Ok(None) => {
                        counter!("chatline_replay_total", "outcome" => "complete").increment(1);
                        break;
                    }
                    Err(_) => {
                        debug!(?budget, "replay budget exhausted; returning partial history");
                        counter!("chatline_replay_total", "outcome" => "deadline").increment(1);
                        break;
                    }
                }
            }
        })
    }
}

#[derive(Debug, Clone)]
struct Record {
    key: String,
    payload: String,
}

/// Process-local log: one append-ordered vector per topic.
#[derive(Debug)]
pub struct MemoryLog {
    topics: Arc<RwLock<HashMap<String, Vec<Record>>>>,
    available: AtomicBool,
}

impl Default for MemoryLog {
    fn default() -> Self {
        Self {
            topics: Arc::new(RwLock::new(HashMap::new())),
            available: AtomicBool::new(true),
        }
    }
}

impl MemoryLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends fail with [`LogError::Unavailable`] while the log is marked unavailable.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Appends an already encoded payload, bypassing message encoding.
    pub async fn append_raw(&self, topic: &str, key: &str, payload: impl Into<String>) {
        let mut topics = self.topics.write().await;
        topics.entry(topic.to_string()).or_default().push(Record {
            key: key.to_string(),
            payload: payload.into(),
        });
    }

    /// Number of records retained for `topic`.
    pub async fn len(&self, topic: &str) -> usize {
        self.topics.read().await.get(topic).map_or(0, Vec::len)
    }
}

#[async_trait]
impl DurableLog for MemoryLog {
    async fn append(&self, topic: &str, key: &str, message: &Message) -> Result<(), LogError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(LogError::Unavailable("memory log marked unavailable".into()));
        }
        let payload = serde_json::to_string(message)?;
        self.append_raw(topic, key, payload).await;
        Ok(())
    }

    fn scan(&self, topic: &str, keys: &[String]) -> BoxStream<'static, Message> {
        let topics = Arc::clone(&self.topics);
        let topic = topic.to_string();
        let keys = keys.to_vec();

        Box::pin(async_stream::stream! {
            let snapshot = {
                let guard = topics.read().await;
                matching(guard.get(&topic), &keys)
            };
            for record in snapshot {
                if let Some(message) = decode(&record) {
                    yield message;
                }
            }
        })
    }
}

fn matching(records: Option<&Vec<Record>>, keys: &[String]) -> Vec<Record> {
    records
        .map(|records| {
            records
                .iter()
                .filter(|record| keys.iter().any(|key| key == &record.key))
                .cloned()
                .collect()
        })
        .unwrap_or_default()
}

fn decode(record: &Record) -> Option<Message> {
    match serde_json::from_str::<Message>(&record.payload) {
        Ok(message) => Some(message),
        Err(err) => {
            warn!(key = %record.key, error = %err, "skipping undecodable log record");
            None
        }
    }
}
