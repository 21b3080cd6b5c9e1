use std::sync::{Mutex, OnceLock};

use sqlx::PgPool;
use thiserror::Error;
use tracing::{debug, info};

/// Schema of the durable message log, applied in order at startup.
const STAGES: &[(ScriptStage, &str)] = &[
    (ScriptStage::Schema, "CREATE SCHEMA IF NOT EXISTS chatline"),
    (
        ScriptStage::Schema,
        "CREATE TABLE IF NOT EXISTS chatline.message_log (
            log_offset BIGSERIAL PRIMARY KEY,
            topic TEXT NOT NULL,
            conversation_key TEXT NOT NULL,
            payload JSONB NOT NULL,
            appended_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )",
    ),
    (
        ScriptStage::Indexes,
        "CREATE INDEX IF NOT EXISTS message_log_topic_key_idx
            ON chatline.message_log (topic, conversation_key, log_offset)",
    ),
];

#[derive(Debug, Clone, Copy)]
enum ScriptStage {
    Schema,
    Indexes,
}

impl ScriptStage {
    fn label(self) -> &'static str {
        match self {
            ScriptStage::Schema => "schema",
            ScriptStage::Indexes => "indexes",
        }
    }
}

impl std::fmt::Display for ScriptStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("database error in bootstrap stage '{stage}' (statement {index}): {source}")]
    Sql {
        stage: &'static str,
        index: usize,
        #[source]
        source: sqlx::Error,
    },
}

/// Create the message log schema if it does not exist yet.
pub async fn run(pool: &PgPool) -> Result<(), BootstrapError> {
    info!(statements = STAGES.len(), "running database bootstrap");

    let mut transaction = pool.begin().await.map_err(|source| BootstrapError::Sql {
        stage: "begin",
        index: 0,
        source,
    })?;

    for (index, (stage, sql)) in STAGES.iter().enumerate() {
        debug!(stage = %stage, index, "executing bootstrap statement");
        sqlx::query(sql)
            .execute(&mut *transaction)
            .await
            .map_err(|source| BootstrapError::Sql {
                stage: stage.label(),
                index,
                source,
            })?;
    }

    transaction
        .commit()
        .await
        .map_err(|source| BootstrapError::Sql {
            stage: "commit",
            index: STAGES.len(),
            source,
        })
}

/// Simple liveness check used during startup.
pub async fn ensure_liveness(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await.map(|_| ())
}

fn readiness_override() -> &'static Mutex<Option<Result<(), String>>> {
    static OVERRIDE: OnceLock<Mutex<Option<Result<(), String>>>> = OnceLock::new();
    OVERRIDE.get_or_init(|| Mutex::new(None))
}

/// Forces the outcome of [`ensure_readiness`]; `None` restores the real probe.
pub fn set_readiness_override(outcome: Option<Result<(), String>>) {
    if let Ok(mut guard) = readiness_override().lock() {
        *guard = outcome;
    }
}

/// Readiness probe: the message log table must be queryable.
pub async fn ensure_readiness(pool: &PgPool) -> Result<(), sqlx::Error> {
    let forced = readiness_override()
        .lock()
        .ok()
        .and_then(|guard| guard.clone());
    if let Some(outcome) = forced {
        return outcome.map_err(sqlx::Error::Protocol);
    }

    sqlx::query("SELECT 1 FROM chatline.message_log LIMIT 1")
        .execute(pool)
        .await
        .map(|_| ())
}
