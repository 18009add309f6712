use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::info;

use crate::{
    context::Context,
    error::{FlowError, Result},
};

/// One in-flight conversation: explicit current step plus accumulated context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub flow_id: String,
    pub current_step_id: String,
    pub status_message: Option<String>,
    #[serde(skip)]
    pub context: Context,
}

impl Session {
    pub fn new_from_step(id: String, step_id: &str) -> Self {
        Self {
            id,
            flow_id: "default".to_string(),
            current_step_id: step_id.to_string(),
            status_message: None,
            context: Context::new(),
        }
    }
}

/// Keyed store of sessions. Every conversation lives behind its own key so
/// concurrent patients never share mutable state.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn save(&self, session: Session) -> Result<()>;
    async fn get(&self, id: &str) -> Result<Option<Session>>;
    async fn delete(&self, id: &str) -> Result<()>;
}

/// In-memory session store backed by a concurrent map.
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: Arc<DashMap<String, Session>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn save(&self, session: Session) -> Result<()> {
        self.sessions.insert(session.id.clone(), session);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Session>> {
        Ok(self.sessions.get(id).map(|e| e.clone()))
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.sessions.remove(id);
        Ok(())
    }
}

/// Postgres-backed session store. The context is persisted as a JSONB
/// snapshot so a session survives process restarts.
pub struct PostgresSessionStore {
    pool: PgPool,
}

impl PostgresSessionStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS dialog_sessions (
                id TEXT PRIMARY KEY,
                flow_id TEXT NOT NULL,
                current_step_id TEXT NOT NULL,
                status_message TEXT,
                context JSONB NOT NULL DEFAULT '{}'::jsonb,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
        )
        .execute(&pool)
        .await?;

        info!("connected to postgres session store");
        Ok(Self { pool })
    }
}

#[async_trait]
impl SessionStore for PostgresSessionStore {
    async fn save(&self, session: Session) -> Result<()> {
        let context = serde_json::to_value(session.context.snapshot())?;
        sqlx::query(
            r#"
            INSERT INTO dialog_sessions (id, flow_id, current_step_id, status_message, context, updated_at)
            VALUES ($1, $2, $3, $4, $5, now())
            ON CONFLICT (id) DO UPDATE SET
                flow_id = EXCLUDED.flow_id,
                current_step_id = EXCLUDED.current_step_id,
                status_message = EXCLUDED.status_message,
                context = EXCLUDED.context,
                updated_at = now()
            "#,
        )
        .bind(&session.id)
        .bind(&session.flow_id)
        .bind(&session.current_step_id)
        .bind(&session.status_message)
        .bind(context)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Session>> {
        let row = sqlx::query(
            "SELECT id, flow_id, current_step_id, status_message, context FROM dialog_sessions WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let context_value: Value = row.try_get("context").map_err(FlowError::Storage)?;
        let snapshot: BTreeMap<String, Value> = serde_json::from_value(context_value)?;

        Ok(Some(Session {
            id: row.try_get("id")?,
            flow_id: row.try_get("flow_id")?,
            current_step_id: row.try_get("current_step_id")?,
            status_message: row.try_get("status_message")?,
            context: Context::from_snapshot(snapshot),
        }))
    }

    async fn delete(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM dialog_sessions WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
