// Repository layer for database operations

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::types::Json;
use sqlx::QueryBuilder;
use std::path::Path;

use crate::models::*;

const EVENT_COLUMNS: &str =
    "id, event_type, application, version, platform, user_id, session_id, value, time";

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if missing) the database file at `path`.
    pub async fn connect(path: &str) -> Result<Self> {
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create database directory {:?}", parent))?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options)
            .await
            .with_context(|| format!("Failed to open database at {}", path))?;

        Ok(Self { pool })
    }

    /// Open an in-memory database (for testing). Capped at one connection:
    /// each in-memory connection is otherwise an isolated database.
    pub async fn connect_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .context("Failed to open in-memory database")?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create the event table and its indexes if absent. Safe to run on
    /// every process start.
    pub async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS event (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                event_type TEXT NOT NULL,
                application TEXT NOT NULL,
                version TEXT NOT NULL,
                platform TEXT NOT NULL,
                user_id TEXT NOT NULL,
                session_id TEXT NOT NULL,
                value TEXT NOT NULL,
                time TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        for column in ["event_type", "application", "version", "platform", "user_id"] {
            sqlx::query(&format!(
                "CREATE INDEX IF NOT EXISTS ix_event_{column} ON event ({column})"
            ))
            .execute(&self.pool)
            .await?;
        }

        tracing::debug!("event schema ready");
        Ok(())
    }

    pub async fn insert_event(&self, input: NewEvent) -> Result<EventRow> {
        let row = sqlx::query_as::<_, EventRow>(
            r#"
            INSERT INTO event (event_type, application, version, platform, user_id, session_id, value, time)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id, event_type, application, version, platform, user_id, session_id, value, time
            "#,
        )
        .bind(&input.event_type)
        .bind(&input.application)
        .bind(&input.version)
        .bind(&input.platform)
        .bind(&input.user_id)
        .bind(&input.session_id)
        .bind(Json(&input.value))
        .bind(input.time)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    /// Insert a batch as a single multi-row statement: either every row
    /// lands or none do.
    pub async fn insert_events(&self, inputs: Vec<NewEvent>) -> Result<u64> {
        if inputs.is_empty() {
            return Ok(0);
        }

        let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(
            "INSERT INTO event (event_type, application, version, platform, user_id, session_id, value, time) ",
        );
        builder.push_values(inputs, |mut b, input| {
            b.push_bind(input.event_type)
                .push_bind(input.application)
                .push_bind(input.version)
                .push_bind(input.platform)
                .push_bind(input.user_id)
                .push_bind(input.session_id)
                .push_bind(Json(input.value))
                .push_bind(input.time);
        });

        let result = builder.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    pub async fn get_event(&self, id: i64) -> Result<Option<EventRow>> {
        let row = sqlx::query_as::<_, EventRow>(&format!(
            "SELECT {EVENT_COLUMNS} FROM event WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn count_events(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM event")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }
}
