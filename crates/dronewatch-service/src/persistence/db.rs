//! Database connection and initialization.

use anyhow::{Context, Result};
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::info;

/// Database connection wrapper.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Get the underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close every pooled connection. Pending writes finish first.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Initialize the SQLite database.
///
/// Creates the database file if it doesn't exist, runs migrations,
/// and returns a connection pool. `":memory:"` opens a private in-memory
/// database; use a single connection with it, since every connection would
/// otherwise see its own empty database.
pub async fn init_database(db_path: &str, max_connections: u32) -> Result<Database> {
    let in_memory = db_path == ":memory:";
    let db_url = if in_memory {
        "sqlite::memory:".to_string()
    } else {
        if let Some(parent) = Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        format!("sqlite:{}?mode=rwc", db_path)
    };

    info!("Connecting to database: {}", db_path);

    let mut options = SqlitePoolOptions::new().max_connections(max_connections.max(1));
    if in_memory {
        // the database lives exactly as long as its connection
        options = options.idle_timeout(None).max_lifetime(None);
    }
    let pool = options.connect(&db_url).await?;

    run_migrations(&pool).await?;

    Ok(Database { pool })
}

const INIT_MIGRATION: &str = include_str!("../../migrations/001_init.sql");

/// Apply the schema. Every statement is idempotent, so this runs on each start.
async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    info!("Running database migrations...");

    let mut tx = pool.begin().await?;
    for statement in migration_statements(INIT_MIGRATION) {
        sqlx::query(&statement)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("migration statement failed: {statement}"))?;
    }
    tx.commit().await?;

    info!("Database migrations complete");
    Ok(())
}

/// Split a migration script into statements, dropping `--` comment lines.
fn migration_statements(script: &str) -> Vec<String> {
    script
        .split(';')
        .map(|chunk| {
            chunk
                .lines()
                .filter(|line| !line.trim_start().starts_with("--"))
                .collect::<Vec<_>>()
                .join("\n")
                .trim()
                .to_string()
        })
        .filter(|statement| !statement.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_init_database() {
        let db = init_database(":memory:", 1).await.unwrap();

        let result: (i32,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name IN ('drones', 'observations', 'no_fly_zones')",
        )
        .fetch_one(db.pool())
        .await
        .unwrap();

        assert_eq!(result.0, 3);
    }

    #[test]
    fn statements_skip_comments_and_blanks() {
        let statements = migration_statements("-- header\nCREATE TABLE a (x INTEGER);\n\n-- note\nCREATE INDEX i ON a(x);\n");
        assert_eq!(statements, vec!["CREATE TABLE a (x INTEGER)", "CREATE INDEX i ON a(x)"]);
    }

    #[tokio::test]
    async fn migrations_are_rerunnable() {
        let db = init_database(":memory:", 1).await.unwrap();
        run_migrations(db.pool()).await.unwrap();
    }
}
