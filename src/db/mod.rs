//! SQLite persistence for the portal.
//!
//! Tables are created on startup when missing; the repository methods are
//! split per resource across the submodules.

mod machines;
mod news;
mod outbox;
mod readings;
mod repository;
mod sensors;
mod tickets;
mod users;

pub use outbox::OutboundMail;
pub use repository::*;
pub use tickets::TicketReview;

use std::path::Path;
use std::time::Duration;

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};

const MAX_CONNECTIONS: u32 = 5;
const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

/// Open (or create) the database file and bring the schema up to date.
pub async fn init_database(db_path: &Path) -> Result<SqlitePool, sqlx::Error> {
    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }

    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(BUSY_TIMEOUT);

    let pool = SqlitePoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .connect_with(options)
        .await?;
    run_migrations(&pool).await?;

    tracing::debug!(path = ?db_path, "Database ready");
    Ok(pool)
}

/// Run database migrations.
async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            username TEXT NOT NULL UNIQUE,
            email TEXT,
            password_hash TEXT NOT NULL,
            grade TEXT NOT NULL DEFAULT 'Apprentice',
            points INTEGER NOT NULL DEFAULT 0,
            is_admin INTEGER NOT NULL DEFAULT 0,
            status TEXT NOT NULL DEFAULT 'pending',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sensors (
            id TEXT PRIMARY KEY,
            designation TEXT NOT NULL,
            required_grade TEXT NOT NULL DEFAULT 'Apprentice',
            supplier TEXT NOT NULL DEFAULT '',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS machines (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            main_pole TEXT NOT NULL,
            sub_pole TEXT NOT NULL DEFAULT '',
            status TEXT NOT NULL DEFAULT 'available',
            max_users INTEGER NOT NULL DEFAULT 1,
            current_users TEXT NOT NULL DEFAULT '[]',
            points_per_cycle INTEGER NOT NULL DEFAULT 10,
            cycle_duration_secs INTEGER NOT NULL DEFAULT 3600,
            available_sensors TEXT NOT NULL DEFAULT '[]',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            version INTEGER NOT NULL DEFAULT 1
        );
        "#,
    )
    .execute(pool)
    .await?;

    // Cycles and readings outlive their machine and user for history.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS cycles (
            id TEXT PRIMARY KEY,
            machine_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            started_at TEXT NOT NULL,
            ends_at TEXT NOT NULL,
            ended_at TEXT,
            points_awarded INTEGER NOT NULL DEFAULT 0
        );
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sensor_readings (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            machine_id TEXT NOT NULL,
            sensor_id TEXT NOT NULL,
            recorded_at TEXT NOT NULL,
            value REAL NOT NULL
        );
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS news (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            body TEXT NOT NULL DEFAULT '',
            author_id TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tickets (
            id TEXT PRIMARY KEY,
            requester_id TEXT NOT NULL,
            kind TEXT NOT NULL,
            request TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            comment TEXT,
            reviewed_by TEXT,
            created_at TEXT NOT NULL,
            reviewed_at TEXT
        );
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS mail_outbox (
            id TEXT PRIMARY KEY,
            recipient TEXT NOT NULL,
            sender TEXT NOT NULL,
            subject TEXT NOT NULL,
            body TEXT NOT NULL,
            created_at TEXT NOT NULL
        );
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes for common queries
    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_users_status ON users(status);
        CREATE INDEX IF NOT EXISTS idx_users_points ON users(points);
        CREATE INDEX IF NOT EXISTS idx_machines_name ON machines(name);
        CREATE INDEX IF NOT EXISTS idx_cycles_user ON cycles(user_id, started_at);
        CREATE INDEX IF NOT EXISTS idx_cycles_open ON cycles(ended_at, ends_at);
        CREATE INDEX IF NOT EXISTS idx_readings_lookup ON sensor_readings(machine_id, sensor_id, recorded_at);
        CREATE INDEX IF NOT EXISTS idx_tickets_requester ON tickets(requester_id, status);
        CREATE INDEX IF NOT EXISTS idx_news_created_at ON news(created_at);
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
