pub mod access;
pub mod anime;
pub mod app;
pub mod auth;
pub mod config;
pub mod error;
pub mod games;
pub mod model;
pub mod schema;
pub mod users;

use std::path::Path;

use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, CustomizeConnection, Pool};
use diesel::SqliteConnection;
use tracing::info;

pub use app::{build_router, AppState};
pub use config::Config;
pub use error::AppError;

pub type DbPool = Pool<ConnectionManager<SqliteConnection>>;

// Enable WAL mode to allow concurrent reads during writes, and a timeout to retry locked
// operations. Foreign keys make a vote against a deleted event fail instead of dangling.
const CONNECTION_PRAGMAS: &str = "PRAGMA foreign_keys = ON; \
    PRAGMA journal_mode = WAL; \
    PRAGMA synchronous = NORMAL; \
    PRAGMA busy_timeout = 10000;";

const CREATE_TABLES: &str = "
    CREATE TABLE IF NOT EXISTS users (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        username TEXT NOT NULL UNIQUE,
        email TEXT NOT NULL UNIQUE,
        password TEXT NOT NULL,
        created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
        updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
    );
    CREATE TABLE IF NOT EXISTS anime (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        title TEXT NOT NULL,
        image TEXT NOT NULL,
        image_url TEXT,
        rating REAL NOT NULL,
        year INTEGER NOT NULL,
        review TEXT,
        user_id INTEGER NOT NULL REFERENCES users(id),
        created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
        updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
    );
    CREATE TABLE IF NOT EXISTS anime_genres (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        anime_id INTEGER NOT NULL REFERENCES anime(id) ON DELETE CASCADE,
        genre TEXT NOT NULL,
        UNIQUE (anime_id, genre)
    );
    CREATE TABLE IF NOT EXISTS game_events (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        title TEXT NOT NULL,
        date TEXT NOT NULL,
        time TEXT NOT NULL,
        game TEXT NOT NULL,
        image_url TEXT,
        description TEXT,
        user_id INTEGER NOT NULL REFERENCES users(id),
        created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
        updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
    );
    CREATE TABLE IF NOT EXISTS game_votes (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        event_id INTEGER NOT NULL REFERENCES game_events(id) ON DELETE CASCADE,
        user_id INTEGER NOT NULL REFERENCES users(id),
        vote BOOLEAN NOT NULL,
        UNIQUE (event_id, user_id)
    );";

// Dependents first. Users survive a reset.
const DROP_CONTENT_TABLES: &str = "
    DROP TABLE IF EXISTS game_votes;
    DROP TABLE IF EXISTS game_events;
    DROP TABLE IF EXISTS anime_genres;
    DROP TABLE IF EXISTS anime;";

#[derive(Debug, Clone, Copy)]
struct SqlitePragmas;

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for SqlitePragmas {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> Result<(), diesel::r2d2::Error> {
        conn.batch_execute(CONNECTION_PRAGMAS)
            .map_err(diesel::r2d2::Error::QueryError)
    }
}

/// Opens a single connection with the same settings the pool uses.
pub fn establish_connection(database_url: &str) -> ConnectionResult<SqliteConnection> {
    ensure_parent_dir(database_url);
    let mut conn = SqliteConnection::establish(database_url)?;
    conn.batch_execute(CONNECTION_PRAGMAS)
        .map_err(|e| ConnectionError::BadConnection(e.to_string()))?;
    Ok(conn)
}

pub fn create_pool(database_url: &str) -> Result<DbPool, diesel::r2d2::PoolError> {
    ensure_parent_dir(database_url);
    let manager = ConnectionManager::<SqliteConnection>::new(database_url);
    Pool::builder()
        .connection_customizer(Box::new(SqlitePragmas))
        .build(manager)
}

fn ensure_parent_dir(database_url: &str) {
    if database_url == ":memory:" {
        return;
    }
    if let Some(parent) = Path::new(database_url).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                tracing::warn!("Failed to create {}: {e}", parent.display());
            }
        }
    }
}

/// Creates any missing tables. Never drops data.
pub fn ensure_schema(conn: &mut SqliteConnection) -> QueryResult<()> {
    conn.batch_execute(CREATE_TABLES)
}

/// Drops every content table (anime, genres, events, votes) and recreates the schema. Accounts
/// are kept.
pub fn reset_schema(conn: &mut SqliteConnection) -> QueryResult<()> {
    conn.immediate_transaction(|conn| {
        conn.batch_execute(DROP_CONTENT_TABLES)?;
        conn.batch_execute(CREATE_TABLES)
    })?;
    info!("Database schema has been reset");
    Ok(())
}
