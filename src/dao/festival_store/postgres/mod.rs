//! Relational backend on top of `sqlx` and Postgres.
//!
//! The schema is provisioned outside of this service. Expected tables:
//!
//! ```sql
//! CREATE TABLE rooms (
//!     id             BIGSERIAL PRIMARY KEY,
//!     code           TEXT NOT NULL UNIQUE,
//!     name           TEXT NOT NULL,
//!     mode           TEXT NOT NULL,
//!     status         TEXT NOT NULL,
//!     max_players    INTEGER NOT NULL,
//!     host_player_id BIGINT,
//!     created_at     TIMESTAMPTZ NOT NULL
//! );
//! CREATE TABLE players (
//!     id           BIGSERIAL PRIMARY KEY,
//!     room_id      BIGINT NOT NULL REFERENCES rooms(id) ON DELETE CASCADE,
//!     name         TEXT NOT NULL,
//!     is_host      BOOLEAN NOT NULL DEFAULT FALSE,
//!     team         TEXT,
//!     connected    BOOLEAN NOT NULL DEFAULT TRUE,
//!     total_score  BIGINT NOT NULL DEFAULT 0,
//!     last_seen_at TIMESTAMPTZ NOT NULL
//! );
//! CREATE TABLE rounds (
//!     id          BIGSERIAL PRIMARY KEY,
//!     room_id     BIGINT NOT NULL REFERENCES rooms(id) ON DELETE CASCADE,
//!     round_index INTEGER NOT NULL,
//!     game_key    TEXT NOT NULL,
//!     status      TEXT NOT NULL,
//!     started_at  TIMESTAMPTZ NOT NULL,
//!     ended_at    TIMESTAMPTZ,
//!     UNIQUE (room_id, round_index)
//! );
//! CREATE TABLE score_submissions (
//!     round_id     BIGINT NOT NULL REFERENCES rounds(id) ON DELETE CASCADE,
//!     player_id    BIGINT NOT NULL REFERENCES players(id) ON DELETE CASCADE,
//!     game_key     TEXT NOT NULL,
//!     score        BIGINT NOT NULL,
//!     meta         JSONB NOT NULL DEFAULT '{}',
//!     submitted_at TIMESTAMPTZ NOT NULL,
//!     PRIMARY KEY (round_id, player_id)
//! );
//! ```

mod config;
mod connection;
mod error;
pub mod store;

pub use config::PgConfig;
pub use error::PgDaoError;
pub use store::PgFestivalStore;

use crate::dao::storage::StorageError;

/// SQLSTATE raised when arithmetic overflows a numeric column.
const NUMERIC_VALUE_OUT_OF_RANGE: &str = "22003";

impl From<PgDaoError> for StorageError {
    fn from(err: PgDaoError) -> Self {
        match err {
            PgDaoError::UnexpectedValue { column, value } => StorageError::Corrupted {
                location: column,
                message: format!("unexpected value `{value}`"),
            },
            PgDaoError::Query {
                operation,
                source: sqlx::Error::Database(db),
            } if db.code().as_deref() == Some(NUMERIC_VALUE_OUT_OF_RANGE) => {
                StorageError::OutOfRange {
                    location: operation,
                    message: db.message().to_string(),
                }
            }
            other => StorageError::unavailable(other.to_string(), other),
        }
    }
}
