use diesel::prelude::*;
use diesel::SqliteConnection;

use crate::error::AppError;
use crate::model::{Anime, GameEvent};
use crate::schema::{anime, game_events};

/// A record with exactly one owning user.
pub trait Owned: Sized {
    /// Used in client-facing messages, e.g. "Anime not found".
    const KIND: &'static str;

    fn owner_id(&self) -> i32;

    fn find(conn: &mut SqliteConnection, id: i32) -> QueryResult<Option<Self>>;
}

impl Owned for Anime {
    const KIND: &'static str = "Anime";

    fn owner_id(&self) -> i32 {
        self.user_id
    }

    fn find(conn: &mut SqliteConnection, id: i32) -> QueryResult<Option<Self>> {
        anime::table
            .find(id)
            .select(Anime::as_select())
            .first(conn)
            .optional()
    }
}

impl Owned for GameEvent {
    const KIND: &'static str = "Game event";

    fn owner_id(&self) -> i32 {
        self.user_id
    }

    fn find(conn: &mut SqliteConnection, id: i32) -> QueryResult<Option<Self>> {
        game_events::table
            .find(id)
            .select(GameEvent::as_select())
            .first(conn)
            .optional()
    }
}

/// Loads the record and checks that `requester_id` owns it. Must run before any write that
/// touches the record or its dependent rows.
pub fn authorize_owner<T: Owned>(
    conn: &mut SqliteConnection,
    id: i32,
    requester_id: i32,
) -> Result<T, AppError> {
    let record =
        T::find(conn, id)?.ok_or_else(|| AppError::not_found(format!("{} not found", T::KIND)))?;
    if record.owner_id() != requester_id {
        return Err(AppError::Forbidden(format!(
            "You do not have permission to modify this {}",
            T::KIND.to_lowercase()
        )));
    }
    Ok(record)
}
