use std::collections::HashMap;

use chrono::Utc;
use diesel::dsl::count_star;
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel::SqliteConnection;
use tracing::info;

use crate::access::authorize_owner;
use crate::error::AppError;
use crate::model::{
    EventDetail, EventSummary, GameEvent, GameEventChanges, GameEventInput, NewGameEvent,
    NewVote, VoteRoster, VoteTally,
};
use crate::schema::{game_events, game_votes, users};

const EVENT_NOT_FOUND: &str = "Event not found";

/// Creates an event owned by `owner_id`. The creator is recorded as attending.
pub fn create_event(
    conn: &mut SqliteConnection,
    input: GameEventInput,
    owner_id: i32,
) -> Result<EventSummary, AppError> {
    let draft = input.validate()?;

    conn.immediate_transaction::<_, AppError, _>(|conn| {
        let event: GameEvent = diesel::insert_into(game_events::table)
            .values(&NewGameEvent {
                title: &draft.title,
                date: &draft.date,
                time: &draft.time,
                game: &draft.game,
                image_url: draft.image_url.as_deref(),
                description: draft.description.as_deref(),
                user_id: owner_id,
            })
            .returning(GameEvent::as_returning())
            .get_result(conn)?;

        diesel::insert_into(game_votes::table)
            .values(&NewVote {
                event_id: event.id,
                user_id: owner_id,
                vote: true,
            })
            .execute(conn)?;

        let created_by: String = users::table
            .find(owner_id)
            .select(users::username)
            .first(conn)?;

        info!(event_id = event.id, owner_id, title = %event.title, "created game event");
        Ok(EventSummary {
            event,
            created_by,
            votes: VoteTally { yes: 1, no: 0 },
        })
    })
}

/// All events, soonest first, with their vote tallies.
pub fn list_events(conn: &mut SqliteConnection) -> Result<Vec<EventSummary>, AppError> {
    let rows: Vec<(GameEvent, String)> = game_events::table
        .inner_join(users::table)
        .select((GameEvent::as_select(), users::username))
        .order((
            game_events::date.asc(),
            game_events::time.asc(),
            game_events::id.asc(),
        ))
        .load(conn)?;

    let ids: Vec<i32> = rows.iter().map(|(e, _)| e.id).collect();
    let tallies = tallies_for(conn, ids)?;

    Ok(rows
        .into_iter()
        .map(|(event, created_by)| EventSummary {
            votes: tallies.get(&event.id).copied().unwrap_or_default(),
            event,
            created_by,
        })
        .collect())
}

/// One event with the usernames behind each answer.
pub fn get_event(conn: &mut SqliteConnection, event_id: i32) -> Result<EventDetail, AppError> {
    let (event, created_by): (GameEvent, String) = game_events::table
        .inner_join(users::table)
        .filter(game_events::id.eq(event_id))
        .select((GameEvent::as_select(), users::username))
        .first(conn)
        .optional()?
        .ok_or_else(|| AppError::not_found(EVENT_NOT_FOUND))?;

    let voters: Vec<(String, bool)> = game_votes::table
        .inner_join(users::table)
        .filter(game_votes::event_id.eq(event_id))
        .select((users::username, game_votes::vote))
        .order(game_votes::id.asc())
        .load(conn)?;

    let mut votes = VoteRoster::default();
    for (username, attending) in voters {
        if attending {
            votes.yes.push(username);
        } else {
            votes.no.push(username);
        }
    }

    Ok(EventDetail {
        event,
        created_by,
        votes,
    })
}

/// Replaces every field of the event. Votes are untouched. Only the owner may update.
pub fn update_event(
    conn: &mut SqliteConnection,
    event_id: i32,
    input: GameEventInput,
    requester_id: i32,
) -> Result<EventSummary, AppError> {
    conn.immediate_transaction::<_, AppError, _>(|conn| {
        authorize_owner::<GameEvent>(conn, event_id, requester_id)?;
        let draft = input.validate()?;

        let event: GameEvent = diesel::update(game_events::table.find(event_id))
            .set(&GameEventChanges {
                title: &draft.title,
                date: &draft.date,
                time: &draft.time,
                game: &draft.game,
                image_url: draft.image_url.as_deref(),
                description: draft.description.as_deref(),
                updated_at: Utc::now().naive_utc(),
            })
            .returning(GameEvent::as_returning())
            .get_result(conn)?;

        let created_by: String = users::table
            .find(event.user_id)
            .select(users::username)
            .first(conn)?;
        let votes = vote_tally(conn, event_id)?;

        Ok(EventSummary {
            event,
            created_by,
            votes,
        })
    })
}

/// Deletes the event and all of its votes. Only the owner may delete.
pub fn delete_event(
    conn: &mut SqliteConnection,
    event_id: i32,
    requester_id: i32,
) -> Result<(), AppError> {
    conn.immediate_transaction::<_, AppError, _>(|conn| {
        authorize_owner::<GameEvent>(conn, event_id, requester_id)?;

        diesel::delete(game_votes::table.filter(game_votes::event_id.eq(event_id)))
            .execute(conn)?;
        diesel::delete(game_events::table.find(event_id)).execute(conn)?;

        info!(event_id, requester_id, "deleted game event");
        Ok(())
    })
}

/// Records `user_id`'s answer for the event, replacing any earlier answer, and returns the new
/// tally.
pub fn cast_vote(
    conn: &mut SqliteConnection,
    event_id: i32,
    user_id: i32,
    attending: bool,
) -> Result<VoteTally, AppError> {
    conn.immediate_transaction::<_, AppError, _>(|conn| {
        let exists: Option<i32> = game_events::table
            .find(event_id)
            .select(game_events::id)
            .first(conn)
            .optional()?;
        if exists.is_none() {
            return Err(AppError::not_found(EVENT_NOT_FOUND));
        }

        diesel::insert_into(game_votes::table)
            .values(&NewVote {
                event_id,
                user_id,
                vote: attending,
            })
            .on_conflict((game_votes::event_id, game_votes::user_id))
            .do_update()
            .set(game_votes::vote.eq(attending))
            .execute(conn)
            .map_err(|e| match e {
                // The event vanished between the check and the write.
                DieselError::DatabaseError(DatabaseErrorKind::ForeignKeyViolation, _) => {
                    AppError::not_found(EVENT_NOT_FOUND)
                }
                other => AppError::Database(other),
            })?;

        Ok(vote_tally(conn, event_id)?)
    })
}

pub fn vote_tally(conn: &mut SqliteConnection, event_id: i32) -> QueryResult<VoteTally> {
    let yes: i64 = game_votes::table
        .filter(game_votes::event_id.eq(event_id))
        .filter(game_votes::vote.eq(true))
        .count()
        .get_result(conn)?;
    let no: i64 = game_votes::table
        .filter(game_votes::event_id.eq(event_id))
        .filter(game_votes::vote.eq(false))
        .count()
        .get_result(conn)?;
    Ok(VoteTally { yes, no })
}

fn tallies_for(
    conn: &mut SqliteConnection,
    event_ids: Vec<i32>,
) -> QueryResult<HashMap<i32, VoteTally>> {
    let rows: Vec<(i32, bool, i64)> = game_votes::table
        .filter(game_votes::event_id.eq_any(event_ids))
        .group_by((game_votes::event_id, game_votes::vote))
        .select((game_votes::event_id, game_votes::vote, count_star()))
        .load(conn)?;

    let mut tallies: HashMap<i32, VoteTally> = HashMap::new();
    for (event_id, attending, count) in rows {
        let tally = tallies.entry(event_id).or_default();
        if attending {
            tally.yes = count;
        } else {
            tally.no = count;
        }
    }
    Ok(tallies)
}
