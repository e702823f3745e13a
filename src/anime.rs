use std::collections::HashMap;

use chrono::Utc;
use diesel::prelude::*;
use diesel::SqliteConnection;
use tracing::info;

use crate::access::authorize_owner;
use crate::error::AppError;
use crate::model::{Anime, AnimeChanges, AnimeInput, AnimeView, NewAnime, NewGenre};
use crate::schema::{anime, anime_genres, users};

/// Creates an anime owned by `owner_id` together with its genre set.
pub fn create_anime(
    conn: &mut SqliteConnection,
    input: AnimeInput,
    owner_id: i32,
) -> Result<AnimeView, AppError> {
    let draft = input.validate()?;

    conn.immediate_transaction::<_, AppError, _>(|conn| {
        let anime_id: i32 = diesel::insert_into(anime::table)
            .values(&NewAnime {
                title: &draft.title,
                image: &draft.image,
                image_url: draft.image_url.as_deref(),
                rating: draft.rating,
                year: draft.year,
                review: draft.review.as_deref(),
                user_id: owner_id,
            })
            .returning(anime::id)
            .get_result(conn)?;

        insert_genres(conn, anime_id, &draft.genres)?;
        info!(anime_id, owner_id, title = %draft.title, "created anime");

        get_anime(conn, anime_id)
    })
}

/// All anime, newest first, with recommender and genres.
pub fn list_anime(conn: &mut SqliteConnection) -> Result<Vec<AnimeView>, AppError> {
    let rows: Vec<(Anime, String)> = anime::table
        .inner_join(users::table)
        .select((Anime::as_select(), users::username))
        .order((anime::created_at.desc(), anime::id.desc()))
        .load(conn)?;

    let ids: Vec<i32> = rows.iter().map(|(a, _)| a.id).collect();
    let mut genres = genres_for(conn, ids)?;

    Ok(rows
        .into_iter()
        .map(|(anime, recommended_by)| AnimeView {
            genres: genres.remove(&anime.id).unwrap_or_default(),
            anime,
            recommended_by,
        })
        .collect())
}

pub fn get_anime(conn: &mut SqliteConnection, anime_id: i32) -> Result<AnimeView, AppError> {
    let (anime, recommended_by): (Anime, String) = anime::table
        .inner_join(users::table)
        .filter(anime::id.eq(anime_id))
        .select((Anime::as_select(), users::username))
        .first(conn)
        .optional()?
        .ok_or_else(|| AppError::not_found("Anime not found"))?;

    let genres = anime_genres::table
        .filter(anime_genres::anime_id.eq(anime_id))
        .select(anime_genres::genre)
        .order(anime_genres::id.asc())
        .load(conn)?;

    Ok(AnimeView {
        anime,
        recommended_by,
        genres,
    })
}

/// Replaces every field and the whole genre set. Only the owner may update.
pub fn update_anime(
    conn: &mut SqliteConnection,
    anime_id: i32,
    input: AnimeInput,
    requester_id: i32,
) -> Result<AnimeView, AppError> {
    conn.immediate_transaction::<_, AppError, _>(|conn| {
        authorize_owner::<Anime>(conn, anime_id, requester_id)?;
        let draft = input.validate()?;

        diesel::update(anime::table.find(anime_id))
            .set(&AnimeChanges {
                title: &draft.title,
                image: &draft.image,
                image_url: draft.image_url.as_deref(),
                rating: draft.rating,
                year: draft.year,
                review: draft.review.as_deref(),
                updated_at: Utc::now().naive_utc(),
            })
            .execute(conn)?;

        diesel::delete(anime_genres::table.filter(anime_genres::anime_id.eq(anime_id)))
            .execute(conn)?;
        insert_genres(conn, anime_id, &draft.genres)?;

        get_anime(conn, anime_id)
    })
}

/// Deletes the anime and its genres. Only the owner may delete.
pub fn delete_anime(
    conn: &mut SqliteConnection,
    anime_id: i32,
    requester_id: i32,
) -> Result<(), AppError> {
    conn.immediate_transaction::<_, AppError, _>(|conn| {
        authorize_owner::<Anime>(conn, anime_id, requester_id)?;

        diesel::delete(anime_genres::table.filter(anime_genres::anime_id.eq(anime_id)))
            .execute(conn)?;
        diesel::delete(anime::table.find(anime_id)).execute(conn)?;

        info!(anime_id, requester_id, "deleted anime");
        Ok(())
    })
}

fn insert_genres(
    conn: &mut SqliteConnection,
    anime_id: i32,
    genres: &[String],
) -> QueryResult<usize> {
    let rows: Vec<NewGenre> = genres
        .iter()
        .map(|genre| NewGenre { anime_id, genre })
        .collect();
    diesel::insert_into(anime_genres::table)
        .values(&rows)
        .execute(conn)
}

fn genres_for(
    conn: &mut SqliteConnection,
    anime_ids: Vec<i32>,
) -> QueryResult<HashMap<i32, Vec<String>>> {
    let rows: Vec<(i32, String)> = anime_genres::table
        .filter(anime_genres::anime_id.eq_any(anime_ids))
        .select((anime_genres::anime_id, anime_genres::genre))
        .order(anime_genres::id.asc())
        .load(conn)?;

    let mut genres: HashMap<i32, Vec<String>> = HashMap::new();
    for (anime_id, genre) in rows {
        genres.entry(anime_id).or_default().push(genre);
    }
    Ok(genres)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{insert_user, run_test};
    use std::collections::HashSet;

    fn input(title: &str, genres: &[&str]) -> AnimeInput {
        AnimeInput {
            title: Some(title.to_string()),
            year: Some(2020),
            rating: Some(8.0),
            image: Some("🎬".to_string()),
            image_url: None,
            genres: Some(genres.iter().map(|g| g.to_string()).collect()),
            review: Some("Worth it".to_string()),
        }
    }

    fn genre_set(view: &AnimeView) -> HashSet<&str> {
        view.genres.iter().map(String::as_str).collect()
    }

    #[test]
    fn test_create_and_get() {
        run_test(|conn| {
            let owner = insert_user(conn, "a")?;
            let created = create_anime(conn, input("X", &["A", "B", "A"]), owner)?;
            assert_eq!(created.anime.title, "X");
            assert_eq!(created.anime.user_id, owner);
            assert_eq!(created.recommended_by, "a");
            assert_eq!(created.genres.len(), 2);

            let fetched = get_anime(conn, created.anime.id)?;
            assert_eq!(genre_set(&fetched), HashSet::from(["A", "B"]));
            assert_eq!(fetched.anime.review.as_deref(), Some("Worth it"));

            Ok(())
        });
    }

    #[test]
    fn test_get_missing() {
        run_test(|conn| {
            let err = get_anime(conn, 404).expect_err("missing");
            assert!(matches!(err, AppError::NotFound(_)));
            Ok(())
        });
    }

    #[test]
    fn test_create_rejects_invalid_input() {
        run_test(|conn| {
            let owner = insert_user(conn, "a")?;
            let err = create_anime(conn, input("X", &[]), owner).expect_err("no genres");
            assert!(matches!(err, AppError::Validation(_)));
            let count: i64 = anime::table.count().get_result(conn)?;
            assert_eq!(count, 0);
            Ok(())
        });
    }

    #[test]
    fn test_list_newest_first_with_genres() {
        run_test(|conn| {
            let a = insert_user(conn, "a")?;
            let b = insert_user(conn, "b")?;
            create_anime(conn, input("First", &["Drama"]), a)?;
            create_anime(conn, input("Second", &["Comedy", "Slice of Life"]), b)?;

            let list = list_anime(conn)?;
            assert_eq!(list.len(), 2);
            assert_eq!(list[0].anime.title, "Second");
            assert_eq!(list[0].recommended_by, "b");
            assert_eq!(list[0].genres, vec!["Comedy", "Slice of Life"]);
            assert_eq!(list[1].anime.title, "First");
            assert_eq!(list[1].genres, vec!["Drama"]);
            Ok(())
        });
    }

    #[test]
    fn test_update_replaces_genres() {
        run_test(|conn| {
            let owner = insert_user(conn, "a")?;
            let created = create_anime(conn, input("X", &["A", "B"]), owner)?;

            let mut changes = input("X (rewatch)", &["C"]);
            changes.review = None;
            let updated = update_anime(conn, created.anime.id, changes, owner)?;
            assert_eq!(updated.anime.title, "X (rewatch)");
            assert_eq!(updated.anime.review, None);

            let fetched = get_anime(conn, created.anime.id)?;
            assert_eq!(genre_set(&fetched), HashSet::from(["C"]));
            Ok(())
        });
    }

    #[test]
    fn test_only_owner_can_mutate() {
        run_test(|conn| {
            let owner = insert_user(conn, "a")?;
            let other = insert_user(conn, "b")?;
            let created = create_anime(conn, input("X", &["A"]), owner)?;

            let err = update_anime(conn, created.anime.id, input("Y", &["B"]), other)
                .expect_err("not owner");
            assert!(matches!(err, AppError::Forbidden(_)));

            let err = delete_anime(conn, created.anime.id, other).expect_err("not owner");
            assert!(matches!(err, AppError::Forbidden(_)));

            // Nothing changed.
            let fetched = get_anime(conn, created.anime.id)?;
            assert_eq!(fetched.anime.title, "X");
            assert_eq!(fetched.genres, vec!["A"]);
            Ok(())
        });
    }

    #[test]
    fn test_ownership_checked_before_validation() {
        run_test(|conn| {
            let owner = insert_user(conn, "a")?;
            let other = insert_user(conn, "b")?;
            let created = create_anime(conn, input("X", &["A"]), owner)?;

            let err = update_anime(conn, created.anime.id, AnimeInput::default(), other)
                .expect_err("not owner");
            assert!(matches!(err, AppError::Forbidden(_)));

            let err = update_anime(conn, 999, AnimeInput::default(), owner)
                .expect_err("missing");
            assert!(matches!(err, AppError::NotFound(_)));

            let err = update_anime(conn, created.anime.id, AnimeInput::default(), owner)
                .expect_err("invalid");
            assert!(matches!(err, AppError::Validation(_)));
            Ok(())
        });
    }

    #[test]
    fn test_delete_removes_genres() {
        run_test(|conn| {
            let owner = insert_user(conn, "a")?;
            let created = create_anime(conn, input("X", &["A", "B"]), owner)?;

            delete_anime(conn, created.anime.id, owner)?;

            assert!(matches!(
                get_anime(conn, created.anime.id),
                Err(AppError::NotFound(_))
            ));
            let genre_rows: i64 = anime_genres::table.count().get_result(conn)?;
            assert_eq!(genre_rows, 0);

            let err = delete_anime(conn, created.anime.id, owner).expect_err("already gone");
            assert!(matches!(err, AppError::NotFound(_)));
            Ok(())
        });
    }
}
