use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use diesel::prelude::*;
use diesel::sqlite::Sqlite;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

#[derive(Queryable, Selectable, Debug, Clone)]
#[diesel(table_name = crate::schema::users)]
#[diesel(check_for_backend(Sqlite))]
pub struct User {
    pub id: i32,
    pub username: String,
    pub email: String,
    /// Argon2 PHC string.
    pub password: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::users)]
pub struct NewUser<'a> {
    pub username: &'a str,
    pub email: &'a str,
    pub password: &'a str,
    // created_at and updated_at use defaults
}

/// The user as returned by register/login.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PublicUser {
    pub id: i32,
    pub username: String,
    pub email: String,
}

impl From<User> for PublicUser {
    fn from(user: User) -> Self {
        PublicUser {
            id: user.id,
            username: user.username,
            email: user.email,
        }
    }
}

#[derive(Queryable, Selectable, Debug, Clone, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::users)]
#[diesel(check_for_backend(Sqlite))]
pub struct UserProfile {
    pub id: i32,
    pub username: String,
    pub email: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Queryable, Selectable, Debug, Clone, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::anime)]
#[diesel(check_for_backend(Sqlite))]
pub struct Anime {
    pub id: i32,
    pub title: String,
    pub image: String,
    pub image_url: Option<String>,
    pub rating: f64,
    pub year: i32,
    pub review: Option<String>,
    pub user_id: i32,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::anime)]
pub struct NewAnime<'a> {
    pub title: &'a str,
    pub image: &'a str,
    pub image_url: Option<&'a str>,
    pub rating: f64,
    pub year: i32,
    pub review: Option<&'a str>,
    pub user_id: i32,
}

#[derive(AsChangeset, Debug)]
#[diesel(table_name = crate::schema::anime)]
#[diesel(treat_none_as_null = true)]
pub struct AnimeChanges<'a> {
    pub title: &'a str,
    pub image: &'a str,
    pub image_url: Option<&'a str>,
    pub rating: f64,
    pub year: i32,
    pub review: Option<&'a str>,
    pub updated_at: NaiveDateTime,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::anime_genres)]
pub struct NewGenre<'a> {
    pub anime_id: i32,
    pub genre: &'a str,
}

/// An anime joined with its recommender and genre set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnimeView {
    #[serde(flatten)]
    pub anime: Anime,
    pub recommended_by: String,
    pub genres: Vec<String>,
}

#[derive(Queryable, Selectable, Debug, Clone, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::game_events)]
#[diesel(check_for_backend(Sqlite))]
pub struct GameEvent {
    pub id: i32,
    pub title: String,
    pub date: String,
    pub time: String,
    pub game: String,
    pub image_url: Option<String>,
    pub description: Option<String>,
    pub user_id: i32,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::game_events)]
pub struct NewGameEvent<'a> {
    pub title: &'a str,
    pub date: &'a str,
    pub time: &'a str,
    pub game: &'a str,
    pub image_url: Option<&'a str>,
    pub description: Option<&'a str>,
    pub user_id: i32,
}

#[derive(AsChangeset, Debug)]
#[diesel(table_name = crate::schema::game_events)]
#[diesel(treat_none_as_null = true)]
pub struct GameEventChanges<'a> {
    pub title: &'a str,
    pub date: &'a str,
    pub time: &'a str,
    pub game: &'a str,
    pub image_url: Option<&'a str>,
    pub description: Option<&'a str>,
    pub updated_at: NaiveDateTime,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::game_votes)]
pub struct NewVote {
    pub event_id: i32,
    pub user_id: i32,
    pub vote: bool,
}

/// Attendance counts for one event.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct VoteTally {
    pub yes: i64,
    pub no: i64,
}

/// Usernames per answer for one event, in voting order.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct VoteRoster {
    pub yes: Vec<String>,
    pub no: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventSummary {
    #[serde(flatten)]
    pub event: GameEvent,
    pub created_by: String,
    pub votes: VoteTally,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventDetail {
    #[serde(flatten)]
    pub event: GameEvent,
    pub created_by: String,
    pub votes: VoteRoster,
}

// Request bodies. Every field is optional so that a missing field becomes a validation error with
// a readable message instead of a deserialization failure.

#[derive(Debug, Default, Deserialize)]
pub struct RegisterInput {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LoginInput {
    #[serde(alias = "username_or_email")]
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct AnimeInput {
    pub title: Option<String>,
    pub year: Option<i32>,
    pub rating: Option<f64>,
    pub image: Option<String>,
    pub image_url: Option<String>,
    pub genres: Option<Vec<String>>,
    pub review: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct GameEventInput {
    pub title: Option<String>,
    pub date: Option<String>,
    pub time: Option<String>,
    pub game: Option<String>,
    pub image_url: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct VoteInput {
    #[serde(rename = "eventId", alias = "event_id")]
    pub event_id: Option<i32>,
    pub vote: Option<bool>,
}

pub const MIN_PASSWORD_LEN: usize = 6;

/// A validated anime body.
#[derive(Debug, Clone, PartialEq)]
pub struct AnimeDraft {
    pub title: String,
    pub year: i32,
    pub rating: f64,
    pub image: String,
    pub image_url: Option<String>,
    pub genres: Vec<String>,
    pub review: Option<String>,
}

impl AnimeInput {
    pub fn validate(self) -> Result<AnimeDraft, AppError> {
        let (Some(title), Some(year), Some(rating), Some(image), Some(genres)) = (
            required(self.title),
            self.year,
            self.rating,
            required(self.image),
            self.genres,
        ) else {
            return Err(AppError::validation("Please fill in all required fields"));
        };

        if year <= 0 {
            return Err(AppError::validation("Year must be a positive number"));
        }
        // Ratings go from 1 to 10 in half-point steps.
        if !(1.0..=10.0).contains(&rating) || (rating * 2.0).fract() != 0.0 {
            return Err(AppError::validation(
                "Rating must be between 1 and 10 in steps of 0.5",
            ));
        }

        let genres = normalize_genres(genres);
        if genres.is_empty() {
            return Err(AppError::validation("At least one genre is required"));
        }

        Ok(AnimeDraft {
            title,
            year,
            rating,
            image,
            image_url: required(self.image_url),
            genres,
            review: required(self.review),
        })
    }
}

/// A validated game event body. Date and time are normalized so that text ordering is
/// chronological.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameEventDraft {
    pub title: String,
    pub date: String,
    pub time: String,
    pub game: String,
    pub image_url: Option<String>,
    pub description: Option<String>,
}

impl GameEventInput {
    pub fn validate(self) -> Result<GameEventDraft, AppError> {
        let (Some(title), Some(date), Some(time), Some(game)) = (
            required(self.title),
            required(self.date),
            required(self.time),
            required(self.game),
        ) else {
            return Err(AppError::validation("Please fill in all required fields"));
        };

        let date = NaiveDate::parse_from_str(&date, "%Y-%m-%d")
            .map_err(|_| AppError::validation("Date must be formatted as YYYY-MM-DD"))?;
        let time = NaiveTime::parse_from_str(&time, "%H:%M")
            .or_else(|_| NaiveTime::parse_from_str(&time, "%H:%M:%S"))
            .map_err(|_| AppError::validation("Time must be formatted as HH:MM"))?;

        Ok(GameEventDraft {
            title,
            date: date.format("%Y-%m-%d").to_string(),
            time: time.format("%H:%M").to_string(),
            game,
            image_url: required(self.image_url),
            description: required(self.description),
        })
    }
}

/// Trims the value and treats blank strings as absent.
pub fn required(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Trims each genre, drops blanks and duplicates. The first occurrence wins, comparison is
/// case-sensitive.
pub fn normalize_genres(genres: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(genres.len());
    for genre in genres {
        let genre = genre.trim();
        if !genre.is_empty() && !out.iter().any(|g| g == genre) {
            out.push(genre.to_string());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn anime_input() -> AnimeInput {
        AnimeInput {
            title: Some("Cowboy Bebop".to_string()),
            year: Some(1998),
            rating: Some(9.5),
            image: Some("🚀".to_string()),
            image_url: Some("".to_string()),
            genres: Some(vec!["Action".to_string(), "Sci-Fi".to_string()]),
            review: None,
        }
    }

    #[test]
    fn test_anime_validation_accepts_complete_input() {
        let draft = anime_input().validate().expect("valid input");
        assert_eq!(draft.title, "Cowboy Bebop");
        assert_eq!(draft.genres, vec!["Action", "Sci-Fi"]);
        assert_eq!(draft.image_url, None);
    }

    #[test]
    fn test_anime_validation_rejects_missing_fields() {
        for input in [
            AnimeInput {
                title: Some("   ".to_string()),
                ..anime_input()
            },
            AnimeInput {
                year: None,
                ..anime_input()
            },
            AnimeInput {
                image: None,
                ..anime_input()
            },
            AnimeInput {
                genres: Some(vec![" ".to_string()]),
                ..anime_input()
            },
            AnimeInput {
                genres: None,
                ..anime_input()
            },
        ] {
            assert!(matches!(input.validate(), Err(AppError::Validation(_))));
        }
    }

    #[test]
    fn test_anime_rating_bounds() {
        for bad in [0.0, 0.5, 10.5, 7.3] {
            let input = AnimeInput {
                rating: Some(bad),
                ..anime_input()
            };
            assert!(input.validate().is_err(), "rating {bad} should fail");
        }
        for good in [1.0, 5.5, 10.0] {
            let input = AnimeInput {
                rating: Some(good),
                ..anime_input()
            };
            assert!(input.validate().is_ok(), "rating {good} should pass");
        }
    }

    #[test]
    fn test_normalize_genres() {
        let genres = vec![
            "Action".to_string(),
            " Drama ".to_string(),
            "Action".to_string(),
            "action".to_string(),
            "".to_string(),
        ];
        assert_eq!(normalize_genres(genres), vec!["Action", "Drama", "action"]);
    }

    #[test]
    fn test_event_validation_normalizes_date_and_time() {
        let draft = GameEventInput {
            title: Some("Raid night".to_string()),
            date: Some("2025-11-01".to_string()),
            time: Some("19:30:00".to_string()),
            game: Some("Deep Rock Galactic".to_string()),
            image_url: None,
            description: Some("  ".to_string()),
        }
        .validate()
        .expect("valid input");
        assert_eq!(draft.date, "2025-11-01");
        assert_eq!(draft.time, "19:30");
        assert_eq!(draft.description, None);
    }

    #[test]
    fn test_event_validation_rejects_bad_input() {
        let base = GameEventInput {
            title: Some("Raid night".to_string()),
            date: Some("2025-11-01".to_string()),
            time: Some("19:30".to_string()),
            game: Some("Deep Rock Galactic".to_string()),
            ..Default::default()
        };
        assert!(GameEventInput {
            game: None,
            ..base.clone()
        }
        .validate()
        .is_err());
        assert!(GameEventInput {
            date: Some("01/11/2025".to_string()),
            ..base.clone()
        }
        .validate()
        .is_err());
        assert!(GameEventInput {
            time: Some("7pm".to_string()),
            ..base
        }
        .validate()
        .is_err());
    }
}
