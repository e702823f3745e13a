use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel::SqliteConnection;
use tracing::{debug, info};

use crate::auth::{hash_password, verify_password};
use crate::error::AppError;
use crate::model::{
    required, LoginInput, NewUser, PublicUser, RegisterInput, User, UserProfile,
    MIN_PASSWORD_LEN,
};
use crate::schema::users;

const TAKEN: &str = "A user with this email or username already exists";
const BAD_CREDENTIALS: &str = "Invalid username or password";

/// Creates an account. Fails with `Conflict` if the username or email is taken.
pub fn register_user(
    conn: &mut SqliteConnection,
    input: RegisterInput,
) -> Result<PublicUser, AppError> {
    let (Some(username), Some(email), Some(password)) = (
        required(input.username),
        required(input.email),
        input.password.filter(|p| !p.is_empty()),
    ) else {
        return Err(AppError::validation("Please fill in all required fields"));
    };
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::validation(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }

    let existing: i64 = users::table
        .filter(users::email.eq(&email).or(users::username.eq(&username)))
        .count()
        .get_result(conn)?;
    if existing > 0 {
        return Err(AppError::Conflict(TAKEN.to_string()));
    }

    let hash = hash_password(&password)?;
    let user: User = diesel::insert_into(users::table)
        .values(&NewUser {
            username: &username,
            email: &email,
            password: &hash,
        })
        .returning(User::as_returning())
        .get_result(conn)
        .map_err(|e| match e {
            // Lost a race with a concurrent registration.
            DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
                AppError::Conflict(TAKEN.to_string())
            }
            other => AppError::Database(other),
        })?;

    info!(user_id = user.id, username = %user.username, "registered user");
    Ok(user.into())
}

/// Checks credentials. The login name may be either the username or the email.
pub fn authenticate(
    conn: &mut SqliteConnection,
    input: LoginInput,
) -> Result<PublicUser, AppError> {
    let (Some(login), Some(password)) = (
        required(input.username),
        input.password.filter(|p| !p.is_empty()),
    ) else {
        return Err(AppError::validation(
            "Please enter your username and password",
        ));
    };

    let user: Option<User> = users::table
        .filter(users::username.eq(&login).or(users::email.eq(&login)))
        .select(User::as_select())
        .first(conn)
        .optional()?;

    match user {
        Some(user) if verify_password(&password, &user.password) => Ok(user.into()),
        Some(user) => {
            debug!(user_id = user.id, "login rejected: wrong password");
            Err(AppError::Unauthenticated(BAD_CREDENTIALS.to_string()))
        }
        None => {
            debug!("login rejected: unknown user");
            Err(AppError::Unauthenticated(BAD_CREDENTIALS.to_string()))
        }
    }
}

pub fn find_profile(
    conn: &mut SqliteConnection,
    user_id: i32,
) -> Result<Option<UserProfile>, AppError> {
    Ok(users::table
        .find(user_id)
        .select(UserProfile::as_select())
        .first(conn)
        .optional()?)
}
