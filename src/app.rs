use std::sync::Arc;

use axum::{
    extract::{FromRequest, FromRequestParts, Path, State},
    http::{header::SET_COOKIE, request::Parts, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use diesel::SqliteConnection;
use serde_json::json;
use tower_http::trace::TraceLayer;

use crate::auth::{self, TokenPayload};
use crate::config::Config;
use crate::error::AppError;
use crate::model::{AnimeInput, GameEventInput, LoginInput, RegisterInput, VoteInput};
use crate::{anime, games, reset_schema, users, DbPool};

#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(pool: DbPool, config: Config) -> Self {
        Self {
            pool,
            config: Arc::new(config),
        }
    }

    /// Runs `f` with a pooled connection on the blocking thread pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, AppError>
    where
        F: FnOnce(&mut SqliteConnection) -> Result<T, AppError> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            f(&mut conn)
        })
        .await?
    }
}

/// JSON body whose parse failures become `400` responses in the usual error shape.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct ApiJson<T>(pub T);

/// Path parameters; a non-numeric id is a `400` with a JSON error body.
#[derive(FromRequestParts)]
#[from_request(via(Path), rejection(AppError))]
pub struct ApiPath<T>(pub T);

/// The authenticated caller. Rejects with `401` when the session is missing or invalid.
pub struct AuthUser(pub TokenPayload);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        auth::current_user(&parts.headers, &state.config.token_secret)
            .map(AuthUser)
            .ok_or_else(|| AppError::Unauthenticated("Authentication required".to_string()))
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/auth/register", post(register_handler))
        .route("/auth/login", post(login_handler))
        .route("/auth/logout", post(logout_handler))
        .route("/auth/me", get(me_handler))
        .route("/anime", get(list_anime_handler).post(create_anime_handler))
        .route(
            "/anime/{id}",
            get(get_anime_handler)
                .put(update_anime_handler)
                .delete(delete_anime_handler),
        )
        .route("/games", get(list_games_handler).post(create_game_handler))
        .route("/games/vote", post(vote_handler))
        .route(
            "/games/{id}",
            get(get_game_handler)
                .put(update_game_handler)
                .delete(delete_game_handler),
        )
        .route("/init-db", get(init_db_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn session_cookie(state: &AppState, user_id: i32, username: &str) -> Result<String, AppError> {
    let token = auth::issue_token(user_id, username, &state.config.token_secret)?;
    Ok(auth::auth_cookie(&token, state.config.secure_cookies))
}

async fn register_handler(
    State(state): State<AppState>,
    ApiJson(input): ApiJson<RegisterInput>,
) -> Result<impl IntoResponse, AppError> {
    let user = state
        .with_conn(move |conn| users::register_user(conn, input))
        .await?;
    let cookie = session_cookie(&state, user.id, &user.username)?;

    Ok((
        StatusCode::CREATED,
        [(SET_COOKIE, cookie)],
        Json(json!({ "message": "Registration successful", "user": user })),
    ))
}

async fn login_handler(
    State(state): State<AppState>,
    ApiJson(input): ApiJson<LoginInput>,
) -> Result<impl IntoResponse, AppError> {
    let user = state
        .with_conn(move |conn| users::authenticate(conn, input))
        .await?;
    let cookie = session_cookie(&state, user.id, &user.username)?;

    Ok((
        StatusCode::OK,
        [(SET_COOKIE, cookie)],
        Json(json!({ "message": "Logged in", "user": user })),
    ))
}

async fn logout_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(SET_COOKIE, auth::clear_auth_cookie(state.config.secure_cookies))],
        Json(json!({ "message": "Logged out" })),
    )
}

async fn me_handler(
    State(state): State<AppState>,
    AuthUser(session): AuthUser,
) -> Result<impl IntoResponse, AppError> {
    let profile = state
        .with_conn(move |conn| users::find_profile(conn, session.user_id))
        .await?
        .ok_or_else(|| AppError::not_found("User not found"))?;
    Ok(Json(json!({ "user": profile })))
}

async fn list_anime_handler(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let list = state.with_conn(anime::list_anime).await?;
    Ok(Json(list))
}

async fn create_anime_handler(
    State(state): State<AppState>,
    AuthUser(session): AuthUser,
    ApiJson(input): ApiJson<AnimeInput>,
) -> Result<impl IntoResponse, AppError> {
    let created = state
        .with_conn(move |conn| anime::create_anime(conn, input, session.user_id))
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "Anime added", "anime": created })),
    ))
}

async fn get_anime_handler(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<i32>,
) -> Result<impl IntoResponse, AppError> {
    let found = state
        .with_conn(move |conn| anime::get_anime(conn, id))
        .await?;
    Ok(Json(found))
}

async fn update_anime_handler(
    State(state): State<AppState>,
    AuthUser(session): AuthUser,
    ApiPath(id): ApiPath<i32>,
    ApiJson(input): ApiJson<AnimeInput>,
) -> Result<impl IntoResponse, AppError> {
    let updated = state
        .with_conn(move |conn| anime::update_anime(conn, id, input, session.user_id))
        .await?;
    Ok(Json(json!({ "message": "Anime updated", "anime": updated })))
}

async fn delete_anime_handler(
    State(state): State<AppState>,
    AuthUser(session): AuthUser,
    ApiPath(id): ApiPath<i32>,
) -> Result<impl IntoResponse, AppError> {
    state
        .with_conn(move |conn| anime::delete_anime(conn, id, session.user_id))
        .await?;
    Ok(Json(json!({ "message": "Anime deleted" })))
}

async fn list_games_handler(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let list = state.with_conn(games::list_events).await?;
    Ok(Json(list))
}

async fn create_game_handler(
    State(state): State<AppState>,
    AuthUser(session): AuthUser,
    ApiJson(input): ApiJson<GameEventInput>,
) -> Result<impl IntoResponse, AppError> {
    let created = state
        .with_conn(move |conn| games::create_event(conn, input, session.user_id))
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "Game event created", "event": created })),
    ))
}

async fn get_game_handler(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<i32>,
) -> Result<impl IntoResponse, AppError> {
    let found = state
        .with_conn(move |conn| games::get_event(conn, id))
        .await?;
    Ok(Json(found))
}

async fn update_game_handler(
    State(state): State<AppState>,
    AuthUser(session): AuthUser,
    ApiPath(id): ApiPath<i32>,
    ApiJson(input): ApiJson<GameEventInput>,
) -> Result<impl IntoResponse, AppError> {
    let updated = state
        .with_conn(move |conn| games::update_event(conn, id, input, session.user_id))
        .await?;
    Ok(Json(json!({ "message": "Game event updated", "event": updated })))
}

async fn delete_game_handler(
    State(state): State<AppState>,
    AuthUser(session): AuthUser,
    ApiPath(id): ApiPath<i32>,
) -> Result<impl IntoResponse, AppError> {
    state
        .with_conn(move |conn| games::delete_event(conn, id, session.user_id))
        .await?;
    Ok(Json(json!({ "message": "Game event deleted" })))
}

async fn vote_handler(
    State(state): State<AppState>,
    AuthUser(session): AuthUser,
    ApiJson(input): ApiJson<VoteInput>,
) -> Result<impl IntoResponse, AppError> {
    let (Some(event_id), Some(attending)) = (input.event_id, input.vote) else {
        return Err(AppError::validation(
            "Please provide the event id and your vote",
        ));
    };
    let votes = state
        .with_conn(move |conn| games::cast_vote(conn, event_id, session.user_id, attending))
        .await?;
    Ok(Json(json!({ "message": "Vote recorded", "votes": votes })))
}

async fn init_db_handler(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    if !state.config.allow_init_db {
        return Err(AppError::Forbidden(
            "Database reset is disabled; set ALLOW_INIT_DB=true to enable it".to_string(),
        ));
    }
    state
        .with_conn(|conn| reset_schema(conn).map_err(AppError::from))
        .await?;
    Ok(Json(json!({
        "success": true,
        "message": "Database initialized"
    })))
}
