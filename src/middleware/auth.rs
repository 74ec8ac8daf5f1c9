use crate::AppState;
use crate::models::User;
use argon2::{Argon2, PasswordHash, PasswordVerifier};
use axum::{
    extract::{Request, State},
    http::{StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use sqlx::SqlitePool;

/// The authenticated depositor, inserted as a request extension.
#[derive(Clone)]
pub struct AuthUser(pub User);

enum AuthFailure {
    Unauthenticated,
    Internal(sqlx::Error),
}

/// HTTP Basic authentication against stored argon2 hashes. Missing or bad
/// credentials get a 401 with a realm challenge.
pub async fn basic_auth(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    match authenticate(&state.db, req.headers()).await {
        Ok(user) => {
            req.extensions_mut().insert(AuthUser(user));
            next.run(req).await
        }
        Err(AuthFailure::Unauthenticated) => challenge(&state.config.realm),
        Err(AuthFailure::Internal(e)) => {
            tracing::error!("auth lookup failed: {:?}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn authenticate(
    db: &SqlitePool,
    headers: &axum::http::HeaderMap,
) -> Result<User, AuthFailure> {
    let encoded = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Basic "))
        .ok_or(AuthFailure::Unauthenticated)?;

    let decoded = STANDARD
        .decode(encoded.trim())
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .ok_or(AuthFailure::Unauthenticated)?;
    let (username, password) = decoded
        .split_once(':')
        .ok_or(AuthFailure::Unauthenticated)?;

    let user = sqlx::query_as::<_, User>(
        "SELECT id, username, password_hash, is_staff, created_at \
         FROM users WHERE username = ?",
    )
    .bind(username)
    .fetch_optional(db)
    .await
    .map_err(AuthFailure::Internal)?
    .ok_or(AuthFailure::Unauthenticated)?;

    let parsed_hash =
        PasswordHash::new(&user.password_hash).map_err(|_| AuthFailure::Unauthenticated)?;
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .map_err(|_| AuthFailure::Unauthenticated)?;

    Ok(user)
}

fn challenge(realm: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [(
            header::WWW_AUTHENTICATE,
            format!("Basic realm=\"{realm}\""),
        )],
        "authentication required",
    )
        .into_response()
}
