use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::error::{map_db_conflict, map_db_error};
use crate::state::AppState;

#[derive(Debug, Clone, serde::Deserialize, utoipa::ToSchema)]
pub(crate) struct RegisterRequest {
    email: String,
    password: String,
}

#[derive(Debug, Clone, serde::Deserialize, utoipa::ToSchema)]
pub(crate) struct LoginRequest {
    email: String,
    password: String,
}

#[derive(Debug, Clone, serde::Serialize, utoipa::ToSchema)]
pub(crate) struct TokenResponse {
    token: String,
}

#[derive(Debug, Clone, serde::Serialize, utoipa::ToSchema)]
pub(crate) struct AuthMeResponse {
    id: Uuid,
    email: String,
    role: String,
}

#[derive(sqlx::FromRow)]
struct AuthUserRow {
    id: Uuid,
    password_hash: String,
}

#[utoipa::path(
    post,
    path = "/api/auth/register",
    tag = "auth",
    request_body = RegisterRequest,
    responses(
        (status = 200, description = "Auth token for the new user", body = TokenResponse),
        (status = 400, description = "Missing or malformed email/password"),
        (status = 409, description = "Email already registered")
    )
)]
pub(crate) async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<Json<TokenResponse>, (StatusCode, String)> {
    let email = payload.email.trim().to_lowercase();
    if email.is_empty() || !email.contains('@') {
        return Err((
            StatusCode::BAD_REQUEST,
            "A valid email is required".to_string(),
        ));
    }
    if payload.password.trim().len() < 8 {
        return Err((
            StatusCode::BAD_REQUEST,
            "Password must be at least 8 characters".to_string(),
        ));
    }

    let password_hash = crate::auth::hash_password(&payload.password)
        .map_err(|err| (StatusCode::BAD_REQUEST, err.to_string()))?;

    let user_id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO users (id, email, password_hash, role, created_at)
        VALUES ($1, $2, $3, 'user', now())
        "#,
    )
    .bind(user_id)
    .bind(&email)
    .bind(&password_hash)
    .execute(&state.db)
    .await
    .map_err(|err| map_db_conflict(err, "Email already registered"))?;

    let token = state.auth.issue_for_user(user_id).await;
    Ok(Json(TokenResponse { token }))
}

#[utoipa::path(
    post,
    path = "/api/auth/login",
    tag = "auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Auth token", body = TokenResponse),
        (status = 400, description = "Missing email/password"),
        (status = 401, description = "Invalid credentials")
    )
)]
pub(crate) async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<TokenResponse>, (StatusCode, String)> {
    let email = payload.email.trim().to_lowercase();
    if email.is_empty() || payload.password.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            "Email and password are required".to_string(),
        ));
    }

    let row: Option<AuthUserRow> = sqlx::query_as(
        r#"
        SELECT id, password_hash
        FROM users
        WHERE email = $1
        LIMIT 1
        "#,
    )
    .bind(&email)
    .fetch_optional(&state.db)
    .await
    .map_err(map_db_error)?;

    let Some(row) = row else {
        return Err((StatusCode::UNAUTHORIZED, "Invalid credentials".to_string()));
    };
    if !crate::auth::verify_password(&payload.password, &row.password_hash) {
        return Err((StatusCode::UNAUTHORIZED, "Invalid credentials".to_string()));
    }

    let _ = sqlx::query("UPDATE users SET last_login = now() WHERE id = $1")
        .bind(row.id)
        .execute(&state.db)
        .await;

    let token = state.auth.issue_for_user(row.id).await;
    Ok(Json(TokenResponse { token }))
}

#[utoipa::path(
    get,
    path = "/api/auth/me",
    tag = "auth",
    responses((status = 200, description = "Current user", body = AuthMeResponse)),
    security(("HTTPBearer" = []))
)]
pub(crate) async fn me(AuthUser(user): AuthUser) -> Json<AuthMeResponse> {
    Json(AuthMeResponse {
        id: user.id,
        email: user.email,
        role: user.role,
    })
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/me", get(me))
}
