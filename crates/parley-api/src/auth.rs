use std::sync::Arc;

use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::{SaltString, rand_core::OsRng}};
use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use tracing::{error, info};
use uuid::Uuid;

use parley_db::Database;
use parley_gateway::connection::GatewayConfig;
use parley_gateway::router::MessageRouter;
use parley_gateway::token;
use parley_types::api::{LoginRequest, LoginResponse, LogoutResponse, RegisterRequest, RegisterResponse};
use parley_types::models::Identity;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub router: MessageRouter,
    pub gateway: Arc<GatewayConfig>,
    pub token_ttl: chrono::Duration,
}

impl AppStateInner {
    pub fn jwt_secret(&self) -> &str {
        &self.gateway.jwt_secret
    }
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    // Validate input
    let username = req.username.trim();
    if username.len() < 3 || username.len() > 32 {
        return Err(StatusCode::BAD_REQUEST);
    }
    if req.password.len() < 8 {
        return Err(StatusCode::BAD_REQUEST);
    }

    let db = state.db.clone();
    let username = username.to_string();
    let identity = blocking(move || {
        // Check if username is taken
        if db
            .get_user_by_username(&username)
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
            .is_some()
        {
            return Err(StatusCode::CONFLICT);
        }

        // Hash password with Argon2id
        let salt = SaltString::generate(&mut OsRng);
        let password_hash = Argon2::default()
            .hash_password(req.password.as_bytes(), &salt)
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
            .to_string();

        let identity = Identity {
            id: Uuid::new_v4(),
            username,
        };

        // A concurrent registration can still win the UNIQUE index
        let created = db
            .create_user(&identity.id.to_string(), &identity.username, &password_hash)
            .map_err(|e| {
                error!("Failed to create user {}: {:#}", identity.username, e);
                StatusCode::INTERNAL_SERVER_ERROR
            })?;
        if !created {
            return Err(StatusCode::CONFLICT);
        }
        Ok(identity)
    })
    .await?;

    let token = issue_token(&state, &identity)?;
    info!("Registered {} ({})", identity.username, identity.id);

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            user_id: identity.id,
            token,
        }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.db.clone();
    let identity = blocking(move || {
        let user = db
            .get_user_by_username(req.username.trim())
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
            .ok_or(StatusCode::UNAUTHORIZED)?;

        // Verify password
        let parsed_hash =
            PasswordHash::new(&user.password).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        Argon2::default()
            .verify_password(req.password.as_bytes(), &parsed_hash)
            .map_err(|_| StatusCode::UNAUTHORIZED)?;

        Ok(Identity {
            id: user.id.parse().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?,
            username: user.username,
        })
    })
    .await?;
    let token = issue_token(&state, &identity)?;

    Ok(Json(LoginResponse {
        user_id: identity.id,
        username: identity.username,
        token,
    }))
}

/// Tokens are stateless, so there is nothing to revoke; the client discards it.
pub async fn logout(Extension(identity): Extension<Identity>) -> Json<LogoutResponse> {
    info!("{} ({}) logged out", identity.username, identity.id);
    Json(LogoutResponse {
        message: "Logout successful".into(),
    })
}

/// Run store queries and password hashing off the async runtime.
pub(crate) async fn blocking<T, F>(f: F) -> Result<T, StatusCode>
where
    F: FnOnce() -> Result<T, StatusCode> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?
}

fn issue_token(state: &AppStateInner, identity: &Identity) -> Result<String, StatusCode> {
    token::issue(state.jwt_secret(), identity, chrono::Utc::now(), state.token_ttl).map_err(|e| {
        error!("Failed to sign token: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })
}
