use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use axum_extra::TypedHeader;
use axum_extra::headers::{Authorization, authorization::Bearer};
use axum_extra::typed_header::TypedHeaderRejection;

use parley_gateway::token;

use crate::auth::AppState;

/// Extract and validate the JWT from the Authorization header, making the
/// caller's `Identity` available to the handler. Rejects before the handler
/// (and so the store) is reached.
pub async fn require_auth(
    State(state): State<AppState>,
    auth: Result<TypedHeader<Authorization<Bearer>>, TypedHeaderRejection>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let TypedHeader(Authorization(bearer)) = auth.map_err(|_| StatusCode::UNAUTHORIZED)?;

    let identity = token::validate(bearer.token(), state.jwt_secret(), chrono::Utc::now())
        .map_err(|_| StatusCode::UNAUTHORIZED)?;

    req.extensions_mut().insert(identity);
    Ok(next.run(req).await)
}
