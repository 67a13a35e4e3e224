use std::sync::Arc;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    http::{
        Method,
        header::{AUTHORIZATION, CONTENT_TYPE},
    },
    middleware,
    response::IntoResponse,
    routing::{get, post},
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use parley_api::auth::{self, AppState, AppStateInner};
use parley_api::middleware::require_auth;
use parley_api::{messages, users};
use parley_db::Database;
use parley_gateway::connection;
use parley_gateway::presence::PresenceRegistry;
use parley_gateway::router::MessageRouter;

use crate::config::ServerConfig;

/// Wire the store, presence registry and router together.
pub fn build_state(db: Arc<Database>, config: &ServerConfig) -> AppState {
    let router = MessageRouter::new(db.clone(), PresenceRegistry::new());
    Arc::new(AppStateInner {
        db,
        router,
        gateway: Arc::new(config.gateway()),
        token_ttl: config.token_ttl(),
    })
}

pub fn build_router(state: AppState, allowed_origins: Option<&str>) -> Router {
    let public_routes = Router::new()
        .route("/health", get(health_check))
        .route("/api/auth/register", post(auth::register))
        .route("/api/auth/login", post(auth::login))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/api/auth/logout", post(auth::logout))
        .route("/api/messages/{peer_id}", get(messages::get_history))
        .route("/api/users/search", get(users::search))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .with_state(state.clone());

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(state);

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(ws_route)
        .layer(build_cors_layer(allowed_origins))
        .layer(TraceLayer::new_for_http())
}

/// Build CORS layer from config. Permissive when no origins are configured.
fn build_cors_layer(origins: Option<&str>) -> CorsLayer {
    match origins {
        Some(list) if !list.trim().is_empty() => {
            let parsed: Vec<_> = list
                .split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(parsed))
                .allow_methods([Method::GET, Method::POST])
                .allow_headers([AUTHORIZATION, CONTENT_TYPE])
        }
        _ => CorsLayer::permissive(),
    }
}

async fn health_check() -> &'static str {
    "OK"
}

async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| {
        connection::handle_connection(socket, state.router.clone(), state.gateway.clone())
    })
}
